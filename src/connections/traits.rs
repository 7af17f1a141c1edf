//! Connection trait and dynamic dispatch companion.

use crate::connections::actions::{ActionSpec, GENERATE_TEXT};
use crate::error::Result;
use futures::future::BoxFuture;
use serde_json::Value;

/// Static trait for external capability providers.
/// Use this for type-safe implementations.
pub trait Connection: Send + Sync + 'static {
    /// Unique name for this connection.
    fn name(&self) -> &str;

    /// The fixed set of actions this connection declares.
    fn actions(&self) -> &'static [ActionSpec];

    /// Whether credentials and settings are present.
    fn is_configured(&self) -> bool;

    /// Whether this connection can turn a prompt into text.
    fn generates_text(&self) -> bool {
        self.actions().iter().any(|spec| spec.name == GENERATE_TEXT)
    }

    /// Run a declared action. Arguments have already been validated against
    /// the action's schema by the registry.
    fn perform(
        &self,
        action: &str,
        args: Value,
    ) -> impl std::future::Future<Output = Result<Value>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ConnectionDyn>` for storing different connections.
pub trait ConnectionDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn actions(&self) -> &'static [ActionSpec];

    fn is_configured(&self) -> bool;

    fn generates_text(&self) -> bool;

    fn perform<'a>(&'a self, action: &'a str, args: Value) -> BoxFuture<'a, Result<Value>>;
}

/// Blanket implementation: any type implementing Connection automatically implements ConnectionDyn.
impl<T: Connection> ConnectionDyn for T {
    fn name(&self) -> &str {
        Connection::name(self)
    }

    fn actions(&self) -> &'static [ActionSpec] {
        Connection::actions(self)
    }

    fn is_configured(&self) -> bool {
        Connection::is_configured(self)
    }

    fn generates_text(&self) -> bool {
        Connection::generates_text(self)
    }

    fn perform<'a>(&'a self, action: &'a str, args: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(Connection::perform(self, action, args))
    }
}
