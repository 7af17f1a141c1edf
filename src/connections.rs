//! External connections (feeds, generation providers) behind one action contract.

pub mod actions;
pub mod discord;
pub mod openai;
pub mod registry;
pub mod traits;

pub use actions::{ActionSpec, ArgSpec, ArgType, FeedAction, GenerationAction};
pub use registry::ConnectionRegistry;
pub use traits::{Connection, ConnectionDyn};
