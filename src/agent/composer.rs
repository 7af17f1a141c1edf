//! Reply composition: persona and retrieved context into a prompt pair, then
//! one generation call.

use crate::connections::ConnectionRegistry;
use crate::error::{GenerationError, Result};
use minijinja::{Environment, context};

const REPLY_TASK: &str = "reply_task";

const REPLY_TASK_TEMPLATE: &str = "\
Write a reply to this message: '{{ message }}'. \
You are {{ name }}. You have technical expertise, so your reply may include code snippets \
or technical explanations grounded in the question and your context. \
The chat renders markdown; use it where it helps readability. \
Replies are limited in length: any <think></think> reasoning you show, together with the \
reply itself, must be {{ char_limit }} characters or fewer.";

/// The two prompts sent to a generation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub task_prompt: String,
    pub system_prompt: String,
}

/// Builds prompts for the agent's persona and asks a model provider for a reply.
pub struct ReplyComposer {
    name: String,
    persona: Vec<String>,
    char_limit: usize,
    model_provider: String,
    templates: Environment<'static>,
}

impl std::fmt::Debug for ReplyComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyComposer")
            .field("name", &self.name)
            .field("model_provider", &self.model_provider)
            .finish_non_exhaustive()
    }
}

impl ReplyComposer {
    pub fn new(
        name: impl Into<String>,
        persona: Vec<String>,
        char_limit: usize,
        model_provider: impl Into<String>,
    ) -> Result<Self> {
        let mut templates = Environment::new();
        templates
            .add_template(REPLY_TASK, REPLY_TASK_TEMPLATE)
            .map_err(|error| GenerationError::Template(error.to_string()))?;

        Ok(Self {
            name: name.into(),
            persona,
            char_limit,
            model_provider: model_provider.into(),
            templates,
        })
    }

    pub fn model_provider(&self) -> &str {
        &self.model_provider
    }

    /// Build the prompt pair for a message. Pure apart from template rendering.
    pub fn compose(&self, message_body: &str, context: &[String]) -> Result<PromptPair> {
        let task_prompt = self
            .templates
            .get_template(REPLY_TASK)
            .and_then(|template| {
                template.render(context! {
                    name => &self.name,
                    message => message_body,
                    char_limit => self.char_limit,
                })
            })
            .map_err(|error| GenerationError::Template(error.to_string()))?;

        Ok(PromptPair {
            task_prompt,
            system_prompt: build_system_prompt(&self.persona, context),
        })
    }

    /// Compose and run one generation call on the selected model provider.
    pub async fn generate_reply(
        &self,
        registry: &ConnectionRegistry,
        message_body: &str,
        context: &[String],
    ) -> Result<String> {
        let prompts = self.compose(message_body, context)?;
        let reply = registry
            .generate_text(&self.model_provider, &prompts.task_prompt, &prompts.system_prompt)
            .await?;

        if reply.trim().is_empty() {
            return Err(GenerationError::EmptyReply.into());
        }

        Ok(reply)
    }
}

/// Persona lines, then a context block when there is context to show.
pub fn build_system_prompt(persona: &[String], context: &[String]) -> String {
    let mut prompt = persona.join("\n");

    if !context.is_empty() {
        prompt.push_str("\nThis is relevant context:\n");
        for snippet in context {
            prompt.push_str("- ");
            prompt.push_str(snippet);
            prompt.push('\n');
        }
    }

    prompt
}
