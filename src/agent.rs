//! The reply agent: prompt composition, the message pipeline, and the loop
//! that drives it.

pub mod composer;
pub mod processor;
pub mod runner;

pub use composer::{PromptPair, ReplyComposer};
pub use processor::{MessageProcessor, ProcessorSettings, SelfFilter, TickReport, Watermark};
pub use runner::{AgentLoop, LoopSettings, select_model_provider};
