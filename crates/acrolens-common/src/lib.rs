//! Network collaborators shared by the content script and native tooling.

pub mod chat;
pub mod error;
pub mod sse;
pub mod wikipedia;

pub use crate::chat::{ChatCompletionsModel, ChatSession, OPENROUTER_API_URL};
pub use crate::error::NetError;
pub use crate::wikipedia::{WIKIPEDIA_API_URL, WikipediaClient};
