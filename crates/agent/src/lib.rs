//! Answering questions from indexed channel knowledge.
//!
//! The flow for one question is fixed:
//! 1. **Retrieval** (`pipeline`) - embed the question and pull the closest chunks
//!    of the channel's index, plus recent well-received answers
//! 2. **Prompting** (`prompt`) - render a bounded prompt from those pieces
//! 3. **Generation** (`llm`) - call Claude through Anthropic or Vertex AI and
//!    read back the answer and its confidence tag. Vertex tokens come from
//!    `credentials`
//!
//! The model only phrases the answer. Which sources are cited is decided by
//! retrieval, not by the model.

pub mod credentials;
pub mod llm;
pub mod pipeline;
pub mod prompt;

pub use credentials::{GoogleCredentials, GoogleTokenSource, StaticTokenSource, TokenSource};
pub use llm::{build_llm_client, CompletionRequest, LlmClient, LlmError};
pub use pipeline::{Answer, PipelineError, PipelineSettings, QueryPipeline};
pub use prompt::{PromptBuilder, PromptError};
