//! Concrete capability implementations backed by a text-generation API.

pub mod evaluator;
pub mod openai;

pub use evaluator::LlmEvaluator;
pub use openai::OpenAiGenerator;
