use docqa_core::error::AppError;

/// The external generation collaborator: one prompt in, free text out.
pub trait Llm: Send + Sync {
    fn model(&self) -> &str;

    fn generate(&self, prompt: &str) -> Result<String, AppError>;
}

pub mod ollama_llm;
