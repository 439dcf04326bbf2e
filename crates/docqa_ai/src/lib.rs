pub mod answer;
pub mod document;
pub mod embeddings;
pub mod extract;
pub mod guardrails;
pub mod indexing;
pub mod llm;
pub mod ollama;
pub mod pipeline;
pub mod retrieve;
pub mod runtime;
