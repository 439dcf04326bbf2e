#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use docqa_ai::embeddings::Embedder;
use docqa_ai::llm::Llm;
use docqa_core::config::{ChunkingConfig, RagConfig};
use docqa_core::error::AppError;

pub const VOCAB: [&str; 7] = ["sky", "blue", "grass", "green", "color", "capital", "france"];

pub const SKY_AND_GRASS: &str = "The sky is blue. Grass is green.";

pub const LONG_DOC: &str = "The sky is blue today. Grass is green in spring. \
The capital of France is Paris. Blue sky and green grass share a color palette.\n\n\
Color theory explains why the sky looks blue. Green grass reflects green light. \
France has a capital city with many parks full of green grass.";

/// Counts vocabulary words, plus a constant bias dimension so no vector is zero.
pub struct VocabEmbedder {
    model: String,
    pub batch_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
}

impl VocabEmbedder {
    pub fn new() -> Arc<Self> {
        Self::with_model("vocab-v1")
    }

    pub fn with_model(model: &str) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        })
    }

    fn vector(input: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; VOCAB.len() + 1];
        for word in input
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            if let Some(i) = VOCAB.iter().position(|w| *w == word) {
                v[i] += 1.0;
            }
        }
        v[VOCAB.len()] = 1.0;
        v
    }
}

impl Embedder for VocabEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(input))
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|t| Self::vector(t)).collect())
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn model(&self) -> &str {
        "vocab-v1"
    }

    fn embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
        Err(AppError::new("RAG_EMBEDDINGS_FAILED", "model crashed").with_retryable(true))
    }
}

/// Replies with a fixed text (or error) and records every prompt.
pub struct ScriptedLlm {
    reply: Mutex<Result<String, AppError>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn replying(text: &str) -> Arc<Self> {
        Self::with_reply(Ok(text.to_string()))
    }

    pub fn failing(err: AppError) -> Arc<Self> {
        Self::with_reply(Err(err))
    }

    fn with_reply(reply: Result<String, AppError>) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reply(&self, text: &str) {
        *self.reply.lock().expect("lock") = Ok(text.to_string());
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("lock").len()
    }
}

impl Llm for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    fn generate(&self, prompt: &str) -> Result<String, AppError> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        self.reply.lock().expect("lock").clone()
    }
}

/// Small chunks so short fixtures split into several pieces.
pub fn small_chunk_config() -> RagConfig {
    RagConfig {
        chunking: ChunkingConfig {
            target_size: 60,
            overlap: 10,
            boundary_window: 20,
            min_chunk_size: 10,
        },
        ..RagConfig::default()
    }
}
