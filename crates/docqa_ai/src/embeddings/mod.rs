use docqa_core::config::{EmbeddingConfig, TruncationPolicy};
use docqa_core::error::AppError;
use docqa_core::normalize::{char_len, char_slice};

/// Maps text to a fixed-dimension dense vector.
///
/// Implementations must be deterministic for a fixed model and safe to call from
/// several threads at once; the indexer fans batches out over a thread pool.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors. Stored with each index generation.
    fn model(&self) -> &str;

    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;

    /// Same order as `inputs`, one vector per input.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        inputs.iter().map(|t| self.embed(t)).collect()
    }
}

/// Maximum input length handling, applied before text reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPolicy {
    pub max_chars: usize,
    pub truncation: TruncationPolicy,
}

impl InputPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_chars: config.max_input_chars,
            truncation: config.truncation,
        }
    }

    /// Truncation keeps exactly the first `max_chars` Unicode scalar values.
    pub fn apply<'a>(&self, input: &'a str) -> Result<&'a str, AppError> {
        let len = char_len(input);
        if len <= self.max_chars {
            return Ok(input);
        }
        match self.truncation {
            TruncationPolicy::Truncate => Ok(char_slice(input, 0, self.max_chars)),
            TruncationPolicy::Reject => Err(AppError::new(
                "RAG_EMBEDDINGS_INPUT_TOO_LONG",
                "Embedding input exceeds the configured maximum length",
            )
            .with_details(format!("chars={}; max_chars={}", len, self.max_chars))),
        }
    }
}

pub mod ollama_embed;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_at_char_boundary() {
        let policy = InputPolicy {
            max_chars: 3,
            truncation: TruncationPolicy::Truncate,
        };
        assert_eq!(policy.apply("ab").expect("short"), "ab");
        assert_eq!(policy.apply("äöüß").expect("long"), "äöü");
        // Repeated calls cut at the same point.
        assert_eq!(policy.apply("äöüß").expect("again"), "äöü");
    }

    #[test]
    fn reject_policy_fails_on_long_input() {
        let policy = InputPolicy {
            max_chars: 3,
            truncation: TruncationPolicy::Reject,
        };
        assert!(policy.apply("abc").is_ok());
        let err = policy.apply("abcd").expect_err("too long");
        assert_eq!(err.code, "RAG_EMBEDDINGS_INPUT_TOO_LONG");
    }

    struct Constant;

    impl Embedder for Constant {
        fn model(&self) -> &str {
            "constant"
        }

        fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![input.len() as f32, 1.0])
        }
    }

    #[test]
    fn default_batch_preserves_order() {
        let out = Constant.embed_batch(&["a", "bbb", "cc"]).expect("batch");
        assert_eq!(out, vec![vec![1.0, 1.0], vec![3.0, 1.0], vec![2.0, 1.0]]);
    }
}
