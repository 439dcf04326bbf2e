use docqa_core::config::EmbeddingConfig;
use docqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{Embedder, InputPolicy};
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    policy: InputPolicy,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            policy: InputPolicy::from_config(config),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let mut out = self.embed_batch(&[input])?;
        out.pop().ok_or_else(|| {
            AppError::new("RAG_EMBEDDINGS_FAILED", "Embeddings response was empty")
        })
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let input = inputs
            .iter()
            .map(|t| self.policy.apply(t))
            .collect::<Result<Vec<_>, _>>()?;

        let url = format!("{}/api/embed", self.client.base_url());
        let req = EmbedRequest {
            model: &self.model,
            input,
        };
        let resp = ureq::post(&url)
            .timeout(self.client.timeout())
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new("RAG_EMBEDDINGS_FAILED", "Failed to encode embeddings request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: EmbedResponse = r.into_json().map_err(|e| {
                    AppError::new("RAG_EMBEDDINGS_FAILED", "Failed to decode embeddings response")
                        .with_details(e.to_string())
                })?;
                if v.embeddings.len() != inputs.len() {
                    return Err(AppError::new(
                        "RAG_EMBEDDINGS_FAILED",
                        "Embeddings response count does not match request",
                    )
                    .with_details(format!(
                        "expected={}; got={}",
                        inputs.len(),
                        v.embeddings.len()
                    )));
                }
                if v.embeddings.iter().any(|e| e.is_empty()) {
                    return Err(AppError::new(
                        "RAG_EMBEDDINGS_FAILED",
                        "Embeddings response contained an empty vector",
                    ));
                }
                Ok(v.embeddings)
            }
            Ok(r) => Err(
                AppError::new("RAG_EMBEDDINGS_FAILED", "Embeddings request failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(
                AppError::new("RAG_EMBEDDINGS_FAILED", "Failed to call embeddings endpoint")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}
