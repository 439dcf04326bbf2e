//! Process-wide collaborator handles.
//!
//! The embedding model and the generation client are loaded once per process and
//! shared read-only by every request. Callers hold a cloned `Arc`, so `release`
//! only drops the process reference: in-flight work finishes against the handle
//! it already has.

use std::sync::{Arc, PoisonError, RwLock};

use docqa_core::config::RagConfig;
use docqa_core::error::AppError;
use tracing::info;

use crate::embeddings::ollama_embed::OllamaEmbedder;
use crate::embeddings::Embedder;
use crate::llm::ollama_llm::OllamaLlm;
use crate::llm::Llm;
use crate::ollama::OllamaClient;

pub static EMBEDDER: SharedResource<dyn Embedder> = SharedResource::new("embedder");
pub static GENERATOR: SharedResource<dyn Llm> = SharedResource::new("generator");

pub struct SharedResource<T: ?Sized> {
    name: &'static str,
    slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> SharedResource<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: RwLock::new(None),
        }
    }

    /// Install the value produced by `loader` unless one is already present.
    /// The loader runs under the write lock, so concurrent callers load at most once.
    pub fn init_with<F>(&self, loader: F) -> Result<Arc<T>, AppError>
    where
        F: FnOnce() -> Result<Arc<T>, AppError>,
    {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let value = loader()?;
        *slot = Some(Arc::clone(&value));
        info!(resource = self.name, "shared resource initialized");
        Ok(value)
    }

    pub fn get(&self) -> Result<Arc<T>, AppError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| {
                AppError::new(
                    "RAG_RUNTIME_NOT_INITIALIZED",
                    "Shared resource used before initialization",
                )
                .with_details(format!("resource={}", self.name))
            })
    }

    pub fn is_initialized(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns whether a value was held.
    pub fn release(&self) -> bool {
        let released = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if released {
            info!(resource = self.name, "shared resource released");
        }
        released
    }
}

/// Wire the Ollama-backed embedder and generator into the process statics.
pub fn init_ollama_runtime(config: &RagConfig) -> Result<(), AppError> {
    config.validate()?;
    let client = OllamaClient::from_config(&config.ollama)?;
    client.health_check()?;

    EMBEDDER.init_with(|| {
        let embedder: Arc<dyn Embedder> =
            Arc::new(OllamaEmbedder::new(client.clone(), &config.embedding));
        Ok(embedder)
    })?;
    GENERATOR.init_with(|| {
        let llm: Arc<dyn Llm> = Arc::new(OllamaLlm::new(client.clone(), &config.generation.model));
        Ok(llm)
    })?;
    Ok(())
}

pub fn release_runtime() {
    EMBEDDER.release();
    GENERATOR.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn loader_runs_once_and_release_keeps_outstanding_handles() {
        let resource: SharedResource<str> = SharedResource::new("test");
        assert_eq!(
            resource.get().expect_err("uninitialized").code,
            "RAG_RUNTIME_NOT_INITIALIZED"
        );

        let loads = AtomicUsize::new(0);
        let first = resource
            .init_with(|| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::from("model-a"))
            })
            .expect("init");
        let second = resource
            .init_with(|| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::from("model-b"))
            })
            .expect("init again");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(&*second, "model-a");

        assert!(resource.release());
        assert!(!resource.is_initialized());
        assert_eq!(&*first, "model-a");
        assert!(!resource.release());
    }

    #[test]
    fn failed_loader_leaves_slot_empty() {
        let resource: SharedResource<str> = SharedResource::new("test");
        let err = resource
            .init_with(|| Err(AppError::new("RAG_OLLAMA_UNREACHABLE", "down")))
            .expect_err("loader failed");
        assert_eq!(err.code, "RAG_OLLAMA_UNREACHABLE");
        assert!(!resource.is_initialized());
    }
}
