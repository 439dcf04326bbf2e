use std::time::Duration;

use docqa_core::config::OllamaConfig;
use docqa_core::error::AppError;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client for Ollama. Without `allow_remote` this is strictly limited to `127.0.0.1`.
    pub fn new(base_url: &str, allow_remote: bool) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if allow_remote {
            let rest = base_url
                .strip_prefix("http://")
                .or_else(|| base_url.strip_prefix("https://"));
            match rest {
                Some(host) if !host.is_empty() && !host.contains(char::is_whitespace) => {}
                _ => {
                    return Err(AppError::new(
                        "RAG_CONFIG_INVALID",
                        "Ollama base URL must be an http(s) URL",
                    )
                    .with_details(format!("base_url={base_url}")));
                }
            }
        } else if !is_loopback_url(&base_url) {
            return Err(AppError::new(
                "RAG_CONFIG_INVALID",
                "Ollama base URL must be localhost (127.0.0.1)",
            )
            .with_details(format!("base_url={base_url}")));
        }

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(30),
        })
    }

    pub fn from_config(config: &OllamaConfig) -> Result<Self, AppError> {
        Ok(Self::new(&config.base_url, config.allow_remote)?
            .with_timeout(Duration::from_secs(config.timeout_secs)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url)
            .timeout(Duration::from_millis(800))
            .call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(
                AppError::new("RAG_OLLAMA_UNHEALTHY", "Ollama health check failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(AppError::new("RAG_OLLAMA_UNREACHABLE", "Failed to reach Ollama")
                .with_details(format!("base_url={}; err={}", self.base_url, e))
                .with_retryable(true)),
        }
    }
}

fn is_loopback_url(base_url: &str) -> bool {
    let rest = match base_url.strip_prefix("http://127.0.0.1") {
        Some(r) => r,
        None => return false,
    };
    if rest.is_empty() {
        return true;
    }
    match rest.strip_prefix(':') {
        Some(port) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            matches!(port.parse::<u16>(), Ok(p) if p != 0)
        }
        _ => false,
    }
}
