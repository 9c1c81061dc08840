//! Concrete embedding backends.
//!
//! - **[`DisabledEmbedder`]** fails every call with `Unavailable`.
//! - **[`OpenAIEmbedder`]** calls `POST /v1/embeddings` with a bearer key
//!   from `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`]** calls `POST /api/embed` on a local Ollama.
//!
//! Each `embed` is exactly one HTTP request. Retrying is left to callers
//! (`midset embed pending`), so a failed document upsert never stalls on
//! backoff.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use midset_core::embedding::{Embedder, EmbeddingError};

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Build the backend named by `[embedding] provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "openai" => Ok(Box::new(OpenAIEmbedder::from_env(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

/// The configured backend, or `None` when embeddings are disabled.
pub fn optional_embedder(config: &EmbeddingConfig) -> Result<Option<Box<dyn Embedder>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    create_embedder(config).map(Some)
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn required<'a>(value: &'a Option<String>, what: &str, provider: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("embedding.{} required for {} provider", what, provider))
}

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: Option<String>,
}

impl OpenAIEmbedder {
    /// Read the key from `OPENAI_API_KEY`. A missing key is not an error
    /// here; every call then fails with `Unavailable`.
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(config, api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model: required(&config.model, "model", "OpenAI")?.to_string(),
            dims: config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let Some(api_key) = &self.api_key else {
            return Err(EmbeddingError::Unavailable(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        };

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Remote(e.to_string()))?;

        let json = success_json(response, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model: required(&config.model, "model", "Ollama")?.to_string(),
            dims: config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbeddingError::Remote(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let json = success_json(response, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

async fn success_json(
    response: reqwest::Response,
    provider: &str,
) -> Result<serde_json::Value, EmbeddingError> {
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::Remote(format!(
            "{} API error {}: {}",
            provider, status, body_text
        )));
    }
    response
        .json()
        .await
        .map_err(|e| EmbeddingError::Malformed(e.to_string()))
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    value
        .as_array()
        .ok_or_else(|| EmbeddingError::Malformed("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Malformed("non-numeric embedding value".to_string()))
        })
        .collect()
}

/// `data[].embedding`, placed by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbeddingError::Malformed("missing embedding".to_string()))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.iter().enumerate().any(|(i, (index, _))| i != *index) {
        return Err(EmbeddingError::Malformed(
            "response indices do not cover the input".to_string(),
        ));
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing embeddings array".to_string()))?
        .iter()
        .map(parse_vector)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(provider: &str, url: Option<String>) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            model: Some("test-model".to_string()),
            dims: Some(2),
            url,
            ..EmbeddingConfig::default()
        }
    }

    /// Serve one HTTP request with a fixed status and JSON body.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let reply = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Consume headers and a `content-length` body.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&data[..end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                return;
            }
        }
    }

    #[test]
    fn test_openai_response_reordered_by_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_openai_response_with_gap_is_malformed() {
        let json = json!({"data": [{"index": 2, "embedding": [1.0]}]});
        assert!(matches!(
            parse_openai_response(&json),
            Err(EmbeddingError::Malformed(_))
        ));
    }

    #[test]
    fn test_ollama_response_rejects_non_numeric() {
        let json = json!({"embeddings": [[1.0, "x"]]});
        assert!(matches!(
            parse_ollama_response(&json),
            Err(EmbeddingError::Malformed(_))
        ));
        let ok = parse_ollama_response(&json!({"embeddings": [[0.5, 0.25]]})).unwrap();
        assert_eq!(ok, vec![vec![0.5, 0.25]]);
    }

    #[tokio::test]
    async fn test_disabled_is_unavailable() {
        let err = DisabledEmbedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_openai_without_key_is_unavailable() {
        let embedder = OpenAIEmbedder::new(&config("openai", None), None).unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_ollama_roundtrip_against_local_server() {
        let url = serve_once("200 OK", json!({"embeddings": [[0.5, 0.75]]}).to_string()).await;
        let embedder = OllamaEmbedder::new(&config("ollama", Some(url))).unwrap();
        let vectors = embedder.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.75]]);
    }

    #[tokio::test]
    async fn test_openai_server_error_is_remote() {
        let url = serve_once("500 Internal Server Error", "{}".to_string()).await;
        let embedder =
            OpenAIEmbedder::new(&config("openai", Some(url)), Some("sk-test".to_string())).unwrap();
        let err = embedder.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Remote(_)));
    }

    #[test]
    fn test_optional_embedder_none_when_disabled() {
        assert!(optional_embedder(&EmbeddingConfig::default()).unwrap().is_none());
    }
}
