//! Pass-through client for the supervised server's HTTP API.
//!
//! No catalog state is kept here; the server owns its model store and this
//! client forwards requests and surfaces the server's NDJSON progress
//! streams as typed callbacks.

use futures::StreamExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::errors::{ModelboxError, ModelboxResult};

/// One installed model as reported by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

/// One progress record from a model pull.
#[derive(Debug, Clone, Deserialize)]
pub struct PullEvent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

/// One chunk of a streaming generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct NamedModel<'a> {
    name: &'a str,
}

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> ModelboxResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ModelboxError::Internal(format!("failed to build API client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `GET /api/tags`.
    pub async fn list_models(&self) -> ModelboxResult<Vec<ModelEntry>> {
        let url = self.url("/api/tags");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModelboxError::Transport(format!("request to {url} failed: {e}")))?;
        let response = check_status(response, &url)?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ModelboxError::Internal(format!("bad model listing: {e}")))?;
        Ok(tags.models)
    }

    /// `POST /api/pull`, forwarding each NDJSON progress record.
    pub async fn pull_model(
        &self,
        name: &str,
        mut on_event: impl FnMut(&PullEvent),
    ) -> ModelboxResult<()> {
        let url = self.url("/api/pull");
        let response = self
            .client
            .post(&url)
            .json(&NamedModel { name })
            .send()
            .await
            .map_err(|e| ModelboxError::Transport(format!("request to {url} failed: {e}")))?;
        let response = check_status(response, &url)?;

        debug!(name, "pulling model");
        for_each_ndjson(response, |event: PullEvent| {
            if let Some(error) = &event.error {
                return Err(ModelboxError::Internal(format!("pull failed: {error}")));
            }
            on_event(&event);
            Ok(())
        })
        .await
    }

    /// `DELETE /api/delete`.
    pub async fn delete_model(&self, name: &str) -> ModelboxResult<()> {
        let url = self.url("/api/delete");
        let response = self
            .client
            .delete(&url)
            .json(&NamedModel { name })
            .send()
            .await
            .map_err(|e| ModelboxError::Transport(format!("request to {url} failed: {e}")))?;
        check_status(response, &url)?;
        Ok(())
    }

    /// `POST /api/generate`, forwarding each streamed chunk. Stops cleanly
    /// at the record carrying `done: true`.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        mut on_chunk: impl FnMut(&GenerateChunk),
    ) -> ModelboxResult<()> {
        let url = self.url("/api/generate");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ModelboxError::Transport(format!("request to {url} failed: {e}")))?;
        let response = check_status(response, &url)?;

        for_each_ndjson(response, |chunk: GenerateChunk| {
            if let Some(error) = &chunk.error {
                return Err(ModelboxError::Internal(format!("generation failed: {error}")));
            }
            on_chunk(&chunk);
            Ok(())
        })
        .await
    }
}

fn check_status(response: reqwest::Response, url: &str) -> ModelboxResult<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        return Err(ModelboxError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

/// Drive an NDJSON response body, invoking `f` per record. Records are
/// newline-delimited; a trailing record without a final newline still
/// counts.
async fn for_each_ndjson<T: DeserializeOwned>(
    response: reqwest::Response,
    mut f: impl FnMut(T) -> ModelboxResult<()>,
) -> ModelboxResult<()> {
    let mut stream = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ModelboxError::Transport(format!("response stream failed: {e}")))?;
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record: T = serde_json::from_slice(line)
                .map_err(|e| ModelboxError::Internal(format!("bad NDJSON record: {e}")))?;
            f(record)?;
        }
    }

    if !buf.iter().all(u8::is_ascii_whitespace) {
        let record: T = serde_json::from_slice(&buf)
            .map_err(|e| ModelboxError::Internal(format!("bad NDJSON record: {e}")))?;
        f(record)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response body per accepted connection.
    async fn serve(body: &'static str, content_type: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_list_models() {
        let base = serve(
            r#"{"models":[{"name":"llama3.2:1b","size":1337},{"name":"qwen2.5:0.5b"}]}"#,
            "application/json",
        )
        .await;
        let client = ApiClient::new(base).unwrap();
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3.2:1b");
        assert_eq!(models[0].size, 1337);
    }

    #[tokio::test]
    async fn test_pull_streams_progress_records() {
        let base = serve(
            "{\"status\":\"pulling manifest\"}\n{\"status\":\"downloading\",\"total\":100,\"completed\":42}\n{\"status\":\"success\"}\n",
            "application/x-ndjson",
        )
        .await;
        let client = ApiClient::new(base).unwrap();

        let mut statuses = Vec::new();
        client
            .pull_model("llama3.2:1b", |event| statuses.push(event.status.clone()))
            .await
            .unwrap();
        assert_eq!(statuses, ["pulling manifest", "downloading", "success"]);
    }

    #[tokio::test]
    async fn test_pull_surfaces_server_error_record() {
        let base = serve(
            "{\"status\":\"pulling manifest\"}\n{\"error\":\"pull model manifest: file does not exist\"}\n",
            "application/x-ndjson",
        )
        .await;
        let client = ApiClient::new(base).unwrap();
        let err = client.pull_model("nope", |_| {}).await.unwrap_err();
        assert!(matches!(err, ModelboxError::Internal(_)));
        assert!(err.to_string().contains("file does not exist"));
    }

    #[tokio::test]
    async fn test_generate_concatenates_chunks() {
        let base = serve(
            "{\"response\":\"Hel\",\"done\":false}\n{\"response\":\"lo\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n",
            "application/x-ndjson",
        )
        .await;
        let client = ApiClient::new(base).unwrap();

        let mut text = String::new();
        client
            .generate(
                &GenerateRequest {
                    model: "llama3.2:1b".into(),
                    prompt: "say hello".into(),
                    stream: true,
                },
                |chunk| text.push_str(&chunk.response),
            )
            .await
            .unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_error_status_is_distinct() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                .await;
        });

        let client = ApiClient::new(format!("http://{addr}")).unwrap();
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, ModelboxError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_trailing_record_without_newline() {
        let base = serve(
            "{\"status\":\"a\"}\n{\"status\":\"b\"}",
            "application/x-ndjson",
        )
        .await;
        let client = ApiClient::new(base).unwrap();
        let mut statuses = Vec::new();
        client
            .pull_model("m", |event| statuses.push(event.status.clone()))
            .await
            .unwrap();
        assert_eq!(statuses, ["a", "b"]);
    }
}
