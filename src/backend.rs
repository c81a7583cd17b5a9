use crate::capture::RecordedAudio;
use crate::error::{ClientError, Result};
use crate::model::{Conversation, Message, NewConversation, Role, SearchResponse, Summary};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Transcription, translation and synthesis all happen inside the upload.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Public URL of a stored audio file.
pub fn audio_url(api_base: &str, filename: &str) -> String {
    format!(
        "{}/api/audio/{}",
        api_base.trim_end_matches('/'),
        filename.trim_start_matches('/')
    )
}

/// Link that opens `conversation_id` in the web client.
pub fn share_link(api_base: &str, conversation_id: &str) -> String {
    format!("{}?conv={}", api_base.trim_end_matches('/'), conversation_id)
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// REST side of the backend: conversations, history, uploads, summaries and
/// search.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base: String,
}

impl BackendClient {
    pub fn new(api_base: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Config(format!("http client error: {}", e)))?;
        Ok(Self {
            http,
            base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn create_conversation(&self, body: &NewConversation) -> Result<Conversation> {
        let resp = self
            .http
            .post(self.url("/api/conversations/"))
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let resp = self.http.get(self.url("/api/conversations/")).send().await?;
        decode(resp).await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        let resp = self
            .http
            .get(self.url(&format!("/api/conversations/{}", id)))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/conversations/{}", id)))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    pub async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let resp = self
            .http
            .get(self.url(&format!(
                "/api/conversations/{}/messages/",
                conversation_id
            )))
            .send()
            .await?;
        decode(resp).await
    }

    /// Upload a recording; the response is the fully processed message.
    pub async fn upload_audio(
        &self,
        conversation_id: &str,
        recording: &RecordedAudio,
        role: Role,
        source_language: &str,
    ) -> Result<Message> {
        let part = Part::bytes(recording.payload.clone())
            .file_name(RecordedAudio::FILE_NAME)
            .mime_str(RecordedAudio::MIME_TYPE)
            .map_err(|e| ClientError::Encoding(format!("bad mime type: {}", e)))?;
        let form = Form::new()
            .part("audio", part)
            .text("role", role.as_str())
            .text("source_language", source_language.to_string());
        log::info!(
            "[backend] uploading {} bytes ({}s) to {}",
            recording.payload.len(),
            recording.duration_secs,
            conversation_id
        );
        let resp = self
            .http
            .post(self.url(&format!("/api/conversations/{}/audio", conversation_id)))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn generate_summary(&self, conversation_id: &str) -> Result<Summary> {
        let resp = self
            .http
            .post(self.url(&format!(
                "/api/conversations/{}/summary/",
                conversation_id
            )))
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;
        decode(resp).await
    }

    /// Newest first.
    pub async fn list_summaries(&self, conversation_id: &str) -> Result<Vec<Summary>> {
        let resp = self
            .http
            .get(self.url(&format!(
                "/api/conversations/{}/summary/",
                conversation_id
            )))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn search(&self, query: &str, conversation_id: Option<&str>) -> Result<SearchResponse> {
        let mut params = vec![("q", query)];
        if let Some(id) = conversation_id {
            params.push(("conversation_id", id));
        }
        let resp = self
            .http
            .get(self.url("/api/search/"))
            .query(&params)
            .send()
            .await?;
        decode(resp).await
    }
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = error_detail(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    log::warn!("[backend] {} {}", status.as_u16(), detail);
    Err(ClientError::Http {
        status: status.as_u16(),
        detail,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let resp = check(resp).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// FastAPI-style `{"detail": ...}`; validation errors carry a list.
fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server: records the request head and answers with
    /// `status` and a JSON body.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            head
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn urls_are_built_from_the_api_base() {
        assert_eq!(
            audio_url("http://localhost:8000/", "tts_abc.mp3"),
            "http://localhost:8000/api/audio/tts_abc.mp3"
        );
        assert_eq!(
            share_link("https://care.example.org", "c-42"),
            "https://care.example.org?conv=c-42"
        );
    }

    #[test]
    fn error_detail_extraction() {
        assert_eq!(
            error_detail(r#"{"detail":"Conversation not found"}"#).as_deref(),
            Some("Conversation not found")
        );
        assert!(error_detail(r#"{"detail":[{"loc":["q"]}]}"#)
            .unwrap()
            .contains("loc"));
        assert_eq!(error_detail("<html>"), None);
    }

    #[tokio::test]
    async fn fetches_history() {
        let (base, server) = serve_once(
            "200 OK",
            r#"[{"id":"m1","conversation_id":"c1","role":"doctor","message_type":"text",
                "original_text":"Hello","original_language":"en","translated_text":"नमस्ते",
                "target_language":"hi","created_at":"2025-03-01T09:00:00"}]"#,
        )
        .await;
        let client = BackendClient::new(&base).unwrap();
        let messages = client.fetch_messages("c1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].translation(), Some("नमस्ते"));

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/conversations/c1/messages/ HTTP/1.1"));
    }

    #[tokio::test]
    async fn search_encodes_query_and_scope() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"query":"high fever","total_results":0,"results":[]}"#,
        )
        .await;
        let client = BackendClient::new(&base).unwrap();
        let resp = client.search("high fever", Some("c1")).await.unwrap();
        assert_eq!(resp.total_results, 0);

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/search/?q=high+fever&conversation_id=c1 "));
    }

    #[tokio::test]
    async fn http_errors_carry_status_and_detail() {
        let (base, server) =
            serve_once("404 Not Found", r#"{"detail":"Conversation not found"}"#).await;
        let client = BackendClient::new(&base).unwrap();
        let err = client.get_conversation("missing").await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Http {
                status: 404,
                detail: "Conversation not found".into()
            }
        );
        assert!(!err.is_retryable());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = BackendClient::new(&format!("http://{}", addr)).unwrap();
        let err = client.list_conversations().await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)), "{:?}", err);
        assert!(err.is_retryable());
    }
}
