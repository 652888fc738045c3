//! Probe executors for the chat, text-to-speech and speech-to-text endpoints

use crate::errors::{BODY_SNIPPET_CHARS, MonitorError, ProbeError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Prompt and speech input used by every probe
const PROBE_INPUT: &str = "Health check";
const CHAT_MAX_TOKENS: u32 = 5;
const TTS_VOICE: &str = "alloy";
const STT_FILE_NAME: &str = "silent.mp3";

/// A single silent MPEG-1 Layer III frame (128 kbit/s, 44.1 kHz)
const SILENT_MP3_BASE64: &str = concat!(
    "//uQZA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "AAAAAAAAAAAAAAAAAA"
);

/// Kind of endpoint a configured model is probed through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelKind {
    Chat,
    Tts,
    Stt,
    /// Any type string without a probe; reported per task, never at load time
    Unsupported(String),
}

impl From<&str> for ModelKind {
    fn from(s: &str) -> Self {
        match s {
            "chat" => ModelKind::Chat,
            "tts" => ModelKind::Tts,
            "stt" => ModelKind::Stt,
            _ => ModelKind::Unsupported(s.to_string()),
        }
    }
}

impl From<String> for ModelKind {
    fn from(s: String) -> Self {
        ModelKind::from(s.as_str())
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        kind.to_string()
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Chat => write!(f, "chat"),
            ModelKind::Tts => write!(f, "tts"),
            ModelKind::Stt => write!(f, "stt"),
            ModelKind::Unsupported(raw) => write!(f, "{}", raw),
        }
    }
}

/// Endpoint coordinates for one probe attempt
#[derive(Debug, Clone, Copy)]
pub struct ProbeTarget<'a> {
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub model: &'a str,
}

/// One request/response exchange against a model endpoint
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, client: &Client, target: &ProbeTarget<'_>) -> std::result::Result<(), ProbeError>;
}

/// `POST /chat/completions` with a one-message prompt
pub struct ChatProbe;

#[async_trait]
impl Probe for ChatProbe {
    async fn probe(&self, client: &Client, target: &ProbeTarget<'_>) -> std::result::Result<(), ProbeError> {
        let payload = json!({
            "model": target.model,
            "messages": [{"role": "user", "content": PROBE_INPUT}],
            "max_tokens": CHAT_MAX_TOKENS,
        });

        let response = client
            .post(format!("{}/chat/completions", target.base_url))
            .headers(json_headers(target.api_key)?)
            .json(&payload)
            .send()
            .await?;

        let data = read_json(ensure_success(response).await?).await?;

        let choice = data
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| ProbeError::validation("invalid chat response: no choices"))?;

        if !choice.get("message").is_some_and(is_present) {
            return Err(ProbeError::validation("invalid chat response: choice has no message"));
        }

        Ok(())
    }
}

/// `POST /audio/speech`, reading only until the first audio bytes arrive
pub struct TtsProbe;

#[async_trait]
impl Probe for TtsProbe {
    async fn probe(&self, client: &Client, target: &ProbeTarget<'_>) -> std::result::Result<(), ProbeError> {
        let payload = json!({
            "model": target.model,
            "input": PROBE_INPUT,
            "voice": TTS_VOICE,
        });

        let response = client
            .post(format!("{}/audio/speech", target.base_url))
            .headers(json_headers(target.api_key)?)
            .json(&payload)
            .send()
            .await?;

        let mut response = ensure_success(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.contains("audio") {
            return Err(ProbeError::validation(format!(
                "invalid TTS content-type: {}",
                content_type
            )));
        }

        while let Some(chunk) = response.chunk().await? {
            if !chunk.is_empty() {
                return Ok(());
            }
        }

        Err(ProbeError::validation("TTS response body is empty"))
    }
}

/// `POST /audio/transcriptions` with an embedded silent clip
pub struct SttProbe {
    audio: Vec<u8>,
}

impl SttProbe {
    /// Decode the embedded audio fixture
    pub fn new() -> Result<Self> {
        let audio = STANDARD
            .decode(SILENT_MP3_BASE64)
            .map_err(|e| MonitorError::Fixture(format!("silent mp3: {}", e)))?;
        Ok(Self { audio })
    }

    pub fn audio_len(&self) -> usize {
        self.audio.len()
    }
}

#[async_trait]
impl Probe for SttProbe {
    async fn probe(&self, client: &Client, target: &ProbeTarget<'_>) -> std::result::Result<(), ProbeError> {
        let file = Part::bytes(self.audio.clone())
            .file_name(STT_FILE_NAME)
            .mime_str("audio/mpeg")
            .map_err(ProbeError::from)?;

        let form = Form::new()
            .part("file", file)
            .text("model", target.model.to_string());

        // The form supplies its own boundary-bearing content type.
        let response = client
            .post(format!("{}/audio/transcriptions", target.base_url))
            .headers(auth_headers(target.api_key)?)
            .multipart(form)
            .send()
            .await?;

        let data = read_json(ensure_success(response).await?).await?;

        if data.get("text").is_none() {
            return Err(ProbeError::validation("invalid STT response: no text field"));
        }

        Ok(())
    }
}

/// Lookup table from model kind to the probe that checks it
pub struct ProbeRegistry {
    probes: HashMap<ModelKind, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    /// Registry with the chat, tts and stt probes
    pub fn new() -> Result<Self> {
        let mut registry = Self::empty();
        registry.register(ModelKind::Chat, ChatProbe);
        registry.register(ModelKind::Tts, TtsProbe);
        registry.register(ModelKind::Stt, SttProbe::new()?);
        Ok(registry)
    }

    pub fn empty() -> Self {
        Self {
            probes: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ModelKind, probe: impl Probe + 'static) {
        self.probes.insert(kind, Arc::new(probe));
    }

    pub fn get(&self, kind: &ModelKind) -> Option<Arc<dyn Probe>> {
        self.probes.get(kind).cloned()
    }

    /// Run the probe registered for `kind`; unknown kinds fail without any request
    pub async fn run(
        &self,
        client: &Client,
        kind: &ModelKind,
        target: &ProbeTarget<'_>,
    ) -> std::result::Result<(), ProbeError> {
        match self.get(kind) {
            Some(probe) => probe.probe(client, target).await,
            None => Err(ProbeError::Unsupported(kind.to_string())),
        }
    }
}

fn auth_headers(api_key: &str) -> std::result::Result<HeaderMap, ProbeError> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|_| ProbeError::Transport("BuilderError"))?;
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}

fn json_headers(api_key: &str) -> std::result::Result<HeaderMap, ProbeError> {
    let mut headers = auth_headers(api_key)?;
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

async fn ensure_success(response: Response) -> std::result::Result<Response, ProbeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = read_snippet(response).await;
    Err(ProbeError::status(status.as_u16(), &body))
}

/// Read just enough of an error body to fill the status snippet
async fn read_snippet(mut response: Response) -> String {
    let limit = BODY_SNIPPET_CHARS * 4;
    let mut buf = Vec::new();

    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

async fn read_json(response: Response) -> std::result::Result<Value, ProbeError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|_| ProbeError::validation("response body is not valid JSON"))
}

/// Whether a JSON value counts as present: not null, false, zero or empty
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target<'a>(base_url: &'a str, model: &'a str) -> ProbeTarget<'a> {
        ProbeTarget {
            base_url,
            api_key: "sk-test",
            model,
        }
    }

    #[test]
    fn test_model_kind_from_str() {
        assert_eq!(ModelKind::from("chat"), ModelKind::Chat);
        assert_eq!(ModelKind::from("tts"), ModelKind::Tts);
        assert_eq!(ModelKind::from("stt"), ModelKind::Stt);
        assert_eq!(
            ModelKind::from("rerank"),
            ModelKind::Unsupported("rerank".to_string())
        );
        assert_eq!(ModelKind::Unsupported("rerank".to_string()).to_string(), "rerank");
    }

    #[test]
    fn test_model_kind_is_case_sensitive() {
        assert_eq!(ModelKind::from("CHAT"), ModelKind::Unsupported("CHAT".to_string()));
        assert_eq!(ModelKind::from(" stt"), ModelKind::Unsupported(" stt".to_string()));
    }

    #[test]
    fn test_fixture_decodes() {
        let probe = SttProbe::new().unwrap();
        assert_eq!(probe.audio_len(), 417);
        assert_eq!(&probe.audio[..2], &[0xFF, 0xFB]);
    }

    #[test]
    fn test_is_present() {
        assert!(is_present(&json!({"content": "hi"})));
        assert!(!is_present(&json!({})));
        assert!(!is_present(&json!(null)));
        assert!(!is_present(&json!("")));
    }

    #[tokio::test]
    async fn test_chat_probe_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({"model": "m1", "max_tokens": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hi"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let result = ChatProbe.probe(&Client::new(), &target(&uri, "m1")).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_chat_probe_missing_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = ChatProbe
            .probe(&Client::new(), &target(&uri, "m1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_chat_probe_empty_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {}}]
            })))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = ChatProbe
            .probe(&Client::new(), &target(&uri, "m1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Validation(msg) if msg.contains("no message")));
    }

    #[tokio::test]
    async fn test_chat_probe_server_error() {
        let server = MockServer::start().await;
        let body = "internal failure ".repeat(20);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string(body))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = ChatProbe
            .probe(&Client::new(), &target(&uri, "m1"))
            .await
            .unwrap_err();

        match err {
            ProbeError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), 100);
                assert!(body.starts_with("internal failure"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_large_error_page_keeps_only_snippet() {
        let server = MockServer::start().await;
        let page = format!("<html>{}</html>", "é".repeat(500_000));
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string(page))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = ChatProbe
            .probe(&Client::new(), &target(&uri, "m1"))
            .await
            .unwrap_err();

        match err {
            ProbeError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body.chars().count(), BODY_SNIPPET_CHARS);
                assert!(body.starts_with("<html>é"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_probe_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = ChatProbe
            .probe(&Client::new(), &target(&uri, "m1"))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::validation("response body is not valid JSON"));
    }

    #[tokio::test]
    async fn test_chat_probe_connection_refused() {
        let err = ChatProbe
            .probe(&Client::new(), &target("http://127.0.0.1:1", "m1"))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Transport("ConnectionError"));
    }

    #[tokio::test]
    async fn test_tts_probe_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(body_partial_json(json!({"model": "tts-1", "voice": "alloy"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0xFF, 0xFB, 0x90], "audio/mpeg"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let result = TtsProbe.probe(&Client::new(), &target(&uri, "tts-1")).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_tts_probe_wrong_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "no audio"})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = TtsProbe
            .probe(&Client::new(), &target(&uri, "tts-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Validation(msg) if msg.contains("content-type")));
    }

    #[tokio::test]
    async fn test_tts_probe_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(Vec::new(), "audio/mpeg"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let err = TtsProbe
            .probe(&Client::new(), &target(&uri, "tts-1"))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::validation("TTS response body is empty"));
    }

    #[tokio::test]
    async fn test_stt_probe_sends_multipart_without_json_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": ""})))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let probe = SttProbe::new().unwrap();
        let result = probe.probe(&Client::new(), &target(&uri, "whisper-1")).await;
        assert_eq!(result, Ok(()));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);

        let content_type = requests[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        assert!(!content_type.contains("application/json"));

        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"model\""));
        assert!(body.contains("whisper-1"));
        assert!(body.contains("filename=\"silent.mp3\""));
    }

    #[tokio::test]
    async fn test_stt_probe_missing_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"segments": []})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let probe = SttProbe::new().unwrap();
        let err = probe
            .probe(&Client::new(), &target(&uri, "whisper-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unsupported_kind_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let registry = ProbeRegistry::new().unwrap();
        let uri = server.uri();
        let kind = ModelKind::from("embedding");
        let err = registry
            .run(&Client::new(), &kind, &target(&uri, "e5"))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Unsupported("embedding".to_string()));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProbeRegistry::new().unwrap();
        assert!(registry.get(&ModelKind::Chat).is_some());
        assert!(registry.get(&ModelKind::Tts).is_some());
        assert!(registry.get(&ModelKind::Stt).is_some());
        assert!(registry.get(&ModelKind::from("image")).is_none());
        assert!(ProbeRegistry::empty().get(&ModelKind::Chat).is_none());
    }
}
