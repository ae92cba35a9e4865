use std::io::{BufRead, BufReader};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// header the Gemini REST API reads the key from
const API_KEY_HEADER: &str = "x-goog-api-key";

// A lazy, finite and non-restartable sequence of streamed response chunks.
pub type ChunkStream = Box<dyn Iterator<Item = Result<GenerateContentResponse>> + Send>;

// The two outbound calls the chat needs. Handlers only see this trait, so the
// real HTTP client can be swapped for a scripted one.
pub trait GenerativeService: Send {
    // sends a single prompt and returns the concatenated text of the reply,
    // which may be empty.
    fn generate_text(&self, model: &str, prompt: &str) -> Result<String>;

    // starts a streaming generation that asks for both text and image output.
    fn generate_image_stream(&self, model: &str, prompt: &str) -> Result<ChunkStream>;
}

// ---------------------------------------------------------------------------
// wire types

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}
impl GenerateContentRequest {
    // a request with one user turn holding a single text part
    pub fn from_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_owned()),
                parts: vec![Part {
                    text: Some(prompt.to_owned()),
                    inline_data: None,
                }],
            }],
            generation_config: None,
        }
    }

    pub fn with_response_modalities(mut self, modalities: &[&str]) -> Self {
        self.generation_config = Some(GenerationConfig {
            response_modalities: modalities.iter().map(|m| m.to_string()).collect(),
        });
        self
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "inline_data")]
    pub inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: String,
    // base64 encoded payload
    #[serde(default)]
    pub data: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}
impl GenerateContentResponse {
    // all text parts of the first candidate joined together
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<&str>>()
                    .concat()
            })
            .unwrap_or_default()
    }

    // the first part, across every candidate, that actually carries inline data
    pub fn first_inline_data(&self) -> Option<&InlineData> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|p| p.inline_data.as_ref())
            .find(|inline| !inline.data.is_empty())
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// server-sent events

// Reads `data:` events from a Server-Sent Events body and decodes each one as a
// response chunk. Multi-line events are joined, comments and other fields are
// ignored, and a `[DONE]` payload ends the stream.
pub struct SseChunkStream<R: BufRead> {
    reader: R,
    finished: bool,
}
impl<R: BufRead> SseChunkStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    // collects the data lines of the next event. returns None at end of input.
    fn next_event_data(&mut self) -> Result<Option<String>> {
        let mut data_lines: Vec<String> = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .context("Reading the next line of the image stream")?;
            if read == 0 {
                // a final event without a trailing blank line still counts
                return Ok(if data_lines.is_empty() {
                    None
                } else {
                    Some(data_lines.join("\n"))
                });
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                if data_lines.is_empty() {
                    continue;
                }
                return Ok(Some(data_lines.join("\n")));
            }
            if let Some(data) = trimmed.strip_prefix("data:") {
                data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_owned());
            }
        }
    }
}
impl<R: BufRead> Iterator for SseChunkStream<R> {
    type Item = Result<GenerateContentResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let data = match self.next_event_data() {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.finished = true;
                return None;
            }
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };

        if data.trim() == "[DONE]" {
            self.finished = true;
            return None;
        }

        let chunk = serde_json::from_str::<GenerateContentResponse>(&data)
            .context("Decoding a streamed Gemini response chunk");
        if chunk.is_err() {
            self.finished = true;
        }
        Some(chunk)
    }
}

// ---------------------------------------------------------------------------
// http client

// Blocking client for the Gemini REST API.
pub struct GeminiClient {
    http: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
}
impl GeminiClient {
    pub fn new(api_key: &str, api_base: &str, timeout_s: u64) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_s))
            .build()
            .context("Failed to create the blocking reqwest client for the Gemini API.")?;

        Ok(Self {
            http,
            api_base: api_base.trim().trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        })
    }

    // builds `{api_base}/models/{model}:{method}`, accepting models given with
    // or without the `models/` prefix.
    pub fn endpoint_for_model(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_owned()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn post_json(
        &self,
        url: &str,
        request: &GenerateContentRequest,
    ) -> Result<reqwest::blocking::Response> {
        let body = serde_json::to_string(request)
            .context("Failed to serialize the Gemini generation request.")?;
        let resp = self
            .http
            .post(url)
            .body(body)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .context("Gemini API call failed")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().unwrap_or_default();
            return Err(anyhow!(
                "Gemini API returned status {}: {}",
                status,
                detail.trim()
            ));
        }
        Ok(resp)
    }
}
impl GenerativeService for GeminiClient {
    fn generate_text(&self, model: &str, prompt: &str) -> Result<String> {
        let url = self.endpoint_for_model(model, "generateContent");
        let request = GenerateContentRequest::from_prompt(prompt);
        log::debug!("Sending a {} character prompt to {}", prompt.len(), model);

        let resp_text = self
            .post_json(&url, &request)?
            .text()
            .context("Failed to read the body of the text generation response.")?;
        let resp: GenerateContentResponse = serde_json::from_str(&resp_text)
            .context("Failed to deserialize the text generation response.")?;

        let text = resp.text();
        if text.is_empty() {
            let reason = resp
                .candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref())
                .unwrap_or("no candidates");
            log::warn!("The text model sent no text (finish reason: {})", reason);
        }
        Ok(text)
    }

    fn generate_image_stream(&self, model: &str, prompt: &str) -> Result<ChunkStream> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint_for_model(model, "streamGenerateContent")
        );
        let request =
            GenerateContentRequest::from_prompt(prompt).with_response_modalities(&["TEXT", "IMAGE"]);
        log::debug!("Starting an image stream from {} for: {}", model, prompt);

        let resp = self.post_json(&url, &request)?;
        Ok(Box::new(SseChunkStream::new(BufReader::new(resp))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    // Answers a single HTTP request with `status` and `body`, handing back the
    // request it received.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/v1beta", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                request.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut payload = vec![0; content_length];
            reader.read_exact(&mut payload).unwrap();
            request.push_str(&String::from_utf8_lossy(&payload));

            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            request
        });
        (base, handle)
    }

    #[test]
    fn error_status_becomes_an_error_with_the_body() {
        let (base, server) = serve_once(
            "500 Internal Server Error",
            r#"{"error":{"message":"backend exploded"}}"#,
        );
        let client = GeminiClient::new("secret-key", &base, 5).unwrap();

        let err = client.generate_text("m", "hello").unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("500"), "{}", message);
        assert!(message.contains("backend exploded"), "{}", message);

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /v1beta/models/m:generateContent HTTP/1.1\r\n"));
        assert!(request.to_lowercase().contains("x-goog-api-key: secret-key"));
        assert!(request.contains(r#""text":"hello""#));
    }

    #[test]
    fn image_stream_refuses_error_status() {
        let (base, server) = serve_once("403 Forbidden", r#"{"error":"no access"}"#);
        let client = GeminiClient::new("k", &base, 5).unwrap();

        let err = client.generate_image_stream("models/img", "a cat").err().unwrap();
        assert!(format!("{:#}", err).contains("403"));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /v1beta/models/img:streamGenerateContent?alt=sse "));
    }

    #[test]
    fn successful_text_call_joins_the_parts() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"hel"},{"text":"lo"}]}}]}"#,
        );
        let client = GeminiClient::new("k", &base, 5).unwrap();
        assert_eq!(client.generate_text("m", "hi").unwrap(), "hello");
        server.join().unwrap();
    }

    #[test]
    fn request_serializes_in_camel_case() {
        let request = GenerateContentRequest::from_prompt("a cat")
            .with_response_modalities(&["TEXT", "IMAGE"]);
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "a cat");
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );

        let plain = serde_json::to_value(&GenerateContentRequest::from_prompt("hi")).unwrap();
        assert!(plain.get("generationConfig").is_none());
        assert!(plain["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn response_text_joins_parts() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{\"reply\":"},{"text":"\"hi\"}"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.text(), "{\"reply\":\"hi\"}");
        assert_eq!(GenerateContentResponse::default().text(), "");
    }

    #[test]
    fn inline_data_accepts_both_spellings() {
        let camel: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"here"},{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(camel.first_inline_data().map(|d| d.data.as_str()), Some("QUJD"));

        let snake: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"inline_data":{"mime_type":"image/png","data":"REVG"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(snake.first_inline_data().map(|d| d.mime_type.as_str()), Some("image/png"));
    }

    #[test]
    fn empty_inline_data_is_skipped() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":""}}]}},{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"WFla"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.first_inline_data().map(|d| d.data.as_str()), Some("WFla"));
    }

    #[test]
    fn sse_stream_yields_each_event() {
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"one\"}]}}]}\r\n\r\n\
                    : keep-alive comment\n\
                    data: {\"candidates\":\n\
                    data: [{\"content\":{\"parts\":[{\"text\":\"two\"}]}}]}\n\n\
                    data: {\"candidates\":[]}";
        let chunks: Vec<GenerateContentResponse> = SseChunkStream::new(Cursor::new(body))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text(), "one");
        assert_eq!(chunks[1].text(), "two");
        assert!(chunks[2].candidates.is_empty());
    }

    #[test]
    fn sse_stream_stops_at_done_and_on_bad_json() {
        let body = "data: {\"candidates\":[]}\n\ndata: [DONE]\n\ndata: {\"candidates\":[]}\n\n";
        assert_eq!(SseChunkStream::new(Cursor::new(body)).count(), 1);

        let body = "data: not json\n\ndata: {\"candidates\":[]}\n\n";
        let mut stream = SseChunkStream::new(Cursor::new(body));
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }

    #[test]
    fn endpoints_accept_prefixed_models() {
        let client = GeminiClient::new("key", "https://example.com/v1beta/", 5).unwrap();
        assert_eq!(
            client.endpoint_for_model("gemini-2.5-flash-lite", "generateContent"),
            "https://example.com/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
        assert_eq!(
            client.endpoint_for_model("models/foo", "streamGenerateContent"),
            "https://example.com/v1beta/models/foo:streamGenerateContent"
        );
    }
}
