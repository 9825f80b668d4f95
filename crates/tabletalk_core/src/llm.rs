use crate::error::{Error, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const SYSTEM_INSTRUCTIONS: &str =
    "Follow the instructions in the prompt exactly and return only what they ask for. No extra prose.";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The pipeline's seam to the model: one prompt string in, one text
/// completion out. The production implementation is [`LlmClient`].
pub trait TextGenerator: Send + Sync {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Remote text-generation client. No streaming, no function calling, no
/// retry; each pipeline stage makes exactly one call.
#[derive(Debug, Clone)]
pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: reqwest::Client::new(),
        }
    }

    #[tracing::instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/responses", self.base_url.trim_end_matches('/'));
        let body = request_body(&self.model, prompt);

        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Remote(format!("{status}: {text}")));
        }
        let v: serde_json::Value = resp.json().await?;
        let text = extract_output_text(&v);
        if text.is_empty() {
            return Err(Error::Remote("model returned no text output".into()));
        }
        Ok(text)
    }
}

impl TextGenerator for LlmClient {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.generate(prompt))
    }
}

/// Responses API request shape: a system + user input pair, plain text out.
fn request_body(model: &str, prompt: &str) -> serde_json::Value {
    json!({
        "model": model,
        "input": [
            {"role": "system", "content": SYSTEM_INSTRUCTIONS},
            {"role": "user", "content": prompt}
        ]
    })
}

/// The Responses API returns an `output` array of items; concatenate every
/// `output_text` block. Older proxies return a flat `output_text` field.
fn extract_output_text(v: &serde_json::Value) -> String {
    let mut buf = String::new();
    if let Some(items) = v.get("output").and_then(|x| x.as_array()) {
        for item in items {
            match item.get("type").and_then(|x| x.as_str()) {
                Some("message") => {
                    if let Some(content) = item.get("content").and_then(|x| x.as_array()) {
                        for block in content {
                            if block.get("type").and_then(|x| x.as_str()) == Some("output_text") {
                                if let Some(text) = block.get("text").and_then(|x| x.as_str()) {
                                    buf.push_str(text);
                                }
                            }
                        }
                    }
                }
                Some("output_text") => {
                    if let Some(text) = item.get("text").and_then(|x| x.as_str()) {
                        buf.push_str(text);
                    }
                }
                _ => {}
            }
        }
    } else if let Some(text) = v.get("output_text").and_then(|x| x.as_str()) {
        buf.push_str(text);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_message_blocks() {
        let v = json!({
            "output": [
                {"type": "message", "content": [
                    {"type": "output_text", "text": "hello "},
                    {"type": "output_text", "text": "world"}
                ]}
            ]
        });
        assert_eq!(extract_output_text(&v), "hello world");
    }

    #[test]
    fn extracts_flat_output_text() {
        let v = json!({"output_text": "plain"});
        assert_eq!(extract_output_text(&v), "plain");
    }

    #[test]
    fn missing_output_is_empty() {
        assert_eq!(extract_output_text(&json!({"id": "x"})), "");
    }

    #[test]
    fn request_sends_system_and_user_items() {
        let body = request_body("gpt-4o-mini", "what is the total?");
        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["role"], "system");
        assert_eq!(input[1]["role"], "user");
        assert_eq!(input[1]["content"], "what is the total?");
    }
}
