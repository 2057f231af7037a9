//! OpenAI-compatible chat and vision client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Seam between the handlers and the chat/vision provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Text chat completion with a composed system prompt.
    async fn chat(&self, system_prompt: &str, user_message: &str) -> Result<String>;

    /// Describe a still image, guided by `query`.
    async fn describe_image(&self, image: &[u8], mime_type: &str, query: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    api_url: String,
    api_key: String,
    chat_model: String,
    vision_model: String,
    chat_max_tokens: u32,
    vision_max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl OpenAiClient {
    pub fn new(
        api_url: String,
        api_key: String,
        chat_model: String,
        vision_model: String,
        chat_max_tokens: u32,
        vision_max_tokens: u32,
    ) -> Self {
        Self {
            api_url,
            api_key,
            chat_model,
            vision_model,
            chat_max_tokens,
            vision_max_tokens,
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, request: ChatCompletionRequest) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.api_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        // Include the response body on HTTP errors; quota failures are only
        // recognizable from the body text.
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Chat API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from chat model"))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn chat(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.chat_model.clone(),
            messages: vec![
                json!({ "role": "system", "content": system_prompt }),
                json!({ "role": "user", "content": user_message }),
            ],
            temperature: Some(0.8),
            max_tokens: Some(self.chat_max_tokens),
        };
        self.complete(request).await
    }

    async fn describe_image(&self, image: &[u8], mime_type: &str, query: &str) -> Result<String> {
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image);
        let data_url = format!("data:{};base64,{}", mime_type, image_base64);

        let request = ChatCompletionRequest {
            model: self.vision_model.clone(),
            messages: vec![
                json!({
                    "role": "system",
                    "content": crate::persona::IMAGE_ANALYSIS_PROMPT,
                }),
                json!({
                    "role": "user",
                    "content": [
                        { "type": "text", "text": query },
                        { "type": "image_url", "image_url": { "url": data_url } },
                    ],
                }),
            ],
            temperature: Some(0.7),
            max_tokens: Some(self.vision_max_tokens),
        };
        self.complete(request).await
    }
}

/// True for provider failures caused by exhausted billing quota. Those get a
/// clearly-labeled placeholder analysis instead of an error so client flows
/// are not blocked by billing issues.
pub fn is_quota_error(error: &anyhow::Error) -> bool {
    format!("{error:#}").to_lowercase().contains("quota")
}
