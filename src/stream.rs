//! Stream Video REST client: call creation, realtime agent attachment, and
//! user token issuance.
//!
//! Server-side requests authenticate with an HS256 JWT signed by the API
//! secret; user tokens are the same construction with a `user_id` claim and
//! are handed straight back to the client.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::sessions::AgentHandle;

const TOKEN_VALIDITY_SECS: i64 = 24 * 60 * 60;

/// Seam between the handlers and the video/call provider.
#[async_trait]
pub trait CallProvider: Send + Sync {
    /// Public API key, echoed back to clients so they can join the call.
    fn api_key(&self) -> &str;

    async fn create_call(&self, call_type: &str, call_id: &str) -> Result<()>;

    /// Binds a realtime AI agent to the call and returns the live handle
    /// used for instruction pushes.
    async fn connect_agent(
        &self,
        call_type: &str,
        call_id: &str,
        agent_user_id: &str,
    ) -> Result<Arc<dyn AgentHandle>>;

    fn create_user_token(&self, user_id: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct StreamVideoClient {
    api_url: String,
    api_key: String,
    api_secret: String,
    openai_api_key: String,
    client: reqwest::Client,
}

impl StreamVideoClient {
    pub fn new(
        api_url: String,
        api_key: String,
        api_secret: String,
        openai_api_key: String,
    ) -> Self {
        Self {
            api_url,
            api_key,
            api_secret,
            openai_api_key,
            client: reqwest::Client::new(),
        }
    }

    fn call_url(&self, call_type: &str, call_id: &str, suffix: &str) -> String {
        format!(
            "{}/api/v2/video/call/{}/{}{}?api_key={}",
            self.api_url.trim_end_matches('/'),
            call_type,
            call_id,
            suffix,
            self.api_key
        )
    }

    fn server_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        sign_jwt(
            &self.api_secret,
            &json!({ "server": true, "iat": now, "exp": now + TOKEN_VALIDITY_SECS }),
        )
    }

    async fn post_authed(&self, url: &str, body: serde_json::Value) -> Result<()> {
        let token = self.server_token()?;
        let response = self
            .client
            .post(url)
            .header("Authorization", token)
            .header("stream-auth-type", "jwt")
            .json(&body)
            .send()
            .await
            .context("Failed to reach video provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Video provider returned error {}: {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl CallProvider for StreamVideoClient {
    fn api_key(&self) -> &str {
        &self.api_key
    }

    async fn create_call(&self, call_type: &str, call_id: &str) -> Result<()> {
        let url = self.call_url(call_type, call_id, "");
        self.post_authed(&url, json!({ "data": {} }))
            .await
            .with_context(|| format!("Failed to create call {call_id}"))
    }

    async fn connect_agent(
        &self,
        call_type: &str,
        call_id: &str,
        agent_user_id: &str,
    ) -> Result<Arc<dyn AgentHandle>> {
        let url = self.call_url(call_type, call_id, "/openai/connect");
        self.post_authed(
            &url,
            json!({
                "agent_user_id": agent_user_id,
                "openai_api_key": self.openai_api_key,
            }),
        )
        .await
        .with_context(|| format!("Failed to connect agent to call {call_id}"))?;

        Ok(Arc::new(StreamAgentHandle {
            provider: self.clone(),
            call_type: call_type.to_string(),
            call_id: call_id.to_string(),
        }))
    }

    fn create_user_token(&self, user_id: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        sign_jwt(
            &self.api_secret,
            &json!({ "user_id": user_id, "iat": now, "exp": now + TOKEN_VALIDITY_SECS }),
        )
    }
}

/// Live agent connection for one call. Instruction pushes replace the
/// agent's entire session instructions.
struct StreamAgentHandle {
    provider: StreamVideoClient,
    call_type: String,
    call_id: String,
}

#[async_trait]
impl AgentHandle for StreamAgentHandle {
    async fn replace_instructions(&self, instructions: &str) -> Result<()> {
        let url = self
            .provider
            .call_url(&self.call_type, &self.call_id, "/openai/session");
        self.provider
            .post_authed(&url, json!({ "instructions": instructions }))
            .await
            .with_context(|| {
                format!("Failed to push instructions for call {}", self.call_id)
            })
    }
}

fn sign_jwt(secret: &str, claims: &serde_json::Value) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    let signing_input = format!("{header}.{payload}");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid signing key: {e}"))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}
