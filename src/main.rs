mod classifier;
mod config;
mod context;
mod openai;
mod persona;
mod server;
mod sessions;
mod stream;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use config::{AppConfig, Credentials};
use context::VisualContextStore;
use openai::OpenAiClient;
use server::AppState;
use sessions::SessionRegistry;
use stream::StreamVideoClient;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lexi_backend=debug")),
        )
        .init();

    let config = AppConfig::load();

    // Required credentials are checked before the listener binds; a missing
    // key is a fatal startup condition.
    let credentials = Credentials::from_env().context("missing provider credentials")?;

    let calls = StreamVideoClient::new(
        config.video_api_url.clone(),
        credentials.stream_api_key.clone(),
        credentials.stream_api_secret.clone(),
        credentials.openai_api_key.clone(),
    );
    let chat_model = OpenAiClient::new(
        config.openai_api_url.clone(),
        credentials.openai_api_key,
        config.chat_model.clone(),
        config.vision_model.clone(),
        config.chat_max_tokens,
        config.vision_max_tokens,
    );

    let state = AppState {
        config: Arc::new(config),
        registry: Arc::new(SessionRegistry::new()),
        contexts: Arc::new(VisualContextStore::new()),
        calls: Arc::new(calls),
        chat_model: Arc::new(chat_model),
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    runtime.block_on(server::serve(state))
}
