pub mod api;

use anyhow::{Context, Result};

use crate::chat::ChatService;
use crate::config::Config;

pub use api::{router, serve, AppState, PRINCIPAL_HEADER};

/// Open the configured store and serve it until the process exits.
pub async fn start(config: &Config) -> Result<()> {
    let chat = ChatService::open(config)?;
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    serve(listener, chat).await
}
