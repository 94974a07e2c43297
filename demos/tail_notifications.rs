//! Tail the notification stream of a VectorDocs gateway
//!
//! ```bash
//! VECTORDOCS_TOKEN=... cargo run --example tail_notifications -- "What changed in the Q3 report?"
//! ```
//!
//! Endpoints default to localhost and can be overridden with
//! `VECTORDOCS_API_BASE_URL` / `VECTORDOCS_WS_URL`, or by passing a YAML
//! config path in `VECTORDOCS_CONFIG`.

use anyhow::{Context, Result};
use futures::StreamExt;
use live::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("live=info,tail_notifications=info");

    let config = match std::env::var("VECTORDOCS_CONFIG") {
        Ok(path) => ClientConfig::from_yaml_file(&path)?,
        Err(_) => ClientConfig::default(),
    }
    .apply_env_overrides();

    let token = std::env::var("VECTORDOCS_TOKEN").context("VECTORDOCS_TOKEN must be set")?;
    let user = std::env::var("VECTORDOCS_USER").unwrap_or_else(|_| "demo".to_string());
    let session = AuthSession::authenticated(Credentials::new(user, token));

    let client = LiveClient::builder(config).with_session(session).build()?;
    let _connection = client.acquire();

    let mut events = Box::pin(client.stream(&[]));
    let printer = tokio::spawn(async move {
        while let Some(envelope) = events.next().await {
            match envelope.event {
                LiveEvent::ChatResponse(chunk) if chunk.complete => println!(),
                LiveEvent::ChatResponse(chunk) => {
                    print!("{}", chunk.token.unwrap_or_default());
                }
                LiveEvent::Notification(text) => println!("[notification] {text}"),
                other => println!("[{}] {:?}", other.topic(), other),
            }
        }
    });

    if let Some(query) = std::env::args().nth(1) {
        while client.connection_state() != ConnectionState::Open {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let request_id = client.submit(&query, None).await?;
        tracing::info!(request_id = %request_id, "Query submitted");
    }

    tokio::signal::ctrl_c().await?;
    client.shutdown();
    printer.abort();
    Ok(())
}
