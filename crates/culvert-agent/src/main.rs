//! # culvert-agent
//!
//! Culvert control-plane server binary — wires together all crates and
//! starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use culvert_blob::{BlobStore, UrlSigner};
use culvert_control::ControlLock;
use culvert_enrich::{Pipeline, SessionMemory};
use culvert_llm::{CompletionClient, OpenAiClient};
use culvert_server::config::ServerConfig;
use culvert_server::server::CulvertServer;
use culvert_server::websocket::{ConnectionRegistry, Router};
use culvert_settings::CulvertSettings;
use culvert_storage::{IngestService, MemoryStore};

/// Culvert control-plane server.
#[derive(Parser, Debug)]
#[command(name = "culvert-agent", about = "Culvert control-plane server")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings if specified, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Connection id that receives forwarded capture requests.
    #[arg(long)]
    forward_target: Option<String>,
}

/// Build the full service graph from settings.
fn build_server(settings: &CulvertSettings, config: ServerConfig) -> CulvertServer {
    let signer = UrlSigner::new(settings.storage.signing_key.as_bytes().to_vec())
        .with_host(settings.storage.signing_host.clone());
    let blob: Arc<dyn BlobStore> = Arc::new(signer);

    let llm: Arc<dyn CompletionClient> = Arc::new(
        OpenAiClient::from_env().with_model(settings.enrichment.model.clone()),
    );

    let memory = Arc::new(SessionMemory::new(settings.enrichment.memory_capacity));
    let ingest = Arc::new(IngestService::new(
        Arc::new(MemoryStore::new()),
        blob.clone(),
        settings.storage.bucket.clone(),
    ));
    let pipeline = Arc::new(Pipeline::spawn(
        settings.enrichment.workers,
        settings.enrichment.queue_capacity,
        memory.clone(),
        llm,
        ingest.clone(),
        blob,
    ));

    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(Router::new(
        registry.clone(),
        Arc::new(ControlLock::new()),
        pipeline,
        ingest,
        config.forward_target.clone(),
    ));

    CulvertServer::new(config, registry, router, memory)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = culvert_settings::load_settings().unwrap_or_default();

    let config = ServerConfig {
        host: args.host.unwrap_or_else(|| settings.server.host.clone()),
        port: args.port.unwrap_or(settings.server.port),
        heartbeat_interval_secs: (settings.server.heartbeat_interval_ms / 1000).max(1),
        idle_timeout_secs: (settings.server.idle_timeout_ms / 1000).max(1),
        forward_target: args
            .forward_target
            .unwrap_or_else(|| settings.server.forward_target.clone()),
        ..ServerConfig::default()
    };

    if settings.storage.bucket.is_empty() {
        tracing::warn!("no storage bucket configured — photo uploads will be rejected");
    }

    let server = build_server(&settings, config);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("culvert agent listening on http://{addr}");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .drain(vec![handle], culvert_server::shutdown::DRAIN_TIMEOUT)
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_defaults_to_settings() {
        let cli = Cli::parse_from(["culvert-agent"]);
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
        assert_eq!(cli.forward_target, None);
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["culvert-agent", "--port", "9000"]);
        assert_eq!(cli.port, Some(9000));
    }

    #[test]
    fn cli_custom_host() {
        let cli = Cli::parse_from(["culvert-agent", "--host", "127.0.0.1"]);
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn cli_custom_forward_target() {
        let cli = Cli::parse_from(["culvert-agent", "--forward-target", "rc_unit_2"]);
        assert_eq!(cli.forward_target.as_deref(), Some("rc_unit_2"));
    }

    #[tokio::test]
    async fn server_boots_and_responds() {
        let settings = CulvertSettings::default();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };

        let server = build_server(&settings, config);
        let (addr, handle) = server.listen().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        server.shutdown().shutdown();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn server_graceful_shutdown() {
        let server = build_server(
            &CulvertSettings::default(),
            ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                ..ServerConfig::default()
            },
        );
        let (_, handle) = server.listen().await.unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            server
                .shutdown()
                .drain(vec![handle], culvert_server::shutdown::DRAIN_TIMEOUT),
        )
        .await
        .expect("shutdown timed out");
    }
}
