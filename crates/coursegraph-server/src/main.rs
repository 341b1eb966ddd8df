//! Binary entrypoint for the coursegraph HTTP server.
//!
//! Configuration comes from `COURSEGRAPH_*` environment variables; see
//! [`ServerConfig::from_env`]. Setting `COURSEGRAPH_LLM_MODEL` enables the
//! chat provider as generator and tier classifier.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use coursegraph_server::collaborators::Collaborators;
use coursegraph_server::config::ServerConfig;
use coursegraph_server::llm_provider::LlmClient;
use coursegraph_server::router::build_router;
use coursegraph_server::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        tracing::error!("coursegraph server failed: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;

    let mut collaborators = Collaborators::none();
    if let Some(llm) = config.llm.clone() {
        tracing::info!(provider = %llm.provider, model = %llm.model, "generator enabled");
        let client = Arc::new(LlmClient::new(llm));
        collaborators = collaborators
            .with_generator(client.clone())
            .with_classifier(client);
    } else {
        tracing::warn!("COURSEGRAPH_LLM_MODEL not set: regeneration is disabled");
    }

    let flush_interval = config.orchestrator.flush_interval;
    let state = AppState::new(&config.db_path, config.orchestrator, collaborators)?;
    state.start_flush_task(flush_interval);

    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("coursegraph server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let written = state.flush_all().await?;
    tracing::info!(rows = written, "final flush complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
