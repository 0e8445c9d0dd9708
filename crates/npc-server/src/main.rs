//! Runnable binary: loads configuration, persona, and seed memories, wires
//! up the engine, and serves the HTTP framing. Mirrors `aigent-app`'s
//! `tracing_subscriber::fmt().with_env_filter(...).init()` startup, adapted
//! from a TUI entry point to an HTTP one.

mod config;
mod error;
mod persona;
mod rate_limit;
mod routes;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use npc_engine::{Engine, EngineConfig as EngineRuntimeConfig};
use npc_llm::OllamaProvider;
use npc_log::JsonlConversationLog;

use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let engine_config = npc_config::EngineConfig::from_env();
    let server_config = ServerConfig::from_env();

    let persona_system_prompt = persona::load_persona(&server_config.persona_file)?;
    tracing::info!(path = %server_config.persona_file.display(), "loaded persona");

    let llm = Arc::new(OllamaProvider::new(server_config.ollama_model.clone()));
    let log = JsonlConversationLog::spawn(server_config.conversation_log_path.clone());

    let now = chrono::Utc::now().timestamp_millis();
    let engine = Arc::new(Engine::new(
        EngineRuntimeConfig::from(&engine_config),
        persona_system_prompt,
        llm,
        log,
        now,
    ));

    if let Some(facts_path) = &server_config.memory_facts_file {
        let facts = persona::load_memory_facts(facts_path)?;
        for fact in facts {
            engine.seed_memory(fact.keywords, fact.content, fact.priority).await;
        }
        tracing::info!(path = %facts_path.display(), "seeded persona memory facts");
    }

    engine.spawn_ticker();

    let state = Arc::new(AppState {
        engine,
        rate_limiter: RateLimiter::new(server_config.rate_limit_per_minute),
        started_at: Instant::now(),
        persona_name: server_config.persona_file.display().to_string(),
    });

    let app = routes::build_router(state);
    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "npc-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("npc-server shutting down");
}
