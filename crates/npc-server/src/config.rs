//! Startup-only configuration for the HTTP framing and its collaborators
//! (persona file, conversation log path, rate limiter). Kept separate from
//! `npc_config::EngineConfig`, which configures the engine itself and is
//! loaded independently.

use std::env;
use std::path::PathBuf;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub persona_file: PathBuf,
    pub memory_facts_file: Option<PathBuf>,
    pub conversation_log_path: PathBuf,
    pub ollama_model: String,
    pub rate_limit_per_minute: u32,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let memory_facts_file = env::var("NPC_MEMORY_FACTS_PATH").ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        Self {
            host: env_string("NPC_HTTP_HOST", "127.0.0.1"),
            port: env_parse("NPC_HTTP_PORT", 8088),
            persona_file: PathBuf::from(env_string("NPC_PERSONA_FILE", "persona.txt")),
            memory_facts_file,
            conversation_log_path: PathBuf::from(env_string("NPC_CONVERSATION_LOG_PATH", "conversations.jsonl")),
            ollama_model: env_string("OLLAMA_MODEL", "llama3"),
            rate_limit_per_minute: env_parse("NPC_RATE_LIMIT_PER_MINUTE", 60),
        }
    }
}
