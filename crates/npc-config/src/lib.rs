//! Environment-variable configuration surface for the NPC engagement engine.
//!
//! Every field here corresponds to one `NPC_*` / `CONVERSATION_*` /
//! `CONTEXT_*` / `MEMORY_*` / `INACTIVITY_*` environment variable. Defaults
//! match the reference values exactly so a deployment with no environment
//! overrides behaves identically to the specification.

use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    pub max_messages_per_avatar: usize,
    pub max_total_buffer_size: usize,
    pub aggregation_window_ms: i64,
    pub expiry_ms: i64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_messages_per_avatar: 10,
            max_total_buffer_size: 50,
            aggregation_window_ms: 5000,
            expiry_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    pub response_threshold: f64,
    pub response_chance: f64,
    pub trigger_words: Vec<String>,
    pub direct_mention_bonus: f64,
    pub recent_interaction_bonus: f64,
    pub message_count_multiplier: f64,
    pub consecutive_bonus: f64,
    pub max_time_decay: f64,
    pub time_decay_rate: f64,
    pub randomness_range: f64,
    pub cooldown_ms: i64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            response_threshold: 50.0,
            response_chance: 0.8,
            trigger_words: vec!["maid".into(), "cat-maid".into(), "kitty".into()],
            direct_mention_bonus: 100.0,
            recent_interaction_bonus: 30.0,
            message_count_multiplier: 5.0,
            consecutive_bonus: 10.0,
            max_time_decay: 20.0,
            time_decay_rate: 2.0,
            randomness_range: 10.0,
            cooldown_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationConfig {
    pub max_history_messages: usize,
    pub max_context_tokens: usize,
    pub system_prompt_max_percent: u8,
    /// Whether `historyWithMemories`/`historyWithBudget` truncate to the
    /// newest-N turns that fit a token budget. No env var is named for this
    /// in the external interface table; it exists so the Dispatch Adapter's
    /// "if both are off" fallback to `history()` is expressible. Defaults on.
    pub budgeting_enabled: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 50,
            max_context_tokens: 8000,
            system_prompt_max_percent: 80,
            budgeting_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub token_budget: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_budget: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateMachineConfig {
    pub tick_interval_ms: i64,
    pub listening_timeout_ms: i64,
    pub thinking_timeout_ms: i64,
    pub speaking_cooldown_ms: i64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            listening_timeout_ms: 15_000,
            thinking_timeout_ms: 30_000,
            speaking_cooldown_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InactivityConfig {
    pub timeout_ms: i64,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self { timeout_ms: 3_600_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineConfig {
    pub enabled: bool,
    pub buffer: BufferConfig,
    pub decision: DecisionConfig,
    pub conversation: ConversationConfig,
    pub memory: MemoryConfig,
    pub state_machine: StateMachineConfig,
    pub inactivity: InactivityConfig,
}

impl EngineConfig {
    /// Load from the process environment, falling back to spec defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("NPC_ENABLED", false),
            buffer: BufferConfig {
                max_messages_per_avatar: env_parse("NPC_BUFFER_MAX_PER_AVATAR", 10),
                max_total_buffer_size: env_parse("NPC_BUFFER_MAX_TOTAL_SIZE", 50),
                aggregation_window_ms: env_parse("NPC_BUFFER_AGGREGATION_WINDOW_MS", 5000),
                expiry_ms: env_parse("NPC_BUFFER_EXPIRY_MS", 60_000),
            },
            decision: DecisionConfig {
                response_threshold: env_parse("NPC_RESPONSE_THRESHOLD", 50.0),
                response_chance: env_parse("NPC_RESPONSE_CHANCE", 0.8),
                trigger_words: env_word_list("NPC_TRIGGER_WORDS", &["maid", "cat-maid", "kitty"]),
                direct_mention_bonus: env_parse("NPC_SCORE_DIRECT_MENTION", 100.0),
                recent_interaction_bonus: env_parse("NPC_SCORE_RECENT_INTERACTION", 30.0),
                message_count_multiplier: env_parse("NPC_SCORE_MESSAGE_COUNT_MULT", 5.0),
                consecutive_bonus: env_parse("NPC_SCORE_CONSECUTIVE_BONUS", 10.0),
                max_time_decay: env_parse("NPC_SCORE_MAX_TIME_DECAY", 20.0),
                time_decay_rate: env_parse("NPC_SCORE_TIME_DECAY_RATE", 2.0),
                randomness_range: env_parse("NPC_SCORE_RANDOMNESS_RANGE", 10.0),
                cooldown_ms: env_parse("NPC_AVATAR_COOLDOWN_MS", 30_000),
            },
            conversation: ConversationConfig {
                max_history_messages: env_parse("CONVERSATION_MAX_HISTORY_MESSAGES", 50),
                max_context_tokens: env_parse("CONTEXT_MAX_TOKENS", 8000),
                system_prompt_max_percent: env_parse("CONTEXT_SYSTEM_PROMPT_MAX_PERCENT", 80),
                budgeting_enabled: true,
            },
            memory: MemoryConfig {
                enabled: env_bool("MEMORY_ENABLED", true),
                token_budget: env_parse("MEMORY_TOKEN_BUDGET", 500),
            },
            state_machine: StateMachineConfig {
                tick_interval_ms: env_parse("NPC_TICK_INTERVAL_MS", 1000),
                listening_timeout_ms: env_parse("NPC_LISTENING_TIMEOUT_MS", 15_000),
                thinking_timeout_ms: env_parse("NPC_THINKING_TIMEOUT_MS", 30_000),
                speaking_cooldown_ms: env_parse("NPC_SPEAKING_COOLDOWN_MS", 5000),
            },
            inactivity: InactivityConfig {
                timeout_ms: env_parse("INACTIVITY_TIMEOUT_MS", 3_600_000),
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_word_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .split(',')
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect(),
        _ => default.iter().map(|word| word.to_string()).collect(),
    }
}
