//! Holds the ordered dialogue history and assembles the final prompt
//! (system + memories + history) under a token budget.

use npc_config::ConversationConfig;
use npc_memory::MemoryStore;

/// `ceil(len(text)/4)`, the core's fixed token estimate, duplicated here
/// (rather than depending on `npc-memory` for it) since both crates apply
/// the same formula to their own turn/entry content independently.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f64 / 4.0).ceil() as usize
}

const TURN_FRAMING_OVERHEAD_TOKENS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    fn token_cost(&self) -> usize {
        estimate_tokens(&self.content) + TURN_FRAMING_OVERHEAD_TOKENS
    }
}

/// Fire-and-forget conversation log sink. Implementations (see `npc-log`)
/// must never block the caller on I/O and must serialize concurrent callers
/// internally.
pub trait ConversationLog: Send + Sync {
    fn save(&self, turns: Vec<Turn>, reason: &str);
}

/// A `ConversationLog` that discards everything; used where no durable log
/// is wired up (tests, or a deployment that opts out of log persistence).
#[derive(Debug, Default)]
pub struct NullLog;

impl ConversationLog for NullLog {
    fn save(&self, _turns: Vec<Turn>, _reason: &str) {}
}

pub struct ConversationManager<L: ConversationLog> {
    config: ConversationConfig,
    log: L,
    turns: Vec<Turn>,
    inactivity_timeout_ms: i64,
    inactivity_deadline: Option<i64>,
}

impl<L: ConversationLog> ConversationManager<L> {
    pub fn new(persona_system_prompt: impl Into<String>, config: ConversationConfig, inactivity_timeout_ms: i64, log: L) -> Self {
        Self {
            config,
            log,
            turns: vec![Turn::system(persona_system_prompt)],
            inactivity_timeout_ms,
            inactivity_deadline: None,
        }
    }

    pub fn append_user(&mut self, text: impl Into<String>, now: i64) {
        self.turns.push(Turn::user(text));
        self.trim();
        self.inactivity_deadline = Some(now + self.inactivity_timeout_ms);
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::assistant(text));
        self.trim();
    }

    /// Pops the most recent non-system turn, used to roll back on LLM
    /// failure. A no-op if only the system turn remains.
    pub fn remove_last(&mut self) -> Option<Turn> {
        if self.turns.len() > 1 {
            self.turns.pop()
        } else {
            None
        }
    }

    pub fn history(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// `[system, …newest-N user/assistant turns that fit within
    /// maxContextTokens − systemTokens]`, walking from newest to oldest.
    pub fn history_with_budget(&self) -> Vec<Turn> {
        let system = self.turns[0].clone();
        let budget = self.config.max_context_tokens.saturating_sub(system.token_cost());
        let tail = self.select_newest_fitting(&self.turns[1..], budget);

        let mut result = Vec::with_capacity(1 + tail.len());
        result.push(system);
        result.extend(tail);
        result
    }

    /// Fetches relevant memories for the last 5 user/assistant turns,
    /// renders each as a `[Memory] …` system turn, then returns
    /// `[system, …memory turns, …newest-N turns that fit the remaining
    /// budget]`. If budgeting is disabled, the newest-N truncation is
    /// skipped but memory injection is still applied.
    pub fn history_with_memories(&self, memory: &mut MemoryStore, memory_budget: usize, now: i64) -> Vec<Turn> {
        let recent_texts: Vec<String> = self
            .turns
            .iter()
            .rev()
            .filter(|t| t.role != Role::System)
            .take(5)
            .map(|t| t.content.clone())
            .collect();

        let memory_turns: Vec<Turn> = memory
            .relevant(&recent_texts, memory_budget, now)
            .into_iter()
            .map(|entry| Turn::system(format!("[Memory] {}", entry.content)))
            .collect();

        let system = self.turns[0].clone();
        let mut result = Vec::with_capacity(1 + memory_turns.len() + self.turns.len());
        result.push(system.clone());
        result.extend(memory_turns.iter().cloned());

        if !self.config.budgeting_enabled {
            result.extend(self.turns[1..].iter().cloned());
            return result;
        }

        let used: usize = system.token_cost() + memory_turns.iter().map(Turn::token_cost).sum::<usize>();
        let budget = self.config.max_context_tokens.saturating_sub(used);
        result.extend(self.select_newest_fitting(&self.turns[1..], budget));
        result
    }

    /// If history has more than the system turn, hands the full history to
    /// the log collaborator (fire-and-forget), then reconstructs history as
    /// `[system]` and clears the inactivity timer.
    pub fn save_and_reset(&mut self, reason: &str) {
        if self.turns.len() > 1 {
            tracing::debug!(reason, turns = self.turns.len(), "saving and resetting conversation history");
            self.log.save(self.turns.clone(), reason);
        }
        let system = self.turns[0].clone();
        self.turns = vec![system];
        self.inactivity_deadline = None;
    }

    /// Invoked by the owning tick loop; fires `saveAndReset("inactivity")`
    /// once `now` passes the armed deadline.
    pub fn tick_inactivity(&mut self, now: i64) {
        if let Some(deadline) = self.inactivity_deadline {
            if now >= deadline {
                tracing::debug!(now, deadline, "inactivity timeout elapsed");
                self.save_and_reset("inactivity");
            }
        }
    }

    fn trim(&mut self) {
        let cap = self.config.max_history_messages + 1;
        if self.turns.len() > cap {
            let keep_from = self.turns.len() - self.config.max_history_messages;
            let system = self.turns[0].clone();
            let mut trimmed = Vec::with_capacity(cap);
            trimmed.push(system);
            trimmed.extend_from_slice(&self.turns[keep_from..]);
            self.turns = trimmed;
        }
    }

    fn select_newest_fitting(&self, candidates: &[Turn], budget: usize) -> Vec<Turn> {
        let mut selected = Vec::new();
        let mut spent = 0usize;
        for turn in candidates.iter().rev() {
            let cost = turn.token_cost();
            if spent + cost > budget {
                break;
            }
            spent += cost;
            selected.push(turn.clone());
        }
        selected.reverse();
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConversationConfig {
        ConversationConfig {
            max_history_messages: 4,
            max_context_tokens: 1000,
            system_prompt_max_percent: 80,
            budgeting_enabled: true,
        }
    }

    #[test]
    fn history_always_has_system_turn_first() {
        let manager = ConversationManager::new("persona", config(), 60_000, NullLog);
        let history = manager.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
    }

    #[test]
    fn trimming_keeps_system_plus_max_history_messages() {
        let mut manager = ConversationManager::new("persona", config(), 60_000, NullLog);
        for i in 0..10 {
            manager.append_user(format!("msg{i}"), i as i64);
        }
        let history = manager.history();
        assert_eq!(history.len(), config().max_history_messages + 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history.last().unwrap().content, "msg9");
    }

    #[test]
    fn remove_last_rolls_back_one_non_system_turn() {
        let mut manager = ConversationManager::new("persona", config(), 60_000, NullLog);
        manager.append_user("hi", 0);
        let before = manager.history().len();
        manager.remove_last();
        assert_eq!(manager.history().len(), before - 1);
        assert!(manager.remove_last().is_none());
    }

    #[test]
    fn save_and_reset_restores_system_only_history() {
        let mut manager = ConversationManager::new("persona", config(), 60_000, NullLog);
        manager.append_user("hi", 0);
        manager.append_assistant("hello");
        manager.save_and_reset("inactivity");
        let history = manager.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
    }

    #[test]
    fn history_with_budget_walks_newest_to_oldest() {
        let mut manager = ConversationManager::new(
            "p",
            ConversationConfig {
                max_history_messages: 50,
                max_context_tokens: 30,
                system_prompt_max_percent: 80,
                budgeting_enabled: true,
            },
            60_000,
            NullLog,
        );
        for i in 0..5 {
            manager.append_user(format!("message number {i}"), i as i64);
        }
        let budgeted = manager.history_with_budget();
        assert_eq!(budgeted[0].role, Role::System);
        assert!(budgeted.len() < manager.history().len());
        assert_eq!(budgeted.last().unwrap().content, "message number 4");
    }

    #[test]
    fn memory_injection_bounded_by_budget() {
        let mut manager = ConversationManager::new("persona", config(), 60_000, NullLog);
        manager.append_user("tell me about the castle and the garden and the tower", 0);

        let mut store = MemoryStore::new();
        store.add(vec!["castle".into()], "x".repeat(400), 3);
        store.add(vec!["garden".into()], "x".repeat(400), 2);
        store.add(vec!["tower".into()], "x".repeat(400), 1);

        let result = manager.history_with_memories(&mut store, 250, 0);
        let memory_turns: Vec<&Turn> = result.iter().filter(|t| t.content.starts_with("[Memory]")).collect();
        assert_eq!(memory_turns.len(), 2);
    }

    #[test]
    fn budgeting_disabled_skips_truncation_but_keeps_memory_injection() {
        let cfg = ConversationConfig {
            max_history_messages: 50,
            max_context_tokens: 10,
            system_prompt_max_percent: 80,
            budgeting_enabled: false,
        };
        let mut manager = ConversationManager::new("persona", cfg, 60_000, NullLog);
        for i in 0..5 {
            manager.append_user(format!("msg {i}"), i as i64);
        }
        let mut store = MemoryStore::new();
        store.add(vec!["msg".into()], "a memory", 1);

        let result = manager.history_with_memories(&mut store, 1000, 0);
        // system + 1 memory + 5 user turns, none dropped despite tiny budget.
        assert_eq!(result.len(), 1 + 1 + 5);
    }
}
