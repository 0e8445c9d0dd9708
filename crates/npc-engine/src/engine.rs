//! Ties the buffer, decision layer, memory store, and conversation manager
//! together behind one coarse lock, and drives the state machine's tick loop
//! and rendezvous. Cyclic references are avoided on purpose: the engine holds
//! the buffer and decision layer one-way; neither calls back into it.

use std::sync::Arc;

use npc_buffer::{MessageBuffer, Utterance};
use npc_config::{BufferConfig, ConversationConfig, DecisionConfig};
use npc_conversation::{ConversationLog, ConversationManager, Role, Turn};
use npc_decision::{Decision, DecisionLayer, FixedSource, RandomSource, ThreadRandomSource};
use npc_llm::{ChatMessage, ChatProvider};
use npc_memory::MemoryStore;
use tokio::sync::Mutex;

use crate::rendezvous::{Rendezvous, WaitOutcome};
use crate::state::{EngineState, StateContext};

struct Inner<L: ConversationLog> {
    buffer: MessageBuffer,
    decision: DecisionLayer,
    memory: MemoryStore,
    conversation: ConversationManager<L>,
    state: StateContext,
    rendezvous: Rendezvous,
    random: Box<dyn RandomSource + Send>,
}

/// The subset of [`npc_config::EngineConfig`] the engine consults directly,
/// plus the sub-configs handed down to its collaborators at construction.
pub struct EngineConfig {
    pub buffer: BufferConfig,
    pub decision: DecisionConfig,
    pub conversation: ConversationConfig,
    pub memory_enabled: bool,
    pub memory_token_budget: usize,
    pub tick_interval_ms: i64,
    pub listening_timeout_ms: i64,
    pub thinking_timeout_ms: i64,
    pub speaking_cooldown_ms: i64,
    pub inactivity_timeout_ms: i64,
}

impl From<&npc_config::EngineConfig> for EngineConfig {
    fn from(config: &npc_config::EngineConfig) -> Self {
        Self {
            buffer: config.buffer.clone(),
            decision: config.decision.clone(),
            conversation: config.conversation.clone(),
            memory_enabled: config.memory.enabled,
            memory_token_budget: config.memory.token_budget,
            tick_interval_ms: config.state_machine.tick_interval_ms,
            listening_timeout_ms: config.state_machine.listening_timeout_ms,
            thinking_timeout_ms: config.state_machine.thinking_timeout_ms,
            speaking_cooldown_ms: config.state_machine.speaking_cooldown_ms,
            inactivity_timeout_ms: config.inactivity.timeout_ms,
        }
    }
}

/// The NPC engagement engine: message buffer, decision layer, memory store,
/// conversation manager, and state machine behind a single async mutex.
///
/// Every timestamp this type accepts is a caller-supplied millisecond epoch
/// value, matching the collaborator crates it wraps — there is no internal
/// call to a wall clock except in [`Engine::spawn_ticker`], the one true
/// runtime boundary.
pub struct Engine<L: ConversationLog> {
    config: EngineConfig,
    llm: Arc<dyn ChatProvider>,
    inner: Mutex<Inner<L>>,
}

impl<L: ConversationLog> Engine<L> {
    pub fn new(
        config: EngineConfig,
        persona_system_prompt: impl Into<String>,
        llm: Arc<dyn ChatProvider>,
        log: L,
        now: i64,
    ) -> Self {
        Self::with_random(config, persona_system_prompt, llm, log, Box::new(ThreadRandomSource), now)
    }

    /// Constructs the engine with an explicit randomness source, for tests
    /// that need [`FixedSource`]-style determinism.
    pub fn with_random(
        config: EngineConfig,
        persona_system_prompt: impl Into<String>,
        llm: Arc<dyn ChatProvider>,
        log: L,
        random: Box<dyn RandomSource + Send>,
        now: i64,
    ) -> Self {
        let inner = Inner {
            buffer: MessageBuffer::new(config.buffer.clone()),
            decision: DecisionLayer::new(config.decision.clone()),
            memory: MemoryStore::new(),
            conversation: ConversationManager::new(
                persona_system_prompt,
                config.conversation.clone(),
                config.inactivity_timeout_ms,
                log,
            ),
            state: StateContext::new(now),
            rendezvous: Rendezvous::new(),
            random,
        };
        Self { config, llm, inner: Mutex::new(inner) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn llm(&self) -> &Arc<dyn ChatProvider> {
        &self.llm
    }

    pub async fn seed_memory(&self, keywords: Vec<String>, content: impl Into<String>, priority: u32) -> uuid::Uuid {
        let mut inner = self.inner.lock().await;
        inner.memory.add(keywords, content, priority)
    }

    pub async fn state(&self) -> EngineState {
        self.inner.lock().await.state.state()
    }

    pub async fn active_target(&self) -> Option<String> {
        self.inner.lock().await.state.active_target().map(str::to_string)
    }

    pub async fn buffer_total_len(&self) -> usize {
        self.inner.lock().await.buffer.total_len()
    }

    pub async fn history_len(&self) -> usize {
        self.inner.lock().await.conversation.history().len()
    }

    pub async fn detect_mention(&self, text: &str) -> bool {
        self.inner.lock().await.decision.detect_mention(text)
    }

    /// Appends the utterance to the speaker's buffer and, if the engine was
    /// IDLE, transitions it to LISTENING (buffer now non-empty).
    pub async fn ingest(&self, speaker_id: &str, speaker_name: &str, text: &str, now: i64) -> Utterance {
        let mut inner = self.inner.lock().await;
        let mention = inner.decision.detect_mention(text);
        let utterance = inner.buffer.ingest(speaker_id, speaker_name, text, mention, now);
        if inner.state.state() == EngineState::Idle {
            inner.state.to_listening(now, "buffer non-empty");
        }
        utterance
    }

    /// The rendezvous entry point, called immediately after `ingest`.
    /// Consumes a pending decision if one exists for `speaker_id`; otherwise
    /// registers a fresh waiter and suspends until woken or `timeout_ms`
    /// elapses.
    pub async fn wait_for_decision(&self, speaker_id: &str, timeout_ms: i64, now: i64) -> WaitOutcome {
        let registration = {
            let mut inner = self.inner.lock().await;
            if inner.rendezvous.take_pending(speaker_id) {
                inner.state.to_thinking(speaker_id, now, "pending decision consumed");
                None
            } else {
                Some(inner.rendezvous.register(speaker_id))
            }
        };

        let (id, rx) = match registration {
            None => return WaitOutcome::Decided,
            Some(pair) => pair,
        };

        let timeout = std::time::Duration::from_millis(timeout_ms.max(0) as u64);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => WaitOutcome::Decided,
            Ok(Err(_)) | Err(_) => {
                let mut inner = self.inner.lock().await;
                inner.rendezvous.deregister(speaker_id, id);
                WaitOutcome::TimedOut
            }
        }
    }

    /// One state-machine tick. Evaluates the decision layer in LISTENING,
    /// enforces the THINKING/SPEAKING/LISTENING wall-clock timeouts, and
    /// promotes IDLE to LISTENING if the buffer has become non-empty.
    pub async fn tick(&self, now: i64) {
        let mut inner = self.inner.lock().await;
        match inner.state.state() {
            EngineState::Idle => {
                if !inner.buffer.is_empty() {
                    inner.state.to_listening(now, "buffer non-empty");
                }
            }
            EngineState::Listening => {
                let snapshot = inner.buffer.snapshot();
                let decision = inner.decision.decide(&snapshot, now, inner.random.as_mut());
                match decision {
                    Decision::Respond { speaker_id, .. } => {
                        if inner.rendezvous.wake_one(&speaker_id) {
                            inner.state.to_thinking(speaker_id, now, "decision respond");
                        } else {
                            inner.rendezvous.mark_pending(&speaker_id);
                        }
                    }
                    Decision::Ignore { .. } => {
                        let elapsed = now - inner.state.entered_at();
                        if elapsed > self.config.listening_timeout_ms {
                            inner.buffer.sweep_expired(now);
                            inner.state.to_idle(now, "listening timeout");
                        }
                    }
                }
            }
            EngineState::Thinking => {
                let elapsed = now - inner.state.entered_at();
                if elapsed > self.config.thinking_timeout_ms {
                    if let Some(target) = inner.state.active_target().map(str::to_string) {
                        inner.buffer.clear_speaker(&target);
                    }
                    inner.state.to_idle(now, "thinking timeout");
                }
            }
            EngineState::Speaking => {
                let elapsed = now - inner.state.entered_at();
                if elapsed > self.config.speaking_cooldown_ms {
                    if inner.buffer.is_empty() {
                        inner.state.to_idle(now, "cooldown elapsed, buffer empty");
                    } else {
                        inner.state.to_listening(now, "cooldown elapsed, buffer non-empty");
                    }
                }
            }
        }

        inner.conversation.tick_inactivity(now);
    }

    /// Fetches the aggregated utterance for `speaker_id`, appends it as a
    /// user turn, and assembles the LLM-bound prompt — all under one lock
    /// acquisition, released before the LLM is ever invoked.
    pub async fn prepare_llm_call(&self, speaker_id: &str, speaker_name: &str, now: i64) -> Vec<ChatMessage> {
        let mut inner = self.inner.lock().await;
        let aggregated = inner.buffer.aggregated_content(speaker_id, now);
        inner.conversation.append_user(format!("[{speaker_name}] {aggregated}"), now);

        let base = if self.config.memory_enabled {
            inner.conversation.history_with_memories(&mut inner.memory, self.config.memory_token_budget, now)
        } else if self.config.conversation.budgeting_enabled {
            inner.conversation.history_with_budget()
        } else {
            inner.conversation.history()
        };

        splice_address_hint(base, speaker_name)
    }

    /// Records a successful LLM reply: appends the assistant turn, advances
    /// THINKING → SPEAKING, marks the speaker responded, and clears its
    /// buffer (the aggregated utterance has now been answered).
    pub async fn finish_success(&self, speaker_id: &str, reply: impl Into<String>, now: i64) {
        let mut inner = self.inner.lock().await;
        inner.conversation.append_assistant(reply);
        if inner.state.state() == EngineState::Thinking && inner.state.active_target() == Some(speaker_id) {
            inner.state.to_speaking(now, "llm reply ready");
        }
        inner.buffer.mark_responded(speaker_id, now);
        inner.buffer.clear_speaker(speaker_id);
    }

    /// Rolls back the last user turn and recovers THINKING → IDLE, clearing
    /// the active speaker's buffer. A no-op (with a warning) if called
    /// outside THINKING for this target.
    pub async fn finish_failure(&self, speaker_id: &str, now: i64) {
        let mut inner = self.inner.lock().await;
        inner.conversation.remove_last();
        if inner.state.state() == EngineState::Thinking && inner.state.active_target() == Some(speaker_id) {
            inner.buffer.clear_speaker(speaker_id);
            inner.state.to_idle(now, "llm error");
        } else {
            tracing::warn!(speaker_id, "onLLMError called outside THINKING for this target");
        }
    }

    /// Clears buffers, decision bookkeeping, and pending rendezvous state,
    /// hands the conversation off to the log collaborator, and returns to
    /// IDLE regardless of current state.
    pub async fn reset(&self, now: i64) {
        let mut inner = self.inner.lock().await;
        inner.conversation.save_and_reset("reset");
        inner.buffer.clear_all();
        inner.decision.clear_history();
        inner.rendezvous.clear();
        inner.state.to_idle(now, "reset");
    }
}

impl<L: ConversationLog + Send + 'static> Engine<L> {
    /// Spawns the ticker task that drives all time-based transitions at
    /// `tickIntervalMs`. The only place in this crate that reads the wall
    /// clock.
    pub fn spawn_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let interval_ms = self.config.tick_interval_ms.max(1) as u64;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                engine.tick(current_epoch_ms()).await;
            }
        })
    }
}

fn current_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn splice_address_hint(turns: Vec<Turn>, speaker_name: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    let mut iter = turns.into_iter();
    if let Some(system) = iter.next() {
        messages.push(to_chat_message(system));
    }
    messages.push(ChatMessage::system(format!("You are responding to {speaker_name}. Address them directly by name.")));
    messages.extend(iter.map(to_chat_message));
    messages
}

fn to_chat_message(turn: Turn) -> ChatMessage {
    match turn.role {
        Role::System => ChatMessage::system(turn.content),
        Role::User => ChatMessage::user(turn.content),
        Role::Assistant => ChatMessage::assistant(turn.content),
    }
}

/// Convenience constructor for a deterministic test engine.
pub fn fixed_random(value: f64) -> Box<dyn RandomSource + Send> {
    Box::new(FixedSource(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use npc_conversation::NullLog;
    use npc_llm::MockProvider;

    fn test_config() -> EngineConfig {
        EngineConfig {
            buffer: BufferConfig::default(),
            decision: DecisionConfig { response_chance: 1.0, ..DecisionConfig::default() },
            conversation: ConversationConfig::default(),
            memory_enabled: true,
            memory_token_budget: 500,
            tick_interval_ms: 1000,
            listening_timeout_ms: 15_000,
            thinking_timeout_ms: 30_000,
            speaking_cooldown_ms: 5000,
            inactivity_timeout_ms: 3_600_000,
        }
    }

    fn test_engine() -> Engine<NullLog> {
        Engine::with_random(
            test_config(),
            "persona",
            Arc::new(MockProvider::new()),
            NullLog,
            fixed_random(0.0),
            0,
        )
    }

    #[tokio::test]
    async fn ingest_moves_idle_engine_to_listening() {
        let engine = test_engine();
        assert_eq!(engine.state().await, EngineState::Idle);
        engine.ingest("alice", "Alice", "hi", 0).await;
        assert_eq!(engine.state().await, EngineState::Listening);
    }

    #[tokio::test]
    async fn tick_respond_without_waiter_parks_pending_decision() {
        let engine = test_engine();
        engine.ingest("carol", "Carol", "hey maid!", 0).await;
        engine.tick(1).await;
        // No waiter was registered, so the engine must stay out of THINKING
        // and park the verdict instead.
        assert_eq!(engine.state().await, EngineState::Listening);
    }

    #[tokio::test]
    async fn wait_for_decision_consumes_a_pending_verdict_and_enters_thinking() {
        let engine = test_engine();
        engine.ingest("carol", "Carol", "hey maid!", 0).await;
        engine.tick(1).await;

        let outcome = engine.wait_for_decision("carol", 1000, 2).await;
        assert_eq!(outcome, WaitOutcome::Decided);
        assert_eq!(engine.state().await, EngineState::Thinking);
        assert_eq!(engine.active_target().await.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn wait_for_decision_times_out_when_nothing_is_decided() {
        let engine = test_engine();
        engine.ingest("alice", "Alice", "hi", 0).await;
        let outcome = engine.wait_for_decision("alice", 10, 0).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn llm_failure_rolls_back_cleanly() {
        let engine = test_engine();
        engine.ingest("carol", "Carol", "hey maid!", 0).await;
        engine.tick(1).await;
        engine.wait_for_decision("carol", 1000, 2).await;

        let history_before = engine.history_len().await;
        let _prompt = engine.prepare_llm_call("carol", "Carol", 3).await;
        assert_eq!(engine.history_len().await, history_before + 1);

        engine.finish_failure("carol", 4).await;
        assert_eq!(engine.history_len().await, history_before);
        assert_eq!(engine.buffer_total_len().await, 0);
        assert_eq!(engine.state().await, EngineState::Idle);
        assert!(engine.active_target().await.is_none());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let engine = test_engine();
        engine.ingest("alice", "Alice", "hi", 0).await;
        engine.ingest("alice", "Alice", "there", 1).await;
        engine.reset(2).await;

        assert_eq!(engine.state().await, EngineState::Idle);
        assert_eq!(engine.buffer_total_len().await, 0);
        assert!(engine.active_target().await.is_none());
        assert_eq!(engine.history_len().await, 1);
    }
}
