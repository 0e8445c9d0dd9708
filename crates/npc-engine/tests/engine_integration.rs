//! End-to-end scenarios driven through the real `Engine`, not through any
//! single collaborator's unit tests. Mirrors `restflow-core/tests/
//! stress_mock_runtime.rs` and `restflow-ai/tests/agent_integration.rs`'s
//! shape: construct a real engine with a `MockProvider` and deterministic
//! randomness, drive it through ingest/tick/wait/prepare/finish, and assert
//! on externally observable state.

use std::sync::Arc;

use npc_config::{BufferConfig, ConversationConfig, DecisionConfig};
use npc_conversation::NullLog;
use npc_engine::engine::{fixed_random, Engine, EngineConfig};
use npc_engine::{EngineState, WaitOutcome};
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
    Engine::with_random(test_config(), "persona", Arc::new(MockProvider::new()), NullLog, fixed_random(0.0), 0)
}

#[tokio::test]
async fn direct_mention_beats_chatter() {
    let engine = test_engine();
    engine.ingest("alice", "Alice", "hi", 0).await;
    engine.ingest("bob", "Bob", "hey there", 1).await;
    engine.ingest("alice", "Alice", "how are you", 2).await;
    engine.ingest("carol", "Carol", "hey maid!", 3).await;

    engine.tick(4).await;

    let outcome = engine.wait_for_decision("carol", 1000, 5).await;
    assert_eq!(outcome, WaitOutcome::Decided);
    assert_eq!(engine.active_target().await.as_deref(), Some("carol"));
}

#[tokio::test]
async fn cooldown_blocks_single_follow_up() {
    let engine = test_engine();
    engine.ingest("carol", "Carol", "hey maid!", 0).await;
    engine.tick(1).await;
    engine.wait_for_decision("carol", 1000, 2).await;
    engine.prepare_llm_call("carol", "Carol", 3).await;
    engine.finish_success("carol", "hello there", 4).await;
    assert_eq!(engine.state().await, EngineState::Speaking);

    // A single lone follow-up within cooldownMs must be declined.
    engine.tick(5200).await; // cooldown elapses, buffer empty -> back to IDLE
    engine.ingest("carol", "Carol", "are you there", 10_000).await;
    engine.tick(10_001).await;

    let outcome = engine.wait_for_decision("carol", 20, 10_002).await;
    assert_eq!(outcome, WaitOutcome::TimedOut, "lone follow-up within cooldown must be declined");
}

#[tokio::test]
async fn cooldown_bypassed_by_active_conversation() {
    let engine = test_engine();
    engine.ingest("carol", "Carol", "hey maid!", 0).await;
    engine.tick(1).await;
    engine.wait_for_decision("carol", 1000, 2).await;
    engine.prepare_llm_call("carol", "Carol", 3).await;
    engine.finish_success("carol", "hello there", 4).await;

    engine.tick(5200).await; // cooldown elapses, buffer empty -> IDLE

    // Two queued utterances before the next tick: the active-conversation
    // exemption should let this respond despite being inside cooldownMs.
    engine.ingest("carol", "Carol", "hello", 10_000).await;
    engine.ingest("carol", "Carol", "are you there", 10_100).await;
    engine.tick(10_101).await;

    let outcome = engine.wait_for_decision("carol", 1000, 10_102).await;
    assert_eq!(outcome, WaitOutcome::Decided);
    assert_eq!(engine.active_target().await.as_deref(), Some("carol"));
}

#[tokio::test]
async fn tie_break_favors_insertion_order() {
    let engine = test_engine();
    // Both mention the trigger word at the same timestamp, so their scores
    // tie exactly; alice was ingested first and must win.
    engine.ingest("alice", "Alice", "hey maid", 0).await;
    engine.ingest("bob", "Bob", "hey maid", 0).await;
    engine.tick(1).await;

    let outcome = engine.wait_for_decision("alice", 1000, 2).await;
    assert_eq!(outcome, WaitOutcome::Decided);
    assert_eq!(engine.active_target().await.as_deref(), Some("alice"));
}

#[tokio::test]
async fn timeout_releases_waiter() {
    let engine = test_engine();
    // No trigger word, low message count: score stays well under threshold,
    // so no decision is ever reached and the waiter must time out.
    engine.ingest("alice", "Alice", "just saying hi", 0).await;

    let outcome = engine.wait_for_decision("alice", 20, 0).await;
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert_eq!(engine.active_target().await, None);
}

#[tokio::test]
async fn pending_decision_slot_is_consumed_without_a_full_listening_wait() {
    let engine = test_engine();
    engine.ingest("alice", "Alice", "hey maid!", 0).await;
    // Decided before any waiter was registered: parked as a pending verdict.
    engine.tick(1).await;
    assert_eq!(engine.state().await, EngineState::Listening);

    // Alice's next ingest/wait consumes the pending verdict immediately,
    // without waiting another full listeningTimeoutMs.
    let outcome = engine.wait_for_decision("alice", 1000, 2).await;
    assert_eq!(outcome, WaitOutcome::Decided);
    assert_eq!(engine.state().await, EngineState::Thinking);
}

#[tokio::test]
async fn llm_failure_rolls_back_cleanly() {
    let engine = test_engine();
    engine.ingest("carol", "Carol", "hey maid!", 0).await;
    engine.tick(1).await;
    engine.wait_for_decision("carol", 1000, 2).await;

    let history_before = engine.history_len().await;
    engine.prepare_llm_call("carol", "Carol", 3).await;
    assert_eq!(engine.history_len().await, history_before + 1);

    engine.finish_failure("carol", 4).await;

    assert_eq!(engine.history_len().await, history_before);
    assert_eq!(engine.buffer_total_len().await, 0);
    assert_eq!(engine.state().await, EngineState::Idle);
    assert!(engine.active_target().await.is_none());
}

#[tokio::test]
async fn memory_injection_bounded_by_budget() {
    let mut config = test_config();
    config.memory_token_budget = 250;
    let engine = Engine::with_random(config, "persona", Arc::new(MockProvider::new()), NullLog, fixed_random(0.0), 0);

    engine.seed_memory(vec!["castle".into()], "x".repeat(400), 3).await;
    engine.seed_memory(vec!["garden".into()], "x".repeat(400), 2).await;
    engine.seed_memory(vec!["tower".into()], "x".repeat(400), 1).await;

    engine.ingest("carol", "Carol", "hey maid, tell me about the castle and the garden and the tower", 0).await;
    engine.tick(1).await;
    engine.wait_for_decision("carol", 1000, 2).await;

    let prompt = engine.prepare_llm_call("carol", "Carol", 3).await;
    let memory_turns = prompt.iter().filter(|m| m.content.starts_with("[Memory] ")).count();
    assert_eq!(memory_turns, 2, "only the two cheapest-fitting entries should be injected");
}
