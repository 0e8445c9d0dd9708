//! The outward-facing entry point: takes one speaker utterance, drives the
//! engine through ingest → rendezvous → LLM, and reports what happened.
//! Mirrors the source's event-driven dispatch as a single async call instead
//! of a callback chain.

use std::sync::Arc;

use npc_conversation::ConversationLog;
use npc_llm::{ChatMessage, ChatProvider, LlmError};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::rendezvous::WaitOutcome;

const RESET_COMMANDS: &[&str] = &["reset", "清除"];

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The engine decided to respond and the LLM produced a reply.
    Replied(String),
    /// The engine let the listening window lapse without deciding to
    /// respond to this speaker.
    Declined,
    /// The message was a reset command; the engine has been returned to
    /// IDLE with all buffers cleared.
    Reset,
}

#[derive(Debug, Error)]
#[error("llm dispatch failed: {0}")]
pub struct DispatchError(#[from] LlmError);

/// Ingests `text` from `speaker_id`/`speaker_name`, waits up to the
/// configured listening timeout for a decision, and on a respond verdict
/// calls the LLM and reports the outcome.
pub async fn handle_message<L: ConversationLog>(
    engine: &Engine<L>,
    speaker_name: &str,
    speaker_id: &str,
    text: &str,
    now: i64,
) -> Result<IngestOutcome, DispatchError> {
    let trimmed = text.trim();
    if RESET_COMMANDS.contains(&trimmed) {
        engine.reset(now).await;
        return Ok(IngestOutcome::Reset);
    }

    engine.ingest(speaker_id, speaker_name, text, now).await;

    let timeout_ms = engine.config().listening_timeout_ms;
    match engine.wait_for_decision(speaker_id, timeout_ms, now).await {
        WaitOutcome::TimedOut => Ok(IngestOutcome::Declined),
        WaitOutcome::Decided => {
            let prompt = engine.prepare_llm_call(speaker_id, speaker_name, now).await;
            match run_llm(engine.llm(), &prompt).await {
                Ok(reply) => {
                    engine.finish_success(speaker_id, reply.clone(), now).await;
                    Ok(IngestOutcome::Replied(reply))
                }
                Err(err) => {
                    engine.finish_failure(speaker_id, now).await;
                    Err(DispatchError(err))
                }
            }
        }
    }
}

/// Prefers the provider's streaming path (chunks are only observed here,
/// never surfaced past this boundary) and falls back to a single non-stream
/// call if the stream itself errors before completion.
async fn run_llm(llm: &Arc<dyn ChatProvider>, prompt: &[ChatMessage]) -> Result<String, LlmError> {
    let (tx, mut rx) = mpsc::channel(32);
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    match llm.chat_stream(prompt, tx).await {
        Ok(reply) => {
            let _ = drain.await;
            Ok(reply)
        }
        Err(_) => {
            drain.abort();
            llm.chat(prompt).await
        }
    }
}
