//! IDLE → LISTENING → THINKING → SPEAKING lifecycle and its diagnostic
//! transition log. Owns the invariant that the active target is non-null iff
//! the state is THINKING — every transition goes through one of the named
//! constructors below so that invariant can't be broken piecemeal.

use std::collections::VecDeque;

const MAX_TRANSITION_LOG: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionLogEntry {
    pub from: EngineState,
    pub to: EngineState,
    pub at: i64,
    pub reason: String,
}

#[derive(Debug)]
pub struct StateContext {
    state: EngineState,
    entered_at: i64,
    active_target: Option<String>,
    last_reply_at: Option<i64>,
    transitions: VecDeque<TransitionLogEntry>,
}

impl StateContext {
    pub fn new(now: i64) -> Self {
        Self {
            state: EngineState::Idle,
            entered_at: now,
            active_target: None,
            last_reply_at: None,
            transitions: VecDeque::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn entered_at(&self) -> i64 {
        self.entered_at
    }

    pub fn active_target(&self) -> Option<&str> {
        self.active_target.as_deref()
    }

    pub fn last_reply_at(&self) -> Option<i64> {
        self.last_reply_at
    }

    pub fn transitions(&self) -> &VecDeque<TransitionLogEntry> {
        &self.transitions
    }

    fn record(&mut self, to: EngineState, now: i64, reason: &str) {
        self.transitions.push_back(TransitionLogEntry { from: self.state, to, at: now, reason: reason.to_string() });
        if self.transitions.len() > MAX_TRANSITION_LOG {
            self.transitions.pop_front();
        }
        self.state = to;
        self.entered_at = now;
    }

    pub fn to_listening(&mut self, now: i64, reason: &str) {
        self.record(EngineState::Listening, now, reason);
    }

    pub fn to_thinking(&mut self, target: impl Into<String>, now: i64, reason: &str) {
        self.active_target = Some(target.into());
        self.record(EngineState::Thinking, now, reason);
    }

    pub fn to_speaking(&mut self, now: i64, reason: &str) {
        self.last_reply_at = Some(now);
        self.active_target = None;
        self.record(EngineState::Speaking, now, reason);
    }

    pub fn to_idle(&mut self, now: i64, reason: &str) {
        self.active_target = None;
        self.record(EngineState::Idle, now, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle_with_no_target() {
        let ctx = StateContext::new(0);
        assert_eq!(ctx.state(), EngineState::Idle);
        assert!(ctx.active_target().is_none());
    }

    #[test]
    fn active_target_set_only_while_thinking() {
        let mut ctx = StateContext::new(0);
        ctx.to_listening(1, "buffer non-empty");
        assert!(ctx.active_target().is_none());

        ctx.to_thinking("alice", 2, "decision respond");
        assert_eq!(ctx.active_target(), Some("alice"));

        ctx.to_speaking(3, "llm reply ready");
        assert!(ctx.active_target().is_none());
    }

    #[test]
    fn transition_log_is_bounded() {
        let mut ctx = StateContext::new(0);
        for i in 0..150 {
            ctx.to_listening(i, "tick");
            ctx.to_idle(i, "tick");
        }
        assert!(ctx.transitions().len() <= 100);
    }

    #[test]
    fn to_idle_clears_active_target() {
        let mut ctx = StateContext::new(0);
        ctx.to_listening(1, "buffer non-empty");
        ctx.to_thinking("bob", 2, "decision respond");
        ctx.to_idle(3, "llm error");
        assert!(ctx.active_target().is_none());
        assert_eq!(ctx.state(), EngineState::Idle);
    }
}
