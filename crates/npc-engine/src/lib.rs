//! Wires the buffer, decision layer, memory store, conversation manager, and
//! state machine into one engine, and exposes the dispatch entry point that
//! drives a single speaker utterance through all of them.

pub mod dispatch;
pub mod engine;
pub mod rendezvous;
pub mod state;

pub use dispatch::{handle_message, DispatchError, IngestOutcome};
pub use engine::{Engine, EngineConfig};
pub use rendezvous::{Rendezvous, WaitOutcome};
pub use state::{EngineState, StateContext, TransitionLogEntry};
