//! Per-speaker queue of recent utterances with aggregation, expiry, and
//! overflow eviction.
//!
//! Timestamps throughout this crate are caller-supplied millisecond epoch
//! values rather than `chrono::Utc::now()` calls, so tick-driven callers and
//! tests can advance time deterministically.

use std::collections::{HashMap, VecDeque};

use npc_config::BufferConfig;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: Uuid,
    pub text: String,
    pub mention: bool,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone)]
struct SpeakerBuffer {
    speaker_name: String,
    messages: VecDeque<Utterance>,
    first_seen_ms: i64,
    last_seen_ms: i64,
    last_responded_at: Option<i64>,
    total_ingested: u64,
}

/// Read-only view of one speaker's buffer, as returned by [`MessageBuffer::snapshot`].
#[derive(Debug, Clone)]
pub struct SpeakerSnapshot {
    pub speaker_id: String,
    pub speaker_name: String,
    pub messages: Vec<Utterance>,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub last_responded_at: Option<i64>,
    pub total_ingested: u64,
}

impl SpeakerSnapshot {
    /// Length of the most recent run of utterances in this buffer, capped at
    /// 5 to bound accounting work. Interleavings with other speakers are not
    /// examined; this mirrors the source behavior the specification pins.
    pub fn consecutive_count(&self) -> usize {
        self.messages.len().min(5)
    }
}

#[derive(Debug, Default)]
pub struct MessageBuffer {
    config: BufferConfig,
    buffers: HashMap<String, SpeakerBuffer>,
    /// Insertion order of speaker ids, used for tie-breaking and deterministic
    /// iteration independent of hash-map ordering.
    order: Vec<String>,
}

impl MessageBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            buffers: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn ingest(
        &mut self,
        speaker_id: impl Into<String>,
        speaker_name: impl Into<String>,
        text: impl Into<String>,
        direct_mention: bool,
        now: i64,
    ) -> Utterance {
        let speaker_id = speaker_id.into();
        let utterance = Utterance {
            id: Uuid::new_v4(),
            text: text.into(),
            mention: direct_mention,
            timestamp_ms: now,
        };

        let is_new = !self.buffers.contains_key(&speaker_id);
        let buffer = self.buffers.entry(speaker_id.clone()).or_insert_with(|| SpeakerBuffer {
            speaker_name: String::new(),
            messages: VecDeque::new(),
            first_seen_ms: now,
            last_seen_ms: now,
            last_responded_at: None,
            total_ingested: 0,
        });
        if is_new {
            self.order.push(speaker_id.clone());
        }
        buffer.speaker_name = speaker_name.into();
        buffer.last_seen_ms = now;
        buffer.total_ingested += 1;
        buffer.messages.push_back(utterance.clone());

        if buffer.messages.len() > self.config.max_messages_per_avatar {
            buffer.messages.pop_front();
        }

        self.sweep_expired(now);
        self.enforce_global_cap();

        utterance
    }

    /// Concatenation of utterances within the aggregation window, in
    /// insertion order, single-space separated. Falls back to the single
    /// most recent utterance when none qualify.
    pub fn aggregated_content(&self, speaker_id: &str, now: i64) -> String {
        let Some(buffer) = self.buffers.get(speaker_id) else {
            return String::new();
        };
        let window = self.config.aggregation_window_ms;
        let qualifying: Vec<&str> = buffer
            .messages
            .iter()
            .filter(|u| now - u.timestamp_ms <= window)
            .map(|u| u.text.as_str())
            .collect();

        if !qualifying.is_empty() {
            qualifying.join(" ")
        } else if let Some(last) = buffer.messages.back() {
            last.text.clone()
        } else {
            String::new()
        }
    }

    /// Drops all utterances for a speaker but retains the metadata record
    /// (last-responded-at must survive).
    pub fn clear_speaker(&mut self, speaker_id: &str) {
        if let Some(buffer) = self.buffers.get_mut(speaker_id) {
            buffer.messages.clear();
        }
    }

    pub fn clear_all(&mut self) {
        self.buffers.clear();
        self.order.clear();
    }

    pub fn mark_responded(&mut self, speaker_id: &str, now: i64) {
        match self.buffers.get_mut(speaker_id) {
            Some(buffer) => buffer.last_responded_at = Some(now),
            None => tracing::warn!(speaker_id, "mark_responded for unknown speaker"),
        }
    }

    /// Removes utterances older than `expiryMs`; removes a speaker's buffer
    /// entry entirely iff both its message sequence and its last-responded-at
    /// are empty.
    pub fn sweep_expired(&mut self, now: i64) {
        let expiry = self.config.expiry_ms;
        let mut to_remove = Vec::new();
        for id in &self.order {
            if let Some(buffer) = self.buffers.get_mut(id) {
                buffer.messages.retain(|u| now - u.timestamp_ms <= expiry);
                if buffer.messages.is_empty() && buffer.last_responded_at.is_none() {
                    to_remove.push(id.clone());
                }
            }
        }
        for id in to_remove {
            self.buffers.remove(&id);
            self.order.retain(|x| x != &id);
        }
    }

    pub fn snapshot(&self) -> Vec<SpeakerSnapshot> {
        self.order
            .iter()
            .filter_map(|id| {
                self.buffers.get(id).map(|buffer| SpeakerSnapshot {
                    speaker_id: id.clone(),
                    speaker_name: buffer.speaker_name.clone(),
                    messages: buffer.messages.iter().cloned().collect(),
                    first_seen_ms: buffer.first_seen_ms,
                    last_seen_ms: buffer.last_seen_ms,
                    last_responded_at: buffer.last_responded_at,
                    total_ingested: buffer.total_ingested,
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.values().all(|b| b.messages.is_empty())
    }

    pub fn total_len(&self) -> usize {
        self.buffers.values().map(|b| b.messages.len()).sum()
    }

    fn enforce_global_cap(&mut self) {
        while self.total_len() > self.config.max_total_buffer_size {
            let oldest = self
                .buffers
                .iter()
                .filter_map(|(id, buffer)| buffer.messages.front().map(|u| (id.clone(), u.timestamp_ms)))
                .min_by_key(|(_, ts)| *ts);

            match oldest {
                Some((id, _)) => {
                    if let Some(buffer) = self.buffers.get_mut(&id) {
                        buffer.messages.pop_front();
                    }
                }
                None => break,
            }
        }
    }
}
