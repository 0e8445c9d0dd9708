//! Scores each speaker's buffer and chooses at most one target per tick.

use std::collections::HashMap;

use npc_buffer::SpeakerSnapshot;
use npc_config::DecisionConfig;

const ACTIVE_CONVERSATION_RECENCY_MS: i64 = 30_000;
const RECENT_INTERACTION_WINDOW_MS: i64 = 3_600_000;

/// Source of uniform randomness in `[0, 1)`, abstracted so decisions are
/// reproducible under test.
pub trait RandomSource: std::fmt::Debug {
    fn next_f64(&mut self) -> f64;
}

#[derive(Debug, Default)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn next_f64(&mut self) -> f64 {
        rand::random::<f64>()
    }
}

/// Stubbed randomness for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSource(pub f64);

impl RandomSource for FixedSource {
    fn next_f64(&mut self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    BelowThreshold,
    ChanceRejected,
    Cooldown,
    Empty,
}

impl DeclineReason {
    pub fn as_tag(&self) -> &'static str {
        match self {
            DeclineReason::BelowThreshold => "below_threshold",
            DeclineReason::ChanceRejected => "chance_rejected",
            DeclineReason::Cooldown => "cooldown",
            DeclineReason::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Respond { speaker_id: String, score: f64 },
    Ignore { reason: DeclineReason },
}

#[derive(Debug)]
pub struct DecisionLayer {
    config: DecisionConfig,
    last_response_time: HashMap<String, i64>,
}

impl DecisionLayer {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            last_response_time: HashMap::new(),
        }
    }

    /// True iff the lowercase text contains any configured trigger substring.
    pub fn detect_mention(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.config.trigger_words.iter().any(|word| lower.contains(word.as_str()))
    }

    pub fn decide(
        &mut self,
        snapshot: &[SpeakerSnapshot],
        now: i64,
        random: &mut dyn RandomSource,
    ) -> Decision {
        let mut best: Option<(&SpeakerSnapshot, f64)> = None;
        for speaker in snapshot {
            if speaker.messages.is_empty() {
                continue;
            }
            let score = self.score_for(speaker, now, random);
            let is_better = match &best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if is_better {
                best = Some((speaker, score));
            }
        }

        let Some((speaker, score)) = best else {
            tracing::trace!("decide: no speaker has a non-empty buffer");
            return Decision::Ignore { reason: DeclineReason::Empty };
        };

        if score < self.config.response_threshold {
            tracing::debug!(speaker_id = %speaker.speaker_id, score, threshold = self.config.response_threshold, "decide: below threshold");
            return Decision::Ignore { reason: DeclineReason::BelowThreshold };
        }

        let draw = random.next_f64();
        if !(draw < self.config.response_chance) {
            tracing::debug!(speaker_id = %speaker.speaker_id, draw, chance = self.config.response_chance, "decide: chance rejected");
            return Decision::Ignore { reason: DeclineReason::ChanceRejected };
        }

        let active_conversation = speaker.messages.len() > 1;
        let cooldown_elapsed = match speaker.last_responded_at {
            Some(last) => now - last >= self.config.cooldown_ms,
            None => true,
        };
        if !(active_conversation || cooldown_elapsed) {
            tracing::debug!(speaker_id = %speaker.speaker_id, "decide: cooldown active");
            return Decision::Ignore { reason: DeclineReason::Cooldown };
        }

        self.last_response_time.insert(speaker.speaker_id.clone(), now);
        tracing::debug!(speaker_id = %speaker.speaker_id, score, "decide: respond");
        Decision::Respond {
            speaker_id: speaker.speaker_id.clone(),
            score,
        }
    }

    pub fn clear_history(&mut self) {
        self.last_response_time.clear();
    }

    pub fn last_response_time(&self, speaker_id: &str) -> Option<i64> {
        self.last_response_time.get(speaker_id).copied()
    }

    fn score_for(&self, speaker: &SpeakerSnapshot, now: i64, random: &mut dyn RandomSource) -> f64 {
        let mut score = 0.0;

        if speaker.messages.iter().any(|u| u.mention) {
            score += self.config.direct_mention_bonus;
        }

        if let Some(last_responded_at) = speaker.last_responded_at {
            let age = now - last_responded_at;
            if age <= ACTIVE_CONVERSATION_RECENCY_MS {
                score += 60.0;
            } else if age <= RECENT_INTERACTION_WINDOW_MS {
                score += self.config.recent_interaction_bonus;
            }
        }

        score += speaker.messages.len() as f64 * self.config.message_count_multiplier;

        let consecutive = speaker.consecutive_count().min(3) as f64;
        score += consecutive * self.config.consecutive_bonus;

        let age_minutes = (now - speaker.first_seen_ms) as f64 / 60_000.0;
        let decay = (age_minutes * self.config.time_decay_rate).min(self.config.max_time_decay);
        score -= decay.max(0.0);

        score += random.next_f64() * self.config.randomness_range;

        score.max(0.0)
    }
}
