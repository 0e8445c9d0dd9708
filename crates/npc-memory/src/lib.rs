//! Keyword-indexed long-term facts; returns a token-bounded relevant subset
//! given recent text.

use std::collections::HashMap;

use uuid::Uuid;

/// `ceil(len(text)/4)`, the core's fixed token estimate. Per-turn framing
/// overhead is a further +5 tokens, added by callers that render an entry as
/// a turn (see [`Memory::relevant`]).
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f64 / 4.0).ceil() as usize
}

const TURN_FRAMING_OVERHEAD_TOKENS: usize = 5;

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub keywords: Vec<String>,
    pub content: String,
    pub priority: u32,
    pub last_accessed: Option<i64>,
    pub access_count: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
    by_id: HashMap<Uuid, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new entry; keywords are lowercased and trimmed on insert.
    pub fn add(&mut self, keywords: Vec<String>, content: impl Into<String>, priority: u32) -> Uuid {
        let id = Uuid::new_v4();
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let idx = self.entries.len();
        self.entries.push(MemoryEntry {
            id,
            keywords,
            content: content.into(),
            priority,
            last_accessed: None,
            access_count: 0,
        });
        self.by_id.insert(id, idx);
        id
    }

    /// Joins `recent_texts` into a lowercase search string, finds every entry
    /// at least one of whose keywords is a substring of it, ranks matches by
    /// score, and greedily selects entries (highest score first) whose
    /// estimated token cost (content tokens + per-turn framing overhead)
    /// cumulatively fits within `token_budget`. Updates last-accessed and
    /// access-count for each returned entry.
    pub fn relevant(&mut self, recent_texts: &[String], token_budget: usize, now: i64) -> Vec<MemoryEntry> {
        let search_string = recent_texts.join(" ").to_lowercase();

        let mut scored: Vec<(usize, u32)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let match_count = entry
                    .keywords
                    .iter()
                    .filter(|kw| !kw.is_empty() && search_string.contains(kw.as_str()))
                    .count();
                if match_count == 0 {
                    return None;
                }
                let accessed_bonus = if entry.access_count > 0 { 2 } else { 0 };
                let score = entry.priority * 10 + (match_count as u32) * 5 + accessed_bonus;
                Some((idx, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let mut selected = Vec::new();
        let mut spent = 0usize;
        for (idx, _score) in scored {
            let cost = estimate_tokens(&self.entries[idx].content) + TURN_FRAMING_OVERHEAD_TOKENS;
            if spent + cost > token_budget {
                continue;
            }
            spent += cost;

            let entry = &mut self.entries[idx];
            entry.last_accessed = Some(now);
            entry.access_count += 1;
            selected.push(entry.clone());
        }

        selected
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() < before {
            self.by_id = self.entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: Uuid) -> Option<&MemoryEntry> {
        self.by_id.get(&id).and_then(|&i| self.entries.get(i))
    }

    pub fn all(&self) -> &[MemoryEntry] {
        &self.entries
    }
}
