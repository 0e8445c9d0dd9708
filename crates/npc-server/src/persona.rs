//! Persona file and seed-memory-facts loading, done once at startup.
//! Neither is part of the engine's contract (spec.md names persona file
//! loading as an out-of-scope external collaborator); this is the thin
//! adapter that reads them off disk.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub fn load_persona(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read persona file at {}", path.display()))
}

#[derive(Debug, Deserialize)]
pub struct MemoryFact {
    pub keywords: Vec<String>,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

pub fn load_memory_facts(path: &Path) -> Result<Vec<MemoryFact>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read memory facts file at {}", path.display()))?;
    let facts = serde_json::from_str(&raw).with_context(|| format!("failed to parse memory facts file at {}", path.display()))?;
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_memory_facts_parses_an_array_of_facts() {
        let path = std::env::temp_dir().join(format!("npc-server-test-{}-facts.json", std::process::id()));
        std::fs::write(&path, r#"[{"keywords":["cat"],"content":"likes cats","priority":3}]"#).unwrap();

        let facts = load_memory_facts(&path).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "likes cats");
        assert_eq!(facts[0].priority, 3);

        let _ = std::fs::remove_file(&path);
    }
}
