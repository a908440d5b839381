use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One accepted mission change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissionRecord {
    pub timestamp: DateTime<Utc>,
    pub old_mission: String,
    pub new_mission: String,
    /// Proposals textually equal to the new mission
    #[serde(default)]
    pub rationales: Vec<String>,
}

impl MissionRecord {
    pub fn new(old_mission: &str, new_mission: &str, rationales: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            old_mission: old_mission.to_string(),
            new_mission: new_mission.to_string(),
            rationales,
        }
    }
}

/// Append-only record of mission changes, oldest first
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MissionHistory {
    records: Vec<MissionRecord>,
}

impl MissionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MissionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[MissionRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&MissionRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Line-level diff of one change: removed lines prefixed "- ",
    /// added lines "+ "
    pub fn diff(&self, index: usize) -> Option<String> {
        let record = self.records.get(index)?;
        let old: HashSet<&str> = record.old_mission.lines().map(str::trim).collect();
        let new: HashSet<&str> = record.new_mission.lines().map(str::trim).collect();

        let mut out = Vec::new();
        for line in record.old_mission.lines().map(str::trim) {
            if !new.contains(line) {
                out.push(format!("- {}", line));
            }
        }
        for line in record.new_mission.lines().map(str::trim) {
            if !old.contains(line) {
                out.push(format!("+ {}", line));
            }
        }
        Some(out.join("\n"))
    }
}
