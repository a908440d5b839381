use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-emotion levels in [0, 1]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmotionState {
    levels: BTreeMap<String, f32>,
}

impl EmotionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, emotion: &str) -> f32 {
        self.levels.get(emotion).copied().unwrap_or(0.0)
    }

    /// Move an emotion by `delta`, clamped to [0, 1]
    pub fn nudge(&mut self, emotion: &str, delta: f32) {
        let level = self.levels.entry(emotion.to_string()).or_insert(0.0);
        *level = (*level + delta).clamp(0.0, 1.0);
    }

    /// Fade every emotion toward zero
    pub fn decay(&mut self, amount: f32) {
        for level in self.levels.values_mut() {
            *level = (*level - amount).max(0.0);
        }
        self.levels.retain(|_, level| *level > 0.0);
    }

    pub fn reset(&mut self, emotion: &str) {
        self.levels.remove(emotion);
    }

    /// Emotions at or above their configured threshold
    pub fn exceeded(&self, thresholds: &BTreeMap<String, f32>) -> Vec<String> {
        thresholds
            .iter()
            .filter(|(emotion, threshold)| self.level(emotion) >= **threshold)
            .map(|(emotion, _)| emotion.clone())
            .collect()
    }

    /// Prompt annotation such as "frustration=0.40, satisfaction=0.10"
    pub fn annotations(&self) -> String {
        self.levels
            .iter()
            .map(|(emotion, level)| format!("{}={:.2}", emotion, level))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
