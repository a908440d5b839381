use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;

use super::history::MissionRecord;
use crate::cells::{spawn_and_run, CellId};
use crate::core::audit::AuditEntry;
use crate::core::config::Config;
use crate::core::error::EngineError;
use crate::core::state::EngineState;
use crate::core::text::{edit_distance, is_meta};
use crate::memory::GLOBAL_KEY;

const NO_CHANGE: &str = "no change needed";

/// Proposals closer than this to the current mission count as echoes
const NEAR_DUPLICATE_DISTANCE: usize = 20;

const REFLECTION_PROMPT: &str = "You reflect on the mission in light of recent memory. \
If the memory suggests the mission should grow, reply with the full revised mission and nothing else. \
Otherwise reply exactly: no change needed";

/// Memory pools tried in order for reflection material
const REFLECTION_POOLS: &[&str] = &[GLOBAL_KEY, "Director", "Project"];

/// Split `pool` into `n` contiguous slices of equal size; the last slice
/// absorbs the remainder
pub fn slices(pool: &[String], n: usize) -> Vec<Vec<String>> {
    if n == 0 {
        return Vec::new();
    }
    let size = pool.len() / n;
    (0..n)
        .map(|i| {
            let start = i * size;
            let end = if i == n - 1 { pool.len() } else { start + size };
            pool[start..end].to_vec()
        })
        .collect()
}

/// Most frequent proposal if any text repeats, else the longest; earliest wins ties
pub fn select_best(proposals: &[String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for p in proposals {
        *counts.entry(p.as_str()).or_insert(0) += 1;
    }

    let top = counts.values().copied().max().unwrap_or(0);
    if top > 1 {
        return proposals
            .iter()
            .find(|p| counts.get(p.as_str()) == Some(&top))
            .cloned();
    }

    let mut best: Option<&String> = None;
    for p in proposals {
        if best.map_or(true, |b| p.chars().count() > b.chars().count()) {
            best = Some(p);
        }
    }
    best.cloned()
}

/// A change counts when it is not a case-only edit and moves at least
/// max(20, len(old)/10) characters
pub fn is_meaningful_change(old: &str, new: &str) -> bool {
    if old.to_lowercase() == new.to_lowercase() {
        return false;
    }
    let threshold = NEAR_DUPLICATE_DISTANCE.max(old.chars().count() / 10);
    edit_distance(old, new) >= threshold
}

/// Periodic vote on whether the mission should change
#[derive(Debug, Clone, Copy)]
pub struct ReflectionConcert {
    pub reflection_count: usize,
}

impl ReflectionConcert {
    pub fn new(reflection_count: usize) -> Self {
        Self { reflection_count }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.mission.reflection_count)
    }

    fn majority(&self) -> usize {
        self.reflection_count / 2 + 1
    }

    fn reflection_pool(state: &EngineState) -> Vec<String> {
        REFLECTION_POOLS
            .iter()
            .map(|key| state.memory.short_term(key))
            .find(|facts| !facts.is_empty())
            .map(|facts| facts.to_vec())
            .unwrap_or_default()
    }

    /// One round. Cells it spawns hang under `anchor`. Returns whether the
    /// mission changed; the caller persists it.
    pub async fn run(&self, state: &mut EngineState, anchor: Option<&CellId>) -> Result<bool> {
        let mission = state.mission.clone();
        let pool = Self::reflection_pool(state);

        // 1-2. one reflection per slice
        let mut proposals = Vec::new();
        for (i, slice) in slices(&pool, self.reflection_count).iter().enumerate() {
            if slice.is_empty() {
                warn!("Reflection slice {} is empty", i);
            }
            let prompt = format!(
                "Mission: {}\n\nMemory:\n{}",
                mission,
                slice
                    .iter()
                    .map(|f| format!("- {}", f))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            let reply = state
                .llm
                .ask(REFLECTION_PROMPT, &prompt)
                .await
                .map_err(EngineError::from)?;
            let reply = reply.trim();
            if !reply.is_empty() && !reply.to_lowercase().contains(NO_CHANGE) {
                proposals.push(reply.to_string());
            }
        }
        let votes = proposals.len();

        // 3. shake things up when every proposal is an echo
        let stale = !proposals.is_empty()
            && proposals
                .iter()
                .all(|p| edit_distance(p, &mission) < NEAR_DUPLICATE_DISTANCE || is_meta(p));
        if stale {
            info!("All proposals echo the mission, asking Chaos");
            let (_, chaos) = spawn_and_run(state, anchor, "Chaos", &mission).await?;
            let disruptive = chaos.output().trim();
            if !disruptive.is_empty() {
                proposals.push(disruptive.to_string());
            }
        }

        // 4. debate every proposal; verdicts are recorded, not binding
        for proposal in &proposals {
            let input = format!("Current mission: {}\nProposal: {}", mission, proposal);
            let (_, debate) = spawn_and_run(state, anchor, "MissionDebate", &input).await?;
            let accepted = debate.output().trim().to_lowercase().starts_with("accept");
            state.record(
                AuditEntry::new("mission.debate", "MissionDebate", proposal, debate.output())
                    .with_parent(anchor)
                    .with_verdict(if accepted { "Accept" } else { "Reject" })
                    .with_pass(accepted),
            );
        }

        // 5. vote
        if votes < self.majority() || proposals.is_empty() {
            return Ok(false);
        }
        let Some(best) = select_best(&proposals) else {
            return Ok(false);
        };
        if !is_meaningful_change(&mission, &best) {
            warn!("Rejected mission proposal too close to the current mission: {}", best);
            return Ok(false);
        }

        let rationales: Vec<String> = proposals.iter().filter(|p| **p == best).cloned().collect();
        state
            .history
            .push(MissionRecord::new(&mission, &best, rationales.clone()));
        state.mission = best.clone();
        info!("Mission changed to: {}", best);

        state.record(
            AuditEntry::new("mission.change", "ReflectionConcert", &mission, &best)
                .with_parent(anchor)
                .with_pass(true),
        );
        state.record(
            AuditEntry::new(
                "mission.rationale",
                "ReflectionConcert",
                &best,
                rationales.join("\n"),
            )
            .with_parent(anchor),
        );

        let explain = format!("Old mission: {}\nNew mission: {}", mission, best);
        spawn_and_run(state, anchor, "Explainer", &explain).await?;

        Ok(true)
    }
}

/// Put back the mission text a history record replaced. Only the mission
/// changes; memory and cells are left as they are.
pub fn rollback_mission(state: &mut EngineState, index: usize) -> Result<String> {
    let len = state.history.len();
    let Some(record) = state.history.get(index) else {
        warn!("Cannot roll back to record {}: history holds {} records", index, len);
        return Err(EngineError::InvalidRollbackIndex { index, len }.into());
    };
    let restored = record.old_mission.clone();

    let previous = std::mem::replace(&mut state.mission, restored.clone());
    state.persist_mission()?;
    state.record(AuditEntry::new(
        "mission.rollback",
        "Scheduler",
        previous,
        restored.clone(),
    ));
    info!("Mission rolled back to record {}", index);
    Ok(restored)
}
