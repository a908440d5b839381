use anyhow::{bail, Result};
use chrono::Utc;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::cells::{run_cell, spawn_and_run, spawn_child, spawn_root, CellId, Verdict};
use crate::core::audit::AuditEntry;
use crate::core::state::EngineState;
use crate::memory::{Mapping, GLOBAL_KEY};
use crate::mission::{self, MissionRecord, ReflectionConcert};

/// The tick loop over the active cell set
pub struct Machine {
    state: EngineState,
    /// Cells run each tick, in insertion order. Holds exactly one Director
    /// between ticks.
    active: Vec<CellId>,
    concert: ReflectionConcert,
}

impl Machine {
    pub fn new(state: EngineState) -> Self {
        let concert = ReflectionConcert::from_config(&state.config);
        Self {
            state,
            active: Vec::new(),
            concert,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    pub fn into_state(self) -> EngineState {
        self.state
    }

    pub fn active(&self) -> &[CellId] {
        &self.active
    }

    /// The Director in the active set, if one has been created
    pub fn director(&self) -> Option<&CellId> {
        self.active.iter().find(|id| self.state.cells.is_director(id))
    }

    fn ensure_director(&mut self) -> Result<CellId> {
        if let Some(id) = self.director() {
            return Ok(id.clone());
        }
        let id = spawn_root(&mut self.state, "Director", "")?;
        info!("Created Director {}", id);
        self.active.insert(0, id.clone());
        Ok(id)
    }

    /// One full pass. Errors end the tick; the caller decides what to do.
    pub async fn tick(&mut self) -> Result<()> {
        self.state.tick += 1;
        let tick = self.state.tick;
        debug!("Tick {} starting with {} active cells", tick, self.active.len());

        self.ensure_director()?;
        self.age_memory().await?;

        // 3. run the Director and every unfinished cell
        let mark = self.state.cells.len();
        for id in self.active.clone() {
            let runnable = self.state.cells.is_director(&id) || !self.state.cells.is_completed(&id);
            if runnable {
                run_cell(&mut self.state, &id).await?;
            }
        }

        // 4-5. harvest and repair
        let spawned = self.state.cells.spawned_since(mark);
        let director = self.repair_active(&spawned)?;

        // 6. emotions
        self.check_emotions(&director).await?;
        let decay = self.state.config.emotion.decay;
        self.state.emotions.decay(decay);

        // 7. mission evolution
        let changed = self.concert.run(&mut self.state, Some(&director)).await?;

        // 8. reflection cells
        self.reflect(&director, tick).await?;

        // 9. persist
        self.state.persist()?;
        if changed {
            self.state.persist_mission()?;
        }

        info!(
            "Tick {} done: {} active, {} cells total{}",
            tick,
            self.active.len(),
            self.state.cells.len(),
            if changed { ", mission changed" } else { "" }
        );
        Ok(())
    }

    /// Compact and reload every short-term key, then compress every long-term key
    async fn age_memory(&mut self) -> Result<()> {
        let state = &mut self.state;
        let limits = state.config.memory.clone();

        for key in state.memory.keys_short_term() {
            state
                .memory
                .compact(&state.llm, &key, limits.max_short_term, limits.max_long_term)
                .await?;
            state
                .memory
                .promote_to_short_term(&state.llm, &key, &state.mission, limits.reload_per_key)
                .await?;
        }

        let now = Utc::now();
        for key in state.memory.keys_long_term() {
            state
                .memory
                .compress_long_term(&state.llm, &key, limits.max_blobs, now)
                .await?;
        }
        Ok(())
    }

    /// Drop finished cells, keep exactly one Director (the first), and add
    /// newly spawned unfinished cells. Returns the Director.
    fn repair_active(&mut self, spawned: &[CellId]) -> Result<CellId> {
        let cells = &self.state.cells;
        let mut seen_director = false;
        self.active.retain(|id| {
            if cells.is_director(id) {
                let keep = !seen_director;
                seen_director = true;
                keep
            } else {
                !cells.is_completed(id)
            }
        });

        for id in spawned {
            if !cells.is_director(id) && !cells.is_completed(id) && !self.active.contains(id) {
                self.active.push(id.clone());
            }
        }

        self.ensure_director()
    }

    async fn check_emotions(&mut self, director: &CellId) -> Result<()> {
        let thresholds = self.state.config.emotion.thresholds.clone();
        let exceeded = self.state.emotions.exceeded(&thresholds);
        if exceeded.is_empty() {
            return Ok(());
        }

        warn!("Emotion thresholds exceeded: {}", exceeded.join(", "));
        let input = format!(
            "Emotional state: {}\nRecent work:\n{}",
            self.state.emotions.annotations(),
            self.state.memory.short_term(GLOBAL_KEY).join("\n")
        );
        let (_, assessment) =
            spawn_and_run(&mut self.state, Some(director), "SelfAssessment", &input).await?;
        if assessment.verdict() == Some(Verdict::Failed) {
            spawn_and_run(&mut self.state, Some(director), "SelfRepair", assessment.output()).await?;
        }

        for emotion in &exceeded {
            self.state.emotions.reset(emotion);
        }
        Ok(())
    }

    async fn reflect(&mut self, director: &CellId, tick: u64) -> Result<()> {
        let recent = self.state.memory.short_term(GLOBAL_KEY).join("\n");
        spawn_and_run(&mut self.state, Some(director), "Milestone", &recent).await?;

        let status = format!(
            "Tick {}: {} active cells, {} cells total, {} mission changes",
            tick,
            self.active.len(),
            self.state.cells.len(),
            self.state.history.len()
        );
        spawn_and_run(&mut self.state, Some(director), "MetaLogger", &status).await?;

        let every = self.state.config.scheduler.curriculum_every;
        if every > 0 && tick % every == 0 {
            let skills = self.state.skills.for_role("Worker").join("\n");
            spawn_and_run(&mut self.state, Some(director), "Curriculum", &skills).await?;
        }
        Ok(())
    }

    /// Tick until `shutdown` flips or `max_ticks` is reached. A signal
    /// never interrupts a tick in progress. Returns the number of ticks run.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<u64> {
        let delay = Duration::from_millis(self.state.config.scheduler.tick_delay_ms);
        let max_ticks = self.state.config.scheduler.max_ticks;
        let mut ticks = 0u64;

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested");
                break;
            }

            self.tick().await?;
            ticks += 1;

            if max_ticks.is_some_and(|max| ticks >= max) {
                info!("Reached {} ticks", ticks);
                break;
            }

            let sender_gone = tokio::select! {
                _ = sleep(delay) => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if sender_gone {
                info!("Shutdown channel closed");
                break;
            }
        }

        self.state.persist()?;
        Ok(ticks)
    }

    /// New cell under the Director; it first runs on the next tick
    pub fn create_agent(&mut self, role: &str, input: &str) -> Result<CellId> {
        if role == "Director" {
            bail!("The Director is created by the scheduler only");
        }
        let director = self.ensure_director()?;
        let id = spawn_child(&mut self.state, Some(&director), role, input)?;
        self.active.push(id.clone());
        info!("Created {} agent {}", role, id);
        Ok(id)
    }

    /// Replace an active cell with a new one of another role, same parent
    /// and input. The old node stays in the tree.
    pub fn hot_swap(&mut self, old_id: &CellId, new_role: &str) -> Result<CellId> {
        let Some(old) = self.state.cells.get(old_id) else {
            bail!("No cell {}", old_id);
        };
        if old.is_director() || new_role == "Director" {
            bail!("The Director cannot be hot-swapped");
        }
        let (parent, input) = (old.parent.clone(), old.input.clone());

        let new_id = spawn_child(&mut self.state, parent.as_ref(), new_role, &input)?;
        match self.active.iter().position(|id| id == old_id) {
            Some(pos) => self.active[pos] = new_id.clone(),
            None => self.active.push(new_id.clone()),
        }
        self.state.record(
            AuditEntry::new("cell.hot_swap", "Scheduler", old_id.to_string(), new_id.to_string())
                .with_role(new_role)
                .with_parent(parent),
        );
        Ok(new_id)
    }

    /// Replace the mission directly, keeping a history record
    pub fn set_mission(&mut self, text: &str) -> Result<()> {
        let old = std::mem::replace(&mut self.state.mission, text.to_string());
        self.state.history.push(MissionRecord::new(&old, text, Vec::new()));
        self.state.record(AuditEntry::new("mission.set", "Scheduler", old, text));
        self.state.persist_mission()
    }

    pub fn snapshot(&self) -> Mapping {
        self.state.memory.snapshot_short_term()
    }

    pub fn restore(&mut self, snapshot: Mapping) {
        self.state.memory.restore_short_term(snapshot);
    }

    pub fn rollback_mission(&mut self, index: usize) -> Result<String> {
        mission::rollback_mission(&mut self.state, index)
    }

    pub fn persist(&mut self) -> Result<()> {
        self.state.persist()?;
        self.state.persist_mission()
    }
}
