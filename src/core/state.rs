use anyhow::Result;
use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::cells::{CellFactory, CellTree, EmotionState, SkillBook};
use crate::core::audit::{AuditEntry, AuditLog};
use crate::core::config::Config;
use crate::memory::{Mapping, MemoryPersistence, MemoryStore};
use crate::mission::MissionHistory;
use crate::providers::{CompletionService, Llm};

const MISSION_KEY: &str = "mission";
const MISSION_HISTORY_KEY: &str = "mission_history";
const SKILLS_KEY: &str = "skills";
const AUDIT_FILE: &str = "audit.jsonl";

/// Everything a cell, the consensus engine or the scheduler may touch.
/// Passed explicitly; there are no process-wide singletons.
pub struct EngineState {
    pub config: Arc<Config>,
    pub llm: Llm,
    pub mission: String,
    pub memory: MemoryStore,
    pub cells: CellTree,
    pub audit: AuditLog,
    pub emotions: EmotionState,
    pub skills: SkillBook,
    pub history: MissionHistory,
    /// None keeps everything in memory
    pub persistence: Option<MemoryPersistence>,
    pub factory: Arc<CellFactory>,
    pub tick: u64,
}

impl EngineState {
    /// Fresh state that never touches the filesystem
    pub fn new(config: Config, service: Arc<dyn CompletionService>) -> Self {
        let llm = Llm::new(service, &config.completion);
        let memory = MemoryStore::new().with_recompression_window(config.memory.recompression_window_secs);

        Self {
            mission: config.mission.initial.clone(),
            config: Arc::new(config),
            llm,
            memory,
            cells: CellTree::new(),
            audit: AuditLog::in_memory(),
            emotions: EmotionState::new(),
            skills: SkillBook::new(),
            history: MissionHistory::new(),
            persistence: None,
            factory: Arc::new(CellFactory::standard()),
            tick: 0,
        }
    }

    /// State restored from `memory.data_dir`; anything absent starts empty
    pub fn load(config: Config, service: Arc<dyn CompletionService>) -> Result<Self> {
        let persistence = MemoryPersistence::new(&config.memory.data_dir)?;
        let mut state = Self::new(config, service);

        state.memory = persistence.load_store(state.config.memory.recompression_window_secs)?;
        state.skills = SkillBook::from_mapping(persistence.load_mapping(SKILLS_KEY)?);
        state.history = persistence.load_document(MISSION_HISTORY_KEY)?;

        let missions = persistence.load_mapping(MISSION_KEY)?;
        if let Some(current) = missions.get("current").and_then(|m| m.first()) {
            state.mission = current.clone();
        }

        state.audit = AuditLog::open(Path::new(&state.config.memory.data_dir).join(AUDIT_FILE))?;
        state.persistence = Some(persistence);

        info!(
            "Engine state loaded: mission '{}', {} mission records",
            state.mission,
            state.history.len()
        );
        Ok(state)
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.audit.record(entry);
    }

    /// Save memory and skills, flush the audit log
    pub fn persist(&mut self) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.save_store(&self.memory)?;
            persistence.save_mapping(SKILLS_KEY, self.skills.as_mapping())?;
        }
        self.audit.flush()
    }

    /// Save the current mission and its history
    pub fn persist_mission(&self) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            let mut mapping: Mapping = BTreeMap::new();
            mapping.insert("current".to_string(), vec![self.mission.clone()]);
            persistence.save_mapping(MISSION_KEY, &mapping)?;
            persistence.save_document(MISSION_HISTORY_KEY, &self.history)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::MissionRecord;
    use crate::providers::stub::StubCompletion;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::for_testing();
        config.memory.data_dir = dir.to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_new_state_uses_initial_mission() {
        let state = EngineState::new(Config::for_testing(), Arc::new(StubCompletion::constant("")));
        assert_eq!(state.mission, "Say as little as possible.");
        assert!(state.persistence.is_none());
        assert_eq!(state.tick, 0);
    }

    #[test]
    fn test_persisted_state_reloads() -> Result<()> {
        let dir = tempdir()?;
        let service: Arc<dyn CompletionService> = Arc::new(StubCompletion::constant(""));

        let mut state = EngineState::load(config_in(dir.path()), service.clone())?;
        state.memory.add_fact("Global", "rivers flood in spring");
        state.skills.learn("Worker", "estimate");
        state
            .history
            .push(MissionRecord::new("Say as little as possible.", "Map rivers", vec![]));
        state.mission = "Map rivers".into();
        state.record(AuditEntry::new("test", "Scheduler", "q", "a"));
        state.persist()?;
        state.persist_mission()?;

        let reloaded = EngineState::load(config_in(dir.path()), service)?;
        assert_eq!(reloaded.mission, "Map rivers");
        assert_eq!(reloaded.memory.short_term("Global"), &["rivers flood in spring".to_string()]);
        assert_eq!(reloaded.skills.for_role("Worker"), &["estimate".to_string()]);
        assert_eq!(reloaded.history.len(), 1);
        assert_eq!(reloaded.audit.load_all()?.len(), 1);
        Ok(())
    }
}
