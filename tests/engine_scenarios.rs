use async_trait::async_trait;
use cellmind::consensus::{run_consensus, ConsensusType, RetrievalMode};
use cellmind::core::config::Config;
use cellmind::core::error::CompletionError;
use cellmind::core::state::EngineState;
use cellmind::memory::{compression_tag, GLOBAL_KEY};
use cellmind::providers::{CompletionRequest, CompletionService};
use cellmind::scheduler::Machine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

/// Answers by looking at the system prompt, like a very obliging model
struct ScriptedModel {
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CompletionService for ScriptedModel {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = req.system_text();
        let reply = if system.contains("You reflect on the mission") {
            "no change needed"
        } else if system.contains("Start your reply with exactly one of") {
            "VERIFIED looks right"
        } else if system.contains("Rate how relevant") {
            "7"
        } else if system.contains("You merge lists of facts") {
            "Older facts about terse answers"
        } else {
            "Answer in one word."
        };
        Ok(reply.to_string())
    }
}

fn small_config() -> Config {
    let mut config = Config::for_testing();
    config.consensus.sub_agent_count = 2;
    config.mission.reflection_count = 1;
    config
}

#[tokio::test]
async fn test_first_tick_produces_a_project_result_in_memory() {
    let model = ScriptedModel::new();
    let mut machine = Machine::new(EngineState::new(small_config(), model.clone()));

    machine.tick().await.unwrap();

    let memory = &machine.state().memory;
    assert_eq!(memory.short_term("Project"), &["Answer in one word.".to_string()]);
    assert!(!memory.short_term(GLOBAL_KEY).is_empty());
    assert!(model.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_exactly_one_director_after_each_tick() {
    let mut machine = Machine::new(EngineState::new(small_config(), ScriptedModel::new()));

    for _ in 0..3 {
        machine.tick().await.unwrap();
        let directors = machine
            .active()
            .iter()
            .filter(|id| machine.state().cells.is_director(id))
            .count();
        assert_eq!(directors, 1);
    }
}

#[tokio::test]
async fn test_overflowing_short_term_is_distilled_into_long_term() {
    let state = EngineState::new(small_config(), ScriptedModel::new());
    let mut memory = state.memory.clone();
    for i in 0..15 {
        memory.add_fact("Worker", format!("fact number {}", i));
    }

    memory.compact(&state.llm, "Worker", 3, 10).await.unwrap();

    assert_eq!(
        memory.short_term("Worker"),
        &[
            "fact number 12".to_string(),
            "fact number 13".to_string(),
            "fact number 14".to_string()
        ]
    );
    assert!(!memory.long_term("Worker").is_empty());
    assert!(memory
        .long_term("Worker")
        .iter()
        .all(|fact| compression_tag(fact).is_some()));
}

#[tokio::test]
async fn test_consensus_in_hybrid_mode_records_its_result() {
    let mut state = EngineState::new(small_config(), ScriptedModel::new());
    let endpoint = state.llm.endpoint().to_string();
    let model = state.llm.model().to_string();

    let result = run_consensus(
        &mut state,
        "How short can an answer be?",
        &endpoint,
        &model,
        "",
        ConsensusType::Knowledge,
        RetrievalMode::Hybrid,
    )
    .await
    .unwrap();

    assert_eq!(result, "Answer in one word.");
    assert_eq!(state.memory.short_term(GLOBAL_KEY), &[result]);
}

#[tokio::test]
async fn test_rollback_restores_the_exact_mission_across_restarts() {
    let dir = tempdir().unwrap();
    let mut config = small_config();
    config.memory.data_dir = dir.path().to_string_lossy().to_string();
    let original = "Say as little as possible.  \n(trailing spaces matter)".to_string();
    config.mission.initial = original.clone();

    let mut machine = Machine::new(EngineState::load(config.clone(), ScriptedModel::new()).unwrap());
    machine.set_mission("Chart every footpath in the county.").unwrap();
    machine.persist().unwrap();
    drop(machine);

    let mut machine = Machine::new(EngineState::load(config.clone(), ScriptedModel::new()).unwrap());
    assert_eq!(machine.state().mission, "Chart every footpath in the county.");
    assert_eq!(machine.rollback_mission(0).unwrap(), original);
    assert!(machine.rollback_mission(1).is_err());
    drop(machine);

    let reloaded = EngineState::load(config, ScriptedModel::new()).unwrap();
    assert_eq!(reloaded.mission, original);
    assert_eq!(reloaded.history.len(), 1);
}
