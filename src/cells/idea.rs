use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::task::JoinHandle;

use super::{Cell, CellId, CellOutcome};
use crate::core::error::{CompletionError, EngineError};
use crate::core::state::EngineState;

const IDEA_PROMPT: &str = "Suggest one new, concrete directive that would advance the mission. \
Reply with the directive only.";

/// Where an Idea is in its two-state wait
enum IdeaState {
    Idle,
    Dispatched(JoinHandle<Result<String, CompletionError>>),
    Resolved(String),
}

/// Generates a directive in a detached task and is polled on later runs
pub struct Idea {
    seed: String,
    state: IdeaState,
}

impl Idea {
    pub fn new(seed: &str) -> Self {
        Self {
            seed: seed.to_string(),
            state: IdeaState::Idle,
        }
    }
}

#[async_trait]
impl Cell for Idea {
    fn role(&self) -> &str {
        "Idea"
    }

    async fn run(&mut self, id: &CellId, state: &mut EngineState) -> Result<CellOutcome> {
        match std::mem::replace(&mut self.state, IdeaState::Idle) {
            IdeaState::Idle => {
                let llm = state.llm.clone();
                let prompt = format!("Mission: {}\n\n{}", state.mission, self.seed);
                debug!("Dispatching idea generation for {}", id);
                self.state = IdeaState::Dispatched(tokio::spawn(async move {
                    llm.ask(IDEA_PROMPT, &prompt).await
                }));
                Ok(CellOutcome::Pending)
            }
            IdeaState::Dispatched(handle) => {
                // Give the detached task a chance to make progress
                tokio::task::yield_now().await;
                if !handle.is_finished() {
                    self.state = IdeaState::Dispatched(handle);
                    return Ok(CellOutcome::Pending);
                }

                let output = handle
                    .await
                    .map_err(|e| anyhow!("Idea task for {} failed: {}", id, e))?
                    .map_err(EngineError::from)?;
                let output = output.trim().to_string();
                info!("Idea resolved: {}", output);
                self.state = IdeaState::Resolved(output.clone());
                Ok(CellOutcome::Completed(output))
            }
            IdeaState::Resolved(output) => {
                self.state = IdeaState::Resolved(output.clone());
                Ok(CellOutcome::Completed(output))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::{run_cell, spawn_root};
    use crate::core::config::Config;
    use crate::providers::stub::StubCompletion;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_dispatch_then_resolve_on_later_run() {
        let stub = Arc::new(StubCompletion::constant(" map every river "));
        let mut state = EngineState::new(Config::for_testing(), stub);
        let id = spawn_root(&mut state, "Idea", "").unwrap();

        let first = run_cell(&mut state, &id).await.unwrap();
        assert!(first.is_pending());
        assert!(!state.cells.is_completed(&id));

        let mut outcome = CellOutcome::Pending;
        for _ in 0..10 {
            outcome = run_cell(&mut state, &id).await.unwrap();
            if !outcome.is_pending() {
                break;
            }
        }
        assert_eq!(outcome, CellOutcome::Completed("map every river".into()));
        assert_eq!(
            state.cells.get(&id).unwrap().output.as_deref(),
            Some("map every river")
        );

        let again = run_cell(&mut state, &id).await.unwrap();
        assert_eq!(again.output(), "map every river");
    }

    #[tokio::test]
    async fn test_failed_generation_propagates() {
        let stub = Arc::new(StubCompletion::new(|_| Err(CompletionError::transport("down"))));
        let mut state = EngineState::new(Config::for_testing(), stub);
        let id = spawn_root(&mut state, "Idea", "").unwrap();

        run_cell(&mut state, &id).await.unwrap();
        let mut result = Ok(CellOutcome::Pending);
        for _ in 0..10 {
            result = run_cell(&mut state, &id).await;
            if !matches!(result, Ok(CellOutcome::Pending)) {
                break;
            }
        }
        assert!(result.is_err());
    }
}
