use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use std::collections::VecDeque;

use super::{run_cell, spawn_and_run, spawn_child, Cell, CellId, CellOutcome, Verdict};
use crate::core::state::EngineState;
use crate::core::text::is_degenerate_mission;

/// Root cell. Turns the mission into directives, one Project per run, and
/// asks for new ideas when it runs dry.
pub struct Director {
    queue: VecDeque<String>,
    seeded: bool,
    /// Idea cell dispatched on an earlier run
    pending_idea: Option<CellId>,
    post_processed: bool,
}

impl Director {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            seeded: false,
            pending_idea: None,
            post_processed: false,
        }
    }

    async fn seed(&mut self, id: &CellId, state: &mut EngineState) -> Result<()> {
        let directive = if is_degenerate_mission(&state.mission) {
            warn!("Mission '{}' is degenerate, asking Chaos for a directive", state.mission);
            let mission = state.mission.clone();
            let (_, outcome) = spawn_and_run(state, Some(id), "Chaos", &mission).await?;
            outcome.output().to_string()
        } else {
            state.mission.clone()
        };

        if !directive.trim().is_empty() {
            self.queue.push_back(directive);
        }
        self.seeded = true;
        Ok(())
    }

    /// Drive the pending Idea; enqueue its output once it has one
    async fn poll_idea(&mut self, state: &mut EngineState) -> Result<()> {
        let Some(idea) = self.pending_idea.clone() else {
            return Ok(());
        };

        if !state.cells.is_completed(&idea) {
            run_cell(state, &idea).await?;
        }

        if let Some(node) = state.cells.get(&idea).filter(|n| n.is_completed()) {
            if let Some(directive) = node.output.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
                info!("New directive from idea: {}", directive);
                self.queue.push_back(directive.to_string());
            }
            self.pending_idea = None;
        }
        Ok(())
    }

    fn children_done(id: &CellId, state: &EngineState) -> bool {
        state
            .cells
            .children(id)
            .iter()
            .all(|child| state.cells.is_completed(child))
    }

    /// Outputs of the Projects run so far, newest last
    fn project_summary(id: &CellId, state: &EngineState) -> String {
        state
            .cells
            .children(id)
            .iter()
            .filter_map(|child| state.cells.get(child))
            .filter(|node| node.role == "Project")
            .filter_map(|node| node.output.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reviews that run once, after the first completion
    async fn post_process(&mut self, id: &CellId, state: &mut EngineState, summary: &str) -> Result<()> {
        let (_, assessment) = spawn_and_run(state, Some(id), "SelfAssessment", summary).await?;
        if assessment.verdict() == Some(Verdict::Failed) {
            let input = format!("Work:\n{}\n\nAssessment: {}", summary, assessment.output());
            spawn_and_run(state, Some(id), "SelfRepair", &input).await?;
        }

        for role in ["Ethics", "RedTeam", "BlueTeam"] {
            spawn_and_run(state, Some(id), role, summary).await?;
        }

        self.post_processed = true;
        Ok(())
    }
}

impl Default for Director {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cell for Director {
    fn role(&self) -> &str {
        "Director"
    }

    async fn run(&mut self, id: &CellId, state: &mut EngineState) -> Result<CellOutcome> {
        if !self.seeded {
            self.seed(id, state).await?;
        }

        self.poll_idea(state).await?;

        if let Some(directive) = self.queue.pop_front() {
            info!("Director starting project: {}", directive);
            spawn_and_run(state, Some(id), "Project", &directive).await?;
            return Ok(CellOutcome::Pending);
        }

        if self.pending_idea.is_some() {
            return Ok(CellOutcome::Pending);
        }

        let mut outcome = CellOutcome::Pending;
        if !self.post_processed && Self::children_done(id, state) {
            let summary = Self::project_summary(id, state);
            info!("Director finished its directives");
            self.post_process(id, state, &summary).await?;
            outcome = CellOutcome::Completed(summary);
        }

        // The Director never stops; keep asking for work
        let idea = spawn_child(state, Some(id), "Idea", "")?;
        run_cell(state, &idea).await?;
        self.pending_idea = Some(idea);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::spawn_root;
    use crate::core::config::Config;
    use crate::providers::stub::StubCompletion;
    use std::sync::Arc;

    fn roles_of_children(state: &EngineState, id: &CellId) -> Vec<String> {
        state
            .cells
            .children(id)
            .iter()
            .filter_map(|c| state.cells.get(c))
            .map(|n| n.role.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_first_run_starts_one_project_from_mission() {
        let stub = Arc::new(StubCompletion::constant("VERIFIED short"));
        let mut config = Config::for_testing();
        config.consensus.sub_agent_count = 2;
        let mut state = EngineState::new(config, stub);
        let director = spawn_root(&mut state, "Director", "").unwrap();

        let outcome = run_cell(&mut state, &director).await.unwrap();
        assert!(outcome.is_pending());
        assert_eq!(roles_of_children(&state, &director), vec!["Project"]);
        let project = &state.cells.children(&director)[0];
        assert_eq!(state.cells.get(project).unwrap().input, "Say as little as possible.");
    }

    #[tokio::test]
    async fn test_degenerate_mission_seeds_from_chaos() {
        let stub = Arc::new(StubCompletion::new(|req| {
            if req.system_text().contains("bold, concrete directive") {
                Ok("Build a kite".into())
            } else {
                Ok("VERIFIED".into())
            }
        }));
        let mut config = Config::for_testing();
        config.consensus.sub_agent_count = 1;
        let mut state = EngineState::new(config, stub);
        state.mission = "summarize everything".into();
        let director = spawn_root(&mut state, "Director", "").unwrap();

        run_cell(&mut state, &director).await.unwrap();
        let roles = roles_of_children(&state, &director);
        assert_eq!(roles, vec!["Chaos", "Project"]);
        let project = &state.cells.children(&director)[1];
        assert_eq!(state.cells.get(project).unwrap().input, "Build a kite");
    }

    #[tokio::test]
    async fn test_completes_once_then_keeps_generating_ideas() {
        let stub = Arc::new(StubCompletion::constant("VERIFIED fine"));
        let mut config = Config::for_testing();
        config.consensus.sub_agent_count = 1;
        let mut state = EngineState::new(config, stub);
        let director = spawn_root(&mut state, "Director", "").unwrap();

        run_cell(&mut state, &director).await.unwrap();
        let second = run_cell(&mut state, &director).await.unwrap();
        assert!(matches!(second, CellOutcome::Completed(_)));
        assert!(state.cells.is_completed(&director));

        let roles = roles_of_children(&state, &director);
        for role in ["SelfAssessment", "Ethics", "RedTeam", "BlueTeam", "Idea"] {
            assert!(roles.iter().any(|r| r == role), "missing {}", role);
        }
        assert!(!roles.iter().any(|r| r == "SelfRepair"));

        // Idea resolves on the next run and becomes a second Project
        let third = run_cell(&mut state, &director).await.unwrap();
        assert!(third.is_pending());
        let projects = roles_of_children(&state, &director)
            .into_iter()
            .filter(|r| r == "Project")
            .count();
        assert_eq!(projects, 2);

        let assessments = roles_of_children(&state, &director)
            .into_iter()
            .filter(|r| r == "SelfAssessment")
            .count();
        assert_eq!(assessments, 1);
    }
}
