use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use std::sync::OnceLock;

use super::{spawn_and_run, Cell, CellId, CellOutcome};
use crate::core::error::EngineError;
use crate::core::state::EngineState;
use crate::core::text::clip;

const COMPLEX_TAG: &str = "[complex]";
const MAX_TEAM_SIZE: usize = 3;

const WORKER_PROMPT: &str = "You are a Worker. Complete the subtask you are given. Be concrete and brief.";

const TEAM_PROMPT: &str = "Split the task into at most three independent subtasks. \
One subtask per line, no numbering, no commentary.";

/// Executes one subtask
pub struct Worker {
    task: String,
}

impl Worker {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
        }
    }

    fn is_complex(&self) -> bool {
        self.task.to_lowercase().contains(COMPLEX_TAG)
    }

    /// The task with any complexity tag removed
    fn plain_task(&self) -> String {
        static COMPLEX_RE: OnceLock<Regex> = OnceLock::new();
        let re = COMPLEX_RE.get_or_init(|| Regex::new(r"(?i)\[complex\]").unwrap());
        re.replace_all(&self.task, "").trim().to_string()
    }

    fn system_prompt(&self, state: &EngineState) -> String {
        let mut prompt = WORKER_PROMPT.to_string();

        let skills = state.skills.for_role("Worker");
        if !skills.is_empty() {
            prompt.push_str("\nSkills you have practised:\n");
            for skill in skills {
                prompt.push_str(&format!("- {}\n", skill));
            }
        }

        let mood = state.emotions.annotations();
        if !mood.is_empty() {
            prompt.push_str(&format!("\nCurrent emotional state: {}", mood));
        }
        prompt
    }
}

#[async_trait]
impl Cell for Worker {
    fn role(&self) -> &str {
        "Worker"
    }

    async fn run(&mut self, id: &CellId, state: &mut EngineState) -> Result<CellOutcome> {
        let task = self.plain_task();

        let mut context = String::new();
        if self.is_complex() {
            debug!("Complex task, delegating part of it to a sub-worker");
            let (_, sub) = spawn_and_run(state, Some(id), "Worker", &task).await?;
            context = format!("\n\nA sub-worker already found: {}", sub.output());
        }

        let system = self.system_prompt(state);
        let prompt = format!("Mission: {}\n\nSubtask: {}{}", state.mission, task, context);
        let output = state
            .llm
            .ask(&system, &prompt)
            .await
            .map_err(EngineError::from)?;
        let output = output.trim().to_string();

        if output.is_empty() {
            state.emotions.nudge("frustration", 0.25);
        } else {
            state.emotions.nudge("satisfaction", 0.1);
            state.emotions.nudge("frustration", -0.05);
            state.skills.learn("Worker", &clip(&task, 80));
            state.memory.add_fact("Worker", output.clone());
        }

        Ok(CellOutcome::Completed(output))
    }
}

/// Splits a task into subtasks and runs a Worker for each
pub struct Team {
    task: String,
}

impl Team {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
        }
    }
}

/// Non-empty lines with list markers removed
fn subtasks(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_TEAM_SIZE)
        .collect()
}

#[async_trait]
impl Cell for Team {
    fn role(&self) -> &str {
        "Team"
    }

    async fn run(&mut self, id: &CellId, state: &mut EngineState) -> Result<CellOutcome> {
        let reply = state
            .llm
            .ask(TEAM_PROMPT, &self.task)
            .await
            .map_err(EngineError::from)?;

        let parts = subtasks(&reply);
        info!("Team split task into {} subtasks", parts.len());

        let mut outputs = Vec::with_capacity(parts.len());
        for part in &parts {
            let (_, outcome) = spawn_and_run(state, Some(id), "Worker", part).await?;
            outputs.push(outcome.output().to_string());
        }

        Ok(CellOutcome::Completed(outputs.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::providers::stub::StubCompletion;
    use std::sync::Arc;

    #[test]
    fn test_plain_task_strips_tag() {
        assert_eq!(Worker::new("[Complex] design the API").plain_task(), "design the API");
        assert!(Worker::new("x [COMPLEX]").is_complex());
        assert!(!Worker::new("simple").is_complex());
    }

    #[test]
    fn test_subtasks_parsing() {
        let parts = subtasks("1. plan\n- build\n\n* test\n4) ship");
        assert_eq!(parts, vec!["plan", "build", "test"]);
    }

    #[tokio::test]
    async fn test_worker_learns_and_includes_skills() {
        let stub = Arc::new(StubCompletion::constant("done"));
        let mut state = EngineState::new(Config::for_testing(), stub.clone());

        let (_, first) = spawn_and_run(&mut state, None, "Worker", "count sheep").await.unwrap();
        assert_eq!(first.output(), "done");
        assert_eq!(state.skills.for_role("Worker"), &["count sheep".to_string()]);
        assert!(state.emotions.level("satisfaction") > 0.0);

        spawn_and_run(&mut state, None, "Worker", "count goats").await.unwrap();
        assert!(stub.calls()[1].system_text().contains("count sheep"));
    }

    #[tokio::test]
    async fn test_complex_worker_spawns_one_sub_worker() {
        let stub = Arc::new(StubCompletion::constant("ok"));
        let mut state = EngineState::new(Config::for_testing(), stub.clone());

        let (id, _) = spawn_and_run(&mut state, None, "Worker", "[complex] map the city")
            .await
            .unwrap();

        let children = state.cells.children(&id).to_vec();
        assert_eq!(children.len(), 1);
        let child = state.cells.get(&children[0]).unwrap();
        assert_eq!(child.input, "map the city");
        assert!(child.is_completed());
        assert!(state.cells.children(&children[0]).is_empty());
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_output_raises_frustration() {
        let stub = Arc::new(StubCompletion::constant("   "));
        let mut state = EngineState::new(Config::for_testing(), stub);

        spawn_and_run(&mut state, None, "Worker", "anything").await.unwrap();
        assert!(state.emotions.level("frustration") > 0.0);
        assert!(state.skills.for_role("Worker").is_empty());
    }

    #[tokio::test]
    async fn test_team_runs_a_worker_per_subtask() {
        let stub = Arc::new(StubCompletion::new(|req| {
            if req.system_text().contains("Split the task") {
                Ok("a\nb\nc\nd".into())
            } else {
                Ok("part done".into())
            }
        }));
        let mut state = EngineState::new(Config::for_testing(), stub);

        let (id, outcome) = spawn_and_run(&mut state, None, "Team", "launch").await.unwrap();
        assert_eq!(state.cells.children(&id).len(), 3);
        assert_eq!(outcome.output().lines().count(), 3);
    }
}
