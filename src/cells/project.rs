use anyhow::Result;
use async_trait::async_trait;
use log::info;

use super::{spawn_and_run, spawn_child, Cell, CellId, CellOutcome, Verdict};
use crate::consensus::{distinct_answers, Accumulator, ConsensusRequest, ConsensusType};
use crate::core::state::EngineState;

const PROJECT_PROMPT: &str = "You are part of a Project working on one directive of the mission. \
Say what should be done, concretely.";

/// Answers one directive by consensus, then verifies the result
pub struct Project {
    directive: String,
}

impl Project {
    pub fn new(directive: &str) -> Self {
        Self {
            directive: directive.to_string(),
        }
    }

    fn wants_team(&self) -> bool {
        self.directive.to_lowercase().contains("team")
    }

    fn wants_negotiation(&self) -> bool {
        let lower = self.directive.to_lowercase();
        lower.contains("negotiat") || lower.contains("conflict")
    }
}

#[async_trait]
impl Cell for Project {
    fn role(&self) -> &str {
        "Project"
    }

    async fn run(&mut self, id: &CellId, state: &mut EngineState) -> Result<CellOutcome> {
        let request = ConsensusRequest::new(&self.directive, "Project")
            .with_system_prompt(PROJECT_PROMPT)
            .with_kind(ConsensusType::Knowledge)
            .with_mode(state.config.consensus.retrieval_mode)
            .with_parent(id.clone());

        let session = Accumulator::from_config(&state.config)
            .run(state, request)
            .await?;

        // Keep every responder visible in the tree
        for answer in &session.answers {
            let responder = spawn_child(state, Some(id), "Responder", &self.directive)?;
            state.cells.complete(&responder, answer.answer.clone());
        }

        let check = format!("Directive: {}\nResult: {}", self.directive, session.result);
        let (_, verification) = spawn_and_run(state, Some(id), "Verification", &check).await?;
        if verification.verdict() == Some(Verdict::Failed) {
            info!("Verification failed, appealing");
            let appeal = format!("{}\nVerification: {}", check, verification.output());
            spawn_and_run(state, Some(id), "Appeal", &appeal).await?;
        }

        if self.wants_team() {
            let task = format!("{}\n\nStarting point: {}", self.directive, session.result);
            spawn_and_run(state, Some(id), "Team", &task).await?;
        }

        let distinct = distinct_answers(&session.answers);
        if self.wants_negotiation() || distinct > 2 {
            info!("{} distinct answers, negotiating", distinct);
            let listing = session
                .answers
                .iter()
                .map(|a| format!("- {}", a.answer))
                .collect::<Vec<_>>()
                .join("\n");
            let input = format!("Directive: {}\nAnswers:\n{}", self.directive, listing);
            spawn_and_run(state, Some(id), "Negotiation", &input).await?;
        }

        Ok(CellOutcome::Completed(session.result))
    }
}
