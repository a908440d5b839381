use anyhow::Result;
use async_trait::async_trait;
use log::info;

use super::{Cell, CellId, CellOutcome, Verdict};
use crate::core::error::EngineError;
use crate::core::state::EngineState;

const VERIFICATION_PROMPT: &str = "You verify results. Start your reply with exactly one of \
VERIFIED, FAILED or AMBIGUOUS, then give one sentence of justification.";

const SELF_ASSESSMENT_PROMPT: &str = "You assess the system's own recent work against its mission. \
Start your reply with exactly one of VERIFIED, FAILED or AMBIGUOUS, then one sentence.";

/// A stage that returns a classification alongside its output
pub struct JudgeCell {
    role: &'static str,
    system_prompt: &'static str,
    input: String,
}

impl JudgeCell {
    pub fn verification(input: &str) -> Self {
        Self {
            role: "Verification",
            system_prompt: VERIFICATION_PROMPT,
            input: input.to_string(),
        }
    }

    pub fn self_assessment(input: &str) -> Self {
        Self {
            role: "SelfAssessment",
            system_prompt: SELF_ASSESSMENT_PROMPT,
            input: input.to_string(),
        }
    }
}

#[async_trait]
impl Cell for JudgeCell {
    fn role(&self) -> &str {
        self.role
    }

    async fn run(&mut self, _id: &CellId, state: &mut EngineState) -> Result<CellOutcome> {
        let prompt = format!("Mission: {}\n\n{}", state.mission, self.input);
        let reply = state
            .llm
            .ask(self.system_prompt, &prompt)
            .await
            .map_err(EngineError::from)?;

        let output = reply.trim().to_string();
        let verdict = Verdict::classify(&output);
        info!("{} verdict: {}", self.role, verdict.as_str());

        Ok(CellOutcome::Judged { output, verdict })
    }
}
