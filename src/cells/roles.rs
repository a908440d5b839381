//! Single-shot roles: a fixed system prompt applied to the cell input.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use super::{Cell, CellId, CellOutcome};
use crate::core::error::EngineError;
use crate::core::state::EngineState;

/// Static description of a prompt-driven role
#[derive(Debug)]
pub struct RoleSpec {
    pub role: &'static str,
    pub system_prompt: &'static str,
    /// Write the output into the short-term pool named after the role
    pub remember: bool,
}

pub static ROLE_SPECS: &[RoleSpec] = &[
    RoleSpec {
        role: "Evaluator",
        system_prompt: "You evaluate work against the mission. Give a short, concrete assessment.",
        remember: true,
    },
    RoleSpec {
        role: "Appeal",
        system_prompt: "A result was judged to have failed verification. Argue for a corrected result in one paragraph.",
        remember: true,
    },
    RoleSpec {
        role: "Ethics",
        system_prompt: "You review work for safety and ethical problems. List concrete issues or reply 'none'.",
        remember: true,
    },
    RoleSpec {
        role: "RedTeam",
        system_prompt: "You attack the plan. Name the most likely way it fails.",
        remember: true,
    },
    RoleSpec {
        role: "BlueTeam",
        system_prompt: "You defend the plan. Name the strongest mitigation for its weakest point.",
        remember: true,
    },
    RoleSpec {
        role: "Curriculum",
        system_prompt: "Propose the next skill the system should practise to serve the mission. One line.",
        remember: true,
    },
    RoleSpec {
        role: "Documentation",
        system_prompt: "Write brief documentation for the work described.",
        remember: false,
    },
    RoleSpec {
        role: "Negotiation",
        system_prompt: "Several answers disagree. Propose a compromise that keeps what each gets right.",
        remember: true,
    },
    RoleSpec {
        role: "Milestone",
        system_prompt: "State in one sentence what has been achieved toward the mission so far.",
        remember: true,
    },
    RoleSpec {
        role: "MetaLogger",
        system_prompt: "Summarize the engine status you are given in one line.",
        remember: false,
    },
    RoleSpec {
        role: "MissionDebate",
        system_prompt: "Decide whether the proposal should replace the current mission. Reply 'Accept' or 'Reject' followed by one sentence.",
        remember: false,
    },
    RoleSpec {
        role: "Explainer",
        system_prompt: "Explain in two sentences why the mission changed.",
        remember: false,
    },
    RoleSpec {
        role: "Chaos",
        system_prompt: "Propose one bold, concrete directive that pushes the work somewhere new. One sentence, no commentary.",
        remember: false,
    },
    RoleSpec {
        role: "SelfRepair",
        system_prompt: "The system judged its own work as failing. Propose one concrete change to fix it.",
        remember: true,
    },
    RoleSpec {
        role: "Responder",
        system_prompt: "Answer the question directly.",
        remember: false,
    },
    RoleSpec {
        role: "Critic",
        system_prompt: "Point out the single biggest weakness in the text.",
        remember: true,
    },
    RoleSpec {
        role: "Summarizer",
        system_prompt: "Condense the text to its essentials.",
        remember: false,
    },
];

pub fn spec_for(role: &str) -> Option<&'static RoleSpec> {
    ROLE_SPECS.iter().find(|spec| spec.role == role)
}

/// Runs one prompt-to-output transform
pub struct PromptCell {
    spec: &'static RoleSpec,
    input: String,
}

impl PromptCell {
    pub fn new(spec: &'static RoleSpec, input: &str) -> Self {
        Self {
            spec,
            input: input.to_string(),
        }
    }

    pub fn for_role(role: &str, input: &str) -> Result<Self, EngineError> {
        spec_for(role)
            .map(|spec| Self::new(spec, input))
            .ok_or_else(|| EngineError::UnknownCellType(role.to_string()))
    }
}

#[async_trait]
impl Cell for PromptCell {
    fn role(&self) -> &str {
        self.spec.role
    }

    async fn run(&mut self, _id: &CellId, state: &mut EngineState) -> Result<CellOutcome> {
        let prompt = format!("Mission: {}\n\n{}", state.mission, self.input);
        let output = state
            .llm
            .ask(self.spec.system_prompt, &prompt)
            .await
            .map_err(EngineError::from)?;
        let output = output.trim().to_string();

        debug!("{} produced {} chars", self.spec.role, output.len());
        if self.spec.remember && !output.is_empty() {
            state.memory.add_fact(self.spec.role, output.clone());
        }

        Ok(CellOutcome::Completed(output))
    }
}
