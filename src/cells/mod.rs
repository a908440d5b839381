// File: src/cells/mod.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

use crate::core::audit::AuditEntry;
use crate::core::state::EngineState;

pub mod director;
pub mod emotion;
pub mod factory;
pub mod idea;
pub mod judge;
pub mod project;
pub mod roles;
pub mod skills;
pub mod tree;
pub mod worker;

pub use emotion::EmotionState;
pub use factory::CellFactory;
pub use skills::SkillBook;
pub use tree::{CellId, CellNode, CellTree};

/// How a stage judged the work it was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Failed,
    Ambiguous,
}

impl Verdict {
    /// Read the leading VERIFIED / FAILED / AMBIGUOUS token of a reply.
    /// Anything else is ambiguous.
    pub fn classify(text: &str) -> Self {
        let first = text
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_uppercase();

        match first.as_str() {
            "VERIFIED" | "VERIFY" | "PASS" | "PASSED" => Verdict::Verified,
            "FAILED" | "FAIL" | "FAILURE" => Verdict::Failed,
            _ => Verdict::Ambiguous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Verified => "Verified",
            Verdict::Failed => "Failed",
            Verdict::Ambiguous => "Ambiguous",
        }
    }
}

/// Result of one `run` call
#[derive(Debug, Clone, PartialEq)]
pub enum CellOutcome {
    /// Work finished; the output is final
    Completed(String),
    /// Work finished with a classification the caller can act on
    Judged { output: String, verdict: Verdict },
    /// Still waiting on something; run again next tick
    Pending,
}

impl CellOutcome {
    pub fn output(&self) -> &str {
        match self {
            CellOutcome::Completed(output) | CellOutcome::Judged { output, .. } => output,
            CellOutcome::Pending => "",
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            CellOutcome::Judged { verdict, .. } => Some(*verdict),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CellOutcome::Pending)
    }
}

/// A unit of agentic work. Implementations hold only their private
/// progress; identity and links live in the `CellTree`.
#[async_trait]
pub trait Cell: Send + Sync {
    /// Role tag this behaviour was registered under
    fn role(&self) -> &str;

    /// Do (a slice of) the work. Safe to call again after completion.
    async fn run(&mut self, id: &CellId, state: &mut EngineState) -> Result<CellOutcome>;
}

/// Create a cell through the factory and link it under `parent`
pub fn spawn_child(
    state: &mut EngineState,
    parent: Option<&CellId>,
    role: &str,
    input: &str,
) -> Result<CellId> {
    let behavior = state.factory.create(role, input)?;
    let node = CellNode::new(role, input, parent.cloned());
    Ok(state.cells.insert(node, behavior))
}

/// Create a cell with no parent
pub fn spawn_root(state: &mut EngineState, role: &str, input: &str) -> Result<CellId> {
    spawn_child(state, None, role, input)
}

/// Spawn a child and run it once
pub async fn spawn_and_run(
    state: &mut EngineState,
    parent: Option<&CellId>,
    role: &str,
    input: &str,
) -> Result<(CellId, CellOutcome)> {
    let id = spawn_child(state, parent, role, input)?;
    let outcome = run_cell(state, &id).await?;
    Ok((id, outcome))
}

/// Run one cell: take its behaviour out of the arena, run it against the
/// engine, put it back, and stamp the first final output.
pub fn run_cell<'a>(
    state: &'a mut EngineState,
    id: &'a CellId,
) -> Pin<Box<dyn Future<Output = Result<CellOutcome>> + Send + 'a>> {
    Box::pin(async move {
        let mut behavior = state
            .cells
            .take_behavior(id)
            .ok_or_else(|| anyhow!("Cell {} is unknown or already running", id))?;

        let result = behavior.run(id, state).await;
        state.cells.restore_behavior(id, behavior);
        let outcome = result?;

        if !outcome.is_pending() && state.cells.complete(id, outcome.output()) {
            let (role, input, parent) = match state.cells.get(id) {
                Some(node) => (node.role.clone(), node.input.clone(), node.parent.clone()),
                None => return Ok(outcome),
            };
            let depth = state.cells.chain_depth(id);

            let mut entry = AuditEntry::new("cell.run", id.to_string(), input, outcome.output())
                .with_role(role)
                .with_parent(parent)
                .with_depth(depth);
            if let Some(verdict) = outcome.verdict() {
                entry = entry
                    .with_verdict(verdict.as_str())
                    .with_pass(verdict != Verdict::Failed);
            }
            state.record(entry);
        }

        Ok(outcome)
    })
}
