use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashSet;

use super::{ConsensusType, RetrievalMode};
use crate::cells::CellId;
use crate::core::audit::AuditEntry;
use crate::core::config::Config;
use crate::core::error::EngineError;
use crate::core::state::EngineState;
use crate::core::text::{is_meta, normalize_key};
use crate::memory::GLOBAL_KEY;

/// Relevant facts pulled into the memory block
const MEMORY_BLOCK_SIZE: usize = 5;
/// Below this many, long-term facts are promoted to fill the block
const MEMORY_BLOCK_MIN: usize = 3;

/// Rotating perspectives, one per responder
const HINTS: &[&str] = &[
    "Think like a pragmatic engineer.",
    "Think like a skeptic looking for what could go wrong.",
    "Think like a domain expert.",
    "Think like a newcomer seeing the problem fresh.",
    "Think like a minimalist who wants the smallest answer that works.",
];

const REDUCER_PROMPT: &str = "You combine several answers into one. Never mention the answers, \
the voting, the consensus process or your reasoning. Output only the result.";

/// Openings of lines that narrate the reduction instead of answering
const PROCESS_OPENERS: &[&str] = &[
    "the answers",
    "all answers",
    "all the answers",
    "most answers",
    "the responders",
    "after reviewing",
    "based on the answers",
    "combining the answers",
    "the consensus is",
    "the consensus answer is",
];

const FRESH_FACT_PROMPT: &str = "State one new, concrete fact that would help with the mission. \
One sentence, no commentary.";

/// One consensus question
#[derive(Debug, Clone)]
pub struct ConsensusRequest {
    pub question: String,
    /// Memory pool the result is written to, besides the global one
    pub node_type: String,
    pub system_prompt: String,
    pub kind: ConsensusType,
    pub mode: RetrievalMode,
    /// Cell that asked, for the audit trail
    pub parent: Option<CellId>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

impl ConsensusRequest {
    pub fn new(question: &str, node_type: &str) -> Self {
        Self {
            question: question.to_string(),
            node_type: node_type.to_string(),
            system_prompt: String::new(),
            kind: ConsensusType::default(),
            mode: RetrievalMode::default(),
            parent: None,
            endpoint: None,
            model: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    pub fn with_kind(mut self, kind: ConsensusType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_parent(mut self, parent: CellId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_target(mut self, endpoint: &str, model: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self.model = Some(model.to_string());
        self
    }
}

/// What one responder said
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderAnswer {
    pub index: usize,
    pub hint: &'static str,
    pub answer: String,
}

/// A finished consensus round
#[derive(Debug, Clone)]
pub struct ConsensusSession {
    pub question: String,
    pub mode: RetrievalMode,
    pub kind: ConsensusType,
    /// In spawn order
    pub answers: Vec<ResponderAnswer>,
    pub result: String,
}

/// Number of case-insensitively distinct answers
pub fn distinct_answers(answers: &[ResponderAnswer]) -> usize {
    answers
        .iter()
        .map(|a| normalize_key(&a.answer))
        .collect::<HashSet<_>>()
        .len()
}

/// Spawns N responders for a question and reduces their answers
#[derive(Debug, Clone, Copy)]
pub struct Accumulator {
    pub sub_agent_count: usize,
}

impl Accumulator {
    pub fn new(sub_agent_count: usize) -> Self {
        Self { sub_agent_count }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.consensus.sub_agent_count)
    }

    /// Relevant facts from the global pool, topped up from long-term
    /// memory when short. Empty memory yields an empty block.
    async fn memory_block(&self, state: &mut EngineState, question: &str) -> Result<String> {
        let mut facts = state
            .memory
            .search_relevant(&state.llm, GLOBAL_KEY, question, MEMORY_BLOCK_SIZE)
            .await?;

        if facts.len() < MEMORY_BLOCK_MIN {
            let wanted = MEMORY_BLOCK_MIN - facts.len();
            let promoted = state
                .memory
                .promote_to_short_term(&state.llm, GLOBAL_KEY, question, wanted)
                .await?;
            for fact in promoted {
                if !facts.iter().any(|f| normalize_key(f) == normalize_key(&fact)) {
                    facts.push(fact);
                }
            }
        }

        Ok(facts
            .iter()
            .map(|f| format!("- {}", crate::memory::strip_tag(f)))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn responder_prompt(&self, request: &ConsensusRequest, index: usize) -> (String, &'static str) {
        let hint = HINTS[index % HINTS.len()];
        let mut system = String::new();
        if !request.system_prompt.is_empty() {
            system.push_str(&request.system_prompt);
            system.push('\n');
        }
        system.push_str(request.mode.framing());
        system.push('\n');
        system.push_str(hint);
        (system, hint)
    }

    pub async fn run(&self, state: &mut EngineState, request: ConsensusRequest) -> Result<ConsensusSession> {
        let depth = request
            .parent
            .as_ref()
            .map(|p| state.cells.chain_depth(p) + 1)
            .unwrap_or(0);

        // 1. memory block
        let block = if request.mode.uses_memory() {
            self.memory_block(state, &request.question).await?
        } else {
            String::new()
        };
        let user = if request.mode.uses_memory() {
            let shown = if block.is_empty() { "(empty)" } else { block.as_str() };
            format!("Memory:\n{}\n\nQuestion: {}", shown, request.question)
        } else {
            format!("Question: {}", request.question)
        };

        // 2. responders, strictly in spawn order
        let endpoint = request
            .endpoint
            .clone()
            .unwrap_or_else(|| state.llm.endpoint().to_string());
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| state.llm.model().to_string());

        let mut answers = Vec::with_capacity(self.sub_agent_count);
        for index in 0..self.sub_agent_count {
            let (system, hint) = self.responder_prompt(&request, index);
            let answer = state
                .llm
                .ask_with_fallback(&endpoint, &model, &system, &user)
                .await
                .map_err(EngineError::from)?;
            let answer = answer.trim().to_string();

            state.record(
                AuditEntry::new(
                    "consensus.subagent",
                    format!("Responder-{}", index),
                    &request.question,
                    &answer,
                )
                .with_role("Responder")
                .with_parent(request.parent.as_ref())
                .with_mode(request.mode)
                .with_depth(depth),
            );
            answers.push(ResponderAnswer { index, hint, answer });
        }

        // 3. reduction
        let listing = answers
            .iter()
            .map(|a| format!("{}. {}", a.index + 1, a.answer))
            .collect::<Vec<_>>()
            .join("\n");
        let reducer_system = format!("{} {}", REDUCER_PROMPT, request.kind.instruction());
        let reply = state
            .llm
            .ask(
                &reducer_system,
                &format!("Question: {}\nAnswers:\n{}", request.question, listing),
            )
            .await
            .map_err(EngineError::from)?;
        let result = request.kind.normalize(&strip_process_lines(&reply));

        // 4. diversity check
        if answers.len() > 1 && distinct_answers(&answers) == answers.len() {
            warn!(
                "All {} responders disagree on '{}'",
                answers.len(),
                request.question
            );
        }

        // 5. fold into memory
        self.remember(state, &request, &result).await?;

        state.record(
            AuditEntry::new("consensus.result", "Accumulator", &request.question, &result)
                .with_role("Accumulator")
                .with_parent(request.parent.as_ref())
                .with_mode(request.mode)
                .with_verdict(request.kind.to_string())
                .with_depth(depth),
        );
        info!("Consensus on '{}': {}", request.question, result);

        Ok(ConsensusSession {
            question: request.question,
            mode: request.mode,
            kind: request.kind,
            answers,
            result,
        })
    }

    async fn remember(
        &self,
        state: &mut EngineState,
        request: &ConsensusRequest,
        result: &str,
    ) -> Result<()> {
        if !result.is_empty() {
            state.memory.add_fact(&request.node_type, result);
            if request.node_type != GLOBAL_KEY {
                state.memory.add_fact(GLOBAL_KEY, result);
            }
        }

        if result.is_empty() || is_meta(result) {
            debug!("Consensus result is meta, injecting a fresh fact");
            let fact = state
                .llm
                .ask(FRESH_FACT_PROMPT, &format!("Mission: {}", state.mission))
                .await
                .map_err(EngineError::from)?;
            let fact = fact.trim();
            if !fact.is_empty() {
                state.memory.add_fact(&request.node_type, fact);
            }
        }

        let (max_short, max_long) = (
            state.config.memory.max_short_term,
            state.config.memory.max_long_term,
        );
        let mut keys = vec![request.node_type.clone()];
        if request.node_type != GLOBAL_KEY {
            keys.push(GLOBAL_KEY.to_string());
        }
        for key in keys {
            state
                .memory
                .compact(&state.llm, &key, max_short, max_long)
                .await?;
        }
        Ok(())
    }
}

/// Drop lines that narrate the reduction ("The answers agree that ...").
/// A reply made only of such lines is kept whole.
fn strip_process_lines(reply: &str) -> String {
    let lines: Vec<&str> = reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let kept: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| {
            let lower = line.to_lowercase();
            !PROCESS_OPENERS.iter().any(|opener| lower.starts_with(opener))
        })
        .collect();

    if kept.is_empty() {
        lines.join(" ")
    } else {
        kept.join(" ")
    }
}

/// One-call convenience around `Accumulator::run`
#[allow(clippy::too_many_arguments)]
pub async fn run_consensus(
    state: &mut EngineState,
    question: &str,
    endpoint: &str,
    model: &str,
    system_prompt: &str,
    kind: ConsensusType,
    mode: RetrievalMode,
) -> Result<String> {
    let request = ConsensusRequest::new(question, GLOBAL_KEY)
        .with_system_prompt(system_prompt)
        .with_kind(kind)
        .with_mode(mode)
        .with_target(endpoint, model);

    let session = Accumulator::from_config(&state.config).run(state, request).await?;
    Ok(session.result)
}
