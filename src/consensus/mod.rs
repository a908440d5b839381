//! Many independent answers reduced to one.

use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::core::error::EngineError;

pub mod accumulator;

pub use accumulator::{
    distinct_answers, run_consensus, Accumulator, ConsensusRequest, ConsensusSession,
    ResponderAnswer,
};

/// Where responders may draw knowledge from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetrievalMode {
    /// The model's own knowledge, no memory block
    ModelOnly,
    /// Only what memory holds
    MemoryOnly,
    /// Memory plus the model's knowledge
    #[default]
    Hybrid,
}

impl RetrievalMode {
    pub fn uses_memory(&self) -> bool {
        !matches!(self, RetrievalMode::ModelOnly)
    }

    /// Framing placed in every responder prompt
    pub fn framing(&self) -> &'static str {
        match self {
            RetrievalMode::ModelOnly => "Answer from your own knowledge only.",
            RetrievalMode::MemoryOnly => {
                "Answer only from the memory given. If it holds nothing useful, say so in a few words."
            }
            RetrievalMode::Hybrid => "Combine the memory given with your own knowledge.",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetrievalMode::ModelOnly => "ModelOnly",
            RetrievalMode::MemoryOnly => "MemoryOnly",
            RetrievalMode::Hybrid => "Hybrid",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for RetrievalMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "modelonly" | "model" => Ok(RetrievalMode::ModelOnly),
            "memoryonly" | "memory" => Ok(RetrievalMode::MemoryOnly),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(EngineError::Config(format!("unknown retrieval mode '{}'", other))),
        }
    }
}

/// Shape of a consensus result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConsensusType {
    Word,
    Number,
    Bool,
    #[default]
    Knowledge,
}

impl ConsensusType {
    /// Reduction instruction for the judge call
    pub fn instruction(&self) -> &'static str {
        match self {
            ConsensusType::Word => "Reply with a single word.",
            ConsensusType::Number => "Reply with a single number.",
            ConsensusType::Bool => "Reply with True or False.",
            ConsensusType::Knowledge => "Reply with a single sentence.",
        }
    }

    /// Coerce a reducer reply into the shape this type promises
    pub fn normalize(&self, reply: &str) -> String {
        let text = reply.trim();
        match self {
            ConsensusType::Word => text
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string(),
            ConsensusType::Number => number_pattern()
                .find(text)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| text.to_string()),
            ConsensusType::Bool => match parse_bool(text) {
                Ok(true) => "True".to_string(),
                Ok(false) => "False".to_string(),
                Err(e) => {
                    warn!("{}; defaulting to False", e);
                    "False".to_string()
                }
            },
            ConsensusType::Knowledge => text.to_string(),
        }
    }
}

fn number_pattern() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap())
}

/// Read a yes/no reply from its first word only
pub fn parse_bool(reply: &str) -> Result<bool, EngineError> {
    let first = reply
        .split(|c: char| !c.is_alphanumeric())
        .find(|word| !word.is_empty())
        .unwrap_or("")
        .to_lowercase();

    match first.as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        _ => Err(EngineError::MalformedProposal(format!(
            "'{}' is not a yes/no answer",
            reply.trim()
        ))),
    }
}

impl fmt::Display for ConsensusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsensusType::Word => "Word",
            ConsensusType::Number => "Number",
            ConsensusType::Bool => "Bool",
            ConsensusType::Knowledge => "Knowledge",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ConsensusType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "word" => Ok(ConsensusType::Word),
            "number" => Ok(ConsensusType::Number),
            "bool" | "boolean" => Ok(ConsensusType::Bool),
            "knowledge" => Ok(ConsensusType::Knowledge),
            other => Err(EngineError::Config(format!("unknown consensus type '{}'", other))),
        }
    }
}
