use std::collections::BTreeMap;

use super::director::Director;
use super::idea::Idea;
use super::judge::JudgeCell;
use super::project::Project;
use super::roles::{PromptCell, ROLE_SPECS};
use super::worker::{Team, Worker};
use super::Cell;
use crate::core::error::EngineError;

type Constructor = Box<dyn Fn(&str) -> Box<dyn Cell> + Send + Sync>;

/// Role tag to constructor. New roles are registrations, not dispatcher edits.
pub struct CellFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl CellFactory {
    /// A factory that knows no roles
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Every built-in role
    pub fn standard() -> Self {
        let mut factory = Self::empty();

        factory.register("Director", |_| Box::new(Director::new()));
        factory.register("Project", |input| Box::new(Project::new(input)));
        factory.register("Worker", |input| Box::new(Worker::new(input)));
        factory.register("Team", |input| Box::new(Team::new(input)));
        factory.register("Idea", |input| Box::new(Idea::new(input)));
        factory.register("Verification", |input| Box::new(JudgeCell::verification(input)));
        factory.register("SelfAssessment", |input| Box::new(JudgeCell::self_assessment(input)));

        for spec in ROLE_SPECS {
            factory.register(spec.role, move |input| Box::new(PromptCell::new(spec, input)));
        }

        factory
    }

    pub fn register<F>(&mut self, role: &str, constructor: F)
    where
        F: Fn(&str) -> Box<dyn Cell> + Send + Sync + 'static,
    {
        self.constructors.insert(role.to_string(), Box::new(constructor));
    }

    pub fn create(&self, role: &str, input: &str) -> Result<Box<dyn Cell>, EngineError> {
        self.constructors
            .get(role)
            .map(|constructor| constructor(input))
            .ok_or_else(|| EngineError::UnknownCellType(role.to_string()))
    }

    pub fn knows(&self, role: &str) -> bool {
        self.constructors.contains_key(role)
    }

    pub fn roles(&self) -> Vec<&str> {
        self.constructors.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for CellFactory {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_roles_resolve_to_matching_behaviour() {
        let factory = CellFactory::standard();
        for role in factory.roles() {
            let cell = factory.create(role, "input").unwrap();
            assert_eq!(cell.role(), role);
        }
        for role in ["Director", "Project", "Worker", "Idea", "Evaluator", "Chaos", "MissionDebate"] {
            assert!(factory.knows(role), "missing {}", role);
        }
    }

    #[test]
    fn test_unknown_role_is_an_error() {
        let factory = CellFactory::standard();
        assert!(matches!(
            factory.create("Pilot", ""),
            Err(EngineError::UnknownCellType(role)) if role == "Pilot"
        ));
    }

    #[test]
    fn test_registration_adds_roles() {
        let mut factory = CellFactory::empty();
        assert!(factory.create("Evaluator", "").is_err());
        factory.register("Evaluator", |input| {
            Box::new(PromptCell::for_role("Evaluator", input).unwrap())
        });
        assert!(factory.create("Evaluator", "x").is_ok());
    }
}
