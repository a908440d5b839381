use crate::core::text::normalize_key;
use crate::memory::Mapping;

const MAX_SKILLS_PER_ROLE: usize = 20;

/// Skills learned per role, oldest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkillBook {
    skills: Mapping,
}

impl SkillBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mapping(skills: Mapping) -> Self {
        Self { skills }
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.skills
    }

    pub fn for_role(&self, role: &str) -> &[String] {
        self.skills.get(role).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// Remember a skill; duplicates are ignored and the oldest fall off
    /// past the cap. Returns whether it was new.
    pub fn learn(&mut self, role: &str, skill: &str) -> bool {
        let skill = skill.trim();
        if skill.is_empty() {
            return false;
        }

        let list = self.skills.entry(role.to_string()).or_default();
        let key = normalize_key(skill);
        if list.iter().any(|s| normalize_key(s) == key) {
            return false;
        }

        list.push(skill.to_string());
        if list.len() > MAX_SKILLS_PER_ROLE {
            let excess = list.len() - MAX_SKILLS_PER_ROLE;
            list.drain(..excess);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learn_dedups_and_caps() {
        let mut book = SkillBook::new();
        assert!(book.learn("Worker", "Estimate costs"));
        assert!(!book.learn("Worker", "  estimate COSTS "));
        assert!(!book.learn("Worker", ""));

        for i in 0..25 {
            book.learn("Worker", &format!("skill {}", i));
        }
        let skills = book.for_role("Worker");
        assert_eq!(skills.len(), MAX_SKILLS_PER_ROLE);
        assert_eq!(skills.last().map(String::as_str), Some("skill 24"));
        assert!(book.for_role("Director").is_empty());
    }
}
