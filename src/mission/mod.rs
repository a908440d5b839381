//! The mission string, its history and the vote that evolves it.

pub mod concert;
pub mod history;

pub use concert::{is_meaningful_change, rollback_mission, select_best, slices, ReflectionConcert};
pub use history::{MissionHistory, MissionRecord};

pub use crate::core::text::edit_distance;
