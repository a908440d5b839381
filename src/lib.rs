pub mod cells;
pub mod consensus;
pub mod core;
pub mod memory;
pub mod mission;
pub mod providers;
pub mod scheduler;
