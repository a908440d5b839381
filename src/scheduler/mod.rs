//! Tick loop: keeps the active cell set healthy and drives memory aging,
//! emotions, mission evolution and persistence once per pass.

pub mod machine;

pub use machine::Machine;
