//! Tiered fact memory: volatile short-term lists, compressed long-term lists
//! and the provenance of every synthesized blob.

pub mod persistence;
pub mod store;

pub use persistence::{Mapping, MemoryPersistence};
pub use store::{compression_tag, dedup, strip_tag, tag, MemoryStore, GLOBAL_KEY};
