use anyhow::{Context, Result};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use super::store::MemoryStore;

/// Named mapping of string lists, the unit the engine persists
pub type Mapping = BTreeMap<String, Vec<String>>;

const SHORT_TERM_KEY: &str = "short_term";
const LONG_TERM_KEY: &str = "long_term";
const COMPRESSION_KEY: &str = "compression_mapping";

/// JSON documents under one data directory, one file per key
#[derive(Debug, Clone)]
pub struct MemoryPersistence {
    data_dir: PathBuf,
}

impl MemoryPersistence {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", key))
    }

    /// Load a mapping; an absent key is an empty mapping
    pub fn load_mapping(&self, key: &str) -> Result<Mapping> {
        self.load_document(key)
    }

    pub fn save_mapping(&self, key: &str, mapping: &Mapping) -> Result<()> {
        self.save_document(key, mapping)
    }

    /// Load any JSON document, falling back to `T::default()` when absent
    pub fn load_document<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        let path = self.file_path(key);
        if !path.exists() {
            debug!("No document for '{}' at {:?}, starting empty", key, path);
            return Ok(T::default());
        }

        let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
        let value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to deserialize {:?}", path))?;
        Ok(value)
    }

    /// Write a JSON document through a temporary file and an atomic rename
    pub fn save_document<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;

        let path = self.file_path(key);
        let temp_path = path.with_extension("tmp");

        let file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temporary file: {:?}", temp_path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), value)
            .with_context(|| format!("Failed to serialize '{}'", key))?;

        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to rename temporary file to {:?}", path))?;
        Ok(())
    }

    pub fn save_store(&self, store: &MemoryStore) -> Result<()> {
        self.save_mapping(SHORT_TERM_KEY, &store.short_term)?;
        self.save_mapping(LONG_TERM_KEY, &store.long_term)?;
        self.save_mapping(COMPRESSION_KEY, &store.compression_mapping)?;
        Ok(())
    }

    pub fn load_store(&self, recompression_window_secs: u64) -> Result<MemoryStore> {
        let mut store = MemoryStore::new().with_recompression_window(recompression_window_secs);
        store.short_term = self.load_mapping(SHORT_TERM_KEY)?;
        store.long_term = self.load_mapping(LONG_TERM_KEY)?;
        store.compression_mapping = self.load_mapping(COMPRESSION_KEY)?;

        info!(
            "Loaded memory: {} short-term keys, {} long-term keys",
            store.short_term.len(),
            store.long_term.len()
        );
        Ok(store)
    }
}
