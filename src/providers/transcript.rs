use anyhow::{Context, Result};
use chrono::prelude::*;
use log::info;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::config::TranscriptConfig;
use crate::core::text::clip;

/// Records every completion request and response to a timestamped file
pub struct TranscriptLogger {
    config: TranscriptConfig,

    /// Current transcript file path
    path: Option<PathBuf>,

    /// Writer for the transcript file
    file: Option<Mutex<File>>,
}

impl TranscriptLogger {
    /// Create a new transcript logger; a disabled config yields a no-op logger
    pub fn new(config: TranscriptConfig) -> Result<Self> {
        let mut logger = Self {
            config,
            path: None,
            file: None,
        };

        if logger.config.enabled {
            logger.initialize()?;
        }

        Ok(logger)
    }

    fn initialize(&mut self) -> Result<()> {
        let log_dir = Path::new(&self.config.log_dir);
        create_dir_all(log_dir)
            .with_context(|| format!("Failed to create transcript directory: {:?}", log_dir))?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f").to_string();
        let path = log_dir.join(format!("transcript_{}.txt", timestamp));

        let file = File::create(&path)
            .with_context(|| format!("Failed to create transcript file: {:?}", path))?;

        info!("Completion transcript: {:?}", path);
        self.path = Some(path);
        self.file = Some(Mutex::new(file));

        self.clean_old_transcripts()?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Log a request
    pub fn log_request(&self, model: &str, prompt: &str) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut entry = format!("\n===== REQUEST: {} =====\nTIMESTAMP: {}\n", model, timestamp);
        if self.config.include_full_prompts {
            entry.push_str(&format!("PROMPT:\n{}\n", prompt));
        } else {
            entry.push_str(&format!("PROMPT SUMMARY: {}\n", clip(prompt, 100)));
        }

        self.write(&entry)
    }

    /// Log a response
    pub fn log_response(&self, model: &str, response: &str, duration_ms: u64) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut entry = format!(
            "\n===== RESPONSE: {} =====\nTIMESTAMP: {}\nDURATION: {}ms\n",
            model, timestamp, duration_ms
        );
        if self.config.include_full_responses {
            entry.push_str(&format!("RESPONSE:\n{}\n", response));
        } else {
            entry.push_str(&format!("RESPONSE SUMMARY: {}\n", clip(response, 100)));
        }

        self.write(&entry)
    }

    fn write(&self, text: &str) -> Result<()> {
        if let Some(file) = &self.file {
            let mut guard = file
                .lock()
                .map_err(|_| anyhow::anyhow!("Failed to acquire lock on transcript file"))?;
            guard
                .write_all(text.as_bytes())
                .with_context(|| "Failed to write to transcript file")?;
            guard.flush().with_context(|| "Failed to flush transcript file")?;
        }
        Ok(())
    }

    /// Keep only the newest `log_files_to_keep` transcripts
    fn clean_old_transcripts(&self) -> Result<()> {
        let log_dir = Path::new(&self.config.log_dir);
        let entries = fs::read_dir(log_dir)
            .with_context(|| format!("Failed to read transcript directory: {:?}", log_dir))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_transcript = path.is_file()
                && path.extension().is_some_and(|ext| ext == "txt")
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("transcript_"));
            if is_transcript {
                let modified = fs::metadata(&path)?.modified()?;
                files.push((path, modified));
            }
        }

        // Newest first; file names carry the timestamp so they break ties
        files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

        for (path, _) in files.iter().skip(self.config.log_files_to_keep) {
            fs::remove_file(path)
                .with_context(|| format!("Failed to delete old transcript: {:?}", path))?;
            info!("Deleted old transcript: {:?}", path);
        }

        Ok(())
    }
}
