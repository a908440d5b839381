use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One immutable record of something the engine did
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub step: String,
    pub agent: String,
    pub role: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub verdict: Option<String>,
    #[serde(default)]
    pub retrieval_mode: Option<String>,
    #[serde(default)]
    pub passed: Option<bool>,
    pub timestamp: DateTime<Utc>,
    /// Distance from the Director
    #[serde(default)]
    pub depth: usize,
}

impl AuditEntry {
    pub fn new(
        step: impl Into<String>,
        agent: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        let agent = agent.into();
        Self {
            step: step.into(),
            role: agent.clone(),
            agent,
            parent_id: None,
            question: question.into(),
            answer: answer.into(),
            expected: None,
            verdict: None,
            retrieval_mode: None,
            passed: None,
            timestamp: Utc::now(),
            depth: 0,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_parent(mut self, parent: Option<impl ToString>) -> Self {
        self.parent_id = parent.map(|p| p.to_string());
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_verdict(mut self, verdict: impl Into<String>) -> Self {
        self.verdict = Some(verdict.into());
        self
    }

    pub fn with_mode(mut self, mode: impl ToString) -> Self {
        self.retrieval_mode = Some(mode.to_string());
        self
    }

    pub fn with_pass(mut self, passed: bool) -> Self {
        self.passed = Some(passed);
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
}

/// Append-only audit sink. Entries live in memory until `flush` appends them
/// as JSON lines to the backing file.
pub struct AuditLog {
    entries: Vec<AuditEntry>,

    /// Number of leading entries already written to disk
    flushed: usize,

    path: Option<PathBuf>,

    /// Writer for the log file, shared with any asynchronous reader/writer
    file: Option<Arc<Mutex<File>>>,
}

impl AuditLog {
    /// Audit log that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            flushed: 0,
            path: None,
            file: None,
        }
    }

    /// Open (or create) a JSON-lines audit file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create audit directory: {:?}", dir))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit log: {:?}", path))?;

        info!("Audit log at {:?}", path);

        Ok(Self {
            entries: Vec::new(),
            flushed: 0,
            path: Some(path),
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// Append an entry
    pub fn record(&mut self, entry: AuditEntry) {
        debug!("[audit] {} by {}: {}", entry.step, entry.agent, entry.answer);
        self.entries.push(entry);
    }

    /// Entries recorded by this process, oldest first
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Write unflushed entries to disk
    pub fn flush(&mut self) -> Result<()> {
        let Some(file) = &self.file else {
            self.flushed = self.entries.len();
            return Ok(());
        };

        if self.flushed == self.entries.len() {
            return Ok(());
        }

        let mut buf = String::new();
        for entry in &self.entries[self.flushed..] {
            buf.push_str(&serde_json::to_string(entry).context("Failed to serialize audit entry")?);
            buf.push('\n');
        }

        let mut guard = file
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to acquire lock on audit log"))?;
        guard
            .write_all(buf.as_bytes())
            .with_context(|| "Failed to write to audit log")?;
        guard.flush().with_context(|| "Failed to flush audit log")?;

        self.flushed = self.entries.len();
        Ok(())
    }

    /// Everything ever recorded: the file contents followed by entries not
    /// yet flushed
    pub fn load_all(&self) -> Result<Vec<AuditEntry>> {
        let Some(path) = &self.path else {
            return Ok(self.entries.clone());
        };

        let mut out = Vec::new();
        if path.exists() {
            let _guard = self
                .file
                .as_ref()
                .map(|f| f.lock())
                .transpose()
                .map_err(|_| anyhow::anyhow!("Failed to acquire lock on audit log"))?;

            let reader = BufReader::new(
                File::open(path).with_context(|| format!("Failed to open audit log: {:?}", path))?,
            );
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: AuditEntry = serde_json::from_str(&line)
                    .with_context(|| format!("Corrupt audit line: {}", line))?;
                out.push(entry);
            }
        }

        out.extend(self.entries[self.flushed..].iter().cloned());
        Ok(out)
    }
}
