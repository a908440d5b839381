use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use crate::core::error::EngineError;
use crate::core::text::normalize_key;
use crate::providers::Llm;

/// Pool every consensus result is also written to
pub const GLOBAL_KEY: &str = "Global";

const TAG_PREFIX: &str = "[COMPRESSED|";

const DISTILL_PROMPT: &str = "You merge lists of facts into one concise fact. \
Reply with a single sentence that keeps every concrete detail. No preamble.";

const COMPRESS_PROMPT: &str = "You compress lists of facts. Reply with one fact per line, \
no numbering, no commentary. Never repeat a fact.";

const SCORE_PROMPT: &str = "Rate how relevant the fact is to the query on a scale from 0 to 10. \
Reply with a single integer.";

fn default_window_secs() -> u64 {
    3600
}

/// Two keyed tiers of ordered facts plus blob provenance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryStore {
    #[serde(default)]
    pub short_term: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub long_term: BTreeMap<String, Vec<String>>,

    /// Synthesized blob to the raw facts it summarizes
    #[serde(default)]
    pub compression_mapping: BTreeMap<String, Vec<String>>,

    /// Tagged blobs younger than this are not summarized again
    #[serde(skip, default = "default_window_secs")]
    recompression_window_secs: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            short_term: BTreeMap::new(),
            long_term: BTreeMap::new(),
            compression_mapping: BTreeMap::new(),
            recompression_window_secs: default_window_secs(),
        }
    }
}

/// Prefix `text` with a compression tag stamped at `at`
pub fn tag(text: &str, at: DateTime<Utc>) -> String {
    format!("{}{}] {}", TAG_PREFIX, at.to_rfc3339(), text.trim())
}

/// Timestamp of a compression tag, if the fact carries a well-formed one
pub fn compression_tag(fact: &str) -> Option<DateTime<Utc>> {
    let rest = fact.trim_start().strip_prefix(TAG_PREFIX)?;
    let end = rest.find(']')?;
    DateTime::parse_from_rfc3339(&rest[..end])
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// The fact without its compression tag
pub fn strip_tag(fact: &str) -> &str {
    let trimmed = fact.trim_start();
    if let Some(rest) = trimmed.strip_prefix(TAG_PREFIX) {
        if let Some(end) = rest.find(']') {
            return rest[end + 1..].trim();
        }
    }
    fact.trim()
}

/// Case-insensitive trimmed dedup. First occurrence wins, empties are dropped.
pub fn dedup(facts: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    facts
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .filter(|f| seen.insert(normalize_key(f)))
        .map(|f| f.to_string())
        .collect()
}

fn score_pattern() -> &'static Regex {
    static SCORE_RE: OnceLock<Regex> = OnceLock::new();
    SCORE_RE.get_or_init(|| Regex::new(r"-?\d+").unwrap())
}

fn bullet_pattern() -> &'static Regex {
    static BULLET_RE: OnceLock<Regex> = OnceLock::new();
    BULLET_RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•]+|\d+[.)])\s*").unwrap())
}

/// First integer in a scoring reply, clamped to 0..=10
pub fn parse_score(reply: &str) -> Result<u8, EngineError> {
    let found = score_pattern()
        .find(reply)
        .ok_or_else(|| EngineError::MalformedProposal(format!("no score in '{}'", reply.trim())))?
        .as_str();
    if found.starts_with('-') {
        return Ok(0);
    }
    // Only overflow can fail here; anything that long is above the cap
    Ok(found.parse::<u64>().map_or(10, |value| value.min(10) as u8))
}

/// Model reply split into facts, with list markers removed
fn parse_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| bullet_pattern().replace(line, "").to_string())
        .map(|line| strip_tag(&line).to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recompression_window(mut self, secs: u64) -> Self {
        self.recompression_window_secs = secs;
        self
    }

    pub fn add_fact(&mut self, key: &str, fact: impl Into<String>) {
        self.short_term
            .entry(key.to_string())
            .or_default()
            .push(fact.into());
    }

    pub fn short_term(&self, key: &str) -> &[String] {
        self.short_term.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn long_term(&self, key: &str) -> &[String] {
        self.long_term.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn keys_short_term(&self) -> Vec<String> {
        self.short_term.keys().cloned().collect()
    }

    pub fn keys_long_term(&self) -> Vec<String> {
        self.long_term.keys().cloned().collect()
    }

    pub fn snapshot_short_term(&self) -> BTreeMap<String, Vec<String>> {
        self.short_term.clone()
    }

    pub fn restore_short_term(&mut self, snapshot: BTreeMap<String, Vec<String>>) {
        self.short_term = snapshot;
    }

    /// Dedup both tiers of `key` and move short-term overflow into one
    /// distilled long-term fact. The newest `max_short_term` facts stay.
    pub async fn compact(
        &mut self,
        llm: &Llm,
        key: &str,
        max_short_term: usize,
        max_long_term: usize,
    ) -> Result<()> {
        let mut short = dedup(self.short_term(key));

        if short.len() > max_short_term {
            let cut = short.len() - max_short_term;
            let overflow: Vec<String> = short.drain(..cut).collect();

            let listing = overflow
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n");
            let reply = llm
                .ask(DISTILL_PROMPT, &format!("Facts:\n{}", listing))
                .await
                .map_err(EngineError::from)?;

            let distilled = match reply.trim() {
                "" => overflow.join("; "),
                text => text.to_string(),
            };
            let blob = tag(&distilled, Utc::now());
            info!(
                "Distilled {} overflow facts of '{}' into long-term memory",
                overflow.len(),
                key
            );

            self.compression_mapping.insert(blob.clone(), overflow);
            self.long_term.entry(key.to_string()).or_default().push(blob);
        }

        self.short_term.insert(key.to_string(), short);

        if let Some(long) = self.long_term.get_mut(key) {
            let mut deduped = dedup(long.as_slice());
            if deduped.len() > max_long_term {
                let excess = deduped.len() - max_long_term;
                deduped.drain(..excess);
            }
            *long = deduped;
        }

        Ok(())
    }

    /// Summarize the eligible long-term facts of `key` into at most
    /// `max_blobs` tagged blobs. Fresh blobs are never touched.
    pub async fn compress_long_term(
        &mut self,
        llm: &Llm,
        key: &str,
        max_blobs: usize,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let window = Duration::seconds(self.recompression_window_secs as i64);
        let (fresh, eligible): (Vec<String>, Vec<String>) = self
            .long_term(key)
            .iter()
            .cloned()
            .partition(|fact| compression_tag(fact).is_some_and(|ts| now - ts < window));

        if eligible.len() <= max_blobs {
            return Ok(());
        }

        let listing = eligible
            .iter()
            .map(|f| strip_tag(f).to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Compress these facts into at most {} lines:\n{}",
            max_blobs, listing
        );
        let reply = llm
            .ask(COMPRESS_PROMPT, &prompt)
            .await
            .map_err(EngineError::from)?;

        let lines = dedup(&parse_lines(&reply));
        if lines.is_empty() {
            warn!(
                "Compression of '{}' produced no usable lines; keeping {} facts",
                key,
                eligible.len()
            );
            return Ok(());
        }

        let raw: Vec<String> = eligible.iter().map(|f| strip_tag(f).to_string()).collect();
        let blobs: Vec<String> = lines
            .iter()
            .take(max_blobs)
            .map(|line| tag(line, now))
            .collect();

        for blob in &blobs {
            self.compression_mapping.insert(blob.clone(), raw.clone());
        }

        info!(
            "Compressed {} long-term facts of '{}' into {} blobs",
            eligible.len(),
            key,
            blobs.len()
        );

        let mut result = fresh;
        result.extend(blobs);
        self.long_term.insert(key.to_string(), result);
        Ok(())
    }

    /// Top `max_results` facts across both tiers, scored against `query`
    pub async fn search_relevant(
        &self,
        llm: &Llm,
        key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>> {
        let pool: Vec<String> = self
            .short_term(key)
            .iter()
            .chain(self.long_term(key).iter())
            .cloned()
            .collect();

        Ok(rank(llm, pool, query, max_results).await?)
    }

    /// Score long-term facts against the mission and copy the best ones
    /// (without their tags) into short-term. Returns what was injected.
    pub async fn promote_to_short_term(
        &mut self,
        llm: &Llm,
        key: &str,
        mission: &str,
        max_to_load: usize,
    ) -> Result<Vec<String>> {
        if max_to_load == 0 {
            return Ok(Vec::new());
        }

        let pool = self.long_term(key).to_vec();
        let ranked = rank(llm, pool, mission, max_to_load).await?;

        let mut present: HashSet<String> =
            self.short_term(key).iter().map(|f| normalize_key(f)).collect();
        let mut injected = Vec::new();
        for fact in ranked {
            let text = strip_tag(&fact).to_string();
            if present.insert(normalize_key(&text)) {
                injected.push(text);
            }
        }

        if !injected.is_empty() {
            debug!("Promoted {} facts into short-term '{}'", injected.len(), key);
            self.short_term
                .entry(key.to_string())
                .or_default()
                .extend(injected.iter().cloned());
        }

        Ok(injected)
    }
}

/// Stable descending sort by per-fact score; unparsable scores count as 0
async fn rank(
    llm: &Llm,
    pool: Vec<String>,
    query: &str,
    max_results: usize,
) -> Result<Vec<String>, EngineError> {
    if pool.is_empty() || max_results == 0 {
        return Ok(Vec::new());
    }

    let mut scored = Vec::with_capacity(pool.len());
    for fact in pool {
        let reply = llm
            .ask(SCORE_PROMPT, &format!("Query: {}\nFact: {}", query, strip_tag(&fact)))
            .await?;
        let score = parse_score(&reply).unwrap_or_else(|e| {
            debug!("{}; scoring as 0", e);
            0
        });
        scored.push((score, fact));
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(scored
        .into_iter()
        .take(max_results)
        .map(|(_, fact)| fact)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CompletionConfig;
    use crate::providers::stub::StubCompletion;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn llm_answering(text: &str) -> (Arc<StubCompletion>, Llm) {
        let stub = Arc::new(StubCompletion::constant(text));
        let llm = Llm::new(stub.clone(), &CompletionConfig::default());
        (stub, llm)
    }

    fn facts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dedup_is_case_insensitive_and_keeps_first() {
        let out = dedup(&facts(&["Alpha", " alpha ", "", "Beta", "BETA", "gamma"]));
        assert_eq!(out, facts(&["Alpha", "Beta", "gamma"]));
    }

    #[test]
    fn test_tag_roundtrip() {
        let now = Utc::now();
        let tagged = tag("the sky is blue", now);
        assert!(tagged.starts_with("[COMPRESSED|"));
        assert_eq!(compression_tag(&tagged).map(|t| t.timestamp()), Some(now.timestamp()));
        assert_eq!(strip_tag(&tagged), "the sky is blue");
        assert_eq!(strip_tag("plain"), "plain");
        assert!(compression_tag("[COMPRESSED|not a date] x").is_none());
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("7").unwrap(), 7);
        assert_eq!(parse_score("Score: 9/10").unwrap(), 9);
        assert_eq!(parse_score("42").unwrap(), 10);
        assert_eq!(parse_score("-3").unwrap(), 0);
        assert_eq!(parse_score("99999999999999999999").unwrap(), 10);
        assert_eq!(parse_score("-99999999999999999999").unwrap(), 0);
        assert!(matches!(
            parse_score("very relevant"),
            Err(EngineError::MalformedProposal(_))
        ));
    }

    #[test]
    fn test_patterns_are_compiled_once() {
        assert!(std::ptr::eq(score_pattern(), score_pattern()));
        assert!(std::ptr::eq(bullet_pattern(), bullet_pattern()));
        assert_eq!(parse_lines("1. rivers\n- bridges\n\n* fords"), vec!["rivers", "bridges", "fords"]);
    }

    #[test]
    fn test_parse_lines_strips_markers() {
        let lines = parse_lines("1. first\n- second\n\n* third\n[COMPRESSED|2020-01-01T00:00:00+00:00] fourth");
        assert_eq!(lines, facts(&["first", "second", "third", "fourth"]));
    }

    #[tokio::test]
    async fn test_compact_moves_overflow_to_long_term() {
        let (stub, llm) = llm_answering("merged knowledge");
        let mut store = MemoryStore::new();
        for i in 0..15 {
            store.add_fact("Project", format!("fact {}", i));
        }

        store.compact(&llm, "Project", 3, 50).await.unwrap();

        assert_eq!(store.short_term("Project"), facts(&["fact 12", "fact 13", "fact 14"]).as_slice());
        let long = store.long_term("Project");
        assert_eq!(long.len(), 1);
        assert!(compression_tag(&long[0]).is_some());
        assert_eq!(strip_tag(&long[0]), "merged knowledge");
        assert_eq!(store.compression_mapping[&long[0]].len(), 12);
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_compact_without_overflow_makes_no_calls() {
        let (stub, llm) = llm_answering("unused");
        let mut store = MemoryStore::new();
        store.add_fact("k", "one");
        store.add_fact("k", "ONE");
        store.add_fact("k", "two");

        store.compact(&llm, "k", 5, 5).await.unwrap();

        assert_eq!(store.short_term("k"), facts(&["one", "two"]).as_slice());
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_long_term_capped_by_dropping_oldest() {
        let (_stub, llm) = llm_answering("unused");
        let mut store = MemoryStore::new();
        store
            .long_term
            .insert("k".into(), facts(&["a", "b", "c", "d"]));

        store.compact(&llm, "k", 5, 2).await.unwrap();
        assert_eq!(store.long_term("k"), facts(&["c", "d"]).as_slice());
    }

    #[tokio::test]
    async fn test_compress_preserves_fresh_blobs() {
        let (stub, llm) = llm_answering("- summary one\n- summary two\n- summary one");
        let now = Utc::now();
        let fresh = tag("recent blob", now - Duration::minutes(5));
        let stale = tag("old blob", now - Duration::hours(3));

        let mut store = MemoryStore::new();
        let mut long = vec![fresh.clone(), stale];
        long.extend(facts(&["raw 1", "raw 2", "raw 3"]));
        store.long_term.insert("k".into(), long);

        store.compress_long_term(&llm, "k", 2, now).await.unwrap();

        let long = store.long_term("k");
        assert_eq!(long[0], fresh);
        assert_eq!(long.len(), 3);
        assert_eq!(strip_tag(&long[1]), "summary one");
        assert_eq!(strip_tag(&long[2]), "summary two");
        assert_eq!(store.compression_mapping[&long[1]].len(), 4);
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_compress_noop_when_few_eligible() {
        let (stub, llm) = llm_answering("unused");
        let mut store = MemoryStore::new();
        store.long_term.insert("k".into(), facts(&["a", "b"]));

        store.compress_long_term(&llm, "k", 2, Utc::now()).await.unwrap();
        assert_eq!(store.long_term("k"), facts(&["a", "b"]).as_slice());
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_compress_keeps_data_on_empty_reply() {
        let (_stub, llm) = llm_answering("   \n  ");
        let mut store = MemoryStore::new();
        store.long_term.insert("k".into(), facts(&["a", "b", "c"]));

        store.compress_long_term(&llm, "k", 1, Utc::now()).await.unwrap();
        assert_eq!(store.long_term("k").len(), 3);
    }

    #[tokio::test]
    async fn test_search_relevant_orders_by_score_stably() {
        let stub = Arc::new(StubCompletion::new(|req| {
            let user = req.user_text();
            Ok(if user.contains("bridge") {
                "9".into()
            } else if user.contains("river") {
                "I'd say 5".into()
            } else {
                "not sure".into()
            })
        }));
        let llm = Llm::new(stub.clone(), &CompletionConfig::default());

        let mut store = MemoryStore::new();
        store.add_fact("k", "weather");
        store.add_fact("k", "river one");
        store.add_fact("k", "river two");
        store.long_term.insert("k".into(), facts(&["bridge"]));

        let top = store.search_relevant(&llm, "k", "q", 3).await.unwrap();
        assert_eq!(top, facts(&["bridge", "river one", "river two"]));
        assert_eq!(stub.call_count(), 4);
    }

    #[tokio::test]
    async fn test_search_on_empty_store_makes_no_calls() {
        let (stub, llm) = llm_answering("10");
        let store = MemoryStore::new();
        assert!(store.search_relevant(&llm, "k", "q", 5).await.unwrap().is_empty());
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_promote_skips_facts_already_present() {
        let (_stub, llm) = llm_answering("5");
        let mut store = MemoryStore::new();
        store.add_fact("k", "Known");
        store.long_term.insert(
            "k".into(),
            vec![tag("known", Utc::now()), "fresh idea".to_string()],
        );

        let injected = store.promote_to_short_term(&llm, "k", "mission", 5).await.unwrap();
        assert_eq!(injected, facts(&["fresh idea"]));
        assert_eq!(store.short_term("k"), facts(&["Known", "fresh idea"]).as_slice());
    }

    #[tokio::test]
    async fn test_scoring_failure_propagates() {
        let stub = Arc::new(StubCompletion::new(|_| {
            Err(crate::core::error::CompletionError::transport("down"))
        }));
        let llm = Llm::new(stub, &CompletionConfig::default());
        let mut store = MemoryStore::new();
        store.add_fact("k", "x");

        let err = store.search_relevant(&llm, "k", "q", 1).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Transport(_))
        ));
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #[test]
        fn prop_dedup_leaves_no_case_duplicates(items in proptest::collection::vec("[a-cA-C ]{0,4}", 0..20)) {
            let out = dedup(&items);
            let keys: HashSet<String> = out.iter().map(|f| normalize_key(f)).collect();
            prop_assert_eq!(keys.len(), out.len());
            prop_assert!(out.iter().all(|f| !f.is_empty()));
        }

        #[test]
        fn prop_compaction_is_idempotent(
            items in proptest::collection::vec("[a-dA-D]{1,3}", 0..25),
            max_short in 1usize..6,
        ) {
            let (_stub, llm) = llm_answering("distilled");
            let mut store = MemoryStore::new();
            for item in &items {
                store.add_fact("k", item.clone());
            }

            block_on(store.compact(&llm, "k", max_short, 10)).unwrap();
            let once = store.clone();
            block_on(store.compact(&llm, "k", max_short, 10)).unwrap();

            prop_assert_eq!(&once, &store);
            prop_assert!(store.short_term("k").len() <= max_short);
            let keys: HashSet<String> = store.short_term("k").iter().map(|f| normalize_key(f)).collect();
            prop_assert_eq!(keys.len(), store.short_term("k").len());
        }
    }
}
