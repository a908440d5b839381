//! Small text helpers shared by memory, consensus and mission evolution.

/// Words that mark an output as talking about the process instead of the work.
const META_MARKERS: &[&str] = &["summarize", "reflect"];

/// True when the text is about summarizing or reflecting rather than doing.
pub fn is_meta(text: &str) -> bool {
    let lower = text.to_lowercase();
    META_MARKERS.iter().any(|m| lower.contains(m))
}

/// A mission is degenerate when it is empty or only asks for meta work.
pub fn is_degenerate_mission(mission: &str) -> bool {
    mission.trim().is_empty() || is_meta(mission)
}

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b.len()]
}

/// Case-insensitive key used for deduplication.
pub fn normalize_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Truncate to at most `max` chars, appending an ellipsis when cut.
pub fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}
