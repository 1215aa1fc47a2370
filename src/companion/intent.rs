//! Visual-intent detection.
//!
//! Decides whether a user utterance asks for a diagram. The decision is a
//! fixed keyword table, matched on whole words (or contiguous word pairs),
//! case-insensitively. Both the prompt construction and the image-pipeline
//! gate consume the same decision so the two can never disagree.

/// Single-word intent markers.
const INTENT_WORDS: &[&str] = &[
    "diagram",
    "diagrammatic",
    "diagrammatically",
    "visualize",
    "visualise",
    "visual",
    "visually",
    "draw",
    "drawing",
    "sketch",
    "illustrate",
    "illustration",
    "chart",
    "graph",
    "flowchart",
    "picture",
    "image",
];

/// Multi-word intent markers, matched as contiguous token runs.
const INTENT_PHRASES: &[&[&str]] = &[&["show", "me"], &["explain", "with"]];

/// Whether the text asks for a visual accompaniment.
///
/// Pure and total: empty or marker-free input returns `false`, and equal
/// inputs always produce equal results.
pub fn wants_visual(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.iter().any(|t| INTENT_WORDS.contains(t)) {
        return true;
    }

    INTENT_PHRASES.iter().any(|phrase| {
        tokens
            .windows(phrase.len())
            .any(|window| window == *phrase)
    })
}
