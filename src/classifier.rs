//! Keyword-based detection of questions about the user's surroundings.
//!
//! Deliberately crude: a case-insensitive substring match against a
//! configurable keyword list. False positives and negatives are acceptable
//! here since the result only selects which instruction annotation to
//! attach, never gates anything safety-critical.

/// Returns true when any keyword occurs as a substring of the lower-cased
/// message.
pub fn is_vision_question(message: &str, keywords: &[String]) -> bool {
    let lowered = message.to_lowercase();
    keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_lowercase()))
}

/// Default keyword list covering vision, navigation, and spatial phrasing.
pub fn default_vision_keywords() -> Vec<String> {
    [
        "see", "look", "what", "describe", "tell me what", "what do you see",
        "what is", "what are", "what's", "can you see", "do you see",
        "around me", "in front", "behind", "left", "right", "near", "far",
        "object", "thing", "item", "person", "people", "place", "room",
        "help me", "assist", "guide", "navigate", "safe", "dangerous",
        "obstacle", "path", "way", "direction", "where", "location",
        "show", "point", "identify", "recognize", "spot", "notice",
        "observe", "view", "sight", "visual", "picture", "image",
        "scene", "environment", "surroundings", "area", "space",
    ]
    .iter()
    .map(|keyword| keyword.to_string())
    .collect()
}
