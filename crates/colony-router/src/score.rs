use regex::Regex;

use colony_types::SkillProfile;

/// Per-occurrence keyword weight.
const KEYWORD_WEIGHT: f64 = 0.10;
/// Extra weight when the keyword also matches as a whole word.
const WORD_BONUS: f64 = 0.05;
/// Weight per regex match.
const PATTERN_WEIGHT: f64 = 0.20;
/// Weight per point of profile priority.
const PRIORITY_WEIGHT: f64 = 0.01;

/// A profile with its patterns compiled once at registration.
#[derive(Debug)]
pub struct CompiledProfile {
    pub profile: SkillProfile,
    pub patterns: Vec<Regex>,
    /// Whole-word matcher per keyword, index-aligned with
    /// `profile.keywords`.
    pub word_patterns: Vec<Option<Regex>>,
}

/// Score one profile against the message. `text` is the trimmed original,
/// `lowered` its lowercase form.
pub fn score_profile(compiled: &CompiledProfile, text: &str, lowered: &str) -> f64 {
    let mut score = 0.0;

    for (idx, keyword) in compiled.profile.keywords.iter().enumerate() {
        if lowered.contains(keyword.as_str()) {
            score += KEYWORD_WEIGHT;
            let whole_word = compiled
                .word_patterns
                .get(idx)
                .and_then(|re| re.as_ref())
                .map(|re| re.is_match(lowered))
                .unwrap_or(false);
            if whole_word {
                score += WORD_BONUS;
            }
        }
    }

    for pattern in &compiled.patterns {
        score += pattern.find_iter(text).count() as f64 * PATTERN_WEIGHT;
    }

    score += f64::from(compiled.profile.priority) * PRIORITY_WEIGHT;
    score
}
