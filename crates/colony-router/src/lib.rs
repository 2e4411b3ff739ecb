//! Intent router — scores an inbound message against every registered
//! skill profile and always produces a decision.
//!
//! Pure by construction: profiles are compiled once at registration, a call
//! does no I/O and touches no shared state, and identical inputs yield
//! identical decisions (the decision timestamp is the message timestamp).

pub mod extract;
pub mod score;

use regex::Regex;
use tracing::warn;

use colony_types::{ColonyError, InboundMessage, RoutingDecision, SkillProfile, GENERAL_SKILL};

use crate::extract::extract_params;
use crate::score::{score_profile, CompiledProfile};

/// Minimum winning score; anything below routes to the general skill.
pub const SCORE_FLOOR: f64 = 0.10;
/// Runner-up must clear this to be offered as a fallback.
pub const FALLBACK_FLOOR: f64 = 0.10;
/// Confidence reported when the general skill wins by default.
pub const GENERAL_CONFIDENCE: f64 = 0.50;

#[derive(Debug)]
pub struct Router {
    profiles: Vec<CompiledProfile>,
}

impl Router {
    /// Compile the profile set. Duplicate names violate a registration
    /// invariant; individually invalid regex patterns are skipped so one
    /// bad pattern cannot take a whole profile offline.
    pub fn new(profiles: Vec<SkillProfile>) -> Result<Self, ColonyError> {
        let mut compiled = Vec::with_capacity(profiles.len());
        let mut seen = std::collections::HashSet::new();
        for profile in profiles {
            if !seen.insert(profile.name.clone()) {
                return Err(ColonyError::Fatal(format!(
                    "duplicate skill profile: {}",
                    profile.name
                )));
            }
            let mut patterns = Vec::new();
            for raw in &profile.patterns {
                match Regex::new(&format!("(?i){raw}")) {
                    Ok(re) => patterns.push(re),
                    Err(err) => {
                        warn!(profile = %profile.name, pattern = %raw, %err, "skipping invalid pattern");
                    }
                }
            }
            let word_patterns = profile
                .keywords
                .iter()
                .map(|kw| Regex::new(&format!(r"\b{}\b", regex::escape(kw))).ok())
                .collect();
            compiled.push(CompiledProfile {
                profile,
                patterns,
                word_patterns,
            });
        }
        Ok(Self { profiles: compiled })
    }

    /// Names the router can emit, the reserved general skill excluded.
    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles
            .iter()
            .map(|c| c.profile.name.as_str())
            .collect()
    }

    /// Score the message against every profile and pick a winner. Never
    /// fails: empty input and empty profile sets both fall back to the
    /// general skill.
    pub fn route(&self, message: &InboundMessage) -> RoutingDecision {
        let text = message.text.trim();
        if text.is_empty() {
            return self.general(message, "empty input");
        }
        if self.profiles.is_empty() {
            return self.general(message, "no profiles");
        }

        let lowered = text.to_lowercase();
        let mut ranked: Vec<(&CompiledProfile, f64)> = self
            .profiles
            .iter()
            .map(|p| (p, score_profile(p, text, &lowered)))
            .collect();
        ranked.sort_by(|(pa, a), (pb, b)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pa.profile.name.cmp(&pb.profile.name))
        });

        let (winner, best_score) = ranked[0];
        if best_score < SCORE_FLOOR {
            return self.general(
                message,
                &format!("low score ({best_score:.2}), routing to general chat"),
            );
        }

        let fallback = ranked
            .get(1)
            .filter(|(_, score)| *score > FALLBACK_FLOOR)
            .map(|(p, _)| p.profile.name.clone());

        let matched: Vec<String> = winner
            .profile
            .keywords
            .iter()
            .filter(|kw| lowered.contains(kw.as_str()))
            .take(3)
            .map(|kw| format!("keyword:{kw}"))
            .collect();
        let reasoning = format!(
            "matched {} (score {best_score:.2}) — {}",
            winner.profile.name,
            if matched.is_empty() {
                "pattern match".to_string()
            } else {
                matched.join(", ")
            }
        );

        RoutingDecision {
            skill: winner.profile.name.clone(),
            confidence: best_score.clamp(0.0, 1.0),
            params: extract_params(winner.profile.extractor, text),
            fallback,
            reasoning,
            timestamp: message.timestamp,
        }
    }

    fn general(&self, message: &InboundMessage, reasoning: &str) -> RoutingDecision {
        let mut params = std::collections::HashMap::new();
        params.insert(
            "raw_message".to_string(),
            serde_json::Value::String(message.text.clone()),
        );
        RoutingDecision {
            skill: GENERAL_SKILL.to_string(),
            confidence: GENERAL_CONFIDENCE,
            params,
            fallback: None,
            reasoning: reasoning.to_string(),
            timestamp: message.timestamp,
        }
    }
}
