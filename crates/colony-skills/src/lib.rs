//! Built-in skills. Each one is a thin adapter from a routing decision to
//! the capability handles; the heavy lifting lives in the runtime crates.

pub mod arbitrage;
pub mod content;
pub mod general;
pub mod prices;
pub mod research;
pub mod security;
pub mod status;
pub mod tools;
pub mod whales;

use std::sync::Arc;

use colony_core::SkillHandle;

pub use arbitrage::{DexArbitrageSkill, SpreadArbitrageSkill};
pub use tools::default_catalog;
pub use content::ContentSkill;
pub use general::GeneralSkill;
pub use prices::PricesSkill;
pub use research::ResearchSkill;
pub use security::SecuritySkill;
pub use status::StatusSkill;
pub use whales::WhalesSkill;

/// The full built-in skill set, general fallback included.
pub fn default_skills() -> Vec<SkillHandle> {
    vec![
        Arc::new(PricesSkill),
        Arc::new(ResearchSkill),
        Arc::new(WhalesSkill),
        Arc::new(DexArbitrageSkill),
        Arc::new(SpreadArbitrageSkill),
        Arc::new(ContentSkill),
        Arc::new(SecuritySkill),
        Arc::new(StatusSkill),
        Arc::new(GeneralSkill),
    ]
}
