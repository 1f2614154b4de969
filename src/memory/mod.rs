//! Concept memory algorithms: recall-quality assessment, the review scheduler
//! and mastery classification. Everything here is pure; persistence lives in
//! `crate::db` and orchestration in `crate::services`.

pub mod model;
pub mod quality;
pub mod scheduler;

pub use model::{ConceptKey, ConceptMemory, ConceptType, EventType, MasteryLevel};
pub use quality::{assess_quality, Assessment};
pub use scheduler::{advance, apply_quality, classify, rank_due_items, SchedulerPolicy};
