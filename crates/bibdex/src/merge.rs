//! 🧬 Merge: turning a pile of duplicates into one well-mannered document.
//!
//! 🎬 *[nine catalog cards enter. one merged card leaves. the other nine stay, as children.]*
//!
//! - [`policy`]: which field behaves how (merged / single / author / full text) plus config
//! - [`score`]: the anchor-picking heuristic
//! - [`engine`]: filter, sort, merge, collapse, propagate
//!
//! 🦆

pub mod engine;
pub mod policy;
pub mod score;

pub use engine::{Exclusion, MergeEngine};
pub use policy::{FieldClass, FieldPolicy, MergeConfig, ScoringPolicy};
