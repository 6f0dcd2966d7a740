//! 🎯 The scoring heuristic that picks a cluster's anchor.
//!
//! Richer records score higher; SHOUTING records score lower. Over the scored fields:
//!
//! ```text
//! field_count = number of non-empty scalar values
//! caps_ratio  = mean over those values of (uppercase chars / chars)
//! score       = 0                                          if field_count == 0
//!             = field_count                                if caps_ratio == 0
//!             = (field_count + title_length) / caps_ratio  otherwise
//! ```
//!
//! Weights come from [`ScoringPolicy`]; defaults are 1.0 so the formula above is exact.

use crate::common::{Document, scalar_text};
use crate::merge::policy::{FieldPolicy, ScoringPolicy};

/// 🎯 Score one member document.
pub fn score(document: &Document, policy: &FieldPolicy, weights: &ScoringPolicy) -> f64 {
    let mut field_count = 0usize;
    let mut ratio_sum = 0.0f64;

    for name in policy.scored_fields() {
        let Some(value) = document.fields.get(name) else {
            continue;
        };
        for text in value.iter().filter_map(scalar_text) {
            let length = text.chars().count();
            if length == 0 {
                continue;
            }
            let upper = text.chars().filter(|c| c.is_uppercase()).count();
            field_count += 1;
            ratio_sum += upper as f64 / length as f64;
        }
    }

    if field_count == 0 {
        return 0.0;
    }
    let caps_ratio = ratio_sum / field_count as f64;
    let weighted_fields = weights.field_weight * field_count as f64;
    if caps_ratio == 0.0 {
        return weighted_fields;
    }
    let title_length = document
        .first_text(policy.title_field())
        .map(|title| title.chars().count())
        .unwrap_or(0);
    (weighted_fields + weights.title_weight * title_length as f64) / caps_ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::policy::MergeConfig;
    use anyhow::Result;

    fn policy() -> FieldPolicy {
        FieldPolicy::new(&MergeConfig::default())
    }

    #[test]
    fn the_one_where_nothing_scored_scores_nothing() -> Result<()> {
        let mut doc = Document::new("a")?;
        doc.set("fullrecord", "<marc/>");
        assert_eq!(score(&doc, &policy(), &ScoringPolicy::default()), 0.0);
        Ok(())
    }

    #[test]
    fn the_one_where_all_lowercase_scores_its_field_count() -> Result<()> {
        let mut doc = Document::new("a")?;
        doc.set("title", "moby dick");
        doc.set("topic", vec!["whales", "obsession"]);
        assert_eq!(score(&doc, &policy(), &ScoringPolicy::default()), 3.0);
        Ok(())
    }

    #[test]
    fn the_one_where_the_formula_is_the_formula() -> Result<()> {
        let mut doc = Document::new("a")?;
        // 🧪 "Ab" → ratio 0.5, "AB" → ratio 1.0 → mean 0.75; 2 values, title length 2
        doc.set("title", "Ab");
        doc.set("author", "AB");
        let got = score(&doc, &policy(), &ScoringPolicy::default());
        assert!((got - (2.0 + 2.0) / 0.75).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn the_one_where_proper_case_beats_shouting() -> Result<()> {
        let mut polite = Document::new("a")?;
        polite.set("title", "The Whale");
        polite.set("author", "Melville, Herman");
        let mut shouty = Document::new("b")?;
        shouty.set("title", "THE WHALE");
        shouty.set("author", "MELVILLE, HERMAN");
        let weights = ScoringPolicy::default();
        assert!(score(&polite, &policy(), &weights) > score(&shouty, &policy(), &weights));
        Ok(())
    }

    #[test]
    fn the_one_where_empty_strings_do_not_count() -> Result<()> {
        let mut doc = Document::new("a")?;
        doc.set("title", "");
        doc.set("topic", vec!["", "x"]);
        assert_eq!(score(&doc, &policy(), &ScoringPolicy::default()), 1.0);
        Ok(())
    }
}
