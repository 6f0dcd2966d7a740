//! 📐 Field policy: which fields merge, which fields pick a winner, and which ones get scored.
//!
//! Classification is resolved once from [`MergeConfig`] into hash-set lookups. The multi-valued
//! naming convention (`*_mv` by default) is a configured suffix list consulted after the explicit
//! tables, so an explicit `single_fields` entry always beats the suffix.

use std::collections::HashSet;

use serde::Deserialize;

/// 🔧 Merge knobs. Every field has a default that matches a VuFind-style Solr schema.
#[derive(Debug, Deserialize, Clone)]
pub struct MergeConfig {
    /// 🧺 Fields whose values from every member are pooled together.
    #[serde(default = "default_merged_fields")]
    pub merged_fields: Vec<String>,
    /// 🥇 Fields where the best-scored member's value wins.
    #[serde(default = "default_single_fields")]
    pub single_fields: Vec<String>,
    /// 🌳 Merged fields holding pre-built hierarchy paths. Deduplicated case-sensitively.
    #[serde(default = "default_hierarchical_fields")]
    pub hierarchical_fields: Vec<String>,
    /// 🎯 Fields inspected by the scoring heuristic.
    #[serde(default = "default_scored_fields")]
    pub scored_fields: Vec<String>,
    /// 👇 Fields copied from the merged document down into every child (union).
    #[serde(default)]
    pub copy_to_children: Vec<String>,
    /// 🏷️ Field-name suffixes that mark a field as multi-valued, hence merged.
    #[serde(default = "default_multi_valued_suffixes")]
    pub multi_valued_suffixes: Vec<String>,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    #[serde(default = "default_primary_author_field")]
    pub primary_author_field: String,
    #[serde(default = "default_secondary_author_field")]
    pub secondary_author_field: String,
    /// 📜 The catch-all full-text blob, unioned across all members regardless of the tables above.
    #[serde(default = "default_full_text_field")]
    pub full_text_field: String,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    /// 🗄️ Built documents remembered per merge worker.
    #[serde(default = "default_document_cache_capacity")]
    pub document_cache_capacity: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            merged_fields: default_merged_fields(),
            single_fields: default_single_fields(),
            hierarchical_fields: default_hierarchical_fields(),
            scored_fields: default_scored_fields(),
            copy_to_children: Vec::new(),
            multi_valued_suffixes: default_multi_valued_suffixes(),
            title_field: default_title_field(),
            primary_author_field: default_primary_author_field(),
            secondary_author_field: default_secondary_author_field(),
            full_text_field: default_full_text_field(),
            scoring: ScoringPolicy::default(),
            document_cache_capacity: default_document_cache_capacity(),
        }
    }
}

/// ⚖️ Weights for the scoring heuristic. The defaults reproduce the classic formula
/// `(field_count + title_length) / caps_ratio`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScoringPolicy {
    #[serde(default = "default_weight")]
    pub field_weight: f64,
    #[serde(default = "default_weight")]
    pub title_weight: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            field_weight: default_weight(),
            title_weight: default_weight(),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn default_merged_fields() -> Vec<String> {
    strings(&[
        "institution",
        "collection",
        "building",
        "language",
        "physical",
        "publisher",
        "publishDate",
        "contents",
        "url",
        "ctrlnum",
        "isbn",
        "issn",
        "format",
        "topic",
        "genre",
        "geographic",
        "era",
        "series",
        "author2",
        "author_corporate",
    ])
}

fn default_single_fields() -> Vec<String> {
    strings(&[
        "title",
        "title_short",
        "title_full",
        "title_sort",
        "title_sub",
        "author_sort",
        "edition",
        "description",
        "callnumber",
        "dewey-full",
    ])
}

fn default_hierarchical_fields() -> Vec<String> {
    strings(&["building", "format"])
}

fn default_scored_fields() -> Vec<String> {
    strings(&[
        "title", "author", "author2", "topic", "contents", "series", "allfields",
    ])
}

fn default_multi_valued_suffixes() -> Vec<String> {
    strings(&["_mv"])
}

fn default_title_field() -> String {
    "title".to_string()
}

fn default_primary_author_field() -> String {
    "author".to_string()
}

fn default_secondary_author_field() -> String {
    "author2".to_string()
}

fn default_full_text_field() -> String {
    "allfields".to_string()
}

fn default_document_cache_capacity() -> usize {
    256
}

/// 🗂️ How a field behaves when a cluster is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// 🧺 Pool every member's values. `case_sensitive` is true for hierarchy paths.
    Merged { case_sensitive: bool },
    /// 🥇 First non-empty value in score order wins.
    Single,
    /// ✍️ Single, except conflicts spill over into the secondary author field.
    PrimaryAuthor,
    /// 📜 Case-insensitive union of every member's tokens.
    FullText,
    /// 🙈 Not carried into the merged document.
    Unclassified,
}

/// 📐 The resolved lookup table.
#[derive(Debug, Clone)]
pub struct FieldPolicy {
    merged: HashSet<String>,
    single: HashSet<String>,
    hierarchical: HashSet<String>,
    suffixes: Vec<String>,
    scored: Vec<String>,
    copy_to_children: Vec<String>,
    title_field: String,
    primary_author_field: String,
    secondary_author_field: String,
    full_text_field: String,
}

impl FieldPolicy {
    pub fn new(config: &MergeConfig) -> Self {
        let set = |names: &[String]| names.iter().cloned().collect::<HashSet<_>>();
        Self {
            merged: set(&config.merged_fields),
            single: set(&config.single_fields),
            hierarchical: set(&config.hierarchical_fields),
            suffixes: config.multi_valued_suffixes.clone(),
            scored: config.scored_fields.clone(),
            copy_to_children: config.copy_to_children.clone(),
            title_field: config.title_field.clone(),
            primary_author_field: config.primary_author_field.clone(),
            secondary_author_field: config.secondary_author_field.clone(),
            full_text_field: config.full_text_field.clone(),
        }
    }

    /// 🗂️ Classify a field name. Order matters: full text, primary author, explicit single,
    /// then merged (explicit, hierarchical, or by suffix).
    pub fn classify(&self, name: &str) -> FieldClass {
        if name == self.full_text_field {
            return FieldClass::FullText;
        }
        if name == self.primary_author_field {
            return FieldClass::PrimaryAuthor;
        }
        if self.single.contains(name) {
            return FieldClass::Single;
        }
        let hierarchical = self.hierarchical.contains(name);
        if hierarchical
            || self.merged.contains(name)
            || self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
        {
            return FieldClass::Merged {
                case_sensitive: hierarchical,
            };
        }
        FieldClass::Unclassified
    }

    pub fn is_case_sensitive(&self, name: &str) -> bool {
        self.hierarchical.contains(name)
    }

    pub fn scored_fields(&self) -> &[String] {
        &self.scored
    }

    pub fn copy_to_children(&self) -> &[String] {
        &self.copy_to_children
    }

    pub fn title_field(&self) -> &str {
        &self.title_field
    }

    pub fn secondary_author_field(&self) -> &str {
        &self.secondary_author_field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_every_field_finds_its_table() {
        let policy = FieldPolicy::new(&MergeConfig::default());
        assert_eq!(policy.classify("allfields"), FieldClass::FullText);
        assert_eq!(policy.classify("author"), FieldClass::PrimaryAuthor);
        assert_eq!(policy.classify("title"), FieldClass::Single);
        assert_eq!(
            policy.classify("topic"),
            FieldClass::Merged {
                case_sensitive: false
            }
        );
        assert_eq!(
            policy.classify("building"),
            FieldClass::Merged {
                case_sensitive: true
            }
        );
        assert_eq!(
            policy.classify("source_str_mv"),
            FieldClass::Merged {
                case_sensitive: false
            }
        );
        assert_eq!(policy.classify("fullrecord"), FieldClass::Unclassified);
    }

    #[test]
    fn the_one_where_explicit_single_beats_the_suffix() {
        let config = MergeConfig {
            single_fields: vec!["stubborn_mv".into()],
            ..MergeConfig::default()
        };
        let policy = FieldPolicy::new(&config);
        assert_eq!(policy.classify("stubborn_mv"), FieldClass::Single);
    }
}
