//! The configuration module of the table generator.
use serde::{Deserialize, Serialize};

/// The configuration of table generation. The defaults suffice most scenarios.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Copy)]
pub struct GeneratorConfig {
    /// Whether the NFA ε-merge optimization runs before subset construction.
    /// It fuses ε-linked node pairs with disjoint transition bytes, shrinking
    /// the graph the subset construction walks without changing the language.
    /// It is enabled by default.
    pub merge_enabled: bool,
    /// Whether equivalent syntax-analysis table rows are merged after
    /// generation. Disabling it keeps one table entry per item set, which can
    /// be easier to follow when debugging a grammar.
    /// It is enabled by default.
    pub compaction_enabled: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            merge_enabled: true,
            compaction_enabled: true,
        }
    }
}
