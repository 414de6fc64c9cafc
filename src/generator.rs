//! Orchestration: from a closed grammar to the two serialized tables.
use std::path::Path;

use crate::config::GeneratorConfig;
use crate::dfa::{DfaBuilder, DfaError, DfaTable};
use crate::grammar::{Grammar, GrammarError, LexemeSpec, ProductionNode};
use crate::grammar_file::{self, DescriptionError};
use crate::lalr::{self, BuildError};
use crate::nfa::{AcceptTag, NfaBuilder, NfaError};
use crate::regex::{Pattern, PatternError};
use crate::serialize::{self, ArtifactError};
use crate::table::SyntaxTable;

/// The generated artifacts: everything the runtime needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    /// The tokenizer table.
    pub lexicon: DfaTable,
    /// The syntax-analysis table with its callback tag registry.
    pub syntax: SyntaxTable,
}

impl Artifacts {
    /// Write both artifact files.
    pub fn save(
        &self,
        lexicon_path: impl AsRef<Path>,
        syntax_path: impl AsRef<Path>,
    ) -> Result<(), ArtifactError> {
        serialize::write_lexicon_file(lexicon_path, &self.lexicon)?;
        serialize::write_syntax_file(syntax_path, &self.syntax)
    }

    /// Read both artifact files back.
    pub fn load(
        lexicon_path: impl AsRef<Path>,
        syntax_path: impl AsRef<Path>,
    ) -> Result<Self, ArtifactError> {
        Ok(Artifacts {
            lexicon: serialize::read_lexicon_file(lexicon_path)?,
            syntax: serialize::read_syntax_file(syntax_path)?,
        })
    }
}

/// The error type for generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// Grammar registration or analysis failed.
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    /// Reading a grammar description failed.
    #[error(transparent)]
    Description(#[from] DescriptionError),
    /// A terminal's pattern does not parse.
    #[error("token {token:?} has a malformed pattern: {source}")]
    Pattern {
        /// The terminal's name.
        token: String,
        /// What was wrong with the pattern.
        source: PatternError,
    },
    /// Two tokens accept the same lexeme at the same priority.
    #[error("tokens {first:?} and {second:?} accept the same lexeme at equal priority {priority}")]
    AcceptTie {
        /// The earlier-registered token.
        first: String,
        /// The later-registered token.
        second: String,
        /// The shared priority.
        priority: u32,
    },
    /// A token whose pattern matches the empty lexeme.
    #[error("token {0:?} accepts the empty lexeme")]
    EmptyMatch(String),
    /// A token declared with an empty literal.
    #[error("token {0:?} has an empty lexeme")]
    EmptyLexeme(String),
    /// Syntax-analysis table construction failed.
    #[error(transparent)]
    Build(#[from] BuildError),
}

impl GenerateError {
    /// The single-line `Generator:`-prefixed diagnostic form.
    pub fn diagnostic(&self) -> String {
        format!("Generator: {self}")
    }
}

fn decorate_nfa(grammar: &Grammar, error: NfaError) -> GenerateError {
    match error {
        NfaError::EmptyLexeme(token) => {
            GenerateError::EmptyLexeme(grammar.name(token).to_string())
        }
        NfaError::AcceptTie {
            first,
            second,
            priority,
        } => GenerateError::AcceptTie {
            first: grammar.name(first).to_string(),
            second: grammar.name(second).to_string(),
            priority,
        },
    }
}

fn decorate_dfa(grammar: &Grammar, error: DfaError) -> GenerateError {
    match error {
        DfaError::Nfa(inner) => decorate_nfa(grammar, inner),
        DfaError::EmptyMatch(token) => {
            GenerateError::EmptyMatch(grammar.name(token).to_string())
        }
    }
}

/// Generate both tables for a closed grammar.
pub fn generate(grammar: &Grammar, config: &GeneratorConfig) -> Result<Artifacts, GenerateError> {
    let mut nfa = NfaBuilder::new();
    for id in grammar.production_ids() {
        match grammar.node(id) {
            ProductionNode::Terminal {
                lexeme, priority, ..
            } => {
                let tag = AcceptTag {
                    token: id,
                    priority: *priority,
                };
                match lexeme {
                    LexemeSpec::Literal(bytes) => {
                        nfa.add_literal(bytes, tag)
                            .map_err(|error| decorate_nfa(grammar, error))?;
                    }
                    LexemeSpec::Pattern(source) => {
                        let pattern =
                            Pattern::parse(source).map_err(|source| GenerateError::Pattern {
                                token: grammar.name(id).to_string(),
                                source,
                            })?;
                        nfa.add_pattern(&pattern, tag)
                            .map_err(|error| decorate_nfa(grammar, error))?;
                    }
                }
            }
            ProductionNode::Operator { .. } => {
                // operator lexemes lex like keywords
                let tag = AcceptTag {
                    token: id,
                    priority: 1,
                };
                nfa.add_literal(grammar.name(id).as_bytes(), tag)
                    .map_err(|error| decorate_nfa(grammar, error))?;
            }
            ProductionNode::NonTerminal { .. } | ProductionNode::End => {}
        }
    }
    if config.merge_enabled {
        nfa.merge_optimization();
    }
    let dfa = DfaBuilder::construct(&nfa).map_err(|error| decorate_dfa(grammar, error))?;
    let lexicon = dfa.into_table(
        |production| grammar.token_data(production),
        grammar.token_data(grammar.end()),
    );
    let syntax = lalr::build(grammar, config)?;
    log::info!(
        "generated {} tokenizer rows and {} table entries",
        lexicon.rows.len(),
        syntax.len()
    );
    Ok(Artifacts { lexicon, syntax })
}

/// Generate both tables from a grammar description text.
///
/// The first production's left-hand side becomes the root.
pub fn generate_from_description(
    text: &str,
    config: &GeneratorConfig,
) -> Result<Artifacts, GenerateError> {
    let (builder, root) = grammar_file::parse_description(text)?;
    let grammar = builder.finish(&root)?;
    generate(&grammar, config)
}
