//! The grammar model: productions, their bodies, and grammar-time analyses.
//!
//! Registration is order-independent: a body may reference a nonterminal that
//! is only defined later. Referencing an unknown name declares a placeholder
//! node; [`GrammarBuilder::finish`] reports every placeholder that never
//! received a definition.
use ahash::AHashMap;
use string_interner::backend::StringBackend;
use string_interner::symbol::SymbolU32;
use string_interner::StringInterner;

use crate::token::{Assoc, CallbackId, OperatorInfo, ProductionId, TokenData, TokenKind};

type Names = StringInterner<StringBackend<SymbolU32>>;

/// Which semantics an operator declaration supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OperatorKind {
    /// Operand `op` operand.
    #[strum(serialize = "binary")]
    Binary,
    /// `op` operand.
    #[strum(serialize = "left-unary")]
    LeftUnary,
}

/// How a terminal's lexeme is specified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexemeSpec {
    /// An exact byte string: keywords, operator lexemes, quoted anonymous
    /// terminals.
    Literal(Vec<u8>),
    /// A pattern in the surface of [`crate::regex::Pattern`], parsed at
    /// generation time so its diagnostics can name the token.
    Pattern(String),
}

/// One body (right-hand side) of a nonterminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// The body's symbols in writing order.
    pub symbols: Vec<ProductionId>,
    /// The reduction dispatched when this body completes. Only the augmented
    /// start production has none; its reduce is rewritten to Accept.
    pub callback: Option<CallbackId>,
}

/// A production node.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductionNode {
    /// A token with a lexing priority.
    Terminal {
        /// Interned production name.
        symbol: SymbolU32,
        /// What the token matches.
        lexeme: LexemeSpec,
        /// Lexing priority (overlap tie-break).
        priority: u32,
    },
    /// An operator: a literal lexeme carrying parse-time precedence. One
    /// lexeme may hold both a binary and a left-unary semantics.
    Operator {
        /// Interned operator lexeme.
        symbol: SymbolU32,
        /// Binary semantics, if declared.
        binary: Option<OperatorInfo>,
        /// Left-unary semantics, if declared.
        unary: Option<OperatorInfo>,
    },
    /// A nonterminal and its bodies.
    NonTerminal {
        /// Interned production name.
        symbol: SymbolU32,
        /// Alternative bodies in declaration order.
        bodies: Vec<Body>,
        /// Whether the nonterminal may derive the empty phrase.
        nullable: bool,
        /// False while the node is only a forward-reference placeholder.
        defined: bool,
    },
    /// The end-of-input sentinel.
    End,
}

impl ProductionNode {
    fn symbol(&self) -> Option<SymbolU32> {
        match self {
            ProductionNode::Terminal { symbol, .. }
            | ProductionNode::Operator { symbol, .. }
            | ProductionNode::NonTerminal { symbol, .. } => Some(*symbol),
            ProductionNode::End => None,
        }
    }
}

/// The error type for grammar registration and analysis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    /// A production was declared with an empty name.
    #[error("empty production name")]
    EmptyName,
    /// Two productions share one name.
    #[error("production name {0:?} is already defined")]
    DuplicateName(String),
    /// An operator redeclared a semantics it already carries.
    #[error("operator {0:?} already declared its {1} semantics")]
    DuplicateOperator(String, OperatorKind),
    /// Operator priority 0 is reserved for the parser's sentinel frame.
    #[error("operator {0:?} declares priority 0, which is reserved for the stack sentinel")]
    OperatorPriorityZero(String),
    /// A production body list without any body.
    #[error("nonterminal {0:?} has an empty body list")]
    EmptyBody(String),
    /// `@` mixed with other symbols inside one body.
    #[error("the nullable marker '@' must form a body on its own (nonterminal {0:?})")]
    StrayNullableMarker(String),
    /// A quoted RHS literal with no content.
    #[error("empty quoted literal in a body of {0:?}")]
    EmptyQuotedLiteral(String),
    /// A name that should denote a nonterminal denotes something else.
    #[error("name {0:?} does not denote a nonterminal")]
    NotANonterminal(String),
    /// Names referenced in bodies but never defined.
    #[error("undefined productions referenced: {0}")]
    UndefinedProductions(String),
    /// Defined nonterminals that no derivation from the root can reach.
    #[error("unreachable productions: {0}")]
    UnreachableProductions(String),
    /// The requested root name is unknown.
    #[error("unknown root production {0:?}")]
    UnknownRoot(String),
}

/// Registers productions and performs the grammar-time analyses.
#[derive(Debug)]
pub struct GrammarBuilder {
    names: Names,
    productions: Vec<ProductionNode>,
    by_symbol: AHashMap<SymbolU32, ProductionId>,
    by_lexeme: AHashMap<Vec<u8>, ProductionId>,
    callbacks: Vec<String>,
    callback_ids: AHashMap<String, CallbackId>,
    end: ProductionId,
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarBuilder {
    /// Create a builder holding only the end-of-input sentinel.
    pub fn new() -> Self {
        GrammarBuilder {
            names: Names::new(),
            productions: vec![ProductionNode::End],
            by_symbol: AHashMap::new(),
            by_lexeme: AHashMap::new(),
            callbacks: Vec::new(),
            callback_ids: AHashMap::new(),
            end: ProductionId(0),
        }
    }

    fn push(&mut self, node: ProductionNode) -> ProductionId {
        let id = ProductionId(self.productions.len() as u32);
        if let Some(symbol) = node.symbol() {
            self.by_symbol.insert(symbol, id);
        }
        self.productions.push(node);
        id
    }

    fn callback_id(&mut self, tag: &str) -> CallbackId {
        if let Some(&id) = self.callback_ids.get(tag) {
            return id;
        }
        let id = CallbackId(self.callbacks.len() as u32);
        self.callbacks.push(tag.to_string());
        self.callback_ids.insert(tag.to_string(), id);
        id
    }

    /// Register a keyword: a literal terminal at lexing priority 1, named by
    /// its own text.
    pub fn add_keyword(&mut self, lexeme: &str) -> Result<ProductionId, GrammarError> {
        if lexeme.is_empty() {
            return Err(GrammarError::EmptyName);
        }
        let symbol = self.names.get_or_intern(lexeme);
        if self.by_symbol.contains_key(&symbol) {
            return Err(GrammarError::DuplicateName(lexeme.to_string()));
        }
        let id = self.push(ProductionNode::Terminal {
            symbol,
            lexeme: LexemeSpec::Literal(lexeme.as_bytes().to_vec()),
            priority: 1,
        });
        self.by_lexeme.entry(lexeme.as_bytes().to_vec()).or_insert(id);
        Ok(id)
    }

    /// Register a pattern-defined terminal.
    pub fn add_terminal(
        &mut self,
        name: &str,
        pattern: &str,
        priority: u32,
    ) -> Result<ProductionId, GrammarError> {
        if name.is_empty() {
            return Err(GrammarError::EmptyName);
        }
        let symbol = self.names.get_or_intern(name);
        if self.by_symbol.contains_key(&symbol) {
            return Err(GrammarError::DuplicateName(name.to_string()));
        }
        Ok(self.push(ProductionNode::Terminal {
            symbol,
            lexeme: LexemeSpec::Pattern(pattern.to_string()),
            priority,
        }))
    }

    /// Register one semantics of an operator.
    ///
    /// The first declaration of a lexeme creates the operator; a second
    /// declaration fills in the other semantics, so one lexeme can act both
    /// as a binary and as a left-unary operator.
    pub fn add_operator(
        &mut self,
        lexeme: &str,
        assoc: Assoc,
        priority: u32,
        kind: OperatorKind,
    ) -> Result<ProductionId, GrammarError> {
        if lexeme.is_empty() {
            return Err(GrammarError::EmptyName);
        }
        if priority == 0 {
            return Err(GrammarError::OperatorPriorityZero(lexeme.to_string()));
        }
        let info = OperatorInfo { assoc, priority };
        let symbol = self.names.get_or_intern(lexeme);
        if let Some(&id) = self.by_symbol.get(&symbol) {
            match &mut self.productions[id.as_usize()] {
                ProductionNode::Operator { binary, unary, .. } => {
                    let slot = match kind {
                        OperatorKind::Binary => binary,
                        OperatorKind::LeftUnary => unary,
                    };
                    if slot.is_some() {
                        return Err(GrammarError::DuplicateOperator(lexeme.to_string(), kind));
                    }
                    *slot = Some(info);
                    Ok(id)
                }
                _ => Err(GrammarError::DuplicateName(lexeme.to_string())),
            }
        } else {
            let (binary, unary) = match kind {
                OperatorKind::Binary => (Some(info), None),
                OperatorKind::LeftUnary => (None, Some(info)),
            };
            let id = self.push(ProductionNode::Operator {
                symbol,
                binary,
                unary,
            });
            self.by_lexeme.entry(lexeme.as_bytes().to_vec()).or_insert(id);
            Ok(id)
        }
    }

    /// Declare-or-fetch a nonterminal by name.
    fn nonterminal_id(&mut self, name: &str) -> Result<ProductionId, GrammarError> {
        if name.is_empty() {
            return Err(GrammarError::EmptyName);
        }
        let symbol = self.names.get_or_intern(name);
        match self.by_symbol.get(&symbol) {
            Some(&id) => match &self.productions[id.as_usize()] {
                ProductionNode::NonTerminal { .. } => Ok(id),
                _ => Err(GrammarError::NotANonterminal(name.to_string())),
            },
            None => Ok(self.push(ProductionNode::NonTerminal {
                symbol,
                bodies: Vec::new(),
                nullable: false,
                defined: false,
            })),
        }
    }

    fn anonymous_terminal(&mut self, lexeme: &str) -> ProductionId {
        if let Some(&id) = self.by_lexeme.get(lexeme.as_bytes()) {
            return id;
        }
        let symbol = self.names.get_or_intern(lexeme);
        let id = self.push(ProductionNode::Terminal {
            symbol,
            lexeme: LexemeSpec::Literal(lexeme.as_bytes().to_vec()),
            // keywords get 1 in their own section; anonymous literals sit at 0
            priority: 0,
        });
        self.by_lexeme.insert(lexeme.as_bytes().to_vec(), id);
        id
    }

    /// Append one body to a nonterminal.
    ///
    /// RHS tokens: `"…"` is a quoted-literal shortcut creating (or reusing)
    /// an anonymous terminal, a bare identifier references any declared
    /// symbol (forward references to nonterminals allowed), and a body of
    /// exactly `["@"]` marks the nonterminal nullable without adding a body.
    pub fn add_nonterminal(
        &mut self,
        lhs: &str,
        rhs: &[&str],
        callback: &str,
    ) -> Result<ProductionId, GrammarError> {
        if rhs.is_empty() {
            return Err(GrammarError::EmptyBody(lhs.to_string()));
        }
        let lhs_id = self.nonterminal_id(lhs)?;
        if rhs.len() == 1 && rhs[0] == "@" {
            match &mut self.productions[lhs_id.as_usize()] {
                ProductionNode::NonTerminal {
                    nullable, defined, ..
                } => {
                    *nullable = true;
                    *defined = true;
                }
                _ => unreachable!("nonterminal_id returns nonterminals"),
            }
            return Ok(lhs_id);
        }
        let mut symbols = Vec::with_capacity(rhs.len());
        for &token in rhs {
            if token == "@" {
                return Err(GrammarError::StrayNullableMarker(lhs.to_string()));
            }
            if let Some(literal) = token
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
            {
                if literal.is_empty() {
                    return Err(GrammarError::EmptyQuotedLiteral(lhs.to_string()));
                }
                symbols.push(self.anonymous_terminal(literal));
            } else {
                let symbol = self.names.get_or_intern(token);
                match self.by_symbol.get(&symbol) {
                    Some(&id) => symbols.push(id),
                    None => symbols.push(self.nonterminal_id(token)?),
                }
            }
        }
        let callback = Some(self.callback_id(callback));
        match &mut self.productions[lhs_id.as_usize()] {
            ProductionNode::NonTerminal {
                bodies, defined, ..
            } => {
                bodies.push(Body { symbols, callback });
                *defined = true;
            }
            _ => unreachable!("nonterminal_id returns nonterminals"),
        }
        Ok(lhs_id)
    }

    /// Close the grammar: resolve analyses and pick the root.
    ///
    /// Reports residual forward references, runs the nullable fixpoint,
    /// augments the grammar with the internal start production, and rejects
    /// defined nonterminals unreachable from the root.
    pub fn finish(mut self, root: &str) -> Result<Grammar, GrammarError> {
        let root_id = self
            .names
            .get(root)
            .and_then(|symbol| self.by_symbol.get(&symbol).copied())
            .ok_or_else(|| GrammarError::UnknownRoot(root.to_string()))?;

        let undefined: Vec<String> = self
            .productions
            .iter()
            .filter_map(|node| match node {
                ProductionNode::NonTerminal {
                    symbol,
                    defined: false,
                    ..
                } => Some(self.names.resolve(*symbol).unwrap_or("?").to_string()),
                _ => None,
            })
            .collect();
        if !undefined.is_empty() {
            return Err(GrammarError::UndefinedProductions(undefined.join(", ")));
        }
        if !matches!(
            self.productions[root_id.as_usize()],
            ProductionNode::NonTerminal { defined: true, .. }
        ) {
            return Err(GrammarError::NotANonterminal(root.to_string()));
        }

        self.propagate_nullable();

        let augmented_symbol = self.names.get_or_intern("<start>");
        let augmented = ProductionId(self.productions.len() as u32);
        self.productions.push(ProductionNode::NonTerminal {
            symbol: augmented_symbol,
            bodies: vec![Body {
                symbols: vec![root_id],
                callback: None,
            }],
            nullable: false,
            defined: true,
        });

        self.check_reachability(augmented)?;

        Ok(Grammar {
            names: self.names,
            productions: self.productions,
            callbacks: self.callbacks,
            end: self.end,
            root: root_id,
            augmented,
        })
    }

    fn propagate_nullable(&mut self) {
        loop {
            let mut changed = false;
            for index in 0..self.productions.len() {
                let ProductionNode::NonTerminal {
                    bodies, nullable, ..
                } = &self.productions[index]
                else {
                    continue;
                };
                if *nullable {
                    continue;
                }
                let derivable = bodies.iter().any(|body| {
                    body.symbols.iter().all(|&symbol| {
                        matches!(
                            self.productions[symbol.as_usize()],
                            ProductionNode::NonTerminal { nullable: true, .. }
                        )
                    })
                });
                if derivable {
                    if let ProductionNode::NonTerminal { nullable, .. } =
                        &mut self.productions[index]
                    {
                        *nullable = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn check_reachability(&self, augmented: ProductionId) -> Result<(), GrammarError> {
        let mut reachable = vec![false; self.productions.len()];
        let mut stack = vec![augmented];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut reachable[id.as_usize()], true) {
                continue;
            }
            if let ProductionNode::NonTerminal { bodies, .. } = &self.productions[id.as_usize()] {
                for body in bodies {
                    for &symbol in &body.symbols {
                        stack.push(symbol);
                    }
                }
            }
        }
        let mut orphans: Vec<String> = Vec::new();
        let mut unused_tokens: Vec<&str> = Vec::new();
        for (index, node) in self.productions.iter().enumerate() {
            if reachable[index] {
                continue;
            }
            match node {
                ProductionNode::NonTerminal { symbol, .. } => {
                    orphans.push(self.names.resolve(*symbol).unwrap_or("?").to_string());
                }
                ProductionNode::Terminal { symbol, .. }
                | ProductionNode::Operator { symbol, .. } => {
                    unused_tokens.push(self.names.resolve(*symbol).unwrap_or("?"));
                }
                ProductionNode::End => {}
            }
        }
        if !unused_tokens.is_empty() {
            log::warn!(
                "tokens never referenced by any production: {}. \
                The tokenizer will emit them, and the parser will reject every \
                input containing them.",
                unused_tokens.join(", ")
            );
        }
        if orphans.is_empty() {
            Ok(())
        } else {
            Err(GrammarError::UnreachableProductions(orphans.join(", ")))
        }
    }
}

/// A closed grammar, ready for table construction.
#[derive(Debug, PartialEq)]
pub struct Grammar {
    names: Names,
    productions: Vec<ProductionNode>,
    callbacks: Vec<String>,
    end: ProductionId,
    root: ProductionId,
    augmented: ProductionId,
}

impl Grammar {
    /// Look at a production node.
    pub fn node(&self, id: ProductionId) -> &ProductionNode {
        &self.productions[id.as_usize()]
    }

    /// The production's name (`<end>` for the sentinel).
    pub fn name(&self, id: ProductionId) -> &str {
        match self.node(id).symbol() {
            Some(symbol) => self.names.resolve(symbol).unwrap_or("?"),
            None => "<end>",
        }
    }

    /// The display form `"name"[id]` used in diagnostics.
    pub fn display_form(&self, id: ProductionId) -> String {
        format!("{:?}[{}]", self.name(id), id.0)
    }

    /// All production ids in registration order.
    pub fn production_ids(&self) -> impl Iterator<Item = ProductionId> {
        (0..self.productions.len() as u32).map(ProductionId)
    }

    /// Whether the production shifts as a token (terminal, operator or end).
    pub fn is_terminal_like(&self, id: ProductionId) -> bool {
        matches!(
            self.node(id),
            ProductionNode::Terminal { .. } | ProductionNode::Operator { .. } | ProductionNode::End
        )
    }

    /// Whether the production is a nonterminal.
    pub fn is_nonterminal(&self, id: ProductionId) -> bool {
        matches!(self.node(id), ProductionNode::NonTerminal { .. })
    }

    /// Whether the production is an operator.
    pub fn is_operator(&self, id: ProductionId) -> bool {
        matches!(self.node(id), ProductionNode::Operator { .. })
    }

    /// Whether the nonterminal may derive the empty phrase.
    pub fn nullable(&self, id: ProductionId) -> bool {
        matches!(
            self.node(id),
            ProductionNode::NonTerminal { nullable: true, .. }
        )
    }

    /// The bodies of a nonterminal (empty slice otherwise).
    pub fn bodies(&self, id: ProductionId) -> &[Body] {
        match self.node(id) {
            ProductionNode::NonTerminal { bodies, .. } => bodies,
            _ => &[],
        }
    }

    /// The serialized token descriptor of a terminal-like production.
    pub fn token_data(&self, id: ProductionId) -> TokenData {
        match self.node(id) {
            ProductionNode::Operator { binary, unary, .. } => TokenData {
                production: id,
                kind: TokenKind::Operator,
                binary: *binary,
                unary: *unary,
            },
            ProductionNode::End => TokenData::end(id),
            _ => TokenData::terminal(id),
        }
    }

    /// The end-of-input production.
    pub fn end(&self) -> ProductionId {
        self.end
    }

    /// The user-designated root.
    pub fn root(&self) -> ProductionId {
        self.root
    }

    /// The internal augmented start production wrapping the root.
    pub fn augmented_root(&self) -> ProductionId {
        self.augmented
    }

    /// The registered callback tags, indexed by [`CallbackId`].
    pub fn callbacks(&self) -> &[String] {
        &self.callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut builder = GrammarBuilder::new();
        builder.add_terminal("NUM", "[0-9]+", 0).unwrap();
        assert_eq!(
            builder.add_terminal("NUM", "[0-9]", 0),
            Err(GrammarError::DuplicateName("NUM".to_string()))
        );
    }

    #[test]
    fn operator_second_declaration_fills_other_semantics() {
        let mut builder = GrammarBuilder::new();
        let id = builder
            .add_operator("-", Assoc::LeftToRight, 1, OperatorKind::Binary)
            .unwrap();
        let same = builder
            .add_operator("-", Assoc::RightToLeft, 3, OperatorKind::LeftUnary)
            .unwrap();
        assert_eq!(id, same);
        assert_eq!(
            builder.add_operator("-", Assoc::LeftToRight, 2, OperatorKind::Binary),
            Err(GrammarError::DuplicateOperator(
                "-".to_string(),
                OperatorKind::Binary
            ))
        );
    }

    #[test]
    fn forward_references_resolve_or_report() {
        let mut builder = GrammarBuilder::new();
        builder.add_terminal("NUM", "[0-9]+", 0).unwrap();
        builder.add_nonterminal("E", &["T"], "cb").unwrap();
        // T referenced before definition
        builder.add_nonterminal("T", &["NUM"], "cb").unwrap();
        assert!(builder.finish("E").is_ok());

        let mut builder = GrammarBuilder::new();
        builder.add_terminal("NUM", "[0-9]+", 0).unwrap();
        builder.add_nonterminal("E", &["T"], "cb").unwrap();
        assert_eq!(
            builder.finish("E"),
            Err(GrammarError::UndefinedProductions("T".to_string()))
        );
    }

    #[test]
    fn nullable_propagates_through_bodies() {
        let mut builder = GrammarBuilder::new();
        builder.add_keyword("x").unwrap();
        builder.add_nonterminal("A", &["@"], "cb").unwrap();
        builder.add_nonterminal("B", &["A"], "cb").unwrap();
        builder.add_nonterminal("S", &["B", "\"x\""], "cb").unwrap();
        let grammar = builder.finish("S").unwrap();
        let find = |name: &str| {
            grammar
                .production_ids()
                .find(|&id| grammar.name(id) == name)
                .unwrap()
        };
        assert!(grammar.nullable(find("A")));
        assert!(grammar.nullable(find("B")));
        assert!(!grammar.nullable(find("S")));
    }

    #[test]
    fn unreachable_nonterminals_are_reported() {
        let mut builder = GrammarBuilder::new();
        builder.add_keyword("x").unwrap();
        builder.add_nonterminal("S", &["\"x\""], "cb").unwrap();
        builder.add_nonterminal("DEAD", &["\"x\""], "cb").unwrap();
        assert_eq!(
            builder.finish("S"),
            Err(GrammarError::UnreachableProductions("DEAD".to_string()))
        );
    }
}
