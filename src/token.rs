//! Shared id newtypes and token descriptors used by both the generator and the runtime.
use nonmax::NonMaxU32;
use serde::{Deserialize, Serialize};

/// The wrapper struct that represents a production node id in the grammar.
///
/// Terminal, operator, nonterminal and end-of-input productions all draw from
/// one dense id space, so a single map keyed by [`ProductionId`] can hold the
/// actions of a syntax-analysis table entry.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ProductionId(pub u32);

impl ProductionId {
    /// Get the id as a plain index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The wrapper struct that represents a reduction-callback id.
///
/// Assigned densely at grammar time; resolved to an actual callback object
/// when the serialized syntax table is loaded.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CallbackId(pub u32);

impl CallbackId {
    /// Get the id as a plain index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The wrapper struct that represents a syntax-analysis table entry id.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntryId(pub u32);

impl EntryId {
    /// Get the id as a plain index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The wrapper struct that represents a row of the minimized tokenizer DFA.
///
/// Backed by [`NonMaxU32`] so `Option<RowId>` stays four bytes wide inside the
/// 256-wide transition rows; the niche is the "no transition" sentinel.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RowId(NonMaxU32);

impl RowId {
    /// Create a row id from a dense index.
    ///
    /// Returns [`None`] if the index does not fit the niche-packed range.
    #[inline]
    pub fn new(index: usize) -> Option<Self> {
        u32::try_from(index).ok().and_then(NonMaxU32::new).map(RowId)
    }

    /// Get the id as a plain index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0.get() as usize
    }
}

impl Serialize for RowId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0.get())
    }
}

impl<'de> Deserialize<'de> for RowId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u32::deserialize(deserializer)?;
        NonMaxU32::new(raw)
            .map(RowId)
            .ok_or_else(|| serde::de::Error::custom("row id out of range"))
    }
}

/// The production kind a token stands for, as recorded in the tokenizer table.
#[derive(
    Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
pub enum TokenKind {
    /// A plain terminal (keyword or regex-defined token).
    Terminal,
    /// An operator lexeme carrying precedence metadata.
    Operator,
    /// The end-of-input record.
    End,
}

/// Operator associativity.
#[derive(
    Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
pub enum Assoc {
    /// Equal priorities resolve toward the phrase already on the stack.
    LeftToRight,
    /// Equal priorities resolve toward the incoming operator.
    RightToLeft,
}

/// One operator semantics: associativity plus parse-time priority.
///
/// Parse-time priorities are strictly separate from token priorities; they
/// arbitrate shift/reduce decisions, never lexing overlaps.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperatorInfo {
    /// Associativity used when priorities tie.
    pub assoc: Assoc,
    /// Priority; higher binds tighter. Never zero (zero is the sentinel frame).
    pub priority: u32,
}

/// The per-token descriptor embedded in accepting tokenizer rows.
///
/// An operator may carry both a binary and a left-unary semantics under one
/// lexeme; the parser picks which applies from its own progress (see
/// [`TokenData::operator_semantics`]).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenData {
    /// The production node this token shifts as.
    pub production: ProductionId,
    /// What flavor of production it is.
    pub kind: TokenKind,
    /// Binary semantics, if declared.
    pub binary: Option<OperatorInfo>,
    /// Left-unary semantics, if declared.
    pub unary: Option<OperatorInfo>,
}

impl TokenData {
    /// Build the descriptor of a plain terminal.
    pub fn terminal(production: ProductionId) -> Self {
        TokenData {
            production,
            kind: TokenKind::Terminal,
            binary: None,
            unary: None,
        }
    }

    /// Build the descriptor of the end-of-input record.
    pub fn end(production: ProductionId) -> Self {
        TokenData {
            production,
            kind: TokenKind::End,
            binary: None,
            unary: None,
        }
    }

    /// Pick the semantics an operator token uses at this point of the parse.
    ///
    /// A completed phrase on the stack (the last operation was a reduce) means
    /// an operand precedes the token, so the binary row applies; otherwise the
    /// left-unary row does. Tokens declaring only one semantics always use it.
    /// Returns [`None`] for non-operators.
    pub fn operator_semantics(&self, last_operation_was_reduce: bool) -> Option<OperatorInfo> {
        match (self.binary, self.unary) {
            (Some(binary), Some(unary)) => Some(if last_operation_was_reduce {
                binary
            } else {
                unary
            }),
            (Some(binary), None) => Some(binary),
            (None, Some(unary)) => Some(unary),
            (None, None) => None,
        }
    }
}

/// A token produced by the tokenizer runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    /// The descriptor of the matched production.
    pub data: TokenData,
    /// The matched bytes.
    pub lexeme: Box<[u8]>,
    /// 1-based line of the first lexeme byte.
    pub line: u32,
    /// 1-based column of the first lexeme byte.
    pub column: u32,
}

impl Token {
    /// The lexeme as text. Invalid UTF-8 bytes are replaced.
    pub fn lexeme_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.lexeme)
    }
}
