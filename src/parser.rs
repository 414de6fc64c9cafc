//! The shift/reduce parser runtime.
//!
//! A frame stack over the syntax-analysis table: shifting records the token
//! on the current top frame and pushes the successor entry; reducing pops
//! one frame per body symbol — skipping slots whose symbol never appeared,
//! which is how nullable nonterminals reach their callbacks as [`None`] —
//! dispatches the reduction, and pushes the goto entry. A sentinel frame at
//! the bottom keeps every pop in bounds.
use std::io::Read;

use crate::lexer::{TokenizeError, Tokenizer};
use crate::reduction::{CallbackRegistry, Payload, ReduceError, Reduction, RegistryError};
use crate::table::{Action, ReduceData, SyntaxTable};
use crate::token::{Assoc, EntryId, ProductionId, Token, TokenKind};

/// The error type for parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The tokenizer failed (I/O or lexical error).
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    /// No action exists for the current entry and lookahead.
    #[error("Syntax error at line {line} column {column}")]
    Syntax {
        /// 1-based line of the offending token.
        line: u32,
        /// 1-based column of the offending token.
        column: u32,
    },
    /// A reduction callback aborted; its diagnostic is reported verbatim.
    #[error("{0}")]
    Reduce(ReduceError),
    /// The loaded tables are inconsistent.
    #[error("internal parser error: {0}")]
    Internal(&'static str),
}

impl ParseError {
    /// The single-line `Parser:`-prefixed diagnostic form.
    pub fn diagnostic(&self) -> String {
        format!("Parser: {self}")
    }
}

struct Frame<V> {
    entry: EntryId,
    shifted: Option<ProductionId>,
    value: Option<Payload<V>>,
    priority: u32,
}

impl<V> Frame<V> {
    fn start(entry: EntryId) -> Self {
        Frame {
            entry,
            shifted: None,
            value: None,
            priority: 0,
        }
    }
}

/// The parser: a syntax-analysis table plus resolved reduction callbacks.
pub struct SyntaxParser<V> {
    table: SyntaxTable,
    callbacks: Vec<Box<dyn Reduction<V>>>,
}

impl<V> std::fmt::Debug for SyntaxParser<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxParser")
            .field("table", &self.table)
            .finish()
    }
}

impl<V> SyntaxParser<V> {
    /// Bind a loaded table to the reduction objects its tags name.
    pub fn new(table: SyntaxTable, registry: CallbackRegistry<V>) -> Result<Self, RegistryError> {
        let callbacks = registry.resolve(&table.callbacks)?;
        Ok(SyntaxParser { table, callbacks })
    }

    /// The bound table.
    pub fn table(&self) -> &SyntaxTable {
        &self.table
    }

    /// Parse one complete input, returning the root phrase's value.
    pub fn parse<R: Read>(&self, tokens: &mut Tokenizer<'_, R>) -> Result<V, ParseError> {
        // sentinel below the real start frame, so reduce never checks depth
        let mut stack: Vec<Frame<V>> = vec![
            Frame::start(self.table.root),
            Frame::start(self.table.root),
        ];
        let mut last_reduce = false;
        let mut token = tokens.next_token()?;
        loop {
            let entry_id = stack.last().expect("sentinel keeps the stack non-empty").entry;
            let Some(action) = self.table.entry(entry_id).action(token.data.production) else {
                return Err(ParseError::Syntax {
                    line: token.line,
                    column: token.column,
                });
            };
            match action {
                Action::Accept => {
                    stack.pop();
                    let holder = stack
                        .last_mut()
                        .expect("sentinel keeps the stack non-empty");
                    return match holder.value.take() {
                        Some(Payload::Node(value)) => Ok(value),
                        _ => Err(ParseError::Internal("accepted phrase has no value")),
                    };
                }
                Action::Shift(next) => {
                    let next = *next;
                    self.shift(&mut stack, next, &mut token, tokens, last_reduce)?;
                    last_reduce = false;
                }
                Action::Reduce(reduce) => {
                    self.reduce(&mut stack, reduce)?;
                    last_reduce = true;
                }
                Action::ShiftReduce { next, reduce } => {
                    if token.data.kind != TokenKind::Operator {
                        return Err(ParseError::Internal(
                            "shift/reduce pair on a non-operator token",
                        ));
                    }
                    let info = token
                        .data
                        .operator_semantics(last_reduce)
                        .ok_or(ParseError::Internal("operator token without semantics"))?;
                    let current = stack
                        .last()
                        .expect("sentinel keeps the stack non-empty")
                        .priority;
                    let should_reduce = current > info.priority
                        || (current == info.priority && info.assoc == Assoc::LeftToRight);
                    if should_reduce {
                        self.reduce(&mut stack, reduce)?;
                        last_reduce = true;
                    } else {
                        let next = *next;
                        self.shift(&mut stack, next, &mut token, tokens, last_reduce)?;
                        last_reduce = false;
                    }
                }
            }
        }
    }

    /// Record the token on the top frame and push the successor entry. An
    /// operator carries its own priority (per its applicable semantics) into
    /// the new frame; anything else inherits the current one.
    fn shift<R: Read>(
        &self,
        stack: &mut Vec<Frame<V>>,
        next: EntryId,
        token: &mut Token,
        tokens: &mut Tokenizer<'_, R>,
        last_reduce: bool,
    ) -> Result<(), ParseError> {
        let incoming = tokens.next_token()?;
        let outgoing = std::mem::replace(token, incoming);
        let top = stack.last_mut().expect("sentinel keeps the stack non-empty");
        let priority = match outgoing.data.operator_semantics(last_reduce) {
            Some(info) if outgoing.data.kind == TokenKind::Operator => info.priority,
            _ => top.priority,
        };
        top.shifted = Some(outgoing.data.production);
        top.value = Some(Payload::Token(outgoing));
        stack.push(Frame {
            entry: next,
            shifted: None,
            value: None,
            priority,
        });
        Ok(())
    }

    fn reduce(&self, stack: &mut Vec<Frame<V>>, reduce: &ReduceData) -> Result<(), ParseError> {
        let mut args: Vec<Option<Payload<V>>> = Vec::with_capacity(reduce.body.len());
        args.resize_with(reduce.body.len(), || None);
        let mut restored = stack.pop().expect("sentinel keeps the stack non-empty");
        for (slot, &expected) in args.iter_mut().zip(reduce.body.iter()).rev() {
            let top = stack.last_mut().expect("sentinel keeps the stack non-empty");
            if top.shifted == Some(expected) {
                *slot = top.value.take();
                restored = stack.pop().expect("sentinel keeps the stack non-empty");
            }
        }
        // the lowest popped frame becomes the receiving frame of the goto
        stack.push(restored);
        let callback = reduce
            .callback
            .ok_or(ParseError::Internal("reduce without a callback"))?;
        let value = self.callbacks[callback.as_usize()]
            .reduce(args)
            .map_err(ParseError::Reduce)?;
        log::debug!("reduced to {:?} via callback {}", reduce.lhs, callback.0);
        let top = stack.last_mut().expect("sentinel keeps the stack non-empty");
        let goto = self
            .table
            .entry(top.entry)
            .goto(reduce.lhs)
            .ok_or(ParseError::Internal("missing goto after reduce"))?;
        top.shifted = Some(reduce.lhs);
        top.value = Some(Payload::Node(value));
        let priority = top.priority;
        stack.push(Frame {
            entry: goto,
            shifted: None,
            value: None,
            priority,
        });
        Ok(())
    }
}
