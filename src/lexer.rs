//! The table-driven tokenizer runtime.
//!
//! Streams bytes from a reader with a single byte of lookahead, skips
//! whitespace between lexemes while tracking line/column, walks the DFA rows
//! as far as they transition, and emits the last row's token descriptor.
//! Supports LIFO pushback for callers that consume speculatively.
use std::io::Read;

use tinyvec::TinyVec;

use crate::dfa::DfaTable;
use crate::token::Token;

/// The error type for tokenization.
#[derive(Debug, thiserror::Error)]
pub enum TokenizeError {
    /// An underlying I/O failure.
    #[error("input I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No token accepts the input at this position.
    #[error("Lexical error at line {line} column {column}: no token matches byte 0x{byte:02x}")]
    Lexical {
        /// 1-based line of the offending byte.
        line: u32,
        /// 1-based column of the offending byte.
        column: u32,
        /// The byte no row could consume.
        byte: u8,
    },
    /// The input ended in the middle of a lexeme no row accepts.
    #[error("Lexical error at line {line} column {column}: unexpected end of input")]
    LexicalEof {
        /// 1-based line where the lexeme started.
        line: u32,
        /// 1-based column where the lexeme started.
        column: u32,
    },
}

/// The tokenizer: a DFA table walking a byte stream.
pub struct Tokenizer<'t, R> {
    table: &'t DfaTable,
    input: R,
    lookahead: Option<u8>,
    exhausted: bool,
    line: u32,
    column: u32,
    pushback: Vec<Token>,
}

impl<'t> Tokenizer<'t, std::io::BufReader<std::fs::File>> {
    /// Open a user-source file for tokenization.
    pub fn from_path(
        table: &'t DfaTable,
        path: impl AsRef<std::path::Path>,
    ) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Tokenizer::new(table, std::io::BufReader::new(file)))
    }
}

impl<'t, R: Read> Tokenizer<'t, R> {
    /// Create a tokenizer over a reader. Wrap unbuffered readers in a
    /// [`std::io::BufReader`] first; the tokenizer reads one byte at a time.
    pub fn new(table: &'t DfaTable, input: R) -> Self {
        Tokenizer {
            table,
            input,
            lookahead: None,
            exhausted: false,
            line: 0,
            column: 0,
            pushback: Vec::new(),
        }
    }

    /// 1-based current position, for diagnostics.
    pub fn position(&self) -> (u32, u32) {
        (self.line + 1, self.column + 1)
    }

    /// Give a token back; the next [`Tokenizer::next_token`] returns it.
    pub fn putback(&mut self, token: Token) {
        self.pushback.push(token);
    }

    fn peek(&mut self) -> Result<Option<u8>, TokenizeError> {
        if self.lookahead.is_none() && !self.exhausted {
            let mut buffer = [0u8; 1];
            loop {
                match self.input.read(&mut buffer) {
                    Ok(0) => {
                        self.exhausted = true;
                        break;
                    }
                    Ok(_) => {
                        self.lookahead = Some(buffer[0]);
                        break;
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(error) => return Err(error.into()),
                }
            }
        }
        Ok(self.lookahead)
    }

    fn consume(&mut self) -> Option<u8> {
        let byte = self.lookahead.take();
        match byte {
            Some(b'\n') => {
                self.line += 1;
                self.column = 0;
            }
            Some(_) => self.column += 1,
            None => {}
        }
        byte
    }

    /// Produce the next token, the file-end record on exhausted input, or a
    /// lexical error.
    ///
    /// Every successful call consumes at least one byte or reaches end of
    /// input, so tokenization always terminates.
    pub fn next_token(&mut self) -> Result<Token, TokenizeError> {
        if let Some(token) = self.pushback.pop() {
            return Ok(token);
        }
        while let Some(byte) = self.peek()? {
            if byte.is_ascii_whitespace() {
                self.consume();
            } else {
                break;
            }
        }
        let (start_line, start_column) = self.position();
        let mut row = self.table.start;
        let mut lexeme: TinyVec<[u8; 16]> = TinyVec::default();
        loop {
            let Some(byte) = self.peek()? else {
                break;
            };
            match self.table.row(row).successor(byte) {
                Some(next) => {
                    lexeme.push(byte);
                    self.consume();
                    row = next;
                }
                None => break,
            }
        }
        if lexeme.is_empty() {
            return match self.peek()? {
                None => Ok(Token {
                    data: self.table.file_end,
                    lexeme: Box::new([]),
                    line: start_line,
                    column: start_column,
                }),
                Some(byte) => {
                    let (line, column) = self.position();
                    Err(TokenizeError::Lexical { line, column, byte })
                }
            };
        }
        match self.table.row(row).accept {
            Some(data) => Ok(Token {
                data,
                lexeme: lexeme.to_vec().into_boxed_slice(),
                line: start_line,
                column: start_column,
            }),
            None => match self.peek()? {
                Some(byte) => {
                    let (line, column) = self.position();
                    Err(TokenizeError::Lexical { line, column, byte })
                }
                None => Err(TokenizeError::LexicalEof {
                    line: start_line,
                    column: start_column,
                }),
            },
        }
    }
}
