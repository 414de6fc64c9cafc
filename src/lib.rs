/*!
# parsegen

This crate generates compiler front-ends from declarative grammars: a
minimized DFA recognizing the token alphabet and an LALR(1) syntax-analysis
table driving a reduction-callback parser, plus the table-driven runtime that
tokenizes and parses user source files from the serialized tables.

Here is a quick example of how this crate works:

```rust
use parsegen::{
    Assoc, CallbackRegistry, GeneratorConfig, GrammarBuilder, OperatorKind, Payload, ReduceError,
    SyntaxParser, Tokenizer,
};

let mut grammar = GrammarBuilder::new();
grammar.add_terminal("NUM", "[0-9]+", 0).unwrap();
grammar
    .add_operator("+", Assoc::LeftToRight, 1, OperatorKind::Binary)
    .unwrap();
grammar
    .add_operator("*", Assoc::LeftToRight, 2, OperatorKind::Binary)
    .unwrap();
grammar.add_nonterminal("E", &["E", "\"+\"", "E"], "fold").unwrap();
grammar.add_nonterminal("E", &["E", "\"*\"", "E"], "fold").unwrap();
grammar.add_nonterminal("E", &["NUM"], "leaf").unwrap();
let grammar = grammar.finish("E").unwrap();

let artifacts = parsegen::generate(&grammar, &GeneratorConfig::default()).unwrap();

let mut callbacks = CallbackRegistry::new();
callbacks.register("leaf", |args: Vec<Option<Payload<i64>>>| -> Result<i64, ReduceError> {
    let token = args.into_iter().next().flatten().and_then(Payload::into_token).unwrap();
    token
        .lexeme_str()
        .parse::<i64>()
        .map_err(|error| ReduceError(error.to_string()))
});
callbacks.register("fold", |mut args: Vec<Option<Payload<i64>>>| -> Result<i64, ReduceError> {
    let rhs = args.pop().flatten().and_then(Payload::into_node).unwrap();
    let op = args.pop().flatten().and_then(Payload::into_token).unwrap();
    let lhs = args.pop().flatten().and_then(Payload::into_node).unwrap();
    Ok(match &op.lexeme[..] {
        b"+" => lhs + rhs,
        _ => lhs * rhs,
    })
});
let parser = SyntaxParser::new(artifacts.syntax, callbacks).unwrap();
let mut tokens = Tokenizer::new(&artifacts.lexicon, "1+2*3".as_bytes());
assert_eq!(parser.parse(&mut tokens).unwrap(), 7);
```

# Overview

Generation flows through [`GrammarBuilder`] (productions and analyses),
[`nfa`]/[`dfa`] (token patterns to a minimized transition table) and
[`lalr`] (item sets to a merged syntax-analysis table); [`generate`] drives
the whole pipeline and [`serialize`] writes the two artifact files. At
runtime, [`Tokenizer`] streams tagged tokens from any reader and
[`SyntaxParser`] runs the shift/reduce loop, dispatching completed bodies to
the [`Reduction`](reduction::Reduction) callbacks a [`CallbackRegistry`]
resolved at load time.

# Grammar descriptions

Besides the builder API, [`generate_from_description`] accepts the
line-oriented grammar description format: four sections separated by `@@`
lines (comments start with a single `@`), holding keywords, terminal
definitions, operator definitions and productions:

```text
"if" "while"
@@
ID  -> [a-zA-Z_][a-zA-Z0-9_]*
NUM -> [0-9]+
@@
+ @ 1 @ L { fold } { }
* @ 2 @ L { fold } { }
@@
E -> E "+" E | E "*" E => { fold } { }
E -> ID | NUM          => { leaf } { }
```

Terminal patterns support concatenation, `[...]` classes with ranges and
escapes, `(...)` groups, postfix `*` `+` `?`, `\c` escapes and `|`
alternation over an 8-bit alphabet. Operators declare `lexeme @ priority @
associativity`; declaring the same lexeme twice gives it both binary and
left-unary semantics, disambiguated at parse time from the parser's own
progress. In production bodies, quoted tokens are anonymous terminals, `@`
alone marks the nonterminal nullable, and `|` separates alternatives sharing
one callback.
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
pub mod arena;
pub mod config;
pub mod dfa;
pub mod generator;
pub mod grammar;
pub mod grammar_file;
pub mod intern;
pub mod lalr;
pub mod lexer;
pub mod nfa;
pub mod parser;
pub mod reduction;
pub mod regex;
pub mod serialize;
pub mod table;
pub mod token;
pub mod utils;

pub use config::GeneratorConfig;
pub use generator::{generate, generate_from_description, Artifacts, GenerateError};
pub use grammar::{Grammar, GrammarBuilder, OperatorKind};
pub use lexer::{TokenizeError, Tokenizer};
pub use parser::{ParseError, SyntaxParser};
pub use reduction::{CallbackRegistry, Payload, ReduceError, Reduction};
pub use token::{Assoc, Token, TokenData, TokenKind};
