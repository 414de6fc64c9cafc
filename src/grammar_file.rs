//! The grammar-description reader.
//!
//! Line-oriented text in four sections separated by `@@` lines; a line
//! starting with a single `@` is a comment. Sections in order: keywords,
//! terminal definitions, operator definitions, productions. The first
//! declaration of an operator lexeme supplies its binary semantics, a second
//! declaration its left-unary one. `{ include_files }` groups are accepted
//! and discarded; they drove code emission in the systems this format comes
//! from.
use ahash::AHashSet;
use nom::bytes::complete::{is_not, tag, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0, one_of};
use nom::combinator::{all_consuming, opt, recognize};
use nom::multi::many1;
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::IResult;

use crate::grammar::{GrammarBuilder, GrammarError, OperatorKind};
use crate::token::Assoc;

/// The error type for description reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptionError {
    /// A line does not match its section's shape.
    #[error("malformed {section} at line {line}: {text:?}")]
    Malformed {
        /// What the section expected.
        section: &'static str,
        /// 1-based line number.
        line: usize,
        /// The offending line.
        text: String,
    },
    /// Registration of a parsed declaration failed.
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    /// The production section is empty; there is nothing to parse toward.
    #[error("the description declares no production")]
    NoProductions,
}

/// Read a description into a grammar builder.
///
/// Returns the builder plus the root name: the left-hand side of the first
/// production.
pub fn parse_description(text: &str) -> Result<(GrammarBuilder, String), DescriptionError> {
    let mut builder = GrammarBuilder::new();
    let mut seen_operators: AHashSet<String> = AHashSet::new();
    let mut section = 0usize;
    let mut root: Option<String> = None;
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('@') {
            if rest.starts_with('@') {
                section += 1;
                if section > 3 {
                    break;
                }
            }
            continue;
        }
        match section {
            0 => {
                let keywords = keywords_line(line).ok_or_else(|| DescriptionError::Malformed {
                    section: "keyword declaration",
                    line: line_no,
                    text: line.to_string(),
                })?;
                for keyword in keywords {
                    builder.add_keyword(keyword)?;
                }
            }
            1 => {
                let (name, pattern) =
                    terminal_line(line).ok_or_else(|| DescriptionError::Malformed {
                        section: "terminal definition",
                        line: line_no,
                        text: line.to_string(),
                    })?;
                builder.add_terminal(name, pattern, 0)?;
            }
            2 => {
                let (symbol, priority, assoc) =
                    operator_line(line).ok_or_else(|| DescriptionError::Malformed {
                        section: "operator definition",
                        line: line_no,
                        text: line.to_string(),
                    })?;
                let kind = if seen_operators.insert(symbol.to_string()) {
                    OperatorKind::Binary
                } else {
                    OperatorKind::LeftUnary
                };
                builder.add_operator(symbol, assoc, priority, kind)?;
            }
            _ => {
                let (lhs, bodies, callback) =
                    production_line(line).ok_or_else(|| DescriptionError::Malformed {
                        section: "production",
                        line: line_no,
                        text: line.to_string(),
                    })?;
                for body in &bodies {
                    builder.add_nonterminal(lhs, body, &callback)?;
                }
                if root.is_none() {
                    root = Some(lhs.to_string());
                }
            }
        }
    }
    match root {
        Some(root) => Ok((builder, root)),
        None => Err(DescriptionError::NoProductions),
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        one_of("abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_"),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), is_not("\""), char('"'))(input)
}

fn braced(input: &str) -> IResult<&str, Option<&str>> {
    preceded(
        multispace0,
        delimited(char('{'), opt(is_not("}")), char('}')),
    )(input)
}

fn keywords_line(line: &str) -> Option<Vec<&str>> {
    all_consuming(terminated(
        many1(preceded(multispace0, quoted)),
        multispace0,
    ))(line)
    .ok()
    .map(|(_, keywords)| keywords)
}

fn terminal_line(line: &str) -> Option<(&str, &str)> {
    let (rest, name) = preceded(multispace0, identifier)(line).ok()?;
    let (pattern, _) =
        delimited(multispace0::<&str, nom::error::Error<&str>>, tag("->"), multispace0)(rest)
            .ok()?;
    let pattern = pattern.trim_end();
    if pattern.is_empty() {
        None
    } else {
        Some((name, pattern))
    }
}

fn operator_line(line: &str) -> Option<(&str, u32, Assoc)> {
    let (rest, symbol) = preceded(
        multispace0::<&str, nom::error::Error<&str>>,
        take_while1(|c: char| !c.is_whitespace() && c != '@'),
    )(line)
    .ok()?;
    let (rest, _) =
        delimited(multispace0::<&str, nom::error::Error<&str>>, char('@'), multispace0)(rest)
            .ok()?;
    let (rest, digits) = digit1::<&str, nom::error::Error<&str>>(rest).ok()?;
    let priority: u32 = digits.parse().ok()?;
    let (rest, _) =
        delimited(multispace0::<&str, nom::error::Error<&str>>, char('@'), multispace0)(rest)
            .ok()?;
    let (rest, assoc) = one_of::<&str, &str, nom::error::Error<&str>>("LR")(rest).ok()?;
    let assoc = match assoc {
        'L' => Assoc::LeftToRight,
        _ => Assoc::RightToLeft,
    };
    let (rest, _callback) = opt(braced)(rest).ok()?;
    let (rest, _includes) = opt(braced)(rest).ok()?;
    if rest.trim().is_empty() {
        Some((symbol, priority, assoc))
    } else {
        None
    }
}

fn production_line(line: &str) -> Option<(&str, Vec<Vec<&str>>, String)> {
    let (rest, lhs) = preceded(multispace0, identifier)(line).ok()?;
    let (rest, _) =
        delimited(multispace0::<&str, nom::error::Error<&str>>, tag("->"), multispace0)(rest)
            .ok()?;
    let arrow = rest.find("=>")?;
    let (rhs_text, tail) = rest.split_at(arrow);
    let tail = &tail[2..];
    let (tail, callback) = braced(tail).ok()?;
    let callback = callback.map(str::trim).unwrap_or_default().to_string();
    if callback.is_empty() {
        return None;
    }
    let (tail, _includes) = opt(braced)(tail).ok()?;
    if !tail.trim().is_empty() {
        return None;
    }
    let mut bodies = Vec::new();
    for branch in rhs_text.split('|') {
        let tokens = rhs_tokens(branch)?;
        if tokens.is_empty() {
            return None;
        }
        bodies.push(tokens);
    }
    Some((lhs, bodies, callback))
}

/// Tokenize one RHS alternative: identifiers, quoted literals (kept with
/// their quotes, the shape `GrammarBuilder::add_nonterminal` expects), and
/// the `@` nullable marker.
fn rhs_tokens(branch: &str) -> Option<Vec<&str>> {
    let mut tokens = Vec::new();
    let mut input = branch.trim_start();
    while !input.is_empty() {
        if let Some(inner) = input.strip_prefix('"') {
            let close = inner.find('"')?;
            let end = close + 2;
            tokens.push(&input[..end]);
            input = input[end..].trim_start();
        } else if let Some(rest) = input.strip_prefix('@') {
            tokens.push("@");
            input = rest.trim_start();
        } else {
            let (rest, ident) = identifier(input).ok()?;
            tokens.push(ident);
            input = rest.trim_start();
        }
    }
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_description_parses() {
        let text = r#"
@ the keyword section
"if" "while"
@@
ID -> [a-zA-Z_][a-zA-Z0-9_]*
NUM -> [0-9]+
@@
+ @ 1 @ L { fold_add } { }
* @ 2 @ L { fold_mul } { }
@@
E -> E "+" E | E "*" E => { fold } { }
E -> ID => { leaf } { }
E -> NUM => { leaf } { }
"#;
        let (builder, root) = parse_description(text).unwrap();
        assert_eq!(root, "E");
        let grammar = builder.finish(&root).unwrap();
        let names: Vec<&str> = grammar
            .production_ids()
            .map(|id| grammar.name(id))
            .collect();
        for expected in ["if", "while", "ID", "NUM", "+", "*", "E"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn nullable_marker_and_second_operator_declaration() {
        let text = r#"
@@
ITEM -> [a-z]+
@@
- @ 1 @ L { sub } { }
- @ 3 @ R { neg } { }
@@
L -> @ | L ITEM => { snoc } { }
"#;
        let (builder, root) = parse_description(text).unwrap();
        let grammar = builder.finish(&root).unwrap();
        let minus = grammar
            .production_ids()
            .find(|&id| grammar.name(id) == "-")
            .unwrap();
        let data = grammar.token_data(minus);
        assert_eq!(data.binary.map(|i| i.priority), Some(1));
        assert_eq!(data.unary.map(|i| i.priority), Some(3));
        let list = grammar
            .production_ids()
            .find(|&id| grammar.name(id) == "L")
            .unwrap();
        assert!(grammar.nullable(list));
        assert_eq!(grammar.bodies(list).len(), 1);
    }

    #[test]
    fn malformed_lines_are_reported_with_position() {
        let text = "@@\nNUM 123\n@@\n@@\nE -> NUM => { leaf } { }\n";
        match parse_description(text) {
            Err(DescriptionError::Malformed { section, line, .. }) => {
                assert_eq!(section, "terminal definition");
                assert_eq!(line, 2);
            }
            other => panic!("expected a malformed-line error, got {other:?}"),
        }
    }
}
