use std::cell::RefCell;
use std::rc::Rc;

use insta::assert_snapshot;
use parsegen::lexer::TokenizeError;
use parsegen::serialize::{load_lexicon, load_syntax, save_lexicon, save_syntax};
use parsegen::{
    generate, generate_from_description, Assoc, CallbackRegistry, GeneratorConfig, Grammar,
    GrammarBuilder, OperatorKind, ParseError, Payload, ReduceError, SyntaxParser, TokenKind,
    Tokenizer,
};

type Log = Rc<RefCell<Vec<String>>>;

fn expression_grammar() -> Grammar {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("ID", "[a-zA-Z]+", 0).unwrap();
    builder.add_terminal("NUM", "[0-9]+", 0).unwrap();
    builder
        .add_operator("+", Assoc::LeftToRight, 1, OperatorKind::Binary)
        .unwrap();
    builder
        .add_operator("*", Assoc::LeftToRight, 2, OperatorKind::Binary)
        .unwrap();
    builder
        .add_nonterminal("E", &["E", "\"+\"", "E"], "fold")
        .unwrap();
    builder
        .add_nonterminal("E", &["E", "\"*\"", "E"], "fold")
        .unwrap();
    builder.add_nonterminal("E", &["ID"], "leaf").unwrap();
    builder.add_nonterminal("E", &["NUM"], "leaf").unwrap();
    builder.finish("E").unwrap()
}

/// `leaf` returns the lexeme, `fold` builds `(lhs op rhs)`; both append to
/// the shared log so tests can assert the exact reduction order.
fn expression_callbacks(log: &Log) -> CallbackRegistry<String> {
    let mut registry = CallbackRegistry::new();
    let leaf_log = log.clone();
    registry.register("leaf", move |args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        let token = args
            .into_iter()
            .next()
            .flatten()
            .and_then(Payload::into_token)
            .ok_or_else(|| ReduceError("leaf expects a token".to_string()))?;
        let text = token.lexeme_str().into_owned();
        leaf_log.borrow_mut().push(format!("leaf:{text}"));
        Ok(text)
    });
    let fold_log = log.clone();
    registry.register("fold", move |mut args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        let rhs = args
            .pop()
            .flatten()
            .and_then(Payload::into_node)
            .ok_or_else(|| ReduceError("fold expects a right operand".to_string()))?;
        let op = args
            .pop()
            .flatten()
            .and_then(Payload::into_token)
            .ok_or_else(|| ReduceError("fold expects an operator".to_string()))?;
        let lhs = args
            .pop()
            .flatten()
            .and_then(Payload::into_node)
            .ok_or_else(|| ReduceError("fold expects a left operand".to_string()))?;
        let text = format!("({lhs}{}{rhs})", op.lexeme_str());
        fold_log.borrow_mut().push(format!("fold:{text}"));
        Ok(text)
    });
    registry
}

fn parse_expression(grammar: &Grammar, config: &GeneratorConfig, input: &str) -> (String, Vec<String>) {
    let artifacts = generate(grammar, config).unwrap();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let parser = SyntaxParser::new(artifacts.syntax, expression_callbacks(&log)).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, input.as_bytes());
    let value = parser.parse(&mut tokens).unwrap();
    let entries = log.borrow().clone();
    (value, entries)
}

#[test]
fn s1_reduction_order() {
    let grammar = expression_grammar();
    let (value, log) = parse_expression(&grammar, &GeneratorConfig::default(), "a+2*b");
    assert_eq!(value, "(a+(2*b))");
    assert_eq!(
        log,
        vec![
            "leaf:a",
            "leaf:2",
            "leaf:b",
            "fold:(2*b)",
            "fold:(a+(2*b))",
        ]
    );
}

#[test]
fn s2_left_associativity_and_precedence() {
    let grammar = expression_grammar();
    let (value, log) = parse_expression(&grammar, &GeneratorConfig::default(), "2*3+4");
    assert_eq!(value, "((2*3)+4)");
    assert_eq!(
        log,
        vec![
            "leaf:2",
            "leaf:3",
            "fold:(2*3)",
            "leaf:4",
            "fold:((2*3)+4)",
        ]
    );
}

#[test]
fn right_associative_operators_shift() {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("ID", "[a-z]+", 0).unwrap();
    builder
        .add_operator("=", Assoc::RightToLeft, 1, OperatorKind::Binary)
        .unwrap();
    builder
        .add_nonterminal("E", &["E", "\"=\"", "E"], "fold")
        .unwrap();
    builder.add_nonterminal("E", &["ID"], "leaf").unwrap();
    let grammar = builder.finish("E").unwrap();
    let (value, _) = parse_expression(&grammar, &GeneratorConfig::default(), "a=b=c");
    assert_eq!(value, "(a=(b=c))");
}

#[test]
fn s3_unary_and_binary_minus_share_a_lexeme() {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("ID", "[a-z]+", 0).unwrap();
    builder
        .add_operator("-", Assoc::LeftToRight, 1, OperatorKind::Binary)
        .unwrap();
    builder
        .add_operator("-", Assoc::RightToLeft, 3, OperatorKind::LeftUnary)
        .unwrap();
    builder
        .add_nonterminal("E", &["\"-\"", "E"], "neg")
        .unwrap();
    builder
        .add_nonterminal("E", &["E", "\"-\"", "E"], "sub")
        .unwrap();
    builder.add_nonterminal("E", &["ID"], "leaf").unwrap();
    let grammar = builder.finish("E").unwrap();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();

    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut registry = CallbackRegistry::new();
    let leaf_log = log.clone();
    registry.register("leaf", move |args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        let token = args
            .into_iter()
            .next()
            .flatten()
            .and_then(Payload::into_token)
            .ok_or_else(|| ReduceError("leaf expects a token".to_string()))?;
        let text = token.lexeme_str().into_owned();
        leaf_log.borrow_mut().push(format!("leaf:{text}"));
        Ok(text)
    });
    let neg_log = log.clone();
    registry.register("neg", move |mut args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        let operand = args
            .pop()
            .flatten()
            .and_then(Payload::into_node)
            .ok_or_else(|| ReduceError("neg expects an operand".to_string()))?;
        let text = format!("(-{operand})");
        neg_log.borrow_mut().push(format!("neg:{text}"));
        Ok(text)
    });
    let sub_log = log.clone();
    registry.register("sub", move |mut args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        let rhs = args
            .pop()
            .flatten()
            .and_then(Payload::into_node)
            .ok_or_else(|| ReduceError("sub expects a right operand".to_string()))?;
        args.pop();
        let lhs = args
            .pop()
            .flatten()
            .and_then(Payload::into_node)
            .ok_or_else(|| ReduceError("sub expects a left operand".to_string()))?;
        let text = format!("({lhs}-{rhs})");
        sub_log.borrow_mut().push(format!("sub:{text}"));
        Ok(text)
    });
    let parser = SyntaxParser::new(artifacts.syntax, registry).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "-a-b".as_bytes());
    let value = parser.parse(&mut tokens).unwrap();
    // the leading minus binds as unary, the second as binary
    assert_eq!(value, "((-a)-b)");
    assert_eq!(
        log.borrow().clone(),
        vec!["leaf:a", "neg:(-a)", "leaf:b", "sub:((-a)-b)"]
    );
}

#[test]
fn binary_only_operators_reject_prefix_use() {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("ID", "[a-z]+", 0).unwrap();
    builder
        .add_operator("-", Assoc::LeftToRight, 1, OperatorKind::Binary)
        .unwrap();
    builder
        .add_nonterminal("E", &["E", "\"-\"", "E"], "fold")
        .unwrap();
    builder.add_nonterminal("E", &["ID"], "leaf").unwrap();
    let grammar = builder.finish("E").unwrap();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let parser = SyntaxParser::new(artifacts.syntax, expression_callbacks(&log)).unwrap();

    let mut tokens = Tokenizer::new(&artifacts.lexicon, "a-b".as_bytes());
    assert_eq!(parser.parse(&mut tokens).unwrap(), "(a-b)");

    let mut tokens = Tokenizer::new(&artifacts.lexicon, "-a".as_bytes());
    assert!(matches!(
        parser.parse(&mut tokens),
        Err(ParseError::Syntax { line: 1, column: 1 })
    ));
}

#[test]
fn s4_nullable_body_passes_none() {
    let mut builder = GrammarBuilder::new();
    builder.add_nonterminal("L", &["@"], "snoc").unwrap();
    builder
        .add_nonterminal("L", &["L", "\"item\""], "snoc")
        .unwrap();
    let grammar = builder.finish("L").unwrap();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();

    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let snoc_log = log.clone();
    let mut registry = CallbackRegistry::new();
    registry.register("snoc", move |mut args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        let item = args
            .pop()
            .flatten()
            .and_then(Payload::into_token)
            .ok_or_else(|| ReduceError("snoc expects an item".to_string()))?;
        assert_eq!(&item.lexeme[..], b"item");
        let count = match args.pop().flatten() {
            Some(Payload::Node(prefix)) => prefix.parse::<usize>().unwrap(),
            Some(Payload::Token(_)) => {
                return Err(ReduceError("snoc expects a list prefix".to_string()))
            }
            None => 0,
        };
        let slot = if count == 0 { "none" } else { "some" };
        snoc_log.borrow_mut().push(format!("snoc:{count}:{slot}"));
        Ok((count + 1).to_string())
    });
    let parser = SyntaxParser::new(artifacts.syntax, registry).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "item item item".as_bytes());
    let value = parser.parse(&mut tokens).unwrap();
    assert_eq!(value, "3");
    // three reduces of L -> L item; only the first misses its L slot
    assert_eq!(
        log.borrow().clone(),
        vec!["snoc:0:none", "snoc:1:some", "snoc:2:some"]
    );
}

#[test]
fn s5_positions_advance_across_whitespace() {
    let grammar = expression_grammar();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "42 7\n  x".as_bytes());

    let first = tokens.next_token().unwrap();
    assert_eq!(&first.lexeme[..], b"42");
    assert_eq!((first.line, first.column), (1, 1));

    let second = tokens.next_token().unwrap();
    assert_eq!(&second.lexeme[..], b"7");
    assert_eq!((second.line, second.column), (1, 4));

    let third = tokens.next_token().unwrap();
    assert_eq!(&third.lexeme[..], b"x");
    assert_eq!((third.line, third.column), (2, 3));

    let end = tokens.next_token().unwrap();
    assert_eq!(end.data.kind, TokenKind::End);
}

#[test]
fn tokenizer_pushback_is_lifo() {
    let grammar = expression_grammar();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "a b".as_bytes());
    let a = tokens.next_token().unwrap();
    let b = tokens.next_token().unwrap();
    tokens.putback(a.clone());
    tokens.putback(b.clone());
    assert_eq!(tokens.next_token().unwrap(), b);
    assert_eq!(tokens.next_token().unwrap(), a);
    assert_eq!(tokens.next_token().unwrap().data.kind, TokenKind::End);
}

#[test]
fn s6_lexical_error_positions() {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("ID", "[a-z]", 0).unwrap();
    builder.add_nonterminal("E", &["ID"], "leaf").unwrap();
    let grammar = builder.finish("E").unwrap();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let parser = SyntaxParser::new(artifacts.syntax, expression_callbacks(&log)).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "1".as_bytes());
    let error = parser.parse(&mut tokens).unwrap_err();
    assert!(matches!(
        error,
        ParseError::Tokenize(TokenizeError::Lexical {
            line: 1,
            column: 1,
            byte: b'1'
        })
    ));
    assert_snapshot!(
        error.diagnostic(),
        @"Parser: Lexical error at line 1 column 1: no token matches byte 0x31"
    );
}

#[test]
fn truncated_lexeme_reports_unexpected_end() {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("AB", "ab", 0).unwrap();
    builder.add_nonterminal("E", &["AB"], "leaf").unwrap();
    let grammar = builder.finish("E").unwrap();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "a".as_bytes());
    assert!(matches!(
        tokens.next_token(),
        Err(TokenizeError::LexicalEof { line: 1, column: 1 })
    ));
}

#[test]
fn equal_priority_overlap_is_rejected_at_generation() {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("A", "x", 0).unwrap();
    builder.add_terminal("B", "x", 0).unwrap();
    builder.add_nonterminal("E", &["A"], "leaf").unwrap();
    let grammar = builder.finish("E").unwrap();
    let error = generate(&grammar, &GeneratorConfig::default()).unwrap_err();
    assert_snapshot!(
        error.diagnostic(),
        @r#"Generator: tokens "A" and "B" accept the same lexeme at equal priority 0"#
    );
}

#[test]
fn keyword_priority_beats_identifier_priority() {
    let mut builder = GrammarBuilder::new();
    builder.add_keyword("if").unwrap();
    builder.add_terminal("ID", "[a-z]+", 0).unwrap();
    builder.add_nonterminal("E", &["ID"], "leaf").unwrap();
    let grammar = builder.finish("E").unwrap();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "if iffy".as_bytes());
    let first = tokens.next_token().unwrap();
    let second = tokens.next_token().unwrap();
    assert_ne!(first.data.production, second.data.production);
    assert_eq!(&first.lexeme[..], b"if");
    assert_eq!(&second.lexeme[..], b"iffy");
}

#[test]
fn reduce_reduce_conflicts_are_fatal() {
    let mut builder = GrammarBuilder::new();
    builder.add_terminal("X", "x", 0).unwrap();
    builder.add_nonterminal("A", &["X"], "a").unwrap();
    builder.add_nonterminal("B", &["X"], "b").unwrap();
    builder.add_nonterminal("S", &["A"], "s").unwrap();
    builder.add_nonterminal("S", &["B"], "s").unwrap();
    let grammar = builder.finish("S").unwrap();
    let error = generate(&grammar, &GeneratorConfig::default()).unwrap_err();
    assert!(error.diagnostic().starts_with("Generator: grammar ambiguous"));
}

#[test]
fn callback_errors_abort_verbatim() {
    let grammar = expression_grammar();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let mut registry = CallbackRegistry::new();
    registry.register("leaf", |_args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        Err(ReduceError("leaf exploded".to_string()))
    });
    registry.register("fold", |_args: Vec<Option<Payload<String>>>| -> Result<String, ReduceError> {
        Err(ReduceError("fold exploded".to_string()))
    });
    let parser = SyntaxParser::new(artifacts.syntax, registry).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "a".as_bytes());
    let error = parser.parse(&mut tokens).unwrap_err();
    assert_eq!(error.to_string(), "leaf exploded");
    assert_eq!(error.diagnostic(), "Parser: leaf exploded");
}

#[test]
fn missing_callbacks_are_reported_at_load() {
    let grammar = expression_grammar();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let registry: CallbackRegistry<String> = CallbackRegistry::new();
    let error = SyntaxParser::new(artifacts.syntax, registry).unwrap_err();
    assert_eq!(
        error.to_string(),
        "no reduction registered for callback tag \"fold\""
    );
}

#[test]
fn table_compaction_preserves_the_callback_sequence() {
    let grammar = expression_grammar();
    let compact = GeneratorConfig::default();
    let plain = GeneratorConfig {
        compaction_enabled: false,
        ..GeneratorConfig::default()
    };
    for input in ["a+2*b", "2*3+4", "a*b*c+d"] {
        let (value_compact, log_compact) = parse_expression(&grammar, &compact, input);
        let (value_plain, log_plain) = parse_expression(&grammar, &plain, input);
        assert_eq!(value_compact, value_plain, "input {input}");
        assert_eq!(log_compact, log_plain, "input {input}");
    }
    let merged = generate(&grammar, &compact).unwrap();
    let unmerged = generate(&grammar, &plain).unwrap();
    assert!(merged.syntax.len() <= unmerged.syntax.len());
}

#[test]
fn nfa_merge_optimization_preserves_the_language() {
    let grammar = expression_grammar();
    let merged = GeneratorConfig::default();
    let plain = GeneratorConfig {
        merge_enabled: false,
        ..GeneratorConfig::default()
    };
    for input in ["a+2*b", "zz*9"] {
        let (value_merged, _) = parse_expression(&grammar, &merged, input);
        let (value_plain, _) = parse_expression(&grammar, &plain, input);
        assert_eq!(value_merged, value_plain, "input {input}");
    }
}

#[test]
fn generation_is_deterministic() {
    let grammar = expression_grammar();
    let one = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let two = generate(&grammar, &GeneratorConfig::default()).unwrap();
    assert_eq!(one, two);

    let mut lexicon_one = Vec::new();
    let mut lexicon_two = Vec::new();
    save_lexicon(&mut lexicon_one, &one.lexicon).unwrap();
    save_lexicon(&mut lexicon_two, &two.lexicon).unwrap();
    assert_eq!(lexicon_one, lexicon_two, "serialized bytes are bit-stable");

    let mut syntax_one = Vec::new();
    let mut syntax_two = Vec::new();
    save_syntax(&mut syntax_one, &one.syntax).unwrap();
    save_syntax(&mut syntax_two, &two.syntax).unwrap();
    assert_eq!(syntax_one, syntax_two, "serialized bytes are bit-stable");
}

#[test]
fn serialized_tables_drive_the_same_parse() {
    let grammar = expression_grammar();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let mut lexicon_bytes = Vec::new();
    let mut syntax_bytes = Vec::new();
    save_lexicon(&mut lexicon_bytes, &artifacts.lexicon).unwrap();
    save_syntax(&mut syntax_bytes, &artifacts.syntax).unwrap();

    let lexicon = load_lexicon(lexicon_bytes.as_slice()).unwrap();
    let syntax = load_syntax(syntax_bytes.as_slice()).unwrap();
    assert_eq!(lexicon, artifacts.lexicon);

    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let parser = SyntaxParser::new(syntax, expression_callbacks(&log)).unwrap();
    let mut tokens = Tokenizer::new(&lexicon, "a+2*b".as_bytes());
    assert_eq!(parser.parse(&mut tokens).unwrap(), "(a+(2*b))");
}

#[test]
fn description_text_drives_the_full_pipeline() {
    let text = r#"
@ expression grammar
@@
ID  -> [a-zA-Z]+
NUM -> [0-9]+
@@
+ @ 1 @ L { fold } { }
* @ 2 @ L { fold } { }
@@
E -> E "+" E | E "*" E => { fold } { }
E -> ID                => { leaf } { }
E -> NUM               => { leaf } { }
"#;
    let artifacts = generate_from_description(text, &GeneratorConfig::default()).unwrap();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let parser = SyntaxParser::new(artifacts.syntax, expression_callbacks(&log)).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "a+2*b".as_bytes());
    assert_eq!(parser.parse(&mut tokens).unwrap(), "(a+(2*b))");
    assert_eq!(
        log.borrow().clone(),
        vec![
            "leaf:a",
            "leaf:2",
            "leaf:b",
            "fold:(2*b)",
            "fold:(a+(2*b))",
        ]
    );
}

#[test]
fn syntax_errors_carry_token_positions() {
    let grammar = expression_grammar();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let parser = SyntaxParser::new(artifacts.syntax, expression_callbacks(&log)).unwrap();
    let mut tokens = Tokenizer::new(&artifacts.lexicon, "a+\n+b".as_bytes());
    let error = parser.parse(&mut tokens).unwrap_err();
    assert!(matches!(
        error,
        ParseError::Syntax { line: 2, column: 1 }
    ));
}

#[test]
fn table_display_form_names_productions() {
    let grammar = expression_grammar();
    let artifacts = generate(&grammar, &GeneratorConfig::default()).unwrap();
    let rendered = artifacts.syntax.display_form(&grammar);
    assert!(rendered.contains("accept"), "{rendered}");
    assert!(rendered.contains("\"E\""), "{rendered}");
    assert!(rendered.contains("shift"), "{rendered}");
    assert!(rendered.contains("reduce"), "{rendered}");
}
