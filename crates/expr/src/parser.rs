//! A `nom`-based tokenizer for the conditional expression language used in
//! `test` attributes.

use crate::error::ExprError;
use crate::{Op, Token, Value};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    combinator::{map, opt, recognize},
    sequence::{delimited, pair},
};

/// Split an expression into tokens. Anything the grammar does not know is an
/// immediate parse error; there are no identifiers in this language.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut rest = input.trim_start();
    let mut tokens = Vec::new();
    while !rest.is_empty() {
        match token(rest) {
            Ok((next, tok)) => {
                tokens.push(tok);
                rest = next.trim_start();
            }
            Err(_) => {
                return Err(ExprError::Parse(rest.chars().take(16).collect()));
            }
        }
    }
    Ok(tokens)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((number, quoted, keyword, operator)).parse(input)
}

// Numbers are integers unless a '.' appears in the digit span.
fn number(input: &str) -> IResult<&str, Token> {
    let (rest, text) = recognize(pair(
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit() || c == '.'),
    ))
    .parse(input)?;
    let value = if text.contains('.') {
        text.parse::<f64>().map(Value::Float).ok()
    } else {
        text.parse::<i64>().map(Value::Int).ok()
    };
    match value {
        Some(v) => Ok((rest, Token::Literal(v))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn quoted(input: &str) -> IResult<&str, Token> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |s: &str| Token::Literal(Value::Str(s.to_string())),
    )
    .parse(input)
}

// `true` and `false` arrive pre-reduced, as if a parenthesised group had
// already collapsed.
fn keyword(input: &str) -> IResult<&str, Token> {
    alt((
        map(tag("true"), |_| Token::SubResult(true)),
        map(tag("false"), |_| Token::SubResult(false)),
    ))
    .parse(input)
}

fn operator(input: &str) -> IResult<&str, Token> {
    // Two-character operators first so `!` never shadows `!=`.
    alt((
        map(tag("=="), |_| Token::Op(Op::Eq)),
        map(tag("!="), |_| Token::Op(Op::NotEq)),
        map(tag("<="), |_| Token::Op(Op::LessEq)),
        map(tag(">="), |_| Token::Op(Op::GreaterEq)),
        map(tag("<"), |_| Token::Op(Op::Less)),
        map(tag(">"), |_| Token::Op(Op::Greater)),
        map(tag("!"), |_| Token::Op(Op::Not)),
        map(tag("&"), |_| Token::Op(Op::And)),
        map(tag("|"), |_| Token::Op(Op::Or)),
        map(tag("("), |_| Token::Open),
        map(tag(")"), |_| Token::Close),
    ))
    .parse(input)
}
