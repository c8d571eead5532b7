//! Evaluator for the boolean expression language of `test` attributes.
//!
//! Expressions combine numeric and string literals with comparisons
//! (`==`, `!=`, `<`, `<=`, `>`, `>=`), logical `&`, `|` and `!`, and
//! parentheses. Evaluation runs a single-pass operator-precedence stack
//! machine over the token stream: operands push, operators reduce whatever
//! higher-precedence work sits below the top of the stack, and a closing
//! parenthesis collapses its group to one boolean sub-result.
//!
//! The whole expression reduces to a boolean. An empty expression is `false`;
//! a lone value is coerced by truthiness (non-zero numbers and non-empty
//! strings are true).

mod error;
mod parser;

pub use error::ExprError;

use std::cmp::Ordering;

/// Stack depth bound; deeper expressions are rejected.
const MAX_STACK: usize = 20;

/// Integer/float comparisons treat values closer than this as equal.
const FLOAT_SLOP: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Op {
    Or,
    And,
    Not,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Or => 2,
            Op::And => 3,
            Op::Not => 4,
            _ => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Literal(Value),
    SubResult(bool),
    Op(Op),
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Value(Value),
    SubResult(bool),
    Op(Op),
    Open,
}

/// Evaluate `expr` to a boolean.
///
/// Empty input is `false`. Malformed input (unknown tokens, unbalanced
/// parentheses, operators without operands, incomparable operand types,
/// stacks deeper than [`MAX_STACK`]) is an error; callers decide whether an
/// error counts as false.
pub fn evaluate(expr: &str) -> Result<bool, ExprError> {
    let tokens = parser::tokenize(expr)?;
    if tokens.is_empty() {
        return Ok(false);
    }
    log::trace!("evaluating expression: {expr}");

    let mut stack: Vec<Item> = Vec::new();
    for token in tokens {
        match token {
            Token::Literal(v) => push(&mut stack, Item::Value(v))?,
            Token::SubResult(b) => push(&mut stack, Item::SubResult(b))?,
            Token::Open => push(&mut stack, Item::Open)?,
            Token::Close => close_group(&mut stack)?,
            Token::Op(op) => push_operator(&mut stack, op)?,
        }
    }

    while stack.len() > 1 {
        reduce(&mut stack)?;
    }
    match stack.pop() {
        None => Ok(false),
        Some(item) => truthy(&item),
    }
}

fn push(stack: &mut Vec<Item>, item: Item) -> Result<(), ExprError> {
    if stack.len() >= MAX_STACK {
        return Err(ExprError::StackOverflow);
    }
    stack.push(item);
    Ok(())
}

/// Reduce any completed higher-precedence work below the stack top, then
/// push the operator.
fn push_operator(stack: &mut Vec<Item>, op: Op) -> Result<(), ExprError> {
    while let Some(Item::Op(below)) = nth_from_top(stack, 1) {
        if below.precedence() >= op.precedence() {
            reduce(stack)?;
        } else {
            break;
        }
    }
    push(stack, Item::Op(op))
}

/// A `)` reduces until its matching `(` is exposed one below the top, then
/// erases the parentheses around the single remaining sub-result.
fn close_group(stack: &mut Vec<Item>) -> Result<(), ExprError> {
    loop {
        match nth_from_top(stack, 1) {
            Some(Item::Op(_)) => reduce(stack)?,
            Some(Item::Open) => {
                let inner = stack.pop();
                stack.pop();
                if let Some(inner) = inner {
                    stack.push(inner);
                }
                return Ok(());
            }
            _ => return Err(ExprError::Malformed("unbalanced ')'".into())),
        }
    }
}

fn nth_from_top(stack: &[Item], n: usize) -> Option<Item> {
    stack.len().checked_sub(n + 1).map(|i| stack[i].clone())
}

/// Reduce the operator sitting one below the stack top with the operands
/// around it, leaving a boolean sub-result in its place.
fn reduce(stack: &mut Vec<Item>) -> Result<(), ExprError> {
    let op = match nth_from_top(stack, 1) {
        Some(Item::Op(op)) => op,
        _ => return Err(ExprError::Malformed("operand without operator".into())),
    };
    match op {
        Op::Not => {
            let operand = stack
                .pop()
                .ok_or_else(|| ExprError::Malformed("'!' without operand".into()))?;
            stack.pop();
            let b = truthy(&operand)?;
            stack.push(Item::SubResult(!b));
        }
        Op::And | Op::Or => {
            let (lhs, rhs) = pop_binary(stack)?;
            let l = truthy(&lhs)?;
            let r = truthy(&rhs)?;
            let b = if op == Op::And { l && r } else { l || r };
            stack.push(Item::SubResult(b));
        }
        _ => {
            let (lhs, rhs) = pop_binary(stack)?;
            let ord = compare(&lhs, &rhs)?;
            let b = match op {
                Op::Eq => ord == Ordering::Equal,
                Op::NotEq => ord != Ordering::Equal,
                Op::Less => ord == Ordering::Less,
                Op::LessEq => ord != Ordering::Greater,
                Op::Greater => ord == Ordering::Greater,
                Op::GreaterEq => ord != Ordering::Less,
                Op::And | Op::Or | Op::Not => unreachable!(),
            };
            stack.push(Item::SubResult(b));
        }
    }
    Ok(())
}

fn pop_binary(stack: &mut Vec<Item>) -> Result<(Item, Item), ExprError> {
    if stack.len() < 3 {
        return Err(ExprError::Malformed("binary operator without operands".into()));
    }
    let rhs = stack.pop();
    stack.pop();
    let lhs = stack.pop();
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => Ok((lhs, rhs)),
        _ => Err(ExprError::Malformed("binary operator without operands".into())),
    }
}

fn truthy(item: &Item) -> Result<bool, ExprError> {
    match item {
        Item::SubResult(b) => Ok(*b),
        Item::Value(Value::Int(i)) => Ok(*i != 0),
        Item::Value(Value::Float(f)) => Ok(*f != 0.0),
        Item::Value(Value::Str(s)) => Ok(!s.is_empty()),
        Item::Op(_) | Item::Open => Err(ExprError::Malformed("operator used as operand".into())),
    }
}

fn compare(lhs: &Item, rhs: &Item) -> Result<Ordering, ExprError> {
    match (lhs, rhs) {
        (Item::SubResult(l), Item::SubResult(r)) => Ok(l.cmp(r)),
        (Item::Value(l), Item::Value(r)) => compare_values(l, r),
        (Item::SubResult(_), Item::Value(v)) | (Item::Value(v), Item::SubResult(_)) => {
            Err(ExprError::Incomparable("sub-expression", v.type_name()))
        }
        _ => Err(ExprError::Malformed("operator used as operand".into())),
    }
}

fn compare_values(lhs: &Value, rhs: &Value) -> Result<Ordering, ExprError> {
    match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => Ok(l.cmp(r)),
        (Value::Str(l), Value::Str(r)) => Ok(l.cmp(r)),
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Err(ExprError::Incomparable(lhs.type_name(), rhs.type_name()))
        }
        (l, r) => {
            let (l, r) = (as_float(l), as_float(r));
            if (l - r).abs() < FLOAT_SLOP {
                Ok(Ordering::Equal)
            } else if l < r {
                Ok(Ordering::Less)
            } else {
                Ok(Ordering::Greater)
            }
        }
    }
}

fn as_float(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        Value::Str(_) => 0.0,
    }
}
