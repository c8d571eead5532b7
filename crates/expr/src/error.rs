use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Expression parse error at '{0}'")]
    Parse(String),

    #[error("Expression stack overflow")]
    StackOverflow,

    #[error("Malformed expression: {0}")]
    Malformed(String),

    #[error("Type error: cannot compare {0} with {1}")]
    Incomparable(&'static str, &'static str),
}
