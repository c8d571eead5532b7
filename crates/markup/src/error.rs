use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarkupError {
    #[error("Unterminated tag")]
    UnterminatedTag,

    #[error("Missing attribute value")]
    MissingAttributeValue,

    #[error("Unknown attribute delimiter '{0}'")]
    UnknownDelimiter(char),

    #[error("Unterminated attribute value")]
    UnterminatedValue,

    #[error("Unterminated comment")]
    UnterminatedComment,

    #[error("Closing tag without a matching opening tag")]
    UnbalancedClose,

    #[error("{0} tag(s) still open at end of input")]
    UnclosedTags(usize),
}
