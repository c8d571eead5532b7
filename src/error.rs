use surrogate_markup::MarkupError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EsiError {
    #[error("Markup error: {0}")]
    Markup(#[from] MarkupError),

    #[error("Template structure error: {0}")]
    Structure(String),
}
