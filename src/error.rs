use thiserror::Error;

/// Errors raised while building, setting up, running or recording a model.
///
/// Variants carrying a bare message print it unchanged so callers can match
/// the exact text a user sees.
#[derive(Debug, Error)]
pub enum CouplerError {
    /// A variable (or variable pair) name did not resolve.
    #[error("{0}")]
    NotFound(String),

    /// A promoted input name refers to several inputs.
    #[error("{0}")]
    Ambiguous(String),

    /// Errors collected during `setup()`.
    #[error("{0}")]
    Setup(String),

    /// Bad value shape or size passed to get/set.
    #[error("{0}")]
    Value(String),

    /// Access to a variable that lives on another rank.
    #[error("{0}")]
    Remote(String),

    /// API called in the wrong lifecycle stage.
    #[error("{0}")]
    State(String),

    #[error("Units error: {0}")]
    Units(String),

    #[error("Expression error: {0}")]
    Expr(String),

    #[error("Solve error: {0}")]
    Solve(String),

    #[error("Recording error: {0}")]
    Record(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CouplerError>;
