use thiserror::Error;

/// Error taxonomy for the pipeline. `Config` blocks all remote calls and is
/// the only kind that is fatal to a session; `Remote` and `Snippet` abort the
/// current turn only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("model call failed: {0}")]
    Remote(String),

    #[error("snippet error: {0}")]
    Snippet(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
