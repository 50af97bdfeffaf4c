use thiserror::Error;

/// Errors raised by the provider layer.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected page section is missing (layout change or unknown code).
    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error("column '{0}' missing from listing")]
    MissingColumn(String),

    #[error("{ticker}: field '{field}' missing")]
    MissingField { ticker: String, field: &'static str },

    #[error("unexpected response: {0}")]
    Response(String),
}
