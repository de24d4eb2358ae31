use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("http status {0}: {1}")]
    HttpStatus(StatusCode, String),
}
