use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("raw proxy source timed out")]
    SourceTimeout,

    #[error("liveness prober timed out")]
    ProberTimeout,

    #[error("judge response did not contain a valid IPv4 address")]
    MalformedJudgeResponse,

    #[error("external process error: {0}")]
    Process(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}
