use thiserror::Error;

/// Maps onto the CLI exit codes of §6: `0` success is the `Ok` path, the
/// remaining variants line up with `1` generic, `2` configuration, `3`
/// infrastructure-unreachable.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{0}")]
    Generic(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("infrastructure unreachable: {0}")]
    InfrastructureUnreachable(String),
}

impl OrchestratorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Generic(_) => 1,
            OrchestratorError::Configuration(_) => 2,
            OrchestratorError::InfrastructureUnreachable(_) => 3,
        }
    }
}

impl From<imotscrape_coordination::StoreError> for OrchestratorError {
    fn from(e: imotscrape_coordination::StoreError) -> Self {
        OrchestratorError::InfrastructureUnreachable(e.to_string())
    }
}

impl From<imotscrape_proxies::ProxyError> for OrchestratorError {
    fn from(e: imotscrape_proxies::ProxyError) -> Self {
        OrchestratorError::Generic(e.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::Generic(e.to_string())
    }
}
