use thiserror::Error;

/// Central error type for the Berth host.
///
/// Failures are grouped by the subsystem they originate from. The registry
/// adapter maps every HTTP-level outcome into `Registry` / `Auth` so that no
/// transport error ever crosses its boundary as a panic.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("registry auth error: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config stream error: {0}")]
    ConfigStream(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
