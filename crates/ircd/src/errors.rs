use thiserror::Error;

/// Fatal startup and rehash failures. User-visible protocol failures are
/// numerics, never errors; see the handlers.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no listen address configured")]
    NoListeners,

    #[error("tls listener {addr}: {reason}")]
    Tls { addr: String, reason: String },
}

/// Credential verification failure. Deliberately carries no detail: every
/// mismatch, missing account or malformed hash reads the same.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid authentication")]
pub struct AuthError;
