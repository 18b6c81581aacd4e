//! Top-level error types. Configuration diagnostics follow the
//! `{path/field, reason}` shape the design notes prescribe in place of
//! exceptions-for-control-flow (§9); transport/session errors wrap the
//! lower crates' own error enums at the boundary.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] bus::BusError),

    #[error(transparent)]
    Reactor(#[from] reactor::ReactorError),

    #[error("firmware update failed: {0}")]
    Firmware(String),

    #[error("discovery failed: {0}")]
    Discovery(String),
}
