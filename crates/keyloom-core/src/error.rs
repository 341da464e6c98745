//! Error type shared across the KeyLoom workspace.

use thiserror::Error;

pub type KeyloomResult<T> = Result<T, KeyloomError>;

#[derive(Debug, Error)]
pub enum KeyloomError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialise TOML configuration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("invalid YAML configuration: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// External command failed and the caller chose to surface it.
    ///
    /// Discovery paths never return this; they collapse failures into empty
    /// or unavailable results. It exists for the finalize flow, where no
    /// fallback strategy remains.
    #[error("{program} failed: {detail}")]
    Command { program: String, detail: String },

    /// Caller-contract violation; indicates a bug in the caller, not an
    /// environmental condition.
    #[error("precondition violated: {0}")]
    Precondition(String),
}
