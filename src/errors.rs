//! Error taxonomy for the orchestration engine.
//!
//! The variants distinguish the failure modes callers need to tell apart:
//! the manager binary being absent (`ToolNotFound`) versus the binary
//! running and exiting non-zero (`CommandFailed`), unparsable inventory
//! output (`InventoryParse`), and the fatal topology-build errors
//! (`TemplateNotFound`, `UndefinedVariable`, `InvalidSubnet`,
//! `AddressRange`).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The external program could not be spawned because it is not on PATH.
    #[error("`{program}` not found; is it installed and on PATH?")]
    ToolNotFound { program: String },

    /// The external program ran but exited non-zero.
    #[error("`{program}` failed (exit {code}) during {label}: {stderr}")]
    CommandFailed {
        program: String,
        label: String,
        code: i32,
        stderr: String,
    },

    /// The manager's inventory output was not valid JSON of the expected shape.
    #[error("could not parse manager inventory: {0}")]
    InventoryParse(#[from] serde_json::Error),

    #[error("template not found: {0}")]
    TemplateNotFound(PathBuf),

    /// A strict-mode render referenced a variable the caller did not supply.
    #[error("template `{template}` references undefined variable `{variable}`")]
    UndefinedVariable { template: String, variable: String },

    #[error("invalid subnet `{0}` (expected CIDR notation with at least two usable hosts)")]
    InvalidSubnet(String),

    /// A derived address would fall outside the subnet's usable host range.
    #[error("address position {position} exceeds the {capacity} usable hosts of {subnet}")]
    AddressRange {
        subnet: String,
        position: u64,
        capacity: u64,
    },

    /// A script binding was constructed with an empty path.
    #[error("script binding path must not be empty")]
    EmptyScriptPath,

    #[error("could not parse cluster descriptor {path}: {source}")]
    Descriptor {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Attach a human-readable context string to an I/O error.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}
