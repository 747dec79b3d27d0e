// DARKNESS ERROR TYPES
// LIBRARY ERRORS ARE TYPED. THE BINARY WRAPS THEM IN anyhow.

use std::path::PathBuf;

/// Rejected writes to the configuration surface. State is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum TuningError {
    #[error("invalid argument for {key}: '{input}'")]
    InvalidArgument { key: String, input: String },

    #[error("unknown tunable '{0}'")]
    UnknownKey(String),
}

/// Failures reported by the hardware collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("cpu {0} has no time accounting data")]
    NoData(usize),

    #[error("cpu {cpu} cannot be {action}")]
    Unsupported { cpu: usize, action: &'static str },
}

impl PlatformError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Lifecycle transition failures.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("cpu {0} is not online")]
    CoreOffline(usize),

    #[error("policy for cpu {0} has no current frequency")]
    NoCurrentFrequency(usize),

    #[error("control loop already running on cpu {0}")]
    AlreadyRunning(usize),

    #[error("governor is not active")]
    NotActive,

    #[error("failed to publish configuration surface: {0}")]
    Surface(String),

    #[error("failed to start control loop timer: {0}")]
    Timer(#[source] std::io::Error),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}
