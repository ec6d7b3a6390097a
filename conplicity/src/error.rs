use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConplicityError>;

/// Coarse classification used by callers to decide what is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The container runtime or a remote endpoint could not be reached,
    /// or answered with a non-200 status.
    Connectivity,
    /// A reachable endpoint answered with a body that breaks the contract.
    ProtocolMismatch,
    /// The backup container could not be created or started.
    RuntimeProvisioning,
    /// Logs or metrics were lost. Never decides the outcome of a backup.
    Observability,
    Cancelled,
    Configuration,
}

#[derive(Error, Debug)]
pub enum ConplicityError {
    #[error("failed to send request to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("received wrong status code from {url}: [{status}] {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {url}: {reason}: {body}")]
    Decode {
        url: String,
        reason: String,
        body: String,
    },

    #[error("wrong response from the remote instance: {body}")]
    UnexpectedPing { body: String },

    #[error("container runtime call `{operation}` failed: {reason}")]
    Runtime {
        operation: &'static str,
        reason: String,
    },

    #[error("failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("failed to {stage} container: {source}")]
    Provisioning {
        stage: &'static str,
        #[source]
        source: Box<ConplicityError>,
    },

    #[error("failed to capture container logs: {source}")]
    LogCapture {
        #[source]
        source: Box<ConplicityError>,
    },

    #[error("failed to inspect container: {source}")]
    Inspect {
        #[source]
        source: Box<ConplicityError>,
    },

    #[error("container {container} was still running when its exit code was read")]
    StillRunning { container: String },

    #[error("failed to push metrics to {url}: {source}")]
    MetricsPush {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} aborted: {reason}")]
    Cancelled {
        operation: &'static str,
        reason: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ConplicityError {
    pub fn runtime(operation: &'static str, reason: impl ToString) -> Self {
        Self::Runtime {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Wraps a failed create/start. Cancellation is returned as is.
    pub fn provisioning(stage: &'static str, source: ConplicityError) -> Self {
        match source {
            cancelled @ Self::Cancelled { .. } => cancelled,
            source => Self::Provisioning {
                stage,
                source: Box::new(source),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::UnexpectedStatus { .. } | Self::Runtime { .. } => {
                ErrorKind::Connectivity
            }
            Self::Decode { .. } | Self::UnexpectedPing { .. } => ErrorKind::ProtocolMismatch,
            Self::ImagePull { .. } | Self::Provisioning { .. } => ErrorKind::RuntimeProvisioning,
            Self::LogCapture { .. }
            | Self::Inspect { .. }
            | Self::StillRunning { .. }
            | Self::MetricsPush { .. } => ErrorKind::Observability,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Configuration,
        }
    }
}
