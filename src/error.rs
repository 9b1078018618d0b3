//! Stable error taxonomy for the dispatcher core.
//!
//! Every fallible operation in the pipeline returns one of the enums below instead of panicking.
//! Variants carry the original `io::Error` where one exists so the underlying cause is never
//! thrown away, and each `Display` impl matches the human-readable phrasing the task tracker shows
//! an operator in `error_msg`.

use std::io;
use thiserror::Error;

/// Errors from a single request/response exchange over the framed socket.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Cannot connect to '{path}'. Could not reach agent.")]
    Connect { path: String, #[source] source: io::Error },

    #[error("Could not send message to agent")]
    Send(#[source] io::Error),

    #[error("Could not receive message from agent")]
    Recv(#[source] io::Error),

    #[error("Agent reply exceeded the maximum message size")]
    TooLarge,
}

/// Errors from interpreting a raw agent reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("Agent reply did not start with 'ok' or 'err'")]
    Malformed,
}

/// Per-stage failures of the seven-step protocol, one variant per stage named in the spec.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Send lock restart error.")]
    SendLockRestartError(#[source] FramingError),

    #[error("Send open error.")]
    SendOpenError(#[source] FramingError),

    #[error("Send write error.")]
    SendWriteError(#[source] FramingError),

    #[error("Send close error.")]
    SendCloseError(#[source] FramingError),

    #[error("Send sha1 error.")]
    SendSha1Error(#[source] FramingError),

    #[error("The SHA1 of the file doesn't match in the agent.")]
    WpkSha1DoesNotMatch,

    #[error("Send upgrade error.")]
    SendUpgradeError(#[source] FramingError),

    #[error("The upgrade script reported a failure exit code: {0}")]
    ScriptFailed(String),

    #[error("Worker thread panicked mid-upgrade")]
    WorkerPanicked,
}

/// Pre-flight validation failures, produced before any socket is opened.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("WPK file does not exist: {0}")]
    WpkFileDoesNotExist(String),

    #[error("WPK SHA1 does not match the manifest")]
    WpkSha1DoesNotMatch,

    #[error("Could not read file to validate: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ValidationError {
    fn from(source: io::Error) -> Self {
        ValidationError::Io(source)
    }
}

/// Errors from the task-tracker status reporter.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Could not deliver status update to task tracker")]
    Transport(#[source] FramingError),

    #[error("Task tracker returned a malformed response")]
    Malformed,
}
