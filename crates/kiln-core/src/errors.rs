//! Error types for the sandbox lifecycle and the consumer pipeline.
//!
//! The split follows how failures are surfaced: [`SandboxError`] covers
//! everything that can go wrong before a container reaches its terminal
//! state (terminal in-sandbox outcomes such as a time limit or a compile
//! failure are *not* errors: they are successful executions with a
//! non-`Finished` status), while [`QueueError`] covers the message-bus edge
//! of the pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Scratch directory or sandbox input materialization failed. No
    /// container has been created when this is returned.
    #[error("failed to prepare sandbox environment: {0}")]
    Prepare(#[from] std::io::Error),

    /// The daemon refused to create or start the container.
    #[error("failed to start sandbox container: {0}")]
    Start(#[source] bollard::errors::Error),

    /// A daemon call outside the create/start path failed (kill, events).
    #[error("docker daemon request failed: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// The runner-parameters document could not be encoded.
    #[error("failed to encode runner parameters: {0}")]
    Encode(#[from] serde_json::Error),

    /// The requested language code has no registered language.
    #[error("language `{0}` is not supported")]
    UnknownLanguage(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    /// An incoming message body could not be parsed as a compile request.
    /// Such messages are acknowledged and dropped by the consumer.
    #[error("failed to parse compile request: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to submit message to queue: {0}")]
    Submit(String),

    /// A cloud queue (SQS) request failed.
    #[error("cloud queue request failed: {0}")]
    Cloud(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("file store request failed: {0}")]
    Files(#[from] crate::files::FileStoreError),

    #[error("execution record store request failed: {0}")]
    Repository(#[from] crate::repository::RepositoryError),
}
