//! Compile-request queue: the message bus edge of the system.
//!
//! External producers serialize a [`CompileMessage`] and submit it through
//! a [`MessageQueue`]; the consumer side hands each raw message body to a
//! [`MessageHandler`], in production the [`pipeline::Pipeline`], which
//! binds the message to a manager slot and sees the execution through to
//! persisted artifacts.
//!
//! Two backends share identical consumption semantics: an in-process
//! broker for local mode and an SQS long-polling consumer for cloud
//! deployments.

pub mod local;
pub mod pipeline;
pub mod sqs;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::QueueError;

pub use local::{LocalBroker, LocalBrokerConfig};
pub use pipeline::Pipeline;
pub use sqs::{SqsQueue, SqsQueueConfig};

/// One queued compile request. The test is attached downstream iff either
/// data field is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompileMessage {
    pub id: String,
    pub language: String,
    pub stdin_data: Vec<String>,
    pub expected_stdout_data: Vec<String>,
}

/// Consumer side: invoked once per message; a returned error marks the
/// message as failed for whatever redelivery semantics the backend has.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), QueueError>;
}

/// Producer side plus lifecycle control for the consuming backend.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Serialize-side entry point: enqueue a raw message body.
    async fn submit(&self, data: &[u8]) -> Result<(), QueueError>;

    /// Ask the consumer side to stop pulling messages. In-flight handlers
    /// are not cancelled; they complete or hit their own deadlines.
    fn stop(&self);
}

/// Backend selection for [`connect`]. An SQS queue URL selects the cloud
/// backend unless local mode is forced.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub sqs_queue: Option<String>,
    pub force_local_mode: bool,
    pub local: LocalBrokerConfig,
    pub wait_time_seconds: i32,
}

pub async fn connect(
    config: QueueConfig,
    handler: Arc<dyn MessageHandler>,
) -> Result<Arc<dyn MessageQueue>, QueueError> {
    match config.sqs_queue {
        Some(queue_url) if !config.force_local_mode => {
            let sqs = SqsQueue::connect(
                SqsQueueConfig {
                    queue_url,
                    max_in_flight: config.local.max_in_flight,
                    wait_time_seconds: config.wait_time_seconds,
                },
                handler,
            )
            .await?;

            Ok(Arc::new(sqs))
        }
        _ => Ok(Arc::new(LocalBroker::start(config.local, handler))),
    }
}
