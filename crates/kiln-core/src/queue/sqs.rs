//! Cloud queue backend over SQS.
//!
//! Long-polls up to `max_in_flight` messages per batch, dispatches each
//! message to its own task and deletes it once the handler returns,
//! success or not, so delivery is at-most-once. The stop flag is polled
//! between batches; an in-flight long poll is allowed to drain first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tokio::task::JoinSet;

use super::{MessageHandler, MessageQueue};
use crate::errors::QueueError;

/// SQS caps a single receive at ten messages.
const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct SqsQueueConfig {
    pub queue_url: String,
    pub max_in_flight: usize,
    /// Long-poll wait passed to the receive call.
    pub wait_time_seconds: i32,
}

pub struct SqsQueue {
    client: Client,
    config: SqsQueueConfig,
    stop_flag: Arc<AtomicBool>,
}

impl SqsQueue {
    /// Connect using the ambient AWS configuration and start the polling
    /// consumer.
    pub async fn connect(
        config: SqsQueueConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, QueueError> {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        let queue = SqsQueue {
            client: Client::new(&aws_config),
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
        };

        log::info!(
            "cloud queue consuming queue={} max_in_flight={}",
            queue.config.queue_url,
            queue.config.max_in_flight
        );

        tokio::spawn(poll_messages(
            queue.client.clone(),
            queue.config.clone(),
            queue.stop_flag.clone(),
            handler,
        ));

        Ok(queue)
    }
}

async fn poll_messages(
    client: Client,
    config: SqsQueueConfig,
    stop_flag: Arc<AtomicBool>,
    handler: Arc<dyn MessageHandler>,
) {
    let batch_size = config.max_in_flight.min(MAX_BATCH_SIZE).max(1) as i32;

    while !stop_flag.load(Ordering::SeqCst) {
        let received = client
            .receive_message()
            .queue_url(&config.queue_url)
            .max_number_of_messages(batch_size)
            .wait_time_seconds(config.wait_time_seconds)
            .send()
            .await;

        let output = match received {
            Ok(output) => output,
            Err(err) => {
                log::error!("failed to gather cloud queue messages: {}", err);
                continue;
            }
        };

        let mut batch = JoinSet::new();

        for message in output.messages.unwrap_or_default() {
            let Some(body) = message.body else {
                continue;
            };

            if body.is_empty() {
                continue;
            }

            let client = client.clone();
            let queue_url = config.queue_url.clone();
            let handler = handler.clone();
            let message_id = message.message_id.unwrap_or_default();
            let receipt_handle = message.receipt_handle;

            batch.spawn(async move {
                if let Err(err) = handler.handle(body.as_bytes()).await {
                    log::error!(
                        "failed to handle incoming compile request {}: {}",
                        message_id,
                        err
                    );
                }

                // At-most-once: the message is deleted whether or not the
                // handler succeeded.
                if let Some(receipt_handle) = receipt_handle {
                    let deleted = client
                        .delete_message()
                        .queue_url(queue_url)
                        .receipt_handle(receipt_handle)
                        .send()
                        .await;

                    if let Err(err) = deleted {
                        log::error!("failed to delete handled message {}: {}", message_id, err);
                    }
                }
            });
        }

        while batch.join_next().await.is_some() {}
    }

    log::info!("cloud queue consumer stopped");
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn submit(&self, data: &[u8]) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(&self.config.queue_url)
            .message_body(String::from_utf8_lossy(data))
            .send()
            .await
            .map_err(|err| QueueError::Cloud(err.to_string()))?;

        Ok(())
    }

    fn stop(&self) {
        log::info!("stopping cloud queue consumer");
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}
