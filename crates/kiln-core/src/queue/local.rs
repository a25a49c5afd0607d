//! In-process broker used in local mode, standing in for the networked
//! broker a deployment would consume. Subscribes one dispatcher to a named
//! topic/channel and owns handler concurrency through a bounded in-flight
//! permit set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, Semaphore};

use super::{MessageHandler, MessageQueue};
use crate::errors::QueueError;

#[derive(Debug, Clone)]
pub struct LocalBrokerConfig {
    pub topic: String,
    pub channel: String,
    /// Maximum number of concurrently running handlers.
    pub max_in_flight: usize,
}

pub struct LocalBroker {
    messages_tx: mpsc::UnboundedSender<Vec<u8>>,
    stop_flag: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl LocalBroker {
    /// Start the dispatcher for the configured topic/channel. Messages are
    /// handed to `handler` with at most `max_in_flight` running at once;
    /// the broker owns that concurrency, not the handler.
    pub fn start(config: LocalBrokerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let (messages_tx, mut messages_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

        log::info!(
            "local broker consuming topic={} channel={} max_in_flight={}",
            config.topic,
            config.channel,
            config.max_in_flight
        );

        {
            let stop_flag = stop_flag.clone();
            let stop_notify = stop_notify.clone();

            tokio::spawn(async move {
                loop {
                    let body = tokio::select! {
                        body = messages_rx.recv() => body,
                        _ = stop_notify.notified() => break,
                    };

                    let Some(body) = body else {
                        break;
                    };

                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }

                    let Ok(permit) = in_flight.clone().acquire_owned().await else {
                        break;
                    };

                    let handler = handler.clone();

                    tokio::spawn(async move {
                        if let Err(err) = handler.handle(&body).await {
                            log::error!("failed to handle incoming compile request: {}", err);
                        }

                        drop(permit);
                    });
                }

                log::info!("local broker dispatcher stopped");
            });
        }

        LocalBroker {
            messages_tx,
            stop_flag,
            stop_notify,
        }
    }
}

#[async_trait]
impl MessageQueue for LocalBroker {
    async fn submit(&self, data: &[u8]) -> Result<(), QueueError> {
        if self.stop_flag.load(Ordering::SeqCst) {
            return Err(QueueError::Submit("local broker is stopped".to_string()));
        }

        self.messages_tx
            .send(data.to_vec())
            .map_err(|_| QueueError::Submit("local broker dispatcher is gone".to_string()))
    }

    fn stop(&self) {
        log::info!("stopping local broker");
        self.stop_flag.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }
}
