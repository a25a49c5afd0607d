//! Admission-bounded registry of live sandbox containers.
//!
//! The manager owns two things: a bounded FIFO admission gate that caps the
//! number of in-flight executions, and the subscription to the daemon
//! event stream, which it fans out to the container each event is
//! addressed to. Containers are held by runtime id only; the manager never
//! reaches into their state beyond appending events and reading the final
//! response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bollard::query_parameters::{EventsOptions, KillContainerOptions};
use bollard::Docker;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::docker::{self, GVISOR_RUNTIME};
use crate::errors::SandboxError;
use crate::profile::ContainerRuntime;
use crate::sandbox::container::SandboxContainer;
use crate::sandbox::{Response, SandboxRequest};

/// Cadence at which the event loop rechecks the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ContainerManager {
    containers: DashMap<String, Arc<SandboxContainer>>,
    docker: Docker,

    /// Bounded FIFO admission gate. Sending a request id blocks until a
    /// slot is free; every admitted request releases its slot exactly once
    /// through [`ContainerManager::remove_container`] (or on a failed
    /// start).
    admission_tx: mpsc::Sender<String>,
    admission_rx: Mutex<mpsc::Receiver<String>>,

    /// Whether every container is executed under the hardened gVisor
    /// runtime, probed from the daemon configuration at construction.
    gvisor_enabled: bool,

    stop_flag: AtomicBool,
}

impl ContainerManager {
    pub fn new(docker: Docker, max_in_flight: usize) -> Self {
        let (admission_tx, admission_rx) = mpsc::channel(max_in_flight);
        let gvisor_enabled = docker::is_gvisor_installed();

        if gvisor_enabled {
            log::warn!("docker runtime: {}", GVISOR_RUNTIME);
        } else {
            log::warn!("docker runtime: default");
        }

        ContainerManager {
            containers: DashMap::new(),
            docker,
            admission_tx,
            admission_rx: Mutex::new(admission_rx),
            gvisor_enabled,
            stop_flag: AtomicBool::new(false),
        }
    }

    /// Admit and start one execution. Blocks until an admission slot is
    /// free, then registers the container under its runtime id and returns
    /// that id together with the completion signal. A failed start
    /// releases the slot before the error is surfaced.
    pub async fn add_container(
        &self,
        mut request: SandboxRequest,
    ) -> Result<(String, oneshot::Receiver<()>), SandboxError> {
        request.profile.runtime = if self.gvisor_enabled {
            ContainerRuntime::Gvisor
        } else {
            ContainerRuntime::Default
        };

        self.acquire_slot(request.id.clone()).await;

        let container = Arc::new(SandboxContainer::new(request, self.docker.clone()));

        match container.run().await {
            Ok((container_id, complete)) => {
                self.containers.insert(container_id.clone(), container);
                Ok((container_id, complete))
            }
            Err(err) => {
                self.release_slot().await;
                Err(err)
            }
        }
    }

    /// Unregister a container and release its admission slot. With `kill`
    /// the underlying runtime container is sent a fatal signal first.
    pub async fn remove_container(&self, container_id: &str, kill: bool) -> Result<(), SandboxError> {
        if kill && self.containers.contains_key(container_id) {
            self.docker
                .kill_container(
                    container_id,
                    Some(KillContainerOptions {
                        signal: "SIGKILL".to_string(),
                        ..Default::default()
                    }),
                )
                .await?;
        }

        self.release_slot().await;
        self.containers.remove(container_id);
        Ok(())
    }

    /// Response for a registered container, once its execution completed.
    pub async fn get_response(&self, container_id: &str) -> Option<Response> {
        let container = self
            .containers
            .get(container_id)
            .map(|entry| Arc::clone(entry.value()))?;

        container.response().await
    }

    async fn acquire_slot(&self, request_id: String) {
        // The receiver half lives for as long as the manager, so the send
        // can only fail after the manager itself is gone.
        let _ = self.admission_tx.send(request_id).await;
    }

    async fn release_slot(&self) {
        let mut admitted = self.admission_rx.lock().await;
        let _ = admitted.try_recv();
    }

    /// Consume the daemon event stream (from "now") and dispatch each
    /// event to the container whose runtime id it is addressed to. Events
    /// for unknown ids belong to not-yet-registered or already-removed
    /// containers and are dropped. Returns promptly after [`Self::stop`].
    pub async fn start(&self) {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut events = self.docker.events(Some(EventsOptions {
            since: Some(since.to_string()),
            ..Default::default()
        }));
        let mut stream_open = true;

        let mut ticker = tokio::time::interval(STOP_POLL_INTERVAL);

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                event = events.next(), if stream_open => match event {
                    Some(Ok(message)) => {
                        let container_id = message
                            .actor
                            .as_ref()
                            .and_then(|actor| actor.id.clone())
                            .unwrap_or_default();

                        let container = self
                            .containers
                            .get(&container_id)
                            .map(|entry| Arc::clone(entry.value()));

                        if let Some(container) = container {
                            container.add_event(message).await;
                        }
                    }
                    Some(Err(err)) => log::error!("error from docker event stream: {}", err),
                    None => stream_open = false,
                },
                _ = ticker.tick() => {}
            }
        }
    }

    /// Ask the event loop to exit; `start` observes the flag within one
    /// stop-poll interval.
    pub fn stop(&self) {
        log::info!("stopping sandbox container manager");
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Number of currently registered containers.
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(max_in_flight: usize) -> ContainerManager {
        let docker = Docker::connect_with_local_defaults().unwrap();
        ContainerManager::new(docker, max_in_flight)
    }

    #[tokio::test]
    async fn admission_gate_blocks_at_capacity() {
        let manager = manager(2);

        manager.acquire_slot("a".to_string()).await;
        manager.acquire_slot("b".to_string()).await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire_slot("c".to_string()),
        )
        .await;
        assert!(blocked.is_err(), "third admission must block at capacity 2");

        manager.release_slot().await;

        tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire_slot("c".to_string()),
        )
        .await
        .expect("admission must proceed once a slot is released");
    }

    #[tokio::test]
    async fn admission_is_fifo_among_blocked_callers() {
        let manager = Arc::new(manager(1));
        manager.acquire_slot("first".to_string()).await;

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();

        for name in ["second", "third"] {
            let manager = manager.clone();
            let order_tx = order_tx.clone();

            tokio::spawn(async move {
                manager.acquire_slot(name.to_string()).await;
                let _ = order_tx.send(name);
            });

            // Give the task time to enqueue before spawning the next one.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        manager.release_slot().await;
        assert_eq!(order_rx.recv().await, Some("second"));

        manager.release_slot().await;
        assert_eq!(order_rx.recv().await, Some("third"));
    }

    #[tokio::test]
    async fn remove_container_releases_the_admission_slot() {
        let manager = manager(1);

        manager.acquire_slot("only".to_string()).await;
        manager.remove_container("unknown-container", false).await.unwrap();

        tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire_slot("next".to_string()),
        )
        .await
        .expect("slot must be free after remove_container");
    }

    #[tokio::test]
    async fn stop_makes_the_event_loop_return_promptly() {
        let manager = Arc::new(manager(1));

        let event_loop = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.start().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.stop();

        tokio::time::timeout(Duration::from_millis(500), event_loop)
            .await
            .expect("event loop must observe the stop flag")
            .unwrap();
    }
}
