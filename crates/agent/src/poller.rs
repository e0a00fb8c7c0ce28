//! The claim loop: polls every configured server round-robin, gated by
//! the local processing-slot semaphore, and spawns one runner per claim.
//!
//! Cadence is adaptive. While any server is handing out work the loop
//! polls at the active interval; once every reachable server has been
//! empty for the configured streak it drops to the idle interval. A
//! separate health pass probes suspended and unregistered servers,
//! revives them as soon as they answer again, and logs per-server
//! claim statistics.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ServerApiError;
use crate::config::AgentConfig;
use crate::connection::ServerConnection;
use crate::processor::EditProcessor;
use crate::runner;

pub struct Poller<P: ?Sized> {
    config: Arc<AgentConfig>,
    servers: Vec<ServerConnection>,
    processor: Arc<P>,
    slots: Arc<Semaphore>,
    /// Index of the server the next poll cycle starts from.
    cursor: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl<P> Poller<P>
where
    P: EditProcessor + ?Sized + 'static,
{
    pub fn new(
        config: Arc<AgentConfig>,
        servers: Vec<ServerConnection>,
        processor: Arc<P>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.processing_slots as usize));
        Self {
            config,
            servers,
            processor,
            slots,
            cursor: 0,
            tasks: Vec::new(),
        }
    }

    /// Drive the claim loop until `cancel` fires, then drain in-flight
    /// tasks within the shutdown timeout.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            servers = self.servers.len(),
            slots = self.config.processing_slots,
            "Poller started"
        );

        self.register_all().await;
        self.poll_cycle().await;

        let mut health = tokio::time::interval(self.config.health_check_interval());
        health.tick().await;

        loop {
            let cadence = if self.all_idle() {
                self.config.idle_poll_interval()
            } else {
                self.config.poll_interval()
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cadence) => {
                    self.poll_cycle().await;
                }
                _ = health.tick() => {
                    self.health_pass().await;
                }
            }

            self.reap_finished();
        }

        self.shutdown().await;
    }

    /// One pass over the servers, starting at the cursor. Claims at most
    /// one task per server per pass and stops as soon as the local slots
    /// are exhausted.
    async fn poll_cycle(&mut self) {
        let server_count = self.servers.len();

        for offset in 0..server_count {
            let index = (self.cursor + offset) % server_count;

            let permit = match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::trace!("All processing slots busy; skipping poll");
                    return;
                }
            };

            if !self.servers[index].is_ready(Instant::now()) {
                continue;
            }
            if !self.servers[index].is_registered() && !self.try_register(index).await {
                continue;
            }

            match self.servers[index]
                .api()
                .next_task(&self.config.client_id)
                .await
            {
                Ok(Some(task)) => {
                    self.servers[index].record_claim();
                    self.cursor = (index + 1) % server_count;
                    tracing::info!(
                        task_id = %task.id,
                        server = self.servers[index].base_url(),
                        "Claimed task"
                    );

                    let config = Arc::clone(&self.config);
                    let api = self.servers[index].api().clone();
                    let processor = Arc::clone(&self.processor);
                    self.tasks.push(tokio::spawn(async move {
                        runner::run_task(config, api, processor, task).await;
                        drop(permit);
                    }));
                }
                Ok(None) => {
                    self.servers[index].record_empty();
                }
                Err(e) => {
                    self.handle_poll_error(index, &e);
                }
            }
        }
    }

    async fn register_all(&mut self) {
        for index in 0..self.servers.len() {
            self.try_register(index).await;
        }
    }

    async fn try_register(&mut self, index: usize) -> bool {
        let capabilities = self.config.capabilities();
        match self.servers[index]
            .api()
            .register(&self.config.client_id, &capabilities)
            .await
        {
            Ok(record) => {
                self.servers[index].mark_registered();
                tracing::info!(
                    server = self.servers[index].base_url(),
                    client_id = %record.client_id,
                    "Registered"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    server = self.servers[index].base_url(),
                    error = %e,
                    "Registration failed"
                );
                self.record_failure(index);
                false
            }
        }
    }

    fn handle_poll_error(&mut self, index: usize, error: &ServerApiError) {
        if error.is_unknown_client() {
            // The server restarted and lost its registry. Not a health
            // problem; the next poll re-registers first.
            tracing::info!(
                server = self.servers[index].base_url(),
                "Server forgot this client; re-registering on next poll"
            );
            self.servers[index].mark_unregistered();
            return;
        }

        tracing::warn!(
            server = self.servers[index].base_url(),
            failures = self.servers[index].failures() + 1,
            error = %error,
            "Poll failed"
        );
        self.record_failure(index);
    }

    fn record_failure(&mut self, index: usize) {
        let suspended = self.servers[index].record_failure(
            Instant::now(),
            self.config.failure_threshold,
            self.config.cooldown(),
        );
        if suspended {
            tracing::warn!(
                server = self.servers[index].base_url(),
                cooldown_secs = self.config.cooldown_secs,
                "Server suspended after repeated failures"
            );
        }
    }

    /// Probe suspended and unregistered servers. A passing health check
    /// ends a cooldown early instead of waiting it out, and a lapsed
    /// registration is renewed on the spot rather than on the next poll.
    async fn health_pass(&mut self) {
        for index in 0..self.servers.len() {
            let suspended = self.servers[index].is_suspended(Instant::now());
            if !suspended && self.servers[index].is_registered() {
                continue;
            }
            match self.servers[index].api().health().await {
                Ok(()) => {
                    if suspended {
                        tracing::info!(
                            server = self.servers[index].base_url(),
                            "Suspended server is healthy again"
                        );
                        self.servers[index].revive(Instant::now());
                    }
                    self.try_register(index).await;
                }
                Err(e) => {
                    tracing::debug!(
                        server = self.servers[index].base_url(),
                        error = %e,
                        "Server still unreachable"
                    );
                }
            }
        }
        self.log_poll_statistics();
    }

    fn log_poll_statistics(&self) {
        let now = Instant::now();
        let available = self
            .servers
            .iter()
            .filter(|s| !s.is_suspended(now))
            .count();
        let claimed: u64 = self.servers.iter().map(|s| s.tasks_claimed()).sum();
        tracing::info!(
            available,
            total = self.servers.len(),
            tasks_claimed = claimed,
            in_flight = self.tasks.len(),
            "Health pass complete"
        );
        for server in &self.servers {
            tracing::debug!(
                server = server.base_url(),
                tasks_claimed = server.tasks_claimed(),
                empty_polls = server.empty_polls(),
                registered = server.is_registered(),
                suspended = server.is_suspended(now),
                "Server poll statistics"
            );
        }
    }

    /// Idle means nobody has work: every server is either past the empty
    /// streak threshold or suspended.
    fn all_idle(&self) -> bool {
        let now = Instant::now();
        self.servers
            .iter()
            .all(|s| s.is_idle(self.config.empty_poll_threshold) || s.is_suspended(now))
    }

    fn reap_finished(&mut self) {
        self.tasks.retain(|handle| !handle.is_finished());
    }

    async fn shutdown(mut self) {
        self.reap_finished();
        if self.tasks.is_empty() {
            tracing::info!("Poller stopped; no tasks in flight");
            return;
        }

        tracing::info!(in_flight = self.tasks.len(), "Waiting for in-flight tasks");
        let per_task = self.config.shutdown_timeout();
        for handle in self.tasks.drain(..) {
            match tokio::time::timeout(per_task, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Task worker panicked"),
                Err(_) => tracing::warn!(
                    "Task did not finish within the shutdown timeout; \
                     leaving it to the server sweep"
                ),
            }
        }
        tracing::info!("Poller stopped");
    }
}
