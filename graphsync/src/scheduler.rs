use crate::catalog::Catalog;
use crate::config::{StreamSchedule, SyncConfig};
use crate::errors::{Result, SyncError};
use crate::models::{LoopState, LoopStatus, SyncStats};
use crate::sync::StreamSynchronizer;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Delay before the next cycle: what is left of the interval after a
/// successful cycle, the fixed cooldown after a failed one.
pub fn next_delay(
    interval: Duration,
    elapsed: Duration,
    succeeded: bool,
    cooldown: Duration,
) -> Duration {
    if succeeded {
        interval.saturating_sub(elapsed)
    } else {
        cooldown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub cooldown: Duration,
    pub cycle_timeout: Option<Duration>,
}

impl LoopSettings {
    pub fn new(schedule: &StreamSchedule, config: &SyncConfig) -> Self {
        Self {
            interval: schedule.interval(),
            initial_delay: schedule.initial_delay(),
            cooldown: config.cooldown(),
            cycle_timeout: config.cycle_timeout(),
        }
    }
}

/// Runs one fetch + reconcile pass of `stream` and records it in the catalog.
///
/// The stream cursor is advanced to the cycle start only when the whole cycle
/// succeeded. `on_state` is told when the cycle moves between fetching and
/// reconciling.
pub async fn run_cycle<F>(
    stream: &dyn StreamSynchronizer,
    catalog: &Catalog,
    cycle_timeout: Option<Duration>,
    on_state: F,
) -> Result<SyncStats>
where
    F: Fn(LoopState) + Send + Sync,
{
    let name = stream.name().to_string();
    let mut cursor = catalog.get_cursor(&name)?;
    let run_id = catalog.create_run_log(&name)?;
    let started_at = Utc::now();

    let cycle = async {
        on_state(LoopState::Fetching);
        let batch = stream.fetch(&cursor).await?;
        on_state(LoopState::Reconciling);
        stream.reconcile(batch).await
    };
    let result = match cycle_timeout {
        Some(limit) => tokio::time::timeout(limit, cycle)
            .await
            .unwrap_or_else(|_| Err(SyncError::Timeout(limit.as_millis() as u64))),
        None => cycle.await,
    };

    match result {
        Ok(stats) => {
            cursor.advance(started_at);
            catalog.upsert_cursor(&cursor)?;
            catalog.update_run_log_status(run_id, "SUCCESS", &serde_json::to_string(&stats)?)?;
            log::info!(
                "Stream '{}' synced: {} processed, {} skipped, {} failed, {} written.",
                name,
                stats.processed,
                stats.skipped,
                stats.failed,
                stats.created
            );
            Ok(stats)
        }
        Err(err) => {
            if let Err(log_err) = catalog.update_run_log_status(run_id, "FAILED", &err.to_string())
            {
                log::error!("Failed to record run {} of '{}': {}", run_id, name, log_err);
            }
            Err(err)
        }
    }
}

struct LoopWorker {
    stream: Arc<dyn StreamSynchronizer>,
    catalog: Arc<Catalog>,
    settings: LoopSettings,
    status: Arc<Mutex<LoopStatus>>,
    cancel: CancellationToken,
}

fn lock_status(status: &Mutex<LoopStatus>) -> MutexGuard<'_, LoopStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `Stopped` is terminal; late state changes from an in-flight cycle are dropped.
fn set_state(status: &Mutex<LoopStatus>, state: LoopState) {
    let mut status = lock_status(status);
    if status.state != LoopState::Stopped {
        status.state = state;
    }
}

fn record_outcome(status: &Mutex<LoopStatus>, result: &Result<SyncStats>) {
    let mut status = lock_status(status);
    status.cycles += 1;
    match result {
        Ok(stats) => {
            status.last_stats = Some(*stats);
            status.last_error = None;
            status.last_sync = Some(Utc::now());
        }
        Err(err) => {
            status.failures += 1;
            status.last_error = Some(err.to_string());
        }
    }
}

impl LoopWorker {
    /// Sleeps for `delay` unless cancelled first; returns whether to go on.
    async fn pause(&self, delay: Duration) -> bool {
        set_state(&self.status, LoopState::Sleeping);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn run(self) {
        let name = self.stream.name().to_string();
        log::debug!(
            "Loop '{}' scheduled every {:?}, first cycle in {:?}.",
            name,
            self.settings.interval,
            self.settings.initial_delay
        );

        if self.pause(self.settings.initial_delay).await {
            loop {
                if self.cancel.is_cancelled() {
                    break;
                }

                let started = Instant::now();
                let status = Arc::clone(&self.status);
                let result = run_cycle(
                    self.stream.as_ref(),
                    &self.catalog,
                    self.settings.cycle_timeout,
                    move |state| set_state(&status, state),
                )
                .await;
                let elapsed = started.elapsed();

                let succeeded = result.is_ok();
                record_outcome(&self.status, &result);
                if let Err(err) = &result {
                    log::error!(
                        "Stream '{}' cycle failed, cooling down for {:?}: {}",
                        name,
                        self.settings.cooldown,
                        err
                    );
                }

                let delay = next_delay(
                    self.settings.interval,
                    elapsed,
                    succeeded,
                    self.settings.cooldown,
                );
                if !self.pause(delay).await {
                    break;
                }
            }
        }

        lock_status(&self.status).state = LoopState::Stopped;
        log::info!("Loop '{}' stopped.", name);
    }
}

/// Drives one stream on its own cadence until stopped.
///
/// Each loop owns its cursor, status and backoff, so one failing stream never
/// delays another. A cycle always completes before the next one is scheduled.
pub struct SchedulerLoop {
    stream: Arc<dyn StreamSynchronizer>,
    catalog: Arc<Catalog>,
    settings: LoopSettings,
    status: Arc<Mutex<LoopStatus>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerLoop {
    pub fn new(
        stream: Arc<dyn StreamSynchronizer>,
        catalog: Arc<Catalog>,
        settings: LoopSettings,
    ) -> Self {
        let status = LoopStatus::new(stream.name());
        Self {
            stream,
            catalog,
            settings,
            status: Arc::new(Mutex::new(status)),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.stream.name()
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// `Idle -> Running`; the first cycle fires after the initial delay.
    pub fn start(&self) -> Result<()> {
        self.start_after(self.settings.initial_delay)
    }

    /// Like `start`, with the first cycle after `initial_delay` instead.
    pub fn start_after(&self, initial_delay: Duration) -> Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return Err(SyncError::InvalidState(format!(
                "loop '{}' is stopped and cannot be restarted",
                self.name()
            )));
        }
        if handle.is_some() {
            return Err(SyncError::InvalidState(format!(
                "loop '{}' is already running",
                self.name()
            )));
        }

        set_state(&self.status, LoopState::Running);
        let worker = LoopWorker {
            stream: Arc::clone(&self.stream),
            catalog: Arc::clone(&self.catalog),
            settings: LoopSettings {
                initial_delay,
                ..self.settings
            },
            status: Arc::clone(&self.status),
            cancel: self.cancel.clone(),
        };
        *handle = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// One cycle outside the cadence, used for the cold pass before `start`.
    pub async fn run_once(&self) -> Result<SyncStats> {
        let result = run_cycle(
            self.stream.as_ref(),
            &self.catalog,
            self.settings.cycle_timeout,
            |_| {},
        )
        .await;
        record_outcome(&self.status, &result);
        result
    }

    /// Cancels the pending sleep. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
        lock_status(&self.status).state = LoopState::Stopped;
    }

    /// Waits for the loop task to exit after `stop`.
    pub async fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log::error!("Loop '{}' task ended abnormally: {}", self.name(), err);
            }
        }
    }

    pub fn status(&self) -> LoopStatus {
        lock_status(&self.status).clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_subtracts_elapsed_time() {
        let interval = Duration::from_millis(1000);
        let cooldown = Duration::from_millis(60_000);
        assert_eq!(
            next_delay(interval, Duration::from_millis(200), true, cooldown),
            Duration::from_millis(800)
        );
        assert_eq!(
            next_delay(interval, Duration::from_millis(1500), true, cooldown),
            Duration::ZERO
        );
    }

    #[test]
    fn failure_uses_cooldown_regardless_of_interval() {
        let cooldown = Duration::from_millis(60_000);
        assert_eq!(
            next_delay(
                Duration::from_millis(1000),
                Duration::from_millis(10),
                false,
                cooldown
            ),
            cooldown
        );
        assert_eq!(
            next_delay(
                Duration::from_secs(3600),
                Duration::from_millis(10),
                false,
                cooldown
            ),
            cooldown
        );
    }
}
