use std::{fmt, sync::Mutex, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use ffwd_core::{managers::OutputManager, model::Metric, sources::Source};
use ffwd_error::{generic_error, GenericError};
use serde::Deserialize;
use tokio::{runtime::Handle, select, task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const fn default_interval_secs() -> u64 {
    10
}

fn default_key() -> String {
    "ffwd.heartbeat".to_string()
}

/// Heartbeat source.
///
/// Emits a "heartbeat" metric with a value of `1.0` on a configurable interval.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfiguration {
    /// Interval for heartbeat metrics, in seconds.
    pub interval_secs: u64,

    /// Metric key.
    pub key: String,

    /// Host to attach to every heartbeat.
    pub host: Option<String>,
}

impl Default for HeartbeatConfiguration {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            key: default_key(),
            host: None,
        }
    }
}

impl HeartbeatConfiguration {
    /// Builds the source.
    ///
    /// # Errors
    ///
    /// If the interval is zero, an error is returned.
    pub fn build(&self, id: &str, handle: Handle, output: OutputManager) -> Result<HeartbeatSource, GenericError> {
        if self.interval_secs == 0 {
            return Err(generic_error!("Heartbeat interval must be at least one second."));
        }

        Ok(HeartbeatSource {
            id: id.to_string(),
            interval: Duration::from_secs(self.interval_secs),
            key: self.key.clone(),
            host: self.host.clone(),
            handle,
            output,
            running: Mutex::new(None),
        })
    }
}

struct Running {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Source that emits heartbeat metrics.
#[derive(Debug)]
pub struct HeartbeatSource {
    id: String,
    interval: Duration,
    key: String,
    host: Option<String>,
    handle: Handle,
    output: OutputManager,
    running: Mutex<Option<Running>>,
}

impl fmt::Debug for Running {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Running").finish_non_exhaustive()
    }
}

impl HeartbeatSource {
    fn heartbeat(&self) -> Metric {
        let metric = Metric::new(self.key.clone(), 1.0);
        match &self.host {
            Some(host) => metric.with_host(host.clone()),
            None => metric,
        }
    }
}

#[async_trait]
impl Source for HeartbeatSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), GenericError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| generic_error!("Heartbeat source state is poisoned."))?;
        if running.is_some() {
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let task = self.handle.spawn(run_heartbeat(
            self.id.clone(),
            self.interval,
            self.heartbeat(),
            self.output.clone(),
            shutdown.clone(),
        ));
        *running = Some(Running { shutdown, task });

        debug!(source = %self.id, interval = ?self.interval, "Heartbeat source started.");
        Ok(())
    }

    async fn stop(&self) -> Result<(), GenericError> {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(Running { shutdown, task }) = running else {
            return Ok(());
        };

        shutdown.cancel();
        task.await
            .map_err(|e| generic_error!("Heartbeat task for '{}' failed: {}", self.id, e))?;

        debug!(source = %self.id, "Heartbeat source stopped.");
        Ok(())
    }
}

async fn run_heartbeat(
    id: String, period: Duration, template: Metric, output: OutputManager, shutdown: CancellationToken,
) {
    let mut tick_interval = interval(period);

    loop {
        select! {
            _ = shutdown.cancelled() => break,
            _ = tick_interval.tick() => {
                output.send_metric(&template.clone().with_time(Utc::now()));
                trace!(source = %id, "Emitted heartbeat metric.");
            }
        }
    }
}
