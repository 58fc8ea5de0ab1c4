//! Input and output managers.
//!
//! The managers aggregate every configured source and sink. Lifecycle calls are made on all members concurrently,
//! and the aggregate only completes once every member has completed: a failing member never cancels its siblings.
use std::sync::Arc;

use ffwd_error::GenericError;
use futures::future::join_all;
use snafu::Snafu;
use tracing::debug;

use crate::{
    model::{Event, Metric},
    sinks::BatchedSink,
    sources::Source,
};

/// A failure of a single plugin within an aggregate operation.
#[derive(Debug)]
pub struct PluginFailure {
    /// Identifier of the plugin.
    pub id: String,

    /// Error returned by the plugin.
    pub error: GenericError,
}

/// An aggregate operation error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum LifecycleError {
    /// One or more plugins failed.
    #[snafu(display(
        "Failed to {} {} of {} {}(s): {}.",
        operation,
        failures.len(),
        total,
        kind,
        failed_ids(failures)
    ))]
    Failed {
        /// Operation that was attempted.
        operation: &'static str,

        /// Kind of plugin, `sink` or `source`.
        kind: &'static str,

        /// Number of plugins the operation was attempted on.
        total: usize,

        /// Plugins that failed.
        failures: Vec<PluginFailure>,
    },
}

impl LifecycleError {
    /// Returns the individual plugin failures.
    pub fn failures(&self) -> &[PluginFailure] {
        match self {
            Self::Failed { failures, .. } => failures,
        }
    }
}

fn failed_ids(failures: &[PluginFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn aggregate(
    operation: &'static str, kind: &'static str, results: Vec<(String, Result<(), GenericError>)>,
) -> Result<(), LifecycleError> {
    let total = results.len();
    let failures = results
        .into_iter()
        .filter_map(|(id, result)| result.err().map(|error| PluginFailure { id, error }))
        .collect::<Vec<_>>();

    if failures.is_empty() {
        debug!(operation, kind, total, "Operation completed for all plugins.");
        Ok(())
    } else {
        Err(LifecycleError::Failed {
            operation,
            kind,
            total,
            failures,
        })
    }
}

/// Aggregates every configured sink.
///
/// Also the fan-out point used by sources: every item sent through the manager is sent to every sink.
#[derive(Clone, Debug, Default)]
pub struct OutputManager {
    sinks: Arc<Vec<Arc<dyn BatchedSink>>>,
}

impl OutputManager {
    /// Creates a new `OutputManager` over the given sinks.
    pub fn new(sinks: Vec<Arc<dyn BatchedSink>>) -> Self {
        Self { sinks: Arc::new(sinks) }
    }

    /// Returns the managed sinks.
    pub fn sinks(&self) -> &[Arc<dyn BatchedSink>] {
        &self.sinks
    }

    /// Starts every sink.
    ///
    /// # Errors
    ///
    /// If any sink fails to start, an error is returned once all sinks have completed.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let results = join_all(self.sinks.iter().map(|sink| async move {
            (sink.id().to_string(), sink.start().await.map_err(GenericError::from))
        }))
        .await;
        aggregate("start", "sink", results)
    }

    /// Stops every sink.
    ///
    /// # Errors
    ///
    /// If any sink fails to stop cleanly, an error is returned once all sinks have completed.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let results = join_all(self.sinks.iter().map(|sink| async move {
            (sink.id().to_string(), sink.stop().await.map_err(GenericError::from))
        }))
        .await;
        aggregate("stop", "sink", results)
    }

    /// Returns `true` if every sink is ready.
    pub fn is_ready(&self) -> bool {
        self.sinks.iter().all(|sink| sink.is_ready())
    }

    /// Sends an event to every sink. Best-effort.
    pub fn send_event(&self, event: &Event) {
        for sink in self.sinks.iter() {
            sink.send_event(event);
        }
    }

    /// Sends a metric to every sink. Best-effort.
    pub fn send_metric(&self, metric: &Metric) {
        for sink in self.sinks.iter() {
            sink.send_metric(metric);
        }
    }

    /// Sends a batch of events to every sink.
    ///
    /// # Errors
    ///
    /// If any sink rejects the batch, an error is returned once all sinks have completed.
    pub async fn send_events(&self, events: &[Event]) -> Result<(), LifecycleError> {
        let results = join_all(self.sinks.iter().map(|sink| async move {
            (sink.id().to_string(), sink.send_events(events).await.map_err(GenericError::from))
        }))
        .await;
        aggregate("send events to", "sink", results)
    }

    /// Sends a batch of metrics to every sink.
    ///
    /// # Errors
    ///
    /// If any sink rejects the batch, an error is returned once all sinks have completed.
    pub async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), LifecycleError> {
        let results = join_all(self.sinks.iter().map(|sink| async move {
            (sink.id().to_string(), sink.send_metrics(metrics).await.map_err(GenericError::from))
        }))
        .await;
        aggregate("send metrics to", "sink", results)
    }
}

/// Aggregates every configured source.
#[derive(Clone, Debug, Default)]
pub struct InputManager {
    sources: Arc<Vec<Arc<dyn Source>>>,
}

impl InputManager {
    /// Creates a new `InputManager` over the given sources.
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self {
            sources: Arc::new(sources),
        }
    }

    /// Returns the managed sources.
    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    /// Starts every source.
    ///
    /// # Errors
    ///
    /// If any source fails to start, an error is returned once all sources have completed.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let results = join_all(
            self.sources
                .iter()
                .map(|source| async move { (source.id().to_string(), source.start().await) }),
        )
        .await;
        aggregate("start", "source", results)
    }

    /// Stops every source.
    ///
    /// # Errors
    ///
    /// If any source fails to stop cleanly, an error is returned once all sources have completed.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let results = join_all(
            self.sources
                .iter()
                .map(|source| async move { (source.id().to_string(), source.stop().await) }),
        )
        .await;
        aggregate("stop", "source", results)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use ffwd_error::generic_error;

    use super::*;
    use crate::sinks::{SinkError, SinkLifecycle, SinkState};

    #[derive(Debug, Default)]
    struct FakeSink {
        id: String,
        lifecycle: SinkLifecycle,
        start_delay: Option<Duration>,
        fail_start: bool,
        fail_stop: bool,
        received: AtomicUsize,
    }

    impl FakeSink {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BatchedSink for FakeSink {
        fn id(&self) -> &str {
            &self.id
        }

        fn state(&self) -> SinkState {
            self.lifecycle.state()
        }

        fn send_event(&self, _event: &Event) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        fn send_metric(&self, _metric: &Metric) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        async fn send_events(&self, events: &[Event]) -> Result<(), SinkError> {
            self.received.fetch_add(events.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), SinkError> {
            if !self.is_ready() {
                return Err(SinkError::NotReady { sink: self.id.clone() });
            }
            self.received.fetch_add(metrics.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn start(&self) -> Result<(), SinkError> {
            self.lifecycle.begin_start();
            if let Some(delay) = self.start_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_start {
                self.lifecycle.abort_start();
                return Err(SinkError::NotReady { sink: self.id.clone() });
            }
            self.lifecycle.finish_start();
            Ok(())
        }

        async fn stop(&self) -> Result<(), SinkError> {
            self.lifecycle.begin_stop();
            self.lifecycle.finish_stop();
            if self.fail_stop {
                return Err(SinkError::Stopped { sink: self.id.clone() });
            }
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.lifecycle.is_ready()
        }
    }

    #[derive(Debug)]
    struct FakeSource {
        id: String,
        running: AtomicBool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Source for FakeSource {
        fn id(&self) -> &str {
            &self.id
        }

        async fn start(&self) -> Result<(), GenericError> {
            self.running.store(true, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("start {}", self.id));
            Ok(())
        }

        async fn stop(&self) -> Result<(), GenericError> {
            self.running.store(false, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("stop {}", self.id));
            if self.id == "broken" {
                return Err(generic_error!("source did not drain"));
            }
            Ok(())
        }
    }

    fn manager_of(sinks: &[Arc<FakeSink>]) -> OutputManager {
        OutputManager::new(
            sinks
                .iter()
                .map(|sink| Arc::clone(sink) as Arc<dyn BatchedSink>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn failing_stop_does_not_prevent_siblings_from_stopping() {
        let sinks = vec![
            Arc::new(FakeSink::new("riemann")),
            Arc::new(FakeSink {
                fail_stop: true,
                ..FakeSink::new("kafka")
            }),
            Arc::new(FakeSink::new("debug")),
        ];
        let manager = manager_of(&sinks);
        manager.start().await.unwrap();
        assert!(manager.is_ready());

        let error = manager.stop().await.unwrap_err();

        assert_eq!(error.failures().len(), 1);
        assert_eq!(error.failures()[0].id, "kafka");
        assert_eq!(error.to_string(), "Failed to stop 1 of 3 sink(s): kafka.");
        for sink in &sinks {
            assert_eq!(sink.state(), SinkState::Stopped, "sink {}", sink.id());
        }
        assert!(!manager.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_start_does_not_cancel_slow_siblings() {
        let sinks = vec![
            Arc::new(FakeSink {
                start_delay: Some(Duration::from_secs(5)),
                ..FakeSink::new("slow")
            }),
            Arc::new(FakeSink {
                fail_start: true,
                ..FakeSink::new("broken")
            }),
        ];
        let manager = manager_of(&sinks);

        let error = manager.start().await.unwrap_err();

        assert_eq!(error.failures().len(), 1);
        assert_eq!(sinks[0].state(), SinkState::Ready);
        assert_eq!(sinks[1].state(), SinkState::Created);
    }

    #[tokio::test]
    async fn items_fan_out_to_every_sink() {
        let sinks = vec![Arc::new(FakeSink::new("a")), Arc::new(FakeSink::new("b"))];
        let manager = manager_of(&sinks);
        manager.start().await.unwrap();

        manager.send_metric(&Metric::new("cpu.idle", 0.5));
        manager.send_event(&Event::new("deploy", 1.0));
        manager
            .send_metrics(&[Metric::new("cpu.user", 0.1), Metric::new("cpu.system", 0.2)])
            .await
            .unwrap();

        for sink in &sinks {
            assert_eq!(sink.received.load(Ordering::SeqCst), 4);
        }
    }

    #[tokio::test]
    async fn batch_fan_out_reports_rejecting_sinks() {
        let sinks = vec![Arc::new(FakeSink::new("ready")), Arc::new(FakeSink::new("idle"))];
        sinks[0].start().await.unwrap();
        let manager = manager_of(&sinks);

        let error = manager.send_metrics(&[Metric::new("cpu.idle", 0.5)]).await.unwrap_err();

        assert_eq!(error.failures().len(), 1);
        assert_eq!(error.failures()[0].id, "idle");
        assert_eq!(sinks[0].received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn input_manager_stops_every_source() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sources = ["heartbeat", "broken"]
            .into_iter()
            .map(|id| {
                Arc::new(FakeSource {
                    id: id.to_string(),
                    running: AtomicBool::new(false),
                    log: Arc::clone(&log),
                })
            })
            .collect::<Vec<_>>();
        let manager = InputManager::new(
            sources
                .iter()
                .map(|source| Arc::clone(source) as Arc<dyn Source>)
                .collect(),
        );

        manager.start().await.unwrap();
        assert!(sources.iter().all(|source| source.running.load(Ordering::SeqCst)));

        let error = manager.stop().await.unwrap_err();
        assert_eq!(error.to_string(), "Failed to stop 1 of 2 source(s): broken.");
        assert!(sources.iter().all(|source| !source.running.load(Ordering::SeqCst)));
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn empty_managers_succeed() {
        OutputManager::default().start().await.unwrap();
        OutputManager::default().stop().await.unwrap();
        InputManager::default().start().await.unwrap();
        assert!(OutputManager::default().is_ready());
    }
}
