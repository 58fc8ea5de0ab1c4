use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use ffwd_core::{
    model::{Event, Metric},
    sinks::{BatchedSink, SinkError, SinkLifecycle, SinkState},
    sources::Source,
};
use ffwd_error::{generic_error, GenericError};

/// Records everything sent to it.
#[derive(Debug)]
pub struct RecordingSink {
    id: String,
    lifecycle: SinkLifecycle,
    fail_start: bool,
    metrics: Mutex<Vec<Metric>>,
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new(id: &str) -> Arc<Self> {
        Self::with_start_failure(id, false)
    }

    pub fn with_start_failure(id: &str, fail_start: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            lifecycle: SinkLifecycle::new(),
            fail_start,
            metrics: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn metrics(&self) -> Vec<Metric> {
        self.metrics.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchedSink for RecordingSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> SinkState {
        self.lifecycle.state()
    }

    fn send_event(&self, event: &Event) {
        if self.is_ready() {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn send_metric(&self, metric: &Metric) {
        if self.is_ready() {
            self.metrics.lock().unwrap().push(metric.clone());
        }
    }

    async fn send_events(&self, events: &[Event]) -> Result<(), SinkError> {
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }

    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), SinkError> {
        self.metrics.lock().unwrap().extend_from_slice(metrics);
        Ok(())
    }

    async fn start(&self) -> Result<(), SinkError> {
        if !self.lifecycle.begin_start() {
            return Err(SinkError::Stopped { sink: self.id.clone() });
        }
        if self.fail_start {
            self.lifecycle.abort_start();
            return Err(SinkError::Producer {
                source: generic_error!("destination unreachable"),
            });
        }
        self.lifecycle.finish_start();
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        if self.lifecycle.begin_stop() {
            self.lifecycle.finish_stop();
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }
}

/// Counts lifecycle calls.
#[derive(Debug, Default)]
pub struct CountingSource {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
}

#[async_trait]
impl Source for CountingSource {
    fn id(&self) -> &str {
        "counting"
    }

    async fn start(&self) -> Result<(), GenericError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(generic_error!("source failed"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), GenericError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
