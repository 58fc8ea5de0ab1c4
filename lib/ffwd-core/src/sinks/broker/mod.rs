//! Message broker sink.
use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use ffwd_error::GenericError;
use snafu::ResultExt as _;
use tokio::{runtime::Handle, sync::Semaphore, time::timeout};
use tracing::{debug, info, trace};

use super::{
    BatchedSink, NotReady, Producer as ProducerFailed, SendTimeout, Serialize, SinkError, SinkLifecycle, SinkState,
    Stopped,
};
use crate::{
    model::{Event, Metric},
    serializer::{SerializeError, Serializer},
};

mod partitioner;
pub use self::partitioner::Partitioner;

mod router;
pub use self::router::Router;

/// A record handed to a broker producer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProducerRecord {
    /// Destination topic.
    pub topic: String,

    /// Partition key.
    pub key: Bytes,

    /// Serialized item.
    pub payload: Bytes,
}

/// A handle to a message broker producer.
#[async_trait]
pub trait Producer: fmt::Debug + Send + Sync {
    /// Produces a batch of records.
    ///
    /// # Errors
    ///
    /// If the broker did not accept the batch, an error is returned.
    async fn send(&self, records: Vec<ProducerRecord>) -> Result<(), GenericError>;

    /// Flushes and closes the producer.
    ///
    /// # Errors
    ///
    /// If pending records could not be flushed, an error is returned.
    async fn close(&self) -> Result<(), GenericError>;

    /// Returns `true` if the producer can currently reach the broker.
    fn is_healthy(&self) -> bool;
}

/// Default limit on single sends waiting on the producer at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// A sink that produces serialized items to broker topics.
///
/// Topics are selected by a [`Router`], partition keys by a [`Partitioner`]. Single sends are handed off to the
/// producer on the given runtime, so they never block the caller. At most [`DEFAULT_MAX_IN_FLIGHT`] of them (see
/// [`with_max_in_flight`][Self::with_max_in_flight]) wait on the producer at once; beyond that, items are dropped.
pub struct BrokerPluginSink {
    id: String,
    producer: Arc<dyn Producer>,
    router: Router,
    partitioner: Partitioner,
    serializer: Arc<dyn Serializer>,
    handle: Handle,
    send_timeout: Duration,
    in_flight: Arc<Semaphore>,
    lifecycle: SinkLifecycle,
}

impl BrokerPluginSink {
    /// Creates a new `BrokerPluginSink`.
    pub fn new<S: Into<String>>(
        id: S, producer: Arc<dyn Producer>, router: Router, partitioner: Partitioner, serializer: Arc<dyn Serializer>,
        handle: Handle, send_timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            producer,
            router,
            partitioner,
            serializer,
            handle,
            send_timeout,
            in_flight: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            lifecycle: SinkLifecycle::new(),
        }
    }

    /// Sets the limit on single sends waiting on the producer at once.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(max_in_flight));
        self
    }

    fn event_record(&self, event: &Event) -> Result<ProducerRecord, SerializeError> {
        Ok(ProducerRecord {
            topic: self.router.route_event(event),
            key: Bytes::copy_from_slice(self.partitioner.partition_event(event).as_bytes()),
            payload: self.serializer.serialize_event(event)?,
        })
    }

    fn metric_record(&self, metric: &Metric) -> Result<ProducerRecord, SerializeError> {
        Ok(ProducerRecord {
            topic: self.router.route_metric(metric),
            key: Bytes::copy_from_slice(self.partitioner.partition_metric(metric).as_bytes()),
            payload: self.serializer.serialize_metric(metric)?,
        })
    }

    fn send_single(&self, record: impl FnOnce() -> Result<ProducerRecord, SerializeError>) {
        if !self.is_ready() {
            trace!(sink = %self.id, "Sink not ready. Dropping item.");
            return;
        }

        let permit = match Arc::clone(&self.in_flight).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                trace!(sink = %self.id, "Too many items waiting on the producer. Dropping item.");
                return;
            }
        };

        let record = match record() {
            Ok(record) => record,
            Err(e) => {
                debug!(sink = %self.id, error = %e, "Dropping item that failed to serialize.");
                return;
            }
        };

        let producer = Arc::clone(&self.producer);
        let id = self.id.clone();
        let send_timeout = self.send_timeout;
        self.handle.spawn(async move {
            let _permit = permit;
            match timeout(send_timeout, producer.send(vec![record])).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(sink = %id, error = %e, "Failed to produce item."),
                Err(_) => debug!(sink = %id, timeout = ?send_timeout, "Timed out producing item."),
            }
        });
    }

    async fn send_batch(
        &self, records: impl FnOnce() -> Result<Vec<ProducerRecord>, SerializeError>,
    ) -> Result<(), SinkError> {
        if !self.is_ready() {
            return NotReady { sink: self.id.clone() }.fail();
        }

        let records = records().context(Serialize)?;
        if records.is_empty() {
            return Ok(());
        }

        timeout(self.send_timeout, self.producer.send(records))
            .await
            .map_err(|_| {
                SendTimeout {
                    destination: self.id.clone(),
                    timeout: self.send_timeout,
                }
                .build()
            })?
            .context(ProducerFailed)
    }
}

impl fmt::Debug for BrokerPluginSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerPluginSink")
            .field("id", &self.id)
            .field("router", &self.router)
            .field("partitioner", &self.partitioner)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[async_trait]
impl BatchedSink for BrokerPluginSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> SinkState {
        self.lifecycle.state()
    }

    fn send_event(&self, event: &Event) {
        self.send_single(|| self.event_record(event));
    }

    fn send_metric(&self, metric: &Metric) {
        self.send_single(|| self.metric_record(metric));
    }

    async fn send_events(&self, events: &[Event]) -> Result<(), SinkError> {
        self.send_batch(|| events.iter().map(|event| self.event_record(event)).collect())
            .await
    }

    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), SinkError> {
        self.send_batch(|| metrics.iter().map(|metric| self.metric_record(metric)).collect())
            .await
    }

    async fn start(&self) -> Result<(), SinkError> {
        if !self.lifecycle.begin_start() || !self.lifecycle.finish_start() {
            return Stopped { sink: self.id.clone() }.fail();
        }

        info!(sink = %self.id, healthy = self.producer.is_healthy(), "Sink ready.");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        if !self.lifecycle.begin_stop() {
            return Ok(());
        }

        let result = self.producer.close().await;
        self.lifecycle.finish_stop();

        debug!(sink = %self.id, "Sink stopped.");
        result.context(ProducerFailed)
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.is_ready() && self.producer.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    use ffwd_error::generic_error;

    use super::*;
    use crate::sinks::test_util::KeySerializer;

    #[derive(Debug)]
    struct RecordingProducer {
        records: Mutex<Vec<ProducerRecord>>,
        healthy: AtomicBool,
        closed: AtomicBool,
        fail_close: bool,
    }

    impl RecordingProducer {
        fn new(fail_close: bool) -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                fail_close,
            })
        }

        fn records(&self) -> Vec<ProducerRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Producer for RecordingProducer {
        async fn send(&self, records: Vec<ProducerRecord>) -> Result<(), GenericError> {
            self.records.lock().unwrap().extend(records);
            Ok(())
        }

        async fn close(&self) -> Result<(), GenericError> {
            self.closed.store(true, Ordering::SeqCst);
            self.healthy.store(false, Ordering::SeqCst);
            if self.fail_close {
                return Err(generic_error!("flush failed"));
            }
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn sink_with(producer: &Arc<RecordingProducer>, router: Router, partitioner: Partitioner) -> BrokerPluginSink {
        BrokerPluginSink::new(
            "kafka",
            Arc::clone(producer) as Arc<dyn Producer>,
            router,
            partitioner,
            Arc::new(KeySerializer),
            Handle::current(),
            Duration::from_secs(10),
        )
    }

    fn static_router() -> Router {
        Router::Static {
            metrics: "m".to_string(),
            events: "e".to_string(),
        }
    }

    #[tokio::test]
    async fn static_router_topics_are_used_for_batches() {
        let producer = RecordingProducer::new(false);
        let sink = sink_with(&producer, static_router(), Partitioner::Host);
        sink.start().await.unwrap();

        sink.send_metrics(&[Metric::new("cpu.idle", 0.5).with_host("db-1").with_attribute("site", "lon")])
            .await
            .unwrap();
        sink.send_events(&[Event::new("deploy", 1.0).with_host("web-1")])
            .await
            .unwrap();

        assert_eq!(
            producer.records(),
            vec![
                ProducerRecord {
                    topic: "m".to_string(),
                    key: Bytes::from("db-1"),
                    payload: Bytes::from("cpu.idle"),
                },
                ProducerRecord {
                    topic: "e".to_string(),
                    key: Bytes::from("web-1"),
                    payload: Bytes::from("deploy"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn single_sends_are_handed_off() {
        let producer = RecordingProducer::new(false);
        let sink = sink_with(
            &producer,
            Router::default(),
            Partitioner::Attribute {
                attribute: "shard".to_string(),
            },
        );
        sink.start().await.unwrap();

        sink.send_metric(&Metric::new("cpu.idle", 0.5).with_attribute("site", "lon").with_attribute("shard", "3"));

        for _ in 0..100 {
            if !producer.records().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let records = producer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "metrics-lon");
        assert_eq!(records[0].key, Bytes::from("3"));
    }

    #[tokio::test]
    async fn batch_before_start_fails_fast() {
        let producer = RecordingProducer::new(false);
        let sink = sink_with(&producer, static_router(), Partitioner::Host);

        let result = sink.send_events(&[Event::new("deploy", 1.0)]).await;
        assert!(matches!(result, Err(SinkError::NotReady { .. })));

        sink.send_event(&Event::new("deploy", 1.0));
        tokio::task::yield_now().await;
        assert!(producer.records().is_empty());
    }

    #[tokio::test]
    async fn serialization_failure_hands_off_nothing() {
        let producer = RecordingProducer::new(false);
        let sink = sink_with(&producer, static_router(), Partitioner::Host);
        sink.start().await.unwrap();

        let result = sink
            .send_metrics(&[Metric::new("cpu.idle", 0.5), Metric::new("poison.pill", 0.5)])
            .await;

        assert!(matches!(result, Err(SinkError::Serialize { .. })));
        assert!(producer.records().is_empty());
    }

    #[tokio::test]
    async fn readiness_follows_producer_health() {
        let producer = RecordingProducer::new(false);
        let sink = sink_with(&producer, static_router(), Partitioner::Host);
        assert!(!sink.is_ready());

        sink.start().await.unwrap();
        assert!(sink.is_ready());

        producer.healthy.store(false, Ordering::SeqCst);
        assert!(!sink.is_ready());
        assert_eq!(sink.state(), SinkState::Ready);
    }

    #[tokio::test]
    async fn stop_closes_producer_even_when_close_fails() {
        let producer = RecordingProducer::new(true);
        let sink = sink_with(&producer, static_router(), Partitioner::Host);
        sink.start().await.unwrap();

        let result = sink.stop().await;

        assert!(matches!(result, Err(SinkError::Producer { .. })));
        assert!(producer.closed.load(Ordering::SeqCst));
        assert_eq!(sink.state(), SinkState::Stopped);
        assert!(!sink.is_ready());
        assert!(matches!(sink.start().await, Err(SinkError::Stopped { .. })));
    }

    #[derive(Debug, Default)]
    struct StalledProducer {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl Producer for StalledProducer {
        async fn send(&self, _records: Vec<ProducerRecord>) -> Result<(), GenericError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), GenericError> {
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_sends_are_dropped_while_producer_is_stalled() {
        let producer = Arc::new(StalledProducer::default());
        let sink = BrokerPluginSink::new(
            "kafka",
            Arc::clone(&producer) as Arc<dyn Producer>,
            static_router(),
            Partitioner::default(),
            Arc::new(KeySerializer),
            Handle::current(),
            Duration::from_secs(10),
        )
        .with_max_in_flight(4);
        sink.start().await.unwrap();

        for _ in 0..1000 {
            sink.send_metric(&Metric::new("cpu.idle", 0.5));
        }
        tokio::task::yield_now().await;
        assert_eq!(producer.sends.load(Ordering::SeqCst), 4);

        // Stalled sends time out and free their slots.
        tokio::time::sleep(Duration::from_secs(11)).await;
        sink.send_metric(&Metric::new("cpu.idle", 0.5));
        tokio::task::yield_now().await;
        assert_eq!(producer.sends.load(Ordering::SeqCst), 5);
    }
}
