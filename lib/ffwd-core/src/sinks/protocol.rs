use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::{OptionExt as _, ResultExt as _};
use tokio::time::timeout;
use tracing::{debug, info, trace};

use super::{
    BatchedSink, Connection, NotConnected, SendTimeout, Serialize, SinkError, SinkLifecycle, SinkState, Start, Stopped,
};
use crate::{
    model::{Event, Metric},
    protocol::{ProtocolConnection, ProtocolConnectionManager},
    serializer::{SerializeError, Serializer},
};

/// A sink that writes serialized items to a protocol connection.
///
/// The connection is owned by a [`ProtocolConnectionManager`], which keeps it alive and reconnects as needed. Starting
/// the sink resolves once the first connection is published.
#[derive(Debug)]
pub struct ProtocolPluginSink {
    id: String,
    manager: ProtocolConnectionManager,
    serializer: Arc<dyn Serializer>,
    send_timeout: Duration,
    lifecycle: SinkLifecycle,
}

impl ProtocolPluginSink {
    /// Creates a new `ProtocolPluginSink`.
    pub fn new<S: Into<String>>(
        id: S, manager: ProtocolConnectionManager, serializer: Arc<dyn Serializer>, send_timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            manager,
            serializer,
            send_timeout,
            lifecycle: SinkLifecycle::new(),
        }
    }

    /// Returns the connection manager.
    pub fn manager(&self) -> &ProtocolConnectionManager {
        &self.manager
    }

    fn active_connection(&self) -> Option<Arc<dyn ProtocolConnection>> {
        self.manager.connection().filter(|connection| connection.is_connected())
    }

    fn send_single(&self, kind: &'static str, payload: impl FnOnce() -> Result<Bytes, SerializeError>) {
        let connection = match self.active_connection() {
            Some(connection) => connection,
            None => {
                trace!(sink = %self.id, kind, "No active connection. Dropping item.");
                return;
            }
        };

        match payload() {
            Ok(frame) => connection.send(frame),
            Err(e) => debug!(sink = %self.id, error = %e, "Dropping item that failed to serialize."),
        }
    }

    async fn send_batch(
        &self, payloads: impl FnOnce() -> Result<Vec<Bytes>, SerializeError>,
    ) -> Result<(), SinkError> {
        let connection = self.active_connection().context(NotConnected {
            destination: self.manager.destination(),
        })?;

        let frames = payloads().context(Serialize)?;
        if frames.is_empty() {
            return Ok(());
        }

        timeout(self.send_timeout, connection.send_all(frames))
            .await
            .map_err(|_| {
                SendTimeout {
                    destination: self.manager.destination(),
                    timeout: self.send_timeout,
                }
                .build()
            })?
            .context(Connection)
    }
}

#[async_trait]
impl BatchedSink for ProtocolPluginSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> SinkState {
        self.lifecycle.state()
    }

    fn send_event(&self, event: &Event) {
        self.send_single("event", || self.serializer.serialize_event(event));
    }

    fn send_metric(&self, metric: &Metric) {
        self.send_single("metric", || self.serializer.serialize_metric(metric));
    }

    async fn send_events(&self, events: &[Event]) -> Result<(), SinkError> {
        self.send_batch(|| events.iter().map(|event| self.serializer.serialize_event(event)).collect())
            .await
    }

    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), SinkError> {
        self.send_batch(|| {
            metrics
                .iter()
                .map(|metric| self.serializer.serialize_metric(metric))
                .collect()
        })
        .await
    }

    async fn start(&self) -> Result<(), SinkError> {
        if !self.lifecycle.begin_start() {
            return Stopped { sink: self.id.clone() }.fail();
        }

        debug!(sink = %self.id, destination = %self.manager.destination(), "Starting sink.");
        if let Err(e) = self.manager.start().await {
            self.lifecycle.abort_start();
            return Err(e).context(Start { sink: self.id.clone() });
        }

        if !self.lifecycle.finish_start() {
            return Stopped { sink: self.id.clone() }.fail();
        }

        info!(sink = %self.id, destination = %self.manager.destination(), "Sink ready.");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        if !self.lifecycle.begin_stop() {
            return Ok(());
        }

        self.manager.stop().await;
        self.lifecycle.finish_stop();

        debug!(sink = %self.id, "Sink stopped.");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.is_ready() && self.active_connection().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        protocol::{test_util::MockClient, ProtocolClient, ProtocolDescriptor},
        retry::{Bounded, FixedDelay, RetryPolicy},
        sinks::test_util::KeySerializer,
    };

    fn sink_with(client: &Arc<MockClient>, retry_policy: Arc<dyn RetryPolicy>) -> ProtocolPluginSink {
        let manager = ProtocolConnectionManager::new(
            ProtocolDescriptor::new("tcp", "127.0.0.1", 19000),
            Arc::clone(client) as Arc<dyn ProtocolClient>,
            retry_policy,
            Duration::from_secs(10),
        );
        ProtocolPluginSink::new("riemann", manager, Arc::new(KeySerializer), Duration::from_secs(10))
    }

    fn default_sink(client: &Arc<MockClient>) -> ProtocolPluginSink {
        sink_with(client, Arc::new(FixedDelay::new(Duration::from_millis(100))))
    }

    #[tokio::test]
    async fn single_send_without_connection_is_a_no_op() {
        let client = Arc::new(MockClient::default());
        let sink = default_sink(&client);

        sink.send_event(&Event::new("deploy", 1.0));
        sink.send_metric(&Metric::new("cpu.idle", 0.5));

        assert!(client.connections.lock().unwrap().is_empty());
        assert_eq!(client.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(sink.state(), SinkState::Created);
    }

    #[tokio::test]
    async fn batch_send_without_connection_fails_fast() {
        let client = Arc::new(MockClient::default());
        let sink = default_sink(&client);

        let result = sink
            .send_events(&[Event::new("deploy", 1.0), Event::new("rollback", 1.0)])
            .await;

        match result {
            Err(e @ SinkError::NotConnected { .. }) => {
                assert_eq!(e.to_string(), "Not connected to tcp://127.0.0.1:19000.")
            }
            other => panic!("expected not connected, got {:?}", other),
        }
        assert!(client.connections.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sends_reach_the_connection_in_order() {
        let client = Arc::new(MockClient::default());
        let sink = default_sink(&client);
        sink.start().await.unwrap();
        assert!(sink.is_ready());

        sink.send_metric(&Metric::new("cpu.idle", 0.5));
        sink.send_metrics(&[Metric::new("cpu.user", 0.1), Metric::new("cpu.system", 0.2)])
            .await
            .unwrap();
        sink.send_events(&[Event::new("deploy", 1.0)]).await.unwrap();

        let connection = client.last_connection().unwrap();
        assert_eq!(
            connection.frames(),
            vec![
                Bytes::from("cpu.idle"),
                Bytes::from("cpu.user"),
                Bytes::from("cpu.system"),
                Bytes::from("deploy"),
            ]
        );
    }

    #[tokio::test]
    async fn serialization_failure_fails_whole_batch() {
        let client = Arc::new(MockClient::default());
        let sink = default_sink(&client);
        sink.start().await.unwrap();

        let result = sink
            .send_events(&[Event::new("deploy", 1.0), Event::new("poison", 1.0)])
            .await;

        assert!(matches!(result, Err(SinkError::Serialize { .. })));
        let connection = client.last_connection().unwrap();
        assert!(connection.frames().is_empty());
        assert!(connection.is_connected());
        assert!(sink.is_ready());
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let client = Arc::new(MockClient::default());
        let sink = default_sink(&client);
        sink.start().await.unwrap();
        client.last_connection().unwrap().fail_writes.store(true, Ordering::SeqCst);

        let result = sink.send_metrics(&[Metric::new("cpu.idle", 0.5)]).await;
        assert!(matches!(result, Err(SinkError::Connection { .. })));
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let client = Arc::new(MockClient::default());
        let sink = default_sink(&client);
        sink.start().await.unwrap();

        sink.stop().await.unwrap();
        sink.stop().await.unwrap();

        assert_eq!(sink.state(), SinkState::Stopped);
        assert!(!sink.is_ready());
        assert!(matches!(sink.start().await, Err(SinkError::Stopped { .. })));
        assert_eq!(sink.state(), SinkState::Stopped);
        assert_eq!(client.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn give_up_fails_start_and_allows_retry() {
        let client = Arc::new(MockClient::default());
        client.failures_before_success.store(2, Ordering::SeqCst);
        let sink = sink_with(
            &client,
            Arc::new(Bounded::new(FixedDelay::new(Duration::from_millis(100)), 2)),
        );

        let result = sink.start().await;
        assert!(matches!(result, Err(SinkError::Start { .. })));
        assert_eq!(sink.state(), SinkState::Created);
        assert!(!sink.is_ready());

        sink.start().await.unwrap();
        assert!(sink.is_ready());
    }

    #[tokio::test]
    async fn repeated_lifecycles_do_not_leak_connections() {
        let client = Arc::new(MockClient::default());

        for _ in 0..10 {
            let sink = default_sink(&client);
            sink.start().await.unwrap();
            sink.stop().await.unwrap();
        }

        assert_eq!(client.attempts.load(Ordering::SeqCst), 10);
        assert_eq!(client.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_share_one_connection() {
        let client = Arc::new(MockClient {
            connect_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let sink = default_sink(&client);

        let (first, second) = tokio::join!(sink.start(), sink.start());
        first.unwrap();
        second.unwrap();

        assert!(sink.is_ready());
        assert_eq!(client.live_connections(), 1);

        sink.stop().await.unwrap();
        assert_eq!(client.live_connections(), 0);
    }
}
