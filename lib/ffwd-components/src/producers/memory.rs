use std::sync::Mutex;

use async_trait::async_trait;
use ffwd_core::sinks::broker::{Producer, ProducerRecord};
use ffwd_error::{generic_error, GenericError};
use tokio::sync::mpsc;

/// Creates an in-process producer and the consumer that receives its records.
///
/// `capacity` bounds the number of records buffered between the two. Once full, producing waits for the consumer.
pub fn memory_producer(capacity: usize) -> (MemoryProducer, MemoryConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MemoryProducer {
            sender: Mutex::new(Some(tx)),
        },
        MemoryConsumer { receiver: rx },
    )
}

/// Producer half of an in-process broker.
#[derive(Debug)]
pub struct MemoryProducer {
    sender: Mutex<Option<mpsc::Sender<ProducerRecord>>>,
}

impl MemoryProducer {
    fn sender(&self) -> Option<mpsc::Sender<ProducerRecord>> {
        match self.sender.lock() {
            Ok(sender) => sender.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&self, records: Vec<ProducerRecord>) -> Result<(), GenericError> {
        let sender = self.sender().ok_or_else(|| generic_error!("Producer is closed."))?;
        for record in records {
            sender
                .send(record)
                .await
                .map_err(|_| generic_error!("Consumer is gone."))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), GenericError> {
        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.sender().is_some_and(|sender| !sender.is_closed())
    }
}

/// Consumer half of an in-process broker.
#[derive(Debug)]
pub struct MemoryConsumer {
    receiver: mpsc::Receiver<ProducerRecord>,
}

impl MemoryConsumer {
    /// Receives the next record.
    ///
    /// Returns `None` once the producer is closed and every buffered record has been received.
    pub async fn recv(&mut self) -> Option<ProducerRecord> {
        self.receiver.recv().await
    }

    /// Takes every record that is currently buffered, without waiting.
    pub fn try_drain(&mut self) -> Vec<ProducerRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.receiver.try_recv() {
            records.push(record);
        }
        records
    }
}
