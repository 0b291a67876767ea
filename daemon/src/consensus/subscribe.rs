use std::sync::Arc;

use async_trait::async_trait;
use sia_common::crypto::Hash;
use tokio::sync::{mpsc, Mutex};

use super::{ConsensusChange, ConsensusError};
use crate::config::SUBSCRIBER_QUEUE_DEPTH;

// A module consuming the ordered consensus change stream. Callbacks run on
// the subscriber's own delivery task; they may read consensus state but must
// never call back into a mutating operation.
#[async_trait]
pub trait ConsensusSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process_consensus_change(&self, change: Arc<ConsensusChange>);
}

struct SubscriberHandle {
    name: &'static str,
    sender: mpsc::Sender<Arc<ConsensusChange>>,
}

// Registered subscribers. Each gets its own task draining a bounded queue,
// so deliveries are serialized per subscriber while different subscribers
// proceed in parallel. Publishing awaits the slowest queue: back-pressure
// instead of drops.
pub(super) struct SubscriberList {
    inner: Mutex<Vec<SubscriberHandle>>,
}

impl SubscriberList {
    pub fn new() -> Self {
        SubscriberList {
            inner: Mutex::new(Vec::new()),
        }
    }

    // Catch the subscriber up via `next_change`, then register it. Holding
    // the list lock across both steps keeps the sequence gap-free: no
    // publish can interleave between the last replayed change and the first
    // live one.
    pub async fn subscribe<F>(
        &self,
        subscriber: Arc<dyn ConsensusSubscriber>,
        from_id: Hash,
        next_change: F,
    ) -> Result<(), ConsensusError>
    where
        F: Fn(&Hash) -> Result<Option<ConsensusChange>, ConsensusError>,
    {
        let mut list = self.inner.lock().await;

        let (sender, mut receiver) = mpsc::channel::<Arc<ConsensusChange>>(SUBSCRIBER_QUEUE_DEPTH);
        let name = subscriber.name();
        tokio::spawn(async move {
            while let Some(change) = receiver.recv().await {
                subscriber.process_consensus_change(change).await;
            }
            debug!("Subscriber {} delivery task ended", name);
        });

        let mut cursor = from_id;
        let mut replayed = 0usize;
        while let Some(change) = next_change(&cursor)? {
            cursor = change.id.clone();
            if sender.send(Arc::new(change)).await.is_err() {
                return Err(ConsensusError::CorruptDatabase);
            }
            replayed += 1;
        }
        if replayed > 0 {
            debug!("Subscriber {} caught up over {} changes", name, replayed);
        }

        list.push(SubscriberHandle { name, sender });
        info!("Subscriber {} registered", name);
        Ok(())
    }

    // Deliver one change to every subscriber, in registration order. A
    // closed queue means the subscriber died; its registration is dropped
    // and it is expected to re-subscribe from its last durable checkpoint.
    pub async fn publish(&self, change: Arc<ConsensusChange>) {
        let mut list = self.inner.lock().await;
        let mut failed: Vec<usize> = Vec::new();
        for (index, handle) in list.iter().enumerate() {
            if handle.sender.send(Arc::clone(&change)).await.is_err() {
                error!("Subscriber {} dropped its queue, unregistering", handle.name);
                failed.push(index);
            }
        }
        for index in failed.into_iter().rev() {
            list.remove(index);
        }
    }

    pub async fn close(&self) {
        // dropping the senders ends every delivery task once drained
        self.inner.lock().await.clear();
    }
}
