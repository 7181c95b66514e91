//! Accumulate latest values of a changing list of sources
//!
//! Queue elements update independently of the queue structure. The
//! accumulator keeps one subscription per source identity:
//! - restructuring subscribes new sources, cancels removed ones and keeps
//!   the latest value of the others
//! - any source emission produces a fresh snapshot
//!
//! Snapshots are ordered like the current source list and always have the
//! same length.

use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::trace;

/// Latest value per key, ordered by the current key list
#[derive(Debug, Clone)]
pub struct LatestValues<K, V> {
    order: Vec<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V: Clone> LatestValues<K, V> {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    /// Replace the key list. Kept keys keep their latest value, `fresh`
    /// provides values for added keys.
    pub fn restructure(&mut self, keys: Vec<K>, fresh: impl IntoIterator<Item = (K, V)>) {
        self.entries.retain(|key, _| keys.contains(key));
        for (key, value) in fresh {
            self.entries.entry(key).or_insert(value);
        }
        self.order = keys;
    }

    /// Record a new value, ignored for unknown keys
    pub fn record(&mut self, key: &K, value: V) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                *entry = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Values in key order
    pub fn snapshot(&self) -> Vec<V> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for LatestValues<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscription {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Emission<K, V> {
    key: K,
    generation: u64,
    value: V,
}

/// Accumulates the latest values of a dynamic list of `watch` sources
pub struct AccumulateLatestMany<K, V> {
    values: LatestValues<K, V>,
    subscriptions: HashMap<K, Subscription>,
    generation: u64,
    tx: mpsc::UnboundedSender<Emission<K, V>>,
    rx: mpsc::UnboundedReceiver<Emission<K, V>>,
}

impl<K, V> AccumulateLatestMany<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            values: LatestValues::new(),
            subscriptions: HashMap::new(),
            generation: 0,
            tx,
            rx,
        }
    }

    /// Replace the source list and return the resulting snapshot.
    ///
    /// Receivers of already subscribed keys are dropped, their subscription
    /// is kept. Must be called within a Tokio runtime.
    pub fn set_sources(&mut self, sources: Vec<(K, watch::Receiver<V>)>) -> Vec<V> {
        let keys: Vec<K> = sources.iter().map(|(key, _)| key.clone()).collect();
        self.subscriptions.retain(|key, _| keys.contains(key));

        let mut fresh = Vec::new();
        for (key, mut rx) in sources {
            if self.subscriptions.contains_key(&key) {
                continue;
            }
            let initial = rx.borrow_and_update().clone();
            fresh.push((key.clone(), initial));
            self.subscribe(key, rx);
        }

        self.values.restructure(keys, fresh);
        trace!(sources = self.values.len(), "Accumulator restructured");
        self.values.snapshot()
    }

    fn subscribe(&mut self, key: K, mut rx: watch::Receiver<V>) {
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        let emitted = key.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                let emission = Emission {
                    key: emitted.clone(),
                    generation,
                    value,
                };
                if tx.send(emission).is_err() {
                    break;
                }
            }
        });
        self.subscriptions.insert(key, Subscription { generation, task });
    }

    /// Wait for the next source emission and return the updated snapshot.
    ///
    /// Cancel safe. Emissions of removed sources are skipped.
    pub async fn next(&mut self) -> Option<Vec<V>> {
        loop {
            let emission = self.rx.recv().await?;
            let current = self
                .subscriptions
                .get(&emission.key)
                .is_some_and(|subscription| subscription.generation == emission.generation);
            if current && self.values.record(&emission.key, emission.value) {
                return Some(self.values.snapshot());
            }
        }
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> Vec<V> {
        self.values.snapshot()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> Default for AccumulateLatestMany<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
