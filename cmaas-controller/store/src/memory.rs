use crate::{Error, Event, EventStream, KeyValue, Result, Store};
use futures::prelude::*;
use parking_lot::Mutex;
use std::{collections::BTreeMap, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// An in-process [`Store`].
///
/// Leases never expire on their own; [`MemoryStore::expire_leases`] expires
/// every outstanding lease, emitting a `Delete` event per leased key. Faults
/// can be injected with [`MemoryStore::fail_next`] and
/// [`MemoryStore::fail_always`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    watches: Vec<(String, mpsc::UnboundedSender<Result<Event>>)>,
    calls: BTreeMap<&'static str, usize>,
    fail_next: usize,
    fail_always: bool,
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

// === impl MemoryStore ===

impl MemoryStore {
    /// Fails the next `n` calls with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    pub fn fail_always(&self) {
        self.state.lock().fail_always = true;
    }

    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.fail_always = false;
        state.fail_next = 0;
    }

    /// The number of times `op` was invoked, including failed calls.
    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Expires all leases, returning the keys that were removed.
    pub fn expire_leases(&self) -> Vec<String> {
        let mut state = self.state.lock();
        let expired = state
            .entries
            .iter()
            .filter(|(_, e)| e.ttl.is_some())
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        for key in &expired {
            state.entries.remove(key);
            state.notify(Event::delete(key.clone()));
        }
        expired
    }

    /// The lease TTL bound to `key`, if any.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.state.lock().entries.get(key).and_then(|e| e.ttl)
    }

    /// A snapshot of all entries, ordered by key.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Writes directly, bypassing fault injection and call accounting.
    pub fn seed(&self, key: &str, value: &str) {
        let mut state = self.state.lock();
        state.insert(key, value, None);
    }

    fn call(&self, op: &'static str) -> Result<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        if state.fail_always {
            return Err(Error::rpc(op, "injected failure"));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::rpc(op, "injected failure"));
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.call("get")?;
        Ok(state.entries.get(key).map(|e| e.value.clone()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let state = self.call("get_prefix")?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.call("put")?;
        state.insert(key, value, None);
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut state = self.call("put_with_ttl")?;
        state.insert(key, value, Some(ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.call("delete")?;
        if state.entries.remove(key).is_some() {
            state.notify(Event::delete(key));
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut state = self.call("delete_prefix")?;
        let keys = state
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();
        for key in &keys {
            state.entries.remove(key);
            state.notify(Event::delete(key.clone()));
        }
        Ok(keys.len() as u64)
    }

    async fn watch(&self, prefix: &str) -> Result<EventStream> {
        let mut state = self.call("watch")?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.watches.push((prefix.to_string(), tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

// === impl State ===

impl State {
    fn insert(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
            },
        );
        self.notify(Event::put(key, value));
    }

    fn notify(&mut self, event: Event) {
        self.watches.retain(|(prefix, tx)| {
            if !event.key.starts_with(prefix.as_str()) {
                return !tx.is_closed();
            }
            tx.send(Ok(event.clone())).is_ok()
        });
    }
}
