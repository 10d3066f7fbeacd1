use crate::{Error, Event, EventStream, KeyValue, Result, Store};
use etcd_client::{Client, DeleteOptions, EventType, GetOptions, PutOptions, WatchOptions};
use futures::prelude::*;
use std::{fmt, time::Duration};
use tracing::debug;

/// A [`Store`] backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

// === impl EtcdStore ===

impl EtcdStore {
    pub async fn connect<E: AsRef<str>>(endpoints: &[E]) -> Result<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| Error::rpc("connect", e))?;
        Ok(Self { client })
    }
}

impl fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Store for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        let rsp = client
            .get(key, None)
            .await
            .map_err(|e| Error::rpc("get", e))?;
        Ok(rsp
            .kvs()
            .first()
            .map(|kv| String::from_utf8_lossy(kv.value()).into_owned()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let rsp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::rpc("get_prefix", e))?;
        Ok(rsp
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: String::from_utf8_lossy(kv.value()).into_owned(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .put(key, value, None)
            .await
            .map_err(|e| Error::rpc("put", e))?;
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut client = self.client.clone();
        let lease = client
            .lease_grant(ttl.as_secs().max(1) as i64, None)
            .await
            .map_err(|e| Error::rpc("lease_grant", e))?;
        debug!(%key, lease = lease.id(), ttl = lease.ttl(), "Granted lease");
        client
            .put(key, value, Some(PutOptions::new().with_lease(lease.id())))
            .await
            .map_err(|e| Error::rpc("put", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| Error::rpc("delete", e))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut client = self.client.clone();
        let rsp = client
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::rpc("delete_prefix", e))?;
        Ok(rsp.deleted().max(0) as u64)
    }

    async fn watch(&self, prefix: &str) -> Result<EventStream> {
        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::rpc("watch", e))?;

        // The watcher is carried along with the stream so the watch stays
        // registered for as long as the stream is polled.
        let events = stream::unfold(Some((watcher, stream)), |state| async move {
            let (watcher, mut stream) = state?;
            match stream.message().await {
                Ok(Some(rsp)) => {
                    let events = rsp
                        .events()
                        .iter()
                        .filter_map(translate)
                        .map(Ok)
                        .collect::<Vec<_>>();
                    Some((events, Some((watcher, stream))))
                }
                Ok(None) => Some((vec![Err(Error::Closed)], None)),
                Err(error) => Some((vec![Err(Error::rpc("watch", error))], None)),
            }
        })
        .flat_map(stream::iter);

        Ok(Box::pin(events))
    }
}

fn translate(event: &etcd_client::Event) -> Option<Event> {
    let kv = event.kv()?;
    let key = String::from_utf8_lossy(kv.key()).into_owned();
    Some(match event.event_type() {
        EventType::Put => Event::put(key, String::from_utf8_lossy(kv.value())),
        EventType::Delete => Event::delete(key),
    })
}
