use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use envnode_common::{RemoteStore, StoreError};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, QoS};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

const MAX_RETAINED_PAYLOAD_BYTES: usize = 512;

/// Latest retained value per topic, fed by the MQTT event loop.
#[derive(Debug, Default)]
pub struct RetainedCache {
    values: BTreeMap<String, Value>,
}

impl RetainedCache {
    /// Stores a payload; non-JSON payloads are kept as strings and an empty
    /// payload clears the topic, mirroring retained-message deletion.
    pub fn insert_payload(&mut self, topic: &str, payload: &[u8]) {
        if payload.is_empty() {
            self.values.remove(topic);
            return;
        }
        let value = serde_json::from_slice::<Value>(payload).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(payload).trim().to_string())
        });
        self.values.insert(topic.to_string(), value);
    }

    pub fn insert(&mut self, topic: &str, value: Value) {
        self.values.insert(topic.to_string(), value);
    }

    /// Exact topic value, or the direct children of `path` as an object.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.values.get(path) {
            return Some(value.clone());
        }

        let prefix = format!("{path}/");
        let fields: Map<String, Value> = self
            .values
            .range(prefix.clone()..)
            .take_while(|(topic, _)| topic.starts_with(&prefix))
            .filter_map(|(topic, value)| {
                let leaf = &topic[prefix.len()..];
                (!leaf.contains('/')).then(|| (leaf.to_string(), value.clone()))
            })
            .collect();

        (!fields.is_empty()).then_some(Value::Object(fields))
    }
}

/// Remote store over MQTT retained topics. Publishes never block: they are
/// queued with `try_publish` and fail fast when the request queue is full.
#[derive(Clone)]
pub struct MqttStore {
    client: AsyncClient,
    cache: Arc<Mutex<RetainedCache>>,
    ready: Arc<AtomicBool>,
}

impl MqttStore {
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            cache: Arc::new(Mutex::new(RetainedCache::default())),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    fn publish(&self, path: &str, value: &Value, retain: bool) -> Result<(), StoreError> {
        if !self.is_ready() {
            return Err(StoreError::NotReady);
        }
        let payload = serde_json::to_vec(value).map_err(|err| StoreError::Write {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
        self.client
            .try_publish(path, QoS::AtLeastOnce, retain, payload)
            .map_err(|err| StoreError::Write {
                path: path.to_string(),
                reason: err.to_string(),
            })
    }

    fn with_cache<T>(&self, f: impl FnOnce(&mut RetainedCache) -> T) -> T {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut cache)
    }
}

impl RemoteStore for MqttStore {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn set(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        self.publish(path, &value, true)?;
        self.with_cache(|cache| cache.insert(path, value));
        Ok(())
    }

    fn get(&mut self, path: &str) -> Result<Option<Value>, StoreError> {
        if !self.is_ready() {
            return Err(StoreError::NotReady);
        }
        Ok(self.with_cache(|cache| cache.lookup(path)))
    }

    fn push(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        self.publish(path, &value, false)
    }
}

/// Drives the MQTT connection; re-subscribes on every ConnAck.
pub fn spawn_event_loop(store: MqttStore, mut eventloop: EventLoop, subscription: String) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("remote store connected");
                    if let Err(err) = store
                        .client
                        .subscribe(subscription.as_str(), QoS::AtLeastOnce)
                        .await
                    {
                        warn!("failed to subscribe to {subscription}: {err}");
                    }
                    store.ready.store(true, Ordering::Relaxed);
                }
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if message.payload.len() > MAX_RETAINED_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized payload on topic {} ({} bytes)",
                            message.topic,
                            message.payload.len()
                        );
                        continue;
                    }
                    debug!("remote update on {}", message.topic);
                    store.with_cache(|cache| {
                        cache.insert_payload(&message.topic, &message.payload)
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    store.ready.store(false, Ordering::Relaxed);
                    warn!("remote store poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
