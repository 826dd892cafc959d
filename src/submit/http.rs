//! Batches events and POSTs a compressed, framed payload on a size threshold or a
//! jittered interval (spec §4.6.4).

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::codec::put_varint;
use crate::event::{write_event, Event};
use crate::jitter::jittered;
use crate::scope::Scope;
use crate::submit::Submitter;

const ZSTD_LEVEL: i32 = 3;

pub struct HttpBatchSubmitter {
    endpoint: String,
    process: Event,
    flush_interval: Duration,
    max_batch_size: usize,
    batch: Mutex<Vec<Event>>,
    trigger: tokio::sync::Notify,
    client: reqwest::Client,
    received: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
    flush_errors: AtomicU64,
    bytes_sent: AtomicU64,
}

impl HttpBatchSubmitter {
    pub fn new(endpoint: impl Into<String>, process: Event, flush_interval: Duration, max_batch_size: usize) -> Self {
        HttpBatchSubmitter {
            endpoint: endpoint.into(),
            process,
            flush_interval,
            max_batch_size: max_batch_size.max(1),
            batch: Mutex::new(Vec::new()),
            trigger: tokio::sync::Notify::new(),
            client: reqwest::Client::new(),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            flush_errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    fn take_batch(&self) -> Option<Vec<Event>> {
        let mut batch = self.batch.lock().unwrap();
        if batch.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *batch))
        }
    }

    fn build_payload(&self, events: &[Event]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_event(&mut buf, &self.process);
        put_varint(&mut buf, events.len() as u64);
        for ev in events {
            write_event(&mut buf, ev);
        }
        buf
    }

    /// Swaps out the current batch, compresses, and POSTs it. A cancel-detached flush at
    /// shutdown uses this same path so in-flight events aren't lost (spec §5).
    pub async fn flush(&self) {
        let Some(events) = self.take_batch() else {
            return;
        };
        let payload = self.build_payload(&events);
        let compressed = match zstd::stream::encode_all(&payload[..], ZSTD_LEVEL) {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "failed to compress export batch");
                self.flush_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let len = compressed.len() as u64;
        let result = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/x-protobuf")
            .body(compressed)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().as_u16() < 300 => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(len, Ordering::Relaxed);
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "export batch rejected");
                self.flush_errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to send export batch");
                self.flush_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait]
impl Submitter for HttpBatchSubmitter {
    fn submit(&self, _scope: &Scope, ev: &Event) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let len = {
            let mut batch = self.batch.lock().unwrap();
            if batch.len() >= self.max_batch_size {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            batch.push(ev.clone());
            batch.len()
        };
        if len * 3 >= self.max_batch_size * 2 {
            self.trigger.notify_one();
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        vec![
            ("received".to_string(), self.received.load(Ordering::Relaxed)),
            ("dropped".to_string(), self.dropped.load(Ordering::Relaxed)),
            ("flushes".to_string(), self.flushes.load(Ordering::Relaxed)),
            ("flush_errors".to_string(), self.flush_errors.load(Ordering::Relaxed)),
            ("bytes_sent".to_string(), self.bytes_sent.load(Ordering::Relaxed)),
        ]
    }

    fn extra_data(&self) -> serde_json::Value {
        serde_json::json!({
            "endpoint": self.endpoint,
            "max_batch_size": self.max_batch_size,
            "flush_interval_secs": self.flush_interval.as_secs(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn run(self: std::sync::Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush().await;
                    return;
                }
                _ = self.trigger.notified() => {
                    self.flush().await;
                }
                _ = tokio::time::sleep(jittered(self.flush_interval)) => {
                    self.flush().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn never_exceeds_configured_capacity() {
        let http = HttpBatchSubmitter::new("http://example.invalid/ingest", Event::new(), Duration::from_secs(30), 100);
        for i in 0..200 {
            let mut ev = Event::new();
            ev.push("i", Value::int(i));
            http.submit(&Scope::new(), &ev);
            assert!(http.batch.lock().unwrap().len() <= 100);
        }
        assert_eq!(http.received.load(Ordering::Relaxed), 200);
        assert_eq!(http.dropped.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn crossing_two_thirds_notifies_the_trigger() {
        let http = HttpBatchSubmitter::new("http://example.invalid/ingest", Event::new(), Duration::from_secs(30), 3);
        for _ in 0..2 {
            http.submit(&Scope::new(), &Event::new());
        }
        // third push crosses 2/3 of capacity 3 (>=2); this only asserts no panic occurs,
        // actual wakeup is observed via `run`'s select in integration tests.
        http.submit(&Scope::new(), &Event::new());
    }
}
