//! Splits events into span and log batches and exports each through the same
//! batch/compress/POST path as [`crate::submit::http::HttpBatchSubmitter`] (spec §4.6.5).
//!
//! OTLP's protobuf wire shape is explicitly out of scope (SPEC_FULL §C): both batches use
//! the plain framed-and-compressed event payload, posted to `{endpoint}/v1/traces` and
//! `{endpoint}/v1/logs` respectively.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::scope::Scope;
use crate::submit::http::HttpBatchSubmitter;
use crate::submit::Submitter;
use crate::value::Value;

/// An event belongs to the span batch iff it carries a `parent_id` annotation of Kind
/// span-id (every span-produced event does; log events never set it).
fn is_span_event(ev: &Event) -> bool {
    matches!(ev.get("parent_id"), Some(Value::SpanId(_)))
}

/// Derives the OTLP span status from the `success` annotation (spec §4.6.5: "span status
/// OK/ERROR from the `success` annotation") and attaches it as `otel.status` before the
/// event reaches the trace batch. An event with no `success` annotation is passed through
/// unannotated rather than defaulted, since absence isn't the same as either outcome.
fn with_span_status(ev: &Event) -> Event {
    let mut out = ev.clone();
    let status = match ev.get("success") {
        Some(Value::Bool(true)) => "OK",
        Some(Value::Bool(false)) => "ERROR",
        _ => return out,
    };
    out.push("otel.status", Value::string(status));
    out
}

pub struct OtelSubmitter {
    traces: Arc<HttpBatchSubmitter>,
    logs: Arc<HttpBatchSubmitter>,
}

impl OtelSubmitter {
    pub fn new(endpoint: &str, process: Event, flush_interval: Duration, max_batch_size: usize) -> Self {
        OtelSubmitter {
            traces: Arc::new(HttpBatchSubmitter::new(
                format!("{endpoint}/v1/traces"),
                process.clone(),
                flush_interval,
                max_batch_size,
            )),
            logs: Arc::new(HttpBatchSubmitter::new(
                format!("{endpoint}/v1/logs"),
                process,
                flush_interval,
                max_batch_size,
            )),
        }
    }
}

#[async_trait]
impl Submitter for OtelSubmitter {
    fn submit(&self, scope: &Scope, ev: &Event) {
        if is_span_event(ev) {
            self.traces.submit(scope, &with_span_status(ev));
        } else {
            self.logs.submit(scope, ev);
        }
    }

    fn name(&self) -> &'static str {
        "otel"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        self.traces
            .stats()
            .into_iter()
            .map(|(k, v)| (format!("traces_{k}"), v))
            .chain(self.logs.stats().into_iter().map(|(k, v)| (format!("logs_{k}"), v)))
            .collect()
    }

    fn extra_data(&self) -> serde_json::Value {
        serde_json::json!({
            "traces": self.traces.extra_data(),
            "logs": self.logs.extra_data(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let traces = self.traces.clone();
        let logs = self.logs.clone();
        tokio::join!(traces.run(cancel.clone()), logs.run(cancel));
    }
}
