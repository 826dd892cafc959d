//! Routes an inspection request to a submitter node and renders its response (spec
//! §6.3). `/tree`, `/live`, and `/stats` exist on every node; `/sub/<i>` descends into
//! the `i`th child before resolving the rest of the path; `/query`, `/metrics`, and
//! `/traces` only resolve against nodes of the matching concrete type.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower::Service;

use crate::http_api::json::{event_to_json, hex_encode, stats_to_json, tree_json};
use crate::pipeline::Handle;
use crate::submit::hydrator::HydratorSubmitter;
use crate::submit::prometheus::PrometheusSubmitter;
use crate::submit::tracebuf::TraceBufferSubmitter;
use crate::submit::Submitter;

pub type ResponseBody = BoxBody<Bytes, Infallible>;

/// Serves the inspection surface over whatever pipeline `handle` currently points at;
/// re-resolved on every request, so a reload is visible to the next one without
/// restarting the server.
#[derive(Clone)]
pub struct Api {
    handle: Arc<Handle>,
}

/// Lets a consuming binary hand `Api` straight to a `tower::Service`-aware `hyper`
/// connection builder, instead of hand-rolling a `fn(Request) -> Future` adapter.
impl Service<Request<Incoming>> for Api {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let api = self.clone();
        Box::pin(async move { Ok(api.handle(req).await) })
    }
}

impl Api {
    pub fn new(handle: Arc<Handle>) -> Self {
        Api { handle }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<ResponseBody> {
        if req.method() != Method::GET {
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "only GET is supported");
        }

        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let root = self.handle.submitter();
        match resolve(root, &segments) {
            Ok((node, endpoint)) => self.serve(node, endpoint, query.as_deref()).await,
            Err(()) => text_response(StatusCode::NOT_FOUND, "no such submitter path"),
        }
    }

    async fn serve(&self, node: Arc<dyn Submitter>, endpoint: &str, query: Option<&str>) -> Response<ResponseBody> {
        match endpoint {
            "tree" => json_response(tree_json(&node)),
            "stats" => json_response(stats_to_json(&node.stats())),
            "live" => self.serve_live(node, query).await,
            "query" => serve_query(&node, query),
            "metrics" => serve_metrics(&node),
            "traces" => serve_traces(&node),
            _ => text_response(StatusCode::NOT_FOUND, "unknown endpoint"),
        }
    }

    async fn serve_live(&self, node: Arc<dyn Submitter>, query: Option<&str>) -> Response<ResponseBody> {
        let watch = query.is_some_and(|q| q.split('&').any(|kv| kv == "watch=1"));

        let Some(ring) = node.live() else {
            return text_response(StatusCode::NOT_FOUND, "this node does not keep a live feed");
        };

        if !watch {
            return json_response(serde_json::Value::Array(ring.get().iter().map(event_to_json).collect()));
        }

        let receiver = ring.watch();
        let stream = ReceiverStream::new(receiver).map(|ev| {
            let line = format!("data: {}\n\n", event_to_json(&ev));
            Ok::<_, Infallible>(Frame::data(Bytes::from(line)))
        });
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .body(StreamBody::new(stream).boxed())
            .expect("response with valid static headers")
    }
}

fn serve_query(node: &Arc<dyn Submitter>, query: Option<&str>) -> Response<ResponseBody> {
    let Some(hydrator) = node.as_any().downcast_ref::<HydratorSubmitter>() else {
        return text_response(StatusCode::NOT_FOUND, "this node is not a hydrator");
    };
    let pattern = query
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("pattern=")))
        .unwrap_or("*");
    match hydrator.query(pattern) {
        Ok(results) => json_response(serde_json::json!(results
            .into_iter()
            .map(|(name, h)| serde_json::json!({
                "name": name,
                "count": h.count(),
                "sum": h.sum(),
                "min": h.min(),
                "max": h.max(),
            }))
            .collect::<Vec<_>>())),
        Err(err) => text_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn serve_metrics(node: &Arc<dyn Submitter>) -> Response<ResponseBody> {
    let Some(prom) = node.as_any().downcast_ref::<PrometheusSubmitter>() else {
        return text_response(StatusCode::NOT_FOUND, "this node is not a prometheus sink");
    };
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(prom.render())).boxed())
        .expect("response with valid static headers")
}

fn serve_traces(node: &Arc<dyn Submitter>) -> Response<ResponseBody> {
    let Some(tracebuf) = node.as_any().downcast_ref::<TraceBufferSubmitter>() else {
        return text_response(StatusCode::NOT_FOUND, "this node is not a trace buffer");
    };
    let traces = tracebuf.traces();
    json_response(serde_json::json!(traces
        .into_iter()
        .map(|entry| serde_json::json!({
            "trace_id": hex_encode(&entry.trace_id),
            "spans": entry.spans.iter().map(event_to_json).collect::<Vec<_>>(),
        }))
        .collect::<Vec<_>>()))
}

fn resolve(root: Arc<dyn Submitter>, segments: &[&str]) -> Result<(Arc<dyn Submitter>, &str), ()> {
    if segments.is_empty() {
        return Err(());
    }
    let mut node = root;
    let mut rest = segments;
    loop {
        match rest {
            ["sub", idx, tail @ ..] => {
                let i: usize = idx.parse().map_err(|_| ())?;
                node = node.children().into_iter().nth(i).ok_or(())?;
                rest = tail;
            }
            [endpoint] => return Ok((node, endpoint)),
            _ => return Err(()),
        }
    }
}

fn json_response(body: serde_json::Value) -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())).boxed())
        .expect("response with valid static headers")
}

fn text_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(message.to_string())).boxed())
        .expect("response with valid static headers")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit::null::NullSubmitter;

    #[test]
    fn resolve_descends_through_sub_indices() {
        let leaf: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let root: Arc<dyn Submitter> = Arc::new(crate::submit::multi::MultiSubmitter::new(vec![leaf.clone()]));

        let (node, endpoint) = resolve(root, &["sub", "0", "stats"]).unwrap();
        assert!(Arc::ptr_eq(&node, &leaf));
        assert_eq!(endpoint, "stats");
    }

    #[test]
    fn resolve_rejects_an_out_of_range_index() {
        let root: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        assert!(resolve(root, &["sub", "9", "stats"]).is_err());
    }

    #[test]
    fn resolve_rejects_an_empty_path() {
        let root: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        assert!(resolve(root, &[]).is_err());
    }
}
