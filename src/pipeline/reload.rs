//! Hot-swap reload: polls a remote config, builds a replacement pipeline, and swaps it
//! in without ever leaving a submit call with nowhere to go (spec §4.7 "Hot-swap").
//!
//! The original keeps the old and new pipeline in two fixed slots and uses a
//! generation-counter/token handshake (`swaparoo`) so the old slot is only torn down
//! once every in-flight caller has observed the new generation. Rust's ownership model
//! gets us the same safety for free: [`Handle::submitter`] hands out a clone of an `Arc`
//! under a brief read lock, so a submit call in progress during a swap keeps going
//! against whichever pipeline it already captured — it can never see neither. What the
//! generation handshake additionally bought the original was *not tearing down the old
//! pipeline's flush loop too early*; we approximate that here by relying on each node's
//! `run` loop performing one final flush on cancellation (already true of `grouper.rs`
//! and `http.rs`) rather than implementing the handshake itself.

use std::sync::{Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ConfigError;
use crate::jitter::jittered;
use crate::pipeline::config::Config;
use crate::pipeline::construct::{self, Environment};
use crate::submit::Submitter;

use std::sync::Arc;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn bounded(interval: Duration) -> Duration {
    interval.clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL)
}

/// Holds the currently-live pipeline root and the background tasks its stateful nodes
/// are running. Every `submit` caller goes through [`Handle::submitter`].
pub struct Handle {
    current: RwLock<Arc<dyn Submitter>>,
    runnables: Mutex<Vec<(Arc<dyn Submitter>, CancellationToken)>>,
}

impl Handle {
    pub fn new(root: Arc<dyn Submitter>) -> Self {
        Handle {
            current: RwLock::new(root),
            runnables: Mutex::new(Vec::new()),
        }
    }

    pub fn with_runnables(root: Arc<dyn Submitter>, runnables: Vec<Arc<dyn Submitter>>) -> Arc<Self> {
        let handle = Arc::new(Handle::new(root));
        let tokens = spawn_all(runnables);
        *handle.runnables.lock().unwrap() = tokens;
        handle
    }

    pub fn submitter(&self) -> Arc<dyn Submitter> {
        self.current.read().unwrap().clone()
    }

    /// Spawns the new pipeline's runnables, publishes it as current, and returns the
    /// previous generation's (node, cancellation token) pairs for the caller to tear
    /// down.
    fn swap_in(
        &self,
        root: Arc<dyn Submitter>,
        runnables: Vec<Arc<dyn Submitter>>,
    ) -> Vec<(Arc<dyn Submitter>, CancellationToken)> {
        let new_tokens = spawn_all(runnables);
        *self.current.write().unwrap() = root;
        std::mem::replace(&mut *self.runnables.lock().unwrap(), new_tokens)
    }
}

fn spawn_all(runnables: Vec<Arc<dyn Submitter>>) -> Vec<(Arc<dyn Submitter>, CancellationToken)> {
    runnables
        .into_iter()
        .map(|r| {
            let token = CancellationToken::new();
            tokio::spawn(Arc::clone(&r).run(token.clone()));
            (r, token)
        })
        .collect()
}

/// Cancels every node in a retired generation. Each node's `run` loop flushes once more
/// before returning, so recently-accumulated state is not silently lost.
fn retire(generation: Vec<(Arc<dyn Submitter>, CancellationToken)>) {
    for (_node, token) in generation {
        token.cancel();
    }
}

/// Polls a remote JSON config on a jittered interval and hot-swaps the pipeline behind
/// a [`Handle`] when it changes.
pub struct Reloader {
    endpoint: String,
    env: Environment,
    client: reqwest::Client,
    handle: Arc<Handle>,
    last_config: Mutex<Option<Config>>,
    trigger: tokio::sync::Notify,
}

impl Reloader {
    pub fn new(endpoint: impl Into<String>, handle: Arc<Handle>) -> Self {
        Reloader {
            endpoint: endpoint.into(),
            env: Environment::new(),
            client: reqwest::Client::new(),
            handle,
            last_config: Mutex::new(None),
            trigger: tokio::sync::Notify::new(),
        }
    }

    async fn fetch(&self) -> Result<Config, ConfigError> {
        let resp = self.client.get(&self.endpoint).send().await?;
        let cfg = resp.json::<Config>().await?;
        Ok(cfg)
    }

    /// Applies a freshly-fetched config: skips a rebuild if it is structurally
    /// unchanged from the last one applied, otherwise builds and hot-swaps in. Kept
    /// separate from `fetch` so the swap/skip/reject logic is testable without a
    /// network round trip.
    fn apply(&self, cfg: Config) {
        {
            let last = self.last_config.lock().unwrap();
            if last.as_ref() == Some(&cfg) {
                return;
            }
        }

        let built = match construct::build(&cfg, &self.env) {
            Ok(built) => built,
            Err(err) => {
                tracing::warn!(error = %err, "pipeline reload config rejected, keeping previous generation");
                return;
            }
        };
        let (root, runnables) = built;

        let retired = self.handle.swap_in(root, runnables);
        *self.last_config.lock().unwrap() = Some(cfg);
        retire(retired);
    }

    async fn poll_once(&self) {
        match self.fetch().await {
            Ok(cfg) => self.apply(cfg),
            Err(err) => {
                tracing::warn!(error = %err, "pipeline reload fetch failed, keeping previous generation");
            }
        }
    }

    fn next_interval(&self) -> Duration {
        self.last_config
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| bounded(c.refresh_interval))
            .unwrap_or(MIN_REFRESH_INTERVAL)
    }

    /// Forces an immediate poll on the next loop iteration, short-circuiting the
    /// jittered wait.
    pub fn trigger_refresh(&self) {
        self.trigger.notify_one();
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.poll_once().await;

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(jittered(self.next_interval())) => {}
                _ = self.trigger.notified() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::scope::Scope;
    use crate::submit::null::NullSubmitter;

    fn cfg_from(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn swap_in_replaces_the_current_submitter() {
        let first: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let handle = Handle::new(first.clone());
        assert!(Arc::ptr_eq(&handle.submitter(), &first));

        let second: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let retired = handle.swap_in(second.clone(), Vec::new());
        assert!(retired.is_empty());
        assert!(Arc::ptr_eq(&handle.submitter(), &second));
    }

    #[tokio::test]
    async fn in_flight_submitter_keeps_working_across_a_swap() {
        let first: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let handle = Handle::new(first.clone());

        let captured = handle.submitter();
        handle.swap_in(Arc::new(NullSubmitter::new(4)), Vec::new());

        captured.submit(&Scope::new(), &Event::new());
        assert!(Arc::ptr_eq(&captured, &first));
    }

    #[tokio::test]
    async fn unchanged_config_is_not_rebuilt() {
        let root: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let handle = Handle::new(root.clone());
        let reloader = Reloader::new("http://example.invalid/config", handle);

        let cfg = cfg_from(r#"{"root": {"kind": "null"}, "named": {}}"#);
        reloader.apply(cfg.clone());
        let after_first = reloader.handle.submitter();
        reloader.apply(cfg);
        assert!(Arc::ptr_eq(&after_first, &reloader.handle.submitter()));
    }

    #[tokio::test]
    async fn changed_config_swaps_the_root() {
        let root: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let handle = Handle::new(root);
        let reloader = Reloader::new("http://example.invalid/config", handle);

        reloader.apply(cfg_from(r#"{"root": {"kind": "null"}, "named": {}}"#));
        let after_first = reloader.handle.submitter();
        reloader.apply(cfg_from(r#"{"root": {"kind": "hydrator"}, "named": {}}"#));
        assert!(!Arc::ptr_eq(&after_first, &reloader.handle.submitter()));
        assert_eq!(reloader.handle.submitter().name(), "hydrator");
    }

    #[tokio::test]
    async fn invalid_config_retains_the_previous_generation() {
        let root: Arc<dyn Submitter> = Arc::new(NullSubmitter::new(4));
        let handle = Handle::new(root.clone());
        let reloader = Reloader::new("http://example.invalid/config", handle);

        reloader.apply(cfg_from(r#"{"root": "ghost", "named": {}}"#));
        assert!(Arc::ptr_eq(&reloader.handle.submitter(), &root));
    }
}
