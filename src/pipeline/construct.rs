//! Recursive construction of a submitter tree from a [`Config`] (spec §4.7 "Pipeline
//! construction").
//!
//! Every named submitter gets a [`LateSubmitter`] up front so that a forward or cyclic
//! name reference resolves to *something* while the rest of the tree is still being
//! built; each is bound exactly once, after its underlying config has been constructed.
//! `Grouper`, `Http`, and `Otel` nodes run a background flush loop, so each is also
//! collected into the returned runnable list for the caller to spawn.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::filter::{compile, Environment as FilterEnvironment};
use crate::group::{Grouper, MissingKeyBehavior};
use crate::pipeline::config::{Config, SubmitterCfg};
use crate::pipeline::process;
use crate::submit::filter::FilterSubmitter;
use crate::submit::grouper::GrouperSubmitter;
use crate::submit::http::HttpBatchSubmitter;
use crate::submit::hydrator::HydratorSubmitter;
use crate::submit::late::LateSubmitter;
use crate::submit::multi::MultiSubmitter;
use crate::submit::null::NullSubmitter;
use crate::submit::otel::OtelSubmitter;
use crate::submit::prometheus::PrometheusSubmitter;
use crate::submit::tracebuf::TraceBufferSubmitter;
use crate::submit::Submitter;

const DEFAULT_NULL_LIVE_CAPACITY: usize = 64;
const DEFAULT_TRACE_BUFFER_CAPACITY: usize = 256;

/// Shared, reusable construction context: the filter built-in environment every
/// `filter` node compiles against.
pub struct Environment {
    pub filter_env: Arc<FilterEnvironment>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            filter_env: FilterEnvironment::new(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

struct Constructor<'a> {
    env: &'a Environment,
    named: &'a HashMap<String, Arc<LateSubmitter>>,
    runnable: Vec<Arc<dyn Submitter>>,
}

impl<'a> Constructor<'a> {
    fn construct(&mut self, cfg: &SubmitterCfg) -> Result<Arc<dyn Submitter>, ConfigError> {
        match cfg {
            SubmitterCfg::Named(name) => {
                let late = self
                    .named
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UndefinedName(name.clone()))?;
                Ok(late as Arc<dyn Submitter>)
            }

            SubmitterCfg::Multi(items) => {
                let subs = items
                    .iter()
                    .map(|c| self.construct(c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Arc::new(MultiSubmitter::new(subs)))
            }

            SubmitterCfg::Filter { filter, submitter } => {
                let compiled = compile(filter, self.env.filter_env.clone())?;
                let child = self.construct(submitter)?;
                Ok(Arc::new(FilterSubmitter::new(compiled, child)))
            }

            SubmitterCfg::Grouper {
                flush_interval,
                group_by,
                submitter,
            } => {
                let child = self.construct(submitter)?;
                let grouper = Grouper::new(group_by.clone(), MissingKeyBehavior::Omit);
                let gs: Arc<GrouperSubmitter> =
                    Arc::new(GrouperSubmitter::new(grouper, *flush_interval, child)?);
                self.runnable.push(gs.clone());
                Ok(gs)
            }

            SubmitterCfg::Http {
                process_fields,
                endpoint,
                flush_interval,
                max_batch_size,
            } => {
                let process = process::global().select(process_fields);
                let hs: Arc<HttpBatchSubmitter> = Arc::new(HttpBatchSubmitter::new(
                    endpoint.clone(),
                    process,
                    *flush_interval,
                    *max_batch_size,
                ));
                self.runnable.push(hs.clone());
                Ok(hs)
            }

            SubmitterCfg::Otel {
                process_fields,
                endpoint,
                flush_interval,
                max_batch_size,
            } => {
                let process = process::global().select(process_fields);
                let os: Arc<OtelSubmitter> =
                    Arc::new(OtelSubmitter::new(endpoint, process, *flush_interval, *max_batch_size));
                self.runnable.push(os.clone());
                Ok(os)
            }

            SubmitterCfg::Prometheus { namespace, buckets } => {
                Ok(Arc::new(PrometheusSubmitter::new(namespace.clone(), buckets.clone())))
            }

            SubmitterCfg::Hydrator => Ok(Arc::new(HydratorSubmitter::new())),

            SubmitterCfg::TraceBuffer { buffer_size } => Ok(Arc::new(TraceBufferSubmitter::new(
                buffer_size.unwrap_or(DEFAULT_TRACE_BUFFER_CAPACITY),
                None,
            ))),

            SubmitterCfg::Null => Ok(Arc::new(NullSubmitter::new(DEFAULT_NULL_LIVE_CAPACITY))),
        }
    }
}

/// A node is "forwarding" if it never does anything with an event besides hand it to
/// another node unchanged in kind. A cycle that never leaves this set is trivial: it can
/// never terminate in real work, so it is rejected at construction (spec §4.7 step 2).
fn is_forwarding(sub: &Arc<dyn Submitter>) -> bool {
    matches!(sub.name(), "multi" | "filter" | "late")
}

fn detect_trivial_cycle(name: &str, start: &Arc<dyn Submitter>) -> Result<(), ConfigError> {
    let mut stack = vec![start.clone()];
    let mut visited: Vec<Arc<dyn Submitter>> = Vec::new();

    while let Some(node) = stack.pop() {
        for child in node.children() {
            if Arc::ptr_eq(&child, start) {
                return Err(ConfigError::TrivialCycle(name.to_string()));
            }
            if is_forwarding(&child) && !visited.iter().any(|v| Arc::ptr_eq(v, &child)) {
                visited.push(child.clone());
                stack.push(child);
            }
        }
    }
    Ok(())
}

/// Builds the submitter tree described by `cfg`: every named submitter first, then the
/// root. Returns the root along with every node that needs its `run` loop spawned.
pub fn build(
    cfg: &Config,
    env: &Environment,
) -> Result<(Arc<dyn Submitter>, Vec<Arc<dyn Submitter>>), ConfigError> {
    let mut named_lates: HashMap<String, Arc<LateSubmitter>> = HashMap::new();
    for name in cfg.named.keys() {
        named_lates.insert(name.clone(), Arc::new(LateSubmitter::new(name.clone())));
    }

    let mut ctor = Constructor {
        env,
        named: &named_lates,
        runnable: Vec::new(),
    };

    for (name, sub_cfg) in &cfg.named {
        let built = ctor.construct(sub_cfg)?;
        let late = &named_lates[name];
        debug_assert!(late.bind(built), "late submitter {name:?} bound twice during construction");
    }

    for (name, late) in &named_lates {
        let as_dyn: Arc<dyn Submitter> = late.clone();
        detect_trivial_cycle(name, &as_dyn)?;
    }

    let root = ctor.construct(&cfg.root)?;
    Ok((root, ctor.runnable))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_from(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builds_a_simple_fanout() {
        let cfg = cfg_from(
            r#"{
                "root": ["downstream", {"kind": "null"}],
                "named": {"downstream": {"kind": "hydrator"}}
            }"#,
        );
        let (root, runnable) = build(&cfg, &Environment::new()).unwrap();
        assert_eq!(root.name(), "multi");
        assert!(runnable.is_empty());
    }

    #[test]
    fn undefined_name_is_rejected() {
        let cfg = cfg_from(r#"{"root": "ghost", "named": {}}"#);
        let err = build(&cfg, &Environment::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedName(n) if n == "ghost"));
    }

    #[test]
    fn grouper_and_http_are_collected_as_runnable() {
        let cfg = cfg_from(
            r#"{
                "root": {
                    "kind": "grouper",
                    "flush_interval": "30s",
                    "group_by": ["name"],
                    "submitter": {
                        "kind": "http",
                        "endpoint": "http://example.invalid",
                        "flush_interval": "30s",
                        "max_batch_size": 100
                    }
                },
                "named": {}
            }"#,
        );
        let (_root, runnable) = build(&cfg, &Environment::new()).unwrap();
        assert_eq!(runnable.len(), 2);
    }

    #[test]
    fn self_referential_multi_is_a_trivial_cycle() {
        let cfg = cfg_from(
            r#"{
                "root": "null",
                "named": {
                    "a": ["a"],
                    "null": {"kind": "null"}
                }
            }"#,
        );
        let err = build(&cfg, &Environment::new()).unwrap_err();
        assert!(matches!(err, ConfigError::TrivialCycle(n) if n == "a"));
    }

    #[test]
    fn a_cycle_through_a_stateful_node_is_not_trivial() {
        // a -> grouper(b) -> b -> a: passes through a grouper, so it terminates each
        // flush rather than looping forever inside `submit`.
        let cfg = cfg_from(
            r#"{
                "root": "a",
                "named": {
                    "a": {
                        "kind": "grouper",
                        "flush_interval": "30s",
                        "group_by": [],
                        "submitter": "b"
                    },
                    "b": "a"
                }
            }"#,
        );
        assert!(build(&cfg, &Environment::new()).is_ok());
    }
}
