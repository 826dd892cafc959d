//! In-memory, glob-queryable metric store (spec §4.6.7).
//!
//! Builds a synthetic metric-name string from an event's string-valued annotations, then
//! records one histogram per metric name (or, for histogram-bearing events, one histogram
//! per histogram annotation under `{name}{annotation_key}`). The underlying string-indexed
//! histogram store is explicitly out of scope as an implementation detail (spec §1); what's
//! implemented here is the glob query surface the spec names in §4.6.7.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use globset::Glob;

use crate::event::Event;
use crate::histogram::Histogram;
use crate::scope::Scope;
use crate::submit::Submitter;
use crate::value::Value;

pub struct HydratorSubmitter {
    store: Mutex<HashMap<String, Histogram>>,
    received: AtomicU64,
}

impl HydratorSubmitter {
    pub fn new() -> Self {
        HydratorSubmitter {
            store: Mutex::new(HashMap::new()),
            received: AtomicU64::new(0),
        }
    }

    fn base_name(ev: &Event) -> String {
        let mut out = String::new();
        for a in ev.annotations() {
            if a.key.starts_with("agg:") || a.key.starts_with('_') {
                continue;
            }
            if let (Some(v), true) = a.value.as_str() {
                out.push_str(&a.key);
                out.push('=');
                out.push_str(v);
                out.push(',');
            }
        }
        out
    }

    /// Returns every stored metric name matching `pattern` (glob syntax: `*`, `?`) paired
    /// with a clone of its histogram.
    pub fn query(&self, pattern: &str) -> Result<Vec<(String, Histogram)>, globset::Error> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        let store = self.store.lock().unwrap();
        Ok(store
            .iter()
            .filter(|(name, _)| matcher.is_match(name.as_str()))
            .map(|(name, h)| (name.clone(), h.clone()))
            .collect())
    }

    /// Every distinct annotation key used across stored metric names.
    pub fn keys(&self) -> Vec<String> {
        let store = self.store.lock().unwrap();
        let mut seen: Vec<String> = store
            .keys()
            .flat_map(|name| parse_pairs(name).into_iter().map(|(k, _)| k))
            .collect();
        seen.sort();
        seen.dedup();
        seen
    }

    /// Every distinct value observed for `key` across stored metric names.
    pub fn key_values(&self, key: &str) -> Vec<String> {
        let store = self.store.lock().unwrap();
        let mut values: Vec<String> = store
            .keys()
            .flat_map(|name| parse_pairs(name))
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect();
        values.sort();
        values.dedup();
        values
    }

    /// Parses `metric_name` back into its constituent key/value annotation pairs.
    pub fn annotations(&self, metric_name: &str) -> Vec<(String, String)> {
        parse_pairs(metric_name)
    }
}

impl Default for HydratorSubmitter {
    fn default() -> Self {
        HydratorSubmitter::new()
    }
}

fn parse_pairs(name: &str) -> Vec<(String, String)> {
    name.split(',')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Submitter for HydratorSubmitter {
    fn submit(&self, _scope: &Scope, ev: &Event) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let base = Self::base_name(ev);
        let histograms: Vec<(&str, &Histogram)> = ev
            .annotations()
            .iter()
            .filter_map(|a| match &a.value {
                Value::Histogram(h) => Some((&*a.key, &**h)),
                _ => None,
            })
            .collect();

        let mut store = self.store.lock().unwrap();
        if histograms.is_empty() {
            let name = format!("{base}_");
            store.entry(name).or_insert_with(Histogram::new).observe(1.0);
        } else {
            for (key, h) in histograms {
                let name = format!("{base}{key}");
                store.entry(name).or_insert_with(Histogram::new).merge(h);
            }
        }
    }

    fn name(&self) -> &'static str {
        "hydrator"
    }

    fn stats(&self) -> Vec<(String, u64)> {
        vec![
            ("received".to_string(), self.received.load(Ordering::Relaxed)),
            ("series".to_string(), self.store.lock().unwrap().len() as u64),
        ]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(pairs: &[(&str, Value)]) -> Event {
        let mut ev = Event::new();
        for (k, v) in pairs {
            ev.push(*k, v.clone());
        }
        ev
    }

    #[test]
    fn events_without_histograms_are_observed_as_count_one() {
        let h = HydratorSubmitter::new();
        h.submit(&Scope::new(), &event_with(&[("name", Value::string("req"))]));
        let matches = h.query("name=req,_").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1.count(), 1);
    }

    #[test]
    fn histogram_annotations_merge_under_their_own_metric_name() {
        let h = HydratorSubmitter::new();
        let mut hist = Histogram::new();
        hist.observe(5.0);
        h.submit(
            &Scope::new(),
            &event_with(&[("name", Value::string("req")), ("latency", Value::histogram(hist.clone()))]),
        );
        h.submit(
            &Scope::new(),
            &event_with(&[("name", Value::string("req")), ("latency", Value::histogram(hist))]),
        );
        let matches = h.query("name=req,latency").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1.count(), 2);
    }

    #[test]
    fn glob_query_matches_wildcards() {
        let h = HydratorSubmitter::new();
        h.submit(&Scope::new(), &event_with(&[("name", Value::string("req_a"))]));
        h.submit(&Scope::new(), &event_with(&[("name", Value::string("req_b"))]));
        let matches = h.query("name=req_*,_").unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn keys_and_key_values_reflect_stored_metric_names() {
        let h = HydratorSubmitter::new();
        h.submit(&Scope::new(), &event_with(&[("name", Value::string("req"))]));
        assert_eq!(h.keys(), vec!["name".to_string()]);
        assert_eq!(h.key_values("name"), vec!["req".to_string()]);
    }
}
