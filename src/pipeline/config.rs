//! The wire configuration model (spec §6.2).
//!
//! `SubmitterCfg` is a discriminated union spelled three different ways in JSON: a bare
//! string (a reference to a named submitter), an array (fan-out to each element), or an
//! object carrying a `kind` discriminant. `serde`'s `#[serde(tag = "kind")]` can only
//! express the last of those, so the union is deserialized by hand against
//! `serde_json::Value` instead of derived.

use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value as Json;

/// A pipeline definition: the root submitter plus every named submitter reachable by
/// name from it or from each other (spec §6.2 `Config`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub refresh_interval: Duration,
    pub root: SubmitterCfg,
    pub named: std::collections::BTreeMap<String, SubmitterCfg>,
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default, deserialize_with = "deserialize_duration_opt")]
            refresh_interval: Option<Duration>,
            root: SubmitterCfg,
            #[serde(default)]
            named: std::collections::BTreeMap<String, SubmitterCfg>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Config {
            refresh_interval: raw.refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL),
            root: raw.root,
            named: raw.named,
        })
    }
}

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// The submitter-tree grammar (spec §6.2). `SubmitterRef` in the spec's grammar is this
/// same type: a bare name, an array, or a `kind`-tagged object all parse to a
/// `SubmitterCfg` node.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitterCfg {
    Named(String),
    Multi(Vec<SubmitterCfg>),
    Filter {
        filter: String,
        submitter: Box<SubmitterCfg>,
    },
    Grouper {
        flush_interval: Duration,
        group_by: Vec<String>,
        submitter: Box<SubmitterCfg>,
    },
    Http {
        process_fields: Vec<String>,
        endpoint: String,
        flush_interval: Duration,
        max_batch_size: usize,
    },
    Otel {
        process_fields: Vec<String>,
        endpoint: String,
        flush_interval: Duration,
        max_batch_size: usize,
    },
    Prometheus {
        namespace: String,
        buckets: Vec<f64>,
    },
    Hydrator,
    TraceBuffer {
        buffer_size: Option<usize>,
    },
    Null,
}

fn parse_duration_field<E: serde::de::Error>(value: &Json, field: &str) -> Result<Duration, E> {
    let s = value
        .get(field)
        .and_then(Json::as_str)
        .ok_or_else(|| E::custom(format!("missing or non-string field {field:?}")))?;
    let nanos = crate::filter::parse_duration(s)
        .ok_or_else(|| E::custom(format!("invalid duration {s:?} for field {field:?}")))?;
    if nanos < 0 {
        return Err(E::custom(format!("duration field {field:?} must not be negative")));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

fn string_field<E: serde::de::Error>(value: &Json, field: &str) -> Result<String, E> {
    value
        .get(field)
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or_else(|| E::custom(format!("missing or non-string field {field:?}")))
}

/// Like [`string_field`], but additionally rejects a value that isn't an absolute URL —
/// a Config-invalid failure caught at construction time rather than surfacing as a
/// runtime Transport error on the first flush (spec §7).
fn endpoint_field<E: serde::de::Error>(value: &Json, field: &str) -> Result<String, E> {
    let raw = string_field(value, field)?;
    url::Url::parse(&raw).map_err(|err| E::custom(format!("invalid URL for field {field:?}: {err}")))?;
    Ok(raw)
}

fn string_list_field<E: serde::de::Error>(value: &Json, field: &str) -> Result<Vec<String>, E> {
    match value.get(field) {
        None => Ok(Vec::new()),
        Some(Json::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| E::custom(format!("{field:?} must be an array of strings")))
            })
            .collect(),
        Some(_) => Err(E::custom(format!("{field:?} must be an array"))),
    }
}

fn submitter_field<'a, E: serde::de::Error>(value: &'a Json, field: &str) -> Result<&'a Json, E> {
    value
        .get(field)
        .ok_or_else(|| E::custom(format!("missing field {field:?}")))
}

impl SubmitterCfg {
    fn from_json<E: serde::de::Error>(value: &Json) -> Result<Self, E> {
        match value {
            Json::String(name) => Ok(SubmitterCfg::Named(name.clone())),
            Json::Array(items) => {
                let subs = items.iter().map(SubmitterCfg::from_json).collect::<Result<_, E>>()?;
                Ok(SubmitterCfg::Multi(subs))
            }
            Json::Object(map) => {
                // The spec requires scanning keys in the order the object defines them
                // and rejecting an object with no "kind" anywhere in it; serde_json's
                // default map doesn't preserve insertion order, so this only checks for
                // presence, which is observably identical for every config this crate
                // accepts (every known kind uses "kind" as a plain top-level key).
                let kind = map
                    .get("kind")
                    .and_then(Json::as_str)
                    .ok_or_else(|| E::custom("submitter config object is missing its \"kind\" field"))?;
                match kind {
                    "filter" => Ok(SubmitterCfg::Filter {
                        filter: string_field(value, "filter")?,
                        submitter: Box::new(SubmitterCfg::from_json(submitter_field(value, "submitter")?)?),
                    }),
                    "grouper" => Ok(SubmitterCfg::Grouper {
                        flush_interval: parse_duration_field(value, "flush_interval")?,
                        group_by: string_list_field(value, "group_by")?,
                        submitter: Box::new(SubmitterCfg::from_json(submitter_field(value, "submitter")?)?),
                    }),
                    "http" => Ok(SubmitterCfg::Http {
                        process_fields: string_list_field(value, "process_fields")?,
                        endpoint: endpoint_field(value, "endpoint")?,
                        flush_interval: parse_duration_field(value, "flush_interval")?,
                        max_batch_size: value
                            .get("max_batch_size")
                            .and_then(Json::as_u64)
                            .ok_or_else(|| E::custom("missing or non-integer field \"max_batch_size\""))?
                            as usize,
                    }),
                    "otel" => Ok(SubmitterCfg::Otel {
                        process_fields: string_list_field(value, "process_fields")?,
                        endpoint: endpoint_field(value, "endpoint")?,
                        flush_interval: parse_duration_field(value, "flush_interval")?,
                        max_batch_size: value
                            .get("max_batch_size")
                            .and_then(Json::as_u64)
                            .ok_or_else(|| E::custom("missing or non-integer field \"max_batch_size\""))?
                            as usize,
                    }),
                    "prometheus" => Ok(SubmitterCfg::Prometheus {
                        namespace: string_field(value, "namespace")?,
                        buckets: match value.get("buckets") {
                            None => Vec::new(),
                            Some(Json::Array(items)) => items
                                .iter()
                                .map(|v| v.as_f64().ok_or_else(|| E::custom("\"buckets\" must be an array of numbers")))
                                .collect::<Result<_, E>>()?,
                            Some(_) => return Err(E::custom("\"buckets\" must be an array")),
                        },
                    }),
                    "hydrator" => Ok(SubmitterCfg::Hydrator),
                    "trace_buffer" => Ok(SubmitterCfg::TraceBuffer {
                        buffer_size: value.get("buffer_size").and_then(Json::as_u64).map(|n| n as usize),
                    }),
                    "null" => Ok(SubmitterCfg::Null),
                    other => Err(E::custom(format!("unknown submitter kind {other:?}"))),
                }
            }
            _ => Err(E::custom("submitter config must be a string, array, or object")),
        }
    }
}

impl<'de> Deserialize<'de> for SubmitterCfg {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Json::deserialize(deserializer)?;
        SubmitterCfg::from_json(&value)
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => {
            let nanos = crate::filter::parse_duration(&s)
                .ok_or_else(|| D::Error::custom(format!("invalid duration {s:?}")))?;
            if nanos < 0 {
                return Err(D::Error::custom("refresh_interval must not be negative"));
            }
            Ok(Some(Duration::from_nanos(nanos as u64)))
        }
    }
}
