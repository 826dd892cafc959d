//! Builds a full submitter tree from a JSON config (filter -> grouper -> multi(null,
//! hydrator)) the way a reloaded pipeline would be, then drives events through the
//! public `Submitter` API end to end: filtering, group-by-key aggregation, and fan-out
//! to two distinct downstream sinks.

use signaltree::event::Event;
use signaltree::pipeline::construct::Environment;
use signaltree::pipeline::{build, Config};
use signaltree::scope::Scope;
use signaltree::submit::grouper::GrouperSubmitter;
use signaltree::submit::hydrator::HydratorSubmitter;
use signaltree::submit::Submitter;
use signaltree::value::Value;

fn config() -> Config {
    serde_json::from_str(
        r#"{
            "root": {
                "kind": "filter",
                "filter": "eq(key(route), /health)",
                "submitter": {
                    "kind": "grouper",
                    "flush_interval": "10s",
                    "group_by": ["route", "env"],
                    "submitter": "sink"
                }
            },
            "named": {
                "sink": [{"kind": "null"}, {"kind": "hydrator"}]
            }
        }"#,
    )
    .unwrap()
}

fn event(route: &str, env: &str, duration_ns: i64) -> Event {
    let mut ev = Event::new();
    ev.push("route", Value::string(route));
    ev.push("env", Value::string(env));
    ev.push("duration", Value::duration(duration_ns));
    ev
}

#[test]
fn events_flow_through_filter_grouper_and_fan_out_to_both_sinks() {
    let env = Environment::new();
    let cfg = config();
    let (root, runnable) = build(&cfg, &env).unwrap();
    assert_eq!(root.name(), "filter");
    assert_eq!(runnable.len(), 1, "only the grouper should be collected as runnable");

    let scope = Scope::new();
    root.submit(&scope, &event("/health", "prod", 1_000_000));
    root.submit(&scope, &event("/health", "prod", 2_000_000));
    root.submit(&scope, &event("/health", "canary", 3_000_000));
    root.submit(&scope, &event("/other", "prod", 4_000_000)); // filtered out

    let filter_stats: std::collections::HashMap<_, _> = root.stats().into_iter().collect();
    assert_eq!(filter_stats["received"], 4);
    assert_eq!(filter_stats["passed"], 3);
    assert_eq!(filter_stats["filtered"], 1);

    let grouper_node = root.children().into_iter().next().expect("filter has a grouper child");
    assert_eq!(grouper_node.name(), "grouper");
    let grouper = grouper_node
        .as_any()
        .downcast_ref::<GrouperSubmitter>()
        .expect("filter's child is a grouper");
    grouper.flush();

    // Walk from the grouper, through the "sink" late-binding, down to the two fan-out
    // sinks its flush fed.
    let late_node = grouper_node.children().into_iter().next().expect("grouper forwards to \"sink\"");
    assert_eq!(late_node.name(), "late");
    let fanout = late_node.children();
    assert_eq!(fanout.len(), 2);
    let hydrator = fanout
        .iter()
        .find_map(|n| n.as_any().downcast_ref::<HydratorSubmitter>())
        .expect("one fan-out child is the hydrator");

    // Two distinct groups: (route=/health, env=prod) and (route=/health, env=canary).
    let matches = hydrator.query("*").unwrap();
    assert_eq!(matches.len(), 2, "expected one metric per distinct group");
    let total_count: u64 = matches.iter().map(|(_, h)| h.count()).sum();
    assert_eq!(total_count, 3, "duration histogram observes once per grouped event");
}
