/// Replays a JSON trace log into a sled-backed store and reads the graph
/// back after reopening it.

use execgraph::api::dto::{GraphDto, StatsDto};
use execgraph::application::Session;
use execgraph::config::RecorderConfig;
use execgraph::domain::graph::{Label, RelType};
use execgraph::domain::store::SledGraphStore;
use execgraph::infrastructure::{ManualClock, Replay, SynSourceParser, TraceLog};
use execgraph::ports::GraphStore;
use tempfile::tempdir;

const LOG: &str = r#"{
    "objects": [
        {"kind": "class", "id": 1, "name": "Account"},
        {"kind": "object", "id": 2, "class": 1, "ivars": {"@balance": 3}},
        {"kind": "int", "id": 3, "value": 100},
        {"kind": "int", "id": 4, "value": 25}
    ],
    "events": [
        {"kind": "call", "path": "(eval)", "line": 1, "method_id": "deposit",
         "defined_class": "Account", "receiver": 2, "parameters": ["amount"],
         "locals": {"amount": 4}, "at_us": 0},
        {"kind": "line", "path": "(eval)", "line": 2, "method_id": "deposit",
         "defined_class": "Account", "receiver": 2, "locals": {"amount": 4}, "at_us": 10},
        {"kind": "line", "path": "(eval)", "line": 3, "method_id": "deposit",
         "defined_class": "Account", "receiver": 2, "locals": {"amount": 4}, "at_us": 30},
        {"kind": "return", "path": "(eval)", "line": 3, "method_id": "deposit",
         "defined_class": "Account", "receiver": 2, "return_value": 3, "at_us": 35}
    ]
}"#;

fn replay_into(path: &str) -> u64 {
    let replay = Replay::build(TraceLog::from_json(LOG).unwrap()).unwrap();
    let clock = ManualClock::new();
    let store = SledGraphStore::open(path).unwrap();
    let mut session = Session::new(replay.heap(), &SynSourceParser, &clock, store, RecorderConfig::default());
    let summary = session.record_events(replay.timed(&clock)).unwrap();
    session.into_store().unwrap().sync().unwrap();
    summary.trace_points
}

#[test]
fn test_replay_persists_trace_with_timing() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    assert_eq!(replay_into(&path), 4);

    let store = SledGraphStore::open(&path).unwrap();
    let points = store.nodes_with_label(Label::TracePoint).unwrap();
    assert_eq!(points.len(), 4);
    let ret = points
        .iter()
        .find(|p| p.str_prop("event") == Some("return"))
        .unwrap();
    assert_eq!(ret.float_prop("execution_time"), Some(30.0));
    assert_eq!(ret.float_prop("total_execution_time"), Some(30.0));
    assert!(points
        .iter()
        .filter(|p| p.str_prop("event") != Some("return"))
        .all(|p| p.float_prop("execution_time").is_none()));

    let received = store.relationships(Some(RelType::ReceivedArgument)).unwrap();
    assert_eq!(received.len(), 1);
    let amount = store.node(received[0].to).unwrap().unwrap();
    assert_eq!(amount.str_prop("inspect"), Some("25"));

    let fields = store.relationships(Some(RelType::InstanceVariable)).unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].str_prop("variable"), Some("@balance"));
    let returned = store.relationships(Some(RelType::Returned)).unwrap();
    assert_eq!(returned[0].to, fields[0].to);
}

#[test]
fn test_export_of_reopened_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    replay_into(&path);

    let store = SledGraphStore::open(&path).unwrap();
    let stats = StatsDto::from_store(&store).unwrap();
    assert_eq!(stats.nodes["TracePoint"], 4);
    assert_eq!(stats.relationships["NEXT"], 3);
    assert_eq!(stats.relationships["STARTED_AT"], 1);

    let graph = GraphDto::from_store(&store).unwrap();
    let account = graph
        .nodes
        .iter()
        .find(|n| n.properties.get("inspect").and_then(|v| v.as_str()) == Some("Account"))
        .unwrap();
    assert!(account.labels.iter().any(|l| l == "Class"));
    let json = serde_json::to_string(&graph).unwrap();
    assert!(json.contains("\"HAS_PARENT\""));
}
