/// Structural properties every recorded trace must satisfy: sequence
/// indices, the NEXT chain, STARTED_AT pairing, timing arithmetic and
/// object identity.

use execgraph::application::Session;
use execgraph::config::RecorderConfig;
use execgraph::domain::graph::{Label, NodeId, NodeRecord, RelType};
use execgraph::domain::store::MemoryGraphStore;
use execgraph::infrastructure::{CallSite, Heap, ManualClock, Probe, SynSourceParser};
use execgraph::infrastructure::heap::ObjRef;
use execgraph::ports::GraphStore;
use std::collections::HashMap;

fn site(method: &'static str) -> CallSite<'static> {
    CallSite::new("(eval)", 1, "Shop", method)
}

/// checkout -> total -> (tax), then log; lines take varying time.
fn shop_program(probe: &Probe<'_, ObjRef>, heap: &Heap, clock: &ManualClock) {
    probe.call(site("checkout"), None, &[]);
    clock.advance_micros(3);
    probe.line(2);
    clock.advance_micros(7);
    probe.call(site("total"), None, &[]);
    clock.advance_micros(5);
    probe.line(3);
    clock.advance_micros(11);
    probe.call(site("tax"), None, &[]);
    clock.advance_micros(2);
    probe.line(4);
    clock.advance_micros(13);
    probe.ret(4, heap.int(1));
    clock.advance_micros(4);
    probe.line(5);
    clock.advance_micros(6);
    probe.ret(5, heap.int(10));
    clock.advance_micros(1);
    probe.line(6);
    clock.advance_micros(8);
    probe.call(site("log"), None, &[]);
    clock.advance_micros(9);
    probe.line(7);
    clock.advance_micros(17);
    probe.ret(7, heap.nil());
    clock.advance_micros(2);
    probe.line(8);
    clock.advance_micros(19);
    probe.ret(8, heap.nil());
}

fn recorded_shop() -> (MemoryGraphStore, u64) {
    let heap = Heap::new();
    let clock = ManualClock::new();
    let mut session = Session::new(
        &heap,
        &SynSourceParser,
        &clock,
        MemoryGraphStore::default(),
        RecorderConfig::default(),
    );
    let summary = session.record(|probe| shop_program(probe, &heap, &clock)).unwrap();
    (session.into_store().unwrap(), summary.trace_points)
}

fn by_id(points: &[NodeRecord]) -> HashMap<NodeId, &NodeRecord> {
    points.iter().map(|p| (p.id, p)).collect()
}

#[test]
fn test_execution_indices_are_contiguous() {
    let (store, count) = recorded_shop();
    let mut indices: Vec<i64> = store
        .nodes_with_label(Label::TracePoint)
        .unwrap()
        .iter()
        .map(|p| p.int_prop("execution_index").unwrap())
        .collect();
    indices.sort();
    let expected: Vec<i64> = (1..=count as i64).collect();
    assert_eq!(indices, expected);
}

#[test]
fn test_next_chain_is_one_path_in_creation_order() {
    let (store, count) = recorded_shop();
    let points = store.nodes_with_label(Label::TracePoint).unwrap();
    let nodes = by_id(&points);
    let next: HashMap<NodeId, NodeId> = store
        .relationships(Some(RelType::Next))
        .unwrap()
        .iter()
        .map(|r| (r.from, r.to))
        .collect();
    assert_eq!(next.len() as u64, count - 1);

    let first = points
        .iter()
        .find(|p| p.int_prop("execution_index") == Some(1))
        .unwrap();
    let mut visited = vec![first.id];
    let mut at = first.id;
    while let Some(to) = next.get(&at) {
        visited.push(*to);
        at = *to;
    }
    assert_eq!(visited.len() as u64, count);
    let order: Vec<i64> = visited
        .iter()
        .map(|id| nodes[id].int_prop("execution_index").unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[1] == w[0] + 1));
}

/// Number of HAS_PARENT hops from `node` up to a root.
fn nesting(node: NodeId, parent_of: &HashMap<NodeId, NodeId>) -> usize {
    let mut depth = 0;
    let mut at = node;
    while let Some(parent) = parent_of.get(&at) {
        depth += 1;
        at = *parent;
    }
    depth
}

#[test]
fn test_started_at_targets_earlier_matching_call() {
    let (store, _) = recorded_shop();
    let points = store.nodes_with_label(Label::TracePoint).unwrap();
    let nodes = by_id(&points);
    let parent_of: HashMap<NodeId, NodeId> = store
        .relationships(Some(RelType::HasParent))
        .unwrap()
        .iter()
        .map(|r| (r.from, r.to))
        .collect();
    let started = store.relationships(Some(RelType::StartedAt)).unwrap();
    let returns = points.iter().filter(|p| p.str_prop("event") == Some("return")).count();
    assert_eq!(started.len(), returns);

    for rel in started {
        let ret = nodes[&rel.from];
        let call = nodes[&rel.to];
        assert_eq!(call.str_prop("event"), Some("call"));
        assert!(call.int_prop("execution_index") < ret.int_prop("execution_index"));
        assert_eq!(call.str_prop("method_id"), ret.str_prop("method_id"));
        assert_eq!(call.str_prop("defined_class"), ret.str_prop("defined_class"));

        // The return is raised from inside the call's frame, one level below
        // the lines it ran, and hangs off the same parent as the call.
        assert_eq!(parent_of.get(&ret.id), parent_of.get(&call.id));
        assert_eq!(nesting(ret.id, &parent_of), nesting(call.id, &parent_of));
        let body_depth = points
            .iter()
            .filter(|p| parent_of.get(&p.id) == Some(&call.id))
            .map(|p| nesting(p.id, &parent_of))
            .max()
            .unwrap();
        assert_eq!(body_depth, nesting(call.id, &parent_of) + 1);
    }
}

#[test]
fn test_cumulative_time_is_self_plus_children() {
    let (store, _) = recorded_shop();
    let points = store.nodes_with_label(Label::TracePoint).unwrap();
    let nodes = by_id(&points);
    let started: HashMap<NodeId, NodeId> = store
        .relationships(Some(RelType::StartedAt))
        .unwrap()
        .iter()
        .map(|r| (r.to, r.from))
        .collect();
    let parents = store.relationships(Some(RelType::HasParent)).unwrap();

    for (call, ret) in &started {
        let ret_node = nodes[ret];
        let own = ret_node.float_prop("execution_time").unwrap();
        let total = ret_node.float_prop("total_execution_time").unwrap();
        let children: f64 = parents
            .iter()
            .filter(|r| r.to == *call && nodes[&r.from].str_prop("event") == Some("call"))
            .map(|r| nodes[&started[&r.from]].float_prop("total_execution_time").unwrap())
            .sum();
        assert!(total >= own);
        assert!((total - (own + children)).abs() < 1e-9, "{} != {} + {}", total, own, children);
    }

    let checkout = points
        .iter()
        .find(|p| p.str_prop("event") == Some("return") && p.str_prop("method_id") == Some("checkout"))
        .unwrap();
    // Lines in checkout waited 3 + 1 + 2; total took 11 (tax 2), log 9.
    assert_eq!(checkout.float_prop("execution_time"), Some(6.0));
    assert_eq!(checkout.float_prop("total_execution_time"), Some(26.0));
}

#[test]
fn test_same_identity_imports_once() {
    let heap = Heap::new();
    let clock = ManualClock::new();
    let point = heap.define_class("Point", None);
    let origin = heap.new_object(point);
    let mut session = Session::new(
        &heap,
        &SynSourceParser,
        &clock,
        MemoryGraphStore::default(),
        RecorderConfig::default(),
    );

    session
        .record(|probe| {
            probe.call(CallSite::new("(eval)", 1, "Point", "x"), Some(origin), &[]);
            probe.line(2);
            probe.ret(2, origin);
        })
        .unwrap();

    let store = session.store();
    let objects = store.nodes_with_label(Label::Object).unwrap();
    let origin_nodes: Vec<&NodeRecord> = objects
        .iter()
        .filter(|o| o.int_prop("object_id") == Some(origin.index() as i64))
        .collect();
    assert_eq!(origin_nodes.len(), 1);
    let is_a = store.relationships(Some(RelType::IsA)).unwrap();
    assert_eq!(is_a.iter().filter(|r| r.from == origin_nodes[0].id).count(), 1);

    let class_node = objects.iter().find(|o| o.str_prop("inspect") == Some("Point")).unwrap();
    assert!(class_node.has_label("Class"));
}

#[test]
fn test_self_referential_field_points_back() {
    let heap = Heap::new();
    let clock = ManualClock::new();
    let node_class = heap.define_class("Node", None);
    let node = heap.new_object(node_class);
    heap.set_ivar(node, "@next", node);
    let mut session = Session::new(
        &heap,
        &SynSourceParser,
        &clock,
        MemoryGraphStore::default(),
        RecorderConfig::default(),
    );

    session
        .record(|probe| {
            probe.call(CallSite::new("(eval)", 1, "Node", "link"), None, &[]);
            probe.ret(1, node);
        })
        .unwrap();

    let store = session.store();
    let fields = store.relationships(Some(RelType::InstanceVariable)).unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].from, fields[0].to);
    assert_eq!(fields[0].str_prop("variable"), Some("@next"));
}
