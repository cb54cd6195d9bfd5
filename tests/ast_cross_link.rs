/// Source-level capture: local variable values read off executed lines,
/// AST import of traced files and the HAS_AST_NODE cross-link.

use execgraph::application::Session;
use execgraph::config::RecorderConfig;
use execgraph::domain::graph::{Label, RelType};
use execgraph::domain::store::MemoryGraphStore;
use execgraph::infrastructure::{CallSite, Heap, ManualClock, SynSourceParser};
use execgraph::ports::GraphStore;
use std::fs;
use tempfile::TempDir;

const CALC: &str = "fn add(a: i64, b: i64) -> i64 {\n    let sum = a + b;\n    sum\n}\n";

fn write_source(dir: &TempDir, name: &str, text: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    fs::canonicalize(&path).unwrap().to_string_lossy().to_string()
}

fn new_session<'a>(heap: &'a Heap, clock: &'a ManualClock) -> Session<'a, Heap, MemoryGraphStore> {
    Session::new(
        heap,
        &SynSourceParser,
        clock,
        MemoryGraphStore::default(),
        RecorderConfig::default(),
    )
}

#[test]
fn test_add_links_variables_arguments_and_definition() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "calc.rs", CALC);
    let heap = Heap::new();
    let clock = ManualClock::new();
    let mut session = new_session(&heap, &clock);
    let (a, b, sum) = (heap.int(2), heap.int(3), heap.int(5));

    let summary = session
        .record(|probe| {
            probe.call(CallSite::new(&path, 1, "Object", "add"), None, &[("a", a), ("b", b)]);
            probe.line(2);
            probe.assign("sum", sum);
            probe.line(3);
            probe.ret(4, sum);
        })
        .unwrap();
    assert_eq!(summary.files, 1);
    assert!(summary.ast_nodes > 0);
    assert_eq!(summary.links, 1);

    let store = session.store();
    let mut points = store.nodes_with_label(Label::TracePoint).unwrap();
    points.sort_by_key(|p| p.int_prop("execution_index"));
    let (call, line2, line3) = (points[0].id, points[1].id, points[2].id);

    let values = store.relationships(Some(RelType::HasVariableValue)).unwrap();
    let mut on_line2: Vec<&str> = values
        .iter()
        .filter(|r| r.from == line2)
        .filter_map(|r| r.str_prop("variable_name"))
        .collect();
    on_line2.sort();
    assert_eq!(on_line2, vec!["a", "b"]);
    let on_line3: Vec<&str> = values
        .iter()
        .filter(|r| r.from == line3)
        .filter_map(|r| r.str_prop("variable_name"))
        .collect();
    assert_eq!(on_line3, vec!["sum"]);

    let received = store.relationships(Some(RelType::ReceivedArgument)).unwrap();
    let mut arguments: Vec<&str> = received
        .iter()
        .filter(|r| r.from == call)
        .filter_map(|r| r.str_prop("argument_name"))
        .collect();
    arguments.sort();
    assert_eq!(arguments, vec!["a", "b"]);

    let links = store.relationships(Some(RelType::HasAstNode)).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].from, call);
    let def = store.node(links[0].to).unwrap().unwrap();
    assert_eq!(def.str_prop("type"), Some("def"));
    assert_eq!(def.str_prop("name"), Some("add"));
    assert_eq!(def.int_prop("first_line"), Some(1));
    assert_eq!(def.str_prop("file_path"), Some(path.as_str()));

    let files = store.nodes_with_label(Label::File).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].str_prop("content"), Some(CALC));
    let from_file = store.relationships(Some(RelType::FromFile)).unwrap();
    assert!(from_file.iter().all(|r| r.to == files[0].id));
    assert_eq!(from_file.len(), summary.ast_nodes);
}

#[test]
fn test_unparseable_file_is_kept_without_ast() {
    let dir = TempDir::new().unwrap();
    let path = write_source(&dir, "broken.rs", "fn broken( {\n");
    let heap = Heap::new();
    let clock = ManualClock::new();
    let mut session = new_session(&heap, &clock);

    let summary = session
        .record(|probe| {
            probe.call(CallSite::new(&path, 1, "Object", "broken"), None, &[]);
            probe.ret(1, heap.nil());
        })
        .unwrap();

    assert_eq!(summary.files, 1);
    assert_eq!(summary.ast_nodes, 0);
    assert_eq!(summary.links, 0);
    let store = session.store();
    assert_eq!(store.nodes_with_label(Label::File).unwrap().len(), 1);
    assert!(store.nodes_with_label(Label::AstNode).unwrap().is_empty());
}

#[test]
fn test_missing_source_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gone.rs").to_string_lossy().to_string();
    let heap = Heap::new();
    let clock = ManualClock::new();
    let mut session = new_session(&heap, &clock);

    let summary = session
        .record(|probe| {
            probe.call(CallSite::new(&path, 1, "Object", "gone"), None, &[]);
            probe.line(2);
            probe.ret(2, heap.nil());
        })
        .unwrap();

    assert_eq!(summary.trace_points, 3);
    assert_eq!(summary.files, 0);
    let store = session.store();
    assert!(store.nodes_with_label(Label::File).unwrap().is_empty());
    assert!(store.relationships(Some(RelType::HasVariableValue)).unwrap().is_empty());
}

#[test]
fn test_pseudo_paths_are_never_read() {
    let heap = Heap::new();
    let clock = ManualClock::new();
    let mut session = new_session(&heap, &clock);

    let summary = session
        .record(|probe| {
            probe.call(CallSite::new("(irb)", 1, "Object", "f"), None, &[]);
            probe.ret(1, heap.nil());
        })
        .unwrap();

    assert_eq!(summary.files, 0);
    assert_eq!(summary.links, 0);
}
