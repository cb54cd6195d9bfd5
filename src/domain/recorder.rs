//! Execution Trace Recorder
//!
//! Consumes execution events one at a time and turns them into `TracePoint`
//! nodes: NEXT edges in event order, HAS_PARENT edges along the live call
//! chain, STARTED_AT edges from each return to the call it closes, and
//! exclusive/inclusive timing per frame.
//!
//! Timing attribution: the time between the end of one event and the start of
//! the next is charged when that next event is a line event. It goes to the
//! innermost frame's self time and to every open frame's cumulative time, so a
//! frame's cumulative time is its self time plus the cumulative time of the
//! frames nested directly beneath it.
//!
//! Events with neither a method name nor a defining class produce no node but
//! still open and close frames, so the stacks stay aligned with the runtime.

use crate::config::{CaptureConfig, RecorderConfig};
use crate::domain::event::EventKind;
use crate::domain::graph::{prop, Label, NodeDraft, NodeId, Props, RelType};
use crate::domain::object_importer::ObjectImporter;
use crate::domain::source_cache::{is_pseudo_path, SourceCache};
use crate::error::{ImportError, RecorderError, StoreError};
use crate::ports::{Clock, ExecutionEvent, GraphSink, Introspector, SourceParser};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Timing attributes of a closed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub self_time: Duration,
    pub total_time: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Events handed to the recorder.
    pub events: u64,
    /// Events that produced a node.
    pub trace_points: u64,
    /// Events without method or class name.
    pub skipped: u64,
    /// Side-channel captures that failed and left an edge out.
    pub side_channel_misses: u64,
    /// Events that took longer than the slow-event threshold to record.
    pub slow_events: u64,
}

pub struct Recorder<'a, I: Introspector> {
    objects: ObjectImporter<'a, I>,
    parser: &'a dyn SourceParser,
    clock: &'a dyn Clock,
    sources: SourceCache,
    capture: CaptureConfig,
    slow_event: Duration,

    execution_index: u64,
    ancestors: Vec<Option<NodeId>>,
    self_times: Vec<Duration>,
    total_times: Vec<Duration>,
    last_node: Option<NodeId>,
    last_finished_at: Option<Duration>,

    paths: BTreeSet<String>,
    stats: RecordStats,
}

fn micros(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1000.0
}

fn is_anonymous<E: ExecutionEvent>(event: &E) -> bool {
    event.method_id().trim().is_empty() && event.defined_class().trim().is_empty()
}

impl<'a, I: Introspector> Recorder<'a, I> {
    pub fn new(
        introspector: &'a I,
        parser: &'a dyn SourceParser,
        clock: &'a dyn Clock,
        config: &RecorderConfig,
    ) -> Self {
        Self {
            objects: ObjectImporter::new(introspector, config.objects.clone()),
            parser,
            clock,
            sources: SourceCache::new(),
            capture: config.capture.clone(),
            slow_event: config.slow_event_threshold(),
            execution_index: 0,
            ancestors: Vec::new(),
            self_times: Vec::new(),
            total_times: Vec::new(),
            last_node: None,
            last_finished_at: None,
            paths: BTreeSet::new(),
            stats: RecordStats::default(),
        }
    }

    pub fn sources_mut(&mut self) -> &mut SourceCache {
        &mut self.sources
    }

    pub fn objects(&self) -> &ObjectImporter<'a, I> {
        &self.objects
    }

    pub fn stats(&self) -> &RecordStats {
        &self.stats
    }

    /// Number of currently open frames.
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Distinct normalized source paths referenced by recorded trace points.
    pub fn source_paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Records one event. Returns the created node, or `None` for a skipped event.
    ///
    /// An error means the recorder's stacks can no longer be trusted; callers
    /// must stop feeding it events.
    pub fn handle<E, S>(&mut self, event: &E, sink: &mut S) -> Result<Option<NodeId>, RecorderError>
    where
        E: ExecutionEvent<Value = I::Value>,
        S: GraphSink,
    {
        let started = self.clock.now();
        let elapsed = self.last_finished_at.map(|at| started.saturating_sub(at));
        let kind = event.kind();
        self.stats.events += 1;

        let mut timing = None;
        if kind.opens_frame() {
            self.self_times.push(Duration::ZERO);
            self.total_times.push(Duration::ZERO);
        } else if kind.closes_frame() {
            if let (Some(self_time), Some(total_time)) = (self.self_times.pop(), self.total_times.pop()) {
                timing = Some(FrameTiming {
                    self_time,
                    total_time,
                });
            }
        } else if let (Some(elapsed), Some(top)) = (elapsed, self.self_times.last_mut()) {
            *top += elapsed;
            for total in self.total_times.iter_mut() {
                *total += elapsed;
            }
        }

        // A return with no open frame closes a call made before tracing began.
        let closes = if kind.closes_frame() {
            self.ancestors.pop().flatten()
        } else {
            None
        };
        let parent = self.ancestors.iter().rev().find_map(|frame| *frame);

        let node = if is_anonymous(event) {
            self.stats.skipped += 1;
            None
        } else {
            Some(self.write_trace_point(event, timing, parent, closes, sink)?)
        };

        if kind.opens_frame() {
            self.ancestors.push(node);
        }
        self.check_stacks()?;

        if let Some(node) = node {
            self.capture_side_channels(event, node, sink)?;
        }

        let finished = self.clock.now();
        let spent = finished.saturating_sub(started);
        if spent > self.slow_event {
            self.stats.slow_events += 1;
            warn!(
                event = %kind,
                path = event.path(),
                line = event.line(),
                method = event.method_id(),
                ms = spent.as_millis() as u64,
                "slow trace event"
            );
        }
        self.last_finished_at = Some(finished);
        Ok(node)
    }

    fn check_stacks(&self) -> Result<(), RecorderError> {
        let ancestors = self.ancestors.len();
        if ancestors != self.self_times.len() || ancestors != self.total_times.len() {
            return Err(RecorderError::StackInvariant {
                ancestors,
                self_frames: self.self_times.len(),
                total_frames: self.total_times.len(),
            });
        }
        Ok(())
    }

    fn write_trace_point<E, S>(
        &mut self,
        event: &E,
        timing: Option<FrameTiming>,
        parent: Option<NodeId>,
        closes: Option<NodeId>,
        sink: &mut S,
    ) -> Result<NodeId, RecorderError>
    where
        E: ExecutionEvent<Value = I::Value>,
        S: GraphSink,
    {
        let index = self.execution_index + 1;
        let persist = |source: StoreError| RecorderError::Persist { index, source };

        let path = self.sources.normalize(event.path());
        if !path.is_empty() && !is_pseudo_path(&path) {
            self.paths.insert(path.clone());
        }

        let draft = NodeDraft::new(Label::TracePoint)
            .set("uuid", Uuid::new_v4().to_string())
            .set("event", event.kind().as_str())
            .set("lineno", event.line())
            .set("method_id", event.method_id())
            .set("defined_class", event.defined_class())
            .set("path", path)
            .set("execution_index", index)
            .set_opt("execution_time", timing.map(|t| micros(t.self_time)))
            .set_opt("total_execution_time", timing.map(|t| micros(t.total_time)));
        let node = sink.add_node(draft).map_err(persist)?;
        self.execution_index = index;

        if let Some(previous) = self.last_node {
            sink.add_relationship(RelType::Next, previous, node, Props::new())
                .map_err(persist)?;
        }
        if let Some(parent) = parent {
            sink.add_relationship(RelType::HasParent, node, parent, Props::new())
                .map_err(persist)?;
        }
        if let Some(call) = closes {
            sink.add_relationship(RelType::StartedAt, node, call, Props::new())
                .map_err(persist)?;
        }

        self.last_node = Some(node);
        self.stats.trace_points += 1;
        Ok(node)
    }

    fn capture_side_channels<E, S>(&mut self, event: &E, node: NodeId, sink: &mut S) -> Result<(), RecorderError>
    where
        E: ExecutionEvent<Value = I::Value>,
        S: GraphSink,
    {
        let kind = event.kind();

        if kind.closes_frame() && self.capture.return_values {
            if let Some(value) = event.return_value() {
                self.link_value(&value, node, RelType::Returned, Props::new(), sink)?;
            }
        }

        if self.capture.receivers {
            if let Some(receiver) = event.receiver() {
                self.link_value(&receiver, node, RelType::FromObject, Props::new(), sink)?;
            }
        }

        if kind == EventKind::Line && self.capture.variables {
            self.capture_variables(event, node, sink)?;
        }

        if kind == EventKind::Call && self.capture.arguments {
            for name in event.parameter_names() {
                if let Ok(value) = event.local_value(&name) {
                    let tag = prop("argument_name", name.as_str());
                    self.link_value(&value, node, RelType::ReceivedArgument, tag, sink)?;
                }
            }
        }
        Ok(())
    }

    fn capture_variables<E, S>(&mut self, event: &E, node: NodeId, sink: &mut S) -> Result<(), RecorderError>
    where
        E: ExecutionEvent<Value = I::Value>,
        S: GraphSink,
    {
        let line = match self.sources.line(event.path(), event.line()) {
            Some(line) => line.to_string(),
            None => return Ok(()),
        };
        let names = match self.parser.referenced_identifiers(&line) {
            Ok(names) => names,
            Err(err) => {
                trace!(path = event.path(), line = event.line(), %err, "line not parseable on its own");
                return Ok(());
            }
        };
        for name in names {
            // Identifiers that are not locals (functions, constants) are expected misses.
            if let Ok(value) = event.local_value(&name) {
                let tag = prop("variable_name", name.as_str());
                self.link_value(&value, node, RelType::HasVariableValue, tag, sink)?;
            }
        }
        Ok(())
    }

    /// Imports `value` and links it from `node`. A value that cannot be
    /// introspected only loses this edge; a failed write ends the recording.
    fn link_value<S: GraphSink>(
        &mut self,
        value: &I::Value,
        node: NodeId,
        rel_type: RelType,
        props: Props,
        sink: &mut S,
    ) -> Result<(), RecorderError> {
        let index = self.execution_index;
        let capture = |source: StoreError| RecorderError::Capture {
            index,
            rel: rel_type.as_str(),
            source,
        };
        match self.objects.import(value, sink) {
            Ok(object) => sink
                .add_relationship(rel_type, node, object, props)
                .map_err(capture),
            Err(ImportError::Store(source)) => Err(capture(source)),
            Err(ImportError::Introspect(err)) => {
                self.stats.side_channel_misses += 1;
                debug!(rel = rel_type.as_str(), %err, "side-channel capture skipped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::SyntaxNode;
    use crate::domain::sink::BatchWriter;
    use crate::domain::store::MemoryGraphStore;
    use crate::error::{LookupError, ParseError};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::heap::{Heap, ObjRef};
    use crate::ports::GraphStore;

    struct NoParser;

    impl SourceParser for NoParser {
        fn parse(&self, _text: &str) -> Result<SyntaxNode, ParseError> {
            Ok(SyntaxNode::new("file", None))
        }
        fn referenced_identifiers(&self, _line: &str) -> Result<Vec<String>, ParseError> {
            Ok(Vec::new())
        }
    }

    struct Ev {
        kind: EventKind,
        method: &'static str,
        class: &'static str,
    }

    fn ev(kind: EventKind, method: &'static str) -> Ev {
        Ev {
            kind,
            method,
            class: if method.is_empty() { "" } else { "Object" },
        }
    }

    impl ExecutionEvent for Ev {
        type Value = ObjRef;
        fn kind(&self) -> EventKind {
            self.kind
        }
        fn path(&self) -> &str {
            "(eval)"
        }
        fn line(&self) -> u32 {
            1
        }
        fn method_id(&self) -> &str {
            self.method
        }
        fn defined_class(&self) -> &str {
            self.class
        }
        fn receiver(&self) -> Option<ObjRef> {
            None
        }
        fn return_value(&self) -> Option<ObjRef> {
            None
        }
        fn parameter_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn local_value(&self, name: &str) -> Result<ObjRef, LookupError> {
            Err(LookupError::NotFound(name.to_string()))
        }
    }

    fn run(events: &[Ev], clock: &ManualClock) -> (Vec<Option<NodeId>>, BatchWriter<MemoryGraphStore>, RecordStats) {
        let heap = Heap::new();
        let config = RecorderConfig::default();
        let mut recorder = Recorder::new(&heap, &NoParser, clock, &config);
        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        let mut nodes = Vec::new();
        for event in events {
            clock.advance_micros(10);
            nodes.push(recorder.handle(event, &mut sink).unwrap());
        }
        assert_eq!(recorder.depth(), 0);
        let stats = recorder.stats().clone();
        (nodes, sink, stats)
    }

    #[test]
    fn test_anonymous_events_keep_frames_aligned() {
        let clock = ManualClock::new();
        let events = [
            ev(EventKind::Call, "outer"),
            ev(EventKind::CCall, ""),
            ev(EventKind::Call, "inner"),
            ev(EventKind::Return, "inner"),
            ev(EventKind::CReturn, ""),
            ev(EventKind::Return, "outer"),
        ];
        let (nodes, sink, stats) = run(&events, &clock);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.trace_points, 4);
        assert!(nodes[1].is_none() && nodes[4].is_none());

        let store = sink.store();
        let outer_call = nodes[0].unwrap();
        let inner_call = nodes[2].unwrap();
        let parents = store.relationships(Some(RelType::HasParent)).unwrap();
        // The inner call hangs off the nearest recorded ancestor.
        assert!(parents.iter().any(|r| r.from == inner_call && r.to == outer_call));

        let started = store.relationships(Some(RelType::StartedAt)).unwrap();
        assert_eq!(started.len(), 2);
        assert!(started.iter().any(|r| r.from == nodes[3].unwrap() && r.to == inner_call));
        assert!(started.iter().any(|r| r.from == nodes[5].unwrap() && r.to == outer_call));

        let next = store.relationships(Some(RelType::Next)).unwrap();
        assert_eq!(next.len(), 3);
    }

    #[test]
    fn test_execution_index_counts_only_recorded_events() {
        let clock = ManualClock::new();
        let events = [
            ev(EventKind::Line, ""),
            ev(EventKind::Call, "f"),
            ev(EventKind::Line, "f"),
            ev(EventKind::Return, "f"),
        ];
        let (_, sink, _) = run(&events, &clock);
        let mut indices: Vec<i64> = sink
            .store()
            .nodes_with_label(Label::TracePoint)
            .unwrap()
            .iter()
            .filter_map(|n| n.int_prop("execution_index"))
            .collect();
        indices.sort();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_unmatched_return_has_no_timing_or_start() {
        let clock = ManualClock::new();
        let heap = Heap::new();
        let config = RecorderConfig::default();
        let mut recorder = Recorder::new(&heap, &NoParser, &clock, &config);
        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        let node = recorder
            .handle(&ev(EventKind::Return, "main"), &mut sink)
            .unwrap()
            .unwrap();
        let record = sink.store().node(node).unwrap().unwrap();
        assert!(record.get("execution_time").is_none());
        assert!(sink.store().relationships(Some(RelType::StartedAt)).unwrap().is_empty());
        assert_eq!(recorder.depth(), 0);
    }

    #[test]
    fn test_line_time_charged_to_innermost_self_and_all_totals() {
        let clock = ManualClock::new();
        let events = [
            ev(EventKind::Call, "outer"),
            ev(EventKind::Line, "outer"),
            ev(EventKind::Call, "inner"),
            ev(EventKind::Line, "inner"),
            ev(EventKind::Return, "inner"),
            ev(EventKind::Line, "outer"),
            ev(EventKind::Return, "outer"),
        ];
        let (nodes, sink, _) = run(&events, &clock);
        let store = sink.store();
        let inner = store.node(nodes[4].unwrap()).unwrap().unwrap();
        let outer = store.node(nodes[6].unwrap()).unwrap().unwrap();

        assert_eq!(inner.float_prop("execution_time"), Some(10.0));
        assert_eq!(inner.float_prop("total_execution_time"), Some(10.0));
        assert_eq!(outer.float_prop("execution_time"), Some(20.0));
        assert_eq!(outer.float_prop("total_execution_time"), Some(30.0));
    }

    /// Moves the inner clock forward by `step` every time it is read.
    struct SteppingClock<'c> {
        inner: &'c ManualClock,
        step: Duration,
    }

    impl Clock for SteppingClock<'_> {
        fn now(&self) -> Duration {
            self.inner.advance(self.step);
            self.inner.now()
        }
    }

    fn slow_events_with_step(step: Duration) -> u64 {
        let manual = ManualClock::new();
        let clock = SteppingClock { inner: &manual, step };
        let heap = Heap::new();
        let config = RecorderConfig::default();
        let mut recorder = Recorder::new(&heap, &NoParser, &clock, &config);
        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        for event in [ev(EventKind::Call, "f"), ev(EventKind::Line, "f"), ev(EventKind::Return, "f")] {
            recorder.handle(&event, &mut sink).unwrap();
        }
        recorder.stats().slow_events
    }

    #[test]
    fn test_slow_events_are_counted() {
        assert_eq!(slow_events_with_step(Duration::from_millis(600)), 3);
        assert_eq!(slow_events_with_step(Duration::from_millis(500)), 0);
        assert_eq!(slow_events_with_step(Duration::from_millis(10)), 0);
    }
}
