//! Recording sessions: tracing, AST import and cross-linking as one run.

use crate::config::RecorderConfig;
use crate::domain::ast::SyntaxNode;
use crate::domain::ast_importer::{import_file, AstImporter};
use crate::domain::cross_link::CrossLinker;
use crate::domain::recorder::Recorder;
use crate::domain::sink::BatchWriter;
use crate::error::{ParseError, RecorderError, SessionError, StoreError};
use crate::infrastructure::probe::{Probe, ProbeEvent};
use crate::infrastructure::{SynSourceParser, SystemClock};
use crate::ports::{Clock, ExecutionEvent, GraphSink, GraphStore, InstrumentationBridge, Introspector, SourceParser};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// What one recording run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub events: u64,
    pub trace_points: u64,
    pub skipped: u64,
    pub objects: usize,
    pub files: usize,
    pub ast_nodes: usize,
    pub links: usize,
    pub side_channel_misses: u64,
    /// Object edges left out because the target could not be introspected.
    pub object_edges_skipped: u64,
    pub slow_events: u64,
}

pub struct Session<'a, I: Introspector, S: GraphStore> {
    pub introspector: &'a I,
    pub parser: &'a dyn SourceParser,
    pub clock: &'a dyn Clock,
    writer: BatchWriter<S>,
    config: RecorderConfig,
}

impl<'a, I: Introspector, S: GraphStore> Session<'a, I, S> {
    pub fn new(
        introspector: &'a I,
        parser: &'a dyn SourceParser,
        clock: &'a dyn Clock,
        store: S,
        config: RecorderConfig,
    ) -> Self {
        Self {
            introspector,
            parser,
            clock,
            writer: BatchWriter::with_batch_size(store, config.batch_size),
            config,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.writer.store()
    }

    pub fn into_store(self) -> Result<S, StoreError> {
        self.writer.into_store()
    }

    /// Runs `traced` with tracing enabled and records everything it reports
    /// to the probe. A panic inside `traced` ends the traced run; the events
    /// seen up to that point are still finalized.
    pub fn record<R>(
        &mut self,
        traced: impl FnOnce(&Probe<'_, I::Value>) -> R,
    ) -> Result<RecordSummary, SessionError> {
        let mut recorder = Recorder::new(self.introspector, self.parser, self.clock, &self.config);
        let halt = self.config.halt_on_fatal;
        let mut fatal: Option<RecorderError> = None;
        self.writer.begin_batch();

        {
            let recorder = &mut recorder;
            let writer = &mut self.writer;
            let fatal = &mut fatal;
            let probe = Probe::new(move |event: &ProbeEvent<I::Value>| {
                if fatal.is_some() {
                    return;
                }
                if let Err(err) = recorder.handle(event, &mut *writer) {
                    *fatal = Some(abandon(err, halt));
                }
            });

            probe.enable();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| traced(&probe)));
            probe.disable();
            if outcome.is_err() {
                info!("traced code panicked; finalizing the partial trace");
            }
        }

        self.finish(recorder, fatal)
    }

    /// Records an already captured event sequence.
    pub fn record_events<'e, E>(
        &mut self,
        events: impl IntoIterator<Item = &'e E>,
    ) -> Result<RecordSummary, SessionError>
    where
        E: ExecutionEvent<Value = I::Value> + 'e,
    {
        let mut recorder = Recorder::new(self.introspector, self.parser, self.clock, &self.config);
        let mut fatal = None;
        self.writer.begin_batch();

        for event in events {
            if let Err(err) = recorder.handle(event, &mut self.writer) {
                fatal = Some(abandon(err, self.config.halt_on_fatal));
                break;
            }
        }

        self.finish(recorder, fatal)
    }

    fn finish(
        &mut self,
        recorder: Recorder<'a, I>,
        fatal: Option<RecorderError>,
    ) -> Result<RecordSummary, SessionError> {
        if let Some(err) = fatal {
            if let Err(flush_err) = self.writer.end_batch() {
                warn!(%flush_err, "buffered writes not persisted after abandoning the trace");
            }
            return Err(SessionError::Fatal(err));
        }
        self.writer.flush()?;

        let stats = recorder.stats().clone();
        let mut summary = RecordSummary {
            events: stats.events,
            trace_points: stats.trace_points,
            skipped: stats.skipped,
            objects: recorder.objects().len(),
            side_channel_misses: stats.side_channel_misses,
            object_edges_skipped: recorder.objects().skipped_edges(),
            slow_events: stats.slow_events,
            ..RecordSummary::default()
        };
        let paths: Vec<String> = recorder.source_paths().map(str::to_string).collect();
        drop(recorder);

        self.import_sources(&paths, &mut summary)?;
        summary.links = CrossLinker::new(&self.config.definition_kind).link(&mut self.writer)?;
        self.writer.end_batch()?;

        info!(
            events = summary.events,
            trace_points = summary.trace_points,
            objects = summary.objects,
            files = summary.files,
            ast_nodes = summary.ast_nodes,
            links = summary.links,
            "recording finalized"
        );
        Ok(summary)
    }

    /// Reads and parses every source on the rayon pool, then writes the
    /// trees in path order.
    fn import_sources(&mut self, paths: &[String], summary: &mut RecordSummary) -> Result<(), StoreError> {
        let parser = self.parser;
        let parsed: Vec<(String, String, Result<SyntaxNode, ParseError>)> = paths
            .par_iter()
            .filter_map(|path| match fs::read_to_string(path) {
                Ok(text) => {
                    let tree = parser.parse(&text);
                    Some((path.clone(), text, tree))
                }
                Err(err) => {
                    warn!(path = path.as_str(), %err, "source file unreadable; no AST imported");
                    None
                }
            })
            .collect();

        for (path, text, tree) in parsed {
            let file = import_file(&mut self.writer, &path, &text)?;
            summary.files += 1;
            match tree {
                Ok(tree) => {
                    let mut importer = AstImporter::new(&path, &text);
                    importer.import(&tree, file, None, &mut self.writer)?;
                    summary.ast_nodes += importer.imported();
                    debug!(path = path.as_str(), nodes = importer.imported(), "imported AST");
                }
                Err(err) => warn!(path = path.as_str(), %err, "source not parseable; file kept without AST"),
            }
        }
        Ok(())
    }
}

/// Reports an error that ends the recording. With `halt` set the process
/// exits here; otherwise the error is handed back to stop the session.
fn abandon(err: RecorderError, halt: bool) -> RecorderError {
    error!(%err, "recording abandoned");
    if halt {
        std::process::exit(1);
    }
    err
}

/// Records `traced` with the bundled parser and the wall clock, returning
/// the summary together with the populated store.
pub fn record_execution<I, S, R>(
    introspector: &I,
    store: S,
    config: RecorderConfig,
    traced: impl FnOnce(&Probe<'_, I::Value>) -> R,
) -> Result<(RecordSummary, S), SessionError>
where
    I: Introspector,
    S: GraphStore,
{
    let parser = SynSourceParser;
    let clock = SystemClock::default();
    let mut session = Session::new(introspector, &parser, &clock, store, config);
    let summary = session.record(traced)?;
    Ok((summary, session.into_store()?))
}
