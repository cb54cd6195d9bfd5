//! In-process instrumentation bridge.
//!
//! Instrumented code reports its own execution steps to a `Probe`. The probe
//! keeps the runtime's frame stack (with local bindings) whether or not it is
//! enabled, and while enabled hands each step to its handler as a
//! `ProbeEvent`. Delivery runs muted, so anything the handler executes that
//! reports back into the probe is dropped rather than recorded.

use crate::domain::event::EventKind;
use crate::error::LookupError;
use crate::ports::{ExecutionEvent, InstrumentationBridge, Muted};
use std::cell::{Cell, RefCell};

/// Where a frame's code lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallSite<'s> {
    pub path: &'s str,
    pub line: u32,
    pub defined_class: &'s str,
    pub method_id: &'s str,
}

impl<'s> CallSite<'s> {
    pub fn new(path: &'s str, line: u32, defined_class: &'s str, method_id: &'s str) -> Self {
        Self {
            path,
            line,
            defined_class,
            method_id,
        }
    }
}

struct Frame<V> {
    path: String,
    line: u32,
    defined_class: String,
    method_id: String,
    receiver: Option<V>,
    locals: Vec<(String, V)>,
}

impl<V: Clone> Frame<V> {
    fn event(&self, kind: EventKind, line: u32) -> ProbeEvent<V> {
        ProbeEvent {
            kind,
            path: self.path.clone(),
            line,
            method_id: self.method_id.clone(),
            defined_class: self.defined_class.clone(),
            receiver: self.receiver.clone(),
            return_value: None,
            parameters: Vec::new(),
            locals: self.locals.clone(),
        }
    }
}

/// One step as seen by the probe, with a snapshot of the frame's bindings.
#[derive(Debug, Clone)]
pub struct ProbeEvent<V> {
    pub kind: EventKind,
    pub path: String,
    pub line: u32,
    pub method_id: String,
    pub defined_class: String,
    pub receiver: Option<V>,
    pub return_value: Option<V>,
    pub parameters: Vec<String>,
    pub locals: Vec<(String, V)>,
}

impl<V: Clone> ExecutionEvent for ProbeEvent<V> {
    type Value = V;

    fn kind(&self) -> EventKind {
        self.kind
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn line(&self) -> u32 {
        self.line
    }

    fn method_id(&self) -> &str {
        &self.method_id
    }

    fn defined_class(&self) -> &str {
        &self.defined_class
    }

    fn receiver(&self) -> Option<V> {
        self.receiver.clone()
    }

    fn return_value(&self) -> Option<V> {
        self.return_value.clone()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.clone()
    }

    fn local_value(&self, name: &str) -> Result<V, LookupError> {
        self.locals
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| LookupError::NotFound(name.to_string()))
    }
}

type Handler<'h, V> = Box<dyn FnMut(&ProbeEvent<V>) + 'h>;

pub struct Probe<'h, V> {
    enabled: Cell<bool>,
    frames: RefCell<Vec<Frame<V>>>,
    handler: RefCell<Handler<'h, V>>,
}

impl<'h, V: Clone> Probe<'h, V> {
    /// A disabled probe delivering to `handler` once enabled.
    pub fn new(handler: impl FnMut(&ProbeEvent<V>) + 'h) -> Self {
        Self {
            enabled: Cell::new(false),
            frames: RefCell::new(Vec::new()),
            handler: RefCell::new(Box::new(handler)),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Enters a method. `args` become the frame's first local bindings.
    pub fn call(&self, site: CallSite<'_>, receiver: Option<V>, args: &[(&str, V)]) {
        let frame = Frame {
            path: site.path.to_string(),
            line: site.line,
            defined_class: site.defined_class.to_string(),
            method_id: site.method_id.to_string(),
            receiver,
            locals: args.iter().map(|(n, v)| (n.to_string(), v.clone())).collect(),
        };
        let mut event = frame.event(EventKind::Call, site.line);
        event.parameters = args.iter().map(|(n, _)| n.to_string()).collect();
        self.frames.borrow_mut().push(frame);
        self.emit(event);
    }

    /// Enters a native method, which has no source lines or locals of its own.
    pub fn native_call(&self, site: CallSite<'_>, receiver: Option<V>) {
        let frame = Frame {
            path: site.path.to_string(),
            line: site.line,
            defined_class: site.defined_class.to_string(),
            method_id: site.method_id.to_string(),
            receiver,
            locals: Vec::new(),
        };
        let event = frame.event(EventKind::CCall, site.line);
        self.frames.borrow_mut().push(frame);
        self.emit(event);
    }

    /// About to execute `line` of the current frame.
    pub fn line(&self, line: u32) {
        let event = {
            let mut frames = self.frames.borrow_mut();
            match frames.last_mut() {
                Some(frame) => {
                    frame.line = line;
                    frame.event(EventKind::Line, line)
                }
                None => top_level(EventKind::Line, line),
            }
        };
        self.emit(event);
    }

    /// Binds (or rebinds) a local in the current frame. Not an event.
    pub fn assign(&self, name: &str, value: V) {
        let mut frames = self.frames.borrow_mut();
        if let Some(frame) = frames.last_mut() {
            match frame.locals.iter_mut().find(|(bound, _)| bound == name) {
                Some(slot) => slot.1 = value,
                None => frame.locals.push((name.to_string(), value)),
            }
        }
    }

    /// Leaves the current method at `line`, returning `value`.
    pub fn ret(&self, line: u32, value: V) {
        self.leave(EventKind::Return, Some(line), value);
    }

    pub fn native_return(&self, value: V) {
        self.leave(EventKind::CReturn, None, value);
    }

    fn leave(&self, kind: EventKind, line: Option<u32>, value: V) {
        let frame = self.frames.borrow_mut().pop();
        let mut event = match &frame {
            Some(frame) => frame.event(kind, line.unwrap_or(frame.line)),
            None => top_level(kind, line.unwrap_or(0)),
        };
        event.return_value = Some(value);
        self.emit(event);
    }

    fn emit(&self, event: ProbeEvent<V>) {
        if !self.enabled.get() {
            return;
        }
        let _muted = Muted::new(self);
        if let Ok(mut handler) = self.handler.try_borrow_mut() {
            (*handler)(&event);
        }
    }
}

fn top_level<V>(kind: EventKind, line: u32) -> ProbeEvent<V> {
    ProbeEvent {
        kind,
        path: String::new(),
        line,
        method_id: String::new(),
        defined_class: String::new(),
        receiver: None,
        return_value: None,
        parameters: Vec::new(),
        locals: Vec::new(),
    }
}

impl<V> InstrumentationBridge for Probe<'_, V> {
    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }
}
