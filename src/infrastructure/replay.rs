//! Offline instrumentation bridge: replays a JSON trace log.
//!
//! A log holds an `objects` table (classes, modules, plain objects and
//! immediates, referring to each other by log-local id) and the ordered
//! `events`. Objects are rebuilt on a fresh `Heap`; events are resolved
//! against it and can be fed to a session in order.

use crate::domain::event::EventKind;
use crate::error::{LookupError, ReplayError};
use crate::infrastructure::clock::ManualClock;
use crate::infrastructure::heap::{Heap, ObjRef};
use crate::ports::ExecutionEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceLog {
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
}

impl TraceLog {
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let text = fs::read_to_string(path).map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectSpec {
    Class {
        id: u64,
        name: String,
        /// Defaults to `Object`.
        #[serde(default)]
        superclass: Option<u64>,
        #[serde(default)]
        includes: Vec<u64>,
    },
    Module {
        id: u64,
        name: String,
        #[serde(default)]
        includes: Vec<u64>,
    },
    Object {
        id: u64,
        #[serde(default)]
        class: Option<u64>,
        #[serde(default)]
        ivars: BTreeMap<String, u64>,
    },
    Int {
        id: u64,
        value: i64,
    },
    Float {
        id: u64,
        value: f64,
    },
    Str {
        id: u64,
        value: String,
    },
    Symbol {
        id: u64,
        value: String,
    },
    Bool {
        id: u64,
        value: bool,
    },
    Nil {
        id: u64,
    },
    Array {
        id: u64,
        #[serde(default)]
        items: Vec<u64>,
    },
    Opaque {
        id: u64,
        #[serde(default)]
        class: Option<u64>,
        #[serde(default)]
        description: String,
    },
}

impl ObjectSpec {
    pub fn id(&self) -> u64 {
        match self {
            ObjectSpec::Class { id, .. }
            | ObjectSpec::Module { id, .. }
            | ObjectSpec::Object { id, .. }
            | ObjectSpec::Int { id, .. }
            | ObjectSpec::Float { id, .. }
            | ObjectSpec::Str { id, .. }
            | ObjectSpec::Symbol { id, .. }
            | ObjectSpec::Bool { id, .. }
            | ObjectSpec::Nil { id }
            | ObjectSpec::Array { id, .. }
            | ObjectSpec::Opaque { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    pub kind: EventKind,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub method_id: String,
    #[serde(default)]
    pub defined_class: String,
    #[serde(default)]
    pub receiver: Option<u64>,
    #[serde(default)]
    pub return_value: Option<u64>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub locals: BTreeMap<String, u64>,
    /// Microseconds since the start of the trace.
    #[serde(default)]
    pub at_us: Option<u64>,
}

/// An event resolved against the replay heap.
#[derive(Debug, Clone)]
pub struct ReplayEvent {
    pub kind: EventKind,
    pub path: String,
    pub line: u32,
    pub method_id: String,
    pub defined_class: String,
    pub receiver: Option<ObjRef>,
    pub return_value: Option<ObjRef>,
    pub parameters: Vec<String>,
    pub locals: Vec<(String, ObjRef)>,
    pub at: Option<Duration>,
}

impl ExecutionEvent for ReplayEvent {
    type Value = ObjRef;

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

    fn receiver(&self) -> Option<ObjRef> {
        self.receiver
    }

    fn return_value(&self) -> Option<ObjRef> {
        if self.kind.closes_frame() {
            self.return_value
        } else {
            None
        }
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.clone()
    }

    fn local_value(&self, name: &str) -> Result<ObjRef, LookupError> {
        self.locals
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| LookupError::NotFound(name.to_string()))
    }
}

pub struct Replay {
    heap: Heap,
    events: Vec<ReplayEvent>,
}

impl Replay {
    pub fn build(log: TraceLog) -> Result<Self, ReplayError> {
        let heap = Heap::new();
        let refs = allocate(&heap, &log.objects)?;
        let lookup = |id: u64| refs.get(&id).copied().ok_or(ReplayError::UnknownObject(id));

        // Second pass: everything that can point forward.
        for entry in &log.objects {
            let this = lookup(entry.id())?;
            match entry {
                ObjectSpec::Class {
                    superclass,
                    includes,
                    ..
                } => {
                    if let Some(id) = superclass {
                        heap.set_superclass(this, Some(class_ref(&heap, lookup(*id)?, *id)?));
                    }
                    for id in includes {
                        heap.include_module(this, lookup(*id)?);
                    }
                }
                ObjectSpec::Module { includes, .. } => {
                    for id in includes {
                        heap.include_module(this, lookup(*id)?);
                    }
                }
                ObjectSpec::Object { class, ivars, .. } => {
                    if let Some(id) = class {
                        heap.set_class(this, class_ref(&heap, lookup(*id)?, *id)?);
                    }
                    for (name, id) in ivars {
                        heap.set_ivar(this, name, lookup(*id)?);
                    }
                }
                ObjectSpec::Opaque { class: Some(id), .. } => {
                    heap.set_class(this, class_ref(&heap, lookup(*id)?, *id)?);
                }
                ObjectSpec::Array { items, .. } => {
                    for id in items {
                        heap.push_item(this, lookup(*id)?);
                    }
                }
                _ => {}
            }
        }

        let resolve = |id: &Option<u64>| id.map(lookup).transpose();
        let events = log
            .events
            .into_iter()
            .map(|logged| -> Result<ReplayEvent, ReplayError> {
                Ok(ReplayEvent {
                    receiver: resolve(&logged.receiver)?,
                    return_value: resolve(&logged.return_value)?,
                    locals: logged
                        .locals
                        .iter()
                        .map(|(name, id)| lookup(*id).map(|value| (name.clone(), value)))
                        .collect::<Result<_, ReplayError>>()?,
                    kind: logged.kind,
                    path: logged.path,
                    line: logged.line,
                    method_id: logged.method_id,
                    defined_class: logged.defined_class,
                    parameters: logged.parameters,
                    at: logged.at_us.map(Duration::from_micros),
                })
            })
            .collect::<Result<Vec<_>, ReplayError>>()?;

        Ok(Self { heap, events })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn events(&self) -> &[ReplayEvent] {
        &self.events
    }

    /// The events in order, moving `clock` to each event's timestamp just
    /// before it is handed out.
    pub fn timed<'r>(&'r self, clock: &'r ManualClock) -> impl Iterator<Item = &'r ReplayEvent> + 'r {
        self.events.iter().inspect(move |event| {
            if let Some(at) = event.at {
                clock.set(at);
            }
        })
    }
}

fn allocate(heap: &Heap, objects: &[ObjectSpec]) -> Result<HashMap<u64, ObjRef>, ReplayError> {
    let mut refs = HashMap::with_capacity(objects.len());
    for entry in objects {
        let obj = match entry {
            ObjectSpec::Class { name, .. } => heap.define_class(name, None),
            ObjectSpec::Module { name, .. } => heap.define_module(name),
            ObjectSpec::Object { .. } => heap.new_object(heap.core().object),
            ObjectSpec::Int { value, .. } => heap.int(*value),
            ObjectSpec::Float { value, .. } => heap.float(*value),
            ObjectSpec::Str { value, .. } => heap.string(value),
            ObjectSpec::Symbol { value, .. } => heap.symbol(value),
            ObjectSpec::Bool { value, .. } => heap.boolean(*value),
            ObjectSpec::Nil { .. } => heap.nil(),
            ObjectSpec::Array { .. } => heap.array(Vec::new()),
            ObjectSpec::Opaque { description, .. } => heap.opaque(heap.core().object, description),
        };
        if refs.insert(entry.id(), obj).is_some() {
            return Err(ReplayError::DuplicateObject(entry.id()));
        }
    }
    Ok(refs)
}

fn class_ref(heap: &Heap, obj: ObjRef, id: u64) -> Result<ObjRef, ReplayError> {
    if heap.class_of(obj) == heap.core().class {
        Ok(obj)
    } else {
        Err(ReplayError::WrongKind { id, role: "class" })
    }
}
