// Infrastructure implementations for execgraph: the bundled runtime, bridges,
// parser and clocks behind the ports.

pub mod clock;
pub mod concurrency;
pub mod heap;
pub mod probe;
pub mod replay;
pub mod syn_parser;

pub use clock::{ManualClock, SystemClock};
pub use heap::{Heap, ObjRef};
pub use probe::{CallSite, Probe, ProbeEvent};
pub use replay::{Replay, ReplayEvent, TraceLog};
pub use syn_parser::SynSourceParser;
