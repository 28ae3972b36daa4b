//! Pipeline tracing infrastructure.
//!
//! A trait-based tracing system for the generator pipeline. All hook
//! methods have default no-op bodies, so [`NoopTracer`] costs nothing and
//! implementations only override the hooks they care about.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (production default) |
//! | [`StderrTracer`] | Human-readable pipeline log to stderr |
//! | [`RecordingTracer`] | Full event recording for inspection in tests |

/// An event emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The parser admitted a base function.
    FunctionAdmitted { name: String },
    /// A transformer pass ran for one `(function, target)` instance.
    PassApplied {
        symbol: String,
        target: String,
        pass: String,
    },
    /// The fusion engine formed a group.
    FusionGroupFormed {
        function: String,
        pattern: String,
        members: usize,
    },
    /// An output unit was assembled.
    UnitEmitted { name: String, bytes: usize },
    /// A `(function, target, element)` triple failed and was skipped.
    TripleFailed {
        symbol: String,
        target: String,
        error: String,
    },
}

/// Trait for pipeline tracing. Hooks default to no-ops.
pub trait GenTracer {
    fn on_function_admitted(&mut self, _name: &str) {}
    fn on_pass(&mut self, _symbol: &str, _target: &str, _pass: &str) {}
    fn on_fusion_group(&mut self, _function: &str, _pattern: &str, _members: usize) {}
    fn on_unit_emitted(&mut self, _name: &str, _bytes: usize) {}
    fn on_triple_failed(&mut self, _symbol: &str, _target: &str, _error: &str) {}
}

/// Zero-cost default tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl GenTracer for NoopTracer {}

/// Logs every event to stderr; useful when debugging a generation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl GenTracer for StderrTracer {
    fn on_function_admitted(&mut self, name: &str) {
        eprintln!("admit {name}");
    }
    fn on_pass(&mut self, symbol: &str, target: &str, pass: &str) {
        eprintln!("pass {pass} {symbol} [{target}]");
    }
    fn on_fusion_group(&mut self, function: &str, pattern: &str, members: usize) {
        eprintln!("fuse {pattern} in {function} ({members} members)");
    }
    fn on_unit_emitted(&mut self, name: &str, bytes: usize) {
        eprintln!("emit {name} ({bytes} bytes)");
    }
    fn on_triple_failed(&mut self, symbol: &str, target: &str, error: &str) {
        eprintln!("fail {symbol} [{target}]: {error}");
    }
}

/// Records every event for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Events of one kind, by a simple label: `admit`, `pass`, `fuse`,
    /// `emit`, `fail`.
    pub fn count(&self, label: &str) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    (label, e),
                    ("admit", TraceEvent::FunctionAdmitted { .. })
                        | ("pass", TraceEvent::PassApplied { .. })
                        | ("fuse", TraceEvent::FusionGroupFormed { .. })
                        | ("emit", TraceEvent::UnitEmitted { .. })
                        | ("fail", TraceEvent::TripleFailed { .. })
                )
            })
            .count()
    }
}

impl GenTracer for RecordingTracer {
    fn on_function_admitted(&mut self, name: &str) {
        self.events.push(TraceEvent::FunctionAdmitted { name: name.to_owned() });
    }
    fn on_pass(&mut self, symbol: &str, target: &str, pass: &str) {
        self.events.push(TraceEvent::PassApplied {
            symbol: symbol.to_owned(),
            target: target.to_owned(),
            pass: pass.to_owned(),
        });
    }
    fn on_fusion_group(&mut self, function: &str, pattern: &str, members: usize) {
        self.events.push(TraceEvent::FusionGroupFormed {
            function: function.to_owned(),
            pattern: pattern.to_owned(),
            members,
        });
    }
    fn on_unit_emitted(&mut self, name: &str, bytes: usize) {
        self.events.push(TraceEvent::UnitEmitted {
            name: name.to_owned(),
            bytes,
        });
    }
    fn on_triple_failed(&mut self, symbol: &str, target: &str, error: &str) {
        self.events.push(TraceEvent::TripleFailed {
            symbol: symbol.to_owned(),
            target: target.to_owned(),
            error: error.to_owned(),
        });
    }
}
