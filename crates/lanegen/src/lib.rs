#![doc = include_str!("../../../README.md")]
#![expect(clippy::must_use_candidate, reason = "builder-style APIs stay unannotated")]
#![expect(clippy::missing_panics_doc, reason = "internal invariants are not caller panics")]

pub mod ast;
pub mod clower;
pub mod dataflow;
pub mod directives;
pub mod dispatch;
pub mod emit;
mod error;
pub mod lexer;
pub mod ops;
pub mod parse;
pub mod resolve;
mod run;
pub mod target;
pub mod tracer;
pub mod transform;
pub mod types;

pub use crate::{
    error::{ErrorKind, GenError, GenResult},
    run::{GenConfig, GenOutput, Generator, OutputSet},
    tracer::{GenTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
};
