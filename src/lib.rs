//! Minigo Interpreter Library
//!
//! Sandboxed tree-walking interpreter for a Go-like language subset with
//! goroutines and channels. Parsing is external: hosts hand the evaluator a
//! typed [`ast::File`] (or register a parser callback for source text) and
//! inject every capability through the native function registry.

pub mod ast;
pub mod error;
pub mod interp;

pub use error::{Result, RunError};
pub use interp::{Interpreter, RuntimeError, Value};
