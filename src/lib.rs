//! # Chariot: agent-program runtime
//!
//! Chariot runs small expression-oriented programs ("agent programs") that
//! declare, mutate and query a shared hierarchical data store. Programs run
//! in isolated user sessions and can be debugged statement by statement.
//!
//! ## Processing pipeline
//!
//! ```text
//! Source → Tokenizer → Analyzer → Program (AST) → Interpreter → Tree Store
//! ```
//!
//! - [`tokenizer`] turns text into spanned tokens (nom).
//! - [`analyzer`] parses the significant tokens into an [`ast::Program`].
//! - [`eval`] walks the AST. Builtins, host bindings and the debug gate are
//!   resolved there.
//!
//! ## Data
//!
//! The [`tree`] module holds the only persistent data model: arenas of named
//! nodes with attributes, a process-wide global registry and one session-local
//! registry per session. Whole subtrees can be saved and loaded in a binary or
//! a JSON text form.
//!
//! ## Runtime services
//!
//! - [`session`]: execution contexts keyed by token, synchronous and
//!   asynchronous runs, idle eviction.
//! - [`debugger`]: breakpoints and the per-run pause/step/continue controller.
//! - [`agent_registry`]: agents as a filtered view of the global registry,
//!   with rules, beliefs and a plan scheduler.
//! - [`event_bus`]: lifecycle events for sessions, runs and agents.
//! - [`system`]: wires everything together; bootstrap and shutdown.

pub mod agent_registry;
pub mod analyzer;
pub mod ast;
pub mod config;
pub mod debugger;
pub mod error;
pub mod eval;
pub mod event_bus;
pub mod session;
pub mod system;
pub mod tokenizer;
pub mod tree;
pub mod value;

pub use error::{BoxError, ChariotError, ChariotResult, ErrorInfo, ErrorKind};
pub use system::System;
pub use value::{TypeCode, Value};
