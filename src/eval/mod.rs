//! Tree-walking interpreter for agent programs.
//!
//! Evaluation is split by concern: [`evaluator`] owns the entry points and
//! function application, `statement` handles blocks and debug gates, and
//! `expression` evaluates every expression form including the binding forms
//! (`declare`, `setq`, ...). Builtins and host bindings are resolved by name
//! after the special forms.

pub mod builtins;
pub mod context;
pub mod evaluator;
mod expression;
pub mod host;
mod statement;

pub use builtins::Builtin;
pub use context::{RunEnv, Scope, Unwind, MAX_CALL_DEPTH};
pub use evaluator::Interpreter;
pub use host::{HostBinding, HostBindings, HostContext, HostFunction};
