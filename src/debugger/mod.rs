//! Statement-level debugging: the shared breakpoint table and the per-run
//! controller the interpreter reports to at every statement boundary.

pub mod breakpoints;
pub mod controller;

pub use breakpoints::{Breakpoint, BreakpointTable};
pub use controller::{DebugController, DebugState, Position, RunState, StopReason, Variables};
