//! Session registry: isolated, time-bounded execution contexts and the runs
//! started in them.

pub mod context;
pub mod logs;
pub mod manager;
pub mod run;

pub use context::{ExecutionContext, SessionInfo};
pub use logs::{LogLevel, LogRecord, LogSink};
pub use manager::SessionManager;
pub use run::{ExecId, ExecOptions, ExecResult, Run};
