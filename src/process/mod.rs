//! CLI subprocess lifecycle: argument construction, stdin message, stream
//! readers, and the single-flight supervisor.

pub mod args;
pub mod codec;
pub mod reader;
pub mod shutdown;
pub mod supervisor;
pub mod writer;

pub use supervisor::ProcessSupervisor;

/// Event emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// One stdout line, parsed as JSON or wrapped as a text event.
    Data(serde_json::Value),
    /// One stderr line, or a spawn or stream failure.
    Error(String),
    /// The process exited and every stream was drained. Carries the exit
    /// code, `None` when killed by a signal or never spawned.
    Close(Option<i32>),
}
