//! > **Debugger breakpoint assertions with a diagnostic message fallback**
//!
//! When the process is running under an interactive debugger, calling the
//! assertion halts execution at the call site and surfaces a live stack in the
//! debugger. When no debugger is attached, the call writes a formatted
//! diagnostic message to a configurable sink and execution continues.
//!
//! ```no_run
//! dbgpoint::assert_breakpoint!("unexpected cache state");
//! ```
//!

pub use crate::breakpoint::*;
pub use crate::sink::*;

pub mod breakpoint;
pub mod sink;
