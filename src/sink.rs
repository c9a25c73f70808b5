//! Message sinks for breakpoint assertions
//!

use std::str;

use log::error;
use unwrap::unwrap;

/// Destination for the diagnostic message written when a breakpoint assertion
/// fires with no debugger attached
///
/// Implemented by [`StreamSink`] and [`LogSink`]; callers can supply any type
/// satisfying this single write capability.
///
pub trait BreakpointSink {
    /// Write one formatted breakpoint message
    ///
    /// Invoked from signal-handler context, so delivery is best effort:
    /// implementations should not block or unwind, and write failures are not
    /// reported back through the assertion.
    ///
    fn write(&self, data: &[u8]);
}

/// Sink writing raw bytes to an OS-level output stream
///
#[derive(Clone, Copy, Debug)]
pub struct StreamSink {
    fd: libc::c_int,
}

impl StreamSink {
    pub const fn stderr() -> Self {
        Self {
            fd: libc::STDERR_FILENO,
        }
    }

    pub const fn stdout() -> Self {
        Self {
            fd: libc::STDOUT_FILENO,
        }
    }

    /// Wrap an already-open file descriptor, which the sink does not take
    /// ownership of
    pub const fn from_raw_fd(fd: libc::c_int) -> Self {
        Self { fd }
    }
}

impl BreakpointSink for StreamSink {
    fn write(&self, data: &[u8]) {
        // libc::write is async-signal-safe; errors and short writes are not
        // retried or reported
        unsafe {
            libc::write(self.fd, data.as_ptr() as *const libc::c_void, data.len());
        }
    }
}

/// Sink routing the message through the `log` facade at the highest severity
///
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub const fn new() -> Self {
        Self
    }
}

impl BreakpointSink for LogSink {
    fn write(&self, data: &[u8]) {
        // The assertion only feeds back bytes it encoded itself, so a decode
        // failure here means the message contract was violated upstream
        let msg = unwrap!(
            str::from_utf8(data),
            "breakpoint assertion message is not valid utf8"
        );
        error!("{msg}");
    }
}
