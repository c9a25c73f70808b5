//! Breakpoint assertion and the SIGINT bridge behind it
//!
//! The assertion works by raising SIGINT at the call site. An attached
//! debugger (lldb/gdb) installs its own interception for SIGINT ahead of any
//! in-process handler, so under a debugger the raise stops the program with a
//! live stack and the in-process handler never runs. Without a debugger the
//! temporary handler installed here fires synchronously during the raise,
//! writes the formatted message to the selected sink, and the program
//! continues.
//!

use std::sync::Mutex;

use crate::sink::{BreakpointSink, StreamSink};

/// Call-site position attached to each breakpoint message
///
/// Normally captured with [`source_location!`] rather than built by hand.
///
#[derive(Clone, Debug)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
}

/// Sink pointer staged for the signal handler
///
/// A raw pointer because the handler is a context-free `extern "C"` function
/// registered into OS signal storage, so the sink cannot reach it through a
/// closure or a borrowed parameter.
struct StagedSink(*const dyn BreakpointSink);

// The staged pointer is only dereferenced by the signal handler running
// synchronously on the thread that staged it, inside the call that staged it.
unsafe impl Send for StagedSink {}

/// Process-wide slot holding the message and sink for the in-flight assertion
struct StagedSignalContext {
    message: Vec<u8>,
    sink: Option<StagedSink>,
}

/// `sink: None` selects the standard-error stream default
static STAGED_SIGNAL_CONTEXT: Mutex<StagedSignalContext> = Mutex::new(StagedSignalContext {
    message: Vec::new(),
    sink: None,
});

/// Temporary SIGINT handler writing the staged message to the staged sink
///
/// Runs in signal context, so delivery is best effort: errors cannot be
/// reported from here, and a poisoned slot lock drops the message instead of
/// unwinding across the signal boundary.
///
extern "C" fn breakpoint_signal_handler(sig: libc::c_int) {
    if sig != libc::SIGINT {
        return;
    }
    if let Ok(staged) = STAGED_SIGNAL_CONTEXT.lock() {
        match &staged.sink {
            Some(sink) => unsafe { (*sink.0).write(&staged.message) },
            None => StreamSink::stderr().write(&staged.message),
        }
    }
}

/// Halt in the debugger if one is attached, otherwise write `msg` to `sink`
///
/// The message is formatted as
/// `"<msg> (function: <function> [<file>, <line>])\r\n"` before delivery.
/// Prefer the [`assert_breakpoint!`] macro, which captures `location`
/// automatically and defaults `sink` to the structured-log sink.
///
/// Not safe to call concurrently from multiple threads: the staging slot and
/// the SIGINT disposition are process-wide, so overlapping calls can deliver
/// each other's messages. Restrict call sites to one thread at a time.
///
/// # Arguments
/// * `msg` - Message written to `sink` when no debugger is attached
/// * `sink` - Where the formatted message goes; only borrowed for the duration
///   of this call
/// * `location` - Call site reported in the formatted message
///
pub fn assert_breakpoint(msg: &str, sink: &dyn BreakpointSink, location: &SourceLocation) {
    let msg = format!(
        "{} (function: {} [{}, {}])\r\n",
        msg, location.function, location.file, location.line
    );

    // Erase the sink borrow's lifetime so it can sit in the process-wide
    // slot; the slot is cleared below before this call returns, so the
    // erased borrow never outlives the real one
    let sink: &'static dyn BreakpointSink = unsafe { std::mem::transmute(sink) };

    // Stage the message bytes and sink where the handler can reach them,
    // replacing whatever the previous call staged
    {
        let mut staged = STAGED_SIGNAL_CONTEXT.lock().unwrap();
        staged.message = msg.into_bytes();
        staged.sink = Some(StagedSink(sink));
    }

    unsafe {
        // An attached debugger intercepts SIGINT before this handler, in which
        // case raise() stops the program here and the handler never runs
        if libc::signal(
            libc::SIGINT,
            breakpoint_signal_handler as libc::sighandler_t,
        ) == libc::SIG_ERR
        {
            panic!("failed to install temporary SIGINT handler for breakpoint assertion");
        }
        libc::raise(libc::SIGINT);
        // raise() has returned, so delivery is complete (or the debugger
        // resumed us); put the default disposition back either way
        if libc::signal(libc::SIGINT, libc::SIG_DFL) == libc::SIG_ERR {
            panic!("failed to restore default SIGINT disposition after breakpoint assertion");
        }
    }

    // Clear the staged sink so the slot never outlives the sink borrow taken
    // above; the slot reverts to its standard-error default
    if let Ok(mut staged) = STAGED_SIGNAL_CONTEXT.lock() {
        staged.sink = None;
    }
}

/// Expands to the name of the enclosing function as a `&'static str`
///
#[macro_export]
macro_rules! current_function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = name.strip_suffix("::f").unwrap_or(name);
        match name.rsplit("::").next() {
            Some(tail) => tail,
            None => name,
        }
    }};
}

/// Capture the call site as a [`SourceLocation`]
///
#[macro_export]
macro_rules! source_location {
    () => {
        $crate::SourceLocation {
            file: file!(),
            line: line!(),
            function: $crate::current_function!(),
        }
    };
}

/// [`assert_breakpoint`] with call-site capture and a default sink
///
/// The one-argument form writes through [`LogSink`](crate::sink::LogSink);
/// the two-argument form takes any [`BreakpointSink`](crate::sink::BreakpointSink).
///
#[macro_export]
macro_rules! assert_breakpoint {
    ($msg:expr) => {
        $crate::assert_breakpoint($msg, &$crate::LogSink::new(), &$crate::source_location!())
    };
    ($msg:expr, $sink:expr) => {
        $crate::assert_breakpoint($msg, $sink, &$crate::source_location!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Mutex, MutexGuard};

    /// Serializes tests that raise SIGINT, since the staging slot and the
    /// signal disposition are process-wide
    static SIGNAL_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn signal_test_guard() -> MutexGuard<'static, ()> {
        SIGNAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Caller-defined sink capturing every write for inspection
    #[derive(Default)]
    struct CaptureSink {
        captured: Mutex<Vec<Vec<u8>>>,
    }

    impl CaptureSink {
        fn writes(&self) -> Vec<String> {
            self.captured
                .lock()
                .unwrap()
                .iter()
                .map(|bytes| String::from_utf8(bytes.clone()).unwrap())
                .collect()
        }
    }

    impl BreakpointSink for CaptureSink {
        fn write(&self, data: &[u8]) {
            self.captured.lock().unwrap().push(data.to_vec());
        }
    }

    #[test]
    fn test_assert_breakpoint_message_format() {
        let _guard = signal_test_guard();
        let sink = CaptureSink::default();
        let location = SourceLocation {
            file: "x",
            line: 42,
            function: "run",
        };

        assert_breakpoint("boom", &sink, &location);

        assert_eq!(sink.writes(), vec!["boom (function: run [x, 42])\r\n"]);
    }

    #[test]
    fn test_assert_breakpoint_empty_message() {
        let _guard = signal_test_guard();
        let sink = CaptureSink::default();
        let location = SourceLocation {
            file: "x",
            line: 42,
            function: "run",
        };

        assert_breakpoint("", &sink, &location);

        assert_eq!(sink.writes(), vec![" (function: run [x, 42])\r\n"]);
    }

    #[test]
    fn test_sequential_calls_deliver_to_their_own_sink() {
        let _guard = signal_test_guard();
        let sink1 = CaptureSink::default();
        let sink2 = CaptureSink::default();
        let location = SourceLocation {
            file: "x",
            line: 7,
            function: "run",
        };

        assert_breakpoint("first", &sink1, &location);
        assert_breakpoint("second", &sink2, &location);

        assert_eq!(sink1.writes(), vec!["first (function: run [x, 7])\r\n"]);
        assert_eq!(sink2.writes(), vec!["second (function: run [x, 7])\r\n"]);
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let _guard = signal_test_guard();
        let sink = CaptureSink::default();
        let location = SourceLocation {
            file: "x",
            line: 7,
            function: "run",
        };

        for _ in 0..3 {
            assert_breakpoint("again", &sink, &location);
        }

        let writes = sink.writes();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|w| w == &writes[0]));
    }

    #[test]
    fn test_sigint_disposition_restored_after_call() {
        let _guard = signal_test_guard();
        let sink = CaptureSink::default();

        assert_breakpoint("check disposition", &sink, &source_location!());

        // If the temporary handler were still installed, the previous
        // disposition observed here would be the handler, not SIG_DFL
        unsafe {
            let prev = libc::signal(libc::SIGINT, libc::SIG_IGN);
            assert_eq!(prev, libc::SIG_DFL);
            libc::signal(libc::SIGINT, prev);
        }
    }

    #[test]
    fn test_macro_captures_call_site() {
        let _guard = signal_test_guard();
        let sink = CaptureSink::default();

        assert_breakpoint!("macro message", &sink);

        let writes = sink.writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].starts_with("macro message (function: "));
        assert!(writes[0].contains("test_macro_captures_call_site"));
        assert!(writes[0].contains(file!()));
        assert!(writes[0].ends_with("\r\n"));
    }
}
