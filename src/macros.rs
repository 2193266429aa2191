// Logging macros that capture the call site

/// The current source location as a [`Location`](crate::Location)
#[macro_export]
macro_rules! here {
    () => {
        $crate::Location::new(file!(), line!())
    };
}

/// Log at a verbosity level; the message is only formatted if it will be emitted
///
/// # Examples
/// ```ignore
/// vlog!(sink, 2, "accepted connection from {}", peer);
/// ```
#[macro_export]
macro_rules! vlog {
    ($sink:expr, $level:expr, $($arg:tt)+) => {{
        let level: i32 = $level;
        if $sink.enabled(level) {
            $sink.vlog(Some($crate::here!()), level, format!($($arg)+));
        }
    }};
}

/// Log at the default level
///
/// # Examples
/// ```ignore
/// log_print!(sink, "listening on {}", addr);
/// ```
#[macro_export]
macro_rules! log_print {
    ($sink:expr, $($arg:tt)+) => {
        $crate::vlog!($sink, $crate::record::LEVEL_INFO, $($arg)+)
    };
}

/// Log one in every `n` calls from this call site
///
/// # Examples
/// ```ignore
/// nlog!(sink, 100, 1, "queue depth {}", depth);
/// ```
#[macro_export]
macro_rules! nlog {
    ($sink:expr, $n:expr, $level:expr, $($arg:tt)+) => {{
        let location = $crate::here!();
        if $sink.nlog_due(location, $n) {
            let level: i32 = $level;
            if $sink.enabled(level) {
                $sink.vlog(Some(location), level, format!($($arg)+));
            }
        }
    }};
}

/// Log a fatal line, flush the sink and exit the process
///
/// # Examples
/// ```ignore
/// fatal!(sink, "cannot bind {}: {}", addr, err);
/// ```
#[macro_export]
macro_rules! fatal {
    ($sink:expr, $($arg:tt)+) => {
        $sink.fatal(Some($crate::here!()), format!($($arg)+))
    };
}
