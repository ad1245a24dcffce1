use once_cell::sync::OnceCell;

static SESSION_TAG: OnceCell<String> = OnceCell::new();

/// Bind the session id that log lines are tagged with. First call wins;
/// the binding lasts for the life of the process.
pub fn bind_session(session_id: impl Into<String>) {
    let _ = SESSION_TAG.set(session_id.into());
}

pub fn session_tag() -> Option<&'static str> {
    SESSION_TAG.get().map(String::as_str)
}

/// Log through the `log` facade with the bound session tag prepended.
/// Lines emitted before a session is established carry `[unbound]`.
#[macro_export]
macro_rules! log_with_session {
    ($level:expr, $($arg:tt)+) => {{
        if log::log_enabled!($level) {
            match $crate::util::logging::session_tag() {
                Some(tag) => log::log!($level, "[{}] {}", tag, format_args!($($arg)+)),
                None => log::log!($level, "[unbound] {}", format_args!($($arg)+)),
            }
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        $crate::log_with_session!(log::Level::Error, $($arg)+)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::log_with_session!(log::Level::Warn, $($arg)+)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        $crate::log_with_session!(log::Level::Info, $($arg)+)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        $crate::log_with_session!(log::Level::Debug, $($arg)+)
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => {
        $crate::log_with_session!(log::Level::Trace, $($arg)+)
    };
}

pub use crate::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_session_binding_wins() {
        bind_session("session_first");
        bind_session("session_second");
        assert_eq!(session_tag(), Some("session_first"));
    }
}
