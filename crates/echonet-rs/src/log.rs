use crate::types::IpAndEoj;

/// Trait for values that provide metadata for device-scoped log lines.
pub trait LogMetadata {
    fn meta(&self) -> String;
}

impl LogMetadata for IpAndEoj {
    fn meta(&self) -> String {
        self.key()
    }
}

impl LogMetadata for std::net::IpAddr {
    fn meta(&self) -> String {
        self.to_string()
    }
}

// =============================================
// Logging Macros (namespaced under crate::log)
// =============================================
//
// Each macro takes an optional leading context implementing `LogMetadata`;
// the context is rendered as a `[ip eoj]` prefix so that every line about a
// remote device is greppable by its canonical key.

// ===== dev_info! =====
macro_rules! dev_info {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::info!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::info!($fmt $(, $($arg)+)?);
    }};
}

// ===== dev_warn! =====
macro_rules! dev_warn {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::warn!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::warn!($fmt $(, $($arg)+)?);
    }};
}

// ===== dev_error! =====
macro_rules! dev_error {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::error!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::error!($fmt $(, $($arg)+)?);
    }};
}

// ===== dev_debug! =====
macro_rules! dev_debug {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::debug!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::debug!($fmt $(, $($arg)+)?);
    }};
}

// ===== dev_trace! =====
macro_rules! dev_trace {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::trace!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::trace!($fmt $(, $($arg)+)?);
    }};
}

// Re-export macros for use in other files
pub(crate) use dev_info;
pub(crate) use dev_warn;
pub(crate) use dev_error;
pub(crate) use dev_debug;
pub(crate) use dev_trace;
