// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros that capture the call site

/// Log through `$logger` at trace level
///
/// # Examples
/// ```ignore
/// log_trace!(logger, "entering reconcile loop");
/// ```
#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $msg:expr) => {
        $logger.log(
            $msg,
            $crate::Level::Trace,
            $crate::SourceLocation::new(file!(), line!(), module_path!()),
        )
    };
}

/// Log through `$logger` at debug level
///
/// # Examples
/// ```ignore
/// log_debug!(logger, "cache miss");
/// ```
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $msg:expr) => {
        $logger.log(
            $msg,
            $crate::Level::Debug,
            $crate::SourceLocation::new(file!(), line!(), module_path!()),
        )
    };
}

/// Log through `$logger` at info level
///
/// # Examples
/// ```ignore
/// log_info!(logger, "listener started");
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $msg:expr) => {
        $logger.log(
            $msg,
            $crate::Level::Info,
            $crate::SourceLocation::new(file!(), line!(), module_path!()),
        )
    };
}

/// Log through `$logger` at warn level
///
/// # Examples
/// ```ignore
/// log_warn!(logger, "queue near capacity");
/// ```
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $msg:expr) => {
        $logger.log(
            $msg,
            $crate::Level::Warn,
            $crate::SourceLocation::new(file!(), line!(), module_path!()),
        )
    };
}

/// Log through `$logger` at error level
///
/// # Examples
/// ```ignore
/// log_error!(logger, "failed to open sink file");
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $msg:expr) => {
        $logger.log(
            $msg,
            $crate::Level::Error,
            $crate::SourceLocation::new(file!(), line!(), module_path!()),
        )
    };
}

/// Log through `$logger` at fatal level
///
/// # Examples
/// ```ignore
/// log_fatal!(logger, "record pool corrupted");
/// ```
#[macro_export]
macro_rules! log_fatal {
    ($logger:expr, $msg:expr) => {
        $logger.log(
            $msg,
            $crate::Level::Fatal,
            $crate::SourceLocation::new(file!(), line!(), module_path!()),
        )
    };
}

/// Log with structured fields
///
/// # Examples
/// ```ignore
/// log_data!(logger, Level::Info, "packet relayed",
///           "bytes" => 1500u64, "iface" => "eth0");
/// ```
#[macro_export]
macro_rules! log_data {
    ($logger:expr, $level:expr, $msg:expr, $($key:expr => $value:expr),+ $(,)?) => {{
        let mut data = $crate::StructuredData::new();
        $(data.add($key, $value);)+
        $logger.log_with(
            $msg,
            &data,
            $level,
            $crate::SourceLocation::new(file!(), line!(), module_path!()),
        )
    }};
}
