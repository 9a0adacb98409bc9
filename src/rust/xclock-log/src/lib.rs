// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::sync::{atomic::AtomicBool, atomic::Ordering};

#[doc(hidden)]
pub use log as _log;

pub use log::LevelFilter;

#[macro_export]
macro_rules! debug {
    ($msg:literal, $($arg:tt)+) => {
        xclock_log::_log::debug!(target: concat!("xclock.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        xclock_log::_log::debug!(target: concat!("xclock.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        xclock_log::_log::info!(target: concat!("xclock.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        xclock_log::_log::info!(target: concat!("xclock.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        xclock_log::_log::warn!(target: concat!("xclock.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        xclock_log::_log::warn!(target: concat!("xclock.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! error {
    ($msg:literal, $($arg:tt)+) => {
        xclock_log::_log::error!(target: concat!("xclock.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        xclock_log::_log::error!(target: concat!("xclock.rust::", module_path!()), $msg);
    };
}

/// Log a diagnostic message at info level if diagnostics logging is enabled.
///
/// Used for per-batch acquisition detail that would flood the log otherwise.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if xclock_log::is_diagnostics_enabled() {
             xclock_log::_log::info!(target: concat!("xclock.rust::", module_path!()), $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if xclock_log::is_diagnostics_enabled() {
            xclock_log::_log::info!(target: concat!("xclock.rust::", module_path!()), $msg);
        }
    };
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS_ENABLED.load(Ordering::Acquire)
}

/// Enable or disable diagnostics logging without touching the logger backend.
pub fn set_diagnostics_enabled(enabled: bool) {
    DIAGNOSTICS_ENABLED.store(enabled, Ordering::Release);
}

/// Initialize the logging.
///
/// Installs an `env_logger` backend filtering `xclock.rust` targets at `level`.
/// A `RUST_LOG` environment variable, when present, takes precedence over
/// `level`. Calling this more than once only updates the diagnostics flag, as
/// the global logger can be installed exactly once per process.
pub fn init_logging(level: LevelFilter, with_diagnostics: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_module("xclock.rust", level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // Another logger may already be installed by the host application.
    let _ = builder.try_init();
    set_diagnostics_enabled(with_diagnostics);
}
