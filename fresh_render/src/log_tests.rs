//! Unit tests for log.rs
//!
//! Tests LogSeverity, LogEntry formatting, DefaultLogger and LogFacadeLogger.
//! The global logger is covered by tests/logging_integration_tests.rs.

use crate::log::{DefaultLogger, LogEntry, LogFacadeLogger, LogSeverity, Logger};
use std::time::{Duration, SystemTime};

fn entry(severity: LogSeverity, file: Option<&'static str>, line: Option<u32>) -> LogEntry {
    LogEntry {
        severity,
        timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        source: "fresh::test".to_string(),
        message: "swapchain rebuilt".to_string(),
        file,
        line,
    }
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_debug_names() {
    assert_eq!(format!("{:?}", LogSeverity::Trace), "Trace");
    assert_eq!(format!("{:?}", LogSeverity::Error), "Error");
}

// ============================================================================
// FORMATTING TESTS
// ============================================================================

#[test]
fn test_format_plain_without_location() {
    let line = DefaultLogger::format_plain(&entry(LogSeverity::Info, None, None));
    assert!(line.contains("[INFO ]"));
    assert!(line.contains("[fresh::test]"));
    assert!(line.ends_with("swapchain rebuilt"));
}

#[test]
fn test_format_plain_with_location() {
    let line = DefaultLogger::format_plain(&entry(LogSeverity::Error, Some("vulkan.rs"), Some(42)));
    assert!(line.contains("[ERROR]"));
    assert!(line.ends_with("swapchain rebuilt (vulkan.rs:42)"));
}

#[test]
fn test_format_plain_timestamp_shape() {
    let line = DefaultLogger::format_plain(&entry(LogSeverity::Warn, None, None));
    // "[YYYY-MM-DD HH:MM:SS.mmm]" is 25 characters including brackets
    let close = line.find(']').unwrap();
    assert_eq!(close, 24);
    assert_eq!(&line[5..6], "-");
    assert_eq!(&line[20..21], ".");
}

#[test]
fn test_location_requires_both_file_and_line() {
    let line = DefaultLogger::format_plain(&entry(LogSeverity::Error, Some("gl.rs"), None));
    assert!(!line.contains("gl.rs"));
}

// ============================================================================
// LOGGER IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_default_logger_all_severities() {
    let logger = DefaultLogger;
    for severity in [
        LogSeverity::Trace,
        LogSeverity::Debug,
        LogSeverity::Info,
        LogSeverity::Warn,
        LogSeverity::Error,
    ] {
        logger.log(&entry(severity, None, None));
        logger.log(&entry(severity, Some("test.rs"), Some(7)));
    }
}

#[test]
fn test_facade_level_mapping() {
    assert_eq!(LogFacadeLogger::level_for(LogSeverity::Trace), ::log::Level::Trace);
    assert_eq!(LogFacadeLogger::level_for(LogSeverity::Debug), ::log::Level::Debug);
    assert_eq!(LogFacadeLogger::level_for(LogSeverity::Info), ::log::Level::Info);
    assert_eq!(LogFacadeLogger::level_for(LogSeverity::Warn), ::log::Level::Warn);
    assert_eq!(LogFacadeLogger::level_for(LogSeverity::Error), ::log::Level::Error);
}

#[test]
fn test_facade_logger_without_installed_logger_is_silent() {
    LogFacadeLogger.log(&entry(LogSeverity::Error, Some("d3d12.rs"), Some(3)));
}

#[test]
fn test_loggers_are_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DefaultLogger>();
    assert_send_sync::<LogFacadeLogger>();
}
