//! Utility functions for image serving
//!
//! This module provides small helpers used throughout the serving workspace.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{Result, ServingError};

/// Formats a byte size into a human-readable string
///
/// # Examples
///
/// ```
/// use common::utils::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.0 KiB");
/// assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Formats a duration into a human-readable string
///
/// # Examples
///
/// ```
/// use common::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs == 0 {
        return format!("{}ms", duration.subsec_millis());
    }

    let minutes = total_secs / 60;
    let seconds = total_secs % 60;

    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Executes a future with a timeout
///
/// On expiry the error is built with `on_timeout`, so each call site keeps its
/// own place in the error taxonomy (a fetch timeout is a transport error, an
/// inference timeout is an inference error).
///
/// # Examples
///
/// ```
/// use common::utils::execute_with_timeout;
/// use common::ServingError;
/// use std::time::Duration;
///
/// let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// let value = rt.block_on(execute_with_timeout(
///     async { Ok(42) },
///     Duration::from_secs(1),
///     "example operation",
///     ServingError::Internal,
/// ));
/// assert_eq!(value, Ok(42));
/// ```
pub async fn execute_with_timeout<T, F>(
    future: F,
    duration: Duration,
    operation_name: &str,
    on_timeout: fn(String) -> ServingError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!(
            "Operation '{}' timed out after {}",
            operation_name,
            format_duration(duration)
        ))),
    }
}
