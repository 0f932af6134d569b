//! # Utility Functions and Helper Module
//!
//! Small helpers shared by the workers, the orchestrator and the output code.
//!
//! ## Key Functionality Categories
//!
//! - **Identity**: Unique MQTT client identifiers per run
//! - **Formatting**: Human-readable display of durations, latencies and rates
//! - **Display Helpers**: Plain-text table rendering for the text output format
//!
//! ## Usage Examples
//!
//! ```rust
//! use mqtt_latency_bench::utils::*;
//! use std::time::Duration;
//!
//! let duration_str = format_duration(Duration::from_micros(1500));
//! assert_eq!(duration_str, "1.50ms");
//!
//! let rate_str = format_message_rate(1500.0);
//! assert_eq!(rate_str, "1.50K msg/s");
//! ```

use std::time::Duration;
use uuid::Uuid;

/// Role a client plays in a benchmark pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Publisher,
    Subscriber,
}

impl ClientRole {
    fn tag(self) -> &'static str {
        match self {
            ClientRole::Publisher => "pub",
            ClientRole::Subscriber => "sub",
        }
    }
}

/// Generate a unique MQTT client identifier
///
/// Brokers drop an existing session when a second client connects with the
/// same identifier, so every worker gets an id that is unique across runs as
/// well as within one.
///
/// ## Parameters
/// - `prefix`: Human-readable prefix, usually the crate name
/// - `role`: Whether the client publishes or subscribes
/// - `id`: Worker index shared by a publisher/subscriber pair
///
/// ## Returns
/// An identifier of the form `<prefix>-<pub|sub>-<id>-<8 hex chars>`
///
/// ## Length
///
/// MQTT 3.1.1 only guarantees support for identifiers up to 23 bytes. With
/// `defaults::CLIENT_ID_PREFIX` that holds for worker ids below 10000.
pub fn generate_client_id(prefix: &str, role: ClientRole, id: usize) -> String {
    let unique = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}-{}", prefix, role.tag(), id, &unique[..8])
}

/// Topic used by the worker pair `id`
///
/// ## Examples
///
/// ```rust
/// # use mqtt_latency_bench::utils::worker_topic;
/// assert_eq!(worker_topic("/test", 3), "/test-3");
/// ```
pub fn worker_topic(prefix: &str, id: usize) -> String {
    format!("{}-{}", prefix, id)
}

/// Format a duration in a human-readable way
///
/// Converts a Duration to a human-readable string, automatically selecting
/// the most appropriate unit based on the magnitude.
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use mqtt_latency_bench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_nanos(1250)), "1.25μs");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a latency given in fractional milliseconds
///
/// Result documents carry latencies as `f64` milliseconds; this maps them back
/// onto `format_duration` for display. Negative or non-finite values render
/// as zero.
pub fn format_latency_ms(ms: f64) -> String {
    if !ms.is_finite() || ms <= 0.0 {
        return format_duration(Duration::ZERO);
    }
    format_duration(Duration::from_secs_f64(ms / 1_000.0))
}

/// Format a message rate in a human-readable way
///
/// ## Unit Scaling
///
/// Uses decimal scaling (powers of 1000) for rate measurements:
/// - Messages/sec: < 1,000 (e.g., "750 msg/s")
/// - Thousands: < 1,000,000 (e.g., "15.50K msg/s")
/// - Millions: ≥ 1,000,000 (e.g., "2.30M msg/s")
///
/// ## Examples
///
/// ```rust
/// # use mqtt_latency_bench::utils::format_message_rate;
/// assert_eq!(format_message_rate(750.0), "750 msg/s");
/// assert_eq!(format_message_rate(15500.0), "15.50K msg/s");
/// assert_eq!(format_message_rate(2300000.0), "2.30M msg/s");
/// ```
pub fn format_message_rate(messages_per_second: f64) -> String {
    if messages_per_second < 1000.0 {
        format!("{:.0} msg/s", messages_per_second)
    } else if messages_per_second < 1_000_000.0 {
        format!("{:.2}K msg/s", messages_per_second / 1000.0)
    } else {
        format!("{:.2}M msg/s", messages_per_second / 1_000_000.0)
    }
}

/// Format a ratio in `[0, 1]` as a percentage
pub fn format_percent(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

/// Render a table row with consistent column widths
///
/// ## Formatting
///
/// - **Alignment**: Left-aligned text with padding
/// - **Borders**: Pipe characters (|) separate columns
/// - **Missing Widths**: Columns without a width fall back to 10 characters
///
/// ## Examples
///
/// ```rust
/// # use mqtt_latency_bench::utils::table_row;
/// assert_eq!(table_row(&["id", "rate"], &[4, 6]), "| id   | rate   |");
/// ```
pub fn table_row<S: AsRef<str>>(columns: &[S], widths: &[usize]) -> String {
    let mut row = String::from("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        row.push_str(&format!(" {:width$} |", column.as_ref(), width = width));
    }
    row
}

/// Render a table separator matching `table_row` widths
///
/// ## Visual Example
///
/// ```text
/// +------+--------+
/// | id   | rate   |
/// +------+--------+
/// ```
pub fn table_separator(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for &width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}
