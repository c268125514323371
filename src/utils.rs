//! # Utility Functions and Helper Module
//!
//! Helpers shared across the harness: identifiers, human-readable formatting,
//! order statistics for latency analysis, input validation and console table
//! output.
//!
//! ## Statistics
//!
//! Percentiles use the **nearest-rank** method with no interpolation. For `n`
//! sorted samples the p-th percentile is the sample at rank
//! `ceil(p / 100 * n)` (clamped to `1..=n`). This keeps every reported value
//! an actually observed latency, which matters when a configuration has only a
//! handful of repetitions.
//!
//! ```rust
//! use voice_latency_harness::utils::{median, percentile};
//!
//! let mut samples = vec![100.0; 9];
//! samples.push(1000.0);
//! assert_eq!(percentile(&samples, 99.0), 1000.0);
//! assert_eq!(median(&samples), 100.0);
//! ```

use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for results and runs
///
/// ## Returns
/// String representation of a UUID v4 (e.g., "550e8400-e29b-41d4-a716-446655440000")
pub fn generate_test_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a millisecond latency for display
///
/// Sub-millisecond values keep two decimals, values up to ten seconds keep
/// one, anything longer is shown in seconds.
///
/// ## Examples
///
/// ```rust
/// # use voice_latency_harness::utils::format_latency_ms;
/// assert_eq!(format_latency_ms(0.25), "0.25ms");
/// assert_eq!(format_latency_ms(412.37), "412.4ms");
/// assert_eq!(format_latency_ms(12_500.0), "12.50s");
/// ```
pub fn format_latency_ms(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.2}ms", ms)
    } else if ms < 10_000.0 {
        format!("{:.1}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

/// Format a duration in a human-readable way
///
/// ## Unit Selection Logic
///
/// - **Milliseconds**: < 1 s (e.g., "250.00ms")
/// - **Seconds**: < 60 s (e.g., "5.25s")
/// - **Minutes and Hours**: longer durations (e.g., "5m 30s", "2h 15m 30s")
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_secs_f64() * 1000.0;

    if total_ms < 1000.0 {
        format!("{:.2}ms", total_ms)
    } else if total_ms < 60_000.0 {
        format!("{:.2}s", total_ms / 1000.0)
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

/// Format a size given in megabytes, switching to GB above 1024 MB
pub fn format_memory_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{:.1} MB", mb)
    }
}

/// Sort a copy of `values` ascending. NaN sorts last.
fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Nearest-rank percentile of an already sorted slice
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

/// Nearest-rank percentile, `p` in 0.0..=100.0. Returns 0.0 for no samples.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    percentile_sorted(&sorted(values), p)
}

/// Nearest-rank median (the p50 sample)
pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Arithmetic mean, 0.0 for no samples
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator). 0.0 below two samples.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let variance =
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Validate a background-loop interval
///
/// Intervals must be at least 10 ms so sampling and probing stay negligible
/// next to the stages being measured, and at most one hour.
pub fn validate_interval(name: &str, interval: Duration) -> Result<()> {
    if interval < Duration::from_millis(10) {
        anyhow::bail!("{} of {:?} is too short (minimum 10ms)", name, interval);
    }
    if interval > Duration::from_secs(3600) {
        anyhow::bail!("{} of {:?} is too long (maximum 1h)", name, interval);
    }
    Ok(())
}

/// Validate an HTTP(S) endpoint URL
pub fn validate_endpoint(url: &str) -> Result<()> {
    let host = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match host {
        None => anyhow::bail!("Endpoint '{}' must start with http:// or https://", url),
        Some(rest) if rest.trim_matches('/').is_empty() => {
            anyhow::bail!("Endpoint '{}' has no host", url)
        }
        Some(_) => Ok(()),
    }
}

/// Print a formatted table row
///
/// Each column is left-aligned and padded to its width. Missing widths fall
/// back to 10 characters.
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    print!("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        print!(" {:width$} |", column, width = width);
    }
    println!();
}

/// Print a table separator matching `widths`
pub fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}", "-".repeat(width + 2));
        print!("+");
    }
    println!();
}

/// Create a progress bar-like indicator
///
/// ```rust
/// # use voice_latency_harness::utils::create_progress_indicator;
/// assert_eq!(create_progress_indicator(0, 100, 10), "░░░░░░░░░░");
/// assert_eq!(create_progress_indicator(50, 100, 10), "█████░░░░░");
/// assert_eq!(create_progress_indicator(100, 100, 10), "██████████");
/// ```
pub fn create_progress_indicator(current: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return "█".repeat(width);
    }

    let progress = (current as f64 / total as f64).min(1.0);
    let filled = ((progress * width as f64) as usize).min(width);
    let empty = width - filled;

    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_latency_ms() {
        assert_eq!(format_latency_ms(0.5), "0.50ms");
        assert_eq!(format_latency_ms(150.0), "150.0ms");
        assert_eq!(format_latency_ms(10_000.0), "10.00s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250.00ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_memory_mb() {
        assert_eq!(format_memory_mb(212.0), "212.0 MB");
        assert_eq!(format_memory_mb(2048.0), "2.00 GB");
    }

    /// Nearest rank never interpolates between samples
    #[test]
    fn test_nearest_rank_percentiles() {
        let mut values = vec![100.0; 9];
        values.push(1000.0);
        assert_eq!(percentile(&values, 99.0), 1000.0);
        assert_eq!(percentile(&values, 90.0), 100.0);
        assert_eq!(median(&values), 100.0);

        let values = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(median(&values), 3.0);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 5.0);

        // Even count: lower middle sample
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.0);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_sample_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        // Sample variance = 32 / 7
        assert!((sample_std_dev(&values) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(sample_std_dev(&[42.0]), 0.0);
    }

    #[test]
    fn test_validate_interval() {
        assert!(validate_interval("sample interval", Duration::from_millis(100)).is_ok());
        assert!(validate_interval("sample interval", Duration::from_millis(1)).is_err());
        assert!(validate_interval("probe interval", Duration::from_secs(7200)).is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("http://localhost:8766/api").is_ok());
        assert!(validate_endpoint("https://metrics.example.com").is_ok());
        assert!(validate_endpoint("ftp://example.com").is_err());
        assert!(validate_endpoint("http://").is_err());
    }

    #[test]
    fn test_create_progress_indicator() {
        assert_eq!(create_progress_indicator(0, 100, 10), "░░░░░░░░░░");
        assert_eq!(create_progress_indicator(50, 100, 10), "█████░░░░░");
        assert_eq!(create_progress_indicator(100, 100, 10), "██████████");
        assert_eq!(create_progress_indicator(3, 0, 4), "████");
    }
}
