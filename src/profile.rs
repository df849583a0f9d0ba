// profile.rs — Per-operation timing for the separator.
//
// The separator wraps each upload, kernel enqueue and readback in a timer
// and appends `(op, duration)` here. Times are host wall-clock: an enqueue
// measures how long recording and submitting took, a readback measures the
// wait for the device plus the copy. Nothing in here touches the device,
// so `report()` never blocks on in-flight work.

use std::fmt;
use std::time::Duration;

/// Aggregate statistics for one operation name.
#[derive(Debug, Clone, PartialEq)]
pub struct OpStats {
    pub name: String,
    pub count: usize,
    pub total: Duration,
}

impl OpStats {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Aggregated profile, one row per operation in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileReport {
    pub ops: Vec<OpStats>,
}

impl ProfileReport {
    /// Sum of all recorded durations.
    pub fn total(&self) -> Duration {
        self.ops.iter().map(|o| o.total).sum()
    }

    pub fn get(&self, name: &str) -> Option<&OpStats> {
        self.ops.iter().find(|o| o.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ops.is_empty() {
            return write!(f, "no profiling data");
        }
        writeln!(f, "{:<20} {:>6} {:>12} {:>12}", "operation", "count", "total ms", "mean ms")?;
        for op in &self.ops {
            writeln!(
                f,
                "{:<20} {:>6} {:>12.3} {:>12.3}",
                op.name,
                op.count,
                op.total.as_secs_f64() * 1000.0,
                op.mean().as_secs_f64() * 1000.0,
            )?;
        }
        write!(f, "{:<20} {:>6} {:>12.3}", "total", "", self.total().as_secs_f64() * 1000.0)
    }
}

/// Ordered history of `(op, duration)` entries since the last reset.
#[derive(Debug, Clone, Default)]
pub struct Profiler {
    enabled: bool,
    entries: Vec<(&'static str, Duration)>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Profiler { enabled, entries: Vec::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append one entry. Ignored when profiling is disabled.
    pub fn record(&mut self, op: &'static str, duration: Duration) {
        if self.enabled {
            self.entries.push((op, duration));
        }
    }

    pub fn entries(&self) -> &[(&'static str, Duration)] {
        &self.entries
    }

    pub fn report(&self) -> ProfileReport {
        let mut ops: Vec<OpStats> = Vec::new();
        for &(name, d) in &self.entries {
            match ops.iter_mut().find(|o| o.name == name) {
                Some(op) => {
                    op.count += 1;
                    op.total += d;
                }
                None => ops.push(OpStats { name: name.to_string(), count: 1, total: d }),
            }
        }
        ProfileReport { ops }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_aggregates_in_first_seen_order() {
        let mut p = Profiler::new(true);
        p.record("upload", Duration::from_millis(2));
        p.record("sort", Duration::from_millis(10));
        p.record("upload", Duration::from_millis(4));

        let report = p.report();
        assert_eq!(report.ops.len(), 2);
        assert_eq!(report.ops[0].name, "upload");
        assert_eq!(report.ops[0].count, 2);
        assert_eq!(report.ops[0].total, Duration::from_millis(6));
        assert_eq!(report.ops[0].mean(), Duration::from_millis(3));
        assert_eq!(report.ops[1].name, "sort");
        assert_eq!(report.total(), Duration::from_millis(16));
    }

    #[test]
    fn test_disabled_profiler_records_nothing() {
        let mut p = Profiler::new(false);
        p.record("upload", Duration::from_millis(1));
        p.record("sort", Duration::from_millis(3));
        assert!(p.entries().is_empty());
        assert!(p.report().is_empty());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut p = Profiler::new(true);
        p.record("download", Duration::from_micros(250));
        assert_eq!(p.entries().len(), 1);
        p.reset();
        assert!(p.entries().is_empty());
        assert_eq!(p.report().to_string(), "no profiling data");
    }

    #[test]
    fn test_display_lists_every_op() {
        let mut p = Profiler::new(true);
        p.record("sort_vertical", Duration::from_micros(1500));
        let text = p.report().to_string();
        assert!(text.contains("sort_vertical"));
        assert!(text.contains("1.500"));
    }
}
