//! Telemetry configuration shared by every binary that drives a supervisor.
//!
//! This module owns translation of the telemetry CLI flags into a
//! `TelemetryOptions` struct so callers can flatten the flags into their own
//! argument parser without re-declaring them.

use std::path::PathBuf;

use clap::Args;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Optional telemetry knobs for tracing and runtime inspection.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing supervisor and worker spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: Option<String>,
    /// Install the Prometheus recorder so counters can be dumped on exit.
    pub prometheus: bool,
}

/// CLI flags controlling logging and metrics.
#[derive(Debug, Default, Args)]
pub struct TelemetryArgs {
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset (e.g. "debug", "vision_control=trace").
    #[arg(long = "log", value_name = "FILTER")]
    pub log_filter: Option<String>,
    /// Print a Prometheus snapshot of the control-channel counters on exit.
    #[arg(long = "print-metrics", action = clap::ArgAction::SetTrue)]
    pub print_metrics: bool,
}

impl From<TelemetryArgs> for TelemetryOptions {
    fn from(args: TelemetryArgs) -> Self {
        Self {
            chrome_trace_path: args.chrome_trace,
            default_filter: args.log_filter.filter(|filter| !filter.trim().is_empty()),
            prometheus: args.print_metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_filter_is_ignored() {
        let opts = TelemetryOptions::from(TelemetryArgs {
            log_filter: Some("  ".into()),
            ..TelemetryArgs::default()
        });
        assert_eq!(opts.default_filter, None);
        assert!(!opts.prometheus);
    }

    #[test]
    fn test_flags_carry_over() {
        let opts = TelemetryOptions::from(TelemetryArgs {
            chrome_trace: Some(PathBuf::from("trace.json")),
            log_filter: Some("debug".into()),
            print_metrics: true,
        });
        assert_eq!(opts.chrome_trace_path, Some(PathBuf::from("trace.json")));
        assert_eq!(opts.default_filter.as_deref(), Some("debug"));
        assert!(opts.prometheus);
    }
}
