//! Process configuration, resolved from flags with environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Command-line surface of the processor. Every flag falls back to an
/// environment variable so container deployments can configure the process
/// without argument plumbing.
#[derive(Parser, Debug, Clone)]
#[command(name = "tracepath", about = "Trace path extraction processor")]
pub struct Args {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    pub nats_url: String,

    /// Subject carrying OTLP span payloads
    #[arg(long, env = "NATS_SUBJECT", default_value = "traces.service")]
    pub nats_subject: String,

    /// Subject carrying HTTP access-log entries
    #[arg(long, env = "NATS_LOG_SUBJECT", default_value = "logs")]
    pub nats_log_subject: String,

    /// Quiescence window and flush tick, in seconds
    #[arg(long, env = "BUFFER_TIME", default_value_t = 5)]
    pub buffer_time: u64,

    /// HTTP bind address for scrape-format metrics
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:2112")]
    pub metrics_addr: String,

    /// Drain deadline after the shutdown signal, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE", default_value_t = 10)]
    pub shutdown_grace: u64,

    /// SQLite database holding the catalogue and event stores
    #[arg(long, env = "DB_PATH", default_value = "tracepath.db")]
    pub db_path: PathBuf,

    /// Capacity of the flusher→processor bundle channel; on overflow the
    /// oldest bundles are dropped
    #[arg(long, env = "BUNDLE_CAPACITY", default_value_t = 256)]
    pub bundle_capacity: usize,
}

impl Args {
    pub fn buffer_window(&self) -> Duration {
        Duration::from_secs(self.buffer_time)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_configuration() {
        let args = Args::parse_from(["tracepath"]);
        assert_eq!(args.nats_url, "nats://localhost:4222");
        assert_eq!(args.nats_subject, "traces.service");
        assert_eq!(args.nats_log_subject, "logs");
        assert_eq!(args.buffer_window(), Duration::from_secs(5));
        assert_eq!(args.metrics_addr, "0.0.0.0:2112");
        assert_eq!(args.shutdown_deadline(), Duration::from_secs(10));
        assert_eq!(args.bundle_capacity, 256);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "tracepath",
            "--nats-url",
            "nats://bus:4222",
            "--buffer-time",
            "30",
            "--db-path",
            "/tmp/t.db",
        ]);
        assert_eq!(args.nats_url, "nats://bus:4222");
        assert_eq!(args.buffer_window(), Duration::from_secs(30));
        assert_eq!(args.db_path, PathBuf::from("/tmp/t.db"));
    }
}
