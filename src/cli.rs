use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// MQTT Latency Benchmark - paired publishers and subscribers measuring forwarding latency
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Broker address (tcp://host:port, mqtt://host:port, host:port or loopback://name)
    #[clap(short = 'b', long, default_value = crate::defaults::BROKER, help_heading = "Broker")]
    pub broker: String,

    /// Username for broker authentication
    #[clap(long, help_heading = "Broker")]
    pub username: Option<String>,

    /// Password for broker authentication
    #[clap(long, help_heading = "Broker")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[clap(long = "keepalive", default_value_t = crate::defaults::KEEP_ALIVE_SECS, help_heading = "Broker")]
    pub keep_alive: u64,

    /// Topic prefix; client i publishes and subscribes on "<topic>-<i>"
    #[clap(short = 't', long, default_value = crate::defaults::TOPIC, help_heading = "Workload")]
    pub topic: String,

    /// QoS level for publishing and subscribing (0, 1 or 2)
    #[clap(short = 'q', long, default_value_t = crate::defaults::QOS, value_parser = clap::value_parser!(u8).range(0..=2), help_heading = "Workload")]
    pub qos: u8,

    /// Payload filler size in bytes
    #[clap(short = 's', long, default_value_t = crate::defaults::PAYLOAD_SIZE, help_heading = "Workload")]
    pub size: usize,

    /// Number of messages each publisher sends
    #[clap(short = 'n', long, default_value_t = crate::defaults::MSG_COUNT, help_heading = "Workload")]
    pub count: usize,

    /// Number of publisher/subscriber pairs
    #[clap(short = 'c', long, default_value_t = crate::defaults::CLIENTS, help_heading = "Workload")]
    pub clients: usize,

    /// Drain window between the last publish and stopping subscribers (e.g. "3s", "500ms")
    #[clap(long, value_parser = parse_duration, default_value = "3s", help_heading = "Workload")]
    pub quiescence: Duration,

    /// Output file for results (stdout when omitted)
    #[clap(short = 'o', long, help_heading = "Output")]
    pub output: Option<PathBuf>,

    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Json, help_heading = "Output")]
    pub format: OutputFormat,

    /// Suppress progress logging
    #[clap(long, default_value_t = false, help_heading = "Output")]
    pub quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,

    /// Write logs to this file instead of stderr
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            broker: crate::defaults::BROKER.to_string(),
            username: None,
            password: None,
            keep_alive: crate::defaults::KEEP_ALIVE_SECS,
            topic: crate::defaults::TOPIC.to_string(),
            qos: crate::defaults::QOS,
            size: crate::defaults::PAYLOAD_SIZE,
            count: crate::defaults::MSG_COUNT,
            clients: crate::defaults::CLIENTS,
            quiescence: crate::defaults::QUIESCENCE,
            output: None,
            format: OutputFormat::Json,
            quiet: false,
            verbose: 0,
            log_file: None,
        }
    }
}

/// How the result document is rendered
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// The JSON result document
    #[clap(name = "json")]
    Json,

    /// Human-readable tables
    #[clap(name = "text")]
    Text,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Text => write!(f, "text"),
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "500ms")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let duration = match unit {
        "ms" => Duration::from_secs_f64(num / 1_000.0),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}
