//! Result records, cross-client rollups and output handling.
//!
//! Workers report one record each: publishers a `PublisherResult`,
//! subscribers a `SubscriberReport`. Aggregation pairs every report with the
//! publisher of the same id to build a `SubscriberResult`, then computes the
//! two totals. Field names of the serialized records are a stable contract
//! with downstream tooling and must not change.

use crate::cli::OutputFormat;
use crate::metrics::{mean, ratio, sample_std_dev, SampleStats};
use crate::utils::{
    format_latency_ms, format_message_rate, format_percent, table_row, table_separator,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Summary of one publisher worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherResult {
    pub id: usize,
    #[serde(rename = "actual_published")]
    pub successes: u64,
    pub failures: u64,
    /// Seconds from the first publish to the end of the loop
    pub run_time: f64,
    pub pub_time_min: f64,
    pub pub_time_max: f64,
    pub pub_time_mean: f64,
    pub pub_time_std: f64,
    #[serde(rename = "publish_per_sec")]
    pub pubs_per_sec: f64,
}

impl PublisherResult {
    /// Build a result from counters and publish latency statistics
    pub fn new(
        id: usize,
        successes: u64,
        failures: u64,
        run_time: Duration,
        stats: SampleStats,
    ) -> Self {
        Self {
            id,
            successes,
            failures,
            run_time: run_time.as_secs_f64(),
            pub_time_min: stats.min,
            pub_time_max: stats.max,
            pub_time_mean: stats.mean,
            pub_time_std: stats.std_dev,
            pubs_per_sec: ratio(successes as f64, run_time.as_secs_f64()),
        }
    }
}

/// What a subscriber worker knows when it stops
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberReport {
    pub id: usize,
    pub received: u64,
    pub fwd: SampleStats,
}

/// Summary of one subscriber, matched against its publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberResult {
    pub id: usize,
    #[serde(rename = "actual_published")]
    pub published: u64,
    pub received: u64,
    #[serde(rename = "fwd_success_ratio")]
    pub fwd_ratio: f64,
    pub fwd_time_min: f64,
    pub fwd_time_max: f64,
    pub fwd_time_mean: f64,
    pub fwd_time_std: f64,
}

impl SubscriberResult {
    /// Pair a report with the success count of the publisher sharing its id.
    ///
    /// Without a matching publisher, `published` and the ratio stay zero.
    pub fn matched(report: &SubscriberReport, publisher: Option<&PublisherResult>) -> Self {
        let published = publisher.map(|p| p.successes).unwrap_or(0);
        Self {
            id: report.id,
            published,
            received: report.received,
            fwd_ratio: ratio(report.received as f64, published as f64),
            fwd_time_min: report.fwd.min,
            fwd_time_max: report.fwd.max,
            fwd_time_mean: report.fwd.mean,
            fwd_time_std: report.fwd.std_dev,
        }
    }
}

/// Build the matched subscriber records
pub fn match_subscribers(
    reports: &[SubscriberReport],
    publishers: &[PublisherResult],
) -> Vec<SubscriberResult> {
    reports
        .iter()
        .map(|report| {
            let publisher = publishers.iter().find(|p| p.id == report.id);
            if publisher.is_none() {
                debug!("No publisher result for subscriber {}", report.id);
            }
            SubscriberResult::matched(report, publisher)
        })
        .collect()
}

/// Publisher rollup over all clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishTotals {
    #[serde(rename = "publish_success_ratio")]
    pub pub_ratio: f64,
    pub successes: u64,
    pub failures: u64,
    pub total_run_time: f64,
    pub avg_run_time: f64,
    pub pub_time_min: f64,
    pub pub_time_max: f64,
    pub pub_time_mean_avg: f64,
    pub pub_time_mean_std: f64,
    pub total_msgs_per_sec: f64,
    pub avg_msgs_per_sec: f64,
}

impl PublishTotals {
    /// Roll up publisher results.
    ///
    /// The success ratio is taken over the summed counters, never averaged
    /// from per-client ratios. Min/max only consider publishers that recorded
    /// at least one latency sample; mean and std are over per-client means.
    pub fn calculate(results: &[PublisherResult], total_run_time: Duration) -> Self {
        let successes: u64 = results.iter().map(|r| r.successes).sum();
        let failures: u64 = results.iter().map(|r| r.failures).sum();

        let sampled: Vec<&PublisherResult> = results.iter().filter(|r| r.successes > 0).collect();
        let (pub_time_min, pub_time_max) =
            min_max(sampled.iter().map(|r| (r.pub_time_min, r.pub_time_max)));

        let means: Vec<f64> = results.iter().map(|r| r.pub_time_mean).collect();
        let rates: Vec<f64> = results.iter().map(|r| r.pubs_per_sec).collect();
        let run_times: Vec<f64> = results.iter().map(|r| r.run_time).collect();

        Self {
            pub_ratio: ratio(successes as f64, (successes + failures) as f64),
            successes,
            failures,
            total_run_time: total_run_time.as_secs_f64(),
            avg_run_time: mean(&run_times),
            pub_time_min,
            pub_time_max,
            pub_time_mean_avg: mean(&means),
            pub_time_mean_std: sample_std_dev(&means),
            total_msgs_per_sec: rates.iter().sum(),
            avg_msgs_per_sec: mean(&rates),
        }
    }
}

/// Subscriber rollup over all clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiveTotals {
    #[serde(rename = "fwd_success_ratio")]
    pub fwd_ratio: f64,
    #[serde(rename = "successes")]
    pub received: u64,
    #[serde(rename = "actual_total_published")]
    pub published: u64,
    pub fwd_latency_min: f64,
    pub fwd_latency_max: f64,
    pub fwd_latency_mean_avg: f64,
    pub fwd_latency_mean_std: f64,
}

impl ReceiveTotals {
    /// Roll up matched subscriber records.
    ///
    /// Min/max come from the worker reports and only consider subscribers
    /// that recorded at least one forward latency sample; deliveries that
    /// could not be decoded are received but carry no sample.
    pub fn calculate(results: &[SubscriberResult], reports: &[SubscriberReport]) -> Self {
        let received: u64 = results.iter().map(|r| r.received).sum();
        let published: u64 = results.iter().map(|r| r.published).sum();

        let (fwd_latency_min, fwd_latency_max) = min_max(
            reports
                .iter()
                .filter(|r| r.fwd.count > 0)
                .map(|r| (r.fwd.min, r.fwd.max)),
        );
        let means: Vec<f64> = results.iter().map(|r| r.fwd_time_mean).collect();

        Self {
            fwd_ratio: ratio(received as f64, published as f64),
            received,
            published,
            fwd_latency_min,
            fwd_latency_max,
            fwd_latency_mean_avg: mean(&means),
            fwd_latency_mean_std: sample_std_dev(&means),
        }
    }
}

/// Smallest min and largest max over per-client pairs, zeros when empty
fn min_max(pairs: impl Iterator<Item = (f64, f64)>) -> (f64, f64) {
    pairs
        .fold(None, |acc: Option<(f64, f64)>, (min, max)| match acc {
            None => Some((min, max)),
            Some((lo, hi)) => Some((lo.min(min), hi.max(max))),
        })
        .unwrap_or((0.0, 0.0))
}

/// The full output of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    #[serde(rename = "publish runs")]
    pub publish_runs: Vec<PublisherResult>,
    #[serde(rename = "subscribe runs")]
    pub subscribe_runs: Vec<SubscriberResult>,
    #[serde(rename = "publish totals")]
    pub publish_totals: PublishTotals,
    #[serde(rename = "receive totals")]
    pub receive_totals: ReceiveTotals,
}

impl ResultDocument {
    /// Match, roll up and order the collected worker records
    pub fn assemble(
        mut publishers: Vec<PublisherResult>,
        reports: Vec<SubscriberReport>,
        total_run_time: Duration,
    ) -> Self {
        publishers.sort_by_key(|r| r.id);
        let mut subscribers = match_subscribers(&reports, &publishers);
        subscribers.sort_by_key(|r| r.id);

        Self {
            publish_totals: PublishTotals::calculate(&publishers, total_run_time),
            receive_totals: ReceiveTotals::calculate(&subscribers, &reports),
            publish_runs: publishers,
            subscribe_runs: subscribers,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize result document")
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize result document")
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse result document")
    }

    /// Per-client tables followed by the totals
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        let pub_widths = [4, 10, 8, 10, 12, 12, 12, 14];
        out.push_str("Publishers\n");
        out.push_str(&table_separator(&pub_widths));
        out.push('\n');
        out.push_str(&table_row(
            &["id", "published", "failed", "run time", "min", "max", "mean", "rate"],
            &pub_widths,
        ));
        out.push('\n');
        out.push_str(&table_separator(&pub_widths));
        out.push('\n');
        for r in &self.publish_runs {
            out.push_str(&table_row(
                &[
                    r.id.to_string(),
                    r.successes.to_string(),
                    r.failures.to_string(),
                    format!("{:.3}s", r.run_time),
                    format_latency_ms(r.pub_time_min),
                    format_latency_ms(r.pub_time_max),
                    format_latency_ms(r.pub_time_mean),
                    format_message_rate(r.pubs_per_sec),
                ],
                &pub_widths,
            ));
            out.push('\n');
        }
        out.push_str(&table_separator(&pub_widths));
        out.push_str("\n\n");

        let sub_widths = [4, 10, 10, 10, 12, 12, 12];
        out.push_str("Subscribers\n");
        out.push_str(&table_separator(&sub_widths));
        out.push('\n');
        out.push_str(&table_row(
            &["id", "published", "received", "ratio", "min", "max", "mean"],
            &sub_widths,
        ));
        out.push('\n');
        out.push_str(&table_separator(&sub_widths));
        out.push('\n');
        for r in &self.subscribe_runs {
            out.push_str(&table_row(
                &[
                    r.id.to_string(),
                    r.published.to_string(),
                    r.received.to_string(),
                    format_percent(r.fwd_ratio),
                    format_latency_ms(r.fwd_time_min),
                    format_latency_ms(r.fwd_time_max),
                    format_latency_ms(r.fwd_time_mean),
                ],
                &sub_widths,
            ));
            out.push('\n');
        }
        out.push_str(&table_separator(&sub_widths));
        out.push_str("\n\n");

        let p = &self.publish_totals;
        out.push_str("Publish totals\n");
        out.push_str(&format!(
            "  Success ratio:    {} ({} ok, {} failed)\n",
            format_percent(p.pub_ratio),
            p.successes,
            p.failures
        ));
        out.push_str(&format!(
            "  Run time:         {:.3}s total, {:.3}s avg\n",
            p.total_run_time, p.avg_run_time
        ));
        out.push_str(&format!(
            "  Publish latency:  min {}, max {}, mean {} (std {})\n",
            format_latency_ms(p.pub_time_min),
            format_latency_ms(p.pub_time_max),
            format_latency_ms(p.pub_time_mean_avg),
            format_latency_ms(p.pub_time_mean_std)
        ));
        out.push_str(&format!(
            "  Throughput:       {} total, {} avg\n\n",
            format_message_rate(p.total_msgs_per_sec),
            format_message_rate(p.avg_msgs_per_sec)
        ));

        let s = &self.receive_totals;
        out.push_str("Receive totals\n");
        out.push_str(&format!(
            "  Forward ratio:    {} ({} of {} received)\n",
            format_percent(s.fwd_ratio),
            s.received,
            s.published
        ));
        out.push_str(&format!(
            "  Forward latency:  min {}, max {}, mean {} (std {})\n",
            format_latency_ms(s.fwd_latency_min),
            format_latency_ms(s.fwd_latency_max),
            format_latency_ms(s.fwd_latency_mean_avg),
            format_latency_ms(s.fwd_latency_mean_std)
        ));
        out
    }
}

/// Writes the result document to a file or stdout
pub struct ResultsManager {
    output_file: Option<PathBuf>,
    format: OutputFormat,
}

impl ResultsManager {
    /// Create a new results manager; `None` writes to stdout
    pub fn new(output_file: Option<&Path>, format: OutputFormat) -> Self {
        Self {
            output_file: output_file.map(Path::to_path_buf),
            format,
        }
    }

    fn render(&self, document: &ResultDocument) -> Result<String> {
        match self.format {
            OutputFormat::Json => document.to_json_pretty(),
            OutputFormat::Text => Ok(document.render_text()),
        }
    }

    /// Render and write the document
    pub fn write(&self, document: &ResultDocument) -> Result<()> {
        let rendered = self.render(document)?;

        match &self.output_file {
            Some(path) => {
                std::fs::write(path, rendered)
                    .with_context(|| format!("Failed to write results to {}", path.display()))?;
                info!("Results written to: {:?}", path);
            }
            None => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                writeln!(handle, "{}", rendered).context("Failed to write results to stdout")?;
                handle.flush()?;
            }
        }
        Ok(())
    }
}
