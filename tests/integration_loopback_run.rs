use anyhow::Result;
use mqtt_latency_bench::{
    broker::LoopbackBroker, run_json, BenchmarkConfig, BenchmarkRunner, ClientFactory,
    ConfigError, ResultDocument,
};
use std::sync::Arc;
use std::time::Duration;

fn config(broker: &str, clients: usize, msg_count: usize) -> BenchmarkConfig {
    let mut config = BenchmarkConfig::new(
        &format!("loopback://{}", broker),
        "/itest",
        1,
        64,
        msg_count,
        clients,
        true,
    )
    .expect("valid loopback config");
    config.quiescence = Duration::ZERO;
    config
}

/// Every client pair shows up exactly once on each side, ordered by id.
#[tokio::test]
async fn loopback_run_reports_every_client() -> Result<()> {
    let document = BenchmarkRunner::new(config("itest-every-client", 5, 40)).run().await?;

    assert_eq!(document.publish_runs.len(), 5);
    assert_eq!(document.subscribe_runs.len(), 5);
    for (i, (publisher, subscriber)) in document
        .publish_runs
        .iter()
        .zip(&document.subscribe_runs)
        .enumerate()
    {
        assert_eq!(publisher.id, i);
        assert_eq!(subscriber.id, i);
        assert_eq!(publisher.successes + publisher.failures, 40);
        assert_eq!(subscriber.published, publisher.successes);
        assert_eq!(subscriber.received, 40);
        assert_eq!(subscriber.fwd_ratio, 1.0);
        assert!(subscriber.fwd_time_min <= subscriber.fwd_time_max);
    }

    let totals = &document.publish_totals;
    assert_eq!(totals.successes, 200);
    assert_eq!(totals.failures, 0);
    assert_eq!(totals.pub_ratio, 1.0);
    assert!(totals.total_run_time >= 0.0);
    assert_eq!(document.receive_totals.published, 200);
    assert_eq!(document.receive_totals.received, 200);
    Ok(())
}

/// The serialized entry point produces a document that parses back intact.
#[tokio::test]
async fn run_json_round_trips() -> Result<()> {
    let bytes = run_json(config("itest-json", 2, 10)).await?;

    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(value["publish runs"].as_array().map(Vec::len), Some(2));
    assert_eq!(value["subscribe runs"].as_array().map(Vec::len), Some(2));
    assert_eq!(value["publish totals"]["successes"], 20);
    assert_eq!(value["receive totals"]["actual_total_published"], 20);

    let document = ResultDocument::from_json(&bytes)?;
    assert_eq!(document.to_json()?, bytes);
    Ok(())
}

/// Zero clients is a configuration error and nothing is published.
#[tokio::test]
async fn zero_clients_is_a_config_error() {
    let broker = LoopbackBroker::new("itest-zero");
    let runner = BenchmarkRunner::with_factory(
        config("itest-zero", 0, 10),
        ClientFactory::with_loopback(Arc::clone(&broker)),
    );

    let err = runner.run().await.expect_err("zero clients must fail");
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::InvalidClientCount(0))
    );
    assert_eq!(broker.published_count(), 0);
}

/// A broker that refuses every connection still yields a complete document:
/// all messages fail and every ratio is zero rather than NaN.
#[tokio::test]
async fn refused_connections_are_counted_not_fatal() -> Result<()> {
    let broker = LoopbackBroker::new("itest-refused");
    broker.set_accepting(false);
    let runner = BenchmarkRunner::with_factory(
        config("itest-refused", 3, 7),
        ClientFactory::with_loopback(Arc::clone(&broker)),
    );

    let document = runner.run().await?;

    assert_eq!(document.publish_runs.len(), 3);
    for run in &document.publish_runs {
        assert_eq!(run.successes, 0);
        assert_eq!(run.failures, 7);
        assert_eq!(run.pubs_per_sec, 0.0);
    }
    for run in &document.subscribe_runs {
        assert_eq!(run.received, 0);
        assert_eq!(run.fwd_ratio, 0.0);
    }
    assert_eq!(document.publish_totals.pub_ratio, 0.0);
    assert_eq!(document.publish_totals.failures, 21);
    assert_eq!(document.receive_totals.fwd_ratio, 0.0);

    let json = String::from_utf8(document.to_json()?)?;
    assert!(!json.contains("NaN"));
    Ok(())
}

/// Publishing nothing is valid and produces zeroed statistics.
#[tokio::test]
async fn zero_messages_produce_zeroed_runs() -> Result<()> {
    let document = BenchmarkRunner::new(config("itest-no-messages", 2, 0)).run().await?;

    assert_eq!(document.publish_runs.len(), 2);
    assert_eq!(document.publish_totals.successes + document.publish_totals.failures, 0);
    assert_eq!(document.publish_totals.pub_ratio, 0.0);
    assert_eq!(document.receive_totals.fwd_ratio, 0.0);
    Ok(())
}
