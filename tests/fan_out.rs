//! Fan-out timing and aggregation through the public API.

use ops_resilience::resilience::fan_out::{fan_out, FanOutTask};
use ops_resilience::{CircuitBreaker, Error, FanOut, RetryConfig, RetryExecutor};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_one_stuck_task_does_not_starve_siblings() {
    let mut tasks: Vec<FanOutTask<&'static str>> = (0..4)
        .map(|i| {
            FanOutTask::new(format!("repo-{}", i), async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("updated")
            })
        })
        .collect();
    tasks.push(FanOutTask::new("repo-stuck", futures::future::pending()));

    let start = Instant::now();
    let report = fan_out(tasks, Duration::from_millis(50)).await;
    let wall = start.elapsed();

    assert_eq!(report.total, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.outcomes.len(), 5);

    let (id, err) = report.errors().next().unwrap();
    assert_eq!(id, "repo-stuck");
    match err {
        Error::FanOutTimeout { task, timeout } => {
            assert_eq!(task, "repo-stuck");
            assert_eq!(*timeout, Duration::from_millis(50));
        }
        other => panic!("expected FanOutTimeout, got {:?}", other),
    }

    // bounded by the longest timeout, not the sum over tasks
    assert!(wall >= Duration::from_millis(50), "{:?}", wall);
    assert!(wall < Duration::from_millis(150), "{:?}", wall);
}

#[tokio::test]
async fn test_wall_clock_is_max_not_sum() {
    let tasks: Vec<FanOutTask<()>> = (0..20)
        .map(|i| {
            FanOutTask::new(format!("dashboard-{}", i), async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(())
            })
        })
        .collect();

    let report = fan_out(tasks, Duration::from_secs(1)).await;
    assert!(report.all_succeeded());
    assert_eq!(report.success_rate(), 1.0);
    assert!(report.elapsed < Duration::from_millis(300), "{:?}", report.elapsed);
}

#[tokio::test]
async fn test_outcomes_keyed_by_id_regardless_of_completion_order() {
    let delays = [40u64, 5, 25, 15];
    let tasks: Vec<FanOutTask<u64>> = delays
        .iter()
        .enumerate()
        .map(|(i, &ms)| {
            FanOutTask::new(format!("t{}", i), async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
        })
        .collect();

    let report = fan_out(tasks, Duration::from_secs(1)).await;
    for (i, &ms) in delays.iter().enumerate() {
        let outcome = report.outcome(&format!("t{}", i)).unwrap();
        assert_eq!(*outcome.result.as_ref().unwrap(), ms);
    }
}

#[tokio::test]
async fn test_resilience_wrapped_tasks() {
    // chart repository refresh: each repo gets its own breaker and a retried call
    let retry = Arc::new(RetryExecutor::new(
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(5))
            .with_jitter(false),
    ));

    let mut tasks = Vec::new();
    for (name, healthy) in [("bitnami", true), ("jetstack", false), ("grafana", true)] {
        let breaker = Arc::new(CircuitBreaker::with_defaults(name, 5, Duration::from_secs(30)));
        let retry = Arc::clone(&retry);
        tasks.push(FanOutTask::new(name, async move {
            retry
                .execute(|| {
                    let breaker = Arc::clone(&breaker);
                    async move {
                        breaker
                            .call(|| async {
                                if healthy {
                                    Ok(())
                                } else {
                                    Err(Error::from_http_status(503, "index.yaml unavailable"))
                                }
                            })
                            .await
                    }
                })
                .await
        }));
    }

    let report = FanOut::new(Duration::from_secs(2)).run(tasks).await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.outcome("jetstack").unwrap().error(),
        Some(Error::RetryExhausted { attempts: 3, .. })
    ));
}
