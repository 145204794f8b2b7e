use super::*;
use crate::error::{ScoreError, TunnelStage};
use crate::exec::StreamEvent;
use crate::health::{ComponentStatus, HealthRegistry};
use crate::predictor::Verdict;
use crate::testing::{test_runner, FakeScorer, FakeTransport, STATS_OUTPUT};
use std::time::Duration;

fn orchestrator(
    transport: FakeTransport,
    scorer: FakeScorer,
) -> MetricsOrchestrator<FakeTransport, FakeScorer> {
    MetricsOrchestrator::new(test_runner(transport), scorer)
}

fn completed(outcome: PollOutcome) -> Vec<ContainerRecord> {
    match outcome {
        PollOutcome::Completed(records) => records,
        PollOutcome::AlreadyInFlight => panic!("poll was skipped"),
    }
}

/// Flags containers above 90% CPU
fn cpu_scorer() -> FakeScorer {
    FakeScorer::new(|input| {
        Ok(if input.cpu_perc > 90.0 {
            Verdict::Anomalous
        } else {
            Verdict::Normal
        })
    })
}

#[tokio::test]
async fn test_poll_skips_malformed_lines_and_keeps_order() {
    let transport = FakeTransport::new().respond_stdout(STATS_OUTPUT);
    let scorer = cpu_scorer();
    let orchestrator = orchestrator(transport.clone(), scorer.clone());

    let records = completed(orchestrator.poll_vm("vm1").await.unwrap());

    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "b2", "d4"]);
    assert!(records.iter().all(|r| r.warning.is_some()));
    assert_eq!(records[1].warning, Some(true));
    assert_eq!(records[0].warning, Some(false));
    assert_eq!(scorer.calls(), 3);

    assert_eq!(transport.commands(), vec![command::stats().render()]);
    assert_eq!(transport.bastion_closes(), 1);
    assert_eq!(transport.session_closes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_merge_follows_stats_order_not_completion_order() {
    let transport = FakeTransport::new().respond_stdout(STATS_OUTPUT);
    // The first record finishes last and is the only one flagged.
    let scorer = FakeScorer::new(|input| {
        Ok(if input.pids == 3 {
            Verdict::Anomalous
        } else {
            Verdict::Normal
        })
    })
    .with_delay(|input| match input.pids {
        3 => Duration::from_millis(300),
        64 => Duration::from_millis(150),
        _ => Duration::from_millis(10),
    });
    let orchestrator = orchestrator(transport, scorer);

    let records = completed(orchestrator.poll_vm("vm1").await.unwrap());

    let merged: Vec<_> = records
        .iter()
        .map(|r| (r.id.as_str(), r.warning))
        .collect();
    assert_eq!(
        merged,
        vec![("a1", Some(true)), ("b2", Some(false)), ("d4", Some(false))]
    );
}

#[tokio::test]
async fn test_failed_score_defaults_to_no_warning() {
    let transport = FakeTransport::new().respond_stdout(STATS_OUTPUT);
    // "miner" would be flagged, but its scorer process exits nonzero.
    let scorer = FakeScorer::new(|input| {
        if input.pids == 64 {
            Err(ScoreError::Failed {
                code: Some(1),
                stderr: "Traceback".to_string(),
            })
        } else {
            Ok(Verdict::Anomalous)
        }
    });
    let health = HealthRegistry::new();
    let orchestrator = MetricsOrchestrator::new(
        test_runner(transport).with_health(health.clone()),
        scorer,
    );

    let records = completed(orchestrator.poll_vm("vm1").await.unwrap());

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].warning, Some(true));
    assert_eq!(records[1].warning, Some(false));
    assert_eq!(records[2].warning, Some(true));

    let report = health.health().await;
    assert_eq!(report.components[components::SCORER].status, ComponentStatus::Degraded);
}

#[tokio::test]
async fn test_concurrent_polls_fetch_once() {
    let transport = FakeTransport::new()
        .with_connect_delay(Duration::from_millis(100))
        .respond_stdout(STATS_OUTPUT);
    let orchestrator = orchestrator(transport.clone(), FakeScorer::always(Verdict::Normal));

    let (first, second) = tokio::join!(orchestrator.poll_vm("vm1"), orchestrator.poll_vm("vm1"));

    assert_eq!(completed(first.unwrap()).len(), 3);
    assert_eq!(second.unwrap(), PollOutcome::AlreadyInFlight);
    assert_eq!(transport.bastion_attempts(), 1);
    assert_eq!(transport.commands().len(), 1);
    assert!(!orchestrator.is_polling("vm1"));
}

#[tokio::test]
async fn test_polls_for_different_vms_run_independently() {
    let transport = FakeTransport::new()
        .with_connect_delay(Duration::from_millis(50))
        .respond_stdout(STATS_OUTPUT);
    let orchestrator = orchestrator(transport.clone(), FakeScorer::always(Verdict::Normal));

    let (vm1, vm2) = tokio::join!(orchestrator.poll_vm("vm1"), orchestrator.poll_vm("vm2"));

    assert!(matches!(vm1.unwrap(), PollOutcome::Completed(_)));
    assert!(matches!(vm2.unwrap(), PollOutcome::Completed(_)));
    assert_eq!(transport.bastion_attempts(), 2);
}

#[tokio::test]
async fn test_flag_clears_after_failure() {
    let transport = FakeTransport::failing_at(TunnelStage::Forward);
    let orchestrator = orchestrator(transport.clone(), FakeScorer::always(Verdict::Normal));

    let err = orchestrator.poll_vm("vm2").await.unwrap_err();
    assert!(matches!(err, GatewayError::Tunnel(TunnelError::ForwardFailed { .. })));
    assert!(!orchestrator.is_polling("vm2"));

    // A new poll goes to the network again.
    assert!(orchestrator.poll_vm("vm2").await.is_err());
    assert_eq!(transport.bastion_attempts(), 2);
    assert_eq!(transport.bastion_closes(), 2);
}

#[tokio::test]
async fn test_unknown_vm_makes_no_attempt() {
    let transport = FakeTransport::new();
    let scorer = FakeScorer::always(Verdict::Normal);
    let orchestrator = orchestrator(transport.clone(), scorer.clone());

    let err = orchestrator.poll_vm("vm9").await.unwrap_err();
    assert!(err.is_invalid_request());
    assert_eq!(err.to_string(), "Invalid VM name: vm9");
    assert_eq!(transport.bastion_attempts(), 0);
    assert_eq!(scorer.calls(), 0);
}

#[tokio::test]
async fn test_empty_stats_is_no_metrics_data() {
    let transport = FakeTransport::new().respond(|_| {
        vec![
            StreamEvent::Stdout(b"not json\n\n".to_vec()),
            StreamEvent::Stderr(b"Cannot connect to the Docker daemon\n".to_vec()),
            StreamEvent::Closed,
        ]
    });
    let scorer = FakeScorer::always(Verdict::Anomalous);
    let orchestrator = orchestrator(transport.clone(), scorer.clone());

    let err = orchestrator.poll_vm("vm1").await.unwrap_err();
    assert!(matches!(err, GatewayError::NoMetricsData { ref vm } if vm == "vm1"));
    assert_eq!(scorer.calls(), 0);
    assert_eq!(transport.bastion_closes(), 1);
}

#[tokio::test]
async fn test_score_all_on_empty_input() {
    let orchestrator = orchestrator(FakeTransport::new(), FakeScorer::always(Verdict::Normal));
    assert!(orchestrator.score_all("vm1", Vec::new()).await.is_empty());
}
