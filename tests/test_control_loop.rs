//! The real-time loop under paused tokio time.

mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};

use greenwave::controller::{ControlLoop, inbox};
use greenwave::error::FeedError;
use greenwave::feed::FeedReader;
use greenwave::observability::{EventEmitter, StopReason};
use greenwave::signal::SubState;
use greenwave::strategy::ControlMode;
use greenwave::topology::ApproachId;
use tokio_util::sync::CancellationToken;

/// Event sink shared with the test.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn events(&self) -> Vec<serde_json::Value> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn types(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e["type"].as_str().unwrap_or_default().to_owned())
            .collect()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn emergency_submitted_live_reaches_preempt_green() {
    let captured = Captured::default();
    let emitter = Arc::new(EventEmitter::new(Box::new(captured.clone())));
    let (tx, rx) = inbox(32);
    let (control_loop, mut snapshots) = ControlLoop::new(
        common::controller("five_way.yaml", ControlMode::Fixed),
        rx,
        emitter,
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(control_loop.run(cancel.clone()));

    tx.submit(common::emergency("NE", 0.95, true)).await.unwrap();
    let green = snapshots
        .wait_for(|s| s.sub_state == SubState::PreemptGreen)
        .await
        .unwrap()
        .clone();
    assert_eq!(green.emergency_approach_ids.len(), 1);
    assert!(green.emergency_active);

    cancel.cancel();
    let summary = handle.await.unwrap();
    assert_eq!(summary.preemptions, 1);

    let types = captured.types();
    assert_eq!(types.first().map(String::as_str), Some("ControllerStarted"));
    assert!(types.iter().any(|t| t == "PreemptionStarted"));
    let events = captured.events();
    let stopped = events.last().unwrap();
    assert_eq!(stopped["type"], "ControllerStopped");
    assert_eq!(stopped["reason"], "interrupted");

    // the loop is gone, so producers see a closed inbox
    assert!(matches!(
        tx.submit(common::telemetry("N", 0, 0)).await,
        Err(FeedError::InboxClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn feed_records_are_applied_and_rejections_counted() {
    let feed = concat!(
        r#"{"type":"telemetry","approachId":"N","queueLength":14,"timestampMs":0}"#,
        "\n",
        "\n",
        "{not json}\n",
        r#"{"type":"telemetry","approachId":"Q","queueLength":3,"timestampMs":0}"#,
        "\n",
        r#"{"type":"mode","mode":"max_pressure"}"#,
        "\n",
    );

    let (tx, rx) = inbox(16);
    let mut reader = FeedReader::new(feed.as_bytes());
    let mut malformed = Vec::new();
    loop {
        match reader.next_record().await {
            Ok(Some(input)) => tx.submit(input).await.unwrap(),
            Ok(None) => break,
            Err(FeedError::Malformed { line, .. }) => malformed.push(line),
            Err(e) => panic!("unexpected feed error: {e}"),
        }
    }
    drop(tx);
    assert_eq!(malformed, vec![3]);

    let (control_loop, snapshots) = ControlLoop::new(
        common::controller("five_way.yaml", ControlMode::Fixed),
        rx,
        Arc::new(EventEmitter::noop()),
    );
    let summary = control_loop
        .stop_when_inputs_close(true)
        .run(CancellationToken::new())
        .await;

    assert_eq!(summary.ticks, 1);
    assert_eq!(summary.rejected_inputs, 1);
    let last = snapshots.borrow().clone();
    assert_eq!(last.total_queue_by_approach.get(&ApproachId::from("N")).copied(), Some(14));
    assert_eq!(last.pending_mode, Some(ControlMode::Heuristic));
}

#[tokio::test(start_paused = true)]
async fn offer_reports_full_inbox() {
    let (tx, _rx) = inbox(1);
    tx.offer(common::telemetry("N", 0, 0)).unwrap();
    assert!(matches!(
        tx.offer(common::telemetry("N", 0, 0)),
        Err(FeedError::InboxFull)
    ));
}

#[tokio::test(start_paused = true)]
async fn completed_run_reports_completed() {
    let captured = Captured::default();
    let emitter = Arc::new(EventEmitter::new(Box::new(captured.clone())));
    let (tx, rx) = inbox(4);
    drop(tx);

    let (control_loop, _snapshots) = ControlLoop::new(
        common::controller("four_way.yaml", ControlMode::Heuristic),
        rx,
        emitter,
    );
    control_loop
        .stop_when_inputs_close(true)
        .run(CancellationToken::new())
        .await;

    let events = captured.events();
    let stopped = events.last().unwrap();
    assert_eq!(
        stopped["reason"],
        serde_json::to_value(StopReason::Completed).unwrap()
    );
    assert_eq!(stopped["summary"]["ticks"], 1);
}
