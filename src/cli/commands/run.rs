//! `run` command
//!
//! Real-time operation: records are read from stdin, snapshots written to
//! stdout, audit events to stderr or a file.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::BufReader;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::args::RunArgs;
use crate::controller::{ControlLoop, Controller, InboxSender, StateSnapshot, inbox};
use crate::error::{FeedError, GreenwaveError};
use crate::feed::{FeedReader, SnapshotWriter};
use crate::observability::{Event, EventEmitter, init_metrics, metrics};

use super::load_config;

/// Runs the controller until cancelled, or until stdin closes when
/// `--exit-on-eof` is set.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the metrics
/// listener or events file cannot be opened, or stdin fails.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), GreenwaveError> {
    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let loaded = load_config(&args.config)?;

    let emitter = Arc::new(if let Some(ref path) = args.events_file {
        EventEmitter::from_file(path)?
    } else {
        EventEmitter::stderr()
    });

    let (tx, rx) = inbox(loaded.config.control.inbox_capacity);
    let controller = Controller::new(loaded.config, loaded.topology);
    let (control_loop, snapshots) = ControlLoop::new(controller, rx, Arc::clone(&emitter));
    let control_loop = control_loop.stop_when_inputs_close(args.exit_on_eof);

    let reader = tokio::spawn(forward_stdin(tx, Arc::clone(&emitter), cancel.clone()));
    let writer = tokio::spawn(write_snapshots(WatchStream::from_changes(snapshots)));

    let summary = control_loop.run(cancel.clone()).await;

    if reader.is_finished() {
        if let Ok(Err(e)) = reader.await {
            warn!(error = %e, "stdin reader failed");
        }
    } else {
        // stdin may never close on its own
        reader.abort();
    }

    match writer.await {
        Ok(Ok(written)) => debug!(written, "snapshot writer finished"),
        Ok(Err(e)) => warn!(error = %e, "snapshot writer failed"),
        Err(e) => warn!(error = %e, "snapshot writer task panicked"),
    }

    info!(summary = %summary, "controller stopped");
    Ok(())
}

/// Forwards stdin records into the inbox until EOF or cancellation.
async fn forward_stdin(
    tx: InboxSender,
    emitter: Arc<EventEmitter>,
    cancel: CancellationToken,
) -> Result<(), GreenwaveError> {
    let mut reader = FeedReader::new(BufReader::new(tokio::io::stdin()));

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = reader.next_record() => next,
        };

        match next {
            Ok(Some(input)) => {
                if tx.submit(input).await.is_err() {
                    debug!("inbox closed, stopping stdin reader");
                    break;
                }
            }
            Ok(None) => {
                debug!(lines = reader.line(), "stdin closed");
                break;
            }
            Err(FeedError::Malformed { line, message }) => {
                warn!(line, %message, "dropping malformed record");
                metrics::record_rejected("malformed");
                emitter.emit(Event::InputRejected {
                    timestamp: Utc::now(),
                    kind: "malformed".to_string(),
                    reason: format!("line {line}: {message}"),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Writes every published snapshot to stdout until the loop stops.
async fn write_snapshots<S>(mut stream: S) -> Result<u64, GreenwaveError>
where
    S: tokio_stream::Stream<Item = Arc<StateSnapshot>> + Unpin,
{
    let mut writer = SnapshotWriter::new(tokio::io::stdout());
    while let Some(snapshot) = stream.next().await {
        writer.write(&snapshot).await?;
    }
    Ok(writer.written())
}
