//! Pipeline event loop: async entry point for hosts.
//!
//! One spawned task exclusively owns the [`Aggregator`], so the pipeline
//! needs no locks: events are drained from an mpsc channel and processed
//! inline, surviving signals are forwarded to the external learning-trigger
//! collaborator. A heartbeat timer sweeps timed-out steps and logs counters
//! even when no events arrive. Fail-open throughout; a full or closed signal
//! channel never stalls event processing.

use crate::aggregator::Aggregator;
use crate::event::InteractionEvent;
use crate::signal::DetectedSignal;

use tokio::sync::mpsc;

use std::time::Duration;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the pipeline as a background task.
///
/// The task runs until the event channel closes. Signals that cannot be
/// delivered (receiver lagging or gone) are dropped with a warning.
pub fn spawn_pipeline_loop(
    aggregator: Aggregator,
    events: mpsc::Receiver<InteractionEvent>,
    signals: mpsc::Sender<DetectedSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_pipeline_loop(aggregator, events, signals).await;
    })
}

async fn run_pipeline_loop(
    mut aggregator: Aggregator,
    mut events: mpsc::Receiver<InteractionEvent>,
    signals: mpsc::Sender<DetectedSignal>,
) {
    tracing::info!("learning pipeline started");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // first tick resolves immediately

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                // Quiet sessions only time out here; the per-event sweep
                // never runs when no events arrive.
                aggregator.sweep_timed_out_steps().await;
                let snapshot = aggregator.snapshot();
                tracing::debug!(
                    events = snapshot.events_processed,
                    signals = snapshot.signals_emitted,
                    steps_completed = snapshot.steps_completed,
                    distillations = snapshot.distillations_created,
                    active_sessions = snapshot.active_sessions,
                    "pipeline heartbeat"
                );
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("event channel closed, pipeline loop exiting");
                    return;
                };
                for signal in aggregator.process_event(&event).await {
                    if let Err(error) = signals.try_send(signal) {
                        tracing::warn!(%error, "dropping signal, learning trigger not keeping up");
                    }
                }
            }
        }
    }
}
