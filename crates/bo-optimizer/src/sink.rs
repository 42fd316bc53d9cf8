//! Presentation sinks: where loop events go.

use bo_types::LoopEvent;
use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, info, warn};

/// Receives every event the loop emits, in order.
///
/// Emission must not fail the loop; sinks swallow their own errors.
pub trait PresentationSink: Send {
    fn emit(&mut self, event: LoopEvent);
}

impl<T: PresentationSink + ?Sized> PresentationSink for Box<T> {
    fn emit(&mut self, event: LoopEvent) {
        (**self).emit(event)
    }
}

/// Collects events in memory.
impl PresentationSink for Vec<LoopEvent> {
    fn emit(&mut self, event: LoopEvent) {
        self.push(event);
    }
}

/// Best-effort hand-off to another thread. A full or disconnected channel
/// drops the event.
impl PresentationSink for Sender<LoopEvent> {
    fn emit(&mut self, event: LoopEvent) {
        match self.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("presentation channel full, event dropped"),
            Err(TrySendError::Disconnected(_)) => {
                debug!("presentation channel disconnected, event dropped")
            }
        }
    }
}

/// Logs a one-line status per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl PresentationSink for TracingSink {
    fn emit(&mut self, event: LoopEvent) {
        let status = event.status_message();
        match &event {
            LoopEvent::EvaluationFallback { run_id, sample, .. } => {
                warn!(%run_id, x = sample.x, y = sample.y, "{status}");
            }
            LoopEvent::Summary(summary) | LoopEvent::Converged(summary) => {
                info!(
                    run_id = %summary.run_id,
                    iteration = summary.iteration,
                    best_x = summary.best_observed.x,
                    best_y = summary.best_observed.y,
                    predicted_x = summary.best_predicted.x,
                    "{status}"
                );
            }
            LoopEvent::Started { run_id, bounds, .. } => {
                info!(%run_id, %bounds, "{status}");
            }
            LoopEvent::Aborted {
                run_id,
                iterations_completed,
            } => {
                info!(%run_id, iterations_completed, "{status}");
            }
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn emit(&mut self, _event: LoopEvent) {}
}
