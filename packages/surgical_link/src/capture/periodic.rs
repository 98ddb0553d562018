use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::SharedPipeline;
use crate::connection::{ConnectionHandle, SendOutcome};
use crate::protocol::OutboundMessage;

/// Background task that captures a frame on start and then every `interval`,
/// posting each as an `auto_frame` message. At most one task runs per
/// controller.
pub struct PeriodicCapture {
    interval: Duration,
    running: Option<CancellationToken>,
}

impl PeriodicCapture {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start capturing, replacing any task already running.
    pub fn start(&mut self, pipeline: SharedPipeline, connection: ConnectionHandle) {
        self.stop();

        let cancel = CancellationToken::new();
        self.running = Some(cancel.clone());
        let period = self.interval;
        // first tick completes immediately
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "periodic capture started");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = pipeline.lock().await.capture_frame();
                        let Some(frame) = frame else {
                            debug!("no frame available for periodic capture");
                            continue;
                        };
                        let outcome = connection.send(OutboundMessage::auto_frame(&frame)).await;
                        if outcome == SendOutcome::Sent {
                            debug!(freshness = ?frame.freshness(), "auto frame sent");
                        }
                    }
                }
            }
            debug!("periodic capture task exited");
        });
    }

    /// Stop capturing; a no-op when nothing runs.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.running.take() {
            cancel.cancel();
            info!("periodic capture stopped");
        }
    }
}

impl Drop for PeriodicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
