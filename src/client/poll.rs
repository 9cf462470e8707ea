use std::sync::Arc;

use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{HexFrame, LinkEventKind, Shared};
use crate::error::Error;

/// Offers the registered poll commands to the writer at a fixed interval.
///
/// Poll commands do not wait for their responses.
/// A command is skipped for this cycle while a frame sent by the application
/// still waits for its response.
pub(crate) struct PollScheduler {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl PollScheduler {
    pub(crate) fn new(shared: Arc<Shared>, cancel: CancellationToken) -> Self {
        Self { shared, cancel }
    }

    /// Runs until polling is stopped or the link closes.
    pub(crate) async fn run(self) {
        let period = self.shared.options.poll_interval();
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }

            if !self.cycle().await {
                break;
            }
        }

        trace!("Poller exited");
        self.shared.loop_exited();
    }

    /// Offer every command once.
    /// Returns `false` once the poller should stop.
    async fn cycle(&self) -> bool {
        let started = Instant::now();
        let mut offered = 0;
        let mut skipped = 0;

        for command in self.shared.poll_commands() {
            if self.cancel.is_cancelled() {
                return false;
            }

            if self.shared.is_sending() {
                trace!(command = %HexFrame(&command), "Exchange outstanding, skipping");
                skipped += 1;
                continue;
            }

            match self.shared.enqueue(command) {
                Ok(()) => offered += 1,
                Err(Error::Busy) => {
                    warn!("Write queue full, skipping poll command");
                    skipped += 1;
                }
                Err(e) => {
                    debug!(%e, "Link gone, stopping poll");
                    return false;
                }
            }
        }

        // Let the last exchange finish.
        if !self.settle().await {
            return false;
        }

        let elapsed = started.elapsed();
        debug!(
            offered,
            skipped,
            "Polled Time: {}ms",
            elapsed.as_millis()
        );
        self.shared.emit(LinkEventKind::PollCycle {
            offered,
            skipped,
            elapsed,
        });

        true
    }

    /// Wait one inter-frame delay.
    /// Returns `false` if cancelled meanwhile.
    async fn settle(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = sleep(self.shared.options.inter_frame_delay()) => true,
        }
    }
}
