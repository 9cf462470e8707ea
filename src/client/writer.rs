use std::{io, sync::Arc};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::{Frame, HexFrame, LinkEventKind, Shared};
use crate::{error::Error, transport::Fault};

/// Why a frame was not written.
#[derive(Debug)]
enum WriteFailure {
    /// The link is closing, the frame is abandoned.
    Cancelled,

    /// Every attempt failed transiently.
    Exhausted { attempts: usize },

    /// The transport is gone.
    Fatal(io::Error),
}

/// Writes queued frames one at a time, retrying transient failures.
pub(crate) struct RetryingWriter<W> {
    shared: Arc<Shared>,
    writer: W,
    frames: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
}

impl<W: AsyncWrite + Unpin> RetryingWriter<W> {
    pub(crate) fn new(
        shared: Arc<Shared>,
        writer: W,
        frames: mpsc::Receiver<Frame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared,
            writer,
            frames,
            cancel,
        }
    }

    /// Runs until cancelled or the transport fails fatally.
    /// Returns the result of shutting down the write half.
    pub(crate) async fn run(mut self) -> io::Result<()> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = self.frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            match self.write_with_retries(&frame).await {
                Ok(attempts) => {
                    debug!(attempts, "Send: {}", HexFrame(&frame));
                    self.shared.emit(LinkEventKind::Sent(frame));
                }
                Err(WriteFailure::Cancelled) => {
                    debug!("Cancelled while writing, abandoning frame");
                    break;
                }
                Err(WriteFailure::Exhausted { attempts }) => {
                    warn!(
                        frame = %HexFrame(&frame),
                        "Dropping frame: {}",
                        Error::RetryExhausted { attempts }
                    );

                    // Nothing is outstanding now.
                    self.shared.clear_sending();
                    self.shared
                        .emit(LinkEventKind::Dropped { frame, attempts });
                }
                Err(WriteFailure::Fatal(e)) => {
                    error!(?e, "Serial port error in send, exiting");
                    self.shared.fail(&self.cancel);
                    break;
                }
            }
        }

        let Self {
            shared, mut writer, ..
        } = self;

        let closed = match timeout(shared.options.timeout(), writer.shutdown()).await {
            Ok(closed) => closed,
            Err(_) => Err(io::ErrorKind::TimedOut.into()),
        };

        if let Err(e) = &closed {
            warn!(?e, "Problem closing the transport");
        }

        drop(writer);
        trace!("Writer exited");
        shared.loop_exited();

        closed
    }

    async fn write_with_retries(&mut self, frame: &[u8]) -> Result<usize, WriteFailure> {
        let retries = self.shared.options.retries();
        let deadline = self.shared.options.timeout();

        for attempt in 1..=retries {
            if self.cancel.is_cancelled() {
                return Err(WriteFailure::Cancelled);
            }

            // One write call per attempt, a retry resends the whole frame.
            let written = timeout(deadline, async {
                let n = self.writer.write(frame).await?;
                if n < frame.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short write, {n} of {} bytes", frame.len()),
                    ));
                }
                self.writer.flush().await
            })
            .await;

            match written {
                Ok(Ok(())) => return Ok(attempt),
                Ok(Err(e)) => match self.shared.classify(&e) {
                    Fault::Fatal => return Err(WriteFailure::Fatal(e)),
                    Fault::Transient => {
                        debug!(attempt, retries, ?e, "Write failed, retrying");
                    }
                },
                Err(_) => {
                    debug!(attempt, retries, "Write timed out, retrying");
                }
            }
        }

        Err(WriteFailure::Exhausted { attempts: retries })
    }
}
