use std::sync::Arc;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use super::{HexFrame, LinkEventKind, Shared};
use crate::{options::DEFAULT_PACKET_SIZE, transport::Fault};

/// Reads chunks from the transport and hands them to the receive callback.
pub(crate) struct FrameReader<R> {
    shared: Arc<Shared>,
    reader: R,
    cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(shared: Arc<Shared>, reader: R, cancel: CancellationToken) -> Self {
        Self {
            shared,
            reader,
            cancel,
        }
    }

    /// Runs until cancelled or the transport fails fatally.
    pub(crate) async fn run(mut self) {
        let mut buffer = [0u8; DEFAULT_PACKET_SIZE];
        let deadline = self.shared.options.timeout();

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                read = timeout(deadline, self.reader.read(&mut buffer)) => read,
            };

            match read {
                // Nothing arrived within the timeout, keep listening.
                Err(_) => continue,
                // A read of zero bytes into a non-empty buffer is end of stream,
                // no later read can return data. Reading on would spin.
                Ok(Ok(0)) => {
                    error!("Serial port reached end of stream, the device is gone");
                    self.shared.fail(&self.cancel);
                    break;
                }
                Ok(Ok(n)) => {
                    let chunk = &buffer[..n];
                    trace!("Message from port: `{}`", HexFrame(chunk));

                    if let Some(callback) = self.shared.receive_callback() {
                        callback(chunk);
                    }

                    // The response to the last frame is in.
                    self.shared.clear_sending();
                    self.shared.emit(LinkEventKind::Received(chunk.to_vec()));
                }
                Ok(Err(e)) => match self.shared.classify(&e) {
                    Fault::Fatal => {
                        error!(?e, "Serial port error, exiting");
                        self.shared.fail(&self.cancel);
                        break;
                    }
                    Fault::Transient => {
                        trace!(?e, "Read failed, reading again");
                    }
                },
            }
        }

        let Self { shared, reader, .. } = self;
        drop(reader);
        trace!("Reader exited");
        shared.loop_exited();
    }
}
