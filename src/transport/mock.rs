//! A mock transport.
//! Writes follow a script of outcomes, reads are injected by the test.
//! Optionally works as a loopback, so frames put on the wire are read back.
//!
//! Useful for testing implementations which would use
//! regular serial ports- but faster and more reliable.

use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, trace};

use super::{BoxedTransport, Connector};
use crate::{error::Error, options::LinkOptions, Frame};

/// What the next write attempt should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Accept the bytes.
    Accept,

    /// Fail this attempt only.
    Transient,

    /// Fail as if the device was unplugged.
    Fatal,

    /// Accept only this many bytes.
    Partial(usize),
}

#[derive(Debug)]
enum ReadEvent {
    Data(Frame),
    Transient,
    Fatal,
    EndOfStream,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<WriteOutcome>,
    attempts: Vec<Frame>,
    written: Vec<Frame>,
    reads: VecDeque<ReadEvent>,
    read_waker: Option<Waker>,
    loopback: bool,
    fail_open: bool,
    opens: usize,
    closed: bool,
}

impl MockState {
    fn push_read(&mut self, event: ReadEvent) {
        self.reads.push_back(event);

        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

/// Test-side handle of a mock transport.
/// Clones observe and control the same transport.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockHandle {
    /// A fresh mock which accepts every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector opening this mock.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            handle: self.clone(),
        }
    }

    /// Read every accepted frame back.
    pub fn set_loopback(&self, loopback: bool) {
        lock(&self.state).loopback = loopback;
    }

    /// Make opening fail.
    pub fn set_fail_open(&self, fail_open: bool) {
        lock(&self.state).fail_open = fail_open;
    }

    /// Queue outcomes for the next write attempts.
    /// Attempts beyond the script are accepted.
    pub fn script_writes<I: IntoIterator<Item = WriteOutcome>>(&self, outcomes: I) {
        lock(&self.state).script.extend(outcomes);
    }

    /// Make the device send some bytes.
    pub fn inject_read<B: Into<Frame>>(&self, bytes: B) {
        lock(&self.state).push_read(ReadEvent::Data(bytes.into()));
    }

    /// Make the next read fail.
    pub fn inject_read_fault(&self, fatal: bool) {
        let event = if fatal {
            ReadEvent::Fatal
        } else {
            ReadEvent::Transient
        };

        lock(&self.state).push_read(event);
    }

    /// Make the next read report the end of the stream.
    pub fn inject_end_of_stream(&self) {
        lock(&self.state).push_read(ReadEvent::EndOfStream);
    }

    /// Every write attempt, successful or not.
    pub fn write_attempts(&self) -> Vec<Frame> {
        lock(&self.state).attempts.clone()
    }

    /// Every accepted write, partial ones included.
    pub fn written(&self) -> Vec<Frame> {
        lock(&self.state).written.clone()
    }

    /// How many times the transport was opened.
    pub fn opens(&self) -> usize {
        lock(&self.state).opens
    }

    /// Whether the last opened transport has been closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

/// Opens a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    handle: MockHandle,
}

impl Connector for MockConnector {
    fn open(&self, options: &LinkOptions) -> Result<BoxedTransport, Error> {
        let mut state = lock(&self.handle.state);

        if state.fail_open {
            return Err(Error::Connection {
                address: options.address().to_string(),
                problem: "mock told to refuse".into(),
            });
        }

        state.opens += 1;
        state.closed = false;
        debug!(%options, opens = state.opens, "Opened mock");

        Ok(Box::new(MockTransport {
            state: self.handle.state.clone(),
        }))
    }
}

/// The transport side of a mock.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl AsyncRead for MockTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = lock(&self.state);

        match state.reads.pop_front() {
            Some(ReadEvent::Data(mut bytes)) => {
                let n = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes[..n]);

                // Whatever did not fit is read next time.
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    state.reads.push_front(ReadEvent::Data(rest));
                }

                Poll::Ready(Ok(()))
            }
            Some(ReadEvent::Transient) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "mock read hiccup",
            ))),
            Some(ReadEvent::Fatal) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no such file or directory",
            ))),
            Some(ReadEvent::EndOfStream) => Poll::Ready(Ok(())),
            None => {
                state.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = lock(&self.state);

        state.attempts.push(buf.to_vec());
        let outcome = state.script.pop_front().unwrap_or(WriteOutcome::Accept);
        trace!(?outcome, len = buf.len(), "Mock write");

        match outcome {
            WriteOutcome::Accept => {
                state.written.push(buf.to_vec());

                if state.loopback {
                    state.push_read(ReadEvent::Data(buf.to_vec()));
                }

                Poll::Ready(Ok(buf.len()))
            }
            WriteOutcome::Partial(n) => {
                let n = n.min(buf.len());
                state.written.push(buf[..n].to_vec());

                Poll::Ready(Ok(n))
            }
            WriteOutcome::Transient => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "mock write rejected",
            ))),
            WriteOutcome::Fatal => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device vanished",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        lock(&self.state).closed = true;
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        lock(&self.state).closed = true;
    }
}
