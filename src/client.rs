//! The link client owns one transport and the loops running on it.
//!
//! Starting the client opens the transport and spawns a reader and a writer,
//! plus a poller if polling is enabled.
//! All of them share one cancellation scope, closing the client cancels them together
//! and waits for them to exit before the transport is considered closed.

use std::{
    fmt::Display,
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    error::Error,
    options::LinkOptions,
    transport::{Connector, Fault},
};

/// The loop reading from the transport.
pub(crate) mod reader;

/// The loop writing queued frames to the transport.
pub(crate) mod writer;

/// The loop offering poll commands at a fixed interval.
pub(crate) mod poll;

/// One opaque unit of bytes on the wire.
pub type Frame = Vec<u8>;

/// Called with every chunk read from the transport.
pub type ReceiveCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Displays a frame as spaced upper-case hex, like `01 03 00 0A`.
#[derive(Debug, Clone, Copy)]
pub struct HexFrame<'a>(pub &'a [u8]);

impl Display for HexFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02X}")?;
        }

        Ok(())
    }
}

/// Where a link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport.
    Closed,

    /// The transport is being opened.
    Opening,

    /// Frames may be sent.
    Open,

    /// The loops are being torn down.
    Closing,
}

/// Things which happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    /// The transport was opened and the loops started.
    Opened,

    /// A frame was put on the wire.
    Sent(Frame),

    /// A chunk came from the wire.
    Received(Frame),

    /// A frame could not be written within the retry budget and was dropped.
    Dropped {
        /// The dropped frame.
        frame: Frame,

        /// How many writes were attempted.
        attempts: usize,
    },

    /// The poller went through its commands once.
    PollCycle {
        /// Commands put on the write queue.
        offered: usize,

        /// Commands skipped since an exchange was outstanding.
        skipped: usize,

        /// Time the cycle took, including the settle delay.
        elapsed: Duration,
    },

    /// All loops have exited and the transport is released.
    Closed {
        /// Whether a fatal transport fault caused this.
        fatal: bool,
    },
}

/// An event connected to some link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    /// The address of the link.
    pub address: String,

    /// The event.
    pub kind: LinkEventKind,

    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl Display for LinkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: ", self.address)?;

        match &self.kind {
            LinkEventKind::Opened => write!(f, "opened"),
            LinkEventKind::Sent(frame) => write!(f, "sent {}", HexFrame(frame)),
            LinkEventKind::Received(frame) => write!(f, "received {}", HexFrame(frame)),
            LinkEventKind::Dropped { frame, attempts } => {
                write!(f, "dropped {} after {attempts} attempt(s)", HexFrame(frame))
            }
            LinkEventKind::PollCycle {
                offered,
                skipped,
                elapsed,
            } => write!(
                f,
                "polled {offered} command(s), skipped {skipped} in {}ms",
                elapsed.as_millis()
            ),
            LinkEventKind::Closed { fatal } => write!(f, "closed (fatal: {fatal})"),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the client and its loops.
pub(crate) struct Shared {
    pub(crate) options: LinkOptions,
    connector: Arc<dyn Connector>,
    state: Mutex<LinkState>,

    /// Set when the application queues a frame, cleared when a response arrives.
    /// Advisory: the poller skips commands while this is set.
    sending: AtomicBool,

    outbox: Mutex<Option<mpsc::Sender<Frame>>>,
    poll_commands: RwLock<Vec<Frame>>,
    on_receive: RwLock<Option<ReceiveCallback>>,
    events: broadcast::Sender<LinkEvent>,

    /// Loops of the current session which have not exited yet.
    live_loops: AtomicUsize,

    /// Whether the current session ended through a fatal fault.
    failed: AtomicBool,
}

impl Shared {
    pub(crate) fn classify(&self, error: &io::Error) -> Fault {
        self.connector.classify(error)
    }

    pub(crate) fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub(crate) fn clear_sending(&self) {
        self.sending.store(false, Ordering::Release);
    }

    /// Queue a frame which expects a response.
    /// The poller holds back while that response is outstanding.
    pub(crate) fn send(&self, frame: Frame) -> Result<(), Error> {
        // Set before queueing, the response may arrive before `try_send` returns.
        let was_sending = self.sending.swap(true, Ordering::AcqRel);

        self.enqueue(frame).map_err(|e| {
            // Nothing was queued.
            self.sending.store(was_sending, Ordering::Release);
            e
        })
    }

    /// Queue a frame without marking an exchange as outstanding.
    pub(crate) fn enqueue(&self, frame: Frame) -> Result<(), Error> {
        let outbox = lock(&self.outbox);
        let Some(outbox) = outbox.as_ref() else {
            return Err(Error::NotOpen);
        };

        outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Busy,
            mpsc::error::TrySendError::Closed(_) => Error::NotOpen,
        })
    }

    pub(crate) fn poll_commands(&self) -> Vec<Frame> {
        self.poll_commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn receive_callback(&self) -> Option<ReceiveCallback> {
        self.on_receive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn emit(&self, kind: LinkEventKind) {
        let event = LinkEvent {
            address: self.options.address().to_string(),
            kind,
            timestamp: Utc::now(),
        };

        match self.events.send(event) {
            Ok(listeners) => trace!("Broadcasted event to {listeners} listener(s)"),
            Err(_) => trace!("No listeners for event"),
        }
    }

    /// The transport is gone.
    /// Stops accepting frames and cancels every loop of the session.
    pub(crate) fn fail(&self, cancel: &CancellationToken) {
        self.failed.store(true, Ordering::Release);

        {
            let mut state = lock(&self.state);
            if *state == LinkState::Open {
                *state = LinkState::Closing;
            }
        }

        lock(&self.outbox).take();
        cancel.cancel();
    }

    /// Called by each loop as its last action.
    pub(crate) fn loop_exited(&self) {
        if self.live_loops.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        if !self.failed.load(Ordering::Acquire) {
            // An explicit close finishes the transition itself.
            return;
        }

        let mut state = lock(&self.state);
        if *state == LinkState::Closing {
            *state = LinkState::Closed;
            drop(state);

            warn!("Link closed after a fatal fault");
            self.emit(LinkEventKind::Closed { fatal: true });
        }
    }
}

struct Session {
    cancel: CancellationToken,
    poll: Option<CancellationToken>,
    reader: JoinHandle<()>,
    writer: JoinHandle<io::Result<()>>,
    poller: Option<JoinHandle<()>>,
}

/// A serial link.
pub struct LinkClient {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl LinkClient {
    /// Create a closed link.
    pub fn new<C: Connector>(options: LinkOptions, connector: C) -> Self {
        // Outsiders will be observing events from this broadcast.
        let (events, _) = broadcast::channel(1024);

        Self {
            shared: Arc::new(Shared {
                options,
                connector: Arc::new(connector),
                state: Mutex::new(LinkState::Closed),
                sending: AtomicBool::new(false),
                outbox: Mutex::new(None),
                poll_commands: RwLock::new(vec![]),
                on_receive: RwLock::new(None),
                events,
                live_loops: AtomicUsize::new(0),
                failed: AtomicBool::new(false),
            }),
            session: Mutex::new(None),
        }
    }

    /// The options the link was created with.
    pub fn options(&self) -> &LinkOptions {
        &self.shared.options
    }

    /// The transport address.
    pub fn address(&self) -> &str {
        self.shared.options.address()
    }

    /// Where the link is in its lifecycle.
    pub fn state(&self) -> LinkState {
        *lock(&self.shared.state)
    }

    /// Whether frames may be sent.
    pub fn opened(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Whether a sent frame is still waiting for its response.
    pub fn is_sending(&self) -> bool {
        self.shared.is_sending()
    }

    /// Subscribe to events on this link.
    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Set the function called with every chunk read from the transport.
    /// It runs on the reader, so it should return quickly.
    pub fn set_receive_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *self
            .shared
            .on_receive
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Append a command to the poll list.
    /// Commands are offered in the order they were added.
    pub fn add_poll_command<F: Into<Frame>>(&self, command: F) {
        self.shared
            .poll_commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.into());
    }

    /// Open the transport and start the loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), Error> {
        let mut session = lock(&self.session);
        let shared = &self.shared;
        let options = &shared.options;

        {
            let mut state = lock(&shared.state);
            if *state != LinkState::Closed {
                return Err(Error::AlreadyStarted);
            }

            options.validate()?;
            *state = LinkState::Opening;
        }

        // Leftovers from a session which failed are finished by now.
        session.take();

        let transport = match shared.connector.open(options) {
            Ok(transport) => transport,
            Err(e) => {
                error!(%options, %e, "Could not open link");
                *lock(&shared.state) = LinkState::Closed;
                return Err(e);
            }
        };

        let (read_half, write_half) = tokio::io::split(transport);
        let (outbox, frames) = mpsc::channel(options.queue_capacity());
        let cancel = CancellationToken::new();

        shared.failed.store(false, Ordering::Release);
        shared.clear_sending();
        shared
            .live_loops
            .store(if options.poll() { 3 } else { 2 }, Ordering::Release);
        *lock(&shared.outbox) = Some(outbox);
        *lock(&shared.state) = LinkState::Open;

        let span = info_span!("link", address = %options.address());

        let reader = tokio::spawn(
            reader::FrameReader::new(shared.clone(), read_half, cancel.clone())
                .run()
                .instrument(span.clone()),
        );

        let writer = tokio::spawn(
            writer::RetryingWriter::new(shared.clone(), write_half, frames, cancel.clone())
                .run()
                .instrument(span.clone()),
        );

        let (poll, poller) = if options.poll() {
            let poll_cancel = cancel.child_token();
            let poller = tokio::spawn(
                poll::PollScheduler::new(shared.clone(), poll_cancel.clone())
                    .run()
                    .instrument(span),
            );

            (Some(poll_cancel), Some(poller))
        } else {
            (None, None)
        };

        *session = Some(Session {
            cancel,
            poll,
            reader,
            writer,
            poller,
        });

        info!(%options, poll = options.poll(), "Link open");
        shared.emit(LinkEventKind::Opened);

        Ok(())
    }

    /// Queue a frame for writing.
    ///
    /// Does not wait for the write, failures after queueing are reported
    /// through logs and [`LinkEventKind::Dropped`].
    /// Fails with [`Error::Busy`] if the write queue is full.
    pub fn send<F: Into<Frame>>(&self, frame: F) -> Result<(), Error> {
        self.shared.send(frame.into())
    }

    /// Stop the poll loop.
    /// The transport stays open.
    pub fn stop_polling(&self) {
        if let Some(poll) = lock(&self.session).as_ref().and_then(|s| s.poll.as_ref()) {
            debug!("Stopping polling");
            poll.cancel();
        }
    }

    /// Stop all loops and release the transport.
    ///
    /// Returns the error from closing the transport, if any.
    /// Closing a closed link does nothing.
    pub async fn close(&self) -> Result<(), Error> {
        self.stop_polling();

        let Some(session) = lock(&self.session).take() else {
            return Ok(());
        };

        let shared = &self.shared;

        {
            let mut state = lock(&shared.state);
            if *state == LinkState::Open {
                *state = LinkState::Closing;
            }
        }

        let Session {
            cancel,
            reader,
            writer,
            poller,
            ..
        } = session;

        lock(&shared.outbox).take();
        cancel.cancel();

        let poller = async move {
            match poller {
                Some(poller) => poller.await,
                None => Ok(()),
            }
        };
        let (reader, writer, poller) = tokio::join!(reader, writer, poller);

        for (name, joined) in [("reader", reader), ("poller", poller)] {
            if let Err(e) = joined {
                error!(?e, "The {name} did not exit cleanly");
            }
        }

        let result = match writer {
            Ok(closed) => closed.map_err(Error::from),
            Err(e) => {
                error!(?e, "The writer did not exit cleanly");
                Ok(())
            }
        };

        let fatal = shared.failed.load(Ordering::Acquire);
        let transitioned = {
            let mut state = lock(&shared.state);
            let transitioned = *state != LinkState::Closed;
            *state = LinkState::Closed;
            transitioned
        };
        shared.clear_sending();

        if transitioned {
            info!("Link closed");
            shared.emit(LinkEventKind::Closed { fatal });
        }

        result
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_frames() {
        assert_eq!(HexFrame(&[0x01, 0x03, 0x00, 0x0A]).to_string(), "01 03 00 0A");
        assert_eq!(HexFrame(&[]).to_string(), "");
    }

    #[test]
    fn events_display() {
        let event = LinkEvent {
            address: "COM3".into(),
            kind: LinkEventKind::Dropped {
                frame: vec![0xFF],
                attempts: 3,
            },
            timestamp: Utc::now(),
        };

        assert_eq!(event.to_string(), "COM3: dropped FF after 3 attempt(s)");
    }
}
