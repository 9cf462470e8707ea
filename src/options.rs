//! Options for a serial link.
//!
//! Options are put together with a [`LinkOptionsBuilder`] and are read-only afterwards.
//! Changing any of them means closing the link and starting a new one.

use std::{fmt::Display, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

/// Used when no timeout is given and none can be derived from the framing parameters.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(130);

/// The packet size the read and write timeouts are derived for.
/// This is also the size of the chunks the reader pulls from the transport.
pub const DEFAULT_PACKET_SIZE: usize = 15;

const DEFAULT_BAUD_RATE: u32 = 19_200;
const DEFAULT_RETRIES: usize = 3;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);
const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Parity of each serial character.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit.
    /// The framing then requires two stop bits.
    None,

    /// Even parity.
    #[default]
    Even,

    /// Odd parity.
    Odd,
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N" | "None" => Ok(Self::None),
            "E" | "Even" => Ok(Self::Even),
            "O" | "Odd" => Ok(Self::Odd),
            other => Err(Error::InvalidParameters(format!(
                "parity must be one of N, E or O, got `{other}`"
            ))),
        }
    }
}

impl Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self {
            Parity::None => "N",
            Parity::Even => "E",
            Parity::Odd => "O",
        };

        write!(f, "{letter}")
    }
}

/// RS485 related settings.
///
/// These are handed to the connector as they are.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rs485Options {
    /// Enable RS485 support.
    pub enabled: bool,

    /// Delay RTS prior to send.
    pub delay_rts_before_send: Duration,

    /// Delay RTS after send.
    pub delay_rts_after_send: Duration,

    /// Set RTS high during send.
    pub rts_high_during_send: bool,

    /// Set RTS high after send.
    pub rts_high_after_send: bool,

    /// Receive while transmitting.
    pub rx_during_tx: bool,
}

/// The minimum time needed to move `packet_size` characters over a serial line.
///
/// Each character is one start bit, the data bits, an optional parity bit and the stop bits.
/// Each bit takes `1s / baud_rate`.
pub fn derive_timeout(
    baud_rate: u32,
    data_bits: u8,
    stop_bits: u8,
    parity: Parity,
    packet_size: usize,
) -> Result<Duration, Error> {
    if baud_rate == 0 {
        return Err(Error::InvalidParameters("baud rate must be positive".into()));
    }
    if !(5..=8).contains(&data_bits) {
        return Err(Error::InvalidParameters(format!(
            "data bits must be 5, 6, 7 or 8, got {data_bits}"
        )));
    }
    if !(1..=2).contains(&stop_bits) {
        return Err(Error::InvalidParameters(format!(
            "stop bits must be 1 or 2, got {stop_bits}"
        )));
    }
    if packet_size == 0 {
        return Err(Error::InvalidParameters("packet size must be positive".into()));
    }

    let parity_bits = match parity {
        Parity::None => 0,
        Parity::Even | Parity::Odd => 1,
    };
    let bits_per_character = 1 + u128::from(data_bits) + parity_bits + u128::from(stop_bits);

    // Multiply before dividing so that the result is exact to the nanosecond.
    let nanos = bits_per_character
        .checked_mul(packet_size as u128)
        .and_then(|bits| bits.checked_mul(1_000_000_000))
        .map(|scaled| scaled / u128::from(baud_rate))
        .ok_or(Error::TimeoutOverflow)?;

    let nanos = u64::try_from(nanos).map_err(|_| Error::TimeoutOverflow)?;

    Ok(Duration::from_nanos(nanos))
}

/// Options for one serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    address: String,
    baud_rate: u32,
    data_bits: u8,
    stop_bits: u8,
    parity: Parity,
    timeout: Duration,
    inter_frame_delay: Duration,
    retries: usize,
    poll: bool,
    poll_interval: Duration,
    queue_capacity: usize,
    rs485: Rs485Options,
}

impl LinkOptions {
    /// Start a new builder.
    /// The address should likely be along the lines of `/dev/ttyUSBx` on unix, and `COMx` on Windows.
    pub fn builder(address: &str) -> LinkOptionsBuilder {
        LinkOptionsBuilder::new(address)
    }

    /// The transport identifier.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Data bits per character.
    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    /// Stop bits per character.
    pub fn stop_bits(&self) -> u8 {
        self.stop_bits
    }

    /// Parity.
    pub fn parity(&self) -> Parity {
        self.parity
    }

    /// Deadline for a single read or write call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Pause between the end of one exchange and the start of the next.
    pub fn inter_frame_delay(&self) -> Duration {
        self.inter_frame_delay
    }

    /// Write attempts per frame before the frame is dropped.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Whether the poll loop runs.
    pub fn poll(&self) -> bool {
        self.poll
    }

    /// Time between poll cycles.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// How many frames may wait in the write queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// RS485 settings.
    pub fn rs485(&self) -> &Rs485Options {
        &self.rs485
    }

    /// Check that the options describe a link which may be opened.
    pub fn validate(&self) -> Result<(), Error> {
        if self.address.is_empty() {
            return Err(Error::BadConfig("the address cannot be empty".into()));
        }

        derive_timeout(
            self.baud_rate,
            self.data_bits,
            self.stop_bits,
            self.parity,
            DEFAULT_PACKET_SIZE,
        )
        .map_err(|e| Error::BadConfig(format!("`{}`: {e}", self.address)))?;

        if self.parity == Parity::None && self.stop_bits != 2 {
            return Err(Error::BadConfig(format!(
                "`{}`: no parity requires 2 stop bits, got {}",
                self.address, self.stop_bits
            )));
        }

        if self.queue_capacity == 0 {
            return Err(Error::BadConfig(format!(
                "`{}`: the write queue needs room for at least one frame",
                self.address
            )));
        }

        Ok(())
    }
}

impl Display for LinkOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}-{}{}{}",
            self.address, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// Builder for [`LinkOptions`].
#[derive(Debug, Clone)]
pub struct LinkOptionsBuilder {
    address: String,
    baud_rate: u32,
    data_bits: u8,
    stop_bits: u8,
    parity: Parity,
    timeout: Option<Duration>,
    retries: usize,
    poll: bool,
    poll_interval: Duration,
    queue_capacity: usize,
    rs485: Rs485Options,
}

impl LinkOptionsBuilder {
    /// Start a new builder with default framing (19200 baud, 8E1).
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::Even,
            timeout: None,
            retries: DEFAULT_RETRIES,
            poll: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rs485: Rs485Options::default(),
        }
    }

    /// Set the baud rate.
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the data bits (5 to 8).
    pub fn data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set the stop bits (1 or 2).
    pub fn stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set the parity.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set an explicit read/write timeout.
    /// Will be derived from the framing parameters if not set.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the number of write attempts per frame.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Enable or disable polling.
    pub fn poll(mut self, poll: bool) -> Self {
        self.poll = poll;
        self
    }

    /// Set the time between poll cycles.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how many frames may wait in the write queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the RS485 options.
    pub fn rs485(mut self, rs485: Rs485Options) -> Self {
        self.rs485 = rs485;
        self
    }

    /// Finish the options.
    ///
    /// A timeout which cannot be derived falls back to [`DEFAULT_TIMEOUT`] instead of failing,
    /// bad framing is reported by [`LinkOptions::validate`] when the link starts.
    #[must_use]
    pub fn build(self) -> LinkOptions {
        let derived = derive_timeout(
            self.baud_rate,
            self.data_bits,
            self.stop_bits,
            self.parity,
            DEFAULT_PACKET_SIZE,
        );

        if let Err(e) = &derived {
            debug!(address = %self.address, %e, "Could not derive timeout, using fallback");
        }

        let timeout = self
            .timeout
            .unwrap_or_else(|| derived.as_ref().copied().unwrap_or(DEFAULT_TIMEOUT));
        let inter_frame_delay = derived.unwrap_or(timeout);

        LinkOptions {
            address: self.address,
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            timeout,
            inter_frame_delay,
            retries: self.retries,
            poll: self.poll,
            poll_interval: self.poll_interval,
            queue_capacity: self.queue_capacity,
            rs485: self.rs485,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nine_six_hundred_8n1_fifteen_bytes() {
        let timeout = derive_timeout(9600, 8, 1, Parity::None, 15).unwrap();

        // 15 characters of 10 bits at 9600 baud.
        assert_eq!(timeout, Duration::from_micros(15_625));
    }

    #[test]
    fn parity_adds_a_bit() {
        let none = derive_timeout(19_200, 8, 1, Parity::None, 1).unwrap();
        let even = derive_timeout(19_200, 8, 1, Parity::Even, 1).unwrap();

        assert_eq!(even - none, Duration::from_nanos(1_000_000_000 / 19_200));
    }

    #[test]
    fn bad_framing_is_rejected() {
        assert!(matches!(
            derive_timeout(0, 8, 1, Parity::None, 15),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            derive_timeout(9600, 4, 1, Parity::None, 15),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            derive_timeout(9600, 9, 1, Parity::None, 15),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            derive_timeout(9600, 8, 3, Parity::None, 15),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            derive_timeout(9600, 8, 1, Parity::None, 0),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn huge_packets_overflow() {
        assert!(matches!(
            derive_timeout(1, 8, 2, Parity::Odd, usize::MAX),
            Err(Error::TimeoutOverflow)
        ));
    }

    #[test]
    fn parity_letters() {
        assert_eq!("N".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("Odd".parse::<Parity>().unwrap(), Parity::Odd);
        assert!("M".parse::<Parity>().is_err());
    }

    #[test]
    fn timeout_is_derived_unless_given() {
        let derived = LinkOptions::builder("/dev/ttyUSB0")
            .baud_rate(9600)
            .parity(Parity::None)
            .stop_bits(2)
            .build();
        assert_eq!(
            derived.timeout(),
            derive_timeout(9600, 8, 2, Parity::None, DEFAULT_PACKET_SIZE).unwrap()
        );
        assert_eq!(derived.timeout(), derived.inter_frame_delay());

        let explicit = LinkOptions::builder("/dev/ttyUSB0")
            .baud_rate(9600)
            .timeout(Duration::from_secs(1))
            .build();
        assert_eq!(explicit.timeout(), Duration::from_secs(1));
        assert!(explicit.inter_frame_delay() < explicit.timeout());
    }

    #[test]
    fn underivable_timeout_falls_back() {
        let options = LinkOptions::builder("/dev/ttyUSB0").baud_rate(0).build();

        assert_eq!(options.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(options.inter_frame_delay(), DEFAULT_TIMEOUT);
        assert!(options.validate().is_err());
    }

    #[test]
    fn no_parity_needs_two_stop_bits() {
        let options = LinkOptions::builder("COM3")
            .parity(Parity::None)
            .stop_bits(1)
            .build();

        let problem = options.validate().unwrap_err().try_into_bad_config().unwrap();
        assert!(problem.contains("2 stop bits"));

        let options = LinkOptions::builder("COM3")
            .parity(Parity::None)
            .stop_bits(2)
            .build();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn defaults_are_valid() {
        let options = LinkOptions::builder("COM3").build();

        assert!(options.validate().is_ok());
        assert_eq!(options.to_string(), "COM3 19200-8E1");
    }

    #[test]
    fn empty_address_is_rejected() {
        assert!(LinkOptions::builder("").build().validate().is_err());
    }
}
