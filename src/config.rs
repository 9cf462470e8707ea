use std::{path::Path, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    options::{LinkOptions, Parity, Rs485Options},
};

fn default_baud_rate() -> u32 {
    19_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_retries() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    16
}

/// A link as described by a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// The path to the port.
    /// Likely "/dev/ttyUSBx" or "COMx".
    pub address: String,

    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits, 5 to 8.
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Stop bits, 1 or 2.
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Parity.
    #[serde(default)]
    pub parity: Parity,

    /// Read/write timeout in milliseconds.
    /// Derived from the framing if omitted.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Write attempts per frame.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Whether the poll commands are sent periodically.
    #[serde(default)]
    pub poll: bool,

    /// Time between poll cycles in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How many frames may wait in the write queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Commands sent each poll cycle, in order.
    #[serde(default)]
    pub poll_commands: Vec<Vec<u8>>,

    /// RS485 settings.
    #[serde(default)]
    pub rs485: Option<Rs485Options>,
}

impl LinkConfig {
    /// A link with default framing.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            timeout_ms: None,
            retries: default_retries(),
            poll: false,
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            poll_commands: vec![],
            rs485: None,
        }
    }

    /// The options for opening this link.
    pub fn options(&self) -> LinkOptions {
        let mut builder = LinkOptions::builder(&self.address)
            .baud_rate(self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .retries(self.retries)
            .poll(self.poll)
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .queue_capacity(self.queue_capacity);

        if let Some(timeout_ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }

        if let Some(rs485) = &self.rs485 {
            builder = builder.rs485(rs485.clone());
        }

        builder.build()
    }
}

/// The configuration used for running the links.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    /// The links to open when starting.
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not a valid configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        let mut meter = LinkConfig::new("/dev/ttyUSB0");
        meter.baud_rate = 9600;
        meter.parity = Parity::None;
        meter.stop_bits = 2;
        meter.poll = true;
        meter.poll_interval_ms = 1000;
        meter.poll_commands = vec![
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD],
            vec![0x01, 0x04, 0x00, 0x10, 0x00, 0x02, 0x70, 0x0E],
        ];

        let mut relay = LinkConfig::new("/dev/ttyUSB1");
        relay.timeout_ms = Some(500);
        relay.retries = 5;

        Self {
            links: vec![meter, relay],
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(format!("Could not serialize configuration: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    fn check_duplicate_addresses(&self) -> Result<(), Error> {
        let duplicates = self
            .links
            .iter()
            .map(|link| &link.address)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!("A port can only be driven by one link. Duplicates: {duplicates:?}")))
        }
    }

    fn check_links(&self) -> Result<(), Error> {
        for (index, link) in self.links.iter().enumerate() {
            link.options().validate().map_err(|e| {
                Error::BadConfig(format!(
                    "The link with index {index} (zero indexed) is not valid. Problem: {e}"
                ))
            })?;
        }

        Ok(())
    }

    /// Check every link and that no port appears twice.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_links()?;
        self.check_duplicate_addresses()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serialize() {
        let c = Config::example();

        println!("{}", c.serialize_pretty().unwrap());
    }

    #[test]
    fn example_survives_serialization() {
        let c = Config::example();
        let serialized = c.serialize_pretty().unwrap();

        assert_eq!(Config::deserialize(&serialized).unwrap(), c);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    links: [
        (
            address: "/dev/ttyUSB0",
            baud_rate: 9600,
            parity: None,
            stop_bits: 2,
            poll: true,
            poll_commands: [
                [1, 3, 0, 0, 0, 10, 197, 205],
            ],
        ),
        (
            address: "COM3",
            timeout_ms: 250,
        ),
    ],
)
"#;
        let config = Config::deserialize(input).unwrap();
        assert!(config.validate().is_ok());

        let meter = config.links[0].options();
        assert_eq!(meter.baud_rate(), 9600);
        assert_eq!(meter.parity(), Parity::None);
        assert!(meter.poll());
        assert_eq!(config.links[0].poll_commands.len(), 1);

        let other = config.links[1].options();
        assert_eq!(other.timeout(), Duration::from_millis(250));
        assert_eq!(other.parity(), Parity::Even);
        assert_eq!(other.retries(), 3);
    }

    #[test]
    fn not_ron_is_bad_config() {
        let err = Config::deserialize("links = []")
            .unwrap_err()
            .try_into_bad_config()
            .unwrap();

        assert!(err.contains("Not a valid configuration"));
    }

    #[test]
    fn bad_config_duplicates() {
        let c = Config {
            links: vec![
                LinkConfig::new("COM0"),
                LinkConfig::new("COM1"),
                LinkConfig::new("COM4"),
                LinkConfig::new("COM4"), // Duplicate!
            ],
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        // Let's do some assertions that enforces our error messages to at least be decent.
        assert!(!err.contains("COM1"));
        assert!(err.contains("COM4"));
    }

    #[test]
    fn bad_config_framing() {
        let mut bad = LinkConfig::new("COM2");
        bad.parity = Parity::None;
        bad.stop_bits = 1;

        let c = Config {
            links: vec![LinkConfig::new("COM0"), bad],
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        // Error message countains the index of our bad link
        assert!(err.contains("index 1"));
        assert!(err.contains("2 stop bits"));
    }
}
