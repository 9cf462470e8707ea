//! A serial port transport.

use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::{BoxedTransport, Connector};
use crate::{
    error::Error,
    options::{LinkOptions, Parity},
};

/// Opens serial ports through `tokio-serial`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits, Error> {
    Ok(match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        other => {
            return Err(Error::BadConfig(format!(
                "data bits must be 5, 6, 7 or 8, got {other}"
            )))
        }
    })
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits, Error> {
    Ok(match bits {
        1 => tokio_serial::StopBits::One,
        2 => tokio_serial::StopBits::Two,
        other => {
            return Err(Error::BadConfig(format!(
                "stop bits must be 1 or 2, got {other}"
            )))
        }
    })
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

impl Connector for SerialConnector {
    fn open(&self, options: &LinkOptions) -> Result<BoxedTransport, Error> {
        debug!(%options, timeout = ?options.timeout(), "Opening port");

        if options.rs485().enabled {
            warn!(rs485 = ?options.rs485(), "RS485 settings are not applied by the serial driver, configure the adapter instead");
        }

        let serial_stream = tokio_serial::new(options.address(), options.baud_rate())
            .data_bits(data_bits(options.data_bits())?)
            .parity(parity(options.parity()))
            .stop_bits(stop_bits(options.stop_bits())?)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(options.timeout())
            .open_native_async()
            .map_err(|e| Error::Connection {
                address: options.address().to_string(),
                problem: e.to_string(),
            })?;

        info!(%options, "Opened port");

        Ok(Box::new(serial_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_device_is_a_connection_error() {
        let options = LinkOptions::builder("/dev/this-port-does-not-exist").build();

        let error = SerialConnector.open(&options).err().unwrap();

        assert!(matches!(error, Error::Connection { address, .. } if address == "/dev/this-port-does-not-exist"));
    }

    #[test]
    fn framing_conversion() {
        assert_eq!(data_bits(7).unwrap(), tokio_serial::DataBits::Seven);
        assert!(data_bits(9).is_err());
        assert_eq!(stop_bits(2).unwrap(), tokio_serial::StopBits::Two);
        assert!(stop_bits(0).is_err());
        assert_eq!(parity(Parity::Odd), tokio_serial::Parity::Odd);
    }
}
