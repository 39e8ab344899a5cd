//! Serial port transport for OpenEVSE controllers.
//!
//! The controller exposes RAPI on its USB/TTL serial console, normally at
//! 115200 baud, 8 data bits, no parity, 1 stop bit and no flow control.
//!
//! # Example
//!
//! ```no_run
//! use rapi_transport::SerialTransport;
//! use rapi_core::transport::Transport;
//!
//! # async fn example() -> rapi_core::Result<()> {
//! let transport = SerialTransport::open("/dev/ttyUSB0", 115200).await?;
//! let (reader, writer) = Box::new(transport).split();
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use rapi_core::error::{Error, Result};
use rapi_core::transport::{Transport, TransportRead, TransportWrite};

/// Baud rate of the OpenEVSE serial console.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port configuration. Framing is always 8N1.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (115200 on stock firmware).
    pub baud_rate: u32,
    /// Flow control (none on stock hardware).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            flow_control: FlowControl::None,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// An open serial connection to a controller.
pub struct SerialTransport {
    stream: SerialStream,
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port with the given baud rate and 8N1 framing.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            flow_control = ?config.flow_control,
            "Opening serial port"
        );

        let stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("Failed to open serial port {}: {}", port, e))
            })?;

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened");

        Ok(Self {
            stream,
            port_name: port.to_string(),
        })
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        let SerialTransport { stream, port_name } = *self;
        let (read, write) = tokio::io::split(stream);
        (
            Box::new(SerialReader {
                read,
                port_name: port_name.clone(),
            }),
            Box::new(SerialWriter {
                write: Some(write),
                port_name,
            }),
        )
    }
}

/// Map an I/O error, treating a vanished device as a closed link.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::TransportClosed,
        _ => Error::Io(e),
    }
}

struct SerialReader {
    read: ReadHalf<SerialStream>,
    port_name: String,
}

#[async_trait]
impl TransportRead for SerialReader {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read.read(buf).await {
            Ok(n) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = %String::from_utf8_lossy(&buf[..n]),
                    "Received data"
                );
                Ok(n)
            }
            Err(e) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
        }
    }
}

struct SerialWriter {
    write: Option<WriteHalf<SerialStream>>,
    port_name: String,
}

#[async_trait]
impl TransportWrite for SerialWriter {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let write = self.write.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            port = %self.port_name,
            bytes = data.len(),
            data = %String::from_utf8_lossy(data),
            "Sending data"
        );

        write.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            map_io_error(e)
        })?;

        write.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to flush serial port");
            map_io_error(e)
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut write) = self.write.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");
            if let Err(e) = write.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }
            tracing::info!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_default_matches_controller() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn flow_control_conversion() {
        assert_eq!(
            tokio_serial::FlowControl::from(FlowControl::None),
            tokio_serial::FlowControl::None
        );
        assert_eq!(
            tokio_serial::FlowControl::from(FlowControl::Hardware),
            tokio_serial::FlowControl::Hardware
        );
    }

    #[test]
    fn broken_pipe_maps_to_closed() {
        let e = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(map_io_error(e), Error::TransportClosed));
        let e = std::io::Error::other("glitch");
        assert!(matches!(map_io_error(e), Error::Io(_)));
    }

    #[tokio::test]
    async fn open_nonexistent_port_fails() {
        let result = SerialTransport::open("/dev/nonexistent-openevse-port", 115_200).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
