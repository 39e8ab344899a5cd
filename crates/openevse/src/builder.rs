//! EvseBuilder -- fluent builder for constructing [`Evse`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, checksum mode and timeouts before the
//! connection is opened.
//!
//! # Example
//!
//! ```no_run
//! use openevse::EvseBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> rapi_core::Result<()> {
//! let evse = EvseBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .command_timeout(Duration::from_millis(800))
//!     .build()
//!     .await?;
//! println!("{}", evse.status().await?);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tracing::{debug, warn};

use rapi_core::ChecksumMode;
use rapi_core::error::{Error, Result};
use rapi_core::transport::Transport;
use rapi_io::{IoConfig, SendPolicy, spawn_io_task};
use rapi_transport::{DEFAULT_BAUD_RATE, HttpTransport, SerialTransport};

use crate::evse::Evse;

/// Fluent builder for [`Evse`].
///
/// All configuration has defaults suited to stock firmware, so the simplest
/// usage is:
///
/// ```ignore
/// let evse = EvseBuilder::new().serial_port("/dev/ttyUSB0").build().await?;
/// ```
pub struct EvseBuilder {
    serial_port: Option<String>,
    http_host: Option<String>,
    baud_rate: u32,
    io: IoConfig,
    reset_timeout: Duration,
    reset_settle: Duration,
    disable_echo_on_connect: bool,
}

impl EvseBuilder {
    pub fn new() -> Self {
        EvseBuilder {
            serial_port: None,
            http_host: None,
            baud_rate: DEFAULT_BAUD_RATE,
            io: IoConfig::default(),
            reset_timeout: Duration::from_secs(10),
            reset_settle: Duration::from_secs(1),
            disable_echo_on_connect: true,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Connect through the WiFi kit at `host` instead of a serial port.
    ///
    /// Ignored when [`serial_port()`](Self::serial_port) is also set.
    pub fn http_host(mut self, host: &str) -> Self {
        self.http_host = Some(host.to_string());
        self
    }

    /// Override the default baud rate (115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Checksum mode for outgoing commands (default: XOR).
    pub fn checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.io.checksum_mode = mode;
        self
    }

    /// Set the timeout for waiting for a reply to a single command
    /// (default: 500ms).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.io.command_timeout = timeout;
        self
    }

    /// Set what happens when a command is issued while another is in
    /// flight: wait for it ([`SendPolicy::Block`], default) or fail with
    /// [`Error::Busy`] ([`SendPolicy::FailFast`]).
    pub fn send_policy(mut self, policy: SendPolicy) -> Self {
        self.io.send_policy = policy;
        self
    }

    /// Enable or disable the single resend of an `SE` command whose reply
    /// could not be decoded (default: enabled).
    pub fn echo_retry(mut self, enabled: bool) -> Self {
        self.io.echo_retry = enabled;
        self
    }

    /// How long [`Evse::reset`] waits for the controller to come back
    /// (default: 10s).
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Pause after the controller has announced itself following a reset
    /// (default: 1s).
    pub fn reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle = settle;
        self
    }

    /// Send `SE 0` when connecting (default: enabled).
    pub fn disable_echo_on_connect(mut self, enabled: bool) -> Self {
        self.disable_echo_on_connect = enabled;
        self
    }

    /// Build an [`Evse`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `rapi-test-harness`) and for callers that
    /// manage the link themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Evse> {
        if self.io.command_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "command_timeout must be non-zero".into(),
            ));
        }

        let io = spawn_io_task(transport, self.io);
        let evse = Evse::new(io, self.reset_timeout, self.reset_settle);

        if self.disable_echo_on_connect {
            // Characters written to the port before we opened it can garble
            // the first exchange, so one failure is tolerated.
            if let Err(e) = evse.set_echo(false).await {
                warn!(error = %e, "disabling echo failed, retrying");
                evse.set_echo(false).await?;
            }
            debug!("echo disabled");
        }

        Ok(evse)
    }

    /// Build an [`Evse`] on a serial port or the WiFi kit.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) or
    /// [`http_host()`](Self::http_host) has been called.
    pub async fn build(self) -> Result<Evse> {
        let transport: Box<dyn Transport> = match (&self.serial_port, &self.http_host) {
            (Some(port), _) => Box::new(SerialTransport::open(port, self.baud_rate).await?),
            (None, Some(host)) => Box::new(HttpTransport::new(host)?),
            (None, None) => {
                return Err(Error::InvalidParameter(
                    "serial_port or http_host is required for build()".into(),
                ));
            }
        };
        self.build_with_transport(transport).await
    }
}

impl Default for EvseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapi_core::Command;
    use rapi_io::encode_command;
    use rapi_test_harness::MockTransport;

    fn xor(command: &Command) -> Vec<u8> {
        encode_command(command, ChecksumMode::Xor).unwrap()
    }

    #[tokio::test]
    async fn builder_disables_echo_on_connect() {
        let mut mock = MockTransport::new();
        mock.expect(b"$SE 0^22\r", b"$OK^20\r");
        let handle = mock.handle();

        EvseBuilder::new()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn builder_retries_echo_disable_once() {
        let mut mock = MockTransport::new();
        mock.expect(b"$SE 0^22\r", b"$NK^21\r");
        mock.expect(b"$SE 0^22\r", b"$OK^20\r");
        let handle = mock.handle();

        EvseBuilder::new()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert_eq!(handle.sent_data().len(), 2);
    }

    #[tokio::test]
    async fn builder_fails_when_echo_disable_keeps_failing() {
        let mut mock = MockTransport::new();
        mock.expect(b"$SE 0^22\r", b"$NK^21\r");
        mock.expect(b"$SE 0^22\r", b"$NK^21\r");

        let result = EvseBuilder::new().build_with_transport(Box::new(mock)).await;
        assert!(matches!(result, Err(Error::Rejected { .. })));
    }

    #[tokio::test]
    async fn builder_without_echo_disable_sends_nothing() {
        let mock = MockTransport::new();
        let handle = mock.handle();

        EvseBuilder::new()
            .disable_echo_on_connect(false)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn builder_applies_checksum_mode() {
        let mut mock = MockTransport::new();
        mock.expect(b"$GS*BE\r", b"$OK 1 0*5F\r");

        let evse = EvseBuilder::new()
            .checksum_mode(ChecksumMode::Additive)
            .disable_echo_on_connect(false)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert_eq!(
            evse.status().await.unwrap(),
            rapi_core::EvseState::NotConnected
        );
    }

    #[tokio::test]
    async fn builder_fluent_chain() {
        let mut mock = MockTransport::new();
        mock.expect(&xor(&Command::new("SE").arg(0)), b"$OK^20\r");

        let evse = EvseBuilder::new()
            .serial_port("/dev/ttyUSB0")
            .baud_rate(57_600)
            .command_timeout(Duration::from_millis(300))
            .send_policy(SendPolicy::FailFast)
            .echo_retry(false)
            .reset_timeout(Duration::from_secs(5))
            .reset_settle(Duration::from_millis(500))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();

        let config = evse.io().config();
        assert_eq!(config.command_timeout, Duration::from_millis(300));
        assert_eq!(config.send_policy, SendPolicy::FailFast);
        assert!(!config.echo_retry);
    }

    #[tokio::test]
    async fn builder_rejects_zero_timeout() {
        let result = EvseBuilder::new()
            .command_timeout(Duration::ZERO)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builder_http_host_selects_http_transport() {
        let evse = EvseBuilder::new()
            .http_host("127.0.0.1:9")
            .disable_echo_on_connect(false)
            .build()
            .await
            .unwrap();
        assert_eq!(evse.io().name(), "http://127.0.0.1:9/r");
    }

    #[tokio::test]
    async fn builder_serial_port_required_for_build() {
        let result = EvseBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
