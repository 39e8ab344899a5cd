//! Evse -- a connected OpenEVSE charging controller.
//!
//! This module ties the command builders and reply parsers in [`commands`]
//! to a [`RapiIo`] connection. Each operation is one or two RAPI exchanges;
//! all of them may be called concurrently from several tasks, in which case
//! the dispatcher serializes them on the wire.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use rapi_core::{Command, Error, EvseState, Reply, Result};
use rapi_io::{RapiIo, Subscription};

use crate::commands::{
    self, CapacityRange, ChargeTimer, FaultCounters, LcdColor, LcdType, Measurement,
    MeterCalibration, SafetyCheck, ServiceLevel, Session, Settings, StatusAction, Temperatures,
    Version,
};

/// A connected OpenEVSE controller.
///
/// Constructed via [`EvseBuilder`](crate::builder::EvseBuilder).
pub struct Evse {
    io: RapiIo,
    /// Observer backing [`status_change`](Self::status_change).
    changes: Mutex<Subscription>,
    reset_timeout: Duration,
    reset_settle: Duration,
}

impl Evse {
    pub(crate) fn new(io: RapiIo, reset_timeout: Duration, reset_settle: Duration) -> Self {
        let changes = Mutex::new(io.subscribe());
        Evse {
            io,
            changes,
            reset_timeout,
            reset_settle,
        }
    }

    /// The underlying connection, for raw access.
    pub fn io(&self) -> &RapiIo {
        &self.io
    }

    /// Send an arbitrary command and return its reply.
    pub async fn raw(&self, command: &Command) -> Result<Reply> {
        self.io.send(command).await
    }

    /// Close the connection.
    pub async fn shutdown(self) -> Result<()> {
        self.io.shutdown().await
    }

    // -----------------------------------------------------------------
    // State
    // -----------------------------------------------------------------

    /// Current controller state.
    pub async fn status(&self) -> Result<EvseState> {
        let reply = self.io.send(&commands::cmd_get_state()).await?;
        commands::parse_state_reply(&reply).map(|(state, _)| state)
    }

    /// Enable, disable or put the controller to sleep, and return the
    /// resulting state.
    ///
    /// Firmware that reports the new state in the reply saves a `GS`
    /// round trip.
    pub async fn set_status(&self, action: StatusAction) -> Result<EvseState> {
        let reply = self.io.send(&commands::cmd_status_action(action)).await?;
        if reply.params.is_empty() {
            self.status().await
        } else {
            commands::parse_state(&reply, 0)
        }
    }

    pub async fn enable(&self) -> Result<EvseState> {
        self.set_status(StatusAction::Enable).await
    }

    pub async fn disable(&self) -> Result<EvseState> {
        self.set_status(StatusAction::Disable).await
    }

    pub async fn sleep(&self) -> Result<EvseState> {
        self.set_status(StatusAction::Sleep).await
    }

    /// Reboot the controller.
    ///
    /// `FR` gets no reply. The controller announces itself with a `$ST`
    /// notification once it has rebooted; after that a short settle period
    /// lets it finish booting before the next command. Returns the state
    /// from that notification, or [`Error::Timeout`] if none arrives.
    pub async fn reset(&self) -> Result<EvseState> {
        let mut boot = self.io.subscribe();
        self.io.send_silent(&commands::cmd_reset()).await?;

        let notification = match tokio::time::timeout(self.reset_timeout, boot.recv()).await {
            Ok(Some(notification)) => notification,
            Ok(None) => return Err(Error::TransportClosed),
            Err(_) => {
                warn!(timeout = ?self.reset_timeout, "controller did not come back after reset");
                return Err(Error::Timeout);
            }
        };
        debug!(state = %notification.state, "controller rebooted");

        tokio::time::sleep(self.reset_settle).await;
        Ok(notification.state)
    }

    /// Register an observer for every state change notification.
    pub fn subscribe(&self) -> Subscription {
        self.io.subscribe()
    }

    /// The latest state change notified since the previous call, if any.
    ///
    /// Only the most recent change is reported; earlier ones are dropped.
    pub fn status_change(&self) -> Option<EvseState> {
        let mut changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
        std::iter::from_fn(|| changes.try_recv())
            .last()
            .map(|n| n.state)
    }

    // -----------------------------------------------------------------
    // Display
    // -----------------------------------------------------------------

    pub async fn lcd_backlight_color(&self, color: LcdColor) -> Result<()> {
        self.io.send(&commands::cmd_set_backlight(color)).await?;
        Ok(())
    }

    /// Fitted LCD type, read from the settings flags.
    pub async fn lcd_type(&self) -> Result<LcdType> {
        Ok(self.settings().await?.flags.lcd_type())
    }

    pub async fn set_lcd_type(&self, lcd: LcdType) -> Result<()> {
        self.io.send(&commands::cmd_set_lcd_type(lcd)).await?;
        Ok(())
    }

    /// Write `text` on the LCD at column `x`, row `y`.
    pub async fn display_text(&self, x: u8, y: u8, text: &str) -> Result<()> {
        self.io.send(&commands::cmd_display_text(x, y, text)).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Clock and limits
    // -----------------------------------------------------------------

    /// Read the real-time clock. [`Error::NoClock`] if none is fitted.
    pub async fn time(&self) -> Result<NaiveDateTime> {
        let reply = self.io.send(&commands::cmd_get_time()).await?;
        commands::parse_time(&reply)
    }

    pub async fn set_time(&self, at: NaiveDateTime) -> Result<()> {
        self.io.send(&commands::cmd_set_time(at)?).await?;
        Ok(())
    }

    /// Charge time limit in minutes (0 means no limit).
    pub async fn time_limit(&self) -> Result<u32> {
        let reply = self.io.send(&commands::cmd_get_time_limit()).await?;
        commands::parse_time_limit(&reply)
    }

    /// Set the charge time limit. The controller stores quarter hours, so
    /// the value is rounded; the stored limit is returned.
    pub async fn set_time_limit(&self, minutes: u32) -> Result<u32> {
        self.io.send(&commands::cmd_set_time_limit(minutes)?).await?;
        Ok(commands::stored_time_limit(minutes))
    }

    /// Charge limit in kWh (0 means no limit).
    pub async fn charge_limit(&self) -> Result<u32> {
        let reply = self.io.send(&commands::cmd_get_charge_limit()).await?;
        commands::parse_charge_limit(&reply)
    }

    pub async fn set_charge_limit(&self, kwh: u32) -> Result<()> {
        self.io.send(&commands::cmd_set_charge_limit(kwh)).await?;
        Ok(())
    }

    /// Set the charge timer, or cancel it with `None`.
    pub async fn set_timer(&self, timer: Option<ChargeTimer>) -> Result<()> {
        self.io.send(&commands::cmd_set_timer(timer)).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Capacity and configuration
    // -----------------------------------------------------------------

    /// Current capacity and settings flags.
    pub async fn settings(&self) -> Result<Settings> {
        let reply = self.io.send(&commands::cmd_get_settings()).await?;
        commands::parse_settings(&reply)
    }

    /// Current capacity in amperes.
    pub async fn current_capacity(&self) -> Result<u16> {
        Ok(self.settings().await?.current_capacity)
    }

    /// Set the current capacity. The controller rejects values outside
    /// [`current_capacity_range`](Self::current_capacity_range).
    pub async fn set_current_capacity(&self, amps: u16) -> Result<()> {
        self.io.send(&commands::cmd_set_current_capacity(amps)).await?;
        Ok(())
    }

    pub async fn current_capacity_range(&self) -> Result<CapacityRange> {
        let reply = self.io.send(&commands::cmd_get_capacity_range()).await?;
        commands::parse_capacity_range(&reply)
    }

    /// Whether a safety check is enabled.
    pub async fn safety_check(&self, check: SafetyCheck) -> Result<bool> {
        Ok(self.settings().await?.flags.check(check))
    }

    pub async fn set_safety_check(&self, check: SafetyCheck, enabled: bool) -> Result<()> {
        self.io.send(&commands::cmd_set_check(check, enabled)).await?;
        Ok(())
    }

    /// Configured service level; [`ServiceLevel::Auto`] when detection is on.
    pub async fn service_level(&self) -> Result<ServiceLevel> {
        let flags = self.settings().await?.flags;
        Ok(if flags.auto_service_level() {
            ServiceLevel::Auto
        } else if flags.service_level() == 2 {
            ServiceLevel::Level2
        } else {
            ServiceLevel::Level1
        })
    }

    pub async fn set_service_level(&self, level: ServiceLevel) -> Result<()> {
        self.io.send(&commands::cmd_set_service_level(level)).await?;
        Ok(())
    }

    /// Turn command echo on or off. This client expects echo off.
    pub async fn set_echo(&self, enabled: bool) -> Result<()> {
        self.io.send(&commands::cmd_set_echo(enabled)).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Metering
    // -----------------------------------------------------------------

    /// Lifetime accumulated energy in Wh.
    pub async fn accumulated_wh(&self) -> Result<u64> {
        let reply = self.io.send(&commands::cmd_get_energy_usage()).await?;
        Ok(commands::parse_energy_usage(&reply)?.accumulated_wh)
    }

    pub async fn set_accumulated_wh(&self, wh: u64) -> Result<()> {
        self.io.send(&commands::cmd_set_accumulated_wh(wh)).await?;
        Ok(())
    }

    pub async fn fault_counters(&self) -> Result<FaultCounters> {
        let reply = self.io.send(&commands::cmd_get_fault_counters()).await?;
        commands::parse_fault_counters(&reply)
    }

    pub async fn charging_current_and_voltage(&self) -> Result<Measurement> {
        let reply = self.io.send(&commands::cmd_get_current_and_voltage()).await?;
        commands::parse_measurement(&reply)
    }

    /// Enter or leave ammeter calibration mode.
    pub async fn set_ammeter_calibration(&self, enabled: bool) -> Result<()> {
        self.io
            .send(&commands::cmd_set_ammeter_calibration(enabled))
            .await?;
        Ok(())
    }

    pub async fn ammeter_settings(&self) -> Result<MeterCalibration> {
        let reply = self.io.send(&commands::cmd_get_ammeter_settings()).await?;
        commands::parse_meter_calibration(&reply)
    }

    pub async fn set_ammeter_settings(&self, settings: MeterCalibration) -> Result<()> {
        self.io
            .send(&commands::cmd_set_ammeter_settings(settings))
            .await?;
        Ok(())
    }

    pub async fn voltmeter_settings(&self) -> Result<MeterCalibration> {
        let reply = self.io.send(&commands::cmd_get_voltmeter_settings()).await?;
        commands::parse_meter_calibration(&reply)
    }

    pub async fn set_voltmeter_settings(&self, settings: MeterCalibration) -> Result<()> {
        self.io
            .send(&commands::cmd_set_voltmeter_settings(settings))
            .await?;
        Ok(())
    }

    pub async fn temperatures(&self) -> Result<Temperatures> {
        let reply = self.io.send(&commands::cmd_get_temperatures()).await?;
        commands::parse_temperatures(&reply)
    }

    /// Elapsed time and energy of the session in progress.
    ///
    /// Returns [`Error::NotCharging`] unless the controller is charging.
    pub async fn elapsed(&self) -> Result<Session> {
        let reply = self.io.send(&commands::cmd_get_state()).await?;
        let (state, elapsed) = commands::parse_state_reply(&reply)?;
        if state != EvseState::Charging {
            return Err(Error::NotCharging);
        }
        let reply = self.io.send(&commands::cmd_get_energy_usage()).await?;
        let usage = commands::parse_energy_usage(&reply)?;
        Ok(Session {
            elapsed,
            energy_wh: usage.session_watt_seconds as f64 / 3600.0,
        })
    }

    pub async fn version(&self) -> Result<Version> {
        let reply = self.io.send(&commands::cmd_get_version()).await?;
        commands::parse_version(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapi_core::ChecksumMode;
    use rapi_io::{IoConfig, encode_command, spawn_io_task};
    use rapi_test_harness::{MockHandle, MockTransport};

    fn frame(code: &str, params: &[&str]) -> Vec<u8> {
        encode_command(&Command::with_params(code, params), ChecksumMode::Xor).unwrap()
    }

    fn expect(mock: &mut MockTransport, command: Command, reply: &[&str]) {
        mock.expect(
            &encode_command(&command, ChecksumMode::Xor).unwrap(),
            &frame("OK", reply),
        );
    }

    /// Helper to build an Evse on a MockTransport for testing.
    fn make_test_evse(mock: MockTransport) -> (Evse, MockHandle) {
        let handle = mock.handle();
        let io = spawn_io_task(Box::new(mock), IoConfig::default());
        (
            Evse::new(io, Duration::from_secs(10), Duration::from_secs(1)),
            handle,
        )
    }

    // -----------------------------------------------------------------
    // State
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn status_reads_state() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_state(), &["2", "0"]);
        let (evse, _) = make_test_evse(mock);
        assert_eq!(evse.status().await.unwrap(), EvseState::Connected);
    }

    #[tokio::test]
    async fn enable_uses_state_in_reply() {
        let mut mock = MockTransport::new();
        expect(&mut mock, Command::new("FE"), &["2"]);
        let (evse, handle) = make_test_evse(mock);
        assert_eq!(evse.enable().await.unwrap(), EvseState::Connected);
        assert_eq!(handle.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn sleep_falls_back_to_status_query() {
        let mut mock = MockTransport::new();
        expect(&mut mock, Command::new("FS"), &[]);
        expect(&mut mock, commands::cmd_get_state(), &["254", "0"]);
        let (evse, _) = make_test_evse(mock);
        assert_eq!(evse.sleep().await.unwrap(), EvseState::Sleeping);
    }

    #[tokio::test]
    async fn status_state_is_decimal() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_state(), &["10", "0"]);
        expect(&mut mock, commands::cmd_get_state(), &["255", "0"]);
        let (evse, _) = make_test_evse(mock);
        assert_eq!(evse.status().await.unwrap(), EvseState::OverTemperature);
        assert_eq!(evse.status().await.unwrap(), EvseState::Disabled);
    }

    #[tokio::test]
    async fn disable_reply_state_is_hex() {
        let mut mock = MockTransport::new();
        expect(&mut mock, Command::new("FD"), &["ff"]);
        let (evse, _) = make_test_evse(mock);
        assert_eq!(evse.disable().await.unwrap(), EvseState::Disabled);
    }

    #[tokio::test]
    async fn disable_rejected() {
        let mut mock = MockTransport::new();
        mock.expect(&frame("FD", &[]), &frame("NK", &[]));
        let (evse, _) = make_test_evse(mock);
        assert!(matches!(
            evse.disable().await,
            Err(Error::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn status_change_reports_latest_only() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_state(), &["2", "0"]);
        let (evse, handle) = make_test_evse(mock);
        assert_eq!(evse.status_change(), None);

        handle.inject(&frame("ST", &["3"]));
        handle.inject(&frame("ST", &["2"]));
        // The reply is read after both notifications.
        evse.status().await.unwrap();

        assert_eq!(evse.status_change(), Some(EvseState::Connected));
        assert_eq!(evse.status_change(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_waits_for_boot_notification() {
        let mut mock = MockTransport::new();
        mock.expect_delayed(
            &frame("FR", &[]),
            &frame("ST", &["1"]),
            Duration::from_secs(3),
        );
        let (evse, _) = make_test_evse(mock);

        let start = tokio::time::Instant::now();
        assert_eq!(evse.reset().await.unwrap(), EvseState::NotConnected);
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(evse.status_change(), Some(EvseState::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_times_out_without_notification() {
        let mut mock = MockTransport::new();
        mock.expect(&frame("FR", &[]), b"");
        let (evse, _) = make_test_evse(mock);
        assert!(matches!(evse.reset().await, Err(Error::Timeout)));
    }

    // -----------------------------------------------------------------
    // Clock and limits
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn time_without_clock() {
        let mut mock = MockTransport::new();
        expect(
            &mut mock,
            commands::cmd_get_time(),
            &["165", "165", "165", "165", "165", "85"],
        );
        let (evse, _) = make_test_evse(mock);
        assert!(matches!(evse.time().await, Err(Error::NoClock)));
    }

    #[tokio::test]
    async fn set_time_limit_returns_stored_value() {
        let mut mock = MockTransport::new();
        expect(&mut mock, Command::new("S3").arg(6), &[]);
        let (evse, _) = make_test_evse(mock);
        assert_eq!(evse.set_time_limit(95).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn invalid_time_limit_never_reaches_the_wire() {
        let (evse, handle) = make_test_evse(MockTransport::new());
        assert!(matches!(
            evse.set_time_limit(5000).await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(handle.sent_data().is_empty());
    }

    // -----------------------------------------------------------------
    // Capacity and configuration
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn current_capacity_and_checks_from_settings() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_settings(), &["32", "0008"]);
        expect(&mut mock, commands::cmd_get_settings(), &["32", "0008"]);
        expect(&mut mock, commands::cmd_get_settings(), &["32", "0008"]);
        let (evse, _) = make_test_evse(mock);

        assert_eq!(evse.current_capacity().await.unwrap(), 32);
        assert!(!evse.safety_check(SafetyCheck::Ground).await.unwrap());
        assert!(evse.safety_check(SafetyCheck::Diode).await.unwrap());
    }

    #[tokio::test]
    async fn service_level_auto_or_fixed() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_settings(), &["16", "0"]);
        expect(&mut mock, commands::cmd_get_settings(), &["40", "21"]);
        let (evse, _) = make_test_evse(mock);

        assert_eq!(evse.service_level().await.unwrap(), ServiceLevel::Auto);
        assert_eq!(evse.service_level().await.unwrap(), ServiceLevel::Level2);
    }

    #[tokio::test]
    async fn set_current_capacity_sends_amps() {
        let mut mock = MockTransport::new();
        expect(&mut mock, Command::new("SC").arg(24), &[]);
        let (evse, handle) = make_test_evse(mock);
        evse.set_current_capacity(24).await.unwrap();
        assert_eq!(handle.sent_data(), [b"$SC 24^12\r".to_vec()]);
    }

    // -----------------------------------------------------------------
    // Metering
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn elapsed_requires_charging() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_state(), &["2", "0"]);
        let (evse, _) = make_test_evse(mock);
        assert!(matches!(evse.elapsed().await, Err(Error::NotCharging)));
    }

    #[tokio::test]
    async fn elapsed_while_charging() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_state(), &["3", "3600"]);
        expect(&mut mock, commands::cmd_get_energy_usage(), &["7200000", "1500"]);
        let (evse, _) = make_test_evse(mock);

        let session = evse.elapsed().await.unwrap();
        assert_eq!(session.elapsed, Duration::from_secs(3600));
        assert_eq!(session.energy_wh, 2000.0);
    }

    #[tokio::test]
    async fn accumulated_wh_reads_second_field() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_energy_usage(), &["0", "98765"]);
        let (evse, _) = make_test_evse(mock);
        assert_eq!(evse.accumulated_wh().await.unwrap(), 98_765);
    }

    // -----------------------------------------------------------------
    // LCD and meter calibration
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn lcd_type_read_and_set() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_settings(), &["32", "0100"]);
        expect(&mut mock, Command::new("S0").arg(1), &[]);
        let (evse, handle) = make_test_evse(mock);

        assert_eq!(evse.lcd_type().await.unwrap(), LcdType::Monochrome);
        evse.set_lcd_type(LcdType::Rgb).await.unwrap();
        assert_eq!(handle.sent_data()[1], frame("S0", &["1"]));
    }

    #[tokio::test]
    async fn ammeter_calibration_mode() {
        let mut mock = MockTransport::new();
        expect(&mut mock, Command::new("S2").arg(1), &[]);
        mock.expect(&frame("S2", &["0"]), &frame("NK", &[]));
        let (evse, _) = make_test_evse(mock);

        evse.set_ammeter_calibration(true).await.unwrap();
        assert!(matches!(
            evse.set_ammeter_calibration(false).await,
            Err(Error::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn meter_settings_read_and_write() {
        let cal = MeterCalibration {
            scale_factor: 220,
            offset: -3,
        };
        let mut mock = MockTransport::new();
        expect(&mut mock, Command::new("GA"), &["220", "-3"]);
        expect(&mut mock, Command::new("SA").arg(220).arg(-3), &[]);
        expect(&mut mock, Command::new("GM"), &["35500", "0"]);
        expect(&mut mock, Command::new("SM").arg(220).arg(-3), &[]);
        let (evse, handle) = make_test_evse(mock);

        assert_eq!(evse.ammeter_settings().await.unwrap(), cal);
        evse.set_ammeter_settings(cal).await.unwrap();
        let volts = evse.voltmeter_settings().await.unwrap();
        assert_eq!(volts.scale_factor, 35_500);
        assert_eq!(volts.offset, 0);
        evse.set_voltmeter_settings(cal).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn version_reads_both_fields() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_version(), &["4.8.0", "3.0.1"]);
        let (evse, _) = make_test_evse(mock);
        let v = evse.version().await.unwrap();
        assert_eq!(v.firmware, "4.8.0");
        assert_eq!(v.protocol, "3.0.1");
    }

    #[tokio::test]
    async fn short_reply_is_a_protocol_error() {
        let mut mock = MockTransport::new();
        expect(&mut mock, commands::cmd_get_temperatures(), &["215"]);
        let (evse, _) = make_test_evse(mock);
        assert!(matches!(evse.temperatures().await, Err(Error::Protocol(_))));
    }
}
