//! OpenEVSE RAPI command builders and reply parsers.
//!
//! Builders produce [`Command`] values; parsers consume the [`Reply`] the
//! dispatcher returned for them. Neither side performs I/O.
//!
//! # Number formats
//!
//! The controller mixes radixes. The state in `FE`/`FD`/`FS` replies, the
//! `GE` flags word and the `GF` fault counters are hexadecimal. The `GS`
//! state and everything else are decimal.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use rapi_core::{Command, Error, EvseState, Reply, Result};

// ---------------------------------------------------------------
// Value types
// ---------------------------------------------------------------

/// State-changing actions accepted by `FE`, `FD` and `FS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Enable,
    Disable,
    Sleep,
}

impl StatusAction {
    fn code(self) -> &'static str {
        match self {
            StatusAction::Enable => "FE",
            StatusAction::Disable => "FD",
            StatusAction::Sleep => "FS",
        }
    }
}

/// LCD backlight colors, in controller code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcdColor {
    Off,
    Red,
    Green,
    Yellow,
    Blue,
    Violet,
    Teal,
    White,
}

impl LcdColor {
    const ALL: [LcdColor; 8] = [
        LcdColor::Off,
        LcdColor::Red,
        LcdColor::Green,
        LcdColor::Yellow,
        LcdColor::Blue,
        LcdColor::Violet,
        LcdColor::Teal,
        LcdColor::White,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        match self {
            LcdColor::Off => "off",
            LcdColor::Red => "red",
            LcdColor::Green => "green",
            LcdColor::Yellow => "yellow",
            LcdColor::Blue => "blue",
            LcdColor::Violet => "violet",
            LcdColor::Teal => "teal",
            LcdColor::White => "white",
        }
    }
}

impl fmt::Display for LcdColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LcdColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LcdColor::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidParameter(format!("unknown LCD color {s:?}")))
    }
}

/// LCD hardware type reported in the settings flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcdType {
    Monochrome,
    Rgb,
}

/// Service level selection for `SL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLevel {
    /// Detect the supply level automatically.
    Auto,
    /// 120 VAC, up to 16 A.
    Level1,
    /// 208-240 VAC, up to 80 A.
    Level2,
}

impl ServiceLevel {
    fn token(self) -> &'static str {
        match self {
            ServiceLevel::Auto => "A",
            ServiceLevel::Level1 => "1",
            ServiceLevel::Level2 => "2",
        }
    }
}

/// Safety checks that can be switched on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyCheck {
    /// `SD`
    Diode,
    /// `SF`
    GfiSelfTest,
    /// `SG`
    Ground,
    /// `SR`
    StuckRelay,
    /// `SV`
    VentRequired,
}

impl SafetyCheck {
    fn code(self) -> &'static str {
        match self {
            SafetyCheck::Diode => "SD",
            SafetyCheck::GfiSelfTest => "SF",
            SafetyCheck::Ground => "SG",
            SafetyCheck::StuckRelay => "SR",
            SafetyCheck::VentRequired => "SV",
        }
    }
}

/// The settings flags word returned by `GE`.
///
/// Most bits are "disabled" flags: a set bit means the feature is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(pub u16);

impl Flags {
    const SERVICE_LEVEL_2: u16 = 0x0001;
    const DIODE_CHECK_OFF: u16 = 0x0002;
    const VENT_REQUIRED_OFF: u16 = 0x0004;
    const GROUND_CHECK_OFF: u16 = 0x0008;
    const STUCK_RELAY_CHECK_OFF: u16 = 0x0010;
    const AUTO_SERVICE_LEVEL_OFF: u16 = 0x0020;
    const AUTO_START_OFF: u16 = 0x0040;
    const SERIAL_DEBUG: u16 = 0x0080;
    const MONO_LCD: u16 = 0x0100;
    const GFI_SELF_TEST_OFF: u16 = 0x0200;

    fn clear(self, bit: u16) -> bool {
        self.0 & bit == 0
    }

    /// Configured service level, 1 or 2.
    pub fn service_level(self) -> u8 {
        if self.0 & Self::SERVICE_LEVEL_2 != 0 { 2 } else { 1 }
    }

    pub fn diode_check(self) -> bool {
        self.clear(Self::DIODE_CHECK_OFF)
    }

    pub fn vent_required(self) -> bool {
        self.clear(Self::VENT_REQUIRED_OFF)
    }

    pub fn ground_check(self) -> bool {
        self.clear(Self::GROUND_CHECK_OFF)
    }

    pub fn stuck_relay_check(self) -> bool {
        self.clear(Self::STUCK_RELAY_CHECK_OFF)
    }

    pub fn auto_service_level(self) -> bool {
        self.clear(Self::AUTO_SERVICE_LEVEL_OFF)
    }

    pub fn auto_start(self) -> bool {
        self.clear(Self::AUTO_START_OFF)
    }

    pub fn serial_debug(self) -> bool {
        !self.clear(Self::SERIAL_DEBUG)
    }

    pub fn lcd_type(self) -> LcdType {
        if self.clear(Self::MONO_LCD) {
            LcdType::Rgb
        } else {
            LcdType::Monochrome
        }
    }

    pub fn gfi_self_test(self) -> bool {
        self.clear(Self::GFI_SELF_TEST_OFF)
    }

    /// Whether `check` is currently enabled.
    pub fn check(self, check: SafetyCheck) -> bool {
        match check {
            SafetyCheck::Diode => self.diode_check(),
            SafetyCheck::GfiSelfTest => self.gfi_self_test(),
            SafetyCheck::Ground => self.ground_check(),
            SafetyCheck::StuckRelay => self.stuck_relay_check(),
            SafetyCheck::VentRequired => self.vent_required(),
        }
    }
}

/// Parsed `GE` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Current capacity in amperes.
    pub current_capacity: u16,
    pub flags: Flags,
}

/// Allowed current capacity range for the active service level (`GC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRange {
    pub min_amps: u16,
    pub max_amps: u16,
}

/// Charge timer window (`ST`). Hours are 0-23, minutes 0-59.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeTimer {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

/// Fault counters (`GF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCounters {
    pub gfi_self_test: u32,
    pub ground: u32,
    pub stuck_relay: u32,
}

/// Instantaneous charging current and voltage (`GG`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub amps: f64,
    pub volts: f64,
}

/// Sensor temperatures in degrees Celsius (`GP`). A sensor that is not
/// fitted reads 0.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperatures {
    pub ds3231: f64,
    pub mcp9808: f64,
    pub tmp007: f64,
}

/// Energy usage counters (`GU`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyUsage {
    /// Energy delivered in the current session, in watt-seconds.
    pub session_watt_seconds: u64,
    /// Lifetime accumulated energy, in watt-hours.
    pub accumulated_wh: u64,
}

/// The charging session in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Session {
    pub elapsed: Duration,
    pub energy_wh: f64,
}

/// Scale factor and offset of the ammeter (`GA`/`SA`) or the voltmeter
/// (`GM`/`SM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterCalibration {
    pub scale_factor: i32,
    pub offset: i32,
}

/// Firmware and protocol versions (`GV`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub firmware: String,
    pub protocol: String,
}

// ---------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------

/// `GS`: read state and elapsed charge time.
pub fn cmd_get_state() -> Command {
    Command::new("GS")
}

/// `FE` / `FD` / `FS`.
pub fn cmd_status_action(action: StatusAction) -> Command {
    Command::new(action.code())
}

/// `FR`: reboot the controller. It does not answer.
pub fn cmd_reset() -> Command {
    Command::new("FR")
}

/// `FB <color>`
pub fn cmd_set_backlight(color: LcdColor) -> Command {
    Command::new("FB").arg(color.code())
}

/// `FP <x> <y> <text>`
pub fn cmd_display_text(x: u8, y: u8, text: &str) -> Command {
    Command::new("FP").arg(x).arg(y).arg(text)
}

/// `GT`: read the real-time clock.
pub fn cmd_get_time() -> Command {
    Command::new("GT")
}

/// `S1 <yy> <month> <day> <hour> <minute> <second>`
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for years outside 2000-2099, which
/// the controller cannot represent.
pub fn cmd_set_time(at: NaiveDateTime) -> Result<Command> {
    if !(2000..=2099).contains(&at.year()) {
        return Err(Error::InvalidParameter(format!(
            "year {} outside the controller's 2000-2099 range",
            at.year()
        )));
    }
    Ok(Command::new("S1")
        .arg(at.year() - 2000)
        .arg(at.month())
        .arg(at.day())
        .arg(at.hour())
        .arg(at.minute())
        .arg(at.second()))
}

/// `G3`: read the charge time limit.
pub fn cmd_get_time_limit() -> Command {
    Command::new("G3")
}

/// Longest charge time limit the controller can store, in minutes.
pub const MAX_TIME_LIMIT_MINUTES: u32 = 255 * 15;

/// `S3 <quarter hours>`, rounding `minutes` to the nearest quarter hour.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] above [`MAX_TIME_LIMIT_MINUTES`].
pub fn cmd_set_time_limit(minutes: u32) -> Result<Command> {
    if minutes > MAX_TIME_LIMIT_MINUTES {
        return Err(Error::InvalidParameter(format!(
            "time limit {minutes} min exceeds {MAX_TIME_LIMIT_MINUTES} min"
        )));
    }
    Ok(Command::new("S3").arg(quarter_hours(minutes)))
}

fn quarter_hours(minutes: u32) -> u32 {
    (minutes + 7) / 15
}

/// The limit the controller actually stores for a requested `minutes`.
pub fn stored_time_limit(minutes: u32) -> u32 {
    quarter_hours(minutes) * 15
}

/// `GE`: read current capacity and settings flags.
pub fn cmd_get_settings() -> Command {
    Command::new("GE")
}

/// `SC <amps>`
pub fn cmd_set_current_capacity(amps: u16) -> Command {
    Command::new("SC").arg(amps)
}

/// `GC`: read the allowed capacity range.
pub fn cmd_get_capacity_range() -> Command {
    Command::new("GC")
}

/// `SD` / `SF` / `SG` / `SR` / `SV` with `0` or `1`.
pub fn cmd_set_check(check: SafetyCheck, enabled: bool) -> Command {
    Command::new(check.code()).arg(u8::from(enabled))
}

/// `GH`: read the charge limit.
pub fn cmd_get_charge_limit() -> Command {
    Command::new("GH")
}

/// `SH <kWh>`
pub fn cmd_set_charge_limit(kwh: u32) -> Command {
    Command::new("SH").arg(kwh)
}

/// `GU`: read energy usage.
pub fn cmd_get_energy_usage() -> Command {
    Command::new("GU")
}

/// `SK <Wh>`
pub fn cmd_set_accumulated_wh(wh: u64) -> Command {
    Command::new("SK").arg(wh)
}

/// `SL <A|1|2>`
pub fn cmd_set_service_level(level: ServiceLevel) -> Command {
    Command::new("SL").arg(level.token())
}

/// `ST <start h> <start m> <end h> <end m>`; all zeros cancels the timer.
///
/// This is the charge timer *command*. It has nothing to do with `$ST`
/// state notifications, which the controller sends unprompted.
pub fn cmd_set_timer(timer: Option<ChargeTimer>) -> Command {
    let t = timer.unwrap_or(ChargeTimer {
        start_hour: 0,
        start_minute: 0,
        end_hour: 0,
        end_minute: 0,
    });
    Command::with_params("ST", [t.start_hour, t.start_minute, t.end_hour, t.end_minute])
}

/// `GF`: read fault counters.
pub fn cmd_get_fault_counters() -> Command {
    Command::new("GF")
}

/// `GG`: read charging current and voltage.
pub fn cmd_get_current_and_voltage() -> Command {
    Command::new("GG")
}

/// `GP`: read temperatures.
pub fn cmd_get_temperatures() -> Command {
    Command::new("GP")
}

/// `GV`: read firmware and protocol versions.
pub fn cmd_get_version() -> Command {
    Command::new("GV")
}

/// `SE <0|1>`
pub fn cmd_set_echo(enabled: bool) -> Command {
    Command::new("SE").arg(u8::from(enabled))
}

/// `S0 <0|1>`: 0 selects a monochrome LCD, 1 an RGB one.
pub fn cmd_set_lcd_type(lcd: LcdType) -> Command {
    let code: u8 = match lcd {
        LcdType::Monochrome => 0,
        LcdType::Rgb => 1,
    };
    Command::new("S0").arg(code)
}

/// `S2 <0|1>`: enter or leave ammeter calibration mode.
pub fn cmd_set_ammeter_calibration(enabled: bool) -> Command {
    Command::new("S2").arg(u8::from(enabled))
}

/// `GA`: read the ammeter scale factor and offset.
pub fn cmd_get_ammeter_settings() -> Command {
    Command::new("GA")
}

/// `SA <scale> <offset>`
pub fn cmd_set_ammeter_settings(settings: MeterCalibration) -> Command {
    Command::new("SA")
        .arg(settings.scale_factor)
        .arg(settings.offset)
}

/// `GM`: read the voltmeter scale factor and offset.
pub fn cmd_get_voltmeter_settings() -> Command {
    Command::new("GM")
}

/// `SM <scale> <offset>`
pub fn cmd_set_voltmeter_settings(settings: MeterCalibration) -> Command {
    Command::new("SM")
        .arg(settings.scale_factor)
        .arg(settings.offset)
}

// ---------------------------------------------------------------
// Reply parsers
// ---------------------------------------------------------------

fn decimal<T: FromStr>(reply: &Reply, index: usize, what: &str) -> Result<T> {
    let raw = reply.param(index)?;
    raw.parse()
        .map_err(|_| Error::Protocol(format!("invalid {what}: {raw:?}")))
}

fn hex(reply: &Reply, index: usize, what: &str) -> Result<u32> {
    let raw = reply.param(index)?;
    u32::from_str_radix(raw, 16).map_err(|_| Error::Protocol(format!("invalid {what}: {raw:?}")))
}

/// Parse a hexadecimal state token at `index`, as carried by the replies
/// to `FE`, `FD` and `FS`.
pub fn parse_state(reply: &Reply, index: usize) -> Result<EvseState> {
    let code = hex(reply, index, "state")?;
    u8::try_from(code)
        .map(EvseState::from_code)
        .map_err(|_| Error::Protocol(format!("state {code:#x} out of range")))
}

/// Parse a `GS` reply into the state and the elapsed charge time. Unlike
/// the other state-bearing replies, `GS` reports the state in decimal.
pub fn parse_state_reply(reply: &Reply) -> Result<(EvseState, Duration)> {
    let state = decimal::<u8>(reply, 0, "state").map(EvseState::from_code)?;
    let seconds: u64 = decimal(reply, 1, "elapsed time")?;
    Ok((state, Duration::from_secs(seconds)))
}

/// The pattern `GT` returns when no real-time clock is fitted.
const NO_CLOCK: [&str; 6] = ["165", "165", "165", "165", "165", "85"];

/// Parse a `GT` reply.
///
/// # Errors
///
/// Returns [`Error::NoClock`] when the controller has no RTC, and
/// [`Error::Protocol`] when the fields do not form a valid date and time.
pub fn parse_time(reply: &Reply) -> Result<NaiveDateTime> {
    if reply.params.len() >= 6 && reply.params[..6] == NO_CLOCK {
        return Err(Error::NoClock);
    }
    let year: i32 = decimal(reply, 0, "year")?;
    let fields: Vec<u32> = (1..6)
        .map(|i| decimal(reply, i, "time field"))
        .collect::<Result<_>>()?;
    NaiveDate::from_ymd_opt(2000 + year, fields[0], fields[1])
        .and_then(|d| d.and_hms_opt(fields[2], fields[3], fields[4]))
        .ok_or_else(|| Error::Protocol(format!("invalid clock value {:?}", reply.params)))
}

/// Parse a `G3` reply into minutes.
pub fn parse_time_limit(reply: &Reply) -> Result<u32> {
    let quarters: u32 = decimal(reply, 0, "time limit")?;
    Ok(quarters * 15)
}

/// Parse a `GE` reply.
pub fn parse_settings(reply: &Reply) -> Result<Settings> {
    let current_capacity = decimal(reply, 0, "current capacity")?;
    let flags = hex(reply, 1, "flags")?;
    let flags = u16::try_from(flags)
        .map_err(|_| Error::Protocol(format!("flags {flags:#x} out of range")))?;
    Ok(Settings {
        current_capacity,
        flags: Flags(flags),
    })
}

/// Parse a `GC` reply.
pub fn parse_capacity_range(reply: &Reply) -> Result<CapacityRange> {
    Ok(CapacityRange {
        min_amps: decimal(reply, 0, "minimum capacity")?,
        max_amps: decimal(reply, 1, "maximum capacity")?,
    })
}

/// Parse a `GH` reply into kWh.
pub fn parse_charge_limit(reply: &Reply) -> Result<u32> {
    decimal(reply, 0, "charge limit")
}

/// Parse a `GU` reply.
pub fn parse_energy_usage(reply: &Reply) -> Result<EnergyUsage> {
    Ok(EnergyUsage {
        session_watt_seconds: decimal(reply, 0, "session energy")?,
        accumulated_wh: decimal(reply, 1, "accumulated energy")?,
    })
}

/// Parse a `GF` reply. Counters are hexadecimal.
pub fn parse_fault_counters(reply: &Reply) -> Result<FaultCounters> {
    Ok(FaultCounters {
        gfi_self_test: hex(reply, 0, "GFI self-test count")?,
        ground: hex(reply, 1, "ground fault count")?,
        stuck_relay: hex(reply, 2, "stuck relay count")?,
    })
}

/// Parse a `GG` reply (milliamps, millivolts). Negative readings mean the
/// sensor is absent and are reported as zero.
pub fn parse_measurement(reply: &Reply) -> Result<Measurement> {
    let milliamps: i64 = decimal(reply, 0, "current")?;
    let millivolts: i64 = decimal(reply, 1, "voltage")?;
    Ok(Measurement {
        amps: milliamps.max(0) as f64 / 1000.0,
        volts: millivolts.max(0) as f64 / 1000.0,
    })
}

/// Parse a `GP` reply (tenths of a degree).
pub fn parse_temperatures(reply: &Reply) -> Result<Temperatures> {
    let tenths = |i, what| decimal::<i32>(reply, i, what).map(|t| f64::from(t) / 10.0);
    Ok(Temperatures {
        ds3231: tenths(0, "DS3231 temperature")?,
        mcp9808: tenths(1, "MCP9808 temperature")?,
        tmp007: tenths(2, "TMP007 temperature")?,
    })
}

/// Parse a `GA` or `GM` reply.
pub fn parse_meter_calibration(reply: &Reply) -> Result<MeterCalibration> {
    Ok(MeterCalibration {
        scale_factor: decimal(reply, 0, "scale factor")?,
        offset: decimal(reply, 1, "offset")?,
    })
}

/// Parse a `GV` reply.
pub fn parse_version(reply: &Reply) -> Result<Version> {
    Ok(Version {
        firmware: reply.param(0)?.to_string(),
        protocol: reply.param(1)?.to_string(),
    })
}
