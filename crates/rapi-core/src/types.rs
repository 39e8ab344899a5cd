//! Protocol-level value types shared by every crate in the workspace.

use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Checksum mode
// ---------------------------------------------------------------------------

/// How the integrity checksum of an outgoing frame is computed.
///
/// The mode is chosen per send. Validation of received frames does not depend
/// on it: a reply is checked against whatever separator the device used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumMode {
    /// No checksum segment. For bench testing only.
    None,
    /// Legacy 8-bit additive checksum, separator `*`.
    Additive,
    /// 8-bit XOR checksum, separator `^`.
    #[default]
    Xor,
}

impl ChecksumMode {
    /// The separator byte that introduces the checksum digits, if any.
    pub fn separator(self) -> Option<u8> {
        match self {
            ChecksumMode::None => None,
            ChecksumMode::Additive => Some(b'*'),
            ChecksumMode::Xor => Some(b'^'),
        }
    }
}

impl fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumMode::None => write!(f, "none"),
            ChecksumMode::Additive => write!(f, "additive"),
            ChecksumMode::Xor => write!(f, "xor"),
        }
    }
}

/// Error returned when a string cannot be parsed as a [`ChecksumMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChecksumModeError(String);

impl fmt::Display for ParseChecksumModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown checksum mode '{}' (expected none, additive or xor)", self.0)
    }
}

impl std::error::Error for ParseChecksumModeError {}

impl FromStr for ChecksumMode {
    type Err = ParseChecksumModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ChecksumMode::None),
            "additive" | "add" | "sum" => Ok(ChecksumMode::Additive),
            "xor" => Ok(ChecksumMode::Xor),
            _ => Err(ParseChecksumModeError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A RAPI command: a two-character code plus ordered parameter tokens.
///
/// Construction never fails; validation against the wire grammar happens when
/// the command is encoded.
///
/// ```
/// use rapi_core::Command;
///
/// let cmd = Command::new("SC").arg(32);
/// assert_eq!(cmd.code(), "SC");
/// assert_eq!(cmd.params(), ["32"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    code: String,
    params: Vec<String>,
}

impl Command {
    /// Create a command with no parameters.
    pub fn new(code: impl Into<String>) -> Self {
        Command {
            code: code.into(),
            params: Vec::new(),
        }
    }

    /// Create a command from a code and a list of parameter tokens.
    pub fn with_params<I, P>(code: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: ToString,
    {
        Command {
            code: code.into(),
            params: params.into_iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Append one parameter token.
    pub fn arg(mut self, param: impl ToString) -> Self {
        self.params.push(param.to_string());
        self
    }

    /// The two-character command code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The parameter tokens, in wire order.
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        for p in &self.params {
            write!(f, " {p}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Outcome tag of a reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `$OK`
    Ok,
    /// `$NK`
    Nk,
}

/// A parsed `$OK`/`$NK` reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Whether the controller accepted the command.
    pub outcome: Outcome,
    /// Tokens following the outcome tag.
    pub params: Vec<String>,
}

impl Reply {
    /// `true` for an `$OK` reply.
    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }

    /// Return the parameter at `index`, or a protocol error naming what was
    /// expected there.
    pub fn param(&self, index: usize) -> crate::Result<&str> {
        self.params.get(index).map(String::as_str).ok_or_else(|| {
            crate::Error::Protocol(format!(
                "reply has {} parameter(s), expected at least {}",
                self.params.len(),
                index + 1
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// EVSE state
// ---------------------------------------------------------------------------

/// Charging controller state, as carried by `$ST` notifications and the
/// first parameter of a `GS` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvseState {
    Unknown,
    NotConnected,
    Connected,
    Charging,
    VentRequired,
    DiodeCheckFailed,
    GfciFault,
    NoGround,
    StuckRelay,
    GfciSelfTestFailure,
    OverTemperature,
    Sleeping,
    Disabled,
    /// A code this client does not know about.
    Other(u8),
}

impl EvseState {
    /// Map a raw state code to a state.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => EvseState::Unknown,
            1 => EvseState::NotConnected,
            2 => EvseState::Connected,
            3 => EvseState::Charging,
            4 => EvseState::VentRequired,
            5 => EvseState::DiodeCheckFailed,
            6 => EvseState::GfciFault,
            7 => EvseState::NoGround,
            8 => EvseState::StuckRelay,
            9 => EvseState::GfciSelfTestFailure,
            10 => EvseState::OverTemperature,
            254 => EvseState::Sleeping,
            255 => EvseState::Disabled,
            other => EvseState::Other(other),
        }
    }

    /// The raw state code.
    pub fn code(self) -> u8 {
        match self {
            EvseState::Unknown => 0,
            EvseState::NotConnected => 1,
            EvseState::Connected => 2,
            EvseState::Charging => 3,
            EvseState::VentRequired => 4,
            EvseState::DiodeCheckFailed => 5,
            EvseState::GfciFault => 6,
            EvseState::NoGround => 7,
            EvseState::StuckRelay => 8,
            EvseState::GfciSelfTestFailure => 9,
            EvseState::OverTemperature => 10,
            EvseState::Sleeping => 254,
            EvseState::Disabled => 255,
            EvseState::Other(code) => code,
        }
    }

    /// `true` for the fault states (4 through 10).
    pub fn is_fault(self) -> bool {
        (4..=10).contains(&self.code())
    }
}

impl fmt::Display for EvseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvseState::Unknown => "unknown",
            EvseState::NotConnected => "not connected",
            EvseState::Connected => "connected",
            EvseState::Charging => "charging",
            EvseState::VentRequired => "vent required",
            EvseState::DiodeCheckFailed => "diode check failed",
            EvseState::GfciFault => "gfci fault",
            EvseState::NoGround => "no ground",
            EvseState::StuckRelay => "stuck relay",
            EvseState::GfciSelfTestFailure => "gfci self-test failure",
            EvseState::OverTemperature => "over temperature",
            EvseState::Sleeping => "sleeping",
            EvseState::Disabled => "disabled",
            EvseState::Other(code) => return write!(f, "state {code}"),
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mode_default_is_xor() {
        assert_eq!(ChecksumMode::default(), ChecksumMode::Xor);
    }

    #[test]
    fn checksum_mode_separators() {
        assert_eq!(ChecksumMode::None.separator(), None);
        assert_eq!(ChecksumMode::Additive.separator(), Some(b'*'));
        assert_eq!(ChecksumMode::Xor.separator(), Some(b'^'));
    }

    #[test]
    fn checksum_mode_parse() {
        assert_eq!("xor".parse::<ChecksumMode>().unwrap(), ChecksumMode::Xor);
        assert_eq!("XOR".parse::<ChecksumMode>().unwrap(), ChecksumMode::Xor);
        assert_eq!(
            "additive".parse::<ChecksumMode>().unwrap(),
            ChecksumMode::Additive
        );
        assert_eq!("none".parse::<ChecksumMode>().unwrap(), ChecksumMode::None);
        assert!("crc".parse::<ChecksumMode>().is_err());
    }

    #[test]
    fn command_builder() {
        let cmd = Command::new("S1").arg(24).arg(3).arg(15);
        assert_eq!(cmd.code(), "S1");
        assert_eq!(cmd.params(), ["24", "3", "15"]);
        assert_eq!(cmd.to_string(), "S1 24 3 15");
    }

    #[test]
    fn command_with_params() {
        let cmd = Command::with_params("ST", [0, 0, 0, 0]);
        assert_eq!(cmd.params().len(), 4);
        assert_eq!(Command::new("GS").to_string(), "GS");
    }

    #[test]
    fn reply_param_access() {
        let reply = Reply {
            outcome: Outcome::Ok,
            params: vec!["3".into(), "120".into()],
        };
        assert!(reply.is_ok());
        assert_eq!(reply.param(1).unwrap(), "120");
        assert!(matches!(reply.param(2), Err(crate::Error::Protocol(_))));
    }

    #[test]
    fn evse_state_round_trips_known_codes() {
        for code in [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 254, 255] {
            assert_eq!(EvseState::from_code(code).code(), code);
        }
        assert_eq!(EvseState::from_code(42), EvseState::Other(42));
    }

    #[test]
    fn evse_state_display() {
        assert_eq!(EvseState::Charging.to_string(), "charging");
        assert_eq!(EvseState::Sleeping.to_string(), "sleeping");
        assert_eq!(EvseState::Other(12).to_string(), "state 12");
    }

    #[test]
    fn evse_state_faults() {
        assert!(EvseState::GfciFault.is_fault());
        assert!(!EvseState::Charging.is_fault());
        assert!(!EvseState::Disabled.is_fault());
    }
}
