//! RAPI frame encoder/decoder.
//!
//! RAPI frames are carriage-return-terminated ASCII lines:
//!
//! ```text
//! $CC [PP ...][^XX|*XX]\r
//! ```
//!
//! - `$`: start marker.
//! - `CC`: two-character command code (`GS`, `SC`, `S1`, ...) or, on replies,
//!   the outcome tag `OK`/`NK`. Asynchronous notifications use `ST`.
//! - `PP`: space-separated parameter tokens.
//! - `^XX` / `*XX`: optional checksum, two uppercase hex digits computed over
//!   every byte from `$` up to the separator. `^` selects XOR, `*` the legacy
//!   additive sum.
//! - Terminator: `\r` (0x0D).
//!
//! Replies are classified purely by their leading token. A reply to the `ST`
//! (charge timer) command is still `$OK`/`$NK`; only a line whose tag is `ST`
//! is a state-change notification.

use bytes::{BufMut, BytesMut};

use rapi_core::{ChecksumMode, Command, Error, EvseState, Notification, Outcome, Reply, Result};

/// Start-of-frame marker.
pub const START: u8 = b'$';

/// Frame terminator.
pub const TERMINATOR: u8 = b'\r';

/// Separator introducing an XOR checksum.
pub const XOR_SEPARATOR: u8 = b'^';

/// Separator introducing an additive checksum.
pub const ADDITIVE_SEPARATOR: u8 = b'*';

/// Bytes that may not appear inside a parameter token.
const RESERVED: &[u8] = &[START, XOR_SEPARATOR, ADDITIVE_SEPARATOR, TERMINATOR];

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `$OK ...` or `$NK ...`
    Reply(Reply),
    /// `$ST <state>`
    Notification(Notification),
}

/// Compute the checksum of `bytes` for the given mode.
///
/// Returns `None` for [`ChecksumMode::None`].
///
/// ```
/// use rapi_core::ChecksumMode;
/// use rapi_io::protocol::checksum;
///
/// assert_eq!(checksum(ChecksumMode::Additive, b"$FE"), Some(0xAF));
/// assert_eq!(checksum(ChecksumMode::Xor, b"$FE"), Some(0x27));
/// ```
pub fn checksum(mode: ChecksumMode, bytes: &[u8]) -> Option<u8> {
    match mode {
        ChecksumMode::None => None,
        ChecksumMode::Additive => Some(bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))),
        ChecksumMode::Xor => Some(bytes.iter().fold(0u8, |acc, &b| acc ^ b)),
    }
}

/// Encode a command into a complete frame ready for transmission.
///
/// Fails with [`Error::Encoding`] if the code is not exactly two ASCII
/// letters/digits or if a parameter contains `$`, `^`, `*` or `\r`.
///
/// ```
/// use rapi_core::{ChecksumMode, Command};
/// use rapi_io::protocol::encode_command;
///
/// let frame = encode_command(&Command::new("FE"), ChecksumMode::Additive).unwrap();
/// assert_eq!(frame, b"$FE*AF\r");
///
/// let frame = encode_command(&Command::new("SC").arg(32), ChecksumMode::Xor).unwrap();
/// assert_eq!(frame, b"$SC 32^15\r");
/// ```
pub fn encode_command(command: &Command, mode: ChecksumMode) -> Result<Vec<u8>> {
    let code = command.code();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::Encoding(format!(
            "command code must be two ASCII letters or digits, got {code:?}"
        )));
    }
    for param in command.params() {
        if let Some(b) = param.bytes().find(|b| RESERVED.contains(b)) {
            return Err(Error::Encoding(format!(
                "parameter {param:?} contains reserved character {:?}",
                b as char
            )));
        }
    }

    let params_len: usize = command.params().iter().map(|p| p.len() + 1).sum();
    let mut buf = BytesMut::with_capacity(1 + code.len() + params_len + 4);
    buf.put_u8(START);
    buf.put_slice(code.as_bytes());
    for param in command.params() {
        buf.put_u8(b' ');
        buf.put_slice(param.as_bytes());
    }
    if let (Some(separator), Some(sum)) = (mode.separator(), checksum(mode, &buf)) {
        buf.put_u8(separator);
        buf.put_slice(format!("{sum:02X}").as_bytes());
    }
    buf.put_u8(TERMINATOR);
    Ok(buf.to_vec())
}

/// Decode one received line into a reply or a notification.
///
/// The line may still carry its terminator; surrounding whitespace is
/// ignored. When a checksum segment is present it is always verified, using
/// the algorithm selected by the separator the device sent, before the tag is
/// looked at.
///
/// ```
/// use rapi_core::Outcome;
/// use rapi_io::protocol::{decode_frame, Frame};
///
/// let Ok(Frame::Reply(reply)) = decode_frame(b"$OK 3 120\r") else { panic!() };
/// assert_eq!(reply.outcome, Outcome::Ok);
/// assert_eq!(reply.params, ["3", "120"]);
///
/// assert!(decode_frame(b"$OK 3 120^2C\r").is_err());
/// ```
pub fn decode_frame(line: &[u8]) -> Result<Frame> {
    let line = line.trim_ascii();
    if line.first() != Some(&START) {
        return Err(Error::MalformedFrame(format!(
            "line does not start with '$': {:?}",
            String::from_utf8_lossy(line)
        )));
    }

    let content = strip_checksum(line)?;
    let body = std::str::from_utf8(&content[1..])
        .map_err(|_| Error::MalformedFrame("frame is not valid ASCII".into()))?;

    let mut tokens = body.split_ascii_whitespace();
    let tag = tokens
        .next()
        .ok_or_else(|| Error::MalformedFrame("empty frame".into()))?;

    match tag {
        "OK" | "NK" => Ok(Frame::Reply(Reply {
            outcome: if tag == "OK" { Outcome::Ok } else { Outcome::Nk },
            params: tokens.map(str::to_string).collect(),
        })),
        "ST" => {
            let raw = tokens
                .next()
                .ok_or_else(|| Error::MalformedFrame("state notification without state".into()))?;
            let code = u8::from_str_radix(raw, 16).map_err(|_| {
                Error::MalformedFrame(format!("invalid state value {raw:?}"))
            })?;
            Ok(Frame::Notification(Notification::new(EvseState::from_code(code))))
        }
        other => Err(Error::MalformedFrame(format!("unrecognized frame tag {other:?}"))),
    }
}

/// Verify and remove the checksum segment, if any.
///
/// Returns the frame content from `$` up to (not including) the separator.
fn strip_checksum(line: &[u8]) -> Result<&[u8]> {
    let Some(pos) = line
        .iter()
        .rposition(|&b| b == XOR_SEPARATOR || b == ADDITIVE_SEPARATOR)
    else {
        return Ok(line);
    };

    let digits = &line[pos + 1..];
    if digits.len() != 2 || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::MalformedFrame(format!(
            "bad checksum segment {:?}",
            String::from_utf8_lossy(&line[pos..])
        )));
    }
    // Two ASCII hex digits always parse.
    let received = digits
        .iter()
        .fold(0u8, |acc, &d| (acc << 4) | hex_value(d));

    let mode = if line[pos] == XOR_SEPARATOR {
        ChecksumMode::Xor
    } else {
        ChecksumMode::Additive
    };
    let content = &line[..pos];
    let expected = checksum(mode, content).unwrap_or_default();
    if expected != received {
        return Err(Error::ChecksumMismatch { expected, received });
    }
    Ok(content)
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
