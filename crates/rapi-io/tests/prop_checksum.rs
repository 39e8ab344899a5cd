//! Property tests for the frame codec.
//!
//! - Any reply built with a checksum decodes back to the same tokens.
//! - Flipping any single byte between `$` and the separator is detected.

use proptest::prelude::*;
use rapi_core::{ChecksumMode, Command, Error, EvseState, Outcome};
use rapi_io::protocol::{Frame, decode_frame, encode_command};

// ============================================================================
// Strategies
// ============================================================================

fn checked_mode() -> impl Strategy<Value = ChecksumMode> {
    prop_oneof![Just(ChecksumMode::Xor), Just(ChecksumMode::Additive)]
}

fn outcome() -> impl Strategy<Value = (&'static str, Outcome)> {
    prop_oneof![Just(("OK", Outcome::Ok)), Just(("NK", Outcome::Nk))]
}

fn tokens() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[0-9A-Za-z]{1,6}", 0..6)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn checksummed_reply_round_trips(
        (tag, expected) in outcome(),
        params in tokens(),
        mode in checked_mode(),
    ) {
        let frame = encode_command(&Command::with_params(tag, &params), mode).unwrap();
        match decode_frame(&frame) {
            Ok(Frame::Reply(reply)) => {
                prop_assert_eq!(reply.outcome, expected);
                prop_assert_eq!(reply.params, params);
            }
            other => prop_assert!(false, "unexpected decode result {:?}", other),
        }
    }

    #[test]
    fn state_notification_round_trips(code in any::<u8>(), mode in checked_mode()) {
        let frame = encode_command(&Command::new("ST").arg(format!("{code:X}")), mode).unwrap();
        match decode_frame(&frame) {
            Ok(Frame::Notification(n)) => prop_assert_eq!(n.state, EvseState::from_code(code)),
            other => prop_assert!(false, "unexpected decode result {:?}", other),
        }
    }

    #[test]
    fn single_byte_corruption_is_detected(
        params in tokens(),
        mode in checked_mode(),
        position in any::<prop::sample::Index>(),
        replacement in any::<u8>(),
    ) {
        let mut frame = encode_command(&Command::with_params("OK", &params), mode).unwrap();
        // Layout: '$' body separator hex hex '\r'.
        let separator = frame.len() - 4;
        let index = 1 + position.index(separator - 1);
        prop_assume!(frame[index] != replacement);
        frame[index] = replacement;

        let result = decode_frame(&frame);
        prop_assert!(
            matches!(result, Err(Error::ChecksumMismatch { .. })),
            "corruption at {} not detected: {:?}",
            index,
            result
        );
    }
}
