//! Fuzz target for `PipeFrame::decode` boundary conditions.
//!
//! Feeds raw, unstructured bytes straight into `decode` (arbitrary opcode
//! byte, arbitrary declared lengths) and checks the only invariants the
//! wire format promises:
//!
//! - decode never panics on truncated or adversarial input
//! - a declared `LEARN`/`FRAME` length that exceeds the protocol's limits
//!   is always rejected, never accepted
//! - whatever `decode` does accept round-trips through `encode` unchanged

#![no_main]

use libfuzzer_sys::fuzz_target;
use xcodec_proto::{MAX_FRAME_LENGTH, MAX_LEARN_COUNT, PipeFrame, ProtocolError};

fuzz_target!(|data: &[u8]| {
    match PipeFrame::decode(data) {
        Ok(Some((frame, consumed))) => {
            assert!(consumed <= data.len());
            if let PipeFrame::Frame { payload } = &frame {
                assert!(payload.len() <= MAX_FRAME_LENGTH);
            }
            if let PipeFrame::Learn { segments } = &frame {
                assert!(segments.len() <= MAX_LEARN_COUNT);
            }

            let mut wire = Vec::new();
            if frame.encode(&mut wire).is_ok() {
                let (redecoded, recount) = PipeFrame::decode(&wire).unwrap().unwrap();
                assert_eq!(redecoded, frame);
                assert_eq!(recount, wire.len());
            }
        }
        Ok(None) => {}
        Err(ProtocolError::UnknownOpcode(_) | ProtocolError::FrameTooLarge { .. }) => {}
        Err(err) => {
            // Any other structured rejection is fine too; the only thing
            // that must never happen is a panic, which libfuzzer itself
            // catches for us.
            let _ = err;
        }
    }
});
