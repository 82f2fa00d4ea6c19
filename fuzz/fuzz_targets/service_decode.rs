//! Fuzz target for ServiceMessage::from_bytes
//!
//! Service messages arrive from any peer holding a pairwise session, so the
//! parser sees attacker-chosen plaintext.
//!
//! # Invariants
//!
//! - Never panics on malformed input
//! - Accepted messages survive a serialize/parse cycle unchanged

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_proto::ServiceMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = ServiceMessage::from_bytes(data) {
        let again = ServiceMessage::from_bytes(&message.to_bytes())
            .expect("re-serialized service message must parse");
        assert_eq!(again, message);
    }
});
