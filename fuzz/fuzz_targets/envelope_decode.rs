//! Fuzz target for Envelope::from_bytes and content decoding
//!
//! # Invariants
//!
//! - Parsing arbitrary bytes never panics
//! - A parsed envelope re-serializes to bytes that parse to the same envelope
//! - Decoding arbitrary plaintext under either version never panics
//! - v1 decoding succeeds exactly when the plaintext is UTF-8

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_proto::{decode, Envelope, EnvelopeVersion, MessageContent};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::from_bytes(data) {
        let again = Envelope::from_bytes(&envelope.to_bytes())
            .expect("re-serialized envelope must parse");
        assert_eq!(again, envelope);
    }

    match decode(data, EnvelopeVersion::V1) {
        Ok(MessageContent::Text { body }) => assert_eq!(body.as_bytes(), data),
        Ok(other) => panic!("v1 decoded to non-text content: {other:?}"),
        Err(_) => assert!(std::str::from_utf8(data).is_err()),
    }

    let _ = decode(data, EnvelopeVersion::V2);
});
