//! Property-based tests for the envelope codec.
//!
//! Covers the v2 round trip for every content variant, the v1 text round trip
//! and the compatibility ladder between the two versions.

use proptest::prelude::*;
use tessera_proto::{DecodeError, Envelope, EnvelopeVersion, MessageContent, decode, encode};

fn arbitrary_content() -> impl Strategy<Value = MessageContent> {
    prop_oneof![
        ".*".prop_map(|body| MessageContent::Text { body }),
        ("[a-z0-9]{1,16}", "https://[a-z]{1,12}/[a-z0-9]{0,16}")
            .prop_map(|(identifier, url)| MessageContent::Photo { identifier, url }),
        ("[a-z0-9]{1,16}", 0.0f64..3600.0, ".*")
            .prop_map(|(identifier, duration, url)| MessageContent::Voice { identifier, duration, url }),
        ".*".prop_map(|sdp| MessageContent::CallOffer { sdp }),
        ".*".prop_map(|sdp| MessageContent::CallAnswer { sdp }),
        (".*", any::<i32>(), proptest::option::of("[0-9a-z]{0,4}"))
            .prop_map(|(sdp, line_index, mid)| MessageContent::IceCandidate { sdp, line_index, mid }),
    ]
}

proptest! {
    /// INVARIANT: every variant survives a v2 encode/decode.
    #[test]
    fn v2_round_trip(content in arbitrary_content()) {
        let bytes = encode(&content, EnvelopeVersion::V2).unwrap();
        prop_assert_eq!(decode(&bytes, EnvelopeVersion::V2).unwrap(), content);
    }

    /// INVARIANT: any UTF-8 string survives as v1 text.
    #[test]
    fn v1_text_round_trip(body in ".*") {
        let bytes = encode(&MessageContent::text(body.clone()), EnvelopeVersion::V1).unwrap();
        prop_assert_eq!(bytes.as_slice(), body.as_bytes());
        prop_assert_eq!(decode(&bytes, EnvelopeVersion::V1).unwrap(), MessageContent::Text { body });
    }

    /// INVARIANT: a v2 body read as v1 is never interpreted as v2 content.
    /// It is either rejected or surfaces as opaque text.
    #[test]
    fn v2_body_never_parsed_by_v1(content in arbitrary_content()) {
        let bytes = encode(&content, EnvelopeVersion::V2).unwrap();
        match decode(&bytes, EnvelopeVersion::V1) {
            Ok(MessageContent::Text { body }) => prop_assert_eq!(body.as_bytes(), bytes.as_slice()),
            Ok(other) => prop_assert!(false, "v1 produced {:?}", other),
            Err(e) => prop_assert_eq!(e, DecodeError::NotUtf8),
        }
    }

    /// INVARIANT: a v1 body is never accepted by the v2 reader as content.
    #[test]
    fn v1_body_never_parsed_by_v2(body in "[a-zA-Z ]{1,64}") {
        let bytes = encode(&MessageContent::text(body), EnvelopeVersion::V1).unwrap();
        prop_assert!(decode(&bytes, EnvelopeVersion::V2).is_err());
    }

    /// INVARIANT: envelope serialization preserves every field.
    #[test]
    fn envelope_round_trip(
        ciphertext in proptest::collection::vec(any::<u8>(), 0..256),
        date in any::<u64>(),
        extra in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
    ) {
        let mut envelope = Envelope::new(ciphertext, date);
        envelope.additional_data = extra;
        prop_assert_eq!(Envelope::from_bytes(&envelope.to_bytes()).unwrap(), envelope);
    }
}
