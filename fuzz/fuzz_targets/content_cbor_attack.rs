//! Fuzz target for CBOR attacks on v2 content decoding
//!
//! # Strategy
//!
//! - Deeply nested: arrays/maps nested to arbitrary depth
//! - Huge lengths: CBOR claiming massive byte/string/array lengths
//! - Tag confusion: a well-formed map whose `type` is unknown or mismatched
//! - Random bytes: arbitrary data behind a valid-looking map header
//!
//! # Invariants
//!
//! - Decoding completes quickly and never panics
//! - Huge claimed lengths are rejected, not allocated
//! - Unknown tags are reported as `UnknownVariant`

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tessera_proto::{decode, DecodeError, EnvelopeVersion, CONTENT_TAGS};

#[derive(Debug, Clone, Arbitrary)]
enum CborAttack {
    DeeplyNested { depth: u8, map: bool },
    HugeLength { claimed_len_exponent: u8, kind: u8 },
    TagConfusion { tag: String, tag_index: Option<u8>, payload: Vec<u8> },
    RandomBody { bytes: Vec<u8> },
}

fuzz_target!(|attack: CborAttack| {
    match attack {
        CborAttack::DeeplyNested { depth, map } => {
            let bytes = nested(usize::from(depth % 64), map);
            let _ = decode(&bytes, EnvelopeVersion::V2);
        }

        CborAttack::HugeLength { claimed_len_exponent, kind } => {
            let exponent = u32::from(claimed_len_exponent % 33);
            let claimed = if exponent < 32 { 1u32 << exponent } else { u32::MAX };
            let major = match kind % 3 {
                0 => 0x5A, // byte string, 4-byte length
                1 => 0x7A, // text string, 4-byte length
                _ => 0x9A, // array, 4-byte length
            };
            let mut bytes = vec![major];
            bytes.extend_from_slice(&claimed.to_be_bytes());
            bytes.extend_from_slice(&[0u8; 16]);
            assert!(decode(&bytes, EnvelopeVersion::V2).is_err());
        }

        CborAttack::TagConfusion { tag, tag_index, payload } => {
            let tag = match tag_index {
                Some(i) => CONTENT_TAGS[usize::from(i) % CONTENT_TAGS.len()].to_string(),
                None => tag,
            };
            let bytes = tagged_map(&tag, &payload);
            match decode(&bytes, EnvelopeVersion::V2) {
                Ok(content) => assert_eq!(content.tag(), tag),
                Err(DecodeError::UnknownVariant(reported)) => {
                    assert_eq!(reported, tag);
                    assert!(!CONTENT_TAGS.contains(&tag.as_str()));
                }
                Err(_) => {}
            }
        }

        CborAttack::RandomBody { bytes } => {
            let mut framed = vec![0xA2];
            framed.extend_from_slice(&bytes);
            let _ = decode(&framed, EnvelopeVersion::V2);
        }
    }
});

fn nested(depth: usize, map: bool) -> Vec<u8> {
    let mut bytes = Vec::new();
    for _ in 0..depth {
        if map {
            bytes.extend_from_slice(&[0xA1, 0x61, b'a']);
        } else {
            bytes.push(0x81);
        }
    }
    bytes.push(0x01);
    bytes
}

/// `{"type": tag, "payload": <payload as a byte string>}`
fn tagged_map(tag: &str, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0xA2];
    text(&mut bytes, "type");
    text(&mut bytes, tag);
    text(&mut bytes, "payload");
    header(&mut bytes, 0x40, payload.len());
    bytes.extend_from_slice(payload);
    bytes
}

fn text(out: &mut Vec<u8>, s: &str) {
    header(out, 0x60, s.len());
    out.extend_from_slice(s.as_bytes());
}

fn header(out: &mut Vec<u8>, major: u8, len: usize) {
    match len {
        0..=23 => out.push(major | len as u8),
        24..=0xFF => out.extend_from_slice(&[major | 24, len as u8]),
        _ => {
            out.push(major | 26);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}
