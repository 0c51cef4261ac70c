//! Checksum, compression, and wire-format encoding for transport messages.
//!
//! Grounded on `communication_protocol.py::ProtocolMessage`
//! (`to_wire_format`/`from_wire_format`; checksum via
//! `md5(json.dumps(sort_keys=True))`). Uses `sha2`/`hex` in place of `md5`
//! (the pack's pairing, see `tftio-gator`) and `flate2`/`base64` for
//! compression and the wire envelope, matching the original's
//! gzip/zlib/base64 choices one-to-one.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use orch_types::{CompressionKind, Message, MessageHeader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::TransportError;

/// Compute the hex-encoded SHA-256 checksum of `payload`'s canonical JSON
/// serialization. `serde_json::Value`'s object map is backed by a
/// `BTreeMap` (absent the `preserve_order` feature), so keys are always
/// serialized in sorted order, matching Python's `sort_keys=True`.
pub fn checksum(payload: &serde_json::Value) -> Result<String, TransportError> {
    let canonical = serde_json::to_vec(payload).map_err(|e| TransportError::Codec {
        detail: e.to_string(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

/// Verify `expected` against the freshly-computed checksum of `payload`.
pub fn verify_checksum(payload: &serde_json::Value, expected: &str) -> Result<bool, TransportError> {
    Ok(checksum(payload)? == expected)
}

/// Compress `bytes` with the requested [`CompressionKind`].
pub fn compress(bytes: &[u8], kind: CompressionKind) -> Result<Vec<u8>, TransportError> {
    let map_err = |e: std::io::Error| TransportError::Codec { detail: e.to_string() };
    match kind {
        CompressionKind::None => Ok(bytes.to_vec()),
        CompressionKind::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes).map_err(map_err)?;
            encoder.finish().map_err(map_err)
        }
        CompressionKind::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes).map_err(map_err)?;
            encoder.finish().map_err(map_err)
        }
    }
}

/// Decompress `bytes` previously produced by [`compress`] with `kind`.
pub fn decompress(bytes: &[u8], kind: CompressionKind) -> Result<Vec<u8>, TransportError> {
    let map_err = |e: std::io::Error| TransportError::Codec { detail: e.to_string() };
    match kind {
        CompressionKind::None => Ok(bytes.to_vec()),
        CompressionKind::Zlib => {
            let mut decoder = ZlibDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(map_err)?;
            Ok(out)
        }
        CompressionKind::Gzip => {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(map_err)?;
            Ok(out)
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    header: MessageHeader,
    payload_b64: String,
}

/// Encode `message` into its base64 wire envelope, filling in the header's
/// checksum over the uncompressed payload and compressing the payload per
/// `message.header.compression`. The header itself is carried uncompressed
/// so a receiver can always parse it before deciding how to handle the
/// payload.
pub fn to_wire_format(message: Message) -> Result<String, TransportError> {
    let Message { mut header, payload } = message;
    header.checksum = Some(checksum(&payload)?);
    let payload_json = serde_json::to_vec(&payload).map_err(|e| TransportError::Codec {
        detail: e.to_string(),
    })?;
    let compressed = compress(&payload_json, header.compression)?;
    let envelope = WireEnvelope {
        header,
        payload_b64: BASE64.encode(compressed),
    };
    let envelope_json = serde_json::to_vec(&envelope).map_err(|e| TransportError::Codec {
        detail: e.to_string(),
    })?;
    Ok(BASE64.encode(envelope_json))
}

/// Decode a wire envelope produced by [`to_wire_format`], verifying the
/// embedded checksum. Returns [`TransportError::ChecksumMismatch`] if it
/// does not match; callers must drop the message without invoking any
/// handler in that case.
pub fn from_wire_format(wire: &str) -> Result<Message, TransportError> {
    let envelope_json = BASE64.decode(wire).map_err(|e| TransportError::Codec {
        detail: e.to_string(),
    })?;
    let envelope: WireEnvelope = serde_json::from_slice(&envelope_json).map_err(|e| TransportError::Codec {
        detail: e.to_string(),
    })?;
    let compressed = BASE64.decode(&envelope.payload_b64).map_err(|e| TransportError::Codec {
        detail: e.to_string(),
    })?;
    let payload_json = decompress(&compressed, envelope.header.compression)?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_json).map_err(|e| TransportError::Codec {
        detail: e.to_string(),
    })?;
    let expected = envelope.header.checksum.clone().ok_or(TransportError::MissingChecksum)?;
    if !verify_checksum(&payload, &expected)? {
        return Err(TransportError::ChecksumMismatch);
    }
    Ok(Message {
        header: envelope.header,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_types::{DeliveryMode, MessagePriority, MessageType};

    fn sample(compression: CompressionKind) -> Message {
        Message {
            header: MessageHeader {
                id: "m1".into(),
                sender: "a".into(),
                recipient: Some("b".into()),
                message_type: MessageType::Direct,
                priority: MessagePriority::Medium,
                delivery_mode: DeliveryMode::FireAndForget,
                compression,
                timestamp: chrono::Utc::now(),
                ttl: None,
                correlation_id: None,
                checksum: None,
            },
            payload: serde_json::json!({"b": 2, "a": 1, "nested": {"z": 1, "y": 2}}),
        }
    }

    #[test]
    fn round_trip_uncompressed() {
        let wire = to_wire_format(sample(CompressionKind::None)).unwrap();
        let back = from_wire_format(&wire).unwrap();
        assert_eq!(back.payload, serde_json::json!({"b": 2, "a": 1, "nested": {"z": 1, "y": 2}}));
    }

    #[test]
    fn round_trip_zlib() {
        let wire = to_wire_format(sample(CompressionKind::Zlib)).unwrap();
        let back = from_wire_format(&wire).unwrap();
        assert_eq!(back.header.compression, CompressionKind::Zlib);
    }

    #[test]
    fn round_trip_gzip() {
        let wire = to_wire_format(sample(CompressionKind::Gzip)).unwrap();
        let back = from_wire_format(&wire).unwrap();
        assert_eq!(back.header.compression, CompressionKind::Gzip);
    }

    proptest::proptest! {
        /// For any JSON object built from string keys and small integers,
        /// `to_wire_format`/`from_wire_format` must recover the exact
        /// payload, and `verify_checksum` must accept the header's own
        /// checksum regardless of key insertion order.
        #[test]
        fn checksum_round_trips_for_arbitrary_objects(
            pairs in proptest::collection::vec(("[a-z]{1,8}", -1000i64..1000), 0..8),
            compression in proptest::sample::select(vec![CompressionKind::None, CompressionKind::Zlib, CompressionKind::Gzip]),
        ) {
            let mut map = serde_json::Map::new();
            for (k, v) in pairs {
                map.insert(k, serde_json::json!(v));
            }
            let payload = serde_json::Value::Object(map);
            let message = Message {
                header: MessageHeader {
                    id: "m1".into(),
                    sender: "a".into(),
                    recipient: Some("b".into()),
                    message_type: MessageType::Direct,
                    priority: MessagePriority::Medium,
                    delivery_mode: DeliveryMode::FireAndForget,
                    compression,
                    timestamp: chrono::Utc::now(),
                    ttl: None,
                    correlation_id: None,
                    checksum: None,
                },
                payload: payload.clone(),
            };
            let wire = to_wire_format(message).unwrap();
            let decoded = from_wire_format(&wire).unwrap();
            proptest::prop_assert_eq!(decoded.payload, payload);
            proptest::prop_assert!(verify_checksum(&decoded.payload, decoded.header.checksum.as_ref().unwrap()).unwrap());
        }
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let wire = to_wire_format(sample(CompressionKind::None)).unwrap();
        let envelope_json = BASE64.decode(&wire).unwrap();
        let mut envelope: WireEnvelope = serde_json::from_slice(&envelope_json).unwrap();
        let tampered = compress(br#"{"a":999}"#, CompressionKind::None).unwrap();
        envelope.payload_b64 = BASE64.encode(tampered);
        let tampered_json = serde_json::to_vec(&envelope).unwrap();
        let tampered_wire = BASE64.encode(tampered_json);
        let err = from_wire_format(&tampered_wire).unwrap_err();
        assert!(matches!(err, TransportError::ChecksumMismatch));
    }
}
