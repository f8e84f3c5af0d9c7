use super::{SignalMessage, WireFormat};
use crate::error::SignalingError;
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

// Ограничиваем размер распаковываемых данных до 256 KiB (защита от zip-bomb)
pub const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

pub fn to_json(msg: &SignalMessage) -> Result<String, SignalingError> {
    serde_json::to_string(msg).map_err(|e| SignalingError::Malformed(e.to_string()))
}

pub fn from_json(raw: &str) -> Result<SignalMessage, SignalingError> {
    serde_json::from_str(raw).map_err(|e| SignalingError::Malformed(e.to_string()))
}

/// JSON -> gzip -> base64
pub fn encode_token(msg: &SignalMessage) -> Result<String, SignalingError> {
    let json = serde_json::to_vec(msg).map_err(|e| SignalingError::Malformed(e.to_string()))?;

    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)
        .map_err(|e| SignalingError::Malformed(e.to_string()))?;
    let compressed = gz
        .finish()
        .map_err(|e| SignalingError::Malformed(e.to_string()))?;

    Ok(general_purpose::STANDARD.encode(compressed))
}

/// base64 -> gunzip -> JSON
pub fn decode_token(token: &str) -> Result<SignalMessage, SignalingError> {
    let compressed = general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| SignalingError::Malformed(e.to_string()))?;

    // читаем на байт больше лимита, чтобы отличить "ровно лимит" от переполнения
    let mut json = Vec::new();
    GzDecoder::new(&compressed[..])
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut json)
        .map_err(|e| SignalingError::Malformed(e.to_string()))?;
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(SignalingError::TooLarge(MAX_DECOMPRESSED_SIZE));
    }

    serde_json::from_slice(&json).map_err(|e| SignalingError::Malformed(e.to_string()))
}

pub fn encode(format: WireFormat, msg: &SignalMessage) -> Result<String, SignalingError> {
    match format {
        WireFormat::Json => to_json(msg),
        WireFormat::Token => encode_token(msg),
    }
}

pub fn decode(format: WireFormat, raw: &str) -> Result<SignalMessage, SignalingError> {
    match format {
        WireFormat::Json => from_json(raw),
        WireFormat::Token => decode_token(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::IceCandidate;

    #[test]
    fn token_round_trip_keeps_candidate_fields() {
        let msg = SignalMessage::Candidate {
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 192.168.1.4 5000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: Some("abcd".into()),
            },
        };
        let token = encode_token(&msg).unwrap();
        assert!(!token.contains('{'));
        assert_eq!(decode_token(&token).unwrap(), msg);
    }

    #[test]
    fn garbage_token_is_malformed() {
        assert!(matches!(
            decode_token("not base64 !!"),
            Err(SignalingError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_token_is_rejected() {
        let msg = SignalMessage::Offer {
            sdp: "a".repeat(MAX_DECOMPRESSED_SIZE as usize + 10),
        };
        let token = encode_token(&msg).unwrap();
        assert!(matches!(
            decode_token(&token),
            Err(SignalingError::TooLarge(_))
        ));
    }

    #[test]
    fn unknown_type_is_malformed() {
        assert!(matches!(
            from_json(r#"{"type":"bye"}"#),
            Err(SignalingError::Malformed(_))
        ));
    }
}
