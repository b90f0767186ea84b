use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

// ParticipantId identifies a supply-chain participant.
// It is a 32 byte long opaque identifier, resembling a public key. The all-zero
// value marks a stage owner that has not been recorded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ParticipantId([u8; 32]);

/// Error returned when parsing a participant id from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl Deref for ParticipantId {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for ParticipantId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| ParseIdError::Hex(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseIdError::Length(bytes.len()))?;
        Ok(ParticipantId(bytes))
    }
}

impl ParticipantId {
    /// The unset identity
    pub const ZERO: ParticipantId = ParticipantId([0; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        ParticipantId(bytes)
    }

    /// Accept a compressed Edwards25519 public key as an identity.
    ///
    /// Returns `None` when the bytes do not decompress to a curve point, so an
    /// identity built this way always corresponds to a real signing key.
    pub fn from_public_key(bytes: [u8; 32]) -> Option<Self> {
        CompressedEdwardsY(bytes).decompress()?;
        Some(ParticipantId(bytes))
    }

    /// Deterministically derive an identity from seeds
    pub fn derive(seeds: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();

        // Domain separator
        hasher.update(b"SOY_Participant");

        for seed in seeds {
            hasher.update(seed);
        }

        ParticipantId(hasher.finalize().into())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Abbreviated form for logs, e.g. `0x1a2b3c…7d8e`
    pub fn short(&self) -> String {
        let full = hex::encode(self.0);
        format!("0x{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

// Human readable formats (JSON configuration) carry the hex form, binary
// formats carry the raw bytes.
impl Serialize for ParticipantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(ParticipantId)
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Named test identity
    pub fn participant(name: &str) -> ParticipantId {
        ParticipantId::derive(&[name.as_bytes()])
    }

    #[test]
    fn test_default_id_is_zero() {
        let id = ParticipantId::default();
        assert!(id.is_zero());
        assert_eq!(id, ParticipantId::ZERO);
        assert_eq!(*id, [0u8; 32]);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = ParticipantId::derive(&[b"farmer", b"john"]);
        let b = ParticipantId::derive(&[b"farmer", b"john"]);
        assert_eq!(a, b);
        assert!(!a.is_zero());

        let c = ParticipantId::derive(&[b"john", b"farmer"]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_round_trip_and_prefix() {
        let id = participant("processor");
        let text = id.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(text.parse::<ParticipantId>().unwrap(), id);

        // The prefix is optional when parsing
        assert_eq!(text[2..].parse::<ParticipantId>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "0x1234".parse::<ParticipantId>(),
            Err(ParseIdError::Length(2))
        ));
        assert!(matches!(
            "0xzz".parse::<ParticipantId>(),
            Err(ParseIdError::Hex(_))
        ));
    }

    #[test]
    fn test_short_form() {
        let id = ParticipantId::new([0xab; 32]);
        assert_eq!(id.short(), "0xababab…abab");
    }

    #[test]
    fn test_from_public_key_accepts_curve_point() {
        let basepoint = curve25519_dalek::constants::ED25519_BASEPOINT_COMPRESSED.to_bytes();
        let id = ParticipantId::from_public_key(basepoint).unwrap();
        assert_eq!(*id, basepoint);
    }

    #[test]
    fn test_serde_formats() {
        let id = participant("distributor");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        assert_eq!(serde_json::from_str::<ParticipantId>(&json).unwrap(), id);

        let bytes = bincode::serialize(&id).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bincode::deserialize::<ParticipantId>(&bytes).unwrap(), id);
    }
}
