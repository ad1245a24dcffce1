use base64::alphabet::STANDARD as ALPHABET_STANDARD;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use once_cell::sync::Lazy;
use uuid::Uuid;

static ID_ENGINE: Lazy<GeneralPurpose> = Lazy::new(|| {
    GeneralPurpose::new(
        &ALPHABET_STANDARD,
        GeneralPurposeConfig::new().with_encode_padding(false),
    )
});

pub fn encode_uuid(uuid: Uuid) -> String {
    ID_ENGINE.encode(uuid.as_bytes())
}

/// Mint an opaque id with a readable prefix, e.g. `session_3q2p...`.
pub fn mint_id(prefix: &str) -> String {
    format!("{}_{}", prefix, encode_uuid(Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_ids_carry_prefix_and_differ() {
        let a = mint_id("session");
        let b = mint_id("session");
        assert!(a.starts_with("session_"));
        assert!(b.starts_with("session_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_encoded_uuid_is_unpadded() {
        let s = encode_uuid(Uuid::new_v4());
        assert!(!s.contains('='));
        assert_eq!(s.len(), 22);
    }
}
