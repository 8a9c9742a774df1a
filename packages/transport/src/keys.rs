//! Node identity derivation.

use ed25519_dalek::{SigningKey, VerifyingKey};

/// A peer identity: the bytes of an Ed25519 verifying key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<&VerifyingKey> for PeerId {
    fn from(vk: &VerifyingKey) -> Self {
        PeerId(vk.to_bytes())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Derive a node's Ed25519 key from the pod secret and a key index.
///
/// Keyed BLAKE3 XOF with personalisation `"ed25519" || BE64(index)`. The
/// derivation is deterministic, so a node's identity survives restarts
/// without the key ever being persisted.
pub fn derive_node_key(secret: &[u8; 32], index: u32) -> SigningKey {
    let mut hasher = blake3::Hasher::new_keyed(secret);
    hasher.update(b"ed25519");
    hasher.update(&u64::from(index).to_be_bytes());
    let mut seed = [0u8; 32];
    hasher.finalize_xof().fill(&mut seed);
    SigningKey::from_bytes(&seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let secret = [5u8; 32];
        let a = derive_node_key(&secret, 0);
        let b = derive_node_key(&secret, 0);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn indices_and_secrets_separate_keys() {
        let secret = [5u8; 32];
        let k0 = derive_node_key(&secret, 0);
        let k1 = derive_node_key(&secret, 1);
        let other = derive_node_key(&[6u8; 32], 0);
        assert_ne!(k0.to_bytes(), k1.to_bytes());
        assert_ne!(k0.to_bytes(), other.to_bytes());
    }
}
