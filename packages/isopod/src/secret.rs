//! Pod secret wrapping.
//!
//! Every pod owns 256 random bits of secret material. At rest the secret
//! is wrapped under a key derived from the operator's key material, so the
//! database alone never yields a pod identity. Network node keys are in
//! turn derived from the unwrapped secret and a key index.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use crate::{Error, Result};

/// Size of the unwrapped pod secret.
pub const SECRET_LEN: usize = 32;

const NONCE_LEN: usize = 24;
const WRAP_CONTEXT: &str = "isopod pod wrap key v1";

/// Derive the wrap key from operator key material.
pub fn derive_wrap_key(material: &str) -> [u8; 32] {
    blake3::derive_key(WRAP_CONTEXT, material.as_bytes())
}

/// Wrap a pod secret for storage: `nonce || ciphertext+tag`.
pub fn wrap_secret(wrap_key: &[u8; 32], secret: &[u8; SECRET_LEN]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(wrap_key.into());
    let nonce: [u8; NONCE_LEN] = rand::random();
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), secret.as_slice())
        .expect("xchacha sealing is infallible for in-memory buffers");
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    out
}

/// Unwrap a stored pod secret.
pub fn unwrap_secret(wrap_key: &[u8; 32], wrapped: &[u8]) -> Result<[u8; SECRET_LEN]> {
    if wrapped.len() < NONCE_LEN {
        return Err(Error::Secret("wrapped secret truncated".into()));
    }
    let (nonce, sealed) = wrapped.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(wrap_key.into());
    let plain = cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Secret("unwrap failed; wrong key material?".into()))?;
    plain
        .try_into()
        .map_err(|_| Error::Secret("unwrapped secret has wrong length".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_round_trips() {
        let key = derive_wrap_key("test material");
        let secret = [7u8; SECRET_LEN];
        let wrapped = wrap_secret(&key, &secret);
        assert_eq!(unwrap_secret(&key, &wrapped).unwrap(), secret);
    }

    #[test]
    fn wrong_material_fails_to_unwrap() {
        let wrapped = wrap_secret(&derive_wrap_key("right"), &[7u8; SECRET_LEN]);
        assert!(matches!(
            unwrap_secret(&derive_wrap_key("wrong"), &wrapped),
            Err(Error::Secret(_))
        ));
    }

    #[test]
    fn wrapping_is_randomised() {
        let key = derive_wrap_key("m");
        let secret = [1u8; SECRET_LEN];
        assert_ne!(wrap_secret(&key, &secret), wrap_secret(&key, &secret));
    }

    #[test]
    fn truncated_wrap_is_an_error() {
        let key = derive_wrap_key("m");
        assert!(matches!(
            unwrap_secret(&key, &[0u8; 10]),
            Err(Error::Secret(_))
        ));
    }
}
