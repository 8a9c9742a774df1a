//! The random device.
//!
//! `interact` takes a bit count and responds with that many bits of
//! OS-sourced randomness as a packed bit list. Counts must be a multiple
//! of eight and under [`MAX_RANDOM_BITS`].

use rand::rngs::OsRng;
use rand::RngCore;

use isopod_value::{BlobStore, PortType, Type, Value};
use isopod_vm::{PortBackend, PortError};

use crate::devices::{read_words, write_words};

/// Largest single request, in bits.
pub const MAX_RANDOM_BITS: u64 = 1 << 20;

#[derive(Default)]
pub struct RandomDevice;

pub fn port_type() -> PortType {
    PortType {
        input: Type::unit(),
        output: Type::unit(),
        request: Type::Bits(64),
        response: Type::string(),
    }
}

impl RandomDevice {
    pub fn new() -> Self {
        Self
    }
}

impl PortBackend for RandomDevice {
    fn interact(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let req = read_words(store, buf, &port_type().request)?;
        let Value::Bits { value: n, .. } = req else {
            return Err(PortError::Invalid("bit count is not Bits(64)".into()));
        };
        if n >= MAX_RANDOM_BITS {
            return Err(PortError::TooLarge {
                size: n,
                max: MAX_RANDOM_BITS,
            });
        }
        if n % 8 != 0 {
            return Err(PortError::Invalid(format!(
                "bit count {} is not a whole number of bytes",
                n
            )));
        }
        let mut bytes = vec![0u8; (n / 8) as usize];
        OsRng.fill_bytes(&mut bytes);
        write_words(store, buf, &Value::BitList(bytes), &port_type().response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isopod_value::MemBlobStore;
    use isopod_vm::word_len;

    fn ask(n: u64) -> Result<Value, PortError> {
        let dev = RandomDevice::new();
        let mut store = MemBlobStore::new();
        let ty = port_type();
        let words = word_len(ty.request.width_bits()).max(word_len(ty.response.width_bits()));
        let mut buf = vec![0u32; words];
        write_words(&mut store, &mut buf, &Value::b64(n), &ty.request)?;
        dev.interact(&mut store, &mut buf)?;
        read_words(&mut store, &buf, &ty.response)
    }

    #[test]
    fn yields_the_requested_number_of_bits() {
        let Value::BitList(bytes) = ask(256).unwrap() else {
            panic!("not a bit list");
        };
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn successive_draws_differ() {
        // 2^-256 flake odds.
        assert_ne!(ask(256).unwrap(), ask(256).unwrap());
    }

    #[test]
    fn unaligned_count_is_invalid() {
        assert!(matches!(ask(7), Err(PortError::Invalid(_))));
        assert!(matches!(ask(9), Err(PortError::Invalid(_))));
    }

    #[test]
    fn oversized_count_is_too_large() {
        // The cap itself is already out of range.
        assert!(matches!(
            ask(MAX_RANDOM_BITS),
            Err(PortError::TooLarge { .. })
        ));
        assert!(ask(MAX_RANDOM_BITS - 8).is_ok());
    }

    #[test]
    fn zero_bits_is_fine() {
        let Value::BitList(bytes) = ask(0).unwrap() else {
            panic!("not a bit list");
        };
        assert!(bytes.is_empty());
    }
}
