//! The port boundary.
//!
//! The VM is word-oriented: a marshalled value occupies `ceil(bits/32)`
//! little-endian 32-bit words, zero-padded on unaligned lengths. Device
//! backends implement up to three of the four channels of their port's
//! typed 4-tuple; the missing `response` direction rides on `interact`,
//! which overwrites the head of its buffer with the response.

use isopod_value::BlobStore;

use crate::error::PortError;

/// Number of 32-bit words a value of the given bit width occupies.
pub fn word_len(bits: u32) -> usize {
    (bits as usize).div_ceil(32)
}

/// Pack bytes into little-endian words, zero-padding the tail.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Unpack little-endian words into bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// A device behind a port.
///
/// Handlers are optional; the default for each is `NotSupported`. Buffers
/// are pre-sized by the VM from the port's type:
///
/// - `input`: marshal the current input value into `buf`, posting side
///   blobs into `store` so the VM can reach them.
/// - `output`: `buf` holds a marshalled `OutputType` value; decode it with
///   `store` and consume it.
/// - `interact`: `buf` arrives holding a marshalled `RequestType` and must
///   leave holding a marshalled `ResponseType` in its head.
pub trait PortBackend: Send {
    fn input(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let _ = (store, buf);
        Err(PortError::NotSupported)
    }

    fn output(&self, store: &mut dyn BlobStore, buf: &[u32]) -> Result<(), PortError> {
        let _ = (store, buf);
        Err(PortError::NotSupported)
    }

    fn interact(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let _ = (store, buf);
        Err(PortError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_len_rounds_up() {
        assert_eq!(word_len(0), 0);
        assert_eq!(word_len(1), 1);
        assert_eq!(word_len(32), 1);
        assert_eq!(word_len(33), 2);
        assert_eq!(word_len(96), 3);
    }

    #[test]
    fn packing_round_trips_with_padding() {
        let bytes = vec![1u8, 2, 3, 4, 5];
        let words = bytes_to_words(&bytes);
        assert_eq!(words.len(), 2);
        let back = words_to_bytes(&words);
        assert_eq!(&back[..5], &bytes[..]);
        assert_eq!(&back[5..], &[0, 0, 0]);
    }

    #[test]
    fn words_are_little_endian() {
        let words = bytes_to_words(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(words, vec![0x1234_5678]);
    }

    #[test]
    fn default_handlers_are_not_supported() {
        struct Inert;
        impl PortBackend for Inert {}

        let mut store = isopod_value::MemBlobStore::new();
        let mut buf = [0u32; 1];
        assert!(matches!(
            Inert.input(&mut store, &mut buf),
            Err(PortError::NotSupported)
        ));
        assert!(matches!(
            Inert.output(&mut store, &buf),
            Err(PortError::NotSupported)
        ));
        assert!(matches!(
            Inert.interact(&mut store, &mut buf),
            Err(PortError::NotSupported)
        ));
    }
}
