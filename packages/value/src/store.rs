//! Content-addressed refs and the `BlobStore` seam.
//!
//! `BlobStore` is the only interface the value model has to storage. The
//! SQL-backed pod stores, the per-process staging stores, and the in-memory
//! scratch stores all implement it, so a value marshals the same way into
//! any of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Result, ValueError};

/// A 32-byte BLAKE3 content address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobId(pub [u8; 32]);

impl BlobId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(b: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = b.try_into().ok()?;
        Some(BlobId(arr))
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

impl std::fmt::Debug for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobId({})", self)
    }
}

/// Hash bytes into a blob id.
///
/// With a salt this is keyed BLAKE3; without, plain BLAKE3. The salt is part
/// of the address: the same bytes under different salts are different blobs.
pub fn hash_blob(salt: Option<&[u8; 32]>, data: &[u8]) -> BlobId {
    let hash = match salt {
        Some(key) => blake3::keyed_hash(key, data),
        None => blake3::hash(data),
    };
    BlobId(*hash.as_bytes())
}

/// A content address plus the length of the addressed bytes.
///
/// Refs are what lists, lambdas, and `AnyValue` roots carry inline; the
/// bytes themselves live in a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub id: BlobId,
    pub len: u32,
}

impl Ref {
    /// Marshalled form: id bytes followed by LE32 length.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.0);
        out.extend_from_slice(&self.len.to_le_bytes());
    }

    /// Read a ref from the head of `buf`.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < 36 {
            return Err(ValueError::ShortBuffer {
                need: 36,
                got: buf.len(),
            });
        }
        let id = BlobId::from_slice(&buf[..32]).expect("32-byte slice");
        let len = u32::from_le_bytes(buf[32..36].try_into().expect("4-byte slice"));
        Ok(Ref { id, len })
    }
}

/// Post and fetch blobs by content address.
///
/// `post` is idempotent: posting the same bytes twice yields the same ref.
/// `get` fails with `NotFound` when the store does not hold the blob.
///
/// This trait is object-safe: `Box<dyn BlobStore>` works.
pub trait BlobStore {
    fn post(&mut self, data: &[u8]) -> Result<Ref>;
    fn get(&mut self, r: &Ref) -> Result<Vec<u8>>;
}

impl<T: BlobStore + ?Sized> BlobStore for &mut T {
    fn post(&mut self, data: &[u8]) -> Result<Ref> {
        (*self).post(data)
    }

    fn get(&mut self, r: &Ref) -> Result<Vec<u8>> {
        (*self).get(r)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn post(&mut self, data: &[u8]) -> Result<Ref> {
        self.as_mut().post(data)
    }

    fn get(&mut self, r: &Ref) -> Result<Vec<u8>> {
        self.as_mut().get(r)
    }
}

/// An in-memory blob store, used for process scratch space and tests.
#[derive(Default)]
pub struct MemBlobStore {
    blobs: BTreeMap<BlobId, Vec<u8>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, id: &BlobId) -> bool {
        self.blobs.contains_key(id)
    }

    /// Iterate the held blobs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&BlobId, &[u8])> {
        self.blobs.iter().map(|(id, data)| (id, data.as_slice()))
    }
}

impl BlobStore for MemBlobStore {
    fn post(&mut self, data: &[u8]) -> Result<Ref> {
        let id = hash_blob(None, data);
        self.blobs.entry(id).or_insert_with(|| data.to_vec());
        Ok(Ref {
            id,
            len: data.len() as u32,
        })
    }

    fn get(&mut self, r: &Ref) -> Result<Vec<u8>> {
        let data = self
            .blobs
            .get(&r.id)
            .ok_or(ValueError::NotFound { id: r.id })?;
        if data.len() != r.len as usize {
            return Err(ValueError::Corrupt {
                id: r.id,
                message: format!("ref says {} bytes, blob has {}", r.len, data.len()),
            });
        }
        Ok(data.clone())
    }
}

/// A store that computes ids and lengths but persists nothing.
///
/// The network device uses this to bind a value's root without keeping the
/// payload: signing needs the root bytes, not the blobs behind them.
#[derive(Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        NullStore
    }
}

impl BlobStore for NullStore {
    fn post(&mut self, data: &[u8]) -> Result<Ref> {
        Ok(Ref {
            id: hash_blob(None, data),
            len: data.len() as u32,
        })
    }

    fn get(&mut self, r: &Ref) -> Result<Vec<u8>> {
        Err(ValueError::NotFound { id: r.id })
    }
}
