//! Device backends.
//!
//! Each device implements [`PortBackend`] and is overlaid onto a process's
//! VM under a fresh random port identity. Devices that touch persistent
//! state carry a [`PodCore`] and the calling process id; every transaction
//! they open first checks the id against the pod's dead watermark, which is
//! how cancellation reaches work already in flight.

pub mod cell;
pub mod clock;
pub mod console;
pub mod net;
pub mod random;

use rusqlite::{params, Connection};

use isopod_blobs::Db;
use isopod_value::{marshal, BlobStore, Type, Value};
use isopod_vm::{bytes_to_words, words_to_bytes, PortError};

use crate::{Error, Result};

/// The persistent identity a device needs: which pod, which store, and a
/// database handle to reach them.
pub(crate) struct PodCore {
    pub db: Db,
    pub pod_id: i64,
    pub store_id: i64,
}

impl PodCore {
    /// Fail `ProcCancelled` when `proc_id` sits at or below the pod's dead
    /// watermark. Run inside the same transaction as the guarded work.
    pub fn check_proc_alive(&self, conn: &Connection, proc_id: i64) -> Result<()> {
        let dead: i64 = conn.query_row(
            "SELECT dead_lteq FROM pods WHERE id = ?1",
            params![self.pod_id],
            |row| row.get(0),
        )?;
        if proc_id <= dead {
            return Err(Error::ProcCancelled);
        }
        Ok(())
    }
}

/// Marshal `value` at `ty` into the head of a word buffer, zeroing the
/// tail. Side blobs go into `store` so the VM can decode them.
pub(crate) fn write_words(
    store: &mut dyn BlobStore,
    buf: &mut [u32],
    value: &Value,
    ty: &Type,
) -> std::result::Result<(), PortError> {
    let bytes = marshal(value, ty, store)?;
    let words = bytes_to_words(&bytes);
    if words.len() > buf.len() {
        return Err(PortError::Invalid(format!(
            "marshalled value needs {} words, buffer has {}",
            words.len(),
            buf.len()
        )));
    }
    buf[..words.len()].copy_from_slice(&words);
    buf[words.len()..].fill(0);
    Ok(())
}

/// Decode a value of `ty` from the head of a word buffer.
pub(crate) fn read_words(
    store: &mut dyn BlobStore,
    buf: &[u32],
    ty: &Type,
) -> std::result::Result<Value, PortError> {
    let bytes = words_to_bytes(buf);
    Ok(isopod_value::load(ty, &bytes, store)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isopod_value::MemBlobStore;

    #[test]
    fn words_round_trip_a_value() {
        let mut store = MemBlobStore::new();
        let ty = Type::Product(vec![Type::Bits(64), Type::string()]);
        let v = Value::Product(vec![Value::b64(77), Value::string("x")]);
        let mut buf = [0u32; 16];
        write_words(&mut store, &mut buf, &v, &ty).unwrap();
        let back = read_words(&mut store, &buf, &ty).unwrap();
        assert!(back.structural_eq(&v));
    }

    #[test]
    fn oversized_value_is_rejected() {
        let mut store = MemBlobStore::new();
        let mut buf = [0u32; 1];
        assert!(matches!(
            write_words(&mut store, &mut buf, &Value::b64(1), &Type::Bits(64)),
            Err(PortError::Invalid(_))
        ));
    }
}
