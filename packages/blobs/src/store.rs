//! Store-handle operations.
//!
//! Every function takes a `Connection` so it composes inside whatever
//! transaction the caller is running; `rusqlite::Transaction` derefs to
//! `Connection`. Membership in `store_blobs` is the refcount: `delete` and
//! `drop_store` garbage-collect blobs that no store holds any more.

use rusqlite::{params, Connection, OptionalExtension};

use isopod_value::{hash_blob, BlobId, BlobStore, Ref, ValueError};

use crate::{BlobError, Result};

/// Maximum size of a single blob in bytes.
pub const MAX_BLOB_SIZE: usize = 1 << 21;

/// Allocate a fresh, empty store. Returns its id.
pub fn create_store(conn: &Connection) -> Result<i64> {
    conn.execute("INSERT INTO stores DEFAULT VALUES", [])?;
    Ok(conn.last_insert_rowid())
}

/// Remove every association of `store_id`, delete any blob left orphaned,
/// then delete the store row.
pub fn drop_store(conn: &Connection, store_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM store_blobs WHERE store_id = ?1",
        params![store_id],
    )?;
    conn.execute(
        "DELETE FROM blobs WHERE NOT EXISTS
             (SELECT 1 FROM store_blobs WHERE store_blobs.blob_id = blobs.id)",
        [],
    )?;
    conn.execute("DELETE FROM stores WHERE id = ?1", params![store_id])?;
    Ok(())
}

/// Post bytes into the store. Idempotent; returns the content address.
pub fn post(
    conn: &Connection,
    store_id: i64,
    salt: Option<&[u8; 32]>,
    data: &[u8],
) -> Result<BlobId> {
    if data.len() > MAX_BLOB_SIZE {
        return Err(BlobError::TooLarge {
            size: data.len(),
            max: MAX_BLOB_SIZE,
        });
    }
    let id = hash_blob(salt, data);
    conn.execute(
        "INSERT OR IGNORE INTO blobs (id, salt, data) VALUES (?1, ?2, ?3)",
        params![id.as_bytes().as_slice(), salt.map(|s| s.as_slice()), data],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO store_blobs (store_id, blob_id) VALUES (?1, ?2)",
        params![store_id, id.as_bytes().as_slice()],
    )?;
    Ok(id)
}

fn fetch(
    conn: &Connection,
    store_id: i64,
    id: &BlobId,
    salt: Option<&[u8; 32]>,
) -> Result<Vec<u8>> {
    let row: Option<(Option<Vec<u8>>, Vec<u8>)> = conn
        .query_row(
            "SELECT b.salt, b.data FROM blobs b
               JOIN store_blobs sb ON sb.blob_id = b.id
              WHERE sb.store_id = ?1 AND b.id = ?2",
            params![store_id, id.as_bytes().as_slice()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (stored_salt, data) = row.ok_or(BlobError::NotFound)?;
    if stored_salt.as_deref() != salt.map(|s| s.as_slice()) {
        return Err(BlobError::NotFound);
    }
    Ok(data)
}

/// Read a blob into `buf`; returns the number of bytes written.
pub fn get(
    conn: &Connection,
    store_id: i64,
    id: &BlobId,
    salt: Option<&[u8; 32]>,
    buf: &mut [u8],
) -> Result<usize> {
    let data = fetch(conn, store_id, id, salt)?;
    if buf.len() < data.len() {
        return Err(BlobError::ShortBuffer {
            need: data.len(),
            got: buf.len(),
        });
    }
    buf[..data.len()].copy_from_slice(&data);
    Ok(data.len())
}

/// Read a blob as an owned vector.
pub fn get_vec(conn: &Connection, store_id: i64, id: &BlobId) -> Result<Vec<u8>> {
    fetch(conn, store_id, id, None)
}

/// Associate an already-present blob with this store.
///
/// Fails `NotFound` when no store currently holds the blob: a blob without
/// members is already gone (or was never posted).
pub fn add(conn: &Connection, store_id: i64, id: &BlobId) -> Result<()> {
    let held: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM store_blobs WHERE blob_id = ?1)",
        params![id.as_bytes().as_slice()],
        |row| row.get(0),
    )?;
    if !held {
        return Err(BlobError::NotFound);
    }
    conn.execute(
        "INSERT OR IGNORE INTO store_blobs (store_id, blob_id) VALUES (?1, ?2)",
        params![store_id, id.as_bytes().as_slice()],
    )?;
    Ok(())
}

/// Remove the association; delete the blob if no store remains.
pub fn delete(conn: &Connection, store_id: i64, id: &BlobId) -> Result<()> {
    conn.execute(
        "DELETE FROM store_blobs WHERE store_id = ?1 AND blob_id = ?2",
        params![store_id, id.as_bytes().as_slice()],
    )?;
    conn.execute(
        "DELETE FROM blobs WHERE id = ?1 AND NOT EXISTS
             (SELECT 1 FROM store_blobs WHERE blob_id = ?1)",
        params![id.as_bytes().as_slice()],
    )?;
    Ok(())
}

/// Is the blob associated with this store?
pub fn exists(conn: &Connection, store_id: i64, id: &BlobId) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM store_blobs WHERE store_id = ?1 AND blob_id = ?2)",
        params![store_id, id.as_bytes().as_slice()],
        |row| row.get(0),
    )?)
}

/// Fill `out` with associated blob ids in id order, starting at `begin`
/// (inclusive). Returns the number of ids written.
pub fn list(
    conn: &Connection,
    store_id: i64,
    begin: Option<&BlobId>,
    out: &mut [BlobId],
) -> Result<usize> {
    let floor = begin.map(|b| b.as_bytes().to_vec()).unwrap_or_default();
    let mut stmt = conn.prepare(
        "SELECT blob_id FROM store_blobs
          WHERE store_id = ?1 AND blob_id >= ?2
          ORDER BY blob_id LIMIT ?3",
    )?;
    let mut rows = stmt.query(params![store_id, floor, out.len() as i64])?;
    let mut n = 0;
    while let Some(row) = rows.next()? {
        let raw: Vec<u8> = row.get(0)?;
        out[n] = BlobId::from_slice(&raw).ok_or(BlobError::NotFound)?;
        n += 1;
    }
    Ok(n)
}

/// A `(connection, store_id)` pair, viewed as a value-model blob store.
///
/// This is the seam that lets values marshal directly into a pod or
/// staging store inside the caller's transaction.
pub struct StoreHandle<'a> {
    conn: &'a Connection,
    store_id: i64,
}

impl<'a> StoreHandle<'a> {
    pub fn new(conn: &'a Connection, store_id: i64) -> Self {
        StoreHandle { conn, store_id }
    }

    pub fn store_id(&self) -> i64 {
        self.store_id
    }
}

impl BlobStore for StoreHandle<'_> {
    fn post(&mut self, data: &[u8]) -> std::result::Result<Ref, ValueError> {
        let id = post(self.conn, self.store_id, None, data)
            .map_err(|e| ValueError::Store(Box::new(e)))?;
        Ok(Ref {
            id,
            len: data.len() as u32,
        })
    }

    fn get(&mut self, r: &Ref) -> std::result::Result<Vec<u8>, ValueError> {
        match get_vec(self.conn, self.store_id, &r.id) {
            Ok(data) => Ok(data),
            Err(BlobError::NotFound) => Err(ValueError::NotFound { id: r.id }),
            Err(e) => Err(ValueError::Store(Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn store_pair(db: &Db) -> (i64, i64) {
        db.with_tx(|tx| {
            Ok::<_, BlobError>((create_store(tx).unwrap(), create_store(tx).unwrap()))
        })
        .unwrap()
    }

    #[test]
    fn post_get_round_trips() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let s = create_store(tx)?;
            let id = post(tx, s, None, b"hello")?;
            let mut buf = [0u8; 16];
            let n = get(tx, s, &id, None, &mut buf)?;
            assert_eq!(&buf[..n], b"hello");
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn get_from_unassociated_store_is_not_found() {
        let db = Db::open_in_memory().unwrap();
        let (a, b) = store_pair(&db);
        db.with_tx(|tx| {
            let id = post(tx, a, None, b"private")?;
            let mut buf = [0u8; 16];
            assert!(matches!(
                get(tx, b, &id, None, &mut buf),
                Err(BlobError::NotFound)
            ));
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn short_buffer_is_reported() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let s = create_store(tx)?;
            let id = post(tx, s, None, b"twelve bytes")?;
            let mut buf = [0u8; 4];
            assert!(matches!(
                get(tx, s, &id, None, &mut buf),
                Err(BlobError::ShortBuffer { need: 12, got: 4 })
            ));
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn too_large_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let s = create_store(tx)?;
            let big = vec![0u8; MAX_BLOB_SIZE + 1];
            assert!(matches!(
                post(tx, s, None, &big),
                Err(BlobError::TooLarge { .. })
            ));
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn add_requires_a_holder() {
        let db = Db::open_in_memory().unwrap();
        let (a, b) = store_pair(&db);
        db.with_tx(|tx| {
            let id = post(tx, a, None, b"shared")?;
            add(tx, b, &id)?;
            assert!(exists(tx, b, &id)?);

            let ghost = hash_blob(None, b"never posted");
            assert!(matches!(add(tx, b, &ghost), Err(BlobError::NotFound)));
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn delete_gcs_when_last_holder_leaves() {
        let db = Db::open_in_memory().unwrap();
        let (a, b) = store_pair(&db);
        db.with_tx(|tx| {
            let id = post(tx, a, None, b"refcounted")?;
            add(tx, b, &id)?;

            delete(tx, a, &id)?;
            // Still held by b, so the blob row survives.
            assert!(exists(tx, b, &id)?);
            let rows: i64 =
                tx.query_row("SELECT count(*) FROM blobs", [], |row| row.get(0))?;
            assert_eq!(rows, 1);

            delete(tx, b, &id)?;
            let rows: i64 =
                tx.query_row("SELECT count(*) FROM blobs", [], |row| row.get(0))?;
            assert_eq!(rows, 0);
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn drop_store_leaves_only_shared_blobs() {
        let db = Db::open_in_memory().unwrap();
        let (a, b) = store_pair(&db);
        db.with_tx(|tx| {
            post(tx, a, None, b"only in a")?;
            let shared = post(tx, a, None, b"in both")?;
            add(tx, b, &shared)?;

            drop_store(tx, a)?;
            let rows: i64 =
                tx.query_row("SELECT count(*) FROM blobs", [], |row| row.get(0))?;
            assert_eq!(rows, 1);
            assert!(exists(tx, b, &shared)?);
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn list_is_ordered_and_resumable() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let s = create_store(tx)?;
            for i in 0..5u8 {
                post(tx, s, None, &[i])?;
            }
            let mut all = [hash_blob(None, b""); 5];
            let n = list(tx, s, None, &mut all)?;
            assert_eq!(n, 5);
            assert!(all.windows(2).all(|w| w[0] < w[1]));

            // Resume from the third id.
            let mut tail = [hash_blob(None, b""); 5];
            let n = list(tx, s, Some(&all[2]), &mut tail)?;
            assert_eq!(n, 3);
            assert_eq!(tail[0], all[2]);
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn salted_blobs_have_distinct_addresses() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let s = create_store(tx)?;
            let plain = post(tx, s, None, b"data")?;
            let salted = post(tx, s, Some(&[1u8; 32]), b"data")?;
            assert_ne!(plain, salted);

            // Salt is part of the lookup.
            let mut buf = [0u8; 8];
            assert!(get(tx, s, &salted, Some(&[1u8; 32]), &mut buf).is_ok());
            assert!(matches!(
                get(tx, s, &salted, None, &mut buf),
                Err(BlobError::NotFound)
            ));
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }

    #[test]
    fn store_handle_marshals_values() {
        use isopod_value::{load_any_root, marshal_any_root, AnyValue, Type, Value};

        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let s = create_store(tx)?;
            let any = AnyValue::new(Type::string(), Value::string("via sql"));
            let mut handle = StoreHandle::new(tx, s);
            let root = marshal_any_root(&any, &mut handle).unwrap();
            let back = load_any_root(&root, &mut handle).unwrap();
            assert!(back.value.structural_eq(&any.value));
            Ok::<_, BlobError>(())
        })
        .unwrap();
    }
}
