//! The pod namespace.
//!
//! One row per key in `pod_ns`, holding the fixed-width `AnyValue` root.
//! The blobs behind the root live in the pod's store; every write marshals
//! through a [`StoreHandle`] on the caller's connection, so namespace and
//! store stay consistent within one transaction.

use rusqlite::{params, Connection, OptionalExtension};

use isopod_blobs::StoreHandle;
use isopod_value::{load_any_root, marshal_any_root, AnyValue, Type, Value};

use crate::Result;

/// Upsert `key` to `any`, pulling its blobs into the pod store.
pub fn put(
    conn: &Connection,
    pod_id: i64,
    store_id: i64,
    key: &str,
    any: &AnyValue,
) -> Result<()> {
    let mut store = StoreHandle::new(conn, store_id);
    let root = marshal_any_root(any, &mut store)?;
    conn.execute(
        "INSERT INTO pod_ns (pod_id, k, v) VALUES (?1, ?2, ?3)
             ON CONFLICT (pod_id, k) DO UPDATE SET v = excluded.v",
        params![pod_id, key, root],
    )?;
    Ok(())
}

/// Load the value bound to `key`, if any.
pub fn get(
    conn: &Connection,
    pod_id: i64,
    store_id: i64,
    key: &str,
) -> Result<Option<AnyValue>> {
    let root: Option<Vec<u8>> = conn
        .query_row(
            "SELECT v FROM pod_ns WHERE pod_id = ?1 AND k = ?2",
            params![pod_id, key],
            |row| row.get(0),
        )
        .optional()?;
    match root {
        Some(root) => {
            let mut store = StoreHandle::new(conn, store_id);
            Ok(Some(load_any_root(&root, &mut store)?))
        }
        None => Ok(None),
    }
}

/// Compare-and-swap `key`.
///
/// An unbound key reads as the unit value, so a cell is initialised by
/// swapping against unit. On a match the new value is written and
/// returned; on a mismatch the current value is returned unchanged.
pub fn cas(
    conn: &Connection,
    pod_id: i64,
    store_id: i64,
    key: &str,
    prev: &AnyValue,
    next: &AnyValue,
) -> Result<AnyValue> {
    let current = get(conn, pod_id, store_id, key)?
        .unwrap_or_else(|| AnyValue::new(Type::unit(), Value::unit()));
    if current.ty == prev.ty && current.value.structural_eq(&prev.value) {
        put(conn, pod_id, store_id, key, next)?;
        Ok(next.clone())
    } else {
        Ok(current)
    }
}

/// Snapshot the whole namespace in key order.
pub fn all(
    conn: &Connection,
    pod_id: i64,
    store_id: i64,
) -> Result<std::collections::BTreeMap<String, AnyValue>> {
    let mut stmt =
        conn.prepare("SELECT k, v FROM pod_ns WHERE pod_id = ?1 ORDER BY k")?;
    let mut rows = stmt.query(params![pod_id])?;
    let mut out = std::collections::BTreeMap::new();
    let mut store = StoreHandle::new(conn, store_id);
    while let Some(row) = rows.next()? {
        let k: String = row.get(0)?;
        let root: Vec<u8> = row.get(1)?;
        out.insert(k, load_any_root(&root, &mut store)?);
    }
    Ok(out)
}

/// Drop every binding of the pod.
pub fn clear(conn: &Connection, pod_id: i64) -> Result<()> {
    conn.execute("DELETE FROM pod_ns WHERE pod_id = ?1", params![pod_id])?;
    Ok(())
}
