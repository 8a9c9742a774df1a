//! The cell device.
//!
//! A cell is a mutable view of the namespace entry it is configured on.
//! `input` reads the current value, `output` writes unconditionally, and
//! `interact` is compare-and-swap, with the response reporting whichever
//! value won. Every access runs in its own transaction and respects the
//! dead watermark.

use std::sync::Arc;

use isopod_value::{AnyValue, BlobStore, PortType, Type, Value};
use isopod_vm::{PortBackend, PortError};

use crate::devices::{read_words, write_words, PodCore};
use crate::error::to_port_err;
use crate::{ns, Error};

pub struct CellDevice {
    core: Arc<PodCore>,
    key: String,
    proc_id: i64,
}

/// Cells carry self-describing values in every direction.
pub fn port_type() -> PortType {
    PortType {
        input: Type::Any,
        output: Type::Any,
        request: Type::Product(vec![Type::Any, Type::Any]),
        response: Type::Any,
    }
}

impl CellDevice {
    pub(crate) fn new(core: Arc<PodCore>, key: String, proc_id: i64) -> Self {
        CellDevice { core, key, proc_id }
    }

    fn current(&self) -> Result<AnyValue, Error> {
        let got = self.core.db.with_tx(|tx| {
            self.core.check_proc_alive(tx, self.proc_id)?;
            ns::get(tx, self.core.pod_id, self.core.store_id, &self.key)
        })?;
        Ok(got.unwrap_or_else(|| AnyValue::new(Type::unit(), Value::unit())))
    }
}

impl PortBackend for CellDevice {
    fn input(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let any = self.current().map_err(to_port_err)?;
        write_words(store, buf, &Value::Any(Box::new(any)), &Type::Any)
    }

    /// Unconditional write.
    fn output(&self, store: &mut dyn BlobStore, buf: &[u32]) -> Result<(), PortError> {
        let v = read_words(store, buf, &Type::Any)?;
        let Value::Any(any) = v else {
            return Err(PortError::Invalid("cell output is not any".into()));
        };
        self.core
            .db
            .with_tx(|tx| {
                self.core.check_proc_alive(tx, self.proc_id)?;
                ns::put(tx, self.core.pod_id, self.core.store_id, &self.key, &any)
            })
            .map_err(to_port_err)
    }

    fn interact(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let req = read_words(store, buf, &port_type().request)?;
        let Value::Product(parts) = req else {
            return Err(PortError::Invalid("cell request is not a pair".into()));
        };
        let mut parts = parts.into_iter();
        let (Some(Value::Any(prev)), Some(Value::Any(next))) = (parts.next(), parts.next())
        else {
            return Err(PortError::Invalid("cell request halves must be any".into()));
        };
        let out = self
            .core
            .db
            .with_tx(|tx| {
                self.core.check_proc_alive(tx, self.proc_id)?;
                ns::cas(
                    tx,
                    self.core.pod_id,
                    self.core.store_id,
                    &self.key,
                    &prev,
                    &next,
                )
            })
            .map_err(to_port_err)?;
        write_words(store, buf, &Value::Any(Box::new(out)), &Type::Any)
    }
}
