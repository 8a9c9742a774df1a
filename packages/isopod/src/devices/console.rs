//! The console device.
//!
//! An append-only text sink. `output` takes a string and writes its bytes
//! to the system's console writer; stdout by default, injectable for
//! capture in tests.

use std::io::Write;
use std::sync::{Arc, Mutex};

use isopod_value::{BlobStore, PortType, Type};
use isopod_vm::{PortBackend, PortError};

use crate::devices::read_words;

/// Shared sink for every console device in the system.
pub type ConsoleWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct ConsoleDevice {
    writer: ConsoleWriter,
}

pub fn port_type() -> PortType {
    PortType {
        input: Type::unit(),
        output: Type::string(),
        request: Type::unit(),
        response: Type::unit(),
    }
}

impl ConsoleDevice {
    pub fn new(writer: ConsoleWriter) -> Self {
        ConsoleDevice { writer }
    }
}

impl PortBackend for ConsoleDevice {
    fn output(&self, store: &mut dyn BlobStore, buf: &[u32]) -> Result<(), PortError> {
        let v = read_words(store, buf, &port_type().output)?;
        let bytes = v
            .as_string_bytes()
            .ok_or_else(|| PortError::Invalid("console output is not a string".into()))?;
        let mut w = self.writer.lock().expect("console mutex poisoned");
        w.write_all(&bytes)
            .and_then(|_| w.flush())
            .map_err(|e| PortError::Backend(Box::new(e)))
    }
}
