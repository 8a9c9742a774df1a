//! The wall clock device.
//!
//! `input` yields `(unix seconds: Bits(64), nanos: Bits(32))`. Readings
//! never go backwards within one device instance, even if the host clock
//! does.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use isopod_value::{BlobStore, PortType, Type, Value};
use isopod_vm::{PortBackend, PortError};

use crate::devices::write_words;

#[derive(Default)]
pub struct WallClockDevice {
    last: Mutex<(u64, u32)>,
}

pub fn port_type() -> PortType {
    PortType {
        input: Type::Product(vec![Type::Bits(64), Type::Bits(32)]),
        output: Type::unit(),
        request: Type::unit(),
        response: Type::unit(),
    }
}

impl WallClockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn now(&self) -> (u64, u32) {
        let raw = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_secs(), d.subsec_nanos()))
            .unwrap_or((0, 0));
        let mut last = self.last.lock().expect("clock mutex poisoned");
        if raw > *last {
            *last = raw;
        }
        *last
    }
}

impl PortBackend for WallClockDevice {
    fn input(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let (secs, nanos) = self.now();
        let v = Value::Product(vec![Value::b64(secs), Value::b32(nanos)]);
        write_words(store, buf, &v, &port_type().input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isopod_value::MemBlobStore;
    use isopod_vm::word_len;

    #[test]
    fn readings_are_plausible_and_monotonic() {
        let clock = WallClockDevice::new();
        let mut store = MemBlobStore::new();
        let ty = port_type().input;
        let mut buf = vec![0u32; word_len(ty.width_bits())];

        clock.input(&mut store, &mut buf).unwrap();
        let first = crate::devices::read_words(&mut store, &buf, &ty).unwrap();
        clock.input(&mut store, &mut buf).unwrap();
        let second = crate::devices::read_words(&mut store, &buf, &ty).unwrap();

        let secs = |v: &Value| match v {
            Value::Product(xs) => match xs[0] {
                Value::Bits { value, .. } => value,
                _ => panic!("not bits"),
            },
            _ => panic!("not a product"),
        };
        // After 2020, before 2100.
        assert!(secs(&first) > 1_577_836_800);
        assert!(secs(&first) < 4_102_444_800);
        assert!(secs(&second) >= secs(&first));
    }
}
