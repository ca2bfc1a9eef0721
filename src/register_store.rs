//! Shared holding-register image.
//!
//! The store is the rendezvous point between the poller, which is its only
//! writer, and the Modbus server, which reads it from every client
//! connection. Every access takes the same lock for the duration of the array
//! copy only, so a reader never sees half of a register pair.
//!
//! Addresses are Modbus protocol addresses as they arrive in a request
//! (zero based). The store maps `address - base_offset` onto its backing
//! array; anything that falls outside is read as `0` and dropped on write.

use parking_lot::Mutex;

/// Registers to be written at `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterUpdate {
    pub address: u16,
    pub values: Vec<u16>,
}

impl RegisterUpdate {
    pub fn new(address: u16, values: impl Into<Vec<u16>>) -> Self {
        Self {
            address,
            values: values.into(),
        }
    }
}

/// Fixed-size, lock-protected array of holding registers.
#[derive(Debug)]
pub struct RegisterStore {
    base_offset: u16,
    registers: Mutex<Vec<u16>>,
}

impl RegisterStore {
    /// Creates a zeroed store holding `len` registers, the first one living
    /// at protocol address `base_offset`.
    pub fn new(base_offset: u16, len: usize) -> Self {
        Self {
            base_offset,
            registers: Mutex::new(vec![0; len]),
        }
    }

    pub fn base_offset(&self) -> u16 {
        self.base_offset
    }

    pub fn len(&self) -> usize {
        self.registers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, address: u16, i: usize) -> Option<usize> {
        (address as usize + i).checked_sub(self.base_offset as usize)
    }

    /// Reads `count` consecutive registers starting at `address`.
    ///
    /// Positions outside the backing array read as `0`.
    pub fn read(&self, address: u16, count: u16) -> Vec<u16> {
        let registers = self.registers.lock();
        (0..count as usize)
            .map(|i| {
                self.index(address, i)
                    .and_then(|idx| registers.get(idx).copied())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Writes `values` starting at `address`.
    ///
    /// Positions outside the backing array are silently dropped.
    pub fn write(&self, address: u16, values: &[u16]) {
        let mut registers = self.registers.lock();
        self.write_locked(&mut registers, address, values);
    }

    /// Writes several updates under a single lock acquisition, so readers see
    /// either none or all of them.
    pub fn apply<'a>(&self, updates: impl IntoIterator<Item = &'a RegisterUpdate>) {
        let mut registers = self.registers.lock();
        for update in updates {
            self.write_locked(&mut registers, update.address, &update.values);
        }
    }

    fn write_locked(&self, registers: &mut [u16], address: u16, values: &[u16]) {
        for (i, value) in values.iter().enumerate() {
            if let Some(slot) = self
                .index(address, i)
                .and_then(|idx| registers.get_mut(idx))
            {
                *slot = *value;
            }
        }
    }

    /// Copies the whole image.
    pub fn snapshot(&self) -> Vec<u16> {
        self.registers.lock().clone()
    }
}
