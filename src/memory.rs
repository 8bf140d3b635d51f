use std::collections::BTreeMap;

/// Read access to physical memory: firmware volumes and the pre-UEFI event
/// buffer are located by address.
pub trait PhysicalMemory {
    /// Bytes `[address, address + length)`, if fully backed.
    fn read(&self, address: u64, length: u64) -> Option<&[u8]>;
}

/// Sparse memory made of non-overlapping regions.
#[derive(Debug, Default, Clone)]
pub struct MemoryImage {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `bytes` at `base`, replacing any region starting there.
    pub fn map(&mut self, base: u64, bytes: Vec<u8>) {
        self.regions.insert(base, bytes);
    }
}

impl PhysicalMemory for MemoryImage {
    fn read(&self, address: u64, length: u64) -> Option<&[u8]> {
        let (base, bytes) = self.regions.range(..=address).next_back()?;
        let offset = usize::try_from(address - base).ok()?;
        let end = offset.checked_add(usize::try_from(length).ok()?)?;
        bytes.get(offset..end)
    }
}
