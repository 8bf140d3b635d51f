//! GUIDed hand-off blocks: the append-only store that carries event records
//! and markers to the next boot phase.

use byteorder::{ByteOrder, LittleEndian};
use core::fmt;

use crate::error::{MeasureError, MeasureResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Guid {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Read a GUID in its EFI in-memory layout.
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(&bytes[8..16]);
        Guid {
            data1: LittleEndian::read_u32(&bytes[0..4]),
            data2: LittleEndian::read_u16(&bytes[4..6]),
            data3: LittleEndian::read_u16(&bytes[6..8]),
            data4,
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        LittleEndian::write_u32(&mut bytes[0..4], self.data1);
        LittleEndian::write_u16(&mut bytes[4..6], self.data2);
        LittleEndian::write_u16(&mut bytes[6..8], self.data3);
        bytes[8..16].copy_from_slice(&self.data4);
        bytes
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            hex::encode(&self.data4[2..])
        )
    }
}

/// TCG_PCR_EVENT records (TCG 1.2 format).
pub const TCG_EVENT_ENTRY_HOB_GUID: Guid = Guid::new(
    0x2b9ffb52,
    0x1b13,
    0x416f,
    [0xa8, 0x7b, 0xbc, 0x93, 0x0d, 0xef, 0x92, 0xa8],
);

/// TCG_PCR_EVENT2 records (crypto-agile format).
pub const TCG_EVENT2_ENTRY_HOB_GUID: Guid = Guid::new(
    0xd26c221e,
    0x2430,
    0x4c8a,
    [0x91, 0x70, 0x3f, 0xcb, 0x45, 0x00, 0x41, 0x3f],
);

/// Zero-sized marker: TPM measurement is unavailable for this boot.
pub const TPM_ERROR_HOB_GUID: Guid = Guid::new(
    0xef598499,
    0xb25e,
    0x473a,
    [0xbf, 0xaf, 0xe7, 0xe5, 0x7d, 0xce, 0x82, 0xc4],
);

/// Every firmware volume measured or recorded during the phase.
pub const MEASURED_FV_HOB_GUID: Guid = Guid::new(
    0xb2360b42,
    0x7173,
    0x420a,
    [0x86, 0x96, 0x46, 0xca, 0x6b, 0xab, 0x10, 0x60],
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidHob {
    pub name: Guid,
    pub data: Vec<u8>,
}

/// Header bytes each GUIDed HOB occupies besides its data.
const GUID_HOB_HEADER_SIZE: usize = 8 + 16;

/// Append-only HOB list. An optional byte budget models the bounded
/// permanent memory available to the phase.
#[derive(Debug, Default, Clone)]
pub struct EventLogStore {
    hobs: Vec<GuidHob>,
    used: usize,
    limit: Option<usize>,
    tpm_failed: bool,
}

impl EventLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        EventLogStore {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Append a GUIDed HOB. Fails without side effects when the budget is
    /// exhausted.
    pub fn build_guid_hob(&mut self, name: Guid, data: Vec<u8>) -> MeasureResult<()> {
        let size = GUID_HOB_HEADER_SIZE + data.len();
        if let Some(limit) = self.limit {
            if self.used + size > limit {
                return Err(MeasureError::OutOfMemory);
            }
        }
        self.hobs.try_reserve(1)?;
        self.used += size;
        self.hobs.push(GuidHob { name, data });
        Ok(())
    }

    pub fn first_guid_hob(&self, name: Guid) -> Option<&GuidHob> {
        self.hobs.iter().find(|hob| hob.name == name)
    }

    pub fn guid_hobs(&self, name: Guid) -> impl Iterator<Item = &GuidHob> {
        self.hobs.iter().filter(move |hob| hob.name == name)
    }

    pub fn hobs(&self) -> &[GuidHob] {
        &self.hobs
    }

    /// TPM measurement has failed for this boot. Sticky.
    pub fn tpm_failed(&self) -> bool {
        self.tpm_failed
    }

    /// Set the sticky failure flag and publish the error HOB once. The flag
    /// holds even when the budget has no room left for the HOB.
    pub fn mark_tpm_failed(&mut self) {
        if self.tpm_failed {
            return;
        }
        self.tpm_failed = true;
        if self.build_guid_hob(TPM_ERROR_HOB_GUID, Vec::new()).is_err() {
            log::error!("no room left for the TPM error HOB");
        }
    }

    /// Data of every HOB named `name`, concatenated in creation order. This
    /// is how the next phase assembles its event log.
    pub fn concatenated(&self, name: Guid) -> Vec<u8> {
        self.guid_hobs(name)
            .flat_map(|hob| hob.data.iter().copied())
            .collect()
    }
}
