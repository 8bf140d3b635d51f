//! Bookkeeping of measured firmware volumes.
//!
//! Every volume reaching the measurement path is checked against the
//! platform's exclusion list and the volumes measured so far before anything
//! is hashed, so a volume reported several times is extended exactly once.

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, error, info};

use crate::algorithm::{HashAlgorithm, HashMask};
use crate::digest_list::DigestList;
use crate::engine::{DigestEngine, HashMode};
use crate::enums::{EV_EFI_PLATFORM_FIRMWARE_BLOB, EV_EFI_PLATFORM_FIRMWARE_BLOB2};
use crate::error::{MeasureError, MeasureResult};
use crate::event::PcrEventHeader;
use crate::fv::{
    encode_firmware_blob2, get_fv_name, FirmwareBlob,
    TCG_EFI_SPEC_ID_EVENT_STRUCT_SPEC_ERRATA_TPM2_REV_105,
};
use crate::memory::PhysicalMemory;

/// Number of firmware blobs to grow by each time a list runs out of room.
pub const FIRMWARE_BLOB_GROWTH_STEP: usize = 4;

/// A volume whose digests were computed ahead of time by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrehashedFv {
    pub base: u64,
    pub length: u64,
    /// `(TPM algorithm id, digest)` pairs, in the order supplied.
    pub hashes: Vec<(u16, Vec<u8>)>,
}

impl PrehashedFv {
    /// Entry from the digest list published by the platform, in compact
    /// TPML_DIGEST_VALUES form.
    pub fn from_digest_values(base: u64, length: u64, digest_values: &[u8]) -> anyhow::Result<Self> {
        let (digests, _) = DigestList::decode(digest_values)?;
        Ok(PrehashedFv {
            base,
            length,
            hashes: digests
                .iter()
                .map(|(algorithm, digest)| (algorithm.tpm_alg_id(), digest.to_vec()))
                .collect(),
        })
    }
}

/// A volume copied to a new location after it was first reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigratedFvInfo {
    /// Address the volume was originally published at; this is what is
    /// logged.
    pub org_base: u64,
    /// Address the volume is reported at now.
    pub new_base: u64,
    /// Address of the bytes to hash.
    pub data_base: u64,
    pub length: u64,
}

/// Platform supplied lists consulted before a volume is measured.
#[derive(Debug, Clone, Default)]
pub struct FvPolicySources {
    pub excluded: Vec<FirmwareBlob>,
    pub prehashed: Vec<PrehashedFv>,
    pub migrated: Vec<MigratedFvInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct MeasurementLedger {
    sources: FvPolicySources,
    pfp_measurement_revision: u32,
    base_fvs: Vec<FirmwareBlob>,
    child_fvs: Vec<FirmwareBlob>,
}

impl MeasurementLedger {
    pub fn new(sources: FvPolicySources, pfp_measurement_revision: u32) -> Self {
        MeasurementLedger {
            sources,
            pfp_measurement_revision,
            base_fvs: Vec::new(),
            child_fvs: Vec::new(),
        }
    }

    pub fn base_fvs(&self) -> &[FirmwareBlob] {
        &self.base_fvs
    }

    pub fn child_fvs(&self) -> &[FirmwareBlob] {
        &self.child_fvs
    }

    pub fn base_capacity(&self) -> usize {
        self.base_fvs.capacity()
    }

    /// Measure a firmware volume and add it to the measured list.
    ///
    /// Excluded and already measured volumes succeed without touching the
    /// TPM. Once the TPM has failed nothing else is read or hashed. Room in
    /// the measured list is reserved before the extend, so a volume that
    /// was extended is always recorded.
    pub fn measure_fv(
        &mut self,
        engine: &mut DigestEngine<'_>,
        memory: &dyn PhysicalMemory,
        fv_base: u64,
        fv_length: u64,
    ) -> MeasureResult<()> {
        let blob = FirmwareBlob::new(fv_base, fv_length);

        if self.sources.excluded.contains(&blob) {
            info!(
                "The FV which is excluded by Tcg2Pei starts at: {:#x}, size: {:#x}",
                fv_base, fv_length
            );
            return Ok(());
        }

        if self.base_fvs.contains(&blob) {
            info!(
                "The FV which is already measured by Tcg2Pei starts at: {:#x}, size: {:#x}",
                fv_base, fv_length
            );
            return Ok(());
        }

        if engine.store.tpm_failed() {
            return Err(MeasureError::DeviceError);
        }

        reserve_slot(&mut self.base_fvs)?;

        let prehashed = self.prehashed_digests(&blob, engine.active);

        let (org_base, data_base) = self.resolve_migration(&blob);

        let (event_type, event_data) =
            if self.pfp_measurement_revision >= TCG_EFI_SPEC_ID_EVENT_STRUCT_SPEC_ERRATA_TPM2_REV_105 {
                let name = get_fv_name(memory, fv_base, fv_length);
                (
                    EV_EFI_PLATFORM_FIRMWARE_BLOB2,
                    encode_firmware_blob2(name, &FirmwareBlob::new(org_base, fv_length)),
                )
            } else {
                (
                    EV_EFI_PLATFORM_FIRMWARE_BLOB,
                    FirmwareBlob::new(org_base, fv_length).encode(),
                )
            };
        let header = PcrEventHeader::new(0, event_type, &event_data);

        let status = match prehashed {
            Some(digests) => {
                let status = engine.hash_log_extend(
                    HashMode::PrehashedDigestList(&digests),
                    &header,
                    &event_data,
                );
                info!(
                    "The pre-hashed FV which is extended & logged by Tcg2Pei starts at: {:#x}, size: {:#x}",
                    fv_base, fv_length
                );
                status
            }
            None => {
                let data = memory
                    .read(data_base, fv_length)
                    .ok_or(MeasureError::MemoryUnavailable {
                        address: data_base,
                        length: fv_length,
                    })?;
                let status = engine.hash_log_extend(HashMode::RawData(data), &header, &event_data);
                info!(
                    "The FV which is measured by Tcg2Pei starts at: {:#x}, size: {:#x}",
                    fv_base, fv_length
                );
                status
            }
        };

        if let Err(e) = status {
            error!("The FV which failed to be measured starts at: {:#x}: {}", fv_base, e);
            return Err(e);
        }

        self.base_fvs.push(blob);
        Ok(())
    }

    /// Remember a volume found inside an already measured parent. Returns
    /// whether it was new. A volume already in either list is not added
    /// again, so the snapshot never names a volume twice.
    pub fn record_child_fv(&mut self, fv_base: u64, fv_length: u64) -> MeasureResult<bool> {
        let blob = FirmwareBlob::new(fv_base, fv_length);
        if self.child_fvs.contains(&blob) || self.base_fvs.contains(&blob) {
            return Ok(false);
        }
        debug!("recording child FV {:#x}+{:#x}", fv_base, fv_length);
        reserve_slot(&mut self.child_fvs)?;
        self.child_fvs.push(blob);
        Ok(true)
    }

    /// Payload of the measured FV HOB: `count: u32`, padding to 8 bytes,
    /// then every base FV followed by every child FV.
    pub fn snapshot(&self) -> Vec<u8> {
        let count = self.base_fvs.len() + self.child_fvs.len();
        let mut buffer = Vec::with_capacity(8 + count * 16);
        let _ = buffer.write_u32::<LittleEndian>(count as u32);
        let _ = buffer.write_u32::<LittleEndian>(0);
        for blob in self.base_fvs.iter().chain(self.child_fvs.iter()) {
            buffer.extend_from_slice(&blob.encode());
        }
        buffer
    }

    /// Digests from the pre-hashed list, usable only when they cover every
    /// active algorithm. Only active algorithms are kept.
    fn prehashed_digests(&self, blob: &FirmwareBlob, active: HashMask) -> Option<DigestList> {
        let prehashed = self
            .sources
            .prehashed
            .iter()
            .find(|fv| fv.base == blob.base && fv.length == blob.length)?;

        let mut remaining = active;
        let mut digests = DigestList::new();
        for (algorithm_id, digest) in &prehashed.hashes {
            debug!("Hash Algo ID in PrehashedFv={:#x}", algorithm_id);
            let algorithm = match HashAlgorithm::from_tpm_alg_id(*algorithm_id) {
                Some(algorithm) => algorithm,
                None => continue,
            };
            if remaining.contains(algorithm.mask()) {
                digests.insert(algorithm, digest.clone());
                remaining = remaining.difference(algorithm.mask());
            }
        }

        if remaining.is_empty() {
            Some(digests)
        } else {
            debug!("pre-hashed FV misses algorithms {}, hashing instead", remaining);
            None
        }
    }

    /// Logged (original) and hashed (data) base of a volume.
    fn resolve_migration(&self, blob: &FirmwareBlob) -> (u64, u64) {
        self.sources
            .migrated
            .iter()
            .find(|info| info.new_base == blob.base && info.length == blob.length)
            .map(|info| (info.org_base, info.data_base))
            .unwrap_or((blob.base, blob.base))
    }
}

/// Make room for one more entry. Capacity grows by the fixed step only when
/// the list is full.
fn reserve_slot(list: &mut Vec<FirmwareBlob>) -> MeasureResult<()> {
    if list.len() == list.capacity() {
        list.try_reserve_exact(FIRMWARE_BLOB_GROWTH_STEP)?;
    }
    Ok(())
}
