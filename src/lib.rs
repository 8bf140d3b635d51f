//! Measured boot for the PEI phase of a TPM 2.0 platform.
//!
//! [`Tcg2Pei`] reconciles the platform hash policy with the TPM's PCR banks,
//! imports the event buffer of the pre-UEFI boot stage, measures the boot
//! firmware and every firmware volume announced afterwards, and keeps the
//! resulting event log in hand-off blocks. [`Eventlog`] and [`BiosEventlog`]
//! read those logs back and replay them into PCR values.

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use core::fmt;
use enums::{algorithm_name, event_type_name, EV_NO_ACTION};
use std::collections::HashMap;
use std::convert::TryFrom;

pub mod algorithm;
mod bios_eventlog;
pub mod config;
pub mod digest_list;
pub mod engine;
pub mod enums;
pub mod error;
pub mod event;
pub mod fv;
pub mod hob;
pub mod ledger;
pub mod memory;
pub mod parser;
pub mod pipeline;
pub mod policy;
pub mod pre_uefi;
pub mod read;
pub mod sim;
pub mod tpm;

pub use algorithm::{DigestProvider, HashAlgorithm, HashMask, SoftwareDigest};
pub use bios_eventlog::{BiosEventlog, BiosEventlogEntry};
pub use config::{PlatformTpm2Config, Tcg2Config};
pub use digest_list::DigestList;
pub use engine::{DigestEngine, HashMode};
pub use error::{MeasureError, MeasureResult, PolicyError, TpmError};
pub use event::{EventLogFormat, PcrEventHeader};
pub use fv::{FirmwareBlob, FvInfo};
pub use hob::{EventLogStore, Guid};
pub use ledger::{FvPolicySources, MeasurementLedger, MigratedFvInfo, PrehashedFv};
pub use memory::{MemoryImage, PhysicalMemory};
pub use pipeline::{BootOutcome, FvFailure, MeasurementContext, Tcg2Pei};
pub use policy::ReconcileOutcome;
pub use tpm::{Platform, Tpm2Device};

/// Log in the crypto agile (TCG 2.0) format.
#[derive(Clone)]
pub struct Eventlog {
    pub log: Vec<EventlogEntry>,
}

impl fmt::Display for Eventlog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for event_entry in &self.log {
            write!(
                f,
                "\nEvent Entry:\n\tPCR: {}\n\tEvent Type id: 0x{:08X}\n\tEvent Type: {}\n",
                event_entry.target_measurement_registry,
                event_entry.event_type_id,
                event_entry.event_type,
            )?;
            for digest in &event_entry.digests {
                write!(
                    f,
                    "\tDigest Algorithm: {}\n\tDigest: {}\n",
                    digest.algorithm,
                    hex::encode(&digest.digest)
                )?;
            }
            writeln!(
                f,
                "\tEvent Desc: {}",
                parser::describe(&event_entry.event_type, &event_entry.event_desc)
            )?;
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct EventlogEntry {
    pub target_measurement_registry: u32,
    pub event_type_id: u32,
    pub event_type: String,
    pub digests: Vec<ElDigest>,
    pub event_desc: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ElDigest {
    pub algorithm_id: u16,
    pub algorithm: String,
    pub digest: Vec<u8>,
}

impl Eventlog {
    /// Replay measurement registers with event logs.
    ///
    /// The result maps a PCR index to the value obtained by extending, from
    /// zero, every digest of `hash_algorithm` logged for it. Events without a
    /// digest for that algorithm are skipped.
    pub fn replay_measurement_registry(
        &self,
        hash_algorithm: HashAlgorithm,
    ) -> HashMap<u32, Vec<u8>> {
        let mut result: HashMap<u32, Vec<u8>> = HashMap::new();
        for log_entry in &self.log {
            let digest = match log_entry
                .digests
                .iter()
                .find(|digest| digest.algorithm_id == hash_algorithm.tpm_alg_id())
            {
                Some(digest) => digest,
                None => continue,
            };

            let value = result
                .entry(log_entry.target_measurement_registry)
                .or_insert_with(|| vec![0; hash_algorithm.digest_length()]);
            *value = hash_algorithm.hash([value.as_slice(), digest.digest.as_slice()].into_iter());
        }

        result
    }
}

/// Next `length` bytes of `data` from `index`, advancing `index`.
pub(crate) fn take<'a>(data: &'a [u8], index: &mut usize, length: usize) -> Result<&'a [u8]> {
    let end = index
        .checked_add(length)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| anyhow!("event log truncated at offset {:#x}", index))?;
    let slice = &data[*index..end];
    *index = end;
    Ok(slice)
}

impl TryFrom<Vec<u8>> for Eventlog {
    type Error = anyhow::Error;

    /// Parse a sequence of TCG_PCR_EVENT2 records, optionally preceded by
    /// the TCG 1.2 formatted spec id event of a complete TCG 2.0 log.
    fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
        let mut index = 0;
        let mut event_log: Vec<EventlogEntry> = Vec::new();
        let mut digest_size_map: HashMap<u16, u16> = HashMap::new();

        while index < data.len() {
            let remaining = &data[index..];
            if remaining.iter().all(|&byte| byte == 0) || remaining.iter().all(|&byte| byte == 0xFF) {
                break;
            }

            let target_measurement_registry =
                take(&data, &mut index, 4)?.read_u32::<LittleEndian>()?;
            let event_type_id = take(&data, &mut index, 4)?.read_u32::<LittleEndian>()?;
            let event_type = event_type_name(event_type_id);

            if event_type_id == EV_NO_ACTION && event_log.is_empty() && digest_size_map.is_empty() {
                // SHA-1 digest, event size, signature, platform class,
                // versions and uintn size.
                take(&data, &mut index, 48)?;
                let algo_number = take(&data, &mut index, 4)?.read_u32::<LittleEndian>()?;
                for _ in 0..algo_number {
                    let algorithm_id = take(&data, &mut index, 2)?.read_u16::<LittleEndian>()?;
                    let digest_size = take(&data, &mut index, 2)?.read_u16::<LittleEndian>()?;
                    digest_size_map.insert(algorithm_id, digest_size);
                }
                let vendor_size = take(&data, &mut index, 1)?[0];
                take(&data, &mut index, vendor_size as usize)?;
                continue;
            }

            let digest_count = take(&data, &mut index, 4)?.read_u32::<LittleEndian>()?;
            let mut digests: Vec<ElDigest> = Vec::new();
            for _ in 0..digest_count {
                let algorithm_id = take(&data, &mut index, 2)?.read_u16::<LittleEndian>()?;
                let digest_size = match digest_size_map.get(&algorithm_id) {
                    Some(size) => *size as usize,
                    None => HashAlgorithm::from_tpm_alg_id(algorithm_id)
                        .map(|algorithm| algorithm.digest_length())
                        .ok_or(anyhow!(
                            "Internal Error: get digest size failed when parse eventlog entry, digest_algo_num: {:?}",
                            &algorithm_id
                        ))?,
                };
                let digest = take(&data, &mut index, digest_size)?.to_vec();
                digests.push(ElDigest {
                    algorithm_id,
                    algorithm: algorithm_name(algorithm_id),
                    digest,
                });
            }

            let event_desc_size = take(&data, &mut index, 4)?.read_u32::<LittleEndian>()? as usize;
            let event_desc = take(&data, &mut index, event_desc_size)?.to_vec();

            event_log.push(EventlogEntry {
                target_measurement_registry,
                event_type_id,
                event_type,
                digests,
                event_desc,
            })
        }

        Ok(Eventlog { log: event_log })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::EV_POST_CODE;
    use crate::event::EventLogRecord;
    use byteorder::WriteBytesExt;

    fn agile_record(pcr_index: u32, payload: &[u8]) -> Vec<u8> {
        let mut digests = DigestList::new();
        digests.insert(HashAlgorithm::Sha256, HashAlgorithm::Sha256.hash([payload].into_iter()));
        digests.insert(HashAlgorithm::Sha384, HashAlgorithm::Sha384.hash([payload].into_iter()));
        let header = PcrEventHeader::new(pcr_index, EV_POST_CODE, payload);
        EventLogRecord::agile(&header, digests, payload).encode()
    }

    fn spec_id_event() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"Spec ID Event03\0");
        body.write_u32::<LittleEndian>(0).unwrap();
        body.extend_from_slice(&[0, 2, 0, 2]);
        body.write_u32::<LittleEndian>(2).unwrap();
        for (algorithm_id, size) in [(0x000Bu16, 32u16), (0x000C, 48)] {
            body.write_u16::<LittleEndian>(algorithm_id).unwrap();
            body.write_u16::<LittleEndian>(size).unwrap();
        }
        body.push(0);

        let mut event = Vec::new();
        event.write_u32::<LittleEndian>(0).unwrap();
        event.write_u32::<LittleEndian>(EV_NO_ACTION).unwrap();
        event.extend_from_slice(&[0u8; 20]);
        event.write_u32::<LittleEndian>(body.len() as u32).unwrap();
        event.extend_from_slice(&body);
        event
    }

    #[test]
    fn test_parse_log_with_spec_id_header() {
        let mut data = spec_id_event();
        data.extend(agile_record(0, b"first"));
        data.extend(agile_record(2, b"second"));
        data.extend([0xFFu8; 8]);

        let log = Eventlog::try_from(data).unwrap();
        assert_eq!(log.log.len(), 2);
        assert_eq!(log.log[1].target_measurement_registry, 2);
        assert_eq!(log.log[1].digests[1].algorithm, "TPM_ALG_SHA384");
        assert_eq!(log.log[1].event_desc, b"second");
    }

    #[test]
    fn test_replay_per_algorithm() {
        let mut data = agile_record(0, b"a");
        data.extend(agile_record(0, b"b"));
        let log = Eventlog::try_from(data).unwrap();

        let pcrs = log.replay_measurement_registry(HashAlgorithm::Sha384);
        let a = HashAlgorithm::Sha384.hash([&b"a"[..]].into_iter());
        let b = HashAlgorithm::Sha384.hash([&b"b"[..]].into_iter());
        let expected = HashAlgorithm::Sha384.hash([&[0u8; 48][..], a.as_slice()].into_iter());
        let expected = HashAlgorithm::Sha384.hash([expected.as_slice(), b.as_slice()].into_iter());
        assert_eq!(pcrs[&0], expected);

        assert!(log.replay_measurement_registry(HashAlgorithm::Sha1).is_empty());
    }

    #[test]
    fn test_truncated_log_is_an_error() {
        let mut data = agile_record(0, b"payload");
        data.truncate(data.len() - 3);
        assert!(Eventlog::try_from(data).is_err());

        // Unknown algorithm without a spec id header.
        let mut data = agile_record(0, b"x");
        data[12] = 0x77;
        assert!(Eventlog::try_from(data).is_err());
    }

    #[test]
    fn test_display_uses_parsers() {
        let log = Eventlog::try_from(agile_record(0, b"BL31\0")).unwrap();
        let text = log.to_string();
        assert!(text.contains("EV_POST_CODE"));
        assert!(text.contains("Event Desc: BL31"));
        assert!(text.contains("TPM_ALG_SHA256"));
    }
}
