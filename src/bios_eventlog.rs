// TCG Eventlog for Conventional BIOS
// Spec: https://trustedcomputinggroup.org/wp-content/uploads/TCG_PCClientImplementation_1-21_1_00.pdf

use crate::algorithm::HashAlgorithm;
use crate::enums::event_type_name;
use crate::event::SHA1_DIGEST_SIZE;
use crate::parser::describe;
use crate::take;
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use core::fmt;
use std::collections::HashMap;
use std::convert::TryFrom;

/// Log in the TCG 1.2 format: one SHA-1 digest per event.
#[derive(Clone)]
pub struct BiosEventlog {
    pub log: Vec<BiosEventlogEntry>,
}

impl fmt::Display for BiosEventlog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for event_entry in &self.log {
            write!(
                f,
                "\nEvent Entry:\n\tPCR: {}\n\tEvent Type: {}\n\tDigest: {}\n\tEvent Data: {}\n",
                event_entry.pcr_index,
                event_entry.event_type,
                hex::encode(&event_entry.digest),
                describe(&event_entry.event_type, &event_entry.event_data),
            )?;
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct BiosEventlogEntry {
    pub pcr_index: u32,
    pub event_type_id: u32,
    pub event_type: String,
    pub digest: Vec<u8>,
    pub event_data: Vec<u8>,
}

impl BiosEventlog {
    /// SHA-1 PCR values obtained by extending every logged digest, keyed by
    /// PCR index.
    pub fn replay_measurement_registry(&self) -> HashMap<u32, Vec<u8>> {
        let mut result: HashMap<u32, Vec<u8>> = HashMap::new();
        for log_entry in &self.log {
            let value = result
                .entry(log_entry.pcr_index)
                .or_insert_with(|| vec![0; SHA1_DIGEST_SIZE]);
            *value = HashAlgorithm::Sha1
                .hash([value.as_slice(), log_entry.digest.as_slice()].into_iter());
        }

        result
    }
}

impl TryFrom<Vec<u8>> for BiosEventlog {
    type Error = anyhow::Error;

    fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
        let mut index = 0;
        let mut event_log: Vec<BiosEventlogEntry> = Vec::new();

        while index < data.len() {
            // Trailing space of a fixed size log region.
            if data[index..].iter().all(|&byte| byte == 0) {
                break;
            }

            let pcr_index = take(&data, &mut index, 4)?.read_u32::<LittleEndian>()?;
            let event_type_id = take(&data, &mut index, 4)?.read_u32::<LittleEndian>()?;
            let event_type = event_type_name(event_type_id);

            let digest = take(&data, &mut index, SHA1_DIGEST_SIZE)?.to_vec();

            let event_data_size = take(&data, &mut index, 4)?.read_u32::<LittleEndian>()? as usize;
            let event_data = take(&data, &mut index, event_data_size)?.to_vec();

            event_log.push(BiosEventlogEntry {
                pcr_index,
                event_type_id,
                event_type,
                digest,
                event_data,
            })
        }

        Ok(BiosEventlog { log: event_log })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest_list::DigestList;
    use crate::enums::EV_POST_CODE;
    use crate::event::{EventLogRecord, PcrEventHeader};

    fn record(pcr_index: u32, fill: u8, payload: &[u8]) -> Vec<u8> {
        let mut digests = DigestList::new();
        digests.insert(HashAlgorithm::Sha1, vec![fill; SHA1_DIGEST_SIZE]);
        let header = PcrEventHeader::new(pcr_index, EV_POST_CODE, payload);
        EventLogRecord::legacy(&header, &digests, payload)
            .unwrap()
            .encode()
    }

    #[test]
    fn test_parse_and_replay() {
        let mut data = record(0, 0x11, b"BL1\0");
        data.extend(record(1, 0x22, b"BL2\0"));
        data.extend(record(0, 0x33, b"BL31\0"));
        data.extend([0u8; 16]);

        let log = BiosEventlog::try_from(data).unwrap();
        assert_eq!(log.log.len(), 3);
        assert_eq!(log.log[1].event_type, "EV_POST_CODE");
        assert_eq!(log.log[2].event_data, b"BL31\0");

        let pcrs = log.replay_measurement_registry();
        let pcr0 = HashAlgorithm::Sha1.hash([&[0u8; 20][..], &[0x11; 20][..]].into_iter());
        let pcr0 = HashAlgorithm::Sha1.hash([pcr0.as_slice(), &[0x33; 20][..]].into_iter());
        assert_eq!(pcrs[&0], pcr0);
        assert_eq!(pcrs.len(), 2);
        assert!(log.to_string().contains("BL31"));
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let mut data = record(0, 0x11, b"BL1\0");
        data.truncate(data.len() - 2);
        assert!(BiosEventlog::try_from(data).is_err());
    }
}
