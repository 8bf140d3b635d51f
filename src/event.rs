//! Event records as they are stored in the hand-off blocks.

use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};

use crate::algorithm::HashAlgorithm;
use crate::digest_list::DigestList;
use crate::hob::{Guid, TCG_EVENT2_ENTRY_HOB_GUID, TCG_EVENT_ENTRY_HOB_GUID};

pub const SHA1_DIGEST_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrEventHeader {
    pub pcr_index: u32,
    pub event_type: u32,
    pub event_size: u32,
}

impl PcrEventHeader {
    pub fn new(pcr_index: u32, event_type: u32, payload: &[u8]) -> Self {
        PcrEventHeader {
            pcr_index,
            event_type,
            event_size: payload.len() as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// TCG_PCR_EVENT, SHA-1 only.
    Tcg12,
    /// TCG_PCR_EVENT2, one digest per active bank.
    Tcg2,
}

bitflags! {
    /// EFI_TCG2_EVENT_LOG_FORMAT bits: the log formats produced for every
    /// event, fixed at start-up.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct EventLogFormat: u32 {
        const TCG_1_2 = 0x0000_0001;
        const TCG_2 = 0x0000_0002;
    }
}

impl EventLogFormat {
    /// Enabled formats, legacy first.
    pub fn formats(&self) -> impl Iterator<Item = LogFormat> {
        let enabled = *self;
        [
            (EventLogFormat::TCG_1_2, LogFormat::Tcg12),
            (EventLogFormat::TCG_2, LogFormat::Tcg2),
        ]
        .into_iter()
        .filter(move |(bit, _)| enabled.contains(*bit))
        .map(|(_, format)| format)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventLogRecord {
    Legacy {
        pcr_index: u32,
        event_type: u32,
        digest: [u8; SHA1_DIGEST_SIZE],
        payload: Vec<u8>,
    },
    Agile {
        pcr_index: u32,
        event_type: u32,
        digests: DigestList,
        payload: Vec<u8>,
    },
}

impl EventLogRecord {
    /// Legacy record for `digests`, or `None` when it has no SHA-1 entry.
    pub fn legacy(header: &PcrEventHeader, digests: &DigestList, payload: &[u8]) -> Option<Self> {
        let sha1 = digests.get(HashAlgorithm::Sha1)?;
        let mut digest = [0u8; SHA1_DIGEST_SIZE];
        let copy = sha1.len().min(SHA1_DIGEST_SIZE);
        digest[..copy].copy_from_slice(&sha1[..copy]);
        Some(EventLogRecord::Legacy {
            pcr_index: header.pcr_index,
            event_type: header.event_type,
            digest,
            payload: payload.to_vec(),
        })
    }

    pub fn agile(header: &PcrEventHeader, digests: DigestList, payload: &[u8]) -> Self {
        EventLogRecord::Agile {
            pcr_index: header.pcr_index,
            event_type: header.event_type,
            digests,
            payload: payload.to_vec(),
        }
    }

    /// HOB the record is stored under.
    pub fn hob_guid(&self) -> Guid {
        match self {
            EventLogRecord::Legacy { .. } => TCG_EVENT_ENTRY_HOB_GUID,
            EventLogRecord::Agile { .. } => TCG_EVENT2_ENTRY_HOB_GUID,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        // Writes into a Vec cannot fail.
        match self {
            EventLogRecord::Legacy {
                pcr_index,
                event_type,
                digest,
                payload,
            } => {
                let _ = buffer.write_u32::<LittleEndian>(*pcr_index);
                let _ = buffer.write_u32::<LittleEndian>(*event_type);
                buffer.extend_from_slice(digest);
                let _ = buffer.write_u32::<LittleEndian>(payload.len() as u32);
                buffer.extend_from_slice(payload);
            }
            EventLogRecord::Agile {
                pcr_index,
                event_type,
                digests,
                payload,
            } => {
                let _ = buffer.write_u32::<LittleEndian>(*pcr_index);
                let _ = buffer.write_u32::<LittleEndian>(*event_type);
                digests.write_to(&mut buffer);
                let _ = buffer.write_u32::<LittleEndian>(payload.len() as u32);
                buffer.extend_from_slice(payload);
            }
        }
        buffer
    }
}
