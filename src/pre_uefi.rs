//! Import of the event buffer left by the boot stage that ran before UEFI.
//!
//! The earlier stage records each firmware component it loaded as a fixed
//! size entry carrying a single digest. Its final event, "Post SCP TPM
//! Extend" (PSTE), has already been extended into the TPM for the virtual
//! PCR value, so the entries are logged in reverse order to keep the PCR
//! values computed from the event log equal to the TPM's.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error};

use crate::algorithm::HashAlgorithm;
use crate::digest_list::DigestList;
use crate::engine::{DigestEngine, HashMode};
use crate::enums::EV_POST_CODE;
use crate::error::{MeasureError, MeasureResult};
use crate::event::PcrEventHeader;

/// Inline event data capacity of one entry.
pub const PLATFORM_EVENT_BUFFER_SIZE_MAX: usize = 10;
/// Size of the digest union (largest of SHA-1 and SHA-256).
pub const PLATFORM_TPM_DIGEST_SIZE: usize = 32;
/// Stride of one entry: C layout, 4-byte aligned.
pub const PRE_UEFI_EVENT_SIZE: usize = 60;

pub const PLATFORM_ALGORITHM_SHA1: u8 = 0;
pub const PLATFORM_ALGORITHM_SHA256: u8 = 1;

/// Tag of the event the earlier stage already extended.
pub const PSTE_EVENT_TAG: &[u8] = b"PSTE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreUefiEvent {
    pub algorithm_id: u8,
    pub pcr_index: u32,
    pub event_type: u32,
    pub event_size: u32,
    pub digest: [u8; PLATFORM_TPM_DIGEST_SIZE],
    pub event: [u8; PLATFORM_EVENT_BUFFER_SIZE_MAX],
}

impl PreUefiEvent {
    /// Decode one entry:
    /// `alg u8 @0, pcr u32 @4, type u32 @8, size u32 @12, digest @16, event @48`.
    pub fn from_bytes(bytes: &[u8; PRE_UEFI_EVENT_SIZE]) -> Self {
        let mut digest = [0u8; PLATFORM_TPM_DIGEST_SIZE];
        digest.copy_from_slice(&bytes[16..48]);
        let mut event = [0u8; PLATFORM_EVENT_BUFFER_SIZE_MAX];
        event.copy_from_slice(&bytes[48..58]);
        PreUefiEvent {
            algorithm_id: bytes[0],
            pcr_index: LittleEndian::read_u32(&bytes[4..8]),
            event_type: LittleEndian::read_u32(&bytes[8..12]),
            event_size: LittleEndian::read_u32(&bytes[12..16]),
            digest,
            event,
        }
    }

    pub fn to_bytes(&self) -> [u8; PRE_UEFI_EVENT_SIZE] {
        let mut bytes = [0u8; PRE_UEFI_EVENT_SIZE];
        bytes[0] = self.algorithm_id;
        LittleEndian::write_u32(&mut bytes[4..8], self.pcr_index);
        LittleEndian::write_u32(&mut bytes[8..12], self.event_type);
        LittleEndian::write_u32(&mut bytes[12..16], self.event_size);
        bytes[16..48].copy_from_slice(&self.digest);
        bytes[48..58].copy_from_slice(&self.event);
        bytes
    }

    /// Event data as logged: `event_size` bytes of the inline buffer.
    pub fn payload(&self) -> &[u8] {
        let size = (self.event_size as usize).min(PLATFORM_EVENT_BUFFER_SIZE_MAX);
        &self.event[..size]
    }

    /// The inline data is the NUL-terminated tag "PSTE".
    pub fn is_post_scp_tpm_extend(&self) -> bool {
        match self.event.iter().position(|&b| b == 0) {
            Some(end) => &self.event[..end] == PSTE_EVENT_TAG,
            None => false,
        }
    }

    /// SHA-1 and SHA-256 digests for the event.
    ///
    /// Only one algorithm is recorded; the other one is synthesized by
    /// hashing the recorded digest bytes. This is not a digest of the
    /// original component, but it is what verifiers of these logs expect.
    pub fn digest_list(&self, index: usize) -> MeasureResult<DigestList> {
        let mut digests = DigestList::new();
        match self.algorithm_id {
            PLATFORM_ALGORITHM_SHA1 => {
                let sha1 = &self.digest[..HashAlgorithm::Sha1.digest_length()];
                digests.insert(HashAlgorithm::Sha1, sha1.to_vec());
                digests.insert(
                    HashAlgorithm::Sha256,
                    HashAlgorithm::Sha256.hash([sha1].into_iter()),
                );
            }
            PLATFORM_ALGORITHM_SHA256 => {
                let sha256 = &self.digest[..HashAlgorithm::Sha256.digest_length()];
                digests.insert(
                    HashAlgorithm::Sha1,
                    HashAlgorithm::Sha1.hash([sha256].into_iter()),
                );
                digests.insert(HashAlgorithm::Sha256, sha256.to_vec());
            }
            algorithm_id => {
                error!("The algorithm {} is not supported!", algorithm_id);
                return Err(MeasureError::MalformedPreUefiEvent {
                    index,
                    algorithm_id,
                });
            }
        }
        Ok(digests)
    }
}

/// Entries of `buffer` from last to first, with their storage index. The
/// walk is anchored at the end of the buffer.
pub fn events_in_reverse(buffer: &[u8]) -> impl Iterator<Item = (usize, PreUefiEvent)> + '_ {
    let count = buffer.len() / PRE_UEFI_EVENT_SIZE;
    let first = buffer.len() - count * PRE_UEFI_EVENT_SIZE;
    (0..count).rev().map(move |index| {
        let start = first + index * PRE_UEFI_EVENT_SIZE;
        let mut bytes = [0u8; PRE_UEFI_EVENT_SIZE];
        bytes.copy_from_slice(&buffer[start..start + PRE_UEFI_EVENT_SIZE]);
        (index, PreUefiEvent::from_bytes(&bytes))
    })
}

/// Replay the pre-UEFI firmware component events into the TPM and the log.
///
/// Only `EV_POST_CODE` entries are imported. The PSTE entry is logged
/// without extending; every other entry is extended and logged.
pub fn import_pre_uefi_events(engine: &mut DigestEngine<'_>, buffer: &[u8]) -> MeasureResult<()> {
    for (index, event) in events_in_reverse(buffer) {
        if event.event_type != EV_POST_CODE {
            continue;
        }

        let digests = event.digest_list(index)?;
        let payload = event.payload();
        let header = PcrEventHeader::new(event.pcr_index, event.event_type, payload);

        if event.is_post_scp_tpm_extend() {
            debug!("pre-UEFI event {} already extended, logging only", index);
            engine.hash_log_extend(HashMode::PrehashedLogOnly(&digests), &header, payload)?;
        } else {
            debug!("pre-UEFI event {} extending PCR{}", index, event.pcr_index);
            engine.hash_log_extend(HashMode::PrehashedDigestList(&digests), &header, payload)?;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::algorithm::HashMask;
    use crate::engine::tests::CountingDigest;
    use crate::event::EventLogFormat;
    use crate::hob::{EventLogStore, TCG_EVENT2_ENTRY_HOB_GUID};
    use crate::sim::{RecordingPlatform, SoftTpm, TpmCommand};
    use crate::tpm::EFI_PERIPHERAL_TPM;
    use crate::Eventlog;

    pub(crate) fn post_code(algorithm_id: u8, fill: u8, tag: &[u8]) -> PreUefiEvent {
        let mut event = [0u8; PLATFORM_EVENT_BUFFER_SIZE_MAX];
        event[..tag.len()].copy_from_slice(tag);
        PreUefiEvent {
            algorithm_id,
            pcr_index: 0,
            event_type: EV_POST_CODE,
            event_size: tag.len() as u32 + 1,
            digest: [fill; PLATFORM_TPM_DIGEST_SIZE],
            event,
        }
    }

    fn buffer(events: &[PreUefiEvent]) -> Vec<u8> {
        events.iter().flat_map(|event| event.to_bytes()).collect()
    }

    struct Harness {
        tpm: SoftTpm,
        hasher: CountingDigest,
        platform: RecordingPlatform,
        store: EventLogStore,
        formats: EventLogFormat,
    }

    impl Harness {
        fn new() -> Self {
            let both = HashMask::SHA1 | HashMask::SHA256;
            Harness {
                tpm: SoftTpm::new(both, both),
                hasher: CountingDigest::default(),
                platform: RecordingPlatform::default(),
                store: EventLogStore::new(),
                formats: EventLogFormat::all(),
            }
        }

        fn import(&mut self, buffer: &[u8]) -> MeasureResult<()> {
            let mut engine = DigestEngine {
                tpm: &mut self.tpm,
                hasher: &mut self.hasher,
                platform: &mut self.platform,
                store: &mut self.store,
                active: HashMask::SHA1 | HashMask::SHA256,
                formats: self.formats,
                status_code_subclass: EFI_PERIPHERAL_TPM,
            };
            import_pre_uefi_events(&mut engine, buffer)
        }
    }

    #[test]
    fn test_entry_layout() {
        let event = post_code(PLATFORM_ALGORITHM_SHA256, 0x42, b"BL2");
        let bytes = event.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(&bytes[48..51], b"BL2");
        assert_eq!(PreUefiEvent::from_bytes(&bytes), event);
        assert_eq!(event.payload(), b"BL2\0");
    }

    #[test]
    fn test_events_replayed_in_reverse_order() {
        let events = [
            post_code(PLATFORM_ALGORITHM_SHA256, 0x10, b"BL1"),
            post_code(PLATFORM_ALGORITHM_SHA256, 0x20, b"BL2"),
            post_code(PLATFORM_ALGORITHM_SHA256, 0x30, b"BL31"),
        ];
        let mut harness = Harness::new();
        harness.import(&buffer(&events)).unwrap();

        let order: Vec<u8> = harness
            .tpm
            .commands
            .iter()
            .filter_map(|command| match command {
                TpmCommand::PcrExtend { digests, .. } => {
                    digests.get(HashAlgorithm::Sha256).map(|digest| digest[0])
                }
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![0x30, 0x20, 0x10]);
    }

    #[test]
    fn test_complement_hashes_recorded_digest() {
        let event = post_code(PLATFORM_ALGORITHM_SHA1, 0xAB, b"BL1");
        let digests = event.digest_list(0).unwrap();
        let order: Vec<_> = digests.iter().map(|(alg, _)| alg).collect();
        assert_eq!(order, vec![HashAlgorithm::Sha1, HashAlgorithm::Sha256]);
        assert_eq!(digests.get(HashAlgorithm::Sha1), Some(&[0xAB; 20][..]));
        assert_eq!(
            digests.get(HashAlgorithm::Sha256).unwrap(),
            HashAlgorithm::Sha256.hash([&[0xAB; 20][..]].into_iter()).as_slice()
        );

        let event = post_code(PLATFORM_ALGORITHM_SHA256, 0xCD, b"BL1");
        let digests = event.digest_list(0).unwrap();
        assert_eq!(
            digests.get(HashAlgorithm::Sha1).unwrap(),
            HashAlgorithm::Sha1.hash([&[0xCD; 32][..]].into_iter()).as_slice()
        );
    }

    #[test]
    fn test_pste_is_logged_without_extend() {
        let events = [
            post_code(PLATFORM_ALGORITHM_SHA256, 0x10, b"BL1"),
            post_code(PLATFORM_ALGORITHM_SHA256, 0x20, PSTE_EVENT_TAG),
        ];
        let mut harness = Harness::new();
        harness.import(&buffer(&events)).unwrap();

        assert_eq!(harness.tpm.extend_count(), 1);
        let log =
            Eventlog::try_from(harness.store.concatenated(TCG_EVENT2_ENTRY_HOB_GUID)).unwrap();
        assert_eq!(log.log.len(), 2);
        assert_eq!(log.log[0].event_desc, b"PSTE\0");
        assert_eq!(log.log[1].event_desc, b"BL1\0");
    }

    #[test]
    fn test_non_post_code_entries_are_skipped() {
        let mut other = post_code(PLATFORM_ALGORITHM_SHA1, 0x10, b"CFG");
        other.event_type = 0xd;
        let mut harness = Harness::new();
        harness.import(&buffer(&[other])).unwrap();
        assert_eq!(harness.tpm.extend_count(), 0);
        assert!(harness.store.hobs().is_empty());
    }

    #[test]
    fn test_unknown_algorithm_is_an_error() {
        let events = [
            post_code(7, 0x10, b"BL1"),
            post_code(PLATFORM_ALGORITHM_SHA256, 0x20, b"BL2"),
        ];
        let mut harness = Harness::new();
        assert_eq!(
            harness.import(&buffer(&events)),
            Err(MeasureError::MalformedPreUefiEvent {
                index: 0,
                algorithm_id: 7
            })
        );
        assert_eq!(harness.tpm.extend_count(), 1);
    }

    #[test]
    fn test_pste_tag_requires_terminator() {
        let mut event = post_code(PLATFORM_ALGORITHM_SHA1, 0, b"PSTEX");
        assert!(!event.is_post_scp_tpm_extend());
        event.event = *b"PSTE\0\0\0\0\0\0";
        assert!(event.is_post_scp_tpm_extend());
    }
}
