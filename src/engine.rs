//! Hash, extend and log: the single path through which every measurement
//! reaches the TPM and the event log.

use log::{debug, error};

use crate::algorithm::{DigestProvider, HashMask};
use crate::digest_list::DigestList;
use crate::error::{MeasureError, MeasureResult};
use crate::event::{EventLogFormat, EventLogRecord, LogFormat, PcrEventHeader};
use crate::hob::EventLogStore;
use crate::tpm::{Platform, Tpm2Device, EFI_ERROR_CODE, EFI_ERROR_MINOR, EFI_P_EC_INTERFACE_ERROR};

#[derive(Debug, Clone, Copy)]
pub enum HashMode<'a> {
    /// Hash the data under every active algorithm, extend, log.
    RawData(&'a [u8]),
    /// The digests are already computed: extend, log.
    PrehashedDigestList(&'a DigestList),
    /// The digests were already extended by an earlier stage: log only.
    PrehashedLogOnly(&'a DigestList),
}

pub struct DigestEngine<'a> {
    pub tpm: &'a mut dyn Tpm2Device,
    pub hasher: &'a mut dyn DigestProvider,
    pub platform: &'a mut dyn Platform,
    pub store: &'a mut EventLogStore,
    pub active: HashMask,
    pub formats: EventLogFormat,
    pub status_code_subclass: u32,
}

impl DigestEngine<'_> {
    /// Measure one event.
    ///
    /// Once any extend has failed with a device error, the store is marked
    /// failed and every later call returns `DeviceError` without issuing
    /// TPM commands or hashing.
    pub fn hash_log_extend(
        &mut self,
        mode: HashMode<'_>,
        header: &PcrEventHeader,
        payload: &[u8],
    ) -> MeasureResult<()> {
        if self.store.tpm_failed() {
            return Err(MeasureError::DeviceError);
        }

        let digests = match mode {
            HashMode::RawData(data) => self.hash_and_extend(header.pcr_index, data),
            HashMode::PrehashedDigestList(digests) => self
                .extend(header.pcr_index, digests)
                .map(|_| digests.clone()),
            HashMode::PrehashedLogOnly(digests) => Ok(digests.clone()),
        };

        let result = digests.and_then(|digests| self.log_event(&digests, header, payload));

        if let Err(MeasureError::DeviceError) = result {
            error!("HashLogExtendEvent - device error. Disable TPM.");
            self.store.mark_tpm_failed();
            self.report_tpm_error();
        }

        result
    }

    /// Add an event to every enabled log format.
    ///
    /// A format that cannot be stored does not prevent the others from being
    /// written; the last failure is returned.
    pub fn log_event(
        &mut self,
        digests: &DigestList,
        header: &PcrEventHeader,
        payload: &[u8],
    ) -> MeasureResult<()> {
        let size = (header.event_size as usize).min(payload.len());
        let payload = &payload[..size];
        let digests = digests.filtered(self.active);

        let mut result = Ok(());
        for format in self.formats.formats() {
            debug!("  LogFormat - {:?}", format);
            let record = match format {
                LogFormat::Tcg12 => match EventLogRecord::legacy(header, &digests, payload) {
                    Some(record) => record,
                    None => continue,
                },
                LogFormat::Tcg2 => EventLogRecord::agile(header, digests.clone(), payload),
            };

            if let Err(e) = self.store.build_guid_hob(record.hob_guid(), record.encode()) {
                error!("failed to log {:?} event: {}", format, e);
                result = Err(e);
            }
        }

        result
    }

    /// Report the TPM interface error through the status code channel.
    pub fn report_tpm_error(&mut self) {
        self.platform.report_status_code(
            EFI_ERROR_CODE | EFI_ERROR_MINOR,
            self.status_code_subclass | EFI_P_EC_INTERFACE_ERROR,
        );
    }

    fn hash_and_extend(&mut self, pcr_index: u32, data: &[u8]) -> MeasureResult<DigestList> {
        let digests = self.hasher.hash_all(self.active, data)?;
        self.extend(pcr_index, &digests)?;
        Ok(digests)
    }

    fn extend(&mut self, pcr_index: u32, digests: &DigestList) -> MeasureResult<()> {
        self.tpm.pcr_extend(pcr_index, digests).map_err(|e| {
            error!("Tpm2PcrExtend of PCR{} failed: {}", pcr_index, e);
            MeasureError::DeviceError
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::algorithm::{HashAlgorithm, SoftwareDigest};
    use crate::hob::{TCG_EVENT2_ENTRY_HOB_GUID, TCG_EVENT_ENTRY_HOB_GUID, TPM_ERROR_HOB_GUID};
    use crate::sim::{RecordingPlatform, SoftTpm};
    use crate::tpm::EFI_PERIPHERAL_TPM;
    use crate::Eventlog;

    /// Digest provider that counts how often it is asked to hash.
    #[derive(Default)]
    pub struct CountingDigest {
        pub calls: usize,
    }

    impl DigestProvider for CountingDigest {
        fn hash_all(&mut self, algorithms: HashMask, data: &[u8]) -> MeasureResult<DigestList> {
            self.calls += 1;
            SoftwareDigest.hash_all(algorithms, data)
        }
    }

    struct Harness {
        tpm: SoftTpm,
        hasher: CountingDigest,
        platform: RecordingPlatform,
        store: EventLogStore,
        formats: EventLogFormat,
        active: HashMask,
    }

    impl Harness {
        fn new(active: HashMask) -> Self {
            Harness {
                tpm: SoftTpm::new(active, active),
                hasher: CountingDigest::default(),
                platform: RecordingPlatform::default(),
                store: EventLogStore::new(),
                formats: EventLogFormat::all(),
                active,
            }
        }

        fn engine(&mut self) -> DigestEngine<'_> {
            DigestEngine {
                tpm: &mut self.tpm,
                hasher: &mut self.hasher,
                platform: &mut self.platform,
                store: &mut self.store,
                active: self.active,
                formats: self.formats,
                status_code_subclass: EFI_PERIPHERAL_TPM,
            }
        }
    }

    #[test]
    fn test_raw_data_logs_both_formats_consistently() {
        let mut harness = Harness::new(HashMask::SHA1 | HashMask::SHA256);
        let header = PcrEventHeader::new(0, 0x8, b"payload");
        harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"firmware"), &header, b"payload")
            .unwrap();

        assert_eq!(harness.tpm.extend_count(), 1);
        let legacy = harness.store.first_guid_hob(TCG_EVENT_ENTRY_HOB_GUID).unwrap();
        let agile = harness.store.concatenated(TCG_EVENT2_ENTRY_HOB_GUID);
        let log = Eventlog::try_from(agile).unwrap();

        let sha1 = log.log[0]
            .digests
            .iter()
            .find(|d| d.algorithm == "TPM_ALG_SHA1")
            .unwrap();
        assert_eq!(&legacy.data[8..28], sha1.digest.as_slice());
        assert_eq!(
            sha1.digest,
            HashAlgorithm::Sha1.hash([&b"firmware"[..]].into_iter())
        );
    }

    #[test]
    fn test_legacy_record_skipped_without_sha1() {
        let mut harness = Harness::new(HashMask::SHA256);
        let header = PcrEventHeader::new(0, 0x8, b"p");
        harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"data"), &header, b"p")
            .unwrap();

        assert!(harness.store.first_guid_hob(TCG_EVENT_ENTRY_HOB_GUID).is_none());
        assert_eq!(harness.store.guid_hobs(TCG_EVENT2_ENTRY_HOB_GUID).count(), 1);
    }

    #[test]
    fn test_log_only_does_not_extend() {
        let mut harness = Harness::new(HashMask::SHA256);
        let mut digests = DigestList::new();
        digests.insert(HashAlgorithm::Sha256, vec![7; 32]);
        let header = PcrEventHeader::new(1, 1, b"PSTE");
        harness
            .engine()
            .hash_log_extend(HashMode::PrehashedLogOnly(&digests), &header, b"PSTE")
            .unwrap();

        assert_eq!(harness.tpm.extend_count(), 0);
        assert_eq!(harness.hasher.calls, 0);
        assert_eq!(harness.store.guid_hobs(TCG_EVENT2_ENTRY_HOB_GUID).count(), 1);
    }

    #[test]
    fn test_extend_failure_is_sticky() {
        let mut harness = Harness::new(HashMask::SHA256);
        harness.tpm.fail_next_extends(1);
        let header = PcrEventHeader::new(0, 1, b"x");

        let first = harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"a"), &header, b"x");
        assert_eq!(first, Err(MeasureError::DeviceError));
        assert!(harness.store.first_guid_hob(TPM_ERROR_HOB_GUID).is_some());
        assert_eq!(harness.platform.status_codes.len(), 1);

        let hashes = harness.hasher.calls;
        let extends = harness.tpm.extend_count();
        let second = harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"b"), &header, b"x");
        assert_eq!(second, Err(MeasureError::DeviceError));
        assert_eq!(harness.hasher.calls, hashes);
        assert_eq!(harness.tpm.extend_count(), extends);
        assert!(harness.store.guid_hobs(TCG_EVENT2_ENTRY_HOB_GUID).next().is_none());
    }

    #[test]
    fn test_extend_failure_is_sticky_with_full_store() {
        let mut harness = Harness::new(HashMask::SHA256);
        // Room for exactly one agile SHA-256 record with a one byte payload.
        harness.store = EventLogStore::with_limit(75);
        let header = PcrEventHeader::new(0, 1, b"x");

        harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"a"), &header, b"x")
            .unwrap();
        harness.tpm.fail_next_extends(1);
        let second = harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"b"), &header, b"x");
        assert_eq!(second, Err(MeasureError::DeviceError));
        assert!(harness.store.tpm_failed());
        assert!(harness.store.first_guid_hob(TPM_ERROR_HOB_GUID).is_none());

        let extends = harness.tpm.extend_count();
        let third = harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"c"), &header, b"x");
        assert_eq!(third, Err(MeasureError::DeviceError));
        assert_eq!(harness.tpm.extend_count(), extends);
        assert_eq!(harness.platform.status_codes.len(), 1);
    }

    #[test]
    fn test_out_of_memory_is_not_sticky() {
        let mut harness = Harness::new(HashMask::SHA256);
        harness.store = EventLogStore::with_limit(8);
        let header = PcrEventHeader::new(0, 1, b"x");

        let result = harness
            .engine()
            .hash_log_extend(HashMode::RawData(b"a"), &header, b"x");
        assert_eq!(result, Err(MeasureError::OutOfMemory));
        assert!(!harness.store.tpm_failed());
        assert!(harness.platform.status_codes.is_empty());
    }
}
