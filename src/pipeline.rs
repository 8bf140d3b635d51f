//! The PEI measurement driver: reconciles the hash policy, imports the
//! pre-UEFI log, measures the boot firmware and every firmware volume
//! announced afterwards.

use std::collections::VecDeque;

use log::{debug, error, info, warn};

use crate::algorithm::{DigestProvider, HashMask};
use crate::config::Tcg2Config;
use crate::engine::{DigestEngine, HashMode};
use crate::enums::EV_S_CRTM_VERSION;
use crate::error::{MeasureError, MeasureResult};
use crate::event::{EventLogFormat, PcrEventHeader};
use crate::fv::{FirmwareBlob, FvInfo, EFI_FIRMWARE_FILE_SYSTEM2_GUID, EFI_FIRMWARE_FILE_SYSTEM3_GUID};
use crate::hob::{EventLogStore, Guid, MEASURED_FV_HOB_GUID};
use crate::ledger::{FvPolicySources, MeasurementLedger};
use crate::memory::PhysicalMemory;
use crate::policy::{sync_pcr_allocations_and_mask, ReconcileOutcome};
use crate::pre_uefi::import_pre_uefi_events;
use crate::tpm::{Platform, Tpm2Device};

/// State shared by every measurement of one boot.
#[derive(Debug)]
pub struct MeasurementContext {
    /// Hash policy after reconciliation.
    pub policy: HashMask,
    pub formats: EventLogFormat,
    pub store: EventLogStore,
    pub ledger: MeasurementLedger,
    /// Set once the driver has finished, successfully or not. Consumers of
    /// the TPM wait for it.
    pub initialization_done: bool,
}

/// A firmware volume that could not be measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FvFailure {
    pub info: FvInfo,
    pub error: MeasureError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    /// Measurement ran. Volumes that failed are listed; the boot continues
    /// without them.
    Measured { fv_failures: Vec<FvFailure> },
    /// PCR banks were reallocated and a cold reset was requested.
    ResetRequested,
}

pub struct Tcg2Pei<T, H, P, M> {
    pub tpm: T,
    pub hasher: H,
    pub platform: P,
    pub memory: M,
    config: Tcg2Config,
    boot_fv: FirmwareBlob,
    known_fv_formats: Vec<Guid>,
    discovered: VecDeque<FvInfo>,
    pub context: MeasurementContext,
}

impl<T, H, P, M> Tcg2Pei<T, H, P, M>
where
    T: Tpm2Device,
    H: DigestProvider,
    P: Platform,
    M: PhysicalMemory,
{
    /// `boot_fv` is the volume the PEI core booted from; it is measured as
    /// the main BIOS.
    pub fn new(
        tpm: T,
        hasher: H,
        platform: P,
        memory: M,
        config: Tcg2Config,
        sources: FvPolicySources,
        boot_fv: FirmwareBlob,
    ) -> Self {
        let context = MeasurementContext {
            policy: config.tpm2_hash_mask,
            formats: config.event_log_formats,
            store: EventLogStore::new(),
            ledger: MeasurementLedger::new(sources, config.pfp_measurement_revision),
            initialization_done: false,
        };
        Tcg2Pei {
            tpm,
            hasher,
            platform,
            memory,
            config,
            boot_fv,
            known_fv_formats: vec![EFI_FIRMWARE_FILE_SYSTEM2_GUID, EFI_FIRMWARE_FILE_SYSTEM3_GUID],
            discovered: VecDeque::new(),
            context,
        }
    }

    /// Use a store with a byte budget, for platforms with little HOB space.
    pub fn with_store(mut self, store: EventLogStore) -> Self {
        self.context.store = store;
        self
    }

    pub fn config(&self) -> &Tcg2Config {
        &self.config
    }

    /// Queue a volume announced by the PEI core. Volumes are measured in the
    /// order they were announced.
    pub fn discover_fv(&mut self, info: FvInfo) {
        debug!("FV discovered at {:#x}+{:#x}", info.base, info.length);
        self.discovered.push_back(info);
    }

    /// Run the driver entry point.
    ///
    /// Whatever the result, the TPM initialization is marked done unless a
    /// cold reset was requested. On failure the TPM error HOB is built and
    /// the interface error status code is reported.
    pub fn run(&mut self) -> MeasureResult<BootOutcome> {
        let result = self.entry();

        match &result {
            Ok(BootOutcome::ResetRequested) => return result,
            Ok(BootOutcome::Measured { fv_failures }) => {
                info!("TPM2 measurement done, {} volume(s) failed", fv_failures.len());
            }
            Err(e) => {
                error!("TPM2 error! Build Hob: {}", e);
                if !self.context.store.tpm_failed() {
                    self.context.store.mark_tpm_failed();
                    self.engine().report_tpm_error();
                }
            }
        }

        self.context.initialization_done = true;
        result
    }

    fn entry(&mut self) -> MeasureResult<BootOutcome> {
        self.tpm.request_use_tpm().map_err(|e| {
            error!("TPM2 not detected: {}", e);
            MeasureError::DeviceError
        })?;

        let platform = self.config.platform.ok_or_else(|| {
            error!("platform TPM2 info HOB not found");
            MeasureError::DeviceError
        })?;

        match HashMask::from_bits(platform.supported_algorithms_bitmask) {
            Some(mask) => self.context.policy = mask,
            None => warn!(
                "ignoring invalid platform hash bitmask {:#x}",
                platform.supported_algorithms_bitmask
            ),
        }

        let outcome = sync_pcr_allocations_and_mask(
            &mut self.context.policy,
            &mut self.tpm,
            &mut self.platform,
        )?;
        if outcome == ReconcileOutcome::ResetRequired {
            return Ok(BootOutcome::ResetRequested);
        }
        info!("hash policy {}", self.context.policy);

        self.measure_pre_uefi_firmware_components(
            platform.event_log_address,
            platform.event_log_length,
        )?;

        if self.config.measure_crtm_version() {
            self.measure_crtm_version()?;
        }

        self.measure_main_bios()?;

        let fv_failures = self.drain_discovered_fvs();
        Ok(BootOutcome::Measured { fv_failures })
    }

    /// Measure every queued volume. A failing volume does not stop the
    /// others.
    pub fn drain_discovered_fvs(&mut self) -> Vec<FvFailure> {
        let mut failures = Vec::new();
        while let Some(info) = self.discovered.pop_front() {
            if let Err(error) = self.notify_fv_info(&info) {
                failures.push(FvFailure { info, error });
            }
        }
        failures
    }

    /// Handle one firmware volume info notification.
    ///
    /// Volumes of an unknown format are ignored. A volume extracted from a
    /// parent is recorded without being measured, the parent's measurement
    /// already covers it.
    pub fn notify_fv_info(&mut self, info: &FvInfo) -> MeasureResult<()> {
        if !self.known_fv_formats.contains(&info.format) {
            info!("Unknown Firmware Volume format {}", info.format);
            return Ok(());
        }

        if info.is_child() {
            self.context.ledger.record_child_fv(info.base, info.length)?;
            return Ok(());
        }

        let (mut engine, ledger, memory) = self.parts();
        ledger.measure_fv(&mut engine, memory, info.base, info.length)
    }

    /// Measure an arbitrary firmware volume.
    pub fn measure_fv(&mut self, base: u64, length: u64) -> MeasureResult<()> {
        let (mut engine, ledger, memory) = self.parts();
        ledger.measure_fv(&mut engine, memory, base, length)
    }

    pub fn measure_main_bios(&mut self) -> MeasureResult<()> {
        debug!("MeasureMainBios");
        let boot_fv = self.boot_fv;
        self.measure_fv(boot_fv.base, boot_fv.length)
    }

    /// Measure the firmware version string into PCR 0 as UTF-16LE with its
    /// terminating NUL.
    pub fn measure_crtm_version(&mut self) -> MeasureResult<()> {
        let version: Vec<u8> = self
            .config
            .firmware_version
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let header = PcrEventHeader::new(0, EV_S_CRTM_VERSION, &version);
        self.engine()
            .hash_log_extend(HashMode::RawData(&version), &header, &version)
    }

    /// Import the event buffer the earlier boot stage left in memory.
    pub fn measure_pre_uefi_firmware_components(
        &mut self,
        address: u64,
        length: u64,
    ) -> MeasureResult<()> {
        if address == 0 || length == 0 {
            error!("pre-UEFI event log not published");
            return Err(MeasureError::InvalidPreUefiLog);
        }

        let (mut engine, _, memory) = self.parts();
        let buffer = memory
            .read(address, length)
            .ok_or(MeasureError::InvalidPreUefiLog)?;
        import_pre_uefi_events(&mut engine, buffer)
    }

    /// Publish the measured volumes for later phases.
    pub fn end_of_pei(&mut self) -> MeasureResult<()> {
        let snapshot = self.context.ledger.snapshot();
        self.context.store.build_guid_hob(MEASURED_FV_HOB_GUID, snapshot)
    }

    /// Measurement service offered to other PEI modules.
    pub fn hash_log_extend_event(
        &mut self,
        mode: HashMode<'_>,
        header: &PcrEventHeader,
        payload: &[u8],
    ) -> MeasureResult<()> {
        self.engine().hash_log_extend(mode, header, payload)
    }

    fn engine(&mut self) -> DigestEngine<'_> {
        self.parts().0
    }

    fn parts(&mut self) -> (DigestEngine<'_>, &mut MeasurementLedger, &M) {
        let engine = DigestEngine {
            tpm: &mut self.tpm,
            hasher: &mut self.hasher,
            platform: &mut self.platform,
            store: &mut self.context.store,
            active: self.context.policy,
            formats: self.context.formats,
            status_code_subclass: self.config.status_code_subclass_tpm_device,
        };
        (engine, &mut self.context.ledger, &self.memory)
    }
}
