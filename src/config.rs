//! Platform configuration consumed by the measurement driver.

use crate::algorithm::HashMask;
use crate::event::EventLogFormat;
use crate::tpm::EFI_PERIPHERAL_TPM;

/// TPM description published by the platform in its info HOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTpm2Config {
    /// Bit 0 SHA1, bit 1 SHA256, bit 2 SHA384, bit 3 SHA512, bit 4 SM3_256.
    /// Values above 0x1F are invalid and ignored.
    pub supported_algorithms_bitmask: u32,
    /// Location of the pre-UEFI event buffer.
    pub event_log_address: u64,
    pub event_log_length: u64,
}

#[derive(Debug, Clone)]
pub struct Tcg2Config {
    /// Hash policy used when the platform does not provide a valid one.
    /// Zero means "whatever banks the TPM has active".
    pub tpm2_hash_mask: HashMask,
    /// Absent when the platform info HOB is missing.
    pub platform: Option<PlatformTpm2Config>,
    /// TCG PC Client PFP revision the log claims to follow.
    pub pfp_measurement_revision: u32,
    /// 1: measure the S-CRTM version into PCR 0.
    pub scrtm_policy: u8,
    pub firmware_version: String,
    /// Log formats to produce.
    pub event_log_formats: EventLogFormat,
    pub status_code_subclass_tpm_device: u32,
}

impl Default for Tcg2Config {
    fn default() -> Self {
        Tcg2Config {
            tpm2_hash_mask: HashMask::SHA1 | HashMask::SHA256,
            platform: None,
            pfp_measurement_revision: 105,
            scrtm_policy: 1,
            firmware_version: String::from("0.1.0"),
            event_log_formats: EventLogFormat::TCG_2,
            status_code_subclass_tpm_device: EFI_PERIPHERAL_TPM,
        }
    }
}

impl Tcg2Config {
    pub fn measure_crtm_version(&self) -> bool {
        self.scrtm_policy == 1
    }
}
