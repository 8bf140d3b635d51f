//! Interfaces to the TPM command transport and the platform services the
//! measurement driver depends on.

use crate::algorithm::HashMask;
use crate::digest_list::DigestList;
use crate::error::TpmError;

/// PCR bank state reported by TPM2_GetCapability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmCapability {
    /// Algorithms the TPM implements.
    pub supported: HashMask,
    /// Banks currently allocated.
    pub active: HashMask,
}

pub trait Tpm2Device {
    /// Claim the TPM for this phase. Fails when no TPM is present.
    fn request_use_tpm(&mut self) -> Result<(), TpmError>;

    fn get_capability_supported_and_active_pcrs(&mut self) -> Result<TpmCapability, TpmError>;

    /// Issue TPM2_PCR_Allocate. Takes effect after the next TPM reset.
    fn pcr_allocate_banks(&mut self, supported: HashMask, desired: HashMask)
        -> Result<(), TpmError>;

    fn pcr_extend(&mut self, pcr_index: u32, digests: &DigestList) -> Result<(), TpmError>;
}

pub const EFI_ERROR_CODE: u32 = 0x0000_0002;
pub const EFI_ERROR_MINOR: u32 = 0x4000_0000;
pub const EFI_P_EC_INTERFACE_ERROR: u32 = 0x0000_0005;
/// Default status code subclass for the TPM device (EFI_PERIPHERAL_TPM).
pub const EFI_PERIPHERAL_TPM: u32 = 0x010D_0000;

pub trait Platform {
    /// Cold reset. On hardware this never returns; callers must stop all
    /// further work once it has been requested.
    fn reset_cold(&mut self);

    fn report_status_code(&mut self, code_type: u32, value: u32);
}
