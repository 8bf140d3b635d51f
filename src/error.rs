use thiserror::Error;

use crate::algorithm::HashMask;

/// Failure reported by the TPM command transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TpmError {
    #[error("TPM device error")]
    DeviceError,
    #[error("TPM not detected")]
    NotDetected,
    #[error("PCR index {0} out of range")]
    InvalidPcrIndex(u32),
    #[error("hash mask {0} not supported by the TPM")]
    UnsupportedBanks(HashMask),
}

/// Why the platform hash policy could not be reconciled with the TPM.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("no viable PCR bank: TPM active {active}, supported {supported}, policy {policy}")]
    NoViablePcrBank {
        active: HashMask,
        supported: HashMask,
        policy: HashMask,
    },
    #[error("failed to query PCR banks: {0}")]
    Query(TpmError),
    #[error("failed to reallocate PCR banks: {0}")]
    Allocate(TpmError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeasureError {
    #[error("{0}")]
    Policy(#[from] PolicyError),
    #[error("TPM device error, measurement disabled for this boot")]
    DeviceError,
    #[error("out of resources while growing the event log or measured FV list")]
    OutOfMemory,
    #[error("pre-UEFI event {index} carries unsupported algorithm id {algorithm_id}")]
    MalformedPreUefiEvent { index: usize, algorithm_id: u8 },
    #[error("pre-UEFI event log location is invalid or not backed by memory")]
    InvalidPreUefiLog,
    #[error("memory range {address:#x}+{length:#x} is not backed by the memory image")]
    MemoryUnavailable { address: u64, length: u64 },
}

pub type MeasureResult<T> = Result<T, MeasureError>;

impl From<std::collections::TryReserveError> for MeasureError {
    fn from(_: std::collections::TryReserveError) -> Self {
        MeasureError::OutOfMemory
    }
}
