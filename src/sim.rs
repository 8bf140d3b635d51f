//! In-memory TPM 2.0 and platform models. They stand in for the hardware when
//! running the measurement flow from the command line and in tests.

use log::debug;
use std::collections::HashMap;

use crate::algorithm::{HashAlgorithm, HashMask};
use crate::digest_list::DigestList;
use crate::error::TpmError;
use crate::tpm::{Platform, Tpm2Device, TpmCapability};

pub const PCR_COUNT: u32 = 24;

/// Commands the software TPM received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmCommand {
    RequestUse,
    GetCapability,
    PcrAllocate { supported: HashMask, desired: HashMask },
    PcrExtend { pcr_index: u32, digests: DigestList },
}

pub struct SoftTpm {
    present: bool,
    supported: HashMask,
    active: HashMask,
    pending_allocation: Option<HashMask>,
    banks: HashMap<HashAlgorithm, Vec<Vec<u8>>>,
    failing_extends: usize,
    pub commands: Vec<TpmCommand>,
}

impl SoftTpm {
    pub fn new(supported: HashMask, active: HashMask) -> Self {
        let mut tpm = SoftTpm {
            present: true,
            supported,
            active,
            pending_allocation: None,
            banks: HashMap::new(),
            failing_extends: 0,
            commands: Vec::new(),
        };
        tpm.reset_banks();
        tpm
    }

    /// A platform without a TPM.
    pub fn absent() -> Self {
        let mut tpm = SoftTpm::new(HashMask::empty(), HashMask::empty());
        tpm.present = false;
        tpm
    }

    /// Make the next `count` extend commands fail with a device error.
    pub fn fail_next_extends(&mut self, count: usize) {
        self.failing_extends = count;
    }

    pub fn active_banks(&self) -> HashMask {
        self.active
    }

    /// TPM reset (power cycle): applies a pending allocation and clears PCRs.
    pub fn reset(&mut self) {
        if let Some(desired) = self.pending_allocation.take() {
            self.active = desired;
        }
        self.reset_banks();
    }

    pub fn read_pcr(&self, algorithm: HashAlgorithm, pcr_index: u32) -> Option<&[u8]> {
        self.banks
            .get(&algorithm)
            .and_then(|bank| bank.get(pcr_index as usize))
            .map(|value| value.as_slice())
    }

    pub fn extend_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, TpmCommand::PcrExtend { .. }))
            .count()
    }

    fn reset_banks(&mut self) {
        self.banks = self
            .active
            .algorithms()
            .map(|algorithm| {
                let zero = vec![0u8; algorithm.digest_length()];
                (algorithm, vec![zero; PCR_COUNT as usize])
            })
            .collect();
    }

    fn extend_banks(&mut self, pcr_index: u32, digests: &DigestList) {
        for (algorithm, digest) in digests.iter() {
            // Digests for unallocated banks are ignored by the TPM.
            if let Some(bank) = self.banks.get_mut(&algorithm) {
                let pcr = &mut bank[pcr_index as usize];
                *pcr = algorithm.hash([pcr.as_slice(), digest].into_iter());
            }
        }
    }
}

impl Tpm2Device for SoftTpm {
    fn request_use_tpm(&mut self) -> Result<(), TpmError> {
        self.commands.push(TpmCommand::RequestUse);
        if self.present {
            Ok(())
        } else {
            Err(TpmError::NotDetected)
        }
    }

    fn get_capability_supported_and_active_pcrs(&mut self) -> Result<TpmCapability, TpmError> {
        self.commands.push(TpmCommand::GetCapability);
        Ok(TpmCapability {
            supported: self.supported,
            active: self.active,
        })
    }

    fn pcr_allocate_banks(
        &mut self,
        supported: HashMask,
        desired: HashMask,
    ) -> Result<(), TpmError> {
        self.commands.push(TpmCommand::PcrAllocate { supported, desired });
        if !self.supported.contains(desired) {
            return Err(TpmError::UnsupportedBanks(desired));
        }
        debug!("SoftTpm: allocation {} pending until reset", desired);
        self.pending_allocation = Some(desired);
        Ok(())
    }

    fn pcr_extend(&mut self, pcr_index: u32, digests: &DigestList) -> Result<(), TpmError> {
        self.commands.push(TpmCommand::PcrExtend {
            pcr_index,
            digests: digests.clone(),
        });
        if self.failing_extends > 0 {
            self.failing_extends -= 1;
            return Err(TpmError::DeviceError);
        }
        if pcr_index >= PCR_COUNT {
            return Err(TpmError::InvalidPcrIndex(pcr_index));
        }
        self.extend_banks(pcr_index, digests);
        Ok(())
    }
}

/// Platform that records resets and status codes instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    pub cold_resets: usize,
    pub status_codes: Vec<(u32, u32)>,
}

impl Platform for RecordingPlatform {
    fn reset_cold(&mut self) {
        self.cold_resets += 1;
    }

    fn report_status_code(&mut self, code_type: u32, value: u32) {
        self.status_codes.push((code_type, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_chains_previous_value() {
        let mut tpm = SoftTpm::new(HashMask::SHA256, HashMask::SHA256);
        let mut digests = DigestList::new();
        digests.insert(HashAlgorithm::Sha256, vec![0x11; 32]);
        tpm.pcr_extend(0, &digests).unwrap();

        let expected = HashAlgorithm::Sha256.hash([&[0u8; 32][..], &[0x11; 32][..]].into_iter());
        assert_eq!(tpm.read_pcr(HashAlgorithm::Sha256, 0).unwrap(), expected.as_slice());
    }

    #[test]
    fn test_allocation_applies_after_reset() {
        let both = HashMask::SHA1 | HashMask::SHA256;
        let mut tpm = SoftTpm::new(both, both);
        tpm.pcr_allocate_banks(both, HashMask::SHA256).unwrap();
        assert_eq!(tpm.active_banks(), both);

        tpm.reset();
        assert_eq!(tpm.active_banks(), HashMask::SHA256);
        assert!(tpm.read_pcr(HashAlgorithm::Sha1, 0).is_none());
    }
}
