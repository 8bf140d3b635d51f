//! Agreement between the platform hash policy, the TPM's supported
//! algorithms and its allocated PCR banks.

use log::{debug, error, info};

use crate::algorithm::HashMask;
use crate::error::{PolicyError, TpmError};
use crate::tpm::{Platform, Tpm2Device};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Policy and banks agree; measurement may start.
    Ready,
    /// Banks were reallocated and a cold reset was requested. Nothing else
    /// may happen during this boot.
    ResetRequired,
}

/// Make sure that the current PCR allocations, the TPM supported algorithms
/// and the platform hash policy are all in agreement.
///
/// On `Ready`, `active ⊆ policy ⊆ supported` holds and `policy` is the
/// narrowed value.
pub fn sync_pcr_allocations_and_mask(
    policy: &mut HashMask,
    tpm: &mut dyn Tpm2Device,
    platform: &mut dyn Platform,
) -> Result<ReconcileOutcome, PolicyError> {
    debug!("SyncPcrAllocationsAndPcrMask");

    let capability = tpm
        .get_capability_supported_and_active_pcrs()
        .map_err(PolicyError::Query)?;
    let supported = capability.supported;
    let active = capability.active;

    if policy.is_empty() {
        debug!("hash policy empty, adopting active banks {}", active);
        *policy = active;
    }

    // Active banks the policy forbids: reallocate and reboot.
    if !policy.contains(active) {
        let new_active = active.intersection(*policy);
        info!("Reallocating PCR banks from {} to {}", active, new_active);
        if new_active.is_empty() {
            error!("No viable PCRs active! Please set a less restrictive hash policy");
            return Err(PolicyError::NoViablePcrBank {
                active,
                supported,
                policy: *policy,
            });
        }

        tpm.pcr_allocate_banks(supported, new_active)
            .map_err(|e: TpmError| {
                error!("Failed to reallocate PCRs: {}", e);
                PolicyError::Allocate(e)
            })?;

        platform.reset_cold();
        return Ok(ReconcileOutcome::ResetRequired);
    }

    // Policy bits the TPM cannot do: narrow the policy.
    if !supported.contains(*policy) {
        let new_policy = policy.intersection(supported);
        info!("Updating hash policy from {} to {}", policy, new_policy);
        if new_policy.is_empty() {
            error!("No viable PCRs supported! Please set a less restrictive hash policy");
            return Err(PolicyError::NoViablePcrBank {
                active,
                supported,
                policy: *policy,
            });
        }
        *policy = new_policy;
    }

    Ok(ReconcileOutcome::Ready)
}
