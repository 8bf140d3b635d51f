use std::env;
extern crate tcg2_pei_rs;

#[macro_use]
extern crate log;

use anyhow::{bail, Result};
use std::convert::TryFrom;
use tcg2_pei_rs::hob::{TCG_EVENT2_ENTRY_HOB_GUID, TCG_EVENT_ENTRY_HOB_GUID};
use tcg2_pei_rs::read::{read_firmware_volume, read_pre_uefi_log};
use tcg2_pei_rs::sim::{RecordingPlatform, SoftTpm};
use tcg2_pei_rs::{
    BiosEventlog, BootOutcome, EventLogFormat, Eventlog, FirmwareBlob, FvPolicySources, HashMask,
    MemoryImage, PlatformTpm2Config, SoftwareDigest, Tcg2Config, Tcg2Pei,
};

/// Where the boot firmware volume is placed in the simulated address space.
const BOOT_FV_BASE: u64 = 0xFFC0_0000;
/// Where the pre-UEFI event buffer is placed.
const PRE_UEFI_LOG_BASE: u64 = 0x8800_0000;

fn main() -> Result<()> {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        bail!("usage: {} <boot-fv-image> <pre-uefi-event-log>", args[0]);
    }

    info!("read boot FV: {}", args[1]);
    let fv = read_firmware_volume(&args[1])?;
    info!("read pre-UEFI event log: {}", args[2]);
    let pre_uefi_log = read_pre_uefi_log(&args[2])?;

    let boot_fv = FirmwareBlob::new(BOOT_FV_BASE, fv.len() as u64);
    let platform = PlatformTpm2Config {
        supported_algorithms_bitmask: (HashMask::SHA1 | HashMask::SHA256).bits(),
        event_log_address: PRE_UEFI_LOG_BASE,
        event_log_length: pre_uefi_log.len() as u64,
    };

    let mut memory = MemoryImage::new();
    memory.map(BOOT_FV_BASE, fv);
    memory.map(PRE_UEFI_LOG_BASE, pre_uefi_log);

    let config = Tcg2Config {
        platform: Some(platform),
        event_log_formats: EventLogFormat::TCG_1_2 | EventLogFormat::TCG_2,
        ..Default::default()
    };
    let banks = HashMask::SHA1 | HashMask::SHA256 | HashMask::SHA384;
    let mut pei = Tcg2Pei::new(
        SoftTpm::new(banks, banks),
        SoftwareDigest,
        RecordingPlatform::default(),
        memory,
        config,
        FvPolicySources::default(),
        boot_fv,
    );

    match pei.run()? {
        BootOutcome::ResetRequested => {
            // The simulated TPM applies the new allocation on reset.
            info!("PCR banks reallocated, rebooting");
            pei.tpm.reset();
            if let BootOutcome::ResetRequested = pei.run()? {
                bail!("PCR banks still disagree with the hash policy after reset");
            }
        }
        BootOutcome::Measured { fv_failures } => {
            for failure in fv_failures {
                warn!("FV {:#x} not measured: {}", failure.info.base, failure.error);
            }
        }
    }
    pei.end_of_pei()?;

    let store = &pei.context.store;
    let legacy = BiosEventlog::try_from(store.concatenated(TCG_EVENT_ENTRY_HOB_GUID))?;
    let agile = Eventlog::try_from(store.concatenated(TCG_EVENT2_ENTRY_HOB_GUID))?;
    println!("TCG 1.2 event log:{}", legacy);
    println!("TCG 2.0 event log:{}", agile);

    for algorithm in pei.context.policy.algorithms() {
        let replayed = agile.replay_measurement_registry(algorithm);
        let mut pcrs: Vec<_> = replayed.into_iter().collect();
        pcrs.sort();
        for (pcr_index, value) in pcrs {
            let tpm_value = pei.tpm.read_pcr(algorithm, pcr_index).map(hex::encode);
            println!(
                "{} PCR{}: replayed {} tpm {}",
                algorithm,
                pcr_index,
                hex::encode(&value),
                tpm_value.unwrap_or_default()
            );
        }
    }

    Ok(())
}
