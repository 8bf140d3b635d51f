// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};

use std::{fs, path::Path};

use crate::fv::{FV_HEADER_SIZE, FV_SIGNATURE};
use crate::pre_uefi::PRE_UEFI_EVENT_SIZE;

/// Offset of `FvLength` in EFI_FIRMWARE_VOLUME_HEADER.
const FV_LENGTH_OFFSET: usize = 32;
/// Offset of `Signature` in EFI_FIRMWARE_VOLUME_HEADER.
const FV_SIGNATURE_OFFSET: usize = 40;

/// Read a firmware volume image from a file.
///
/// The header is checked against
/// ```no-run
/// pub struct EfiFirmwareVolumeHeader {
///     zero_vector: [u8; 16],
///     file_system_guid: Guid,
///     fv_length: u64,
///     signature: u32,
///     attributes: u32,
///     header_length: u16,
///     checksum: u16,
///     ext_header_offset: u16,
///     reserved: u8,
///     revision: u8,
///     block_map: [FvBlockMapEntry],
/// }
/// ```
/// and the image is cut to `fv_length`.
pub fn read_firmware_volume<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let mut image =
        fs::read(path).with_context(|| format!("firmware volume {} does not exist", path.display()))?;
    if image.len() < FV_HEADER_SIZE as usize {
        bail!("invalid firmware volume: shorter than its header");
    }

    if &image[FV_SIGNATURE_OFFSET..FV_SIGNATURE_OFFSET + 4] != FV_SIGNATURE {
        bail!("invalid firmware volume: wrong _FVH signature");
    }

    let fv_length = (&image[FV_LENGTH_OFFSET..FV_LENGTH_OFFSET + 8]).read_u64::<LittleEndian>()?;
    if fv_length < FV_HEADER_SIZE || fv_length > image.len() as u64 {
        bail!(
            "invalid firmware volume: length {:#x} does not fit the {:#x} byte image",
            fv_length,
            image.len()
        );
    }

    image.truncate(fv_length as usize);
    Ok(image)
}

/// Read the event buffer of the pre-UEFI boot stage from a file. It must
/// hold whole entries.
pub fn read_pre_uefi_log<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let log = fs::read(path)
        .with_context(|| format!("pre-UEFI event log {} does not exist", path.display()))?;
    if log.is_empty() {
        bail!("pre-UEFI event log is empty");
    }
    if log.len() % PRE_UEFI_EVENT_SIZE != 0 {
        bail!(
            "invalid pre-UEFI event log: {} bytes is not a multiple of {}",
            log.len(),
            PRE_UEFI_EVENT_SIZE
        );
    }

    Ok(log)
}
