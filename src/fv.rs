//! Firmware volume descriptors and the event payloads that identify a
//! measured volume in the log.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::hob::Guid;
use crate::memory::PhysicalMemory;

/// The 56 byte fixed part of EFI_FIRMWARE_VOLUME_HEADER plus one 8 byte
/// block map entry.
pub const FV_HEADER_SIZE: u64 = 64;
const FV_EXT_HEADER_OFFSET_FIELD: usize = 52;
/// sizeof (EFI_FIRMWARE_VOLUME_EXT_HEADER).
pub const FV_EXT_HEADER_SIZE: u64 = 20;
pub const FV_SIGNATURE: &[u8; 4] = b"_FVH";

pub const EFI_FIRMWARE_FILE_SYSTEM2_GUID: Guid = Guid::new(
    0x8c8ce578,
    0x8a3d,
    0x4f1c,
    [0x99, 0x35, 0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3],
);

pub const EFI_FIRMWARE_FILE_SYSTEM3_GUID: Guid = Guid::new(
    0x5473c07a,
    0x3dcb,
    0x4dca,
    [0xbd, 0x6f, 0x1e, 0x96, 0x89, 0xe7, 0x34, 0x9a],
);

/// Description written into a BLOB2 event when the volume has no name.
pub const FV_HANDOFF_TABLE_DESC: &str = "Fv(XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX)";
/// Size of the description field: the placeholder plus its NUL.
pub const FV_HANDOFF_TABLE_DESC_SIZE: usize = FV_HANDOFF_TABLE_DESC.len() + 1;

/// TCG PFP revision from which volumes are logged as BLOB2 events.
pub const TCG_EFI_SPEC_ID_EVENT_STRUCT_SPEC_ERRATA_TPM2_REV_105: u32 = 105;

/// EFI_PLATFORM_FIRMWARE_BLOB: a measured memory range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FirmwareBlob {
    pub base: u64,
    pub length: u64,
}

impl FirmwareBlob {
    pub fn new(base: u64, length: u64) -> Self {
        FirmwareBlob { base, length }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(16);
        let _ = buffer.write_u64::<LittleEndian>(self.base);
        let _ = buffer.write_u64::<LittleEndian>(self.length);
        buffer
    }
}

/// UEFI_PLATFORM_FIRMWARE_BLOB2 with the fixed-size volume description:
/// `desc_size: u8, desc[41], base: u64, length: u64`, packed.
pub fn encode_firmware_blob2(name: Option<Guid>, blob: &FirmwareBlob) -> Vec<u8> {
    let mut description = [0u8; FV_HANDOFF_TABLE_DESC_SIZE];
    let text = match name {
        Some(name) => format!("Fv({name})"),
        None => FV_HANDOFF_TABLE_DESC.to_string(),
    };
    // Keep the terminating NUL, as the fixed-size print does.
    let copy = text.len().min(FV_HANDOFF_TABLE_DESC_SIZE - 1);
    description[..copy].copy_from_slice(&text.as_bytes()[..copy]);

    let mut buffer = Vec::with_capacity(1 + FV_HANDOFF_TABLE_DESC_SIZE + 16);
    buffer.push(FV_HANDOFF_TABLE_DESC_SIZE as u8);
    buffer.extend_from_slice(&description);
    buffer.extend_from_slice(&blob.encode());
    buffer
}

/// Name of the volume from its extended header.
///
/// The volume is untrusted input: every offset is range checked against the
/// reported length and the memory actually present.
pub fn get_fv_name(memory: &dyn PhysicalMemory, fv_base: u64, fv_length: u64) -> Option<Guid> {
    if fv_base.checked_add(fv_length).is_none() {
        return None;
    }
    if fv_length < FV_HEADER_SIZE {
        return None;
    }

    let header = memory.read(fv_base, FV_HEADER_SIZE)?;
    let ext_header_offset = LittleEndian::read_u16(
        &header[FV_EXT_HEADER_OFFSET_FIELD..FV_EXT_HEADER_OFFSET_FIELD + 2],
    ) as u64;
    if ext_header_offset < FV_HEADER_SIZE {
        return None;
    }
    if ext_header_offset + FV_EXT_HEADER_SIZE > fv_length {
        return None;
    }

    let ext_header = memory.read(fv_base + ext_header_offset, FV_EXT_HEADER_SIZE)?;
    let mut name = [0u8; 16];
    name.copy_from_slice(&ext_header[..16]);
    Some(Guid::from_bytes(&name))
}

/// Firmware volume announced by the PEI core or a platform driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FvInfo {
    /// File system format of the volume.
    pub format: Guid,
    pub base: u64,
    pub length: u64,
    /// Set when the volume was extracted from a file of a parent volume.
    pub parent_fv_name: Option<Guid>,
    pub parent_file_name: Option<Guid>,
}

impl FvInfo {
    pub fn new(base: u64, length: u64) -> Self {
        FvInfo {
            format: EFI_FIRMWARE_FILE_SYSTEM2_GUID,
            base,
            length,
            parent_fv_name: None,
            parent_file_name: None,
        }
    }

    /// The volume came from inside an already measured parent.
    pub fn is_child(&self) -> bool {
        self.parent_fv_name.is_some() || self.parent_file_name.is_some()
    }
}

/// Build a volume image with a valid header of `length` bytes, optionally
/// carrying an extended header with `name`.
#[cfg(test)]
pub(crate) fn test_volume(name: Option<Guid>, length: usize, fill: u8) -> Vec<u8> {
    let mut image = vec![fill; length];
    image[..FV_HEADER_SIZE as usize].fill(0);
    LittleEndian::write_u64(&mut image[32..40], length as u64);
    image[40..44].copy_from_slice(FV_SIGNATURE);
    LittleEndian::write_u16(&mut image[48..50], FV_HEADER_SIZE as u16);
    if let Some(name) = name {
        let offset = FV_HEADER_SIZE as usize;
        LittleEndian::write_u16(
            &mut image[FV_EXT_HEADER_OFFSET_FIELD..FV_EXT_HEADER_OFFSET_FIELD + 2],
            offset as u16,
        );
        image[offset..offset + 16].copy_from_slice(&name.to_bytes());
        LittleEndian::write_u32(&mut image[offset + 16..offset + 20], FV_EXT_HEADER_SIZE as u32);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryImage;

    const NAME: Guid = Guid::new(
        0x12345678,
        0x9abc,
        0xdef0,
        [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef],
    );

    #[test]
    fn test_fv_name_from_ext_header() {
        let mut memory = MemoryImage::new();
        memory.map(0x8000, test_volume(Some(NAME), 0x200, 0xFF));
        assert_eq!(get_fv_name(&memory, 0x8000, 0x200), Some(NAME));
    }

    #[test]
    fn test_fv_name_rejects_bad_offsets() {
        let mut memory = MemoryImage::new();
        memory.map(0x8000, test_volume(None, 0x200, 0xFF));
        assert_eq!(get_fv_name(&memory, 0x8000, 0x200), None);

        let mut image = test_volume(Some(NAME), 0x200, 0xFF);
        LittleEndian::write_u16(&mut image[52..54], 0x1F0);
        memory.map(0x9000, image);
        assert_eq!(get_fv_name(&memory, 0x9000, 0x200), None);

        assert_eq!(get_fv_name(&memory, 0x8000, 0x10), None);
        assert_eq!(get_fv_name(&memory, u64::MAX - 4, 0x200), None);
    }

    #[test]
    fn test_blob2_layout() {
        let blob = FirmwareBlob::new(0xFF00_0000, 0x10_0000);
        let named = encode_firmware_blob2(Some(NAME), &blob);
        assert_eq!(named.len(), 58);
        assert_eq!(named[0], 41);
        assert_eq!(&named[1..41], b"Fv(12345678-9abc-def0-0123-456789abcdef)");
        assert_eq!(named[41], 0);
        assert_eq!(LittleEndian::read_u64(&named[42..50]), 0xFF00_0000);
        assert_eq!(LittleEndian::read_u64(&named[50..58]), 0x10_0000);

        let unnamed = encode_firmware_blob2(None, &blob);
        assert_eq!(&unnamed[1..41], FV_HANDOFF_TABLE_DESC.as_bytes());
    }
}
