use byteorder::{ByteOrder, LittleEndian};

use crate::parser::DescriptionParser;

/// EFI_PLATFORM_FIRMWARE_BLOB: base and length of the measured range.
pub struct EvFirmwareBlobParser;

impl DescriptionParser for EvFirmwareBlobParser {
    fn parse_description(&self, data: &[u8]) -> String {
        if data.len() != 16 {
            return hex::encode(data);
        }
        format!(
            "base: {:#x}, length: {:#x}",
            LittleEndian::read_u64(&data[0..8]),
            LittleEndian::read_u64(&data[8..16])
        )
    }
}
