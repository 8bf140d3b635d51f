use byteorder::{ByteOrder, LittleEndian};

use crate::parser::DescriptionParser;

/// BLOB2 and HANDOFF_TABLES2: a length prefixed description followed by the
/// base and length (or table count and pointer) of the measured object.
pub struct EvHandoffTableParser;

impl DescriptionParser for EvHandoffTableParser {
    fn parse_description(&self, data: &[u8]) -> String {
        let length = match data.first() {
            Some(&length) => length as usize,
            None => return String::default(),
        };
        if data.len() != 1 + length + 16 {
            return hex::encode(data);
        }

        let description = String::from_utf8_lossy(&data[1..1 + length]).replace('\0', "");
        let tail = &data[1 + length..];
        format!(
            "{}, base: {:#x}, length: {:#x}",
            description,
            LittleEndian::read_u64(&tail[0..8]),
            LittleEndian::read_u64(&tail[8..16])
        )
    }
}
