use crate::parser::DescriptionParser;

/// S-CRTM version: a NUL terminated UTF-16LE string.
pub struct EvCrtmVersionParser;

impl DescriptionParser for EvCrtmVersionParser {
    fn parse_description(&self, data: &[u8]) -> String {
        if data.len() % 2 != 0 {
            return hex::encode(data);
        }
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        String::from_utf16(&units).unwrap_or_else(|_| hex::encode(data))
    }
}
