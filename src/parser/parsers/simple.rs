use crate::parser::DescriptionParser;

pub struct EvSimpleParser;

impl DescriptionParser for EvSimpleParser {
    fn parse_description(&self, data: &[u8]) -> String {
        match std::str::from_utf8(data) {
            Ok(text) => text.trim_end_matches('\0').to_string(),
            Err(_) => hex::encode(data),
        }
    }
}
