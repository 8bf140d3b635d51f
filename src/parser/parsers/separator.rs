use crate::parser::DescriptionParser;

pub struct EvSeparatorParser;

impl DescriptionParser for EvSeparatorParser {
    fn parse_description(&self, data: &[u8]) -> String {
        hex::encode(data)
    }
}
