//! Human readable rendering of event data, keyed by event type name.

pub mod parsers;
use lazy_static::lazy_static;
use parsers::*;
use std::collections::HashMap;

pub trait DescriptionParser: Sync + Send {
    /// Render `data`. Malformed data renders as hex rather than failing.
    fn parse_description(&self, data: &[u8]) -> String;
}

lazy_static! {
    pub static ref PARSER_MAP: HashMap<&'static str, Box<dyn DescriptionParser>> = {
        let mut map: HashMap<&'static str, Box<dyn DescriptionParser>> = HashMap::new();

        map.insert("EV_SEPARATOR", Box::new(EvSeparatorParser));
        map.insert("EV_S_CRTM_VERSION", Box::new(EvCrtmVersionParser));

        for tag in ["EV_EFI_PLATFORM_FIRMWARE_BLOB", "EV_EFI_HANDOFF_TABLES"] {
            map.insert(tag, Box::new(EvFirmwareBlobParser));
        }

        for tag in ["EV_EFI_HANDOFF_TABLES2", "EV_EFI_PLATFORM_FIRMWARE_BLOB2"] {
            map.insert(tag, Box::new(EvHandoffTableParser));
        }

        for tag in [
            "EV_EFI_ACTION",
            "EV_IPL",
            "EV_POST_CODE",
            "EV_ACTION",
            "EV_PLATFORM_CONFIG_FLAGS",
            "EV_COMPACT_HASH",
            "EV_OMIT_BOOT_DEVICE_EVENTS",
            "EV_EFI_HCRTM_EVENT",
        ] {
            map.insert(tag, Box::new(EvSimpleParser));
        }

        map
    };
}

/// Render the data of an event of type `event_type` (a name from
/// `EVENTLOG_TYPES`).
pub fn describe(event_type: &str, data: &[u8]) -> String {
    match PARSER_MAP.get(event_type) {
        Some(parser) => parser.parse_description(data),
        None => hex::encode(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fv::{encode_firmware_blob2, FirmwareBlob};
    use crate::hob::Guid;

    #[test]
    fn test_describe_known_events() {
        assert_eq!(describe("EV_POST_CODE", b"BL31\0"), "BL31");
        assert_eq!(describe("EV_SEPARATOR", &[0, 0, 0, 0]), "00000000");
        assert_eq!(describe("EV_S_CRTM_VERSION", b"1\0.\00\0\0\0"), "1.0");
        assert_eq!(
            describe(
                "EV_EFI_PLATFORM_FIRMWARE_BLOB",
                &FirmwareBlob::new(0xFF80_0000, 0x1000).encode()
            ),
            "base: 0xff800000, length: 0x1000"
        );

        let name = Guid::new(0x12345678, 0x9abc, 0xdef0, [0, 1, 2, 3, 4, 5, 6, 7]);
        let blob2 = encode_firmware_blob2(Some(name), &FirmwareBlob::new(0x1000, 0x20));
        assert_eq!(
            describe("EV_EFI_PLATFORM_FIRMWARE_BLOB2", &blob2),
            "Fv(12345678-9abc-def0-0001-020304050607), base: 0x1000, length: 0x20"
        );
    }

    #[test]
    fn test_malformed_data_does_not_panic() {
        assert_eq!(describe("EV_EFI_PLATFORM_FIRMWARE_BLOB", &[1, 2, 3]), "010203");
        assert_eq!(describe("EV_EFI_PLATFORM_FIRMWARE_BLOB2", &[200, 1]), "c801");
        assert_eq!(describe("EV_S_CRTM_VERSION", &[0x41]), "41");
        assert_eq!(describe("EV_UNUSED", &[0xab]), "ab");
    }
}
