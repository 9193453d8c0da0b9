//! GUID parsing and canonical round-trip (spec §8 scenario S3).

use ipc_types::guid::{fnv1a32_guid, Guid};
use ipc_types::IpcError;

#[test]
fn well_formed_guid_parses_and_reprints_canonically() {
    let text = "12345678-1234-1234-1234-123456789abc";
    let guid = Guid::parse(text).unwrap();
    assert_eq!(guid.to_canonical_string().to_lowercase(), text);
}

#[test]
fn braces_and_case_do_not_change_the_method_hash() {
    let plain = fnv1a32_guid("12345678-1234-1234-1234-123456789abc");
    let braced = fnv1a32_guid("{12345678-1234-1234-1234-123456789ABC}");
    assert_eq!(plain, braced);
}

#[test]
fn malformed_guid_text_is_rejected_with_a_typed_error() {
    let too_short = Guid::parse("not-a-guid").unwrap_err();
    assert!(matches!(too_short, IpcError::InvalidStringSize { .. }));

    let bad_hex = Guid::parse("zzzzzzzz-1234-1234-1234-123456789abc").unwrap_err();
    assert!(matches!(bad_hex, IpcError::InvalidString { .. }));
}
