use bytes::Bytes;

use super::*;

#[test]
fn test_ntp_time_extension_round_trip() {
    let ext = NtpTimeExtension {
        timestamp: NtpTime::from_parts(0x83AA7E80, 0x40000000),
    };

    let data = ext.marshal().expect("marshal");
    assert_eq!(
        data,
        Bytes::from_static(&[0x83, 0xAA, 0x7E, 0x80, 0x40, 0x00, 0x00, 0x00])
    );

    let decoded = NtpTimeExtension::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, ext);
}

#[test]
fn test_ntp_time_extension_56_bit_rejected() {
    let mut data = Bytes::from_static(&[0x83, 0xAA, 0x7E, 0x80, 0x40, 0x00, 0x00]);
    let got = NtpTimeExtension::unmarshal(&mut data);
    assert!(got.is_err());
    assert_eq!(Error::ErrNtp56Unsupported, got.err().unwrap());
}

#[test]
fn test_ntp_time_extension_bad_length() {
    let mut data = Bytes::from_static(&[0x83, 0xAA]);
    let got = NtpTimeExtension::unmarshal(&mut data);
    assert!(got.is_err());
    assert_eq!(Error::ErrBadSyncExtensionLength, got.err().unwrap());
}
