use std::io::Cursor;

use bytes::Bytes;

use super::*;

#[test]
fn test_packet_dump_round_trip() {
    let entries = vec![
        CaptureEntry {
            arrival: NtpTime::from_parts(0x83AA7E80, 0),
            payload: Bytes::from_static(&[0x80, 0x60, 0x00, 0x01]),
        },
        CaptureEntry {
            arrival: NtpTime::from_parts(0x83AA7E81, 0x80000000),
            payload: Bytes::from_static(&[0xAA; 100]),
        },
        CaptureEntry {
            arrival: NtpTime::from_parts(0x83AA7E82, 0),
            payload: Bytes::new(),
        },
    ];

    let mut writer = PacketDumpWriter::new(Vec::new());
    for e in &entries {
        writer.write_packet(e.arrival, &e.payload).expect("write");
    }
    let data = writer.into_inner();

    let mut reader = PacketDumpReader::new(Cursor::new(data));
    let decoded = reader.read_all().expect("read_all");
    assert_eq!(decoded, entries);
}

#[test]
fn test_packet_dump_truncated_entry() {
    let mut writer = PacketDumpWriter::new(Vec::new());
    writer
        .write_packet(NtpTime::new(1), &[1, 2, 3, 4])
        .expect("write");
    let mut data = writer.into_inner();
    data.truncate(data.len() - 2);

    let mut reader = PacketDumpReader::new(Cursor::new(data));
    let got = reader.read_packet();
    assert!(matches!(got, Err(Error::TruncatedCaptureEntry)));
}

#[test]
fn test_packet_dump_empty_stream() {
    let mut reader = PacketDumpReader::new(Cursor::new(Vec::<u8>::new()));
    assert!(reader.read_packet().expect("read").is_none());
}

#[test]
fn test_packet_dump_implausible_size() {
    let mut data = Vec::new();
    data.extend_from_slice(&[0u8; 8]); // arrival
    data.extend_from_slice(&u32::MAX.to_be_bytes()); // size

    let mut reader = PacketDumpReader::new(Cursor::new(data));
    let got = reader.read_packet();
    assert!(matches!(got, Err(Error::CaptureEntryTooLarge(_))));
}
