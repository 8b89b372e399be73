use bytes::Bytes;

use super::*;

#[test]
fn test_source_description_wire_form() {
    let data = Bytes::from_static(&[
        0x81, 0xca, 0x0, 0x2, // v=2, p=0, count=1, SDES, len=2
        0x10, 0x20, 0x30, 0x40, // ssrc=0x10203040
        0x01, 0x01, 0x41, 0x00, // CNAME, len=1, text="A", END
    ]);

    let decoded = SourceDescription::unmarshal(&mut data.clone()).expect("unmarshal");
    let want = SourceDescription {
        chunks: vec![SourceDescriptionChunk {
            source: 0x10203040,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::from_static(b"A"),
            }],
        }],
    };
    assert_eq!(decoded, want);

    let encoded = want.marshal().expect("marshal");
    assert_eq!(encoded, data);
}

#[test]
fn test_source_description_all_item_types() {
    let items = vec![
        (SdesType::SdesCname, "host@example.invalid"),
        (SdesType::SdesName, "A Participant"),
        (SdesType::SdesEmail, "a@example.invalid"),
        (SdesType::SdesPhone, "+1 555 0100"),
        (SdesType::SdesLocation, "somewhere"),
        (SdesType::SdesTool, "mprtp"),
        (SdesType::SdesNote, "testing"),
        (SdesType::SdesPrivate, "prefix/value"),
    ];

    let sdes = SourceDescription {
        chunks: vec![SourceDescriptionChunk {
            source: 0xdeadbeef,
            items: items
                .iter()
                .map(|(t, s)| SourceDescriptionItem {
                    sdes_type: *t,
                    text: Bytes::copy_from_slice(s.as_bytes()),
                })
                .collect(),
        }],
    };

    let data = sdes.marshal().expect("marshal");
    let decoded = SourceDescription::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, sdes);
}

#[test]
fn test_source_description_multiple_chunks() {
    let sdes = SourceDescription {
        chunks: vec![
            SourceDescriptionChunk {
                source: 1,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: Bytes::from_static(b"first"),
                }],
            },
            SourceDescriptionChunk {
                source: 2,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesTool,
                    text: Bytes::from_static(b"second"),
                }],
            },
        ],
    };

    let data = sdes.marshal().expect("marshal");
    let decoded = SourceDescription::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, sdes);
    assert_eq!(decoded.destination_ssrc(), vec![1, 2]);
}

#[test]
fn test_source_description_item_missing_type() {
    let item = SourceDescriptionItem {
        sdes_type: SdesType::SdesEnd,
        text: Bytes::new(),
    };
    let got = item.marshal();
    assert!(got.is_err());
    assert_eq!(Error::SdesMissingType, got.err().unwrap());
}

#[test]
fn test_source_description_text_too_long() {
    let item = SourceDescriptionItem {
        sdes_type: SdesType::SdesCname,
        text: Bytes::from(vec![b'x'; 256]),
    };
    let got = item.marshal();
    assert!(got.is_err());
    assert_eq!(Error::SdesTextTooLong, got.err().unwrap());
}

#[test]
fn test_source_description_with_cname() {
    let sdes = SourceDescription::with_cname(42, Bytes::from_static(b"cname@host"));
    assert_eq!(sdes.chunks.len(), 1);
    assert_eq!(sdes.chunks[0].source, 42);
    assert_eq!(sdes.chunks[0].items[0].sdes_type, SdesType::SdesCname);
}
