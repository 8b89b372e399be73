use bytes::Bytes;

use super::*;
use crate::payload_feedbacks::picture_loss_indication::PictureLossIndication;

fn report() -> Box<dyn Packet + Send + Sync> {
    Box::new(ReceiverReport {
        ssrc: 0x902f9e2e,
        ..Default::default()
    })
}

fn cname() -> Box<dyn Packet + Send + Sync> {
    Box::new(SourceDescription::with_cname(
        0x902f9e2e,
        Bytes::from_static(b"cname@host"),
    ))
}

#[test]
fn test_compound_packet_validate_strict() {
    // leading RR + SDES/CNAME is the canonical minimal compound
    let valid = CompoundPacket(vec![report(), cname()]);
    assert!(valid.validate().is_ok());

    // no leading report
    let bad_first = CompoundPacket(vec![cname(), report()]);
    let got = bad_first.validate();
    assert!(got.is_err());
    assert_eq!(Error::BadFirstPacket, got.err().unwrap());

    // missing CNAME
    let no_cname = CompoundPacket(vec![report()]);
    let got = no_cname.validate();
    assert!(got.is_err());
    assert_eq!(Error::MissingCname, got.err().unwrap());

    // feedback before CNAME
    let fb_first = CompoundPacket(vec![
        report(),
        Box::new(PictureLossIndication {
            sender_ssrc: 1,
            media_ssrc: 2,
        }),
        cname(),
    ]);
    let got = fb_first.validate();
    assert!(got.is_err());
    assert_eq!(Error::PacketBeforeCname, got.err().unwrap());

    // empty
    let empty = CompoundPacket(vec![]);
    let got = empty.validate();
    assert!(got.is_err());
    assert_eq!(Error::EmptyCompound, got.err().unwrap());
}

#[test]
fn test_compound_packet_validate_reduced_size() {
    // a bare BYE is acceptable under reduced-size rules only
    let reduced = CompoundPacket(vec![Box::new(Goodbye {
        sources: vec![0x902f9e2e],
        ..Default::default()
    })]);

    assert!(reduced.validate().is_err());
    assert!(reduced.validate_with(ValidationMode::ReducedSize).is_ok());
}

#[test]
fn test_compound_packet_round_trip() {
    let compound = CompoundPacket(vec![report(), cname()]);

    let data = compound.marshal().expect("marshal");
    compound
        .validate_length(data.len())
        .expect("length accounting");

    let decoded = CompoundPacket::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, compound);
    assert_eq!(decoded.cname().unwrap(), Bytes::from_static(b"cname@host"));
}

#[test]
fn test_compound_packet_has_bye_for() {
    let compound = CompoundPacket(vec![
        report(),
        cname(),
        Box::new(Goodbye {
            sources: vec![0xdeadbeef],
            ..Default::default()
        }),
    ]);

    assert!(compound.has_bye_for(0xdeadbeef));
    assert!(!compound.has_bye_for(0x902f9e2e));
}

#[test]
fn test_compound_packet_length_mismatch() {
    let compound = CompoundPacket(vec![report(), cname()]);
    let data = compound.marshal().expect("marshal");

    let got = compound.validate_length(data.len() + 4);
    assert!(got.is_err());
    assert_eq!(Error::BadCompoundLength, got.err().unwrap());
}
