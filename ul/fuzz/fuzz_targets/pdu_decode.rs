#![no_main]
use std::error::Error;

use dicom_dul::pdu::{MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u32, bool, &[u8])| {
    let (max_pdu_length, strict, data) = input;
    let max_pdu_length = max_pdu_length.clamp(MINIMUM_PDU_SIZE, MAXIMUM_PDU_SIZE);
    let _ = decode_then_encode(max_pdu_length, strict, data);
});

fn decode_then_encode(
    max_pdu_length: u32,
    strict: bool,
    mut data: &[u8],
) -> Result<(), Box<dyn Error>> {
    // anything a remote node sends must either decode or fail cleanly
    let pdu = dicom_dul::pdu::read_pdu(&mut data, max_pdu_length, strict)?;

    // what was decoded can be written back, unless a value does not validate
    let mut bytes = Vec::new();
    dicom_dul::pdu::write_pdu(&mut bytes, &pdu)?;

    let decoded = dicom_dul::pdu::read_pdu(&mut bytes.as_slice(), MAXIMUM_PDU_SIZE, false)
        .expect("an encoded PDU should decode");
    assert_eq!(pdu, decoded, "PDU changed after encoding and decoding");

    Ok(())
}
