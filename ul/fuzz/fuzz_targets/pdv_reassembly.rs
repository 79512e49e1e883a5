#![no_main]
use dicom_dul::dimse::pdata::{Assembled, Reassembler};
use dicom_dul::pdu::{PDataValue, PDataValueType};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u8, Vec<(u8, bool, bool, Vec<u8>)>)| {
    let (window, fragments) = input;
    let mut reassembler: Reassembler<()> = Reassembler::new(vec![1, 3, 5], u16::from(window));

    for (presentation_context_id, is_command, is_last, data) in fragments {
        let value = PDataValue {
            presentation_context_id,
            value_type: if is_command {
                PDataValueType::Command
            } else {
                PDataValueType::Data
            },
            is_last,
            data,
        };
        match reassembler.push(value) {
            // an empty command stands for one that could not be read
            Ok(Some(Assembled::Command {
                presentation_context_id,
                bytes,
            })) if bytes.is_empty() => reassembler.discard_data_set(presentation_context_id),
            Ok(Some(Assembled::Command {
                presentation_context_id,
                ..
            })) => reassembler.await_data_set(presentation_context_id, ()),
            Ok(_) => {}
            // the association would be aborted here
            Err(_) => return,
        }
    }
});
