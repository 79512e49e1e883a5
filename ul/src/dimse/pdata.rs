//! Fragmentation of DIMSE messages into P-DATA-TF PDUs,
//! and their reassembly on the receiving end.
use std::collections::HashMap;

use bytes::BytesMut;
use snafu::{ensure, Backtrace, Snafu};

use crate::pdu::{PDataValue, PDataValueType, Pdu, MAXIMUM_PDU_SIZE, PDV_HEADER_SIZE};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Presentation context {} was not accepted", id))]
    UnacceptedPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display(
        "Command fragment on presentation context {} interleaved into an incomplete message",
        id
    ))]
    InterleavedCommand { id: u8, backtrace: Backtrace },

    #[snafu(display(
        "Data set fragment on presentation context {} without a preceding command",
        id
    ))]
    UnexpectedDataSet { id: u8, backtrace: Backtrace },

    #[snafu(display("More than {} messages in progress", limit))]
    WindowExceeded { limit: u16, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Split a command and its optional data set into P-DATA-TF PDUs.
///
/// Command fragments come before data set fragments,
/// and the last fragment of each carries the last-fragment bit.
/// Fragments are packed into as few PDUs as possible,
/// without any PDU exceeding `max_pdu_length`
/// (0 stands for the maximum PDU size of the standard).
pub fn fragment(
    presentation_context_id: u8,
    command: &[u8],
    data: Option<&[u8]>,
    max_pdu_length: u32,
) -> Vec<Pdu> {
    let max_pdu_length = if max_pdu_length == 0 {
        MAXIMUM_PDU_SIZE
    } else {
        max_pdu_length
    };
    let mut packer = Packer {
        max_pdu_length: max_pdu_length.max(PDV_HEADER_SIZE + 1) as usize,
        pdus: Vec::new(),
        values: Vec::new(),
        used: 0,
    };
    packer.push_unit(presentation_context_id, PDataValueType::Command, command);
    if let Some(data) = data {
        packer.push_unit(presentation_context_id, PDataValueType::Data, data);
    }
    packer.finish()
}

struct Packer {
    max_pdu_length: usize,
    pdus: Vec<Pdu>,
    values: Vec<PDataValue>,
    used: usize,
}

impl Packer {
    fn push_unit(&mut self, presentation_context_id: u8, value_type: PDataValueType, unit: &[u8]) {
        let header = PDV_HEADER_SIZE as usize;
        let mut rest = unit;
        loop {
            // an empty unit still needs room for one header
            let wanted = header + usize::from(!rest.is_empty());
            if self.max_pdu_length - self.used < wanted {
                self.flush();
            }
            let room = self.max_pdu_length - self.used - header;
            let (chunk, remaining) = rest.split_at(rest.len().min(room));
            let is_last = remaining.is_empty();
            self.values.push(PDataValue {
                presentation_context_id,
                value_type,
                is_last,
                data: chunk.to_vec(),
            });
            self.used += header + chunk.len();
            rest = remaining;
            if is_last {
                break;
            }
        }
    }

    fn flush(&mut self) {
        if !self.values.is_empty() {
            let data = std::mem::take(&mut self.values);
            self.pdus.push(Pdu::PData { data });
        }
        self.used = 0;
    }

    fn finish(mut self) -> Vec<Pdu> {
        self.flush();
        self.pdus
    }
}

/// A unit completed by the [`Reassembler`].
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled<C> {
    /// All fragments of a command were received.
    Command {
        presentation_context_id: u8,
        bytes: Vec<u8>,
    },
    /// All fragments of a data set were received.
    /// Holds the command registered through
    /// [`await_data_set`](Reassembler::await_data_set).
    DataSet {
        presentation_context_id: u8,
        command: C,
        bytes: Vec<u8>,
    },
}

#[derive(Debug)]
enum Slot<C> {
    Command(BytesMut),
    DataSet { command: C, bytes: BytesMut },
    /// data fragments following a command which could not be read
    Discard,
}

/// Collects message fragments per presentation context.
///
/// At most one message may be in progress on each presentation context.
/// A command left waiting for its data set still counts as in progress.
/// Data fragments being discarded do not.
#[derive(Debug)]
pub struct Reassembler<C> {
    accepted: Vec<u8>,
    max_in_progress: u16,
    slots: HashMap<u8, Slot<C>>,
}

impl<C> Default for Reassembler<C> {
    fn default() -> Self {
        Reassembler::new(Vec::new(), 1)
    }
}

impl<C> Reassembler<C> {
    /// Create a reassembler admitting fragments
    /// on the given presentation contexts,
    /// with at most `max_in_progress` incomplete messages (0 for no limit).
    pub fn new(accepted: Vec<u8>, max_in_progress: u16) -> Self {
        Reassembler {
            accepted,
            max_in_progress,
            slots: HashMap::new(),
        }
    }

    /// The number of messages started but not completed.
    pub fn in_progress(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| !matches!(slot, Slot::Discard))
            .count()
    }

    /// Take in one fragment.
    ///
    /// Returns the unit which this fragment completes, if any.
    pub fn push(&mut self, value: PDataValue) -> Result<Option<Assembled<C>>> {
        let id = value.presentation_context_id;
        ensure!(
            self.accepted.contains(&id),
            UnacceptedPresentationContextSnafu { id }
        );

        match value.value_type {
            PDataValueType::Command => {
                match self.slots.get_mut(&id) {
                    Some(Slot::Command(bytes)) => bytes.extend_from_slice(&value.data),
                    Some(Slot::DataSet { .. }) => return InterleavedCommandSnafu { id }.fail(),
                    Some(Slot::Discard) | None => {
                        ensure!(
                            self.max_in_progress == 0
                                || self.in_progress() < usize::from(self.max_in_progress),
                            WindowExceededSnafu {
                                limit: self.max_in_progress
                            }
                        );
                        self.slots
                            .insert(id, Slot::Command(BytesMut::from(&value.data[..])));
                    }
                }
                if !value.is_last {
                    return Ok(None);
                }
                match self.slots.remove(&id) {
                    Some(Slot::Command(bytes)) => Ok(Some(Assembled::Command {
                        presentation_context_id: id,
                        bytes: bytes.to_vec(),
                    })),
                    _ => Ok(None),
                }
            }
            PDataValueType::Data => {
                match self.slots.get_mut(&id) {
                    Some(Slot::DataSet { bytes, .. }) => bytes.extend_from_slice(&value.data),
                    Some(Slot::Discard) => {
                        if value.is_last {
                            self.slots.remove(&id);
                        }
                        return Ok(None);
                    }
                    None | Some(Slot::Command(_)) => return UnexpectedDataSetSnafu { id }.fail(),
                }
                if !value.is_last {
                    return Ok(None);
                }
                match self.slots.remove(&id) {
                    Some(Slot::DataSet { command, bytes }) => Ok(Some(Assembled::DataSet {
                        presentation_context_id: id,
                        command,
                        bytes: bytes.to_vec(),
                    })),
                    _ => Ok(None),
                }
            }
        }
    }

    /// Register a complete command whose data set is still to come.
    pub fn await_data_set(&mut self, presentation_context_id: u8, command: C) {
        self.slots.insert(
            presentation_context_id,
            Slot::DataSet {
                command,
                bytes: BytesMut::new(),
            },
        );
    }

    /// Drop the data fragments which may follow a command
    /// that could not be read.
    ///
    /// Fragments are dropped until the last data fragment
    /// or the next command on the same presentation context.
    pub fn discard_data_set(&mut self, presentation_context_id: u8) {
        self.slots.insert(presentation_context_id, Slot::Discard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::matches;

    fn pdv(id: u8, value_type: PDataValueType, is_last: bool, data: &[u8]) -> PDataValue {
        PDataValue {
            presentation_context_id: id,
            value_type,
            is_last,
            data: data.to_vec(),
        }
    }

    fn values(pdus: &[Pdu]) -> Vec<&PDataValue> {
        pdus.iter()
            .flat_map(|pdu| match pdu {
                Pdu::PData { data } => data.iter(),
                pdu => panic!("Expected PData, got {:?}", pdu),
            })
            .collect()
    }

    fn pdu_length(pdu: &Pdu) -> usize {
        match pdu {
            Pdu::PData { data } => data.iter().map(|v| 6 + v.data.len()).sum(),
            _ => 0,
        }
    }

    #[test]
    fn small_message_fits_in_one_pdu() {
        let pdus = fragment(1, &[1; 80], Some(&[2; 40]), 16_384);
        assert_eq!(pdus.len(), 1);
        let values = values(&pdus);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].value_type, PDataValueType::Command);
        assert!(values[0].is_last);
        assert_eq!(values[1].value_type, PDataValueType::Data);
        assert!(values[1].is_last);
    }

    #[test]
    fn large_data_set_is_split_within_limit() {
        let data: Vec<u8> = (0..200_000u32).map(|x| x as u8).collect();
        let pdus = fragment(3, &[0xAA; 100], Some(&data), 16_384);

        for pdu in &pdus {
            assert!(pdu_length(pdu) <= 16_384);
        }

        let values = values(&pdus);
        let commands: Vec<_> = values
            .iter()
            .filter(|v| v.value_type == PDataValueType::Command)
            .collect();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].is_last);

        let data_values: Vec<_> = values
            .iter()
            .filter(|v| v.value_type == PDataValueType::Data)
            .collect();
        assert_eq!(data_values.iter().filter(|v| v.is_last).count(), 1);
        assert!(data_values.last().unwrap().is_last);

        let joined: Vec<u8> = data_values
            .iter()
            .flat_map(|v| v.data.iter().copied())
            .collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn empty_command_still_yields_a_fragment() {
        let pdus = fragment(1, &[], None, 4096);
        let values = values(&pdus);
        assert_eq!(values.len(), 1);
        assert!(values[0].is_last);
        assert!(values[0].data.is_empty());
    }

    #[test]
    fn zero_max_length_means_maximum_size() {
        let data = vec![0; 200_000];
        let pdus = fragment(1, &[0; 10], Some(&data), 0);
        assert_eq!(pdus.len(), 2);
        assert!(pdu_length(&pdus[0]) <= MAXIMUM_PDU_SIZE as usize);
    }

    #[test]
    fn reassemble_command_then_data_set() {
        let mut reassembler: Reassembler<&str> = Reassembler::new(vec![1], 1);
        assert_eq!(
            reassembler
                .push(pdv(1, PDataValueType::Command, false, &[1, 2]))
                .unwrap(),
            None
        );
        assert_eq!(
            reassembler
                .push(pdv(1, PDataValueType::Command, true, &[3]))
                .unwrap(),
            Some(Assembled::Command {
                presentation_context_id: 1,
                bytes: vec![1, 2, 3],
            })
        );
        reassembler.await_data_set(1, "C-STORE-RQ");
        assert_eq!(reassembler.in_progress(), 1);
        reassembler
            .push(pdv(1, PDataValueType::Data, false, &[9; 4]))
            .unwrap();
        assert_eq!(
            reassembler
                .push(pdv(1, PDataValueType::Data, true, &[8; 2]))
                .unwrap(),
            Some(Assembled::DataSet {
                presentation_context_id: 1,
                command: "C-STORE-RQ",
                bytes: vec![9, 9, 9, 9, 8, 8],
            })
        );
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn refuses_fragments_out_of_place() {
        let mut reassembler: Reassembler<()> = Reassembler::new(vec![1, 3], 0);
        assert!(matches!(
            reassembler.push(pdv(5, PDataValueType::Command, true, &[])),
            Err(Error::UnacceptedPresentationContext { id: 5, .. })
        ));
        assert!(matches!(
            reassembler.push(pdv(1, PDataValueType::Data, true, &[])),
            Err(Error::UnexpectedDataSet { id: 1, .. })
        ));

        reassembler.await_data_set(3, ());
        assert!(matches!(
            reassembler.push(pdv(3, PDataValueType::Command, true, &[])),
            Err(Error::InterleavedCommand { id: 3, .. })
        ));
    }

    #[test]
    fn discarded_data_set_is_drained() {
        let mut reassembler: Reassembler<()> = Reassembler::new(vec![1, 3], 1);
        reassembler.discard_data_set(1);
        assert_eq!(reassembler.in_progress(), 0);

        // other contexts are not held back by the discarded message
        assert!(matches!(
            reassembler.push(pdv(3, PDataValueType::Command, true, &[7])),
            Ok(Some(Assembled::Command { presentation_context_id: 3, .. }))
        ));

        assert_eq!(
            reassembler
                .push(pdv(1, PDataValueType::Data, false, &[0; 8]))
                .unwrap(),
            None
        );
        assert_eq!(
            reassembler
                .push(pdv(1, PDataValueType::Data, true, &[0; 2]))
                .unwrap(),
            None
        );
        assert!(matches!(
            reassembler.push(pdv(1, PDataValueType::Data, true, &[])),
            Err(Error::UnexpectedDataSet { id: 1, .. })
        ));
    }

    #[test]
    fn command_ends_discarding() {
        let mut reassembler: Reassembler<()> = Reassembler::new(vec![1], 1);
        reassembler.discard_data_set(1);
        assert_eq!(
            reassembler
                .push(pdv(1, PDataValueType::Command, true, &[5, 6]))
                .unwrap(),
            Some(Assembled::Command {
                presentation_context_id: 1,
                bytes: vec![5, 6],
            })
        );
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn window_limits_messages_in_progress() {
        let mut reassembler: Reassembler<()> = Reassembler::new(vec![1, 3], 1);
        reassembler
            .push(pdv(1, PDataValueType::Command, false, &[0]))
            .unwrap();
        assert!(matches!(
            reassembler.push(pdv(3, PDataValueType::Command, false, &[0])),
            Err(Error::WindowExceeded { limit: 1, .. })
        ));
    }
}
