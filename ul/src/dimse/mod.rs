//! DIMSE message exchange over an established association.
//!
//! A [`Message`] is a command set with an optional data set,
//! bound to one presentation context.
//! [`Association::send_message`] fragments it
//! into as many P-DATA-TF PDUs as the peer's maximum PDU length requires,
//! and [`Association::receive_message`] puts the fragments back together.
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use snafu::{OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::association::{
    Association, CodecSnafu, MissingCommandFieldSnafu, OperationsWindowExceededSnafu,
    ProtocolViolationSnafu, Result, UnacceptedPresentationContextSnafu,
};
use crate::pdu::{AbortRQ, AbortRQServiceProviderReason, Pdu};
use crate::transport::Transport;

pub mod codec;
pub mod commands;
pub mod pdata;
pub mod service;

pub use codec::{DataSetCodec, DicomObjectCodec};
pub use commands::{status, CommandField, Priority};
pub use service::{Response, ServiceHandler, VerificationHandler};

use pdata::Assembled;

/// A DIMSE message: a command set
/// and the data set announced by it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// the presentation context of the message
    pub presentation_context_id: u8,
    /// the command set
    pub command: InMemDicomObject,
    /// the data set following the command, if any
    pub data_set: Option<InMemDicomObject>,
}

fn command_u16(command: &InMemDicomObject, tag: dicom_core::Tag) -> Option<u16> {
    command.get(tag)?.to_int::<u16>().ok()
}

/// Whether the Command Data Set Type of a command announces a data set.
pub fn command_has_data_set(command: &InMemDicomObject) -> bool {
    command_u16(command, tags::COMMAND_DATA_SET_TYPE)
        .map_or(false, |value| value != commands::NO_DATA_SET)
}

impl Message {
    pub fn new(
        presentation_context_id: u8,
        command: InMemDicomObject,
        data_set: Option<InMemDicomObject>,
    ) -> Self {
        Message {
            presentation_context_id,
            command,
            data_set,
        }
    }

    /// The raw value of the Command Field.
    pub fn command_field_code(&self) -> Option<u16> {
        command_u16(&self.command, tags::COMMAND_FIELD)
    }

    /// The Command Field, if it holds a known value.
    pub fn command_field(&self) -> Option<CommandField> {
        self.command_field_code().and_then(CommandField::from_code)
    }

    /// The Message ID of a request.
    pub fn message_id(&self) -> Option<u16> {
        command_u16(&self.command, tags::MESSAGE_ID)
    }

    /// The Message ID Being Responded To of a response.
    pub fn message_id_being_responded_to(&self) -> Option<u16> {
        command_u16(&self.command, tags::MESSAGE_ID_BEING_RESPONDED_TO)
    }

    /// The Status of a response.
    pub fn status(&self) -> Option<u16> {
        command_u16(&self.command, tags::STATUS)
    }

    /// Whether the command announces a data set.
    pub fn has_data_set(&self) -> bool {
        command_has_data_set(&self.command)
    }
}

/// The outcome of waiting for the next message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A complete message was received.
    Message(Message),
    /// The remote node released the association,
    /// and the release was answered.
    Released,
}

impl<T> Association<T>
where
    T: Transport,
{
    /// Obtain a fresh message ID for a new request.
    pub fn next_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        // 0 is skipped on wrap-around
        self.next_message_id = id.checked_add(1).unwrap_or(1);
        id
    }

    /// The number of requests sent which still await their final response.
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding
    }

    /// Send a message, with the data set encoded in
    /// the transfer syntax of its presentation context.
    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        self.send_message_with(message, &DicomObjectCodec)
    }

    /// Send a message, encoding the data set with the given codec.
    ///
    /// Requests are counted against the negotiated
    /// maximum number of outstanding operations invoked.
    pub fn send_message_with<C>(&mut self, message: &Message, codec: &C) -> Result<()>
    where
        C: DataSetCodec<DataSet = InMemDicomObject>,
    {
        self.lookup(crate::association::state::Event::PDataLocal)?;
        let id = message.presentation_context_id;
        let transfer_syntax = self
            .presentation_context(id)
            .context(UnacceptedPresentationContextSnafu { id })?
            .transfer_syntax
            .clone()
            .unwrap_or_default();
        let command_field = message
            .command_field()
            .context(MissingCommandFieldSnafu {
                name: "Command Field",
            })?;

        let limit = self.operations_window.max_operations_invoked;
        if command_field.is_request() && limit != 0 && self.outstanding >= usize::from(limit) {
            return OperationsWindowExceededSnafu { limit }.fail();
        }

        if message.has_data_set() != message.data_set.is_some() {
            warn!(
                "Command Data Set Type of {:?} does not match the presence of a data set",
                command_field
            );
        }

        let command = codec::write_command(&message.command).context(CodecSnafu)?;
        let data = message
            .data_set
            .as_ref()
            .map(|data_set| codec.serialize(data_set, &transfer_syntax))
            .transpose()
            .context(CodecSnafu)?;

        for pdu in pdata::fragment(id, &command, data.as_deref(), self.peer_max_pdu_length) {
            if let Pdu::PData { data } = pdu {
                self.send_pdata(data)?;
            }
        }
        debug!("Sent {:?} on presentation context {}", command_field, id);

        if command_field.is_request() {
            self.outstanding += 1;
        }
        Ok(())
    }

    /// Wait for the next complete message.
    ///
    /// A release request from the remote node is answered,
    /// resulting in [`Incoming::Released`].
    pub fn receive_message(&mut self) -> Result<Incoming> {
        self.receive_message_with(&DicomObjectCodec)
    }

    /// Wait for the next complete message,
    /// decoding the data set with the given codec.
    ///
    /// A message which cannot be decoded is reported
    /// as a [`Codec`](crate::association::Error::Codec) error in its turn,
    /// while the association stays established
    /// and the messages received after it remain available.
    pub fn receive_message_with<C>(&mut self, codec: &C) -> Result<Incoming>
    where
        C: DataSetCodec<DataSet = InMemDicomObject>,
    {
        loop {
            if let Some(message) = self.inbox.pop_front() {
                let message = message?;
                self.track_response(&message);
                return Ok(Incoming::Message(message));
            }

            match self.receive()? {
                Pdu::PData { data } => {
                    for value in data {
                        match self.reassembler.push(value) {
                            Ok(Some(assembled)) => self.assembled(assembled, codec),
                            Ok(None) => {}
                            Err(e) => {
                                let state = self.state;
                                self.abort_with(AbortRQ::service_provider(
                                    AbortRQServiceProviderReason::UnexpectedPduParameter,
                                ))?;
                                return ProtocolViolationSnafu {
                                    state,
                                    detail: e.to_string(),
                                }
                                .fail();
                            }
                        }
                    }
                }
                Pdu::ReleaseRQ => {
                    self.respond_release()?;
                    return Ok(Incoming::Released);
                }
                pdu => {
                    let state = self.state;
                    self.abort_with(AbortRQ::service_provider(
                        AbortRQServiceProviderReason::UnexpectedPdu,
                    ))?;
                    return ProtocolViolationSnafu {
                        state,
                        detail: format!("unexpected {}", pdu.short_description()),
                    }
                    .fail();
                }
            }
        }
    }

    fn assembled<C>(&mut self, assembled: Assembled<InMemDicomObject>, codec: &C)
    where
        C: DataSetCodec<DataSet = InMemDicomObject>,
    {
        match assembled {
            Assembled::Command {
                presentation_context_id,
                bytes,
            } => match codec::read_command(&bytes).context(CodecSnafu) {
                Ok(command) if command_has_data_set(&command) => {
                    self.reassembler
                        .await_data_set(presentation_context_id, command);
                }
                Ok(command) => {
                    self.inbox
                        .push_back(Ok(Message::new(presentation_context_id, command, None)));
                }
                Err(e) => {
                    warn!(
                        "Could not read command on presentation context {}: {}",
                        presentation_context_id, e
                    );
                    self.reassembler.discard_data_set(presentation_context_id);
                    self.inbox.push_back(Err(e));
                }
            },
            Assembled::DataSet {
                presentation_context_id,
                command,
                bytes,
            } => {
                let transfer_syntax = self
                    .presentation_context(presentation_context_id)
                    .and_then(|pc| pc.transfer_syntax.clone())
                    .unwrap_or_default();
                let message = codec
                    .deserialize(&bytes, &transfer_syntax)
                    .context(CodecSnafu)
                    .map(|data_set| {
                        Message::new(presentation_context_id, command, Some(data_set))
                    });
                if let Err(e) = &message {
                    warn!(
                        "Could not read data set on presentation context {}: {}",
                        presentation_context_id, e
                    );
                }
                self.inbox.push_back(message);
            }
        }
    }

    /// Settle an outstanding request once its final response arrives.
    fn track_response(&mut self, message: &Message) {
        let is_response = message
            .command_field()
            .map_or(false, CommandField::is_response);
        let is_final = !message.status().map_or(false, status::is_pending);
        if is_response && is_final {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{dicom_value, DataElement, VR};

    fn command(command_field: u16, data_set_type: u16) -> InMemDicomObject {
        InMemDicomObject::command_from_element_iter([
            DataElement::new(
                tags::COMMAND_FIELD,
                VR::US,
                dicom_value!(U16, [command_field]),
            ),
            DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [42])),
            DataElement::new(
                tags::COMMAND_DATA_SET_TYPE,
                VR::US,
                dicom_value!(U16, [data_set_type]),
            ),
        ])
    }

    #[test]
    fn message_accessors() {
        let message = Message::new(1, command(0x0001, commands::DATA_SET_PRESENT), None);
        assert_eq!(message.command_field(), Some(CommandField::CStoreRq));
        assert_eq!(message.message_id(), Some(42));
        assert!(message.has_data_set());
        assert_eq!(message.status(), None);

        let message = Message::new(1, command(0x0030, commands::NO_DATA_SET), None);
        assert_eq!(message.command_field(), Some(CommandField::CEchoRq));
        assert!(!message.has_data_set());
    }

    #[test]
    fn missing_data_set_type_means_no_data_set() {
        let command = InMemDicomObject::command_from_element_iter([DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [0x0030]),
        )]);
        assert!(!command_has_data_set(&command));
    }
}
