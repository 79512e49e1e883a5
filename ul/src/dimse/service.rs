//! Serving DIMSE requests through a handler.
//!
//! The acceptor side of a service is a [`ServiceHandler`],
//! invoked once per request.
//! [`Association::serve`] receives requests until the association is released,
//! and answers each one with the handler's [`Response`].
use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::mem::InMemElement;
use dicom_object::InMemDicomObject;
use tracing::{debug, warn};

use super::commands::{self, status, CommandField, Priority};
use super::{Incoming, Message};
use crate::association::{Association, Result};
use crate::pdu::PresentationContextNegotiated;
use crate::transport::Transport;

/// The error type of service handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The outcome of handling one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// the Status (0000,0900) of the response
    pub status: u16,
    /// further command elements of the response
    pub fields: Vec<InMemElement>,
    /// the data set to send along, if any
    pub data_set: Option<InMemDicomObject>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Response {
            status,
            fields: Vec::new(),
            data_set: None,
        }
    }

    pub fn success() -> Self {
        Response::new(status::SUCCESS)
    }

    /// Include an element in the response command.
    pub fn with_field(mut self, element: InMemElement) -> Self {
        self.fields.push(element);
        self
    }

    pub fn with_data_set(mut self, data_set: InMemDicomObject) -> Self {
        self.data_set = Some(data_set);
        self
    }
}

/// A service verb implementation,
/// deciding the response to each request received.
///
/// Implemented for closures of the same signature.
pub trait ServiceHandler {
    fn handle(
        &mut self,
        request: &Message,
        presentation_context: &PresentationContextNegotiated,
    ) -> Result<Response, BoxError>;
}

impl<F> ServiceHandler for F
where
    F: FnMut(&Message, &PresentationContextNegotiated) -> Result<Response, BoxError>,
{
    fn handle(
        &mut self,
        request: &Message,
        presentation_context: &PresentationContextNegotiated,
    ) -> Result<Response, BoxError> {
        self(request, presentation_context)
    }
}

/// A handler answering C-ECHO requests with success
/// and anything else with an unrecognized operation status.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct VerificationHandler;

impl ServiceHandler for VerificationHandler {
    fn handle(
        &mut self,
        request: &Message,
        _presentation_context: &PresentationContextNegotiated,
    ) -> Result<Response, BoxError> {
        match request.command_field() {
            Some(CommandField::CEchoRq) => Ok(Response::success()),
            _ => Ok(Response::new(status::UNRECOGNIZED_OPERATION)),
        }
    }
}

/// Create a C-ECHO-RQ command set.
pub fn echo_request(message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, uids::VERIFICATION),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::CEchoRq.code()]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [commands::NO_DATA_SET]),
        ),
    ])
}

/// Create a request command set for the given service.
pub fn request_command(
    command_field: CommandField,
    sop_class_uid: &str,
    message_id: u16,
    priority: Priority,
    has_data_set: bool,
) -> InMemDicomObject {
    let data_set_type = if has_data_set {
        commands::DATA_SET_PRESENT
    } else {
        commands::NO_DATA_SET
    };
    let mut command = InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [command_field.code()]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [data_set_type]),
        ),
    ]);
    // only composite services carry a priority
    if matches!(
        command_field,
        CommandField::CStoreRq
            | CommandField::CFindRq
            | CommandField::CGetRq
            | CommandField::CMoveRq
    ) {
        command.put(DataElement::new(
            tags::PRIORITY,
            VR::US,
            dicom_value!(U16, [priority.code()]),
        ));
    }
    command
}

/// Build the response command set to a request.
fn response_command(
    request: &Message,
    response_field: CommandField,
    response: &Response,
) -> InMemDicomObject {
    let data_set_type = if response.data_set.is_some() {
        commands::DATA_SET_PRESENT
    } else {
        commands::NO_DATA_SET
    };
    let mut command = InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [response_field.code()]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [request.message_id().unwrap_or_default()]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [data_set_type]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [response.status])),
    ]);
    let sop_class = request
        .command
        .get(tags::AFFECTED_SOP_CLASS_UID)
        .or_else(|| request.command.get(tags::REQUESTED_SOP_CLASS_UID))
        .and_then(|e| e.to_str().ok())
        .map(|uid| uid.trim_end_matches('\0').to_string());
    if let Some(uid) = sop_class {
        command.put(DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, uid),
        ));
    }
    for element in &response.fields {
        command.put(element.clone());
    }
    command
}

/// Maximum length of an LO value.
const ERROR_COMMENT_LENGTH: usize = 64;

fn failure_response(error: &BoxError) -> Response {
    let mut comment = error.to_string();
    if comment.len() > ERROR_COMMENT_LENGTH {
        let mut end = ERROR_COMMENT_LENGTH;
        while !comment.is_char_boundary(end) {
            end -= 1;
        }
        comment.truncate(end);
    }
    Response::new(status::PROCESSING_FAILURE).with_field(DataElement::new(
        tags::ERROR_COMMENT,
        VR::LO,
        dicom_value!(Str, comment),
    ))
}

impl<T> Association<T>
where
    T: Transport,
{
    /// Answer incoming requests with the given handler
    /// until the remote node releases the association.
    ///
    /// Handler failures are reported to the requestor
    /// as a processing failure carrying the error text.
    pub fn serve<H>(&mut self, mut handler: H) -> Result<()>
    where
        H: ServiceHandler,
    {
        loop {
            let request = match self.receive_message()? {
                Incoming::Message(message) => message,
                Incoming::Released => {
                    debug!("Association released by {}", self.peer_ae_title());
                    return Ok(());
                }
            };

            let command_field = match request.command_field() {
                Some(field) => field,
                None => {
                    warn!(
                        "Ignoring message with unknown command field {:?}",
                        request.command_field_code()
                    );
                    continue;
                }
            };
            let Some(response_field) = command_field.response() else {
                debug!("Ignoring {:?}", command_field);
                continue;
            };
            let Some(presentation_context) = self
                .presentation_context(request.presentation_context_id)
                .cloned()
            else {
                continue;
            };

            let response = handler
                .handle(&request, &presentation_context)
                .unwrap_or_else(|e| {
                    warn!("Failed to handle {:?}: {}", command_field, e);
                    failure_response(&e)
                });
            let command = response_command(&request, response_field, &response);
            self.send_message(&Message::new(
                request.presentation_context_id,
                command,
                response.data_set,
            ))?;
        }
    }

    /// Issue a C-ECHO request and wait for its response.
    ///
    /// Returns the status of the response.
    pub fn echo(&mut self) -> Result<u16> {
        let id = self
            .presentation_context_for(uids::VERIFICATION)
            .map(|pc| pc.id)
            .ok_or_else(|| crate::association::MissingAbstractSyntaxSnafu.build())?;
        let message_id = self.next_message_id();
        self.send_message(&Message::new(id, echo_request(message_id), None))?;

        loop {
            match self.receive_message()? {
                Incoming::Message(message)
                    if message.command_field() == Some(CommandField::CEchoRsp)
                        && message.message_id_being_responded_to() == Some(message_id) =>
                {
                    return message.status().ok_or_else(|| {
                        crate::association::MissingCommandFieldSnafu { name: "Status" }.build()
                    });
                }
                Incoming::Message(message) => {
                    warn!(
                        "Ignoring {:?} while awaiting C-ECHO-RSP",
                        message.command_field()
                    );
                }
                Incoming::Released => {
                    return crate::association::ConnectionClosedSnafu.fail();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::PresentationContextResultReason;

    fn verification_context() -> PresentationContextNegotiated {
        PresentationContextNegotiated {
            id: 1,
            reason: PresentationContextResultReason::Acceptance,
            abstract_syntax: uids::VERIFICATION.to_string(),
            transfer_syntax: Some("1.2.840.10008.1.2".to_string()),
        }
    }

    #[test]
    fn echo_request_fields() {
        let message = Message::new(1, echo_request(7), None);
        assert_eq!(message.command_field(), Some(CommandField::CEchoRq));
        assert_eq!(message.message_id(), Some(7));
        assert!(!message.has_data_set());
    }

    #[test]
    fn response_refers_to_request() {
        let request = Message::new(1, echo_request(9), None);
        let command = response_command(&request, CommandField::CEchoRsp, &Response::success());
        let response = Message::new(1, command, None);
        assert_eq!(response.command_field(), Some(CommandField::CEchoRsp));
        assert_eq!(response.message_id_being_responded_to(), Some(9));
        assert_eq!(response.status(), Some(status::SUCCESS));
        assert_eq!(
            response
                .command
                .element(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap()
                .to_str()
                .unwrap()
                .trim_end_matches('\0'),
            uids::VERIFICATION
        );
    }

    #[test]
    fn closures_are_handlers() {
        let mut calls = 0;
        let mut handler = |_: &Message, _: &PresentationContextNegotiated| {
            calls += 1;
            Ok::<_, BoxError>(Response::new(0xA700))
        };
        let request = Message::new(1, echo_request(1), None);
        let response = handler.handle(&request, &verification_context()).unwrap();
        assert_eq!(response.status, 0xA700);
        drop(handler);
        assert_eq!(calls, 1);
    }

    #[test]
    fn handler_failure_carries_error_comment() {
        let error: BoxError = "x".repeat(100).into();
        let response = failure_response(&error);
        assert_eq!(response.status, status::PROCESSING_FAILURE);
        let comment = response.fields[0].to_str().unwrap();
        assert_eq!(comment.len(), 64);
    }

    #[test]
    fn verification_handler() {
        let mut handler = VerificationHandler;
        let request = Message::new(1, echo_request(1), None);
        assert_eq!(
            handler
                .handle(&request, &verification_context())
                .unwrap()
                .status,
            status::SUCCESS
        );
        let request = Message::new(
            1,
            request_command(
                CommandField::CFindRq,
                "1.2.840.10008.5.1.4.1.2.1.1",
                2,
                Priority::Medium,
                true,
            ),
            None,
        );
        assert_eq!(
            handler
                .handle(&request, &verification_context())
                .unwrap()
                .status,
            status::UNRECOGNIZED_OPERATION
        );
    }
}
