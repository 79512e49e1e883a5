use std::io::{self, Cursor, Read, Write};
use std::time::Duration;

use dicom_dictionary_std::uids::VERIFICATION;
use matches::matches;

use super::client::MAX_PRESENTATION_CONTEXTS;
use super::*;
use crate::dimse::codec::write_command;
use crate::dimse::service::{echo_request, request_command};
use crate::dimse::{CommandField, Incoming, Priority};
use crate::pdu::{
    read_pdu, AssociationAC, AssociationRQ, PDataValueType, PresentationContextProposed,
    PresentationContextResult, PresentationContextResultReason,
};

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";

/// A transport reading from a prepared sequence of bytes
/// and recording everything written to it.
#[derive(Debug, Default)]
struct MockTransport {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
    open: bool,
}

impl MockTransport {
    fn new(pdus: &[Pdu]) -> Self {
        let mut input = Vec::new();
        for pdu in pdus {
            write_pdu(&mut input, pdu).unwrap();
        }
        MockTransport {
            input: Cursor::new(input),
            output: Vec::new(),
            open: false,
        }
    }

    fn opened(pdus: &[Pdu]) -> Self {
        MockTransport {
            open: true,
            ..Self::new(pdus)
        }
    }

    /// Decode all PDUs written so far.
    fn sent(&self) -> Vec<Pdu> {
        let mut cursor = Cursor::new(&self.output[..]);
        let mut out = Vec::new();
        loop {
            match read_pdu(&mut cursor, MAXIMUM_PDU_SIZE, false) {
                Ok(pdu) => out.push(pdu),
                Err(reader::Error::NoPduAvailable { .. }) => return out,
                Err(e) => panic!("invalid PDU written: {}", e),
            }
        }
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not open"));
        }
        self.input.read(buf)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not open"));
        }
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn open(&mut self, _address: &str) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

fn association_rq(application_context_name: &str) -> Pdu {
    Pdu::AssociationRQ(AssociationRQ {
        protocol_version: 1,
        calling_ae_title: AeTitle::new("THIS-SCU").unwrap(),
        called_ae_title: AeTitle::new("THIS-SCP").unwrap(),
        application_context_name: application_context_name.to_string(),
        presentation_contexts: vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: VERIFICATION.to_string(),
            transfer_syntaxes: vec![IMPLICIT_VR_LE.to_string()],
        }],
        user_variables: vec![UserVariableItem::MaxLength(16384)],
    })
}

fn association_ac(max_pdu_length: u32, accepted: bool) -> Pdu {
    let result = if accepted {
        PresentationContextResult::accepted(1, IMPLICIT_VR_LE)
    } else {
        PresentationContextResult::rejected(
            1,
            PresentationContextResultReason::AbstractSyntaxNotSupported,
        )
    };
    Pdu::AssociationAC(AssociationAC {
        protocol_version: 1,
        calling_ae_title: "THIS-SCU".to_string(),
        called_ae_title: "ANY-SCP".to_string(),
        application_context_name: client::DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![result],
        user_variables: vec![UserVariableItem::MaxLength(max_pdu_length)],
    })
}

fn scp_options() -> ServerAssociationOptions<'static, AcceptAny> {
    ServerAssociationOptions::new().with_abstract_syntax(VERIFICATION)
}

fn scu_options() -> ClientAssociationOptions<'static> {
    ClientAssociationOptions::new().with_abstract_syntax(VERIFICATION)
}

fn command_pdv(data: Vec<u8>) -> PDataValue {
    PDataValue {
        presentation_context_id: 1,
        value_type: PDataValueType::Command,
        is_last: true,
        data,
    }
}

#[test]
fn acceptor_answers_with_association_ac() {
    let transport = MockTransport::opened(&[association_rq(
        client::DICOM_APPLICATION_CONTEXT_NAME,
    )]);
    let association = scp_options().establish_with(transport).unwrap();
    assert_eq!(association.state(), State::Established);
    assert_eq!(association.role(), Role::Acceptor);
    assert_eq!(association.peer_ae_title(), "THIS-SCU");
    assert_eq!(association.peer_max_pdu_length(), 16384);
    assert!(association.presentation_context(1).is_some());
    assert_eq!(association.operations_window(), OperationsWindow::default());

    let sent = association.transport().sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], Pdu::AssociationAC(_)));
}

#[test]
fn association_rq_while_established_aborts() {
    let rq = association_rq(client::DICOM_APPLICATION_CONTEXT_NAME);
    let transport = MockTransport::opened(&[rq.clone(), rq]);
    let mut association = scp_options().establish_with(transport).unwrap();

    let err = association.receive().unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation { state: State::Established, .. }));
    assert_eq!(association.state(), State::Idle);
    assert!(!association.transport().is_open());

    let sent = association.transport().sent();
    assert_eq!(
        sent.last(),
        Some(&Pdu::AbortRQ(AbortRQ::service_provider(
            AbortRQServiceProviderReason::UnexpectedPdu
        )))
    );

    // the association is over
    assert!(matches!(
        association.send_pdata(vec![command_pdv(vec![0; 4])]),
        Err(Error::InvalidState { state: State::Idle, .. })
    ));
    assert!(matches!(
        association.receive(),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn acceptor_release_without_abort() {
    let transport = MockTransport::opened(&[
        association_rq(client::DICOM_APPLICATION_CONTEXT_NAME),
        Pdu::ReleaseRQ,
    ]);
    let mut association = scp_options().establish_with(transport).unwrap();

    assert_eq!(association.receive().unwrap(), Pdu::ReleaseRQ);
    assert_eq!(association.state(), State::AwaitingLocalReleaseResponse);
    association.respond_release().unwrap();
    assert_eq!(association.state(), State::Idle);

    let sent = association.transport().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1], Pdu::ReleaseRP);
}

#[test]
fn rejected_request_awaits_close() {
    let transport = MockTransport::opened(&[association_rq("1.2.3.4")]);
    let err = scp_options().establish_with(transport).unwrap_err();
    match err {
        Error::Rejected { association_rj, .. } => {
            assert_eq!(
                association_rj.source,
                pdu::AssociationRJSource::ServiceUser(
                    pdu::AssociationRJServiceUserReason::ApplicationContextNameNotSupported
                )
            );
        }
        e => panic!("unexpected error {:?}", e),
    }
}

#[test]
fn artim_expiry_while_awaiting_request() {
    let transport = MockTransport::opened(&[]);
    let err = scp_options()
        .artim_timeout(Duration::ZERO)
        .establish_with(transport)
        .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn requestor_establishes_and_releases() {
    let transport = MockTransport::new(&[association_ac(32768, true), Pdu::ReleaseRP]);
    let mut association = scu_options()
        .establish_with(transport, "mock:104")
        .unwrap();
    assert_eq!(association.state(), State::Established);
    assert_eq!(association.role(), Role::Requestor);
    assert_eq!(association.peer_ae_title(), "ANY-SCP");
    assert_eq!(association.local_ae_title(), "THIS-SCU");
    assert_eq!(association.peer_max_pdu_length(), 32768);

    association.release().unwrap();
    assert_eq!(association.state(), State::Idle);
    assert!(!association.transport().is_open());

    let sent = association.transport().sent();
    assert_eq!(sent.len(), 2);
    match &sent[0] {
        Pdu::AssociationRQ(rq) => {
            assert_eq!(rq.presentation_contexts.len(), 1);
            assert_eq!(rq.presentation_contexts[0].id, 1);
            assert!(rq
                .user_variables
                .contains(&UserVariableItem::MaxLength(crate::pdu::DEFAULT_MAX_PDU)));
        }
        pdu => panic!("unexpected {:?}", pdu),
    }
    assert_eq!(sent[1], Pdu::ReleaseRQ);
}

#[test]
fn requestor_without_accepted_contexts_aborts() {
    let transport = MockTransport::new(&[association_ac(16384, false)]);
    let err = scu_options()
        .establish_with(transport, "mock:104")
        .unwrap_err();
    assert!(matches!(err, Error::NoAcceptedPresentationContexts { .. }));
}

#[test]
fn peer_abort_is_reported() {
    let transport = MockTransport::new(&[
        association_ac(16384, true),
        Pdu::AbortRQ(AbortRQ::service_user()),
    ]);
    let mut association = scu_options()
        .establish_with(transport, "mock:104")
        .unwrap();
    let err = association.receive().unwrap_err();
    assert!(err.is_abort());
    assert_eq!(association.state(), State::Idle);
}

#[test]
fn unknown_pdu_type_aborts() {
    let mut transport = MockTransport::new(&[association_ac(16384, true)]);
    transport
        .input
        .get_mut()
        .extend_from_slice(&[0x09, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let mut association = scu_options()
        .establish_with(transport, "mock:104")
        .unwrap();
    let err = association.receive().unwrap_err();
    assert!(matches!(err, Error::MalformedPdu { .. }));
    assert_eq!(
        association.transport().sent().last(),
        Some(&Pdu::AbortRQ(AbortRQ::service_provider(
            AbortRQServiceProviderReason::UnrecognizedPdu
        )))
    );
}

#[test]
fn pdata_checks_happen_before_writing() {
    let transport = MockTransport::new(&[association_ac(4096, true)]);
    let mut association = scu_options()
        .establish_with(transport, "mock:104")
        .unwrap();
    let written = association.transport().output.len();

    let err = association
        .send_pdata(vec![command_pdv(vec![0; 5000])])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::SendTooLongPdu {
            maximum: 4096,
            ..
        }
    ));

    let mut pdv = command_pdv(vec![0; 16]);
    pdv.presentation_context_id = 3;
    let err = association.send_pdata(vec![pdv]).unwrap_err();
    assert!(matches!(err, Error::UnacceptedPresentationContext { id: 3, .. }));

    assert_eq!(association.transport().output.len(), written);
    assert_eq!(association.state(), State::Established);

    association.send_pdata(vec![command_pdv(vec![0; 16])]).unwrap();
    assert!(association.transport().output.len() > written);
}

#[test]
fn local_abort() {
    let transport = MockTransport::new(&[association_ac(16384, true)]);
    let mut association = scu_options()
        .establish_with(transport, "mock:104")
        .unwrap();
    association.abort().unwrap();
    assert_eq!(association.state(), State::Idle);
    assert_eq!(
        association.transport().sent().last(),
        Some(&Pdu::AbortRQ(AbortRQ::service_user()))
    );
    assert!(matches!(
        association.abort(),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn invalid_ae_title_fails_before_connecting() {
    let transport = MockTransport::new(&[]);
    let err = scu_options()
        .calling_ae_title("THIS-AE-TITLE-IS-TOO-LONG")
        .establish_with(transport, "mock:104")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAeTitle { .. }));
}

#[test]
fn missing_abstract_syntax() {
    let err = ClientAssociationOptions::new()
        .establish_with(MockTransport::new(&[]), "mock:104")
        .unwrap_err();
    assert!(matches!(err, Error::MissingAbstractSyntax { .. }));
}

#[test]
fn context_ids_run_out_after_128_proposals() {
    let options = (0..MAX_PRESENTATION_CONTEXTS + 1)
        .fold(ClientAssociationOptions::new(), |options, _| {
            options.with_abstract_syntax(VERIFICATION)
        });
    // an answer is ready, but the request must not get that far
    let transport = MockTransport::new(&[association_ac(16384, true)]);
    let err = options.establish_with(transport, "mock:104").unwrap_err();
    assert!(matches!(
        err,
        Error::TooManyPresentationContexts { count: 129, .. }
    ));
}

#[test]
fn largest_proposal_uses_every_odd_context_id() {
    let options = (0..MAX_PRESENTATION_CONTEXTS)
        .fold(ClientAssociationOptions::new(), |options, _| {
            options.with_abstract_syntax(VERIFICATION)
        });
    let transport = MockTransport::new(&[association_ac(16384, true)]);
    let association = options.establish_with(transport, "mock:104").unwrap();

    let sent = association.transport().sent();
    let ids: Vec<u8> = match &sent[0] {
        Pdu::AssociationRQ(rq) => rq.presentation_contexts.iter().map(|pc| pc.id).collect(),
        pdu => panic!("expected A-ASSOCIATE-RQ, got {:?}", pdu),
    };
    assert_eq!(ids, (1..=255).step_by(2).collect::<Vec<u8>>());
}

#[test]
fn operations_window_negotiation() {
    let w = OperationsWindow::new(0, 5).negotiate(OperationsWindow::new(3, 0));
    assert_eq!(w, OperationsWindow::new(3, 5));
    let w = OperationsWindow::new(2, 7).negotiate(OperationsWindow::new(4, 1));
    assert_eq!(w, OperationsWindow::new(2, 1));
    assert_eq!(
        OperationsWindow::new(1, 2).reversed(),
        OperationsWindow::new(2, 1)
    );
    assert_eq!(
        OperationsWindow::unlimited().negotiate(OperationsWindow::unlimited()),
        OperationsWindow::unlimited()
    );
}

fn data_pdv(data: Vec<u8>) -> PDataValue {
    PDataValue {
        presentation_context_id: 1,
        value_type: PDataValueType::Data,
        is_last: true,
        data,
    }
}

/// (0008,0016) declaring 26 bytes, cut after 3 of them
const TRUNCATED_DATA_SET: [u8; 11] = [
    0x08, 0x00, 0x16, 0x00, 0x1A, 0x00, 0x00, 0x00, b'1', b'.', b'2',
];

fn assert_codec_error_then_echo_then_release(values: Vec<PDataValue>) {
    let transport = MockTransport::new(&[
        association_ac(16384, true),
        Pdu::PData { data: values },
        Pdu::ReleaseRQ,
    ]);
    let mut association = scu_options()
        .establish_with(transport, "mock:104")
        .unwrap();

    let err = association.receive_message().unwrap_err();
    assert!(matches!(err, Error::Codec { .. }));
    assert_eq!(association.state(), State::Established);

    match association.receive_message().unwrap() {
        Incoming::Message(message) => {
            assert_eq!(message.command_field(), Some(CommandField::CEchoRq));
            assert_eq!(message.message_id(), Some(2));
        }
        incoming => panic!("expected C-ECHO-RQ, got {:?}", incoming),
    }
    assert_eq!(association.receive_message().unwrap(), Incoming::Released);

    let sent = association.transport().sent();
    assert!(matches!(sent[..], [Pdu::AssociationRQ(_), Pdu::ReleaseRP]));
}

#[test]
fn undecodable_data_set_keeps_later_messages() {
    let store = request_command(
        CommandField::CStoreRq,
        "1.2.840.10008.5.1.4.1.1.7",
        1,
        Priority::Medium,
        true,
    );
    assert_codec_error_then_echo_then_release(vec![
        command_pdv(write_command(&store).unwrap()),
        data_pdv(TRUNCATED_DATA_SET.to_vec()),
        command_pdv(write_command(&echo_request(2)).unwrap()),
    ]);
}

#[test]
fn data_set_of_undecodable_command_is_dropped() {
    assert_codec_error_then_echo_then_release(vec![
        command_pdv(TRUNCATED_DATA_SET.to_vec()),
        data_pdv(vec![0; 64]),
        command_pdv(write_command(&echo_request(2)).unwrap()),
    ]);
}
