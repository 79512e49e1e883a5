//! DICOM association module
//!
//! This module contains the association state machine
//! and the utilities for establishing associations
//! between DICOM nodes.
//!
//! As an association requester, often as a service class user (SCU),
//! a new association can be started
//! via the [`ClientAssociationOptions`][1] type.
//! The minimum required properties are the proposed abstract syntaxes
//! and the TCP socket address to the target node.
//!
//! As an association acceptor,
//! usually taking the role of a service class provider (SCP),
//! a newly accepted [TCP stream][2] can be passed to
//! a previously prepared [`ServerAssociationOptions`][3].
//!
//! Either way, the outcome is an [`Association`],
//! which checks every operation and every incoming PDU
//! against the state transition table in [`state`].
//!
//! [1]: crate::association::client::ClientAssociationOptions
//! [2]: std::net::TcpStream
//! [3]: crate::association::server::ServerAssociationOptions
use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::time::Duration;

use dicom_object::InMemDicomObject;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tracing::{debug, warn};

use crate::dimse::pdata::Reassembler;
use crate::dimse::Message;
use crate::pdu::{
    self, reader, write_pdu, AbortRQ, AbortRQServiceProviderReason, AeTitle, AssociationRJ,
    PDataValue, Pdu, PresentationContextNegotiated, UserVariableItem, MAXIMUM_PDU_SIZE,
    MINIMUM_PDU_SIZE, PDU_HEADER_SIZE,
};
use crate::transport::{TcpTransport, Transport};

pub mod client;
pub mod server;
pub mod state;
pub mod timer;

#[cfg(test)]
mod tests;

pub use client::ClientAssociationOptions;
pub use server::{AcceptAny, AcceptCalledAeTitle, AccessControl, ServerAssociationOptions};
pub use state::{Role, State};

use state::{transition, Action, Event, Transition};
use timer::Artim;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display(
        "{} presentation contexts proposed, at most {} fit the odd context ids",
        count,
        client::MAX_PRESENTATION_CONTEXTS
    ))]
    TooManyPresentationContexts { count: usize, backtrace: Backtrace },

    /// invalid AE title in the association options
    InvalidAeTitle {
        #[snafu(backtrace)]
        source: pdu::ValueError,
    },

    /// could not open the transport connection
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("association rejected: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    /// no presentation contexts accepted by the acceptor
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display("association aborted by the remote node: {}", abort))]
    Aborted { abort: AbortRQ, backtrace: Backtrace },

    #[snafu(display("protocol violation in {}: {}", state, detail))]
    ProtocolViolation {
        state: State,
        detail: String,
        backtrace: Backtrace,
    },

    /// received a malformed PDU
    MalformedPdu {
        #[snafu(backtrace)]
        source: reader::Error,
    },

    /// transport connection failure
    Transport {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// the transport connection was closed by the remote node
    ConnectionClosed { backtrace: Backtrace },

    /// timed out waiting for the remote node
    Timeout { backtrace: Backtrace },

    #[snafu(display("{} is not possible in {}", operation, state))]
    InvalidState {
        state: State,
        operation: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the remote application entity (maximum is {})",
        length,
        maximum
    ))]
    SendTooLongPdu {
        length: usize,
        maximum: u32,
        backtrace: Backtrace,
    },

    /// failed to encode PDU
    SendPdu {
        #[snafu(backtrace)]
        source: pdu::writer::Error,
    },

    /// failed to send PDU on the wire
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to encode or decode a message
    Codec {
        #[snafu(backtrace)]
        source: crate::dimse::codec::Error,
    },

    #[snafu(display("command set has no valid {}", name))]
    MissingCommandField {
        name: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("{} operations already outstanding", limit))]
    OperationsWindowExceeded { limit: u16, backtrace: Backtrace },

    #[snafu(display("presentation context {} was not accepted", id))]
    UnacceptedPresentationContext { id: u8, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the association was aborted by the remote node.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// Whether the remote node did not respond in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Whether the association request was rejected.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }
}

/// The asynchronous operations window (PS3.7 D.3.3.3).
///
/// A value of 0 stands for an unlimited number of operations.
/// Associations which do not negotiate it
/// work with one operation at a time in each direction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OperationsWindow {
    /// maximum number of outstanding operations invoked
    pub max_operations_invoked: u16,
    /// maximum number of outstanding operations performed
    pub max_operations_performed: u16,
}

impl Default for OperationsWindow {
    fn default() -> Self {
        OperationsWindow::new(1, 1)
    }
}

impl OperationsWindow {
    pub fn new(max_operations_invoked: u16, max_operations_performed: u16) -> Self {
        OperationsWindow {
            max_operations_invoked,
            max_operations_performed,
        }
    }

    pub fn unlimited() -> Self {
        OperationsWindow::new(0, 0)
    }

    /// The same window seen from the other node.
    pub fn reversed(self) -> Self {
        OperationsWindow::new(self.max_operations_performed, self.max_operations_invoked)
    }

    /// Find the window proposed in a list of user variables.
    pub fn from_user_variables(user_variables: &[UserVariableItem]) -> Option<Self> {
        user_variables.iter().find_map(|item| match item {
            UserVariableItem::AsyncOperationsWindow {
                max_operations_invoked,
                max_operations_performed,
            } => Some(OperationsWindow::new(
                *max_operations_invoked,
                *max_operations_performed,
            )),
            _ => None,
        })
    }

    /// Narrow this window to what the other side admits.
    pub(crate) fn negotiate(self, admitted: OperationsWindow) -> Self {
        fn lower(a: u16, b: u16) -> u16 {
            match (a, b) {
                (0, x) | (x, 0) => x,
                (a, b) => a.min(b),
            }
        }
        OperationsWindow::new(
            lower(self.max_operations_invoked, admitted.max_operations_invoked),
            lower(self.max_operations_performed, admitted.max_operations_performed),
        )
    }

    pub(crate) fn to_user_variable(self) -> UserVariableItem {
        UserVariableItem::AsyncOperationsWindow {
            max_operations_invoked: self.max_operations_invoked,
            max_operations_performed: self.max_operations_performed,
        }
    }
}

/// Parameters of an association known before it is negotiated.
#[derive(Debug)]
pub(crate) struct Settings {
    pub role: Role,
    pub local_ae_title: AeTitle,
    pub local_max_pdu_length: u32,
    pub strict: bool,
    pub read_timeout: Option<Duration>,
    pub artim_timeout: Duration,
}

/// The outcome of one read from the transport.
enum Received {
    Pdu(Pdu),
    Closed,
    ArtimExpired,
    TimedOut,
    Malformed(reader::Error),
    Failed(std::io::Error),
}

/// A DICOM upper layer association.
///
/// The association owns its transport connection
/// and keeps track of the protocol state.
/// Operations which the current state does not admit
/// fail with [`Error::InvalidState`] before anything is sent,
/// and PDUs which the current state does not expect
/// abort the association.
///
/// When the value falls out of scope,
/// an established association is released if this node requested it,
/// and the transport connection is closed.
#[derive(Debug)]
pub struct Association<T = TcpTransport>
where
    T: Transport,
{
    pub(crate) role: Role,
    pub(crate) state: State,
    pub(crate) transport: T,
    artim: Artim,
    read_timeout: Option<Duration>,
    strict: bool,
    pub(crate) local_ae_title: AeTitle,
    pub(crate) peer_ae_title: Option<AeTitle>,
    pub(crate) local_max_pdu_length: u32,
    pub(crate) peer_max_pdu_length: u32,
    pub(crate) presentation_contexts: Vec<PresentationContextNegotiated>,
    pub(crate) peer_user_variables: Vec<UserVariableItem>,
    pub(crate) operations_window: OperationsWindow,
    pub(crate) next_message_id: u16,
    pub(crate) outstanding: usize,
    pub(crate) reassembler: Reassembler<InMemDicomObject>,
    /// complete messages, and messages which could not be decoded,
    /// in order of arrival
    pub(crate) inbox: VecDeque<Result<Message>>,
    write_buffer: Vec<u8>,
}

impl<T> Association<T>
where
    T: Transport,
{
    pub(crate) fn new(transport: T, settings: Settings) -> Self {
        // 0 means no limit
        let local_max_pdu_length = match settings.local_max_pdu_length {
            0 => MAXIMUM_PDU_SIZE,
            n => n.clamp(MINIMUM_PDU_SIZE, MAXIMUM_PDU_SIZE),
        };
        Association {
            role: settings.role,
            state: State::Idle,
            transport,
            artim: Artim::new(settings.artim_timeout),
            read_timeout: settings.read_timeout,
            strict: settings.strict,
            local_ae_title: settings.local_ae_title,
            peer_ae_title: None,
            local_max_pdu_length,
            peer_max_pdu_length: MAXIMUM_PDU_SIZE,
            presentation_contexts: Vec::new(),
            peer_user_variables: Vec::new(),
            operations_window: OperationsWindow::default(),
            next_message_id: 1,
            outstanding: 0,
            reassembler: Reassembler::default(),
            inbox: VecDeque::new(),
            write_buffer: Vec::new(),
        }
    }

    /// Record the outcome of the negotiation.
    pub(crate) fn set_negotiated(
        &mut self,
        presentation_contexts: Vec<PresentationContextNegotiated>,
        peer_max_pdu_length: u32,
        operations_window: OperationsWindow,
        peer_user_variables: Vec<UserVariableItem>,
    ) {
        // 0 means no limit
        self.peer_max_pdu_length = if peer_max_pdu_length == 0 {
            MAXIMUM_PDU_SIZE
        } else {
            peer_max_pdu_length
        };
        let accepted = presentation_contexts
            .iter()
            .filter(|pc| pc.is_accepted())
            .map(|pc| pc.id)
            .collect();
        self.reassembler =
            Reassembler::new(accepted, operations_window.max_operations_performed);
        self.presentation_contexts = presentation_contexts;
        self.operations_window = operations_window;
        self.peer_user_variables = peer_user_variables;
    }

    /// The role of this node in the association.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The current protocol state.
    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state.is_established()
    }

    /// Obtain a view of all negotiated presentation contexts,
    /// including the rejected ones.
    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    /// Obtain the accepted presentation context with the given ID.
    pub fn presentation_context(&self, id: u8) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts
            .iter()
            .find(|pc| pc.id == id && pc.is_accepted())
    }

    /// Obtain the first accepted presentation context
    /// for the given abstract syntax.
    pub fn presentation_context_for(
        &self,
        abstract_syntax: &str,
    ) -> Option<&PresentationContextNegotiated> {
        let abstract_syntax = pdu::trim_uid(abstract_syntax.into());
        self.presentation_contexts
            .iter()
            .find(|pc| pc.is_accepted() && pc.abstract_syntax == abstract_syntax)
    }

    /// The application entity title of this node.
    pub fn local_ae_title(&self) -> &str {
        self.local_ae_title.as_str()
    }

    /// The application entity title of the remote node.
    pub fn peer_ae_title(&self) -> &str {
        self.peer_ae_title
            .as_ref()
            .map(AeTitle::as_str)
            .unwrap_or_default()
    }

    /// The maximum PDU length that this node admits when reading.
    pub fn local_max_pdu_length(&self) -> u32 {
        self.local_max_pdu_length
    }

    /// The maximum PDU length that the remote node admits.
    pub fn peer_max_pdu_length(&self) -> u32 {
        self.peer_max_pdu_length
    }

    /// The user information sub-items sent by the remote node.
    pub fn peer_user_variables(&self) -> &[UserVariableItem] {
        &self.peer_user_variables
    }

    /// The negotiated operations window,
    /// from the point of view of this node.
    pub fn operations_window(&self) -> OperationsWindow {
        self.operations_window
    }

    /// Obtain access to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    // --- state machine ---

    pub(crate) fn lookup(&self, event: Event) -> Result<Transition> {
        transition(self.state, event, self.role).context(InvalidStateSnafu {
            state: self.state,
            operation: event.name(),
        })
    }

    fn commit(&mut self, event: Event, transition: Transition) {
        debug!(
            state = %self.state,
            event = %event,
            next = %transition.next,
            "{:?}",
            transition.action
        );
        let previous = self.state;
        self.state = transition.next;
        if transition.next.awaits_peer() {
            if previous != transition.next || !self.artim.is_running() {
                self.artim.start();
            }
        } else {
            self.artim.stop();
        }
    }

    pub(crate) fn step(&mut self, event: Event) -> Result<Action> {
        let transition = self.lookup(event)?;
        self.commit(event, transition);
        Ok(transition.action)
    }

    /// Give up the transport connection without any further exchange.
    fn drop_transport(&mut self) {
        if let Err(e) = self.transport.close() {
            debug!("Could not close transport: {}", e);
        }
        self.artim.stop();
        self.state = State::Idle;
    }

    /// Close the transport after an abort,
    /// without waiting for the remote node to close it.
    fn close_after_abort(&mut self) {
        if let Err(e) = self.transport.close() {
            debug!("Could not close transport: {}", e);
        }
        match self.lookup(Event::TransportClosed) {
            Ok(transition) => self.commit(Event::TransportClosed, transition),
            Err(_) => self.drop_transport(),
        }
    }

    // --- wire I/O ---

    fn encode(&mut self, pdu: &Pdu) -> Result<()> {
        self.write_buffer.clear();
        write_pdu(&mut self.write_buffer, pdu).context(SendPduSnafu)
    }

    fn flush_buffer(&mut self) -> Result<()> {
        let outcome = self
            .transport
            .write_all(&self.write_buffer)
            .and_then(|_| self.transport.flush());
        if let Err(e) = outcome {
            self.drop_transport();
            return Err(e).context(WireSendSnafu);
        }
        Ok(())
    }

    pub(crate) fn send_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        self.encode(pdu)?;
        debug!("Sending {}", pdu.short_description());
        self.flush_buffer()
    }

    /// Send a PDU on a connection which is going down anyway.
    fn send_best_effort(&mut self, pdu: &Pdu) {
        if self.encode(pdu).is_ok() {
            debug!("Sending {}", pdu.short_description());
            let outcome = self
                .transport
                .write_all(&self.write_buffer)
                .and_then(|_| self.transport.flush());
            if let Err(e) = outcome {
                debug!("Could not send {}: {}", pdu.short_description(), e);
            }
        }
    }

    fn read_next(&mut self) -> Received {
        if self.artim.is_expired() {
            return Received::ArtimExpired;
        }
        let timeout = match (self.artim.remaining(), self.read_timeout) {
            (Some(artim), Some(read)) => Some(artim.min(read)),
            (artim, read) => artim.or(read),
        };
        // a zero timeout is not admitted by sockets
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        if let Err(e) = self.transport.set_read_timeout(timeout) {
            return Received::Failed(e);
        }

        match reader::read_pdu(&mut self.transport, self.local_max_pdu_length, self.strict) {
            Ok(pdu) => Received::Pdu(pdu),
            Err(reader::Error::NoPduAvailable { .. }) => Received::Closed,
            Err(e) => match e.io_error_kind() {
                Some(ErrorKind::WouldBlock) | Some(ErrorKind::TimedOut) => {
                    if self.artim.is_expired() {
                        Received::ArtimExpired
                    } else {
                        Received::TimedOut
                    }
                }
                _ => match e {
                    reader::Error::ReadPdu { source, .. } => Received::Failed(source),
                    e => Received::Malformed(e),
                },
            },
        }
    }

    /// Wait for the next PDU and run the action
    /// which the state machine assigns to it.
    ///
    /// Returns the PDU if it is meant for the caller,
    /// or `None` if the transport was closed as expected
    /// while awaiting its closure.
    pub(crate) fn receive_pdu(&mut self) -> Result<Option<Pdu>> {
        loop {
            let mut malformed = None;
            let (event, pdu) = match self.read_next() {
                Received::Pdu(pdu) => {
                    debug!("Received {}", pdu.short_description());
                    (Event::from_pdu_type(pdu.pdu_type()), Some(pdu))
                }
                Received::Closed => (Event::TransportClosed, None),
                Received::ArtimExpired => (Event::ArtimExpired, None),
                Received::TimedOut => {
                    if self.lookup(Event::AbortLocal).is_ok() {
                        self.abort_with(AbortRQ::service_user())?;
                    } else {
                        self.drop_transport();
                    }
                    return TimeoutSnafu.fail();
                }
                Received::Malformed(e) => {
                    malformed = Some(e);
                    (Event::InvalidPdu, None)
                }
                Received::Failed(_) if self.state == State::AwaitingTransportClose => {
                    (Event::TransportClosed, None)
                }
                Received::Failed(e) => {
                    self.drop_transport();
                    return Err(e).context(TransportSnafu);
                }
            };

            let previous = self.state;
            let transition = self.lookup(event)?;
            self.commit(event, transition);

            match transition.action {
                Action::Dt2
                | Action::Ar6
                | Action::Ae3
                | Action::Ae6
                | Action::Ar2
                | Action::Ar8
                | Action::Ar10 => return Ok(pdu),
                Action::Ae4 | Action::Ar3 => {
                    if let Err(e) = self.transport.close() {
                        debug!("Could not close transport: {}", e);
                    }
                    return Ok(pdu);
                }
                Action::Ar5 => {
                    if let Err(e) = self.transport.close() {
                        debug!("Could not close transport: {}", e);
                    }
                    return Ok(None);
                }
                Action::Aa2 | Action::Aa3 | Action::Aa4 | Action::Aa5 => {
                    self.drop_transport();
                    return match (pdu, event) {
                        (Some(Pdu::AbortRQ(abort)), _) => AbortedSnafu { abort }.fail(),
                        (_, Event::ArtimExpired) => TimeoutSnafu.fail(),
                        _ => ConnectionClosedSnafu.fail(),
                    };
                }
                Action::Aa6 => {
                    if let Some(pdu) = pdu {
                        warn!(
                            "Ignoring {} while awaiting the transport connection to close",
                            pdu.short_description()
                        );
                    }
                }
                Action::Aa7 => {
                    let reason = provider_reason(malformed.as_ref());
                    self.send_best_effort(&Pdu::AbortRQ(AbortRQ::service_provider(reason)));
                }
                Action::Aa1 | Action::Aa8 => {
                    let reason = match (&pdu, event) {
                        (_, Event::ArtimExpired) => AbortRQServiceProviderReason::ReasonNotSpecified,
                        (Some(_), _) => AbortRQServiceProviderReason::UnexpectedPdu,
                        (None, _) => provider_reason(malformed.as_ref()),
                    };
                    self.send_best_effort(&Pdu::AbortRQ(AbortRQ::service_provider(reason)));
                    self.close_after_abort();
                    return match (malformed, pdu) {
                        (Some(source), _) => Err(source).context(MalformedPduSnafu),
                        (None, Some(pdu)) => ProtocolViolationSnafu {
                            state: previous,
                            detail: format!("unexpected {}", pdu.short_description()),
                        }
                        .fail(),
                        (None, None) => TimeoutSnafu.fail(),
                    };
                }
                action => {
                    // local actions are never assigned to incoming events
                    self.drop_transport();
                    return ProtocolViolationSnafu {
                        state: previous,
                        detail: format!("{:?} on {}", action, event),
                    }
                    .fail();
                }
            }
        }
    }

    /// Wait until the remote node closes the transport connection,
    /// or ARTIM expires.
    pub(crate) fn await_transport_close(&mut self) -> Result<()> {
        while self.state == State::AwaitingTransportClose {
            match self.receive_pdu() {
                Ok(None) => return Ok(()),
                Ok(Some(_)) => {}
                // the connection is gone either way
                Err(Error::Timeout { .. }) | Err(Error::Aborted { .. }) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub(crate) fn abort_with(&mut self, abort: AbortRQ) -> Result<()> {
        match self.step(Event::AbortLocal)? {
            Action::Aa1 => {
                self.send_best_effort(&Pdu::AbortRQ(abort));
                self.close_after_abort();
            }
            _ => self.drop_transport(),
        }
        Ok(())
    }

    // --- primitives ---

    /// Receive the next PDU from the remote node.
    ///
    /// P-DATA-TF PDUs and release requests are handed to the caller.
    /// A release request must be answered with
    /// [`respond_release`](Self::respond_release).
    /// An A-ABORT from the remote node yields [`Error::Aborted`],
    /// and a PDU which is not expected in the current state
    /// aborts the association.
    pub fn receive(&mut self) -> Result<Pdu> {
        if matches!(self.state, State::Idle | State::AwaitingTransportOpen) {
            return InvalidStateSnafu {
                state: self.state,
                operation: "receiving a PDU",
            }
            .fail();
        }
        self.receive_pdu()?.context(ConnectionClosedSnafu)
    }

    /// Send presentation data values in one P-DATA-TF PDU.
    ///
    /// All values must refer to accepted presentation contexts,
    /// and the PDU must fit in the maximum length admitted by the remote node.
    /// Nothing is sent otherwise.
    pub fn send_pdata(&mut self, data: Vec<PDataValue>) -> Result<()> {
        let transition = self.lookup(Event::PDataLocal)?;
        for value in &data {
            let id = value.presentation_context_id;
            if self.presentation_context(id).is_none() {
                return UnacceptedPresentationContextSnafu { id }.fail();
            }
        }
        let pdu = Pdu::PData { data };
        self.encode(&pdu)?;
        let length = self.write_buffer.len() - PDU_HEADER_SIZE as usize;
        if length > self.peer_max_pdu_length as usize {
            return SendTooLongPduSnafu {
                length,
                maximum: self.peer_max_pdu_length,
            }
            .fail();
        }
        self.commit(Event::PDataLocal, transition);
        debug!("Sending {}", pdu.short_description());
        self.flush_buffer()
    }

    /// Gracefully release the association
    /// by exchanging release messages,
    /// then close the transport connection.
    ///
    /// Presentation data received in the meantime is discarded.
    pub fn release(&mut self) -> Result<()> {
        self.step(Event::ReleaseRequestLocal)?;
        self.send_pdu(&Pdu::ReleaseRQ)?;
        loop {
            let pdu = self.receive_pdu()?;
            match self.state {
                State::Idle => return Ok(()),
                State::CollisionRequestorAwaitingLocalResponse => {
                    self.step(Event::ReleaseResponseLocal)?;
                    self.send_pdu(&Pdu::ReleaseRP)?;
                }
                State::CollisionAcceptorAwaitingLocalResponse => {
                    self.step(Event::ReleaseResponseLocal)?;
                    self.send_pdu(&Pdu::ReleaseRP)?;
                    return self.await_transport_close();
                }
                _ => {
                    if let Some(pdu) = pdu {
                        debug!("Discarding {} while releasing", pdu.short_description());
                    }
                }
            }
        }
    }

    /// Answer a release request from the remote node,
    /// then wait for the transport connection to close.
    pub fn respond_release(&mut self) -> Result<()> {
        self.step(Event::ReleaseResponseLocal)?;
        self.send_pdu(&Pdu::ReleaseRP)?;
        if self.state == State::AwaitingTransportClose {
            self.await_transport_close()?;
        }
        Ok(())
    }

    /// Abort the association, then close the transport connection.
    pub fn abort(&mut self) -> Result<()> {
        match self.state {
            State::Idle => InvalidStateSnafu {
                state: self.state,
                operation: "aborting",
            }
            .fail(),
            State::AwaitingAssociateRq | State::AwaitingTransportClose => {
                self.drop_transport();
                Ok(())
            }
            _ => self.abort_with(AbortRQ::service_user()),
        }
    }
}

fn provider_reason(malformed: Option<&reader::Error>) -> AbortRQServiceProviderReason {
    match malformed {
        Some(e) if e.is_unrecognized_pdu() => AbortRQServiceProviderReason::UnrecognizedPdu,
        Some(_) => AbortRQServiceProviderReason::InvalidPduParameter,
        None => AbortRQServiceProviderReason::UnexpectedPdu,
    }
}

impl<T> Drop for Association<T>
where
    T: Transport,
{
    fn drop(&mut self) {
        if self.state.is_established() && self.role == Role::Requestor {
            if let Err(e) = self.release() {
                debug!("Could not release association: {}", e);
            }
        }
        if self.transport.is_open() {
            if let Err(e) = self.transport.close() {
                debug!("Could not close transport: {}", e);
            }
        }
    }
}
