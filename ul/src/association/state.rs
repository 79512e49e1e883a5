//! The association state machine of the upper layer protocol.
//!
//! States, events, and actions follow PS3.8 section 9.2.
//! [`transition`] is the one table deciding
//! which action each event triggers in each state,
//! and which state comes next.
use std::fmt;

/// The state of an association (PS3.8 Table 9-1).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum State {
    /// Sta1: no association and no transport connection
    Idle,
    /// Sta2: transport connection open, awaiting A-ASSOCIATE-RQ
    AwaitingAssociateRq,
    /// Sta3: awaiting the local decision on an association request
    AwaitingLocalAssociateResponse,
    /// Sta4: awaiting the transport connection to open
    AwaitingTransportOpen,
    /// Sta5: awaiting A-ASSOCIATE-AC or A-ASSOCIATE-RJ
    AwaitingAssociateResponse,
    /// Sta6: association established, ready for data transfer
    Established,
    /// Sta7: awaiting A-RELEASE-RP
    AwaitingReleaseResponse,
    /// Sta8: awaiting the local release response
    AwaitingLocalReleaseResponse,
    /// Sta9: release collision, requestor awaiting the local release response
    CollisionRequestorAwaitingLocalResponse,
    /// Sta10: release collision, acceptor awaiting A-RELEASE-RP
    CollisionAcceptorAwaitingResponse,
    /// Sta11: release collision, requestor awaiting A-RELEASE-RP
    CollisionRequestorAwaitingResponse,
    /// Sta12: release collision, acceptor awaiting the local release response
    CollisionAcceptorAwaitingLocalResponse,
    /// Sta13: awaiting the transport connection to close
    AwaitingTransportClose,
}

impl State {
    /// The state number in PS3.8.
    pub fn code(self) -> u8 {
        match self {
            State::Idle => 1,
            State::AwaitingAssociateRq => 2,
            State::AwaitingLocalAssociateResponse => 3,
            State::AwaitingTransportOpen => 4,
            State::AwaitingAssociateResponse => 5,
            State::Established => 6,
            State::AwaitingReleaseResponse => 7,
            State::AwaitingLocalReleaseResponse => 8,
            State::CollisionRequestorAwaitingLocalResponse => 9,
            State::CollisionAcceptorAwaitingResponse => 10,
            State::CollisionRequestorAwaitingResponse => 11,
            State::CollisionAcceptorAwaitingLocalResponse => 12,
            State::AwaitingTransportClose => 13,
        }
    }

    /// Whether the state waits on the remote node,
    /// in which case the ARTIM timer is running.
    pub fn awaits_peer(self) -> bool {
        matches!(
            self,
            State::AwaitingAssociateRq
                | State::AwaitingAssociateResponse
                | State::AwaitingReleaseResponse
                | State::CollisionAcceptorAwaitingResponse
                | State::CollisionRequestorAwaitingResponse
                | State::AwaitingTransportClose
        )
    }

    /// Whether an association request was exchanged
    /// and the association was not terminated yet
    /// (states 3 and 5 to 12).
    pub fn in_association(self) -> bool {
        !matches!(
            self,
            State::Idle
                | State::AwaitingAssociateRq
                | State::AwaitingTransportOpen
                | State::AwaitingTransportClose
        )
    }

    /// Whether data may be exchanged in this state.
    pub fn is_established(self) -> bool {
        self == State::Established
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sta{} ({:?})", self.code(), self)
    }
}

/// An event of the state machine (PS3.8 Table 9-2).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Event {
    /// Evt1: A-ASSOCIATE request (local user)
    AssociateRequestLocal,
    /// Evt2: transport connection confirm
    TransportConfirm,
    /// Evt3: A-ASSOCIATE-AC PDU received
    AssociateAcReceived,
    /// Evt4: A-ASSOCIATE-RJ PDU received
    AssociateRjReceived,
    /// Evt5: transport connection indication
    TransportIndication,
    /// Evt6: A-ASSOCIATE-RQ PDU received
    AssociateRqReceived,
    /// Evt7: A-ASSOCIATE response primitive (accept)
    AssociateAcceptLocal,
    /// Evt8: A-ASSOCIATE response primitive (reject)
    AssociateRejectLocal,
    /// Evt9: P-DATA request primitive
    PDataLocal,
    /// Evt10: P-DATA-TF PDU received
    PDataReceived,
    /// Evt11: A-RELEASE request primitive
    ReleaseRequestLocal,
    /// Evt12: A-RELEASE-RQ PDU received
    ReleaseRqReceived,
    /// Evt13: A-RELEASE-RP PDU received
    ReleaseRpReceived,
    /// Evt14: A-RELEASE response primitive
    ReleaseResponseLocal,
    /// Evt15: A-ABORT request primitive
    AbortLocal,
    /// Evt16: A-ABORT PDU received
    AbortReceived,
    /// Evt17: transport connection closed indication
    TransportClosed,
    /// Evt18: ARTIM timer expired
    ArtimExpired,
    /// Evt19: unrecognized or invalid PDU received
    InvalidPdu,
}

impl Event {
    /// The event number in PS3.8.
    pub fn code(self) -> u8 {
        match self {
            Event::AssociateRequestLocal => 1,
            Event::TransportConfirm => 2,
            Event::AssociateAcReceived => 3,
            Event::AssociateRjReceived => 4,
            Event::TransportIndication => 5,
            Event::AssociateRqReceived => 6,
            Event::AssociateAcceptLocal => 7,
            Event::AssociateRejectLocal => 8,
            Event::PDataLocal => 9,
            Event::PDataReceived => 10,
            Event::ReleaseRequestLocal => 11,
            Event::ReleaseRqReceived => 12,
            Event::ReleaseRpReceived => 13,
            Event::ReleaseResponseLocal => 14,
            Event::AbortLocal => 15,
            Event::AbortReceived => 16,
            Event::TransportClosed => 17,
            Event::ArtimExpired => 18,
            Event::InvalidPdu => 19,
        }
    }

    /// A short name of the event, in terms of the service primitive or PDU.
    pub fn name(self) -> &'static str {
        match self {
            Event::AssociateRequestLocal => "A-ASSOCIATE request",
            Event::TransportConfirm => "transport connection confirm",
            Event::AssociateAcReceived => "A-ASSOCIATE-AC received",
            Event::AssociateRjReceived => "A-ASSOCIATE-RJ received",
            Event::TransportIndication => "transport connection indication",
            Event::AssociateRqReceived => "A-ASSOCIATE-RQ received",
            Event::AssociateAcceptLocal => "A-ASSOCIATE accept",
            Event::AssociateRejectLocal => "A-ASSOCIATE reject",
            Event::PDataLocal => "P-DATA request",
            Event::PDataReceived => "P-DATA-TF received",
            Event::ReleaseRequestLocal => "A-RELEASE request",
            Event::ReleaseRqReceived => "A-RELEASE-RQ received",
            Event::ReleaseRpReceived => "A-RELEASE-RP received",
            Event::ReleaseResponseLocal => "A-RELEASE response",
            Event::AbortLocal => "A-ABORT request",
            Event::AbortReceived => "A-ABORT received",
            Event::TransportClosed => "transport connection closed",
            Event::ArtimExpired => "ARTIM timer expired",
            Event::InvalidPdu => "invalid PDU received",
        }
    }

    /// The event raised by receiving a well-formed PDU of the given type.
    pub fn from_pdu_type(pdu_type: u8) -> Event {
        match pdu_type {
            0x01 => Event::AssociateRqReceived,
            0x02 => Event::AssociateAcReceived,
            0x03 => Event::AssociateRjReceived,
            0x04 => Event::PDataReceived,
            0x05 => Event::ReleaseRqReceived,
            0x06 => Event::ReleaseRpReceived,
            0x07 => Event::AbortReceived,
            _ => Event::InvalidPdu,
        }
    }

    /// Whether the event stands for a PDU arriving from the remote node.
    pub fn is_received_pdu(self) -> bool {
        matches!(
            self,
            Event::AssociateAcReceived
                | Event::AssociateRjReceived
                | Event::AssociateRqReceived
                | Event::PDataReceived
                | Event::ReleaseRqReceived
                | Event::ReleaseRpReceived
                | Event::AbortReceived
                | Event::InvalidPdu
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Evt{} ({})", self.code(), self.name())
    }
}

/// An action of the state machine (PS3.8 Table 9-6 to 9-9).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Action {
    /// Issue a transport connect request
    Ae1,
    /// Send A-ASSOCIATE-RQ
    Ae2,
    /// Issue A-ASSOCIATE confirmation (accept)
    Ae3,
    /// Issue A-ASSOCIATE confirmation (reject) and close the transport
    Ae4,
    /// Accept the transport connection and start ARTIM
    Ae5,
    /// Stop ARTIM and issue A-ASSOCIATE indication
    Ae6,
    /// Send A-ASSOCIATE-AC
    Ae7,
    /// Send A-ASSOCIATE-RJ and start ARTIM
    Ae8,
    /// Send P-DATA-TF
    Dt1,
    /// Issue P-DATA indication
    Dt2,
    /// Send A-RELEASE-RQ
    Ar1,
    /// Issue A-RELEASE indication
    Ar2,
    /// Issue A-RELEASE confirmation and close the transport
    Ar3,
    /// Send A-RELEASE-RP and start ARTIM
    Ar4,
    /// Stop ARTIM
    Ar5,
    /// Issue P-DATA indication while awaiting A-RELEASE-RP
    Ar6,
    /// Send P-DATA-TF while awaiting the local release response
    Ar7,
    /// Issue A-RELEASE indication (release collision)
    Ar8,
    /// Send A-RELEASE-RP (release collision)
    Ar9,
    /// Issue A-RELEASE confirmation (release collision)
    Ar10,
    /// Send A-ABORT (service user) and start ARTIM
    Aa1,
    /// Stop ARTIM and close the transport
    Aa2,
    /// Issue A-ABORT indication and close the transport
    Aa3,
    /// Issue A-P-ABORT indication
    Aa4,
    /// Stop ARTIM
    Aa5,
    /// Ignore the PDU
    Aa6,
    /// Send A-ABORT
    Aa7,
    /// Send A-ABORT (service provider), issue A-P-ABORT indication and start ARTIM
    Aa8,
}

/// The role of this node in the association.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Role {
    /// The node which requested the association
    Requestor,
    /// The node which accepted the association request
    Acceptor,
}

/// The outcome of an event in a given state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Transition {
    pub action: Action,
    pub next: State,
}

/// Look up the action and next state for an event in the given state.
///
/// Returns `None` if the event is not admitted in that state.
/// Only local primitives issued in the wrong state lead to `None`:
/// every PDU arriving while an association is being negotiated or in place
/// has a defined outcome, aborting the association if it is unexpected.
pub fn transition(state: State, event: Event, role: Role) -> Option<Transition> {
    use Action::*;
    use Event::*;
    use State::*;

    let (action, next) = match (state, event) {
        // establishment
        (Idle, AssociateRequestLocal) => (Ae1, AwaitingTransportOpen),
        (Idle, TransportIndication) => (Ae5, AwaitingAssociateRq),
        (AwaitingTransportOpen, TransportConfirm) => (Ae2, AwaitingAssociateResponse),
        (AwaitingTransportOpen, AbortLocal) => (Aa2, Idle),
        (AwaitingTransportOpen, TransportClosed) => (Aa4, Idle),
        (AwaitingAssociateRq, AssociateRqReceived) => (Ae6, AwaitingLocalAssociateResponse),
        (AwaitingAssociateRq, AbortReceived) => (Aa2, Idle),
        (AwaitingAssociateRq, TransportClosed) => (Aa5, Idle),
        (AwaitingAssociateRq, ArtimExpired) => (Aa2, Idle),
        (AwaitingAssociateRq, e) if e.is_received_pdu() => (Aa1, AwaitingTransportClose),
        (AwaitingLocalAssociateResponse, AssociateAcceptLocal) => (Ae7, Established),
        (AwaitingLocalAssociateResponse, AssociateRejectLocal) => (Ae8, AwaitingTransportClose),
        (AwaitingAssociateResponse, AssociateAcReceived) => (Ae3, Established),
        (AwaitingAssociateResponse, AssociateRjReceived) => (Ae4, Idle),

        // data transfer
        (Established, PDataLocal) => (Dt1, Established),
        (Established, PDataReceived) => (Dt2, Established),

        // release
        (Established, ReleaseRequestLocal) => (Ar1, AwaitingReleaseResponse),
        (Established, ReleaseRqReceived) => (Ar2, AwaitingLocalReleaseResponse),
        (AwaitingReleaseResponse, PDataReceived) => (Ar6, AwaitingReleaseResponse),
        (AwaitingReleaseResponse, ReleaseRpReceived) => (Ar3, Idle),
        (AwaitingReleaseResponse, ReleaseRqReceived) => (
            Ar8,
            match role {
                Role::Requestor => CollisionRequestorAwaitingLocalResponse,
                Role::Acceptor => CollisionAcceptorAwaitingResponse,
            },
        ),
        (AwaitingLocalReleaseResponse, PDataLocal) => (Ar7, AwaitingLocalReleaseResponse),
        (AwaitingLocalReleaseResponse, ReleaseResponseLocal) => (Ar4, AwaitingTransportClose),
        (CollisionRequestorAwaitingLocalResponse, ReleaseResponseLocal) => {
            (Ar9, CollisionRequestorAwaitingResponse)
        }
        (CollisionAcceptorAwaitingResponse, ReleaseRpReceived) => {
            (Ar10, CollisionAcceptorAwaitingLocalResponse)
        }
        (CollisionRequestorAwaitingResponse, ReleaseRpReceived) => (Ar3, Idle),
        (CollisionAcceptorAwaitingLocalResponse, ReleaseResponseLocal) => {
            (Ar4, AwaitingTransportClose)
        }

        // closing down
        (AwaitingTransportClose, TransportClosed) => (Ar5, Idle),
        (AwaitingTransportClose, ArtimExpired) => (Aa2, Idle),
        (AwaitingTransportClose, AbortReceived) => (Aa2, Idle),
        (AwaitingTransportClose, AssociateRqReceived) | (AwaitingTransportClose, InvalidPdu) => {
            (Aa7, AwaitingTransportClose)
        }
        (AwaitingTransportClose, e) if e.is_received_pdu() => (Aa6, AwaitingTransportClose),

        // abnormal conditions while negotiating or associated
        (s, ArtimExpired) if s.awaits_peer() => (Aa1, AwaitingTransportClose),
        (s, AbortLocal) if s.in_association() => (Aa1, AwaitingTransportClose),
        (s, AbortReceived) if s.in_association() => (Aa3, Idle),
        (s, TransportClosed) if s.in_association() => (Aa4, Idle),
        (s, e) if s.in_association() && e.is_received_pdu() => (Aa8, AwaitingTransportClose),

        _ => return None,
    };

    Some(Transition { action, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ALL_STATES: [State; 13] = [
        State::Idle,
        State::AwaitingAssociateRq,
        State::AwaitingLocalAssociateResponse,
        State::AwaitingTransportOpen,
        State::AwaitingAssociateResponse,
        State::Established,
        State::AwaitingReleaseResponse,
        State::AwaitingLocalReleaseResponse,
        State::CollisionRequestorAwaitingLocalResponse,
        State::CollisionAcceptorAwaitingResponse,
        State::CollisionRequestorAwaitingResponse,
        State::CollisionAcceptorAwaitingLocalResponse,
        State::AwaitingTransportClose,
    ];

    const RECEIVED: [Event; 8] = [
        Event::AssociateAcReceived,
        Event::AssociateRjReceived,
        Event::AssociateRqReceived,
        Event::PDataReceived,
        Event::ReleaseRqReceived,
        Event::ReleaseRpReceived,
        Event::AbortReceived,
        Event::InvalidPdu,
    ];

    fn next(state: State, event: Event, role: Role) -> Option<(Action, State)> {
        transition(state, event, role).map(|t| (t.action, t.next))
    }

    #[test]
    fn state_codes_are_sequential() {
        for (i, state) in ALL_STATES.iter().enumerate() {
            assert_eq!(state.code() as usize, i + 1);
        }
    }

    #[test]
    fn requestor_happy_path() {
        let role = Role::Requestor;
        assert_eq!(
            next(State::Idle, Event::AssociateRequestLocal, role),
            Some((Action::Ae1, State::AwaitingTransportOpen))
        );
        assert_eq!(
            next(State::AwaitingTransportOpen, Event::TransportConfirm, role),
            Some((Action::Ae2, State::AwaitingAssociateResponse))
        );
        assert_eq!(
            next(State::AwaitingAssociateResponse, Event::AssociateAcReceived, role),
            Some((Action::Ae3, State::Established))
        );
        assert_eq!(
            next(State::Established, Event::PDataLocal, role),
            Some((Action::Dt1, State::Established))
        );
        assert_eq!(
            next(State::Established, Event::ReleaseRequestLocal, role),
            Some((Action::Ar1, State::AwaitingReleaseResponse))
        );
        assert_eq!(
            next(State::AwaitingReleaseResponse, Event::ReleaseRpReceived, role),
            Some((Action::Ar3, State::Idle))
        );
    }

    #[test]
    fn acceptor_happy_path() {
        let role = Role::Acceptor;
        assert_eq!(
            next(State::Idle, Event::TransportIndication, role),
            Some((Action::Ae5, State::AwaitingAssociateRq))
        );
        assert_eq!(
            next(State::AwaitingAssociateRq, Event::AssociateRqReceived, role),
            Some((Action::Ae6, State::AwaitingLocalAssociateResponse))
        );
        assert_eq!(
            next(
                State::AwaitingLocalAssociateResponse,
                Event::AssociateAcceptLocal,
                role
            ),
            Some((Action::Ae7, State::Established))
        );
        assert_eq!(
            next(State::Established, Event::ReleaseRqReceived, role),
            Some((Action::Ar2, State::AwaitingLocalReleaseResponse))
        );
        assert_eq!(
            next(
                State::AwaitingLocalReleaseResponse,
                Event::ReleaseResponseLocal,
                role
            ),
            Some((Action::Ar4, State::AwaitingTransportClose))
        );
        assert_eq!(
            next(State::AwaitingTransportClose, Event::TransportClosed, role),
            Some((Action::Ar5, State::Idle))
        );
    }

    #[test]
    fn release_collision_depends_on_role() {
        assert_eq!(
            next(
                State::AwaitingReleaseResponse,
                Event::ReleaseRqReceived,
                Role::Requestor
            ),
            Some((Action::Ar8, State::CollisionRequestorAwaitingLocalResponse))
        );
        assert_eq!(
            next(
                State::CollisionRequestorAwaitingLocalResponse,
                Event::ReleaseResponseLocal,
                Role::Requestor
            ),
            Some((Action::Ar9, State::CollisionRequestorAwaitingResponse))
        );
        assert_eq!(
            next(
                State::AwaitingReleaseResponse,
                Event::ReleaseRqReceived,
                Role::Acceptor
            ),
            Some((Action::Ar8, State::CollisionAcceptorAwaitingResponse))
        );
        assert_eq!(
            next(
                State::CollisionAcceptorAwaitingResponse,
                Event::ReleaseRpReceived,
                Role::Acceptor
            ),
            Some((Action::Ar10, State::CollisionAcceptorAwaitingLocalResponse))
        );
    }

    #[test]
    fn idle_admits_no_pdu() {
        for event in RECEIVED {
            for role in [Role::Requestor, Role::Acceptor] {
                assert_eq!(next(State::Idle, event, role), None, "{}", event);
            }
        }
    }

    #[test]
    fn association_request_in_established_aborts() {
        assert_eq!(
            next(State::Established, Event::AssociateRqReceived, Role::Acceptor),
            Some((Action::Aa8, State::AwaitingTransportClose))
        );
    }

    #[rstest]
    #[case(State::AwaitingLocalAssociateResponse)]
    #[case(State::AwaitingAssociateResponse)]
    #[case(State::Established)]
    #[case(State::AwaitingReleaseResponse)]
    #[case(State::AwaitingLocalReleaseResponse)]
    #[case(State::CollisionRequestorAwaitingLocalResponse)]
    #[case(State::CollisionAcceptorAwaitingResponse)]
    #[case(State::CollisionRequestorAwaitingResponse)]
    #[case(State::CollisionAcceptorAwaitingLocalResponse)]
    fn every_pdu_has_an_outcome_while_associated(#[case] state: State) {
        for event in RECEIVED {
            let t = transition(state, event, Role::Requestor);
            assert!(t.is_some(), "{} in {}", event, state);
        }
        assert_eq!(
            next(state, Event::AbortReceived, Role::Requestor),
            Some((Action::Aa3, State::Idle))
        );
        assert_eq!(
            next(state, Event::TransportClosed, Role::Requestor),
            Some((Action::Aa4, State::Idle))
        );
        assert_eq!(
            next(state, Event::AbortLocal, Role::Requestor),
            Some((Action::Aa1, State::AwaitingTransportClose))
        );
    }

    #[test]
    fn closing_state_ignores_most_pdus() {
        let s = State::AwaitingTransportClose;
        let role = Role::Acceptor;
        assert_eq!(
            next(s, Event::PDataReceived, role),
            Some((Action::Aa6, s))
        );
        assert_eq!(
            next(s, Event::ReleaseRpReceived, role),
            Some((Action::Aa6, s))
        );
        assert_eq!(
            next(s, Event::AssociateRqReceived, role),
            Some((Action::Aa7, s))
        );
        assert_eq!(
            next(s, Event::AbortReceived, role),
            Some((Action::Aa2, State::Idle))
        );
        assert_eq!(
            next(s, Event::ArtimExpired, role),
            Some((Action::Aa2, State::Idle))
        );
    }

    #[test]
    fn artim_runs_only_while_awaiting_peer() {
        for state in ALL_STATES {
            let expired = transition(state, Event::ArtimExpired, Role::Requestor);
            assert_eq!(expired.is_some(), state.awaits_peer(), "{}", state);
        }
    }

    #[test]
    fn local_primitives_need_the_right_state() {
        for state in ALL_STATES {
            let t = transition(state, Event::PDataLocal, Role::Requestor);
            let admitted = matches!(
                state,
                State::Established | State::AwaitingLocalReleaseResponse
            );
            assert_eq!(t.is_some(), admitted, "{}", state);
        }
        assert_eq!(
            next(State::Idle, Event::ReleaseRequestLocal, Role::Requestor),
            None
        );
        assert_eq!(
            next(State::AwaitingTransportClose, Event::AbortLocal, Role::Requestor),
            None
        );
    }
}
