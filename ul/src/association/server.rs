//! Acceptor side of association establishment.
//!
//! [`ServerAssociationOptions`] reads one A-ASSOCIATE-RQ,
//! checks it against an [`AccessControl`] policy and the local capabilities,
//! and answers with an A-ASSOCIATE-AC or an A-ASSOCIATE-RJ.
use std::borrow::Cow;
use std::collections::HashSet;
use std::net::TcpStream;
use std::time::Duration;

use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{ensure, ResultExt};
use tracing::debug;

use crate::{
    pdu::{
        reader::DEFAULT_MAX_PDU, trim_uid, AeTitle, AssociationAC, AssociationRJ,
        AssociationRJResult, AssociationRJServiceProviderASCEReason,
        AssociationRJServiceUserReason, AssociationRJSource, AssociationRQ, Pdu,
        PresentationContextNegotiated, PresentationContextProposed, PresentationContextResult,
        PresentationContextResultReason, UserIdentity, UserVariableItem,
    },
    transport::{SocketOptions, TcpTransport, Transport},
    IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};

use super::{
    client::DICOM_APPLICATION_CONTEXT_NAME,
    state::{Event, Role},
    timer::DEFAULT_ARTIM_TIMEOUT,
    Association, ConnectionClosedSnafu, InvalidAeTitleSnafu, MissingAbstractSyntaxSnafu,
    OperationsWindow, ProtocolViolationSnafu, RejectedSnafu, Result, Settings, TransportSnafu,
};

/// Decides whether a requestor may associate with this node.
///
/// The policy sees the local AE title, both AE titles of the request
/// and the user identity negotiation item, if one was sent.
/// A refusal names the reason reported in the A-ASSOCIATE-RJ,
/// which is always sent with source 1 (service user)
/// and result 1 (permanent).
pub trait AccessControl {
    fn check_access(
        &self,
        this_ae_title: &str,
        calling_ae_title: &str,
        called_ae_title: &str,
        user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason>;
}

/// Admits every requestor.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptAny;

impl AccessControl for AcceptAny {
    fn check_access(
        &self,
        _this_ae_title: &str,
        _calling_ae_title: &str,
        _called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        Ok(())
    }
}

/// Admits requests addressed to this node's AE title,
/// refusing others with "called AE title not recognized".
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptCalledAeTitle;

impl AccessControl for AcceptCalledAeTitle {
    fn check_access(
        &self,
        this_ae_title: &str,
        _calling_ae_title: &str,
        called_ae_title: &str,
        _user_identity: Option<&UserIdentity>,
    ) -> Result<(), AssociationRJServiceUserReason> {
        if this_ae_title == called_ae_title {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::CalledAETitleNotRecognized)
        }
    }
}

/// Settings of an association acceptor.
///
/// The same options serve any number of incoming connections,
/// each one yielding an [`Association`] in the acceptor role.
///
/// A proposed presentation context is accepted when its abstract syntax
/// was added with [`with_abstract_syntax`](Self::with_abstract_syntax)
/// (or in [`promiscuous`](Self::promiscuous) mode),
/// picking the first proposed transfer syntax that this node supports.
/// Without any [`with_transfer_syntax`](Self::with_transfer_syntax) call,
/// every transfer syntax of the registry which can be read and written
/// is supported.
///
/// Requestors are admitted by [`AcceptAny`] until another
/// [`AccessControl`] policy is set.
///
/// ```no_run
/// use std::net::TcpListener;
/// use dicom_dul::association::ServerAssociationOptions;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = ServerAssociationOptions::new()
///     .ae_title("STORE-SCP")
///     .accept_called_ae_title()
///     .with_abstract_syntax("1.2.840.10008.1.1");
///
/// let listener = TcpListener::bind("0.0.0.0:11112")?;
/// for stream in listener.incoming() {
///     match options.establish(stream?) {
///         Ok(association) => println!("peer: {}", association.peer_ae_title()),
///         Err(e) => eprintln!("refused: {}", e),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServerAssociationOptions<'a, A> {
    ae_access_control: A,
    ae_title: Cow<'a, str>,
    /// requests naming another application context are refused
    application_context_name: Cow<'a, str>,
    abstract_syntax_uids: Vec<Cow<'a, str>>,
    /// empty for any transfer syntax of the registry
    transfer_syntax_uids: Vec<Cow<'a, str>>,
    /// sent back in the A-ASSOCIATE-AC
    protocol_version: u16,
    max_pdu_length: u32,
    strict: bool,
    promiscuous: bool,
    /// upper bound on what the requestor may propose
    operations_window: OperationsWindow,
    artim_timeout: Duration,
    socket_options: SocketOptions,
}

impl Default for ServerAssociationOptions<'_, AcceptAny> {
    fn default() -> Self {
        ServerAssociationOptions {
            ae_access_control: AcceptAny,
            ae_title: "THIS-SCP".into(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.into(),
            abstract_syntax_uids: Vec::new(),
            transfer_syntax_uids: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            promiscuous: false,
            operations_window: OperationsWindow::default(),
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            socket_options: SocketOptions::default(),
        }
    }
}

impl ServerAssociationOptions<'_, AcceptAny> {
    /// Options admitting any requestor, with no abstract syntax yet.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The outcome of processing an association request.
struct Negotiated {
    presentation_contexts: Vec<PresentationContextNegotiated>,
    peer_max_pdu_length: u32,
    operations_window: OperationsWindow,
    response: AssociationAC,
}

impl<'a, A> ServerAssociationOptions<'a, A>
where
    A: AccessControl,
{
    /// Admit every requestor (the default policy).
    pub fn accept_any(self) -> ServerAssociationOptions<'a, AcceptAny> {
        self.ae_access_control(AcceptAny)
    }

    /// Only admit requests whose called AE title
    /// is the one set with [`ae_title`](Self::ae_title).
    pub fn accept_called_ae_title(self) -> ServerAssociationOptions<'a, AcceptCalledAeTitle> {
        self.ae_access_control(AcceptCalledAeTitle)
    }

    /// Replace the access control policy.
    pub fn ae_access_control<P>(self, access_control: P) -> ServerAssociationOptions<'a, P>
    where
        P: AccessControl,
    {
        let ServerAssociationOptions {
            ae_title,
            application_context_name,
            abstract_syntax_uids,
            transfer_syntax_uids,
            protocol_version,
            max_pdu_length,
            strict,
            promiscuous,
            operations_window,
            artim_timeout,
            ae_access_control: _,
            socket_options,
        } = self;

        ServerAssociationOptions {
            ae_access_control: access_control,
            ae_title,
            application_context_name,
            abstract_syntax_uids,
            transfer_syntax_uids,
            protocol_version,
            max_pdu_length,
            strict,
            promiscuous,
            operations_window,
            artim_timeout,
            socket_options,
        }
    }

    /// The AE title of this node, `THIS-SCP` unless set.
    pub fn ae_title<T>(mut self, ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.ae_title = ae_title.into();
        self
    }

    /// Accept presentation contexts proposing this abstract syntax.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.abstract_syntax_uids
            .push(trim_uid(abstract_syntax_uid.into()));
        self
    }

    /// Restrict the transfer syntaxes accepted to the ones added here.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.transfer_syntax_uids
            .push(trim_uid(transfer_syntax_uid.into()));
        self
    }

    /// The maximum PDU length announced to the requestor.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// In strict mode (the default), incoming PDUs larger than
    /// the announced maximum are treated as malformed.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Accept any abstract syntax, including the ones never added.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    /// Set the largest asynchronous operations window to admit,
    /// from the point of view of this node.
    ///
    /// The default is one operation at a time in each direction.
    pub fn operations_window(
        mut self,
        max_operations_invoked: u16,
        max_operations_performed: u16,
    ) -> Self {
        self.operations_window =
            OperationsWindow::new(max_operations_invoked, max_operations_performed);
        self
    }

    /// Override the time to wait on the requestor
    /// for the association request and the closing of the connection.
    pub fn artim_timeout(mut self, timeout: Duration) -> Self {
        self.artim_timeout = timeout;
        self
    }

    /// Bound each read on an established association.
    ///
    /// A read which times out while established aborts the association.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.read_timeout = Some(timeout);
        self
    }

    /// Bound each write on the socket.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.write_timeout = Some(timeout);
        self
    }

    /// Negotiate an association with the given TCP stream.
    pub fn establish(&self, socket: TcpStream) -> Result<Association> {
        let transport =
            TcpTransport::from_stream(socket, self.socket_options).context(TransportSnafu)?;
        self.establish_with(transport)
    }

    /// Negotiate an association over a transport
    /// which was already opened by the requestor.
    pub fn establish_with<T>(&self, transport: T) -> Result<Association<T>>
    where
        T: Transport,
    {
        ensure!(
            !self.abstract_syntax_uids.is_empty() || self.promiscuous,
            MissingAbstractSyntaxSnafu
        );
        let ae_title = AeTitle::new(self.ae_title.as_ref()).context(InvalidAeTitleSnafu)?;

        let mut association = Association::new(
            transport,
            Settings {
                role: Role::Acceptor,
                local_ae_title: ae_title,
                local_max_pdu_length: self.max_pdu_length,
                strict: self.strict,
                read_timeout: self.socket_options.read_timeout,
                artim_timeout: self.artim_timeout,
            },
        );
        association.step(Event::TransportIndication)?;

        let request = match association.receive_pdu()? {
            Some(Pdu::AssociationRQ(request)) => request,
            Some(pdu) => {
                return ProtocolViolationSnafu {
                    state: association.state,
                    detail: format!("unexpected {}", pdu.short_description()),
                }
                .fail()
            }
            None => return ConnectionClosedSnafu.fail(),
        };
        association.peer_ae_title = Some(request.calling_ae_title.clone());

        match self.process_association_rq(&request) {
            Ok(negotiated) => {
                association.step(Event::AssociateAcceptLocal)?;
                association.send_pdu(&Pdu::AssociationAC(negotiated.response))?;
                association.set_negotiated(
                    negotiated.presentation_contexts,
                    negotiated.peer_max_pdu_length,
                    negotiated.operations_window,
                    request.user_variables,
                );
                debug!(
                    "Association established with {}",
                    association.peer_ae_title()
                );
                Ok(association)
            }
            Err(association_rj) => {
                debug!(
                    "Rejecting association from {}: {}",
                    request.calling_ae_title, association_rj.source
                );
                association.step(Event::AssociateRejectLocal)?;
                association.send_pdu(&Pdu::AssociationRJ(association_rj.clone()))?;
                association.await_transport_close()?;
                RejectedSnafu { association_rj }.fail()
            }
        }
    }

    /// Decide on an association request.
    ///
    /// Returns the association response to send back,
    /// or the reason for rejecting the request.
    fn process_association_rq(
        &self,
        request: &AssociationRQ,
    ) -> std::result::Result<Negotiated, AssociationRJ> {
        if request.protocol_version & 1 == 0 {
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceProviderASCE(
                    AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported,
                ),
            });
        }

        if trim_uid(Cow::from(request.application_context_name.as_str()))
            != self.application_context_name
        {
            return Err(AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
                ),
            });
        }

        let user_identity =
            request
                .user_variables
                .iter()
                .find_map(|user_variable| match user_variable {
                    UserVariableItem::UserIdentityItem(user_identity) => Some(user_identity),
                    _ => None,
                });
        self.ae_access_control
            .check_access(
                &self.ae_title,
                request.calling_ae_title.as_str(),
                request.called_ae_title.as_str(),
                user_identity,
            )
            .map_err(|reason| AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(reason),
            })?;

        // fetch requested maximum PDU length
        let peer_max_pdu_length = request
            .user_variables
            .iter()
            .find_map(|item| match item {
                UserVariableItem::MaxLength(len) => Some(*len),
                _ => None,
            })
            .unwrap_or(DEFAULT_MAX_PDU);

        let mut seen = HashSet::new();
        let presentation_contexts: Vec<_> = request
            .presentation_contexts
            .iter()
            .map(|pc| {
                let fresh = seen.insert(pc.id);
                self.negotiate_presentation_context(pc, fresh)
            })
            .collect();

        let mut user_variables = vec![
            UserVariableItem::MaxLength(self.max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ];

        // the window is answered from the point of view of the requestor
        let requested_window = OperationsWindow::from_user_variables(&request.user_variables);
        let response_window =
            requested_window.map(|window| window.negotiate(self.operations_window.reversed()));
        if let Some(window) = response_window {
            user_variables.push(window.to_user_variable());
        }

        // accept the roles proposed for the SOP classes in use
        for item in &request.user_variables {
            if let UserVariableItem::RoleSelection {
                sop_class_uid,
                scu_role,
                scp_role,
            } = item
            {
                let in_use = presentation_contexts
                    .iter()
                    .any(|pc| pc.is_accepted() && pc.abstract_syntax == *sop_class_uid);
                user_variables.push(UserVariableItem::RoleSelection {
                    sop_class_uid: sop_class_uid.clone(),
                    scu_role: *scu_role && in_use,
                    scp_role: *scp_role && in_use,
                });
            }
        }

        if user_identity.map_or(false, |identity| identity.positive_response_requested()) {
            user_variables.push(UserVariableItem::UserIdentityResponse(Vec::new()));
        }

        let response = AssociationAC {
            protocol_version: self.protocol_version,
            calling_ae_title: request.calling_ae_title.to_string(),
            called_ae_title: request.called_ae_title.to_string(),
            application_context_name: self.application_context_name.to_string(),
            presentation_contexts: presentation_contexts
                .iter()
                .map(|pc| PresentationContextResult {
                    id: pc.id,
                    reason: pc.reason,
                    transfer_syntax: pc.transfer_syntax.clone(),
                })
                .collect(),
            user_variables,
        };

        Ok(Negotiated {
            presentation_contexts,
            peer_max_pdu_length,
            operations_window: response_window.map(OperationsWindow::reversed).unwrap_or_default(),
            response,
        })
    }

    fn negotiate_presentation_context(
        &self,
        pc: &PresentationContextProposed,
        fresh: bool,
    ) -> PresentationContextNegotiated {
        let abstract_syntax = trim_uid(Cow::from(pc.abstract_syntax.as_str()));
        let rejected = |reason| PresentationContextNegotiated {
            id: pc.id,
            reason,
            abstract_syntax: abstract_syntax.to_string(),
            transfer_syntax: None,
        };

        if !fresh || pc.id % 2 == 0 {
            return rejected(PresentationContextResultReason::NoReason);
        }
        if !self.abstract_syntax_uids.contains(&abstract_syntax) && !self.promiscuous {
            return rejected(PresentationContextResultReason::AbstractSyntaxNotSupported);
        }
        match self.choose_ts(&pc.transfer_syntaxes) {
            Some(ts) => PresentationContextNegotiated {
                id: pc.id,
                reason: PresentationContextResultReason::Acceptance,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntax: Some(trim_uid(Cow::from(ts.as_str())).into_owned()),
            },
            None => rejected(PresentationContextResultReason::TransferSyntaxesNotSupported),
        }
    }

    /// The first proposed transfer syntax this node accepts.
    fn choose_ts<I, T>(&self, it: I) -> Option<T>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        it.into_iter().find(|ts| {
            let ts = ts.as_ref();
            is_supported(ts)
                && (self.transfer_syntax_uids.is_empty()
                    || self.transfer_syntax_uids.contains(&trim_uid(ts.into())))
        })
    }
}

/// Whether data sets in this transfer syntax can be both read and written
/// through the transfer syntax registry.
///
/// ```
/// use dicom_dul::association::server::is_supported;
///
/// assert!(is_supported("1.2.840.10008.1.2.1\0"));
/// assert!(!is_supported("1.2.3.4.5"));
/// ```
pub fn is_supported(ts_uid: &str) -> bool {
    TransferSyntaxRegistry
        .get(&trim_uid(ts_uid.into()))
        .map_or(false, |ts| !ts.is_unsupported())
}

/// The first transfer syntax of the sequence that [`is_supported`].
pub fn choose_supported<I, T>(it: I) -> Option<T>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    it.into_iter().find(|ts| is_supported(ts.as_ref()))
}
