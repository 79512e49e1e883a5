//! Association requester module
//!
//! The module provides the means to request an association
//! from another DICOM node.
//! See [`ClientAssociationOptions`](self::ClientAssociationOptions)
//! for details and examples on how to create an association.
use std::{borrow::Cow, time::Duration};

use snafu::{ensure, OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::{
    pdu::{
        reader::DEFAULT_MAX_PDU, trim_uid, AeTitle, AssociationAC, AssociationRQ, Pdu,
        PresentationContextNegotiated, PresentationContextProposed, UserIdentity,
        UserVariableItem,
    },
    transport::{SocketOptions, TcpTransport, Transport},
    IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};

use super::{
    state::{Event, Role},
    timer::DEFAULT_ARTIM_TIMEOUT,
    Association, ConnectSnafu, ConnectionClosedSnafu, InvalidAeTitleSnafu,
    MissingAbstractSyntaxSnafu, NoAcceptedPresentationContextsSnafu, OperationsWindow,
    ProtocolViolationSnafu, RejectedSnafu, Result, Settings, TooManyPresentationContextsSnafu,
};

/// The application context name of DICOM.
pub const DICOM_APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// How many presentation contexts one association request can propose,
/// given that their ids are the odd numbers from 1 to 255.
pub const MAX_PRESENTATION_CONTEXTS: usize = 128;

/// A DICOM association builder for a client node.
/// The final outcome is an [`Association`] in the requestor role.
///
/// This is the standard way of requesting and establishing
/// an association with another DICOM node,
/// that one usually taking the role of a service class provider (SCP).
///
/// # Example
///
/// ```no_run
/// # use dicom_dul::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///    .with_presentation_context("1.2.840.10008.1.1", vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"])
///    .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
///
/// At least one presentation context must be specified,
/// using the method [`with_presentation_context`](Self::with_presentation_context)
/// and supplying both an abstract syntax and list of transfer syntaxes.
///
/// A helper method [`with_abstract_syntax`](Self::with_abstract_syntax) will
/// include by default the transfer syntaxes
/// _Implicit VR Little Endian_ and _Explicit VR Little Endian_
/// in the resulting presentation context.
///
/// ```no_run
/// # use dicom_dul::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .called_ae_title("STORE-SCP")
///     .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientAssociationOptions<'a> {
    /// the calling AE title
    calling_ae_title: Cow<'a, str>,
    /// the called AE title
    called_ae_title: Cow<'a, str>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the list of requested presentation contexts
    presentation_contexts: Vec<(Cow<'a, str>, Vec<Cow<'a, str>>)>,
    /// the protocol version to request
    protocol_version: u16,
    /// the maximum PDU length requested for receiving PDUs
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// the asynchronous operations window to propose, if any
    operations_window: Option<OperationsWindow>,
    /// SCP/SCU role selection sub-items to propose
    role_selection: Vec<(Cow<'a, str>, bool, bool)>,
    /// the user identity to present
    user_identity: Option<UserIdentity>,
    /// the ARTIM timeout
    artim_timeout: Duration,
    /// options of the TCP socket
    socket_options: SocketOptions,
}

impl<'a> Default for ClientAssociationOptions<'a> {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.into(),
            presentation_contexts: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            operations_window: None,
            role_selection: Vec::new(),
            user_identity: None,
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            socket_options: SocketOptions::default(),
        }
    }
}

impl<'a> ClientAssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the association,
    /// which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the association,
    /// which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    /// Passing an empty string resets the AE title to the default.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let cae = called_ae_title.into();
        self.called_ae_title = if cae.is_empty() { "ANY-SCP".into() } else { cae };
        self
    }

    /// Override the application context name.
    pub fn application_context_name<T>(mut self, name: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.application_context_name = name.into();
        self
    }

    /// Override the protocol version to request.
    pub fn protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    /// Include this presentation context
    /// in the list of proposed presentation contexts.
    pub fn with_presentation_context<T>(
        mut self,
        abstract_syntax_uid: T,
        transfer_syntax_uids: Vec<T>,
    ) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let transfer_syntaxes: Vec<Cow<'a, str>> = transfer_syntax_uids
            .into_iter()
            .map(|t| trim_uid(t.into()))
            .collect();
        self.presentation_contexts
            .push((trim_uid(abstract_syntax_uid.into()), transfer_syntaxes));
        self
    }

    /// Helper to add this abstract syntax
    /// with the default transfer syntaxes
    /// to the list of proposed presentation contexts.
    pub fn with_abstract_syntax<T>(self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let default_transfer_syntaxes: Vec<Cow<'a, str>> =
            vec!["1.2.840.10008.1.2.1".into(), "1.2.840.10008.1.2".into()];
        self.with_presentation_context(abstract_syntax_uid.into(), default_transfer_syntaxes)
    }

    /// Override the maximum PDU length
    /// that this application entity will admit.
    ///
    /// 0 stands for no limit.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Propose an asynchronous operations window.
    ///
    /// Without one, the association works
    /// with one outstanding operation in each direction.
    pub fn operations_window(
        mut self,
        max_operations_invoked: u16,
        max_operations_performed: u16,
    ) -> Self {
        self.operations_window = Some(OperationsWindow::new(
            max_operations_invoked,
            max_operations_performed,
        ));
        self
    }

    /// Propose the roles of this node for the given SOP class.
    pub fn with_role_selection<T>(
        mut self,
        sop_class_uid: T,
        scu_role: bool,
        scp_role: bool,
    ) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.role_selection
            .push((trim_uid(sop_class_uid.into()), scu_role, scp_role));
        self
    }

    /// Present a user identity to the acceptor.
    pub fn user_identity(mut self, user_identity: UserIdentity) -> Self {
        self.user_identity = Some(user_identity);
        self
    }

    /// Override the time to wait on the acceptor
    /// for association and release responses.
    pub fn artim_timeout(mut self, timeout: Duration) -> Self {
        self.artim_timeout = timeout;
        self
    }

    /// Set the maximum time to wait for the TCP connection.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.connection_timeout = Some(timeout);
        self
    }

    /// Set the maximum time to wait on each read
    /// once the association is established.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.read_timeout = Some(timeout);
        self
    }

    /// Set the maximum time to wait on each write.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.socket_options.write_timeout = Some(timeout);
        self
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association,
    /// negotiating the presentation contexts in the process.
    pub fn establish(self, address: &str) -> Result<Association> {
        let transport = TcpTransport::new(self.socket_options);
        self.establish_with(transport, address)
    }

    /// Request a new DICOM association
    /// through the given transport.
    ///
    /// The transport is opened with the given address.
    pub fn establish_with<T>(self, transport: T, address: &str) -> Result<Association<T>>
    where
        T: Transport,
    {
        let ClientAssociationOptions {
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            protocol_version,
            max_pdu_length,
            strict,
            operations_window,
            role_selection,
            user_identity,
            artim_timeout,
            socket_options,
        } = self;

        // presentation contexts represent intent,
        // they should not be omitted by the user
        ensure!(
            !presentation_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );
        ensure!(
            presentation_contexts.len() <= MAX_PRESENTATION_CONTEXTS,
            TooManyPresentationContextsSnafu {
                count: presentation_contexts.len()
            }
        );
        let calling_ae_title = AeTitle::new(calling_ae_title).context(InvalidAeTitleSnafu)?;
        let called_ae_title = AeTitle::new(called_ae_title).context(InvalidAeTitleSnafu)?;

        let count = presentation_contexts.len();
        let proposed = presentation_contexts
            .into_iter()
            .enumerate()
            .map(|(i, (abstract_syntax, transfer_syntaxes))| {
                // odd numbers from 1
                let id = u8::try_from(2 * i + 1)
                    .ok()
                    .context(TooManyPresentationContextsSnafu { count })?;
                Ok(PresentationContextProposed {
                    id,
                    abstract_syntax: abstract_syntax.to_string(),
                    transfer_syntaxes: transfer_syntaxes
                        .iter()
                        .map(|uid| uid.to_string())
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut user_variables = vec![
            UserVariableItem::MaxLength(max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ];
        if let Some(window) = operations_window {
            user_variables.push(window.to_user_variable());
        }
        user_variables.extend(role_selection.into_iter().map(
            |(sop_class_uid, scu_role, scp_role)| UserVariableItem::RoleSelection {
                sop_class_uid: sop_class_uid.to_string(),
                scu_role,
                scp_role,
            },
        ));
        if let Some(user_identity) = user_identity {
            user_variables.push(UserVariableItem::UserIdentityItem(user_identity));
        }

        let request = Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title: calling_ae_title.clone(),
            called_ae_title: called_ae_title.clone(),
            application_context_name: application_context_name.to_string(),
            presentation_contexts: proposed.clone(),
            user_variables,
        });

        let mut association = Association::new(
            transport,
            Settings {
                role: Role::Requestor,
                local_ae_title: calling_ae_title,
                local_max_pdu_length: max_pdu_length,
                strict,
                read_timeout: socket_options.read_timeout,
                artim_timeout,
            },
        );
        association.peer_ae_title = Some(called_ae_title);

        association.step(Event::AssociateRequestLocal)?;
        if let Err(e) = association.transport.open(address) {
            association.step(Event::TransportClosed)?;
            return Err(e).context(ConnectSnafu);
        }
        association.step(Event::TransportConfirm)?;
        association.send_pdu(&request)?;

        match association.receive_pdu()? {
            Some(Pdu::AssociationAC(ac)) => {
                if ac.protocol_version & 1 == 0 {
                    association.abort()?;
                    return ProtocolViolationSnafu {
                        state: association.state,
                        detail: format!("unsupported protocol version {}", ac.protocol_version),
                    }
                    .fail();
                }
                let negotiated = match_results(&proposed, &ac);
                if !negotiated.iter().any(|pc| pc.is_accepted()) {
                    association.abort()?;
                    return NoAcceptedPresentationContextsSnafu.fail();
                }

                let peer_max_pdu_length = ac
                    .user_variables
                    .iter()
                    .find_map(|item| match item {
                        UserVariableItem::MaxLength(len) => Some(*len),
                        _ => None,
                    })
                    .unwrap_or(DEFAULT_MAX_PDU);

                let window = match operations_window {
                    Some(proposed) => OperationsWindow::from_user_variables(&ac.user_variables)
                        .map(|w| proposed.negotiate(w))
                        .unwrap_or_default(),
                    None => OperationsWindow::default(),
                };

                association.set_negotiated(
                    negotiated,
                    peer_max_pdu_length,
                    window,
                    ac.user_variables,
                );
                debug!(
                    "Association established with {}",
                    association.peer_ae_title()
                );
                Ok(association)
            }
            Some(Pdu::AssociationRJ(association_rj)) => RejectedSnafu { association_rj }.fail(),
            Some(pdu) => ProtocolViolationSnafu {
                state: association.state,
                detail: format!("unexpected {}", pdu.short_description()),
            }
            .fail(),
            None => ConnectionClosedSnafu.fail(),
        }
    }
}

/// Pair each proposed presentation context with its result.
///
/// Results for contexts which were never proposed are ignored,
/// and proposed contexts without a result are left out.
fn match_results(
    proposed: &[PresentationContextProposed],
    ac: &AssociationAC,
) -> Vec<PresentationContextNegotiated> {
    let mut negotiated = Vec::with_capacity(ac.presentation_contexts.len());
    for result in &ac.presentation_contexts {
        let Some(pc) = proposed.iter().find(|pc| pc.id == result.id) else {
            warn!(
                "Ignoring result for presentation context {} which was not proposed",
                result.id
            );
            continue;
        };
        let transfer_syntax = result
            .transfer_syntax
            .as_ref()
            .map(|ts| trim_uid(ts.into()).into_owned());
        if let Some(ts) = &transfer_syntax {
            if !pc.transfer_syntaxes.iter().any(|proposed| proposed == ts) {
                warn!(
                    "Presentation context {} accepted with transfer syntax {} which was not proposed",
                    result.id, ts
                );
            }
        }
        negotiated.push(PresentationContextNegotiated {
            id: result.id,
            reason: result.reason,
            abstract_syntax: pc.abstract_syntax.clone(),
            transfer_syntax,
        });
    }
    negotiated
}
