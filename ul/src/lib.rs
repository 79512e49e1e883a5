//! This crate implements the DICOM upper layer protocol
//! and the exchange of DIMSE messages on top of it.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   along with their binary encoding and decoding.
//! - The [`association`] module
//!   drives the association state machine,
//!   for both the requesting and the accepting application entity.
//! - The [`dimse`] module
//!   fragments and reassembles DIMSE messages
//!   and dispatches requests to service handlers.
//! - The [`transport`] module
//!   abstracts the byte stream underneath an association.
//!
//! # Example
//!
//! ```no_run
//! # use dicom_dul::ClientAssociationOptions;
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut association = ClientAssociationOptions::new()
//!     .with_abstract_syntax("1.2.840.10008.1.1")
//!     .called_ae_title("STORE-SCP")
//!     .establish("127.0.0.1:11112")?;
//! let status = association.echo()?;
//! assert_eq!(status, 0);
//! association.release()?;
//! # Ok(())
//! # }
//! ```

pub mod association;
pub mod dimse;
pub mod pdu;
pub mod transport;

/// The implementation class UID of this upper layer implementation.
///
/// Generated as per the standard, part 5, section B.2.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.301480536907621405287318436917248710213";

/// The implementation version name of this upper layer implementation.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOM-DUL 0.1.0";

// re-exports

pub use association::client::ClientAssociationOptions;
pub use association::server::ServerAssociationOptions;
pub use association::{Association, OperationsWindow};
pub use dimse::{Incoming, Message, Response, ServiceHandler};
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
pub use transport::{SocketOptions, TcpTransport, Transport};
