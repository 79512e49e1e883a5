//! A C-ECHO requestor and acceptor.
//!
//! `dul-echo scu <addr>` verifies that a remote node is reachable,
//! and `dul-echo scp` answers verification requests from any node.
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};
use std::thread;

use clap::{Parser, Subcommand};
use dicom_dictionary_std::uids;
use dicom_dul::dimse::service::echo_request;
use dicom_dul::dimse::{status, CommandField, Incoming, Message, VerificationHandler};
use dicom_dul::{ClientAssociationOptions, ServerAssociationOptions};
use snafu::{whatever, OptionExt, Report, ResultExt, Whatever};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// DICOM C-ECHO requestor and acceptor
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Verbose mode
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a C-ECHO request to a remote node
    Scu {
        /// socket address to the SCP (example: "127.0.0.1:104")
        addr: String,
        /// the calling AE title
        #[arg(long = "calling-ae-title", default_value = "ECHO-SCU")]
        calling_ae_title: String,
        /// the called AE title
        #[arg(long = "called-ae-title", default_value = "ANY-SCP")]
        called_ae_title: String,
        /// the C-ECHO message ID
        #[arg(short = 'm', long = "message-id", default_value = "1")]
        message_id: u16,
        /// the maximum PDU length admitted by this node
        #[arg(long = "max-pdu-length", default_value = "16384")]
        max_pdu_length: u32,
    },
    /// Answer C-ECHO requests from remote nodes
    Scp {
        /// Which port to listen on
        #[arg(short, long, default_value = "11111")]
        port: u16,
        /// the AE title of this node
        #[arg(long = "ae-title", default_value = "ECHO-SCP")]
        ae_title: String,
        /// the maximum PDU length admitted by this node
        #[arg(long = "max-pdu-length", default_value = "16384")]
        max_pdu_length: u32,
        /// Refuse PDUs longer than the maximum PDU length
        #[arg(short = 's', long = "strict")]
        strict: bool,
    },
}

fn main() {
    let app = App::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if app.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            })
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(if app.verbose {
                    "dul_echo=debug,dicom_dul=debug"
                } else {
                    "info"
                })
            }))
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    let outcome = match app.command {
        Command::Scu {
            addr,
            calling_ae_title,
            called_ae_title,
            message_id,
            max_pdu_length,
        } => run_scu(
            &addr,
            &calling_ae_title,
            &called_ae_title,
            message_id,
            max_pdu_length,
        ),
        Command::Scp {
            port,
            ae_title,
            max_pdu_length,
            strict,
        } => run_scp(port, ae_title, max_pdu_length, strict),
    };
    if let Err(e) = outcome {
        error!("{}", Report::from_error(e));
        std::process::exit(-2);
    }
}

fn run_scu(
    addr: &str,
    calling_ae_title: &str,
    called_ae_title: &str,
    message_id: u16,
    max_pdu_length: u32,
) -> Result<(), Whatever> {
    let mut association = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title)
        .called_ae_title(called_ae_title)
        .with_abstract_syntax(uids::VERIFICATION)
        .max_pdu_length(max_pdu_length)
        .establish(addr)
        .whatever_context("Could not establish association")?;
    info!("Association with {} successful", addr);

    let presentation_context_id = association
        .presentation_context_for(uids::VERIFICATION)
        .whatever_context("Verification was not accepted")?
        .id;
    association
        .send_message(&Message::new(
            presentation_context_id,
            echo_request(message_id),
            None,
        ))
        .whatever_context("Could not send C-ECHO request")?;
    debug!(
        "Echo message sent (msg id {}), awaiting reply...",
        message_id
    );

    let response = match association
        .receive_message()
        .whatever_context("Could not receive C-ECHO response")?
    {
        Incoming::Message(message) => message,
        Incoming::Released => whatever!("Association released before the C-ECHO response"),
    };
    if response.command_field() != Some(CommandField::CEchoRsp) {
        whatever!("Unexpected response {:?}", response.command_field());
    }
    if response.message_id_being_responded_to() != Some(message_id) {
        warn!(
            "Response refers to message ID {:?}, expected {}",
            response.message_id_being_responded_to(),
            message_id
        );
    }

    let code = response
        .status()
        .whatever_context("Response has no status")?;
    if code == status::SUCCESS {
        info!("C-ECHO successful");
    } else {
        warn!("C-ECHO completed with status {:04X}H", code);
    }

    association
        .release()
        .whatever_context("Could not release association")?;
    Ok(())
}

fn run_scp(
    port: u16,
    ae_title: String,
    max_pdu_length: u32,
    strict: bool,
) -> Result<(), Whatever> {
    let listen_addr = SocketAddrV4::new(Ipv4Addr::from(0), port);
    let listener = TcpListener::bind(listen_addr)
        .with_whatever_context(|_| format!("Could not listen on {}", listen_addr))?;
    info!("{} listening on: tcp://{}", ae_title, listen_addr);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let ae_title = ae_title.clone();
                thread::spawn(move || {
                    if let Err(e) = serve_echo(stream, &ae_title, max_pdu_length, strict) {
                        error!("{}", Report::from_error(e));
                    }
                });
            }
            Err(e) => {
                error!("{}", Report::from_error(e));
            }
        }
    }
    Ok(())
}

fn serve_echo(
    stream: TcpStream,
    ae_title: &str,
    max_pdu_length: u32,
    strict: bool,
) -> Result<(), Whatever> {
    let peer = stream
        .peer_addr()
        .whatever_context("Could not obtain peer address")?;
    let mut association = ServerAssociationOptions::new()
        .accept_any()
        .ae_title(ae_title)
        .with_abstract_syntax(uids::VERIFICATION)
        .max_pdu_length(max_pdu_length)
        .strict(strict)
        .establish(stream)
        .whatever_context("Could not establish association")?;
    info!(
        "New association from {} ({})",
        association.peer_ae_title(),
        peer
    );

    match association.serve(VerificationHandler) {
        Ok(()) => {
            info!("Released association with {}", association.peer_ae_title());
        }
        Err(e) if e.is_abort() => {
            info!("Association with {} aborted", association.peer_ae_title());
        }
        Err(e) => {
            return Err(e).whatever_context("Failure while serving association");
        }
    }
    Ok(())
}
