//! Parses the command line arguments.
//!
//! All three binaries share the connection and logging flags; the server
//! adds its storage directory, the clients add the transfer target:
//!
//! ```text
//! server   -H HOST -p PORT -s STORAGE [-r PROTOCOL] [-v|-q] [--log-file PATH]
//! upload   -H HOST -p PORT -d DIR -n NAME [-r PROTOCOL] [-v|-q] [--log-file PATH]
//! download -H HOST -p PORT -d DIR -n NAME [-r PROTOCOL] [-v|-q] [--log-file PATH]
//! ```

use arq_core::ProtocolKind;
use clap::{Args, Parser, ValueEnum};
use std::path::PathBuf;

/// The recovery protocol selector, `SW` or `GBN` in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    #[value(name = "SW")]
    Sw,
    #[value(name = "GBN")]
    Gbn,
}

impl From<Protocol> for ProtocolKind {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Sw => ProtocolKind::StopAndWait,
            Protocol::Gbn => ProtocolKind::GoBackN,
        }
    }
}

/// Flags common to the server and both clients.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// server host
    #[arg(short = 'H', long)]
    pub host: String,

    /// server port
    #[arg(short, long)]
    pub port: u16,

    /// error recovery protocol
    #[arg(
        short = 'r',
        long,
        value_enum,
        default_value_t = Protocol::Gbn,
        ignore_case = true
    )]
    pub protocol: Protocol,

    /// increase output verbosity
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// decrease output verbosity
    #[arg(short, long)]
    pub quiet: bool,

    /// append log output to a file instead of stdout
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// Server to receive files from and serve files to clients.
#[derive(Debug, Parser)]
#[command(name = "server")]
pub struct ServerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// storage dir path
    #[arg(short, long)]
    pub storage: PathBuf,
}

/// Client to upload a file to, or download a file from, the server.
#[derive(Debug, Parser)]
pub struct TransferArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// local dir path
    #[arg(short, long)]
    pub dir: PathBuf,

    /// file name
    #[arg(short, long)]
    pub name: String,
}
