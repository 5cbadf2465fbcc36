//! The `arq` binaries: a file-transfer `server` plus the `upload` and
//! `download` clients, all speaking the transport implemented in
//! [`arq_core`].

pub mod cli;
pub mod client;
pub mod logging;
pub mod server;

/// Process exit codes shared by the three binaries. Argument errors exit
/// with clap's own code 2.
pub mod exit {
    pub const OK: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const INTERRUPTED: i32 = 130;
}
