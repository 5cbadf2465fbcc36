//! The server runner: accept connections, spawn one session task per
//! client, and drain everything gracefully on ctrl-c.

use crate::cli::ServerArgs;
use crate::exit;
use arq_core::{Acceptor, ProtocolKind, ServerSession, SessionError, Shutdown};
use std::net::SocketAddr;
use tokio::net::lookup_host;
use tokio::task::JoinHandle;

/// Runs the server until interrupted and returns the process exit code.
pub async fn run(args: &ServerArgs) -> i32 {
    let protocol = ProtocolKind::from(args.common.protocol);
    tracing::debug!(
        host = %args.common.host,
        port = args.common.port,
        storage = %args.storage.display(),
        %protocol,
        "starting server"
    );

    if let Err(e) = std::fs::create_dir_all(&args.storage) {
        tracing::error!(storage = %args.storage.display(), %e, "cannot create storage directory");
        return exit::FAILURE;
    }

    let addr = match resolve(&args.common.host, args.common.port).await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(host = %args.common.host, %e, "cannot resolve listen address");
            return exit::FAILURE;
        }
    };
    let mut acceptor = match Acceptor::bind(addr, protocol).await {
        Ok(acceptor) => acceptor,
        Err(e) => {
            tracing::error!(%addr, %e, "cannot bind the listening endpoint");
            return exit::FAILURE;
        }
    };
    tracing::info!(%addr, %protocol, "server listening");

    let shutdown = Shutdown::new();
    let mut sessions: Vec<JoinHandle<()>> = Vec::new();
    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, draining sessions");
                shutdown.shut_down();
                break exit::INTERRUPTED;
            }
            accepted = acceptor.accept() => {
                let Some(socket) = accepted else {
                    tracing::error!("the demultiplexer stopped unexpectedly");
                    shutdown.shut_down();
                    break exit::FAILURE;
                };
                sessions.retain(|session| !session.is_finished());
                sessions.push(spawn_session(socket, &args.storage, shutdown.clone()));
            }
        }
    };

    // Let every session emit its best-effort FIN before the endpoint goes
    // away with the acceptor.
    for session in sessions {
        let _ = session.await;
    }
    drop(acceptor);
    code
}

fn spawn_session(
    socket: arq_core::ConnectionSocket,
    storage: &std::path::Path,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    let storage = storage.to_path_buf();
    tokio::spawn(async move {
        let peer = socket.peer();
        tracing::debug!(%peer, "session started");
        let mut session = ServerSession::new(socket, storage);
        match session.run_until(&shutdown).await {
            Ok(()) => tracing::info!(%peer, "transfer complete"),
            Err(SessionError::Cancelled) => tracing::debug!(%peer, "session cancelled"),
            Err(e) => tracing::error!(%peer, %e, "session failed"),
        }
    })
}

async fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "hostname resolved to nothing")
    })
}
