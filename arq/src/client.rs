//! The client runner shared by `upload` and `download`.

use crate::cli::TransferArgs;
use crate::exit;
use arq_core::{ClientSession, ProtocolKind, TransferMode};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::lookup_host;

/// Runs one transfer to completion and returns the process exit code.
pub async fn run(args: &TransferArgs, mode: TransferMode) -> i32 {
    let protocol = ProtocolKind::from(args.common.protocol);
    tracing::debug!(
        host = %args.common.host,
        port = args.common.port,
        dir = %args.dir.display(),
        name = %args.name,
        %protocol,
        ?mode,
        "starting client"
    );

    let server = match resolve(&args.common.host, args.common.port).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(host = %args.common.host, %e, "cannot resolve server address");
            return exit::FAILURE;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&args.dir) {
        tracing::error!(dir = %args.dir.display(), %e, "cannot create local directory");
        return exit::FAILURE;
    }

    let started = Instant::now();
    let mut session = match ClientSession::connect(server, protocol, mode, &args.dir, &args.name)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(%server, %e, "connection failed");
            return exit::FAILURE;
        }
    };

    let outcome = tokio::select! {
        result = session.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match outcome {
        Some(Ok(())) => {
            let verb = match mode {
                TransferMode::Upload => "uploaded",
                TransferMode::Download => "downloaded",
            };
            tracing::info!(
                "successfully {verb} {} in {:.2}s",
                args.name,
                started.elapsed().as_secs_f64()
            );
            exit::OK
        }
        Some(Err(e)) => {
            tracing::error!(%e, "transfer failed");
            exit::FAILURE
        }
        None => {
            tracing::info!("interrupted, closing the connection");
            session.abort().await;
            exit::INTERRUPTED
        }
    }
}

async fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "hostname resolved to nothing")
    })
}
