use arq::cli::ServerArgs;
use clap::Parser;

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();
    if let Err(e) = arq::logging::init(&args.common) {
        eprintln!("cannot initialize logging: {e}");
        std::process::exit(arq::exit::FAILURE);
    }
    let code = arq::server::run(&args).await;
    std::process::exit(code);
}
