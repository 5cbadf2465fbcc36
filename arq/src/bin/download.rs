use arq::cli::TransferArgs;
use arq_core::TransferMode;
use clap::Parser;

#[tokio::main]
async fn main() {
    let args = TransferArgs::parse();
    if let Err(e) = arq::logging::init(&args.common) {
        eprintln!("cannot initialize logging: {e}");
        std::process::exit(arq::exit::FAILURE);
    }
    let code = arq::client::run(&args, TransferMode::Download).await;
    std::process::exit(code);
}
