use clap::Parser;
use tracing::error;
use xmas_decorator::config::setup_logging;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = xmas_decorator::cli::CliOptions::parse();

    if let Err(err) = setup_logging(cli.debug) {
        eprintln!("Logging setup failed: {}", err);
        return;
    }

    let decorator = match cli.build_decorator() {
        Ok(decorator) => decorator,
        Err(err) => {
            error!("Configuration error: {:#}", err);
            return;
        }
    };

    if let Err(err) = xmas_decorator::web::setup_server(&cli, decorator).await {
        error!("Application error: {}", err);
    }
}
