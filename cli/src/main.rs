use clap::Parser;
use masterclaw_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = masterclaw_cli::run(cli).await;
    std::process::exit(exit_code);
}
