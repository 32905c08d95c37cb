mod commands;
mod terminal;

use commands::{CommandLine, Commands, receive, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    terminal::logging::init();

    match commands.command {
        Commands::Watch(args) => watch::watch(args).await,
        Commands::Receive(args) => receive::receive(args).await,
    }
}
