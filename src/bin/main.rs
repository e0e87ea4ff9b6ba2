mod cmd;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "syswalk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Analyze(cmd::analyze::Cmd),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Analyze(cmd) => {
            if let Err(err) = cmd.execute() {
                log::error!("{err}");
                std::process::exit(1);
            }
        }
    }
}
