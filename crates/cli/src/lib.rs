pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "navigator",
    about = "Treatment navigator operator CLI",
    long_about = "Inspect configuration, check readiness, apply archive migrations, \
                  and run single conversation turns against the orchestrator.",
    after_help = "Examples:\n  navigator doctor --json\n  navigator config\n  \
                  navigator turn --text \"I need a detox center near Atlanta, GA\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending archive migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one conversation turn and print the reply as JSON")]
    Turn {
        #[arg(long, help = "User message for this turn")]
        text: String,
        #[arg(long, help = "Continue an archived session instead of opening a new one")]
        session: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Turn { text, session } => commands::turn::run(&text, session.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
