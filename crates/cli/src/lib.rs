pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "replier",
    about = "Forum replier operator CLI",
    long_about = "Inspect configuration, migrate the knowledge store, and index or query monitored channels.",
    after_help = "Examples:\n  replier doctor --json\n  replier sources C0123456\n  replier ask C0123456 \"How do I install the operator?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, credentials, DB connectivity and the knowledge store")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List a channel's knowledge sources with status and chunk counts")]
    Sources {
        #[arg(help = "Slack channel id, e.g. C0123456")]
        channel: String,
    },
    #[command(about = "Reset a channel's sources to pending and index them in the foreground")]
    Reindex {
        #[arg(help = "Slack channel id, e.g. C0123456")]
        channel: String,
    },
    #[command(about = "Answer a question from a channel's indexed knowledge")]
    Ask {
        #[arg(help = "Slack channel id, e.g. C0123456")]
        channel: String,
        #[arg(help = "The question to answer")]
        question: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Sources { channel } => commands::sources::run(&channel),
        Command::Reindex { channel } => commands::reindex::run(&channel),
        Command::Ask { channel, question } => commands::ask::run(&channel, &question),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
