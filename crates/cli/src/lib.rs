pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::workflow::{CancelArgs, CommentArgs, DecisionArgs, RecordArgs, SubmitArgs};

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff approval workflow CLI",
    long_about = "Operate the approval store: migrations, reference data, readiness checks and workflow actions.",
    after_help = "Examples:\n  signoff doctor --json\n  signoff pending --employee emp-supervisor\n  signoff approve --workflow wf-... --level 1 --employee emp-supervisor"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the reference organization and approval authorities")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, schema and authority configuration")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Start an approval workflow for a record")]
    Submit(SubmitArgs),
    #[command(about = "Approve the current level of a workflow")]
    Approve(DecisionArgs),
    #[command(about = "Reject a workflow at its current level")]
    Reject(DecisionArgs),
    #[command(about = "Cancel an open workflow as its requestor")]
    Cancel(CancelArgs),
    #[command(about = "Add a comment to a workflow's log")]
    Comment(CommentArgs),
    #[command(about = "List approvals waiting on an employee, most urgent first")]
    Pending {
        #[arg(long)]
        employee: String,
    },
    #[command(about = "Show and verify the approval log of a record")]
    History(RecordArgs),
    #[command(about = "Run one auto-approval and escalation pass")]
    Sweep,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Submit(args) => commands::workflow::submit(args),
        Command::Approve(args) => commands::workflow::approve(args),
        Command::Reject(args) => commands::workflow::reject(args),
        Command::Cancel(args) => commands::workflow::cancel(args),
        Command::Comment(args) => commands::workflow::comment(args),
        Command::Pending { employee } => commands::workflow::pending(employee),
        Command::History(args) => commands::workflow::history(args),
        Command::Sweep => commands::sweep::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
