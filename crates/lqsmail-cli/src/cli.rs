use clap::{Args, Parser, Subcommand};

use super::{CLI_SCHEMA_VERSION, config_path_candidates};

#[path = "cli_command_handlers.rs"]
mod cli_command_handlers;
#[path = "cli_config.rs"]
mod cli_config;
#[path = "cli_runtime_helpers.rs"]
mod cli_runtime_helpers;
pub(crate) use cli_command_handlers::run_cli;
pub(crate) use cli_config::{AppConfig, load_app_config};
pub(crate) use cli_runtime_helpers::{
    ConsoleAlerts, field_errors_to_json, load_attachment, load_body, load_items, load_notes,
    output_error, output_ok, request_summary,
};

#[derive(Parser, Debug)]
#[command(
    name = "lqsmail",
    version,
    about = "Compose and submit listing optimization requests"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Check cc and body without building anything.
    Validate(ComposeArgs),
    /// Render the body and list the attachments a send would carry.
    Preview(ComposeArgs),
    Send(SendCmd),
    /// Show where configuration is read from.
    Config,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct ComposeArgs {
    /// Vendor address shown in the subject and intro.
    #[arg(long)]
    pub(crate) from: String,
    /// Overrides `[compose].recipients`.
    #[arg(long)]
    pub(crate) to: Vec<String>,
    #[arg(long)]
    pub(crate) cc: Option<String>,
    /// JSON array of line items.
    #[arg(long)]
    pub(crate) items: Option<String>,
    /// JSON object mapping ASIN to note.
    #[arg(long)]
    pub(crate) notes: Option<String>,
    /// HTML file used as the free-text body.
    #[arg(long)]
    pub(crate) body: Option<String>,
    #[arg(long)]
    pub(crate) attach: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct SendCmd {
    #[command(flatten)]
    pub(crate) compose: ComposeArgs,
    /// Write an .eml file instead of delivering over SMTP.
    #[arg(long)]
    pub(crate) outbox: Option<String>,
    /// Block until the auto-close fires.
    #[arg(long)]
    pub(crate) wait_close: bool,
    /// Rewrite the items file as an empty list once the request is sent.
    #[arg(long)]
    pub(crate) clear_selection: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, CliCommand};

    #[test]
    fn send_accepts_repeated_attachments() {
        let cli = Cli::try_parse_from([
            "lqsmail",
            "send",
            "--from",
            "vendor@example.com",
            "--attach",
            "a.pdf",
            "--attach",
            "b.pdf",
            "--outbox",
            "out",
            "--wait-close",
        ])
        .unwrap();
        let CliCommand::Send(cmd) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(cmd.compose.attach, vec!["a.pdf", "b.pdf"]);
        assert_eq!(cmd.outbox.as_deref(), Some("out"));
        assert!(cmd.wait_close);
        assert!(!cmd.clear_selection);
    }

    #[test]
    fn from_is_required() {
        assert!(Cli::try_parse_from(["lqsmail", "validate"]).is_err());
    }
}
