//! CLI argument parsing for the masar-worker binary.

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "masar-worker", about = "Masar field-sales import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Import a route-master CSV file directly, without NATS
    Import {
        /// Path to the CSV file
        #[arg(long)]
        file: String,
        /// Tenant the import belongs to
        #[arg(long)]
        company_id: Uuid,
        /// Recorded in the history log
        #[arg(long)]
        uploader: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["masar-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["masar-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_import_command_parses() {
        let cli = Cli::parse_from([
            "masar-worker",
            "import",
            "--file",
            "routes.csv",
            "--company-id",
            "00000000-0000-0000-0000-000000000001",
        ]);
        match cli.command {
            Some(Command::Import { file, company_id, uploader }) => {
                assert_eq!(file, "routes.csv");
                assert_eq!(
                    company_id,
                    Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap()
                );
                assert!(uploader.is_none());
            }
            _ => panic!("expected import command"),
        }
    }
}
