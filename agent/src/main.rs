use clap::{Parser, Subcommand};
use fleet_agent::config::{AgentConfig, LogFormat};
use fleet_core::device::DeploymentStatus;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod util;

#[derive(Parser)]
#[command(
    name = "fleet-agent",
    version,
    about = "Metrica fleet device agent: registration, heartbeats and safe-mode failover"
)]
struct Cli {
    #[command(flatten)]
    config: AgentConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until SIGINT/SIGTERM (default)
    Run,
    /// Print the verified safe-mode status as JSON
    Status,
    /// Manual safe-mode control
    SafeMode {
        #[command(subcommand)]
        command: SafeModeCommands,
    },
    /// Validate configuration and print the effective values
    CheckConfig,
    /// Report the outcome of a deployment to the control plane
    ReportDeployment {
        /// Commit that was deployed
        #[arg(long)]
        commit_hash: String,
        /// pending, success, failed or rolled_back
        #[arg(long)]
        status: DeploymentStatus,
        /// Error message for failed deployments
        #[arg(long)]
        error: Option<String>,
        /// Extra metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },
}

#[derive(Subcommand)]
enum SafeModeCommands {
    /// Stop the primary workload and start the rescue workload
    Activate {
        #[arg(long)]
        reason: String,
        /// Error details as a JSON object
        #[arg(long)]
        details: Option<String>,
    },
    /// Stop the rescue workload and clear the persisted record
    Deactivate,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fleet_agent=info,fleet_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.config.log_format);

    let config = cli.config;
    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::run(config).await,
        Commands::Status => commands::status::run(&config).await,
        Commands::SafeMode { command } => match command {
            SafeModeCommands::Activate { reason, details } => {
                commands::safe_mode::activate(&config, &reason, details.as_deref()).await
            }
            SafeModeCommands::Deactivate => commands::safe_mode::deactivate(&config).await,
        },
        Commands::CheckConfig => commands::config::check(&config),
        Commands::ReportDeployment {
            commit_hash,
            status,
            error,
            metadata,
        } => {
            commands::deployment::report(
                &config,
                &commit_hash,
                status,
                error.as_deref(),
                metadata.as_deref(),
            )
            .await
        }
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::parse_from(["fleet-agent", "--device-id", "pi-01"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config.device_id, "pi-01");
    }

    #[test]
    fn config_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::parse_from(["fleet-agent", "status", "--device-id", "pi-02"]);
        assert!(matches!(cli.command, Some(Commands::Status)));
        assert_eq!(cli.config.device_id, "pi-02");

        let cli = Cli::parse_from([
            "fleet-agent",
            "safe-mode",
            "deactivate",
            "--safe-mode-state-file",
            "/tmp/sm.json",
        ]);
        assert_eq!(
            cli.config.state_file(),
            std::path::PathBuf::from("/tmp/sm.json")
        );
    }

    #[test]
    fn report_deployment_parses_status() {
        let cli = Cli::parse_from([
            "fleet-agent",
            "report-deployment",
            "--commit-hash",
            "abc123",
            "--status",
            "rolled_back",
        ]);
        match cli.command {
            Some(Commands::ReportDeployment { status, .. }) => {
                assert_eq!(status, DeploymentStatus::RolledBack)
            }
            _ => panic!("expected report-deployment"),
        }
    }

    #[test]
    fn unknown_deployment_status_is_rejected() {
        let result = Cli::try_parse_from([
            "fleet-agent",
            "report-deployment",
            "--commit-hash",
            "abc123",
            "--status",
            "done",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn safe_mode_activate_requires_reason() {
        assert!(Cli::try_parse_from(["fleet-agent", "safe-mode", "activate"]).is_err());
        let cli = Cli::parse_from(["fleet-agent", "safe-mode", "activate", "--reason", "maintenance"]);
        assert!(matches!(
            cli.command,
            Some(Commands::SafeMode {
                command: SafeModeCommands::Activate { .. }
            })
        ));
    }
}
