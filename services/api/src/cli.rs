use crate::commands::{run_expire, run_migrate, run_seed, ExpireArgs, SeedArgs};
use crate::server;
use car_insurance::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Car Insurance Service",
    about = "Run the car insurance API and its maintenance tasks from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Log expired policies once and exit
    Expire(ExpireArgs),
    /// Populate the database with mock cars, policies and claims
    Seed(SeedArgs),
    /// Apply database migrations and exit
    Migrate,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Run the policy expiry scheduler regardless of SCHEDULER_ENABLED
    #[arg(long)]
    pub(crate) with_scheduler: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Expire(args) => run_expire(args).await,
        Command::Seed(args) => run_seed(args).await,
        Command::Migrate => run_migrate().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["car-insurance-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn seed_accepts_counts() {
        let cli = Cli::try_parse_from([
            "car-insurance-api",
            "seed",
            "--cars",
            "3",
            "--policies",
            "4",
            "--rng-seed",
            "7",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Seed(args)) => {
                assert_eq!(args.cars, 3);
                assert_eq!(args.policies, 4);
                assert_eq!(args.claims, 10);
                assert_eq!(args.rng_seed, Some(7));
            }
            other => panic!("expected seed command, got {other:?}"),
        }
    }

    #[test]
    fn expire_accepts_reference_date() {
        let cli = Cli::try_parse_from(["car-insurance-api", "expire", "--today", "2025-06-01"])
            .expect("parses");
        match cli.command {
            Some(Command::Expire(args)) => {
                assert_eq!(args.today, chrono::NaiveDate::from_ymd_opt(2025, 6, 1));
            }
            other => panic!("expected expire command, got {other:?}"),
        }
    }
}
