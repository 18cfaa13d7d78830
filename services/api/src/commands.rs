use crate::infra::{bootstrap, connect_postgres};
use car_insurance::error::AppError;
use car_insurance::expiry::ExpiryJob;
use car_insurance::insurance::validation::parse_date;
use car_insurance::insurance::InsuranceService;
use car_insurance::seed::{seed, SeedOptions};
use chrono::{Local, NaiveDate};
use clap::Args;
use tracing::info;

#[derive(Args, Debug, Default)]
pub(crate) struct ExpireArgs {
    /// Reference date (YYYY-MM-DD); policies ending on or before it are logged. Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct SeedArgs {
    /// Number of cars to create
    #[arg(long, default_value_t = 10)]
    pub(crate) cars: usize,
    /// Number of policies spread over the created cars
    #[arg(long, default_value_t = 15)]
    pub(crate) policies: usize,
    /// Number of claims spread over the created cars
    #[arg(long, default_value_t = 10)]
    pub(crate) claims: usize,
    /// Fixed random seed for reproducible data
    #[arg(long)]
    pub(crate) rng_seed: Option<u64>,
}

pub(crate) async fn run_expire(args: ExpireArgs) -> Result<(), AppError> {
    let config = bootstrap()?;
    let repository = connect_postgres(&config.database).await?;
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());

    let job = ExpiryJob::new(repository.clone(), config.scheduler.batch_size);
    let logged = job.run_once(today).await?;
    repository.close().await;

    println!("Logged {} expired policies (reference date {today})", logged.len());
    for entry in &logged {
        println!(
            "- policy #{} for car #{} at {}",
            entry.policy,
            entry.car,
            entry.logged_at.to_rfc3339()
        );
    }
    Ok(())
}

pub(crate) async fn run_seed(args: SeedArgs) -> Result<(), AppError> {
    let config = bootstrap()?;
    let repository = connect_postgres(&config.database).await?;
    let service = InsuranceService::new(repository.clone());

    let options = SeedOptions {
        cars: args.cars,
        policies: args.policies,
        claims: args.claims,
        rng_seed: args.rng_seed,
    };
    let report = seed(&service, options, Local::now().date_naive()).await?;
    repository.close().await;

    println!(
        "Seeded {} cars, {} policies and {} claims.",
        report.cars, report.policies, report.claims
    );
    Ok(())
}

pub(crate) async fn run_migrate() -> Result<(), AppError> {
    let config = bootstrap()?;
    let repository = connect_postgres(&config.database).await?;
    repository.close().await;
    info!("database schema is up to date");
    Ok(())
}
