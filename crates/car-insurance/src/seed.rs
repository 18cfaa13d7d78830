//! Mock data for demos and local development.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::insurance::domain::{Amount, CarId, NewCar, NewClaim, NewPolicy};
use crate::insurance::repository::{InsuranceRepository, RepositoryError};
use crate::insurance::service::{InsuranceService, ServiceError};

pub const PROVIDERS: [&str; 5] = ["Allianz", "Groupama", "Omniasig", "Generali", "AXA"];

const CATALOG: [(&str, [&str; 3]); 5] = [
    ("BMW", ["X5", "X3", "320i"]),
    ("Volkswagen", ["Golf", "Passat", "Tiguan"]),
    ("Audi", ["A4", "A6", "Q5"]),
    ("Skoda", ["Octavia", "Fabia", "Superb"]),
    ("Toyota", ["Corolla", "Yaris", "RAV4"]),
];

const CLAIM_DESCRIPTIONS: [&str; 6] = [
    "Windshield replacement after small impact",
    "Rear bumper repair following minor collision",
    "Engine diagnostic due to oil leak",
    "Tire puncture replacement",
    "Routine maintenance and oil change",
    "Front-end damage from parking accident",
];

// VINs never use I, O or Q.
const VIN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPRSTUVWXYZ0123456789";
const VIN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    pub cars: usize,
    pub policies: usize,
    pub claims: usize,
    /// Fixed RNG seed for reproducible data.
    pub rng_seed: Option<u64>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            cars: 10,
            policies: 15,
            claims: 10,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub cars: usize,
    pub policies: usize,
    pub claims: usize,
}

fn random_vin(rng: &mut impl Rng) -> String {
    (0..17)
        .map(|_| VIN_ALPHABET[rng.gen_range(0..VIN_ALPHABET.len())] as char)
        .collect()
}

fn random_car(rng: &mut impl Rng) -> NewCar {
    let (make, models) = CATALOG[rng.gen_range(0..CATALOG.len())];
    NewCar {
        vin: random_vin(rng),
        make: make.to_string(),
        model: models[rng.gen_range(0..models.len())].to_string(),
        year_of_manufacture: rng.gen_range(1995..=2024),
    }
}

fn random_policy(rng: &mut impl Rng, today: NaiveDate) -> NewPolicy {
    let start_date = today - Duration::days(rng.gen_range(30..=180));
    NewPolicy {
        provider: PROVIDERS.choose(rng).map(|provider| provider.to_string()),
        start_date,
        end_date: start_date + Duration::days(365),
    }
}

fn random_claim(rng: &mut impl Rng, today: NaiveDate) -> NewClaim {
    NewClaim {
        claim_date: today - Duration::days(rng.gen_range(0..=120)),
        description: CLAIM_DESCRIPTIONS[rng.gen_range(0..CLAIM_DESCRIPTIONS.len())].to_string(),
        amount: Amount::from_cents(rng.gen_range(20_000..=1_000_000)),
    }
}

/// Inserts cars first, then attaches policies and claims to random cars.
pub async fn seed<R>(
    service: &InsuranceService<R>,
    options: SeedOptions,
    today: NaiveDate,
) -> Result<SeedReport, ServiceError>
where
    R: InsuranceRepository + 'static,
{
    let mut rng = match options.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut car_ids: Vec<CarId> = Vec::with_capacity(options.cars);
    for _ in 0..options.cars {
        let mut attempt = 0;
        let car = loop {
            attempt += 1;
            match service.create_car(random_car(&mut rng)).await {
                Err(ServiceError::Repository(RepositoryError::Conflict(_)))
                    if attempt < VIN_ATTEMPTS =>
                {
                    continue
                }
                other => break other?,
            }
        };
        car_ids.push(car.id);
    }

    let mut report = SeedReport {
        cars: car_ids.len(),
        ..SeedReport::default()
    };
    if car_ids.is_empty() {
        return Ok(report);
    }

    for _ in 0..options.policies {
        let car = car_ids[rng.gen_range(0..car_ids.len())];
        service
            .create_policy(car, random_policy(&mut rng, today))
            .await?;
        report.policies += 1;
    }

    for _ in 0..options.claims {
        let car = car_ids[rng.gen_range(0..car_ids.len())];
        service
            .create_claim(car, random_claim(&mut rng, today))
            .await?;
        report.claims += 1;
    }

    info!(
        cars = report.cars,
        policies = report.policies,
        claims = report.claims,
        "seeded mock data"
    );
    Ok(report)
}
