//! Runs against a real PostgreSQL server when `CAR_INSURANCE_TEST_DB_URL` is set.
//! Each test migrates a throwaway schema and drops it afterwards.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use car_insurance::expiry::ExpiryJob;
use car_insurance::insurance::{
    InsuranceRepository, InsuranceService, NewCar, NewPolicy, PgInsuranceRepository, PolicyId,
    RepositoryError,
};
use chrono::NaiveDate;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};

const TEST_DB_URL: &str = "CAR_INSURANCE_TEST_DB_URL";

struct TestDatabase {
    admin: PgPool,
    schema: String,
    repository: Arc<PgInsuranceRepository>,
}

impl TestDatabase {
    async fn start() -> Option<Self> {
        let Ok(url) = std::env::var(TEST_DB_URL) else {
            eprintln!("{TEST_DB_URL} not set; skipping postgres test");
            return None;
        };

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("connect admin pool");
        let schema = format!("car_insurance_test_{}", rand::random::<u32>());
        admin
            .execute(format!("CREATE SCHEMA {schema}").as_str())
            .await
            .expect("create schema");

        let options = PgConnectOptions::from_str(&url)
            .expect("valid database url")
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .expect("connect test pool");
        let repository = PgInsuranceRepository::from_pool(pool, Duration::from_secs(10));
        repository.migrate().await.expect("migrations apply");

        Some(Self {
            admin,
            schema,
            repository: Arc::new(repository),
        })
    }

    async fn stop(self) {
        self.repository.close().await;
        self.admin
            .execute(format!("DROP SCHEMA {} CASCADE", self.schema).as_str())
            .await
            .expect("drop schema");
        self.admin.close().await;
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

fn car(index: usize) -> NewCar {
    NewCar {
        vin: format!("WVWZZZ1KZ{index:08}"),
        make: "Volkswagen".to_string(),
        model: "Golf".to_string(),
        year_of_manufacture: 2018,
    }
}

async fn seed_expired_policies(
    service: &InsuranceService<PgInsuranceRepository>,
    count: usize,
) -> Vec<PolicyId> {
    let mut ids = Vec::with_capacity(count);
    for index in 0..count {
        let car = service.create_car(car(index)).await.expect("car stored");
        let policy = service
            .create_policy(
                car.id,
                NewPolicy {
                    provider: Some("Allianz".to_string()),
                    start_date: date(2024, 1, 1),
                    end_date: date(2024, 12, 31),
                },
            )
            .await
            .expect("policy stored");
        ids.push(policy.id);
    }
    ids
}

#[tokio::test]
async fn migrations_create_schema_and_constraints() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    let service = InsuranceService::new(Arc::clone(&db.repository));

    service.create_car(car(1)).await.expect("first car");
    let duplicate = db.repository.insert_car(car(1)).await;
    assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

    // Re-running migrations is a no-op.
    db.repository.migrate().await.expect("migrations are idempotent");
    db.repository.ping().await.expect("database reachable");

    db.stop().await;
}

#[tokio::test]
async fn expiry_run_logs_each_policy_once() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    let service = InsuranceService::new(Arc::clone(&db.repository));
    let expired = seed_expired_policies(&service, 3).await;
    let active_car = service.create_car(car(99)).await.expect("car stored");
    service
        .create_policy(
            active_car.id,
            NewPolicy {
                provider: None,
                start_date: date(2025, 1, 1),
                end_date: date(2025, 12, 31),
            },
        )
        .await
        .expect("active policy stored");

    let job = ExpiryJob::new(Arc::clone(&db.repository), 2);
    let logged = job.run_once(date(2025, 6, 1)).await.expect("run succeeds");
    let logged_ids: Vec<PolicyId> = logged.iter().map(|entry| entry.policy).collect();
    assert_eq!(logged_ids, expired);

    let again = job.run_once(date(2025, 6, 1)).await.expect("second run");
    assert!(again.is_empty());
    assert_eq!(db.repository.count_expiry_log().await.expect("count"), 3);

    let policy = service.get_policy(expired[0]).await.expect("policy");
    assert!(policy.logged_expiry_at.is_some());

    db.stop().await;
}

#[tokio::test]
async fn locked_policies_are_skipped_until_released() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    let service = InsuranceService::new(Arc::clone(&db.repository));
    let expired = seed_expired_policies(&service, 3).await;
    let job = ExpiryJob::new(Arc::clone(&db.repository), 10);

    let mut holder = db.repository.pool().begin().await.expect("begin");
    sqlx::query("SELECT id FROM insurance_policy WHERE id = $1 FOR UPDATE")
        .bind(expired[1].0)
        .execute(&mut *holder)
        .await
        .expect("lock row");

    let first = job.run_once(date(2025, 6, 1)).await.expect("first run");
    let first_ids: Vec<PolicyId> = first.iter().map(|entry| entry.policy).collect();
    assert_eq!(first_ids, vec![expired[0], expired[2]]);

    holder.rollback().await.expect("release lock");

    let second = job.run_once(date(2025, 6, 1)).await.expect("second run");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].policy, expired[1]);

    db.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_never_log_twice() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    let service = InsuranceService::new(Arc::clone(&db.repository));
    let expired = seed_expired_policies(&service, 20).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let job = ExpiryJob::new(Arc::clone(&db.repository), 3);
        tasks.push(tokio::spawn(
            async move { job.run_once(date(2025, 6, 1)).await },
        ));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        let logged = task.await.expect("task joins").expect("run succeeds");
        for entry in logged {
            assert!(seen.insert(entry.policy), "policy {} logged twice", entry.policy);
        }
    }

    assert_eq!(seen.len(), expired.len());
    assert_eq!(db.repository.count_expiry_log().await.expect("count"), 20);

    db.stop().await;
}

#[tokio::test]
async fn policy_ending_on_the_run_date_is_logged_and_cascades_on_delete() {
    let Some(db) = TestDatabase::start().await else {
        return;
    };
    let service = InsuranceService::new(Arc::clone(&db.repository));
    let stored = service.create_car(car(7)).await.expect("car stored");
    let policy = service
        .create_policy(
            stored.id,
            NewPolicy {
                provider: Some("Groupama".to_string()),
                start_date: date(2024, 6, 1),
                end_date: date(2025, 5, 31),
            },
        )
        .await
        .expect("policy stored");

    let job = ExpiryJob::new(Arc::clone(&db.repository), 10);
    assert!(job.run_once(date(2025, 5, 30)).await.expect("run").is_empty());
    let logged = job.run_once(date(2025, 5, 31)).await.expect("run");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].policy, policy.id);

    service.delete_policy(policy.id).await.expect("policy deleted");
    assert_eq!(db.repository.count_expiry_log().await.expect("count"), 0);

    db.stop().await;
}
