use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::domain::{
    Amount, Car, CarId, Claim, ClaimId, ExpiryLogEntry, ExpiryLogId, InsurancePolicy, NewCar,
    NewClaim, NewPolicy, PolicyId,
};
use super::pagination::PageRequest;
use super::repository::{InsuranceRepository, RepositoryError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MIGRATE_TIMEOUT: Duration = Duration::from_secs(30);

const CAR_COLUMNS: &str = "id, vin, make, model, year_of_manufacture, created_at";
const POLICY_COLUMNS: &str = "id, car_id, provider, start_date, end_date, logged_expiry_at";
const CLAIM_COLUMNS: &str = "id, car_id, claim_date, description, amount_cents, created_at";

/// Failures while establishing or migrating the database.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database operation timed out")]
    Timeout,
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(sqlx::FromRow)]
struct CarRow {
    id: i64,
    vin: String,
    make: String,
    model: String,
    year_of_manufacture: i32,
    created_at: DateTime<Utc>,
}

impl From<CarRow> for Car {
    fn from(row: CarRow) -> Self {
        Car {
            id: CarId(row.id),
            vin: row.vin,
            make: row.make,
            model: row.model,
            year_of_manufacture: u32::try_from(row.year_of_manufacture).unwrap_or_default(),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: i64,
    car_id: i64,
    provider: Option<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    logged_expiry_at: Option<DateTime<Utc>>,
}

impl From<PolicyRow> for InsurancePolicy {
    fn from(row: PolicyRow) -> Self {
        InsurancePolicy {
            id: PolicyId(row.id),
            car: CarId(row.car_id),
            provider: row.provider,
            start_date: row.start_date,
            end_date: row.end_date,
            logged_expiry_at: row.logged_expiry_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: i64,
    car_id: i64,
    claim_date: NaiveDate,
    description: String,
    amount_cents: i64,
    created_at: DateTime<Utc>,
}

impl From<ClaimRow> for Claim {
    fn from(row: ClaimRow) -> Self {
        Claim {
            id: ClaimId(row.id),
            car: CarId(row.car_id),
            claim_date: row.claim_date,
            description: row.description,
            amount: Amount::from_cents(row.amount_cents),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ExpiryLogRow {
    id: i64,
    policy_id: i64,
    car_id: i64,
    logged_at: DateTime<Utc>,
}

impl From<ExpiryLogRow> for ExpiryLogEntry {
    fn from(row: ExpiryLogRow) -> Self {
        ExpiryLogEntry {
            id: ExpiryLogId(row.id),
            policy: PolicyId(row.policy_id),
            car: CarId(row.car_id),
            logged_at: row.logged_at,
        }
    }
}

fn map_sqlx(err: sqlx::Error) -> RepositoryError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            return RepositoryError::NotFound;
        }
    }
    RepositoryError::Unavailable(err.to_string())
}

fn count_from(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn page_bounds(page: PageRequest) -> (i64, i64) {
    (page.limit() as i64, page.offset() as i64)
}

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgInsuranceRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgInsuranceRepository {
    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub async fn connect(
        db_url: &str,
        max_connections: u32,
        query_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            CONNECT_TIMEOUT,
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(query_timeout)
                .connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self::from_pool(pool, query_timeout))
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        max_connections: u32,
        query_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let repository = Self::connect(db_url, max_connections, query_timeout).await?;
        repository.migrate().await?;
        Ok(repository)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(MIGRATE_TIMEOUT, migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, RepositoryError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| RepositoryError::Unavailable("database operation timed out".to_string()))?
            .map_err(map_sqlx)
    }

    async fn delete_by_id(&self, table: &str, id: i64) -> Result<(), RepositoryError> {
        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let result = self
            .timed(sqlx::query(&sql).bind(id).execute(&self.pool))
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, RepositoryError> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = self
            .timed(sqlx::query_scalar(&sql).fetch_one(&self.pool))
            .await?;
        Ok(count_from(count))
    }
}

#[async_trait]
impl InsuranceRepository for PgInsuranceRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.timed(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }

    async fn insert_car(&self, car: NewCar) -> Result<Car, RepositoryError> {
        let sql = format!(
            "INSERT INTO cars (vin, make, model, year_of_manufacture) VALUES ($1, $2, $3, $4) RETURNING {CAR_COLUMNS}"
        );
        let row: CarRow = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(&car.vin)
                    .bind(&car.make)
                    .bind(&car.model)
                    .bind(car.year_of_manufacture as i32)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(row.into())
    }

    async fn update_car(&self, id: CarId, car: NewCar) -> Result<Car, RepositoryError> {
        let sql = format!(
            "UPDATE cars SET vin = $2, make = $3, model = $4, year_of_manufacture = $5 WHERE id = $1 RETURNING {CAR_COLUMNS}"
        );
        let row: Option<CarRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id.0)
                    .bind(&car.vin)
                    .bind(&car.make)
                    .bind(&car.model)
                    .bind(car.year_of_manufacture as i32)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Car::from).ok_or(RepositoryError::NotFound)
    }

    async fn delete_car(&self, id: CarId) -> Result<(), RepositoryError> {
        self.delete_by_id("cars", id.0).await
    }

    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, RepositoryError> {
        let sql = format!("SELECT {CAR_COLUMNS} FROM cars WHERE id = $1");
        let row: Option<CarRow> = self
            .timed(sqlx::query_as(&sql).bind(id.0).fetch_optional(&self.pool))
            .await?;
        Ok(row.map(Car::from))
    }

    async fn list_cars(&self, page: PageRequest) -> Result<Vec<Car>, RepositoryError> {
        let (limit, offset) = page_bounds(page);
        let sql = format!("SELECT {CAR_COLUMNS} FROM cars ORDER BY id LIMIT $1 OFFSET $2");
        let rows: Vec<CarRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(Car::from).collect())
    }

    async fn count_cars(&self) -> Result<u64, RepositoryError> {
        self.count("cars").await
    }

    async fn insert_policy(
        &self,
        car: CarId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        let sql = format!(
            "INSERT INTO insurance_policy (car_id, provider, start_date, end_date) VALUES ($1, $2, $3, $4) RETURNING {POLICY_COLUMNS}"
        );
        let row: PolicyRow = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(car.0)
                    .bind(&policy.provider)
                    .bind(policy.start_date)
                    .bind(policy.end_date)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(row.into())
    }

    async fn update_policy(
        &self,
        id: PolicyId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        let sql = format!(
            "UPDATE insurance_policy SET provider = $2, start_date = $3, end_date = $4 WHERE id = $1 RETURNING {POLICY_COLUMNS}"
        );
        let row: Option<PolicyRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id.0)
                    .bind(&policy.provider)
                    .bind(policy.start_date)
                    .bind(policy.end_date)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(InsurancePolicy::from)
            .ok_or(RepositoryError::NotFound)
    }

    async fn fetch_policy(&self, id: PolicyId) -> Result<Option<InsurancePolicy>, RepositoryError> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM insurance_policy WHERE id = $1");
        let row: Option<PolicyRow> = self
            .timed(sqlx::query_as(&sql).bind(id.0).fetch_optional(&self.pool))
            .await?;
        Ok(row.map(InsurancePolicy::from))
    }

    async fn delete_policy(&self, id: PolicyId) -> Result<(), RepositoryError> {
        self.delete_by_id("insurance_policy", id.0).await
    }

    async fn list_policies(
        &self,
        page: PageRequest,
    ) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM insurance_policy ORDER BY logged_expiry_at DESC NULLS FIRST, id LIMIT $1 OFFSET $2"
        );
        let rows: Vec<PolicyRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(InsurancePolicy::from).collect())
    }

    async fn count_policies(&self) -> Result<u64, RepositoryError> {
        self.count("insurance_policy").await
    }

    async fn policies_for_car(&self, car: CarId) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM insurance_policy WHERE car_id = $1 ORDER BY start_date, id"
        );
        let rows: Vec<PolicyRow> = self
            .timed(sqlx::query_as(&sql).bind(car.0).fetch_all(&self.pool))
            .await?;
        Ok(rows.into_iter().map(InsurancePolicy::from).collect())
    }

    async fn has_active_policy(
        &self,
        car: CarId,
        date: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        self.timed(
            sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM insurance_policy WHERE car_id = $1 AND start_date <= $2 AND end_date >= $2)",
            )
            .bind(car.0)
            .bind(date)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn insert_claim(&self, car: CarId, claim: NewClaim) -> Result<Claim, RepositoryError> {
        let sql = format!(
            "INSERT INTO claim (car_id, claim_date, description, amount_cents) VALUES ($1, $2, $3, $4) RETURNING {CLAIM_COLUMNS}"
        );
        let row: ClaimRow = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(car.0)
                    .bind(claim.claim_date)
                    .bind(&claim.description)
                    .bind(claim.amount.cents())
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(row.into())
    }

    async fn update_claim(&self, id: ClaimId, claim: NewClaim) -> Result<Claim, RepositoryError> {
        let sql = format!(
            "UPDATE claim SET claim_date = $2, description = $3, amount_cents = $4 WHERE id = $1 RETURNING {CLAIM_COLUMNS}"
        );
        let row: Option<ClaimRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id.0)
                    .bind(claim.claim_date)
                    .bind(&claim.description)
                    .bind(claim.amount.cents())
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Claim::from).ok_or(RepositoryError::NotFound)
    }

    async fn fetch_claim(&self, id: ClaimId) -> Result<Option<Claim>, RepositoryError> {
        let sql = format!("SELECT {CLAIM_COLUMNS} FROM claim WHERE id = $1");
        let row: Option<ClaimRow> = self
            .timed(sqlx::query_as(&sql).bind(id.0).fetch_optional(&self.pool))
            .await?;
        Ok(row.map(Claim::from))
    }

    async fn delete_claim(&self, id: ClaimId) -> Result<(), RepositoryError> {
        self.delete_by_id("claim", id.0).await
    }

    async fn list_claims(&self, page: PageRequest) -> Result<Vec<Claim>, RepositoryError> {
        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {CLAIM_COLUMNS} FROM claim ORDER BY claim_date DESC, id LIMIT $1 OFFSET $2"
        );
        let rows: Vec<ClaimRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(Claim::from).collect())
    }

    async fn count_claims(&self) -> Result<u64, RepositoryError> {
        self.count("claim").await
    }

    async fn claims_for_car(&self, car: CarId) -> Result<Vec<Claim>, RepositoryError> {
        let sql =
            format!("SELECT {CLAIM_COLUMNS} FROM claim WHERE car_id = $1 ORDER BY claim_date, id");
        let rows: Vec<ClaimRow> = self
            .timed(sqlx::query_as(&sql).bind(car.0).fetch_all(&self.pool))
            .await?;
        Ok(rows.into_iter().map(Claim::from).collect())
    }

    async fn log_expired_policies(
        &self,
        today: NaiveDate,
        logged_at: DateTime<Utc>,
        batch_limit: u32,
    ) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        let pool = &self.pool;
        self.timed(async move {
            let mut tx = pool.begin().await?;

            // Rows held by a concurrent run are skipped, not waited on.
            let due: Vec<(i64, i64)> = sqlx::query_as(
                "SELECT p.id, p.car_id FROM insurance_policy p \
                 WHERE p.end_date <= $1 \
                   AND p.logged_expiry_at IS NULL \
                   AND NOT EXISTS (SELECT 1 FROM insurance_expiry_log l WHERE l.policy_id = p.id) \
                 ORDER BY p.id \
                 LIMIT $2 \
                 FOR UPDATE OF p SKIP LOCKED",
            )
            .bind(today)
            .bind(i64::from(batch_limit))
            .fetch_all(&mut *tx)
            .await?;

            let mut logged = Vec::with_capacity(due.len());
            for (policy_id, car_id) in due {
                let inserted: Option<i64> = sqlx::query_scalar(
                    "INSERT INTO insurance_expiry_log (policy_id, logged_at) VALUES ($1, $2) \
                     ON CONFLICT (policy_id) DO NOTHING RETURNING id",
                )
                .bind(policy_id)
                .bind(logged_at)
                .fetch_optional(&mut *tx)
                .await?;

                let Some(log_id) = inserted else {
                    continue;
                };

                sqlx::query("UPDATE insurance_policy SET logged_expiry_at = $2 WHERE id = $1")
                    .bind(policy_id)
                    .bind(logged_at)
                    .execute(&mut *tx)
                    .await?;

                logged.push(ExpiryLogEntry {
                    id: ExpiryLogId(log_id),
                    policy: PolicyId(policy_id),
                    car: CarId(car_id),
                    logged_at,
                });
            }

            tx.commit().await?;
            Ok(logged)
        })
        .await
    }

    async fn expiry_log(&self, page: PageRequest) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        let (limit, offset) = page_bounds(page);
        let rows: Vec<ExpiryLogRow> = self
            .timed(
                sqlx::query_as(
                    "SELECT l.id, l.policy_id, p.car_id, l.logged_at \
                     FROM insurance_expiry_log l \
                     JOIN insurance_policy p ON p.id = l.policy_id \
                     ORDER BY l.id LIMIT $1 OFFSET $2",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(ExpiryLogEntry::from).collect())
    }

    async fn count_expiry_log(&self) -> Result<u64, RepositoryError> {
        self.count("insurance_expiry_log").await
    }
}
