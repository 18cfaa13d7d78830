use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{
    Car, CarId, Claim, ClaimId, ExpiryLogEntry, InsurancePolicy, NewCar, NewClaim, NewPolicy,
    PolicyId,
};
use super::pagination::PageRequest;

/// Storage abstraction so the service can run against PostgreSQL or memory.
///
/// Inputs are expected to be validated already; implementations only enforce
/// storage-level constraints such as VIN uniqueness.
#[async_trait]
pub trait InsuranceRepository: Send + Sync {
    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn insert_car(&self, car: NewCar) -> Result<Car, RepositoryError>;
    async fn update_car(&self, id: CarId, car: NewCar) -> Result<Car, RepositoryError>;
    async fn delete_car(&self, id: CarId) -> Result<(), RepositoryError>;
    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, RepositoryError>;
    async fn list_cars(&self, page: PageRequest) -> Result<Vec<Car>, RepositoryError>;
    async fn count_cars(&self) -> Result<u64, RepositoryError>;

    async fn insert_policy(
        &self,
        car: CarId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError>;
    /// Replaces provider and dates; the owning car and expiry state are kept.
    async fn update_policy(
        &self,
        id: PolicyId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError>;
    async fn fetch_policy(&self, id: PolicyId) -> Result<Option<InsurancePolicy>, RepositoryError>;
    async fn delete_policy(&self, id: PolicyId) -> Result<(), RepositoryError>;
    /// Ordered by `logged_expiry_at` descending with unlogged policies first, then id.
    async fn list_policies(
        &self,
        page: PageRequest,
    ) -> Result<Vec<InsurancePolicy>, RepositoryError>;
    async fn count_policies(&self) -> Result<u64, RepositoryError>;
    async fn policies_for_car(&self, car: CarId) -> Result<Vec<InsurancePolicy>, RepositoryError>;
    async fn has_active_policy(&self, car: CarId, date: NaiveDate)
        -> Result<bool, RepositoryError>;

    async fn insert_claim(&self, car: CarId, claim: NewClaim) -> Result<Claim, RepositoryError>;
    async fn update_claim(&self, id: ClaimId, claim: NewClaim) -> Result<Claim, RepositoryError>;
    async fn fetch_claim(&self, id: ClaimId) -> Result<Option<Claim>, RepositoryError>;
    async fn delete_claim(&self, id: ClaimId) -> Result<(), RepositoryError>;
    /// Ordered by claim date descending, then id.
    async fn list_claims(&self, page: PageRequest) -> Result<Vec<Claim>, RepositoryError>;
    async fn count_claims(&self) -> Result<u64, RepositoryError>;
    async fn claims_for_car(&self, car: CarId) -> Result<Vec<Claim>, RepositoryError>;

    /// Logs every policy whose end date is on or before `today` and has no log row yet.
    ///
    /// Runs as one atomic unit: selected policies are locked against other
    /// concurrent runs, each gets exactly one log row stamped `logged_at`, and
    /// the policy's `logged_expiry_at` is set to the same instant. At most
    /// `batch_limit` policies are processed per call.
    async fn log_expired_policies(
        &self,
        today: NaiveDate,
        logged_at: DateTime<Utc>,
        batch_limit: u32,
    ) -> Result<Vec<ExpiryLogEntry>, RepositoryError>;
    async fn expiry_log(&self, page: PageRequest) -> Result<Vec<ExpiryLogEntry>, RepositoryError>;
    async fn count_expiry_log(&self) -> Result<u64, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record conflicts with existing data: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
