use std::sync::Arc;

use tracing::{debug, info};

use super::domain::{
    Car, CarId, Claim, ClaimId, ExpiryLogEntry, HistoryEntry, InsurancePolicy, InsuranceValidity,
    NewCar, NewClaim, NewPolicy, PolicyId,
};
use super::pagination::{InvalidPage, Page, PageRequest};
use super::repository::{InsuranceRepository, RepositoryError};
use super::validation::{
    parse_validity_date, validate_car, validate_claim, validate_policy, CarInput, ClaimInput,
    PolicyInput, ValidationErrors,
};

/// Kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Car,
    Policy,
    Claim,
}

impl Resource {
    pub fn label(&self) -> &'static str {
        match self {
            Resource::Car => "Car",
            Resource::Policy => "Policy",
            Resource::Claim => "Claim",
        }
    }
}

/// Error raised by the insurance service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("{} not found.", .0.label())]
    NotFound(Resource),
    #[error(transparent)]
    InvalidPage(#[from] InvalidPage),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    fn missing(resource: Resource) -> impl FnOnce(RepositoryError) -> ServiceError {
        move |err| match err {
            RepositoryError::NotFound => ServiceError::NotFound(resource),
            other => ServiceError::Repository(other),
        }
    }
}

/// Service composing validation and the repository.
pub struct InsuranceService<R> {
    repository: Arc<R>,
}

impl<R> Clone for InsuranceService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> InsuranceService<R>
where
    R: InsuranceRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    async fn require_car(&self, id: CarId) -> Result<Car, ServiceError> {
        self.repository
            .fetch_car(id)
            .await?
            .ok_or(ServiceError::NotFound(Resource::Car))
    }

    pub async fn create_car(&self, car: impl Into<CarInput>) -> Result<Car, ServiceError> {
        let car = validate_car(car.into(), None)?;
        let stored = self.repository.insert_car(car).await?;
        info!(car_id = %stored.id, vin = %stored.vin, "car registered");
        Ok(stored)
    }

    pub async fn get_car(&self, id: CarId) -> Result<Car, ServiceError> {
        self.require_car(id).await
    }

    /// Replaces every field of the car.
    pub async fn update_car(
        &self,
        id: CarId,
        car: impl Into<CarInput>,
    ) -> Result<Car, ServiceError> {
        self.change_car(id, car.into(), false).await
    }

    /// Changes only the fields present in `changes`.
    pub async fn patch_car(&self, id: CarId, changes: CarInput) -> Result<Car, ServiceError> {
        self.change_car(id, changes, true).await
    }

    async fn change_car(
        &self,
        id: CarId,
        input: CarInput,
        partial: bool,
    ) -> Result<Car, ServiceError> {
        let existing = self.require_car(id).await?;
        let current = partial.then(|| NewCar::from(&existing));
        let car = validate_car(input, current.as_ref())?;
        let updated = self
            .repository
            .update_car(id, car)
            .await
            .map_err(ServiceError::missing(Resource::Car))?;
        info!(car_id = %id, partial, "car updated");
        Ok(updated)
    }

    pub async fn delete_car(&self, id: CarId) -> Result<(), ServiceError> {
        self.repository
            .delete_car(id)
            .await
            .map_err(ServiceError::missing(Resource::Car))?;
        info!(car_id = %id, "car deleted");
        Ok(())
    }

    pub async fn list_cars(&self, request: PageRequest) -> Result<Page<Car>, ServiceError> {
        let count = self.repository.count_cars().await?;
        request.check_bounds(count)?;
        let cars = self.repository.list_cars(request).await?;
        Ok(Page::new(cars, count, request, "/api/cars"))
    }

    pub async fn create_policy(
        &self,
        car: CarId,
        policy: impl Into<PolicyInput>,
    ) -> Result<InsurancePolicy, ServiceError> {
        self.require_car(car).await?;
        let policy = validate_policy(policy.into(), None)?;
        let stored = self
            .repository
            .insert_policy(car, policy)
            .await
            .map_err(ServiceError::missing(Resource::Car))?;
        info!(
            car_id = %car,
            policy_id = %stored.id,
            start_date = %stored.start_date,
            end_date = %stored.end_date,
            "policy created"
        );
        Ok(stored)
    }

    pub async fn get_policy(&self, id: PolicyId) -> Result<InsurancePolicy, ServiceError> {
        self.repository
            .fetch_policy(id)
            .await?
            .ok_or(ServiceError::NotFound(Resource::Policy))
    }

    pub async fn update_policy(
        &self,
        id: PolicyId,
        policy: impl Into<PolicyInput>,
    ) -> Result<InsurancePolicy, ServiceError> {
        self.change_policy(id, policy.into(), false).await
    }

    pub async fn patch_policy(
        &self,
        id: PolicyId,
        changes: PolicyInput,
    ) -> Result<InsurancePolicy, ServiceError> {
        self.change_policy(id, changes, true).await
    }

    async fn change_policy(
        &self,
        id: PolicyId,
        input: PolicyInput,
        partial: bool,
    ) -> Result<InsurancePolicy, ServiceError> {
        let existing = self.get_policy(id).await?;
        let current = partial.then(|| NewPolicy::from(&existing));
        let policy = validate_policy(input, current.as_ref())?;
        let updated = self
            .repository
            .update_policy(id, policy)
            .await
            .map_err(ServiceError::missing(Resource::Policy))?;
        info!(
            policy_id = %id,
            start_date = %updated.start_date,
            end_date = %updated.end_date,
            partial,
            "policy updated"
        );
        Ok(updated)
    }

    pub async fn delete_policy(&self, id: PolicyId) -> Result<(), ServiceError> {
        self.repository
            .delete_policy(id)
            .await
            .map_err(ServiceError::missing(Resource::Policy))
    }

    pub async fn list_policies(
        &self,
        request: PageRequest,
    ) -> Result<Page<InsurancePolicy>, ServiceError> {
        let count = self.repository.count_policies().await?;
        request.check_bounds(count)?;
        let policies = self.repository.list_policies(request).await?;
        Ok(Page::new(policies, count, request, "/api/policies"))
    }

    pub async fn create_claim(
        &self,
        car: CarId,
        claim: impl Into<ClaimInput>,
    ) -> Result<Claim, ServiceError> {
        self.require_car(car).await?;
        let claim = validate_claim(claim.into(), None)?;
        let stored = self
            .repository
            .insert_claim(car, claim)
            .await
            .map_err(ServiceError::missing(Resource::Car))?;
        info!(
            car_id = %car,
            claim_id = %stored.id,
            amount = %stored.amount,
            "claim registered"
        );
        Ok(stored)
    }

    pub async fn get_claim(&self, id: ClaimId) -> Result<Claim, ServiceError> {
        self.repository
            .fetch_claim(id)
            .await?
            .ok_or(ServiceError::NotFound(Resource::Claim))
    }

    pub async fn update_claim(
        &self,
        id: ClaimId,
        claim: impl Into<ClaimInput>,
    ) -> Result<Claim, ServiceError> {
        self.change_claim(id, claim.into(), false).await
    }

    pub async fn patch_claim(&self, id: ClaimId, changes: ClaimInput) -> Result<Claim, ServiceError> {
        self.change_claim(id, changes, true).await
    }

    async fn change_claim(
        &self,
        id: ClaimId,
        input: ClaimInput,
        partial: bool,
    ) -> Result<Claim, ServiceError> {
        let existing = self.get_claim(id).await?;
        let current = partial.then(|| NewClaim::from(&existing));
        let claim = validate_claim(input, current.as_ref())?;
        let updated = self
            .repository
            .update_claim(id, claim)
            .await
            .map_err(ServiceError::missing(Resource::Claim))?;
        info!(claim_id = %id, amount = %updated.amount, partial, "claim updated");
        Ok(updated)
    }

    pub async fn delete_claim(&self, id: ClaimId) -> Result<(), ServiceError> {
        self.repository
            .delete_claim(id)
            .await
            .map_err(ServiceError::missing(Resource::Claim))
    }

    pub async fn list_claims(&self, request: PageRequest) -> Result<Page<Claim>, ServiceError> {
        let count = self.repository.count_claims().await?;
        request.check_bounds(count)?;
        let claims = self.repository.list_claims(request).await?;
        Ok(Page::new(claims, count, request, "/api/claims"))
    }

    pub async fn list_expiry_log(
        &self,
        request: PageRequest,
    ) -> Result<Page<ExpiryLogEntry>, ServiceError> {
        let count = self.repository.count_expiry_log().await?;
        request.check_bounds(count)?;
        let entries = self.repository.expiry_log(request).await?;
        Ok(Page::new(entries, count, request, "/api/expiry-logs"))
    }

    /// Whether any policy of the car covers the requested day.
    pub async fn insurance_validity(
        &self,
        car: CarId,
        raw_date: Option<&str>,
    ) -> Result<InsuranceValidity, ServiceError> {
        self.require_car(car).await?;
        let date = parse_validity_date(raw_date)?;
        let valid = self.repository.has_active_policy(car, date).await?;
        debug!(car_id = %car, %date, valid, "insurance validity checked");
        Ok(InsuranceValidity {
            car_id: car,
            date,
            valid,
        })
    }

    /// Policies and claims of a car on one timeline.
    ///
    /// Policies are keyed by start date, claims by claim date. On equal dates
    /// policies come first; within a kind, ids break ties.
    pub async fn car_history(&self, car: CarId) -> Result<Vec<HistoryEntry>, ServiceError> {
        self.require_car(car).await?;
        let policies = self.repository.policies_for_car(car).await?;
        let claims = self.repository.claims_for_car(car).await?;
        Ok(merge_history(&policies, &claims))
    }
}

pub(crate) fn merge_history(policies: &[InsurancePolicy], claims: &[Claim]) -> Vec<HistoryEntry> {
    let mut keyed: Vec<((chrono::NaiveDate, u8, i64), HistoryEntry)> = policies
        .iter()
        .map(|policy| ((policy.start_date, 0, policy.id.0), HistoryEntry::from(policy)))
        .chain(
            claims
                .iter()
                .map(|claim| ((claim.claim_date, 1, claim.id.0), HistoryEntry::from(claim))),
        )
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, entry)| entry).collect()
}
