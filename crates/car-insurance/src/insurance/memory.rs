use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{
    Car, CarId, Claim, ClaimId, ExpiryLogEntry, ExpiryLogId, InsurancePolicy, NewCar, NewClaim,
    NewPolicy, PolicyId,
};
use super::pagination::PageRequest;
use super::repository::{InsuranceRepository, RepositoryError};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    cars: BTreeMap<CarId, Car>,
    policies: BTreeMap<PolicyId, InsurancePolicy>,
    claims: BTreeMap<ClaimId, Claim>,
    expiry_log: BTreeMap<PolicyId, ExpiryLogEntry>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn vin_taken(&self, vin: &str, except: Option<CarId>) -> bool {
        self.cars
            .values()
            .any(|car| car.vin == vin && Some(car.id) != except)
    }
}

fn page_of<T>(items: impl Iterator<Item = T>, page: PageRequest) -> Vec<T> {
    items
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect()
}

fn vin_conflict(vin: &str) -> RepositoryError {
    RepositoryError::Conflict(format!("car with this vin '{vin}' already exists"))
}

/// Process-local repository used when no database is configured and in tests.
///
/// Every operation, including the expiry scan, runs under a single lock, so
/// concurrent expiry runs serialize and can never log a policy twice.
#[derive(Debug, Default, Clone)]
pub struct InMemoryInsuranceRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryInsuranceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }
}

#[async_trait]
impl InsuranceRepository for InMemoryInsuranceRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.state().map(|_| ())
    }

    async fn insert_car(&self, car: NewCar) -> Result<Car, RepositoryError> {
        let mut state = self.state()?;
        if state.vin_taken(&car.vin, None) {
            return Err(vin_conflict(&car.vin));
        }

        let id = CarId(state.next_id());
        let record = Car {
            id,
            vin: car.vin,
            make: car.make,
            model: car.model,
            year_of_manufacture: car.year_of_manufacture,
            created_at: Utc::now(),
        };
        state.cars.insert(id, record.clone());
        Ok(record)
    }

    async fn update_car(&self, id: CarId, car: NewCar) -> Result<Car, RepositoryError> {
        let mut state = self.state()?;
        if state.vin_taken(&car.vin, Some(id)) {
            return Err(vin_conflict(&car.vin));
        }

        let record = state.cars.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        record.vin = car.vin;
        record.make = car.make;
        record.model = car.model;
        record.year_of_manufacture = car.year_of_manufacture;
        Ok(record.clone())
    }

    async fn delete_car(&self, id: CarId) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        state.cars.remove(&id).ok_or(RepositoryError::NotFound)?;
        state.policies.retain(|_, policy| policy.car != id);
        state.claims.retain(|_, claim| claim.car != id);
        state.expiry_log.retain(|_, entry| entry.car != id);
        Ok(())
    }

    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, RepositoryError> {
        Ok(self.state()?.cars.get(&id).cloned())
    }

    async fn list_cars(&self, page: PageRequest) -> Result<Vec<Car>, RepositoryError> {
        let state = self.state()?;
        Ok(page_of(state.cars.values().cloned(), page))
    }

    async fn count_cars(&self) -> Result<u64, RepositoryError> {
        Ok(self.state()?.cars.len() as u64)
    }

    async fn insert_policy(
        &self,
        car: CarId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        let mut state = self.state()?;
        if !state.cars.contains_key(&car) {
            return Err(RepositoryError::NotFound);
        }

        let record = InsurancePolicy {
            id: PolicyId(state.next_id()),
            car,
            provider: policy.provider,
            start_date: policy.start_date,
            end_date: policy.end_date,
            logged_expiry_at: None,
        };
        state.policies.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_policy(
        &self,
        id: PolicyId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        let mut state = self.state()?;
        let record = state.policies.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        record.provider = policy.provider;
        record.start_date = policy.start_date;
        record.end_date = policy.end_date;
        Ok(record.clone())
    }

    async fn fetch_policy(&self, id: PolicyId) -> Result<Option<InsurancePolicy>, RepositoryError> {
        Ok(self.state()?.policies.get(&id).cloned())
    }

    async fn delete_policy(&self, id: PolicyId) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        state.policies.remove(&id).ok_or(RepositoryError::NotFound)?;
        state.expiry_log.remove(&id);
        Ok(())
    }

    async fn list_policies(
        &self,
        page: PageRequest,
    ) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        let state = self.state()?;
        let mut policies: Vec<_> = state.policies.values().cloned().collect();
        policies.sort_by_key(|policy| {
            (
                policy.logged_expiry_at.is_some(),
                Reverse(policy.logged_expiry_at),
                policy.id,
            )
        });
        Ok(page_of(policies.into_iter(), page))
    }

    async fn count_policies(&self) -> Result<u64, RepositoryError> {
        Ok(self.state()?.policies.len() as u64)
    }

    async fn policies_for_car(&self, car: CarId) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .policies
            .values()
            .filter(|policy| policy.car == car)
            .cloned()
            .collect())
    }

    async fn has_active_policy(
        &self,
        car: CarId,
        date: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .policies
            .values()
            .any(|policy| policy.car == car && policy.covers(date)))
    }

    async fn insert_claim(&self, car: CarId, claim: NewClaim) -> Result<Claim, RepositoryError> {
        let mut state = self.state()?;
        if !state.cars.contains_key(&car) {
            return Err(RepositoryError::NotFound);
        }

        let record = Claim {
            id: ClaimId(state.next_id()),
            car,
            claim_date: claim.claim_date,
            description: claim.description,
            amount: claim.amount,
            created_at: Utc::now(),
        };
        state.claims.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_claim(&self, id: ClaimId, claim: NewClaim) -> Result<Claim, RepositoryError> {
        let mut state = self.state()?;
        let record = state.claims.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        record.claim_date = claim.claim_date;
        record.description = claim.description;
        record.amount = claim.amount;
        Ok(record.clone())
    }

    async fn fetch_claim(&self, id: ClaimId) -> Result<Option<Claim>, RepositoryError> {
        Ok(self.state()?.claims.get(&id).cloned())
    }

    async fn delete_claim(&self, id: ClaimId) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        state
            .claims
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_claims(&self, page: PageRequest) -> Result<Vec<Claim>, RepositoryError> {
        let state = self.state()?;
        let mut claims: Vec<_> = state.claims.values().cloned().collect();
        claims.sort_by_key(|claim| (Reverse(claim.claim_date), claim.id));
        Ok(page_of(claims.into_iter(), page))
    }

    async fn count_claims(&self) -> Result<u64, RepositoryError> {
        Ok(self.state()?.claims.len() as u64)
    }

    async fn claims_for_car(&self, car: CarId) -> Result<Vec<Claim>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .claims
            .values()
            .filter(|claim| claim.car == car)
            .cloned()
            .collect())
    }

    async fn log_expired_policies(
        &self,
        today: NaiveDate,
        logged_at: DateTime<Utc>,
        batch_limit: u32,
    ) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        let mut state = self.state()?;
        let due: Vec<(PolicyId, CarId)> = state
            .policies
            .values()
            .filter(|policy| {
                policy.has_expired(today)
                    && policy.logged_expiry_at.is_none()
                    && !state.expiry_log.contains_key(&policy.id)
            })
            .take(batch_limit as usize)
            .map(|policy| (policy.id, policy.car))
            .collect();

        let mut logged = Vec::with_capacity(due.len());
        for (policy_id, car) in due {
            let entry = ExpiryLogEntry {
                id: ExpiryLogId(state.next_id()),
                policy: policy_id,
                car,
                logged_at,
            };
            state.expiry_log.insert(policy_id, entry.clone());
            if let Some(policy) = state.policies.get_mut(&policy_id) {
                policy.logged_expiry_at = Some(logged_at);
            }
            logged.push(entry);
        }

        Ok(logged)
    }

    async fn expiry_log(&self, page: PageRequest) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        let state = self.state()?;
        let mut entries: Vec<_> = state.expiry_log.values().cloned().collect();
        entries.sort_by_key(|entry| entry.id);
        Ok(page_of(entries.into_iter(), page))
    }

    async fn count_expiry_log(&self) -> Result<u64, RepositoryError> {
        Ok(self.state()?.expiry_log.len() as u64)
    }
}
