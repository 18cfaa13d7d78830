use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::insurance::domain::{
    Amount, Car, CarId, Claim, ClaimId, ExpiryLogEntry, InsurancePolicy, NewCar, NewClaim,
    NewPolicy, PolicyId,
};
use crate::insurance::memory::InMemoryInsuranceRepository;
use crate::insurance::pagination::PageRequest;
use crate::insurance::repository::{InsuranceRepository, RepositoryError};
use crate::insurance::router::insurance_router;
use crate::insurance::service::InsuranceService;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn new_car(vin: &str) -> NewCar {
    NewCar {
        vin: vin.to_string(),
        make: "Skoda".to_string(),
        model: "Octavia".to_string(),
        year_of_manufacture: 2019,
    }
}

pub(super) fn new_policy(provider: &str, start_date: NaiveDate, end_date: NaiveDate) -> NewPolicy {
    NewPolicy {
        provider: Some(provider.to_string()),
        start_date,
        end_date,
    }
}

pub(super) fn new_claim(claim_date: NaiveDate, cents: i64) -> NewClaim {
    NewClaim {
        claim_date,
        description: "Rear bumper repair following minor collision".to_string(),
        amount: Amount::from_cents(cents),
    }
}

pub(super) fn build_service() -> (
    InsuranceService<InMemoryInsuranceRepository>,
    Arc<InMemoryInsuranceRepository>,
) {
    let repository = Arc::new(InMemoryInsuranceRepository::new());
    let service = InsuranceService::new(repository.clone());
    (service, repository)
}

pub(super) async fn registered_car(
    service: &InsuranceService<InMemoryInsuranceRepository>,
    vin: &str,
) -> Car {
    service
        .create_car(new_car(vin))
        .await
        .expect("car registers")
}

pub(super) fn router_with_service(
    service: InsuranceService<InMemoryInsuranceRepository>,
) -> axum::Router {
    insurance_router(service)
}

pub(super) fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("json body")))
        .expect("request builds")
}

pub(super) fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

pub(super) struct UnavailableRepository;

#[async_trait]
impl InsuranceRepository for UnavailableRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        offline()
    }

    async fn insert_car(&self, _car: NewCar) -> Result<Car, RepositoryError> {
        offline()
    }

    async fn update_car(&self, _id: CarId, _car: NewCar) -> Result<Car, RepositoryError> {
        offline()
    }

    async fn delete_car(&self, _id: CarId) -> Result<(), RepositoryError> {
        offline()
    }

    async fn fetch_car(&self, _id: CarId) -> Result<Option<Car>, RepositoryError> {
        offline()
    }

    async fn list_cars(&self, _page: PageRequest) -> Result<Vec<Car>, RepositoryError> {
        offline()
    }

    async fn count_cars(&self) -> Result<u64, RepositoryError> {
        offline()
    }

    async fn insert_policy(
        &self,
        _car: CarId,
        _policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        offline()
    }

    async fn update_policy(
        &self,
        _id: PolicyId,
        _policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        offline()
    }

    async fn fetch_policy(&self, _id: PolicyId) -> Result<Option<InsurancePolicy>, RepositoryError> {
        offline()
    }

    async fn delete_policy(&self, _id: PolicyId) -> Result<(), RepositoryError> {
        offline()
    }

    async fn list_policies(
        &self,
        _page: PageRequest,
    ) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        offline()
    }

    async fn count_policies(&self) -> Result<u64, RepositoryError> {
        offline()
    }

    async fn policies_for_car(&self, _car: CarId) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        offline()
    }

    async fn has_active_policy(
        &self,
        _car: CarId,
        _date: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        offline()
    }

    async fn insert_claim(&self, _car: CarId, _claim: NewClaim) -> Result<Claim, RepositoryError> {
        offline()
    }

    async fn update_claim(&self, _id: ClaimId, _claim: NewClaim) -> Result<Claim, RepositoryError> {
        offline()
    }

    async fn fetch_claim(&self, _id: ClaimId) -> Result<Option<Claim>, RepositoryError> {
        offline()
    }

    async fn delete_claim(&self, _id: ClaimId) -> Result<(), RepositoryError> {
        offline()
    }

    async fn list_claims(&self, _page: PageRequest) -> Result<Vec<Claim>, RepositoryError> {
        offline()
    }

    async fn count_claims(&self) -> Result<u64, RepositoryError> {
        offline()
    }

    async fn claims_for_car(&self, _car: CarId) -> Result<Vec<Claim>, RepositoryError> {
        offline()
    }

    async fn log_expired_policies(
        &self,
        _today: NaiveDate,
        _logged_at: DateTime<Utc>,
        _batch_limit: u32,
    ) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        offline()
    }

    async fn expiry_log(&self, _page: PageRequest) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        offline()
    }

    async fn count_expiry_log(&self) -> Result<u64, RepositoryError> {
        offline()
    }
}

/// In-memory repository whose expiry runs fail until `failures` calls have been made.
pub(super) struct FlakyRepository {
    inner: InMemoryInsuranceRepository,
    failures: AtomicU32,
    expiry_calls: AtomicU32,
}

impl FlakyRepository {
    pub(super) fn failing_first(failures: u32) -> Self {
        Self {
            inner: InMemoryInsuranceRepository::new(),
            failures: AtomicU32::new(failures),
            expiry_calls: AtomicU32::new(0),
        }
    }

    pub(super) fn expiry_calls(&self) -> u32 {
        self.expiry_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InsuranceRepository for FlakyRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.inner.ping().await
    }

    async fn insert_car(&self, car: NewCar) -> Result<Car, RepositoryError> {
        self.inner.insert_car(car).await
    }

    async fn update_car(&self, id: CarId, car: NewCar) -> Result<Car, RepositoryError> {
        self.inner.update_car(id, car).await
    }

    async fn delete_car(&self, id: CarId) -> Result<(), RepositoryError> {
        self.inner.delete_car(id).await
    }

    async fn fetch_car(&self, id: CarId) -> Result<Option<Car>, RepositoryError> {
        self.inner.fetch_car(id).await
    }

    async fn list_cars(&self, page: PageRequest) -> Result<Vec<Car>, RepositoryError> {
        self.inner.list_cars(page).await
    }

    async fn count_cars(&self) -> Result<u64, RepositoryError> {
        self.inner.count_cars().await
    }

    async fn insert_policy(
        &self,
        car: CarId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        self.inner.insert_policy(car, policy).await
    }

    async fn update_policy(
        &self,
        id: PolicyId,
        policy: NewPolicy,
    ) -> Result<InsurancePolicy, RepositoryError> {
        self.inner.update_policy(id, policy).await
    }

    async fn fetch_policy(&self, id: PolicyId) -> Result<Option<InsurancePolicy>, RepositoryError> {
        self.inner.fetch_policy(id).await
    }

    async fn delete_policy(&self, id: PolicyId) -> Result<(), RepositoryError> {
        self.inner.delete_policy(id).await
    }

    async fn list_policies(
        &self,
        page: PageRequest,
    ) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        self.inner.list_policies(page).await
    }

    async fn count_policies(&self) -> Result<u64, RepositoryError> {
        self.inner.count_policies().await
    }

    async fn policies_for_car(&self, car: CarId) -> Result<Vec<InsurancePolicy>, RepositoryError> {
        self.inner.policies_for_car(car).await
    }

    async fn has_active_policy(&self, car: CarId, date: NaiveDate) -> Result<bool, RepositoryError> {
        self.inner.has_active_policy(car, date).await
    }

    async fn insert_claim(&self, car: CarId, claim: NewClaim) -> Result<Claim, RepositoryError> {
        self.inner.insert_claim(car, claim).await
    }

    async fn update_claim(&self, id: ClaimId, claim: NewClaim) -> Result<Claim, RepositoryError> {
        self.inner.update_claim(id, claim).await
    }

    async fn fetch_claim(&self, id: ClaimId) -> Result<Option<Claim>, RepositoryError> {
        self.inner.fetch_claim(id).await
    }

    async fn delete_claim(&self, id: ClaimId) -> Result<(), RepositoryError> {
        self.inner.delete_claim(id).await
    }

    async fn list_claims(&self, page: PageRequest) -> Result<Vec<Claim>, RepositoryError> {
        self.inner.list_claims(page).await
    }

    async fn count_claims(&self) -> Result<u64, RepositoryError> {
        self.inner.count_claims().await
    }

    async fn claims_for_car(&self, car: CarId) -> Result<Vec<Claim>, RepositoryError> {
        self.inner.claims_for_car(car).await
    }

    async fn log_expired_policies(
        &self,
        today: NaiveDate,
        logged_at: DateTime<Utc>,
        batch_limit: u32,
    ) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        self.expiry_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if remaining.is_ok() {
            return offline();
        }
        self.inner
            .log_expired_policies(today, logged_at, batch_limit)
            .await
    }

    async fn expiry_log(&self, page: PageRequest) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        self.inner.expiry_log(page).await
    }

    async fn count_expiry_log(&self) -> Result<u64, RepositoryError> {
        self.inner.count_expiry_log().await
    }
}
