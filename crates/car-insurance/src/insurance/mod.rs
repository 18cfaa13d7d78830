//! Cars, their insurance policies and claims.

pub mod domain;
pub mod memory;
pub mod pagination;
pub mod postgres;
pub mod repository;
pub mod router;
pub mod service;
pub mod validation;

#[cfg(test)]
mod tests;

pub use domain::{
    Amount, Car, CarId, Claim, ClaimId, ExpiryLogEntry, ExpiryLogId, HistoryEntry,
    InsurancePolicy, InsuranceValidity, NewCar, NewClaim, NewPolicy, PolicyId,
};
pub use memory::InMemoryInsuranceRepository;
pub use pagination::{Page, PageQuery, PageRequest};
pub use postgres::{PgInsuranceRepository, StoreError};
pub use repository::{InsuranceRepository, RepositoryError};
pub use router::{insurance_router, ApiError};
pub use service::{InsuranceService, Resource, ServiceError};
pub use validation::{CarInput, ClaimInput, PolicyInput, ValidationErrors};
