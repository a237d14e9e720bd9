use chrono::NaiveDate;

use super::domain::{ListingId, RequestId, TenancyId};
use super::request::TenancyRequest;
use super::tenancy::Tenancy;

/// Storage abstraction for tenancy requests.
pub trait RequestRepository: Send + Sync {
    fn insert(&self, request: TenancyRequest) -> Result<TenancyRequest, RepositoryError>;
    fn update(&self, request: TenancyRequest) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &RequestId) -> Result<Option<TenancyRequest>, RepositoryError>;
    fn delete(&self, id: &RequestId) -> Result<(), RepositoryError>;
    fn for_listing(&self, listing: &ListingId) -> Result<Vec<TenancyRequest>, RepositoryError>;
}

/// Storage abstraction for tenancies and their rent-cycle cursor.
pub trait TenancyRepository: Send + Sync {
    fn insert(&self, tenancy: Tenancy) -> Result<Tenancy, RepositoryError>;
    fn update(&self, tenancy: Tenancy) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &TenancyId) -> Result<Option<Tenancy>, RepositoryError>;
    fn find_by_request(&self, request: &RequestId) -> Result<Option<Tenancy>, RepositoryError>;
    /// Tenancies with unattended payment enabled whose unpaid cycle is due on or before `due_on`.
    fn due_for_auto_payment(&self, due_on: NaiveDate) -> Result<Vec<Tenancy>, RepositoryError>;
    /// Every tenancy that has not reached a terminal status.
    fn collectible(&self) -> Result<Vec<Tenancy>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
