//! Tenancy lifecycle: bid to signed agreement, the monthly rent cycle and its collection.

pub mod collaborators;
pub mod contract;
pub mod cycle;
pub mod domain;
pub mod ledger;
pub mod lifecycle;
pub(crate) mod locks;
pub mod payments;
pub mod repository;
pub mod request;
pub mod router;
pub mod scheduler;
#[allow(clippy::module_inception)]
pub mod tenancy;

#[cfg(test)]
mod tests;

pub use collaborators::{
    Clock, Notification, NotificationError, NotificationKind, NotificationSink, PartyProfile,
    ProfileCompleteness, ProfileDirectory, ProfileError, SystemClock,
};
pub use contract::{generate_contract, ContractInput, GeneratedContract};
pub use cycle::{CycleSnapshot, PaymentKind, PaymentRecord, PaymentTrigger, RentCycle};
pub use domain::{
    Amount, BillingPeriod, ListingDescriptor, ListingId, PartyId, PartyIdentity, RequestId,
    RequestStatus, TenancyId, TenancyStatus, TransactionId,
};
pub use ledger::{
    InsufficientFunds, Ledger, LedgerError, LedgerTransaction, RentReceipt, RentTransfer,
    TransactionKind, TransactionPage, TransactionQuery,
};
pub use lifecycle::{
    BidStanding, Countersignature, PartyRole, TenancyRequestError, TenancyRequestService,
    ValidationError,
};
pub use payments::{CycleStatus, PaymentError, PaymentOutcome, RentPaymentService, Settlement};
pub use repository::{RepositoryError, RequestRepository, TenancyRepository};
pub use request::{InvalidTransition, RequestAction, RequestSubmission, RequestStatusView, TenancyRequest};
pub use router::{tenancy_router, TenancyApi};
pub use scheduler::{
    spawn_auto_payment_task, AutoPaymentScheduler, SchedulerHandle, SchedulerReport,
    TenancyRunResult,
};
pub use tenancy::{AutoPaymentState, AutoPaymentStatus, SignedContract, Tenancy};
