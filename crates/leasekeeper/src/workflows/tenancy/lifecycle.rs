//! Tenancy request state machine: bid, owner decision, two signatures, tenancy creation.
//!
//! Lock order is listing before request. Submission holds the listing lock, single-request
//! transitions hold the request lock, countersignature holds both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::collaborators::{
    dispatch, Notification, NotificationKind, NotificationSink, PartyProfile, ProfileDirectory,
    ProfileError,
};
use super::contract::{generate_contract, ContractInput};
use super::domain::{Amount, ListingId, PartyId, PartyIdentity, RequestId, RequestStatus, TenancyId};
use super::locks::KeyedLocks;
use super::repository::{RepositoryError, RequestRepository, TenancyRepository};
use super::request::{InvalidTransition, RequestAction, RequestSubmission, TenancyRequest};
use super::tenancy::Tenancy;

pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MIN_LEASE_MONTHS: u32 = 1;
pub const MAX_LEASE_MONTHS: u32 = 60;
pub const MIN_MOVE_IN_YEAR: i32 = 2000;
pub const MAX_MOVE_IN_YEAR: i32 = 2199;
pub const SUPERSEDED_REASON: &str = "listing leased to another applicant";

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static TENANCY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    let id = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RequestId(format!("req-{id:06}"))
}

fn next_tenancy_id() -> TenancyId {
    let id = TENANCY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    TenancyId(format!("ten-{id:06}"))
}

/// Input problems detected before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("bid amount must be positive")]
    NonPositiveBid,
    #[error("message exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("lease duration must be between {min} and {max} months (found {found})")]
    LeaseDuration { min: u32, max: u32, found: u32 },
    #[error("tenant and owner must be different parties")]
    SameParty,
    #[error("move-in date {found} must fall between {min_year} and {max_year}")]
    MoveInOutOfRange {
        min_year: i32,
        max_year: i32,
        found: NaiveDate,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Tenant,
    Owner,
}

impl std::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartyRole::Tenant => f.write_str("tenant"),
            PartyRole::Owner => f.write_str("owner"),
        }
    }
}

/// Error raised by the request service.
#[derive(Debug, thiserror::Error)]
pub enum TenancyRequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("party {party} is not the {role} on request {request_id}")]
    WrongParty {
        request_id: RequestId,
        party: PartyId,
        role: PartyRole,
    },
    #[error("{role} profile incomplete; missing: {}", missing_fields.join(", "))]
    ProfileIncomplete {
        party: PartyId,
        role: PartyRole,
        missing_fields: Vec<String>,
    },
    #[error("tenant {tenant} already has an open request on listing {listing}")]
    DuplicateRequest { tenant: PartyId, listing: ListingId },
    #[error("listing {0} is already leased")]
    ListingUnavailable(ListingId),
    #[error("completed request {0} carries no fully signed contract")]
    UnsignedContract(RequestId),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of the owner's countersignature.
#[derive(Debug, Clone, Serialize)]
pub struct Countersignature {
    pub request: TenancyRequest,
    pub tenancy: Tenancy,
    /// `false` when the call was a retry and the tenancy already existed.
    pub created: bool,
}

/// Advisory view of competing pending bids on a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BidStanding {
    pub has_higher_bids: bool,
    pub highest_bid: Amount,
    pub higher_bids_count: usize,
}

/// Service orchestrating a request from submission to tenancy creation.
pub struct TenancyRequestService<R, T> {
    requests: Arc<R>,
    tenancies: Arc<T>,
    profiles: Arc<dyn ProfileDirectory>,
    notifications: Arc<dyn NotificationSink>,
    request_locks: KeyedLocks<RequestId>,
    listing_locks: KeyedLocks<ListingId>,
}

impl<R, T> TenancyRequestService<R, T>
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    pub fn new(
        requests: Arc<R>,
        tenancies: Arc<T>,
        profiles: Arc<dyn ProfileDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            requests,
            tenancies,
            profiles,
            notifications,
            request_locks: KeyedLocks::default(),
            listing_locks: KeyedLocks::default(),
        }
    }

    /// Submit a new bid; fails if the tenant already has an open request on the listing.
    pub fn submit(
        &self,
        submission: RequestSubmission,
        now: DateTime<Utc>,
    ) -> Result<TenancyRequest, TenancyRequestError> {
        validate_submission(&submission)?;
        let tenant = self.profiles.tenant_profile(&submission.tenant_id)?;
        ensure_complete(&tenant, PartyRole::Tenant)?;

        let listing_id = submission.listing.listing_id.clone();
        let stored = self.listing_locks.run(&listing_id, || {
            let existing = self.requests.for_listing(&listing_id)?;
            if existing
                .iter()
                .any(|request| request.status == RequestStatus::Completed)
            {
                return Err(TenancyRequestError::ListingUnavailable(listing_id.clone()));
            }
            if existing.iter().any(|request| {
                request.tenant_id == submission.tenant_id && !request.status.is_terminal()
            }) {
                return Err(TenancyRequestError::DuplicateRequest {
                    tenant: submission.tenant_id.clone(),
                    listing: listing_id.clone(),
                });
            }

            let request = TenancyRequest::new(next_request_id(), submission, now);
            Ok::<_, TenancyRequestError>(self.requests.insert(request)?)
        })?;

        info!(request_id = %stored.id, listing_id = %listing_id, "tenancy request submitted");
        dispatch(
            self.notifications.as_ref(),
            Notification::new(stored.owner_id.clone(), NotificationKind::RequestSubmitted)
                .detail("request_id", &stored.id)
                .detail("listing", &stored.listing.title)
                .detail("bid_amount", stored.bid_amount),
        );
        Ok(stored)
    }

    /// `pending -> approved`: checks the owner profile and generates the agreement.
    pub fn accept(
        &self,
        request_id: &RequestId,
        owner_id: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<TenancyRequest, TenancyRequestError> {
        let request = self.request_locks.run(request_id, || {
            let mut request = self.load(request_id)?;
            ensure_party(&request, owner_id, PartyRole::Owner)?;
            if request.status != RequestStatus::Pending {
                return Err(TenancyRequestError::Transition(InvalidTransition {
                    request_id: request.id.clone(),
                    status: request.status,
                    action: RequestAction::Accept,
                }));
            }

            let owner = self.profiles.owner_profile(owner_id)?;
            ensure_complete(&owner, PartyRole::Owner)?;
            let tenant = self.profiles.tenant_profile(&request.tenant_id)?;

            let terms = generate_contract(ContractInput {
                move_in: request.move_in,
                monthly_rent: request.bid_amount,
                listing: request.listing.clone(),
                tenant: identity(&tenant),
                owner: identity(&owner),
                lease_months: request.lease_months,
                generated_at: now,
            });
            request.approve(terms, now)?;
            self.requests.update(request.clone())?;
            Ok::<_, TenancyRequestError>(request)
        })?;

        info!(request_id = %request.id, "tenancy request approved");
        dispatch(
            self.notifications.as_ref(),
            Notification::new(request.tenant_id.clone(), NotificationKind::RequestApproved)
                .detail("request_id", &request.id)
                .detail("listing", &request.listing.title),
        );
        Ok(request)
    }

    /// `pending -> rejected` with a mandatory reason.
    pub fn reject(
        &self,
        request_id: &RequestId,
        owner_id: &PartyId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TenancyRequest, TenancyRequestError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingField("reason").into());
        }

        let request = self.request_locks.run(request_id, || {
            let mut request = self.load(request_id)?;
            ensure_party(&request, owner_id, PartyRole::Owner)?;
            request.reject(reason.to_string(), now)?;
            self.requests.update(request.clone())?;
            Ok::<_, TenancyRequestError>(request)
        })?;

        info!(request_id = %request.id, "tenancy request rejected");
        dispatch(
            self.notifications.as_ref(),
            Notification::new(request.tenant_id.clone(), NotificationKind::RequestRejected)
                .detail("request_id", &request.id)
                .detail("listing", &request.listing.title)
                .detail("reason", reason),
        );
        Ok(request)
    }

    /// `approved -> awaiting_countersignature`, recording the tenant's signature token.
    pub fn sign_as_tenant(
        &self,
        request_id: &RequestId,
        tenant_id: &PartyId,
        signature_token: &str,
        now: DateTime<Utc>,
    ) -> Result<TenancyRequest, TenancyRequestError> {
        let token = required_token(signature_token)?;

        let request = self.request_locks.run(request_id, || {
            let mut request = self.load(request_id)?;
            ensure_party(&request, tenant_id, PartyRole::Tenant)?;
            request.sign_as_tenant(token, now)?;
            self.requests.update(request.clone())?;
            Ok::<_, TenancyRequestError>(request)
        })?;

        info!(request_id = %request.id, "tenant signed rental agreement");
        dispatch(
            self.notifications.as_ref(),
            Notification::new(
                request.owner_id.clone(),
                NotificationKind::ContractSignedByTenant,
            )
            .detail("request_id", &request.id)
            .detail("listing", &request.listing.title),
        );
        Ok(request)
    }

    /// `awaiting_countersignature -> completed` and creation of the tenancy.
    ///
    /// Safe to retry: a completed request returns its existing tenancy, and a completed request
    /// whose tenancy was never stored gets it now.
    pub fn sign_as_owner(
        &self,
        request_id: &RequestId,
        owner_id: &PartyId,
        signature_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Countersignature, TenancyRequestError> {
        let listing_id = self.load(request_id)?.listing.listing_id;

        let outcome = self.listing_locks.run(&listing_id, || {
            let outcome = self.request_locks.run(request_id, || {
                self.countersign_locked(request_id, owner_id, signature_token, now)
            })?;
            if outcome.created {
                self.supersede_competitors(&outcome.request, now);
            }
            Ok::<_, TenancyRequestError>(outcome)
        })?;

        if outcome.created {
            info!(
                request_id = %outcome.request.id,
                tenancy_id = %outcome.tenancy.id,
                due_day = outcome.tenancy.rent_due_day,
                "tenancy created"
            );
            let tenancy = &outcome.tenancy;
            for recipient in [&tenancy.tenant_id, &tenancy.owner_id] {
                dispatch(
                    self.notifications.as_ref(),
                    Notification::new(recipient.clone(), NotificationKind::TenancyCreated)
                        .detail("tenancy_id", &tenancy.id)
                        .detail("listing", &tenancy.listing.title)
                        .detail("monthly_rent", tenancy.monthly_rent)
                        .detail("rent_due_day", tenancy.rent_due_day)
                        .detail("security_deposit", tenancy.security_deposit)
                        .detail("security_deposit_due", tenancy.security_deposit_due),
                );
            }
        } else {
            info!(request_id = %outcome.request.id, "countersignature retried; tenancy exists");
        }
        Ok(outcome)
    }

    fn countersign_locked(
        &self,
        request_id: &RequestId,
        owner_id: &PartyId,
        signature_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Countersignature, TenancyRequestError> {
        let mut request = self.load(request_id)?;
        ensure_party(&request, owner_id, PartyRole::Owner)?;

        if request.status == RequestStatus::Completed {
            if let Some(tenancy) = self.tenancies.find_by_request(&request.id)? {
                return Ok(Countersignature {
                    request,
                    tenancy,
                    created: false,
                });
            }
            let signed_at = request
                .contract
                .as_ref()
                .and_then(|contract| contract.owner_signature.signed_at)
                .unwrap_or(now);
            let tenancy = self.create_tenancy(&request, signed_at)?;
            return Ok(Countersignature {
                request,
                tenancy,
                created: true,
            });
        }

        let token = required_token(signature_token)?;
        let tenant = self.profiles.tenant_profile(&request.tenant_id)?;
        ensure_complete(&tenant, PartyRole::Tenant)?;

        let leased_elsewhere = self
            .requests
            .for_listing(&request.listing.listing_id)?
            .iter()
            .any(|other| other.id != request.id && other.status == RequestStatus::Completed);
        if leased_elsewhere {
            return Err(TenancyRequestError::ListingUnavailable(
                request.listing.listing_id.clone(),
            ));
        }

        request.countersign(token, now)?;
        // Request first: a failed tenancy insert is recovered by the retry branch above.
        self.requests.update(request.clone())?;
        let tenancy = self.create_tenancy(&request, now)?;
        Ok(Countersignature {
            request,
            tenancy,
            created: true,
        })
    }

    fn create_tenancy(
        &self,
        request: &TenancyRequest,
        signed_at: DateTime<Utc>,
    ) -> Result<Tenancy, TenancyRequestError> {
        let tenancy = Tenancy::from_completed_request(next_tenancy_id(), request, signed_at)
            .ok_or_else(|| TenancyRequestError::UnsignedContract(request.id.clone()))?;
        Ok(self.tenancies.insert(tenancy)?)
    }

    /// Reject the other pending bids on a listing that has just been leased.
    fn supersede_competitors(&self, winner: &TenancyRequest, now: DateTime<Utc>) {
        let competitors = match self.requests.for_listing(&winner.listing.listing_id) {
            Ok(requests) => requests,
            Err(error) => {
                warn!(listing_id = %winner.listing.listing_id, %error, "could not load competing requests");
                return;
            }
        };

        for competitor in competitors
            .into_iter()
            .filter(|request| request.id != winner.id && request.status == RequestStatus::Pending)
        {
            let result = self.request_locks.run(&competitor.id, || {
                let mut request = self.load(&competitor.id)?;
                if request.status != RequestStatus::Pending {
                    return Ok(None);
                }
                request.reject(SUPERSEDED_REASON.to_string(), now)?;
                self.requests.update(request.clone())?;
                Ok::<_, TenancyRequestError>(Some(request))
            });

            match result {
                Ok(Some(request)) => {
                    info!(request_id = %request.id, winner = %winner.id, "competing request superseded");
                    dispatch(
                        self.notifications.as_ref(),
                        Notification::new(
                            request.tenant_id.clone(),
                            NotificationKind::RequestSuperseded,
                        )
                        .detail("request_id", &request.id)
                        .detail("listing", &request.listing.title)
                        .detail("reason", SUPERSEDED_REASON),
                    );
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(request_id = %competitor.id, %error, "could not supersede request")
                }
            }
        }
    }

    /// Remove a request; only its tenant may do so and only while it is pending.
    pub fn delete(
        &self,
        request_id: &RequestId,
        tenant_id: &PartyId,
    ) -> Result<(), TenancyRequestError> {
        self.request_locks.run(request_id, || {
            let request = self.load(request_id)?;
            ensure_party(&request, tenant_id, PartyRole::Tenant)?;
            request.ensure_deletable()?;
            self.requests.delete(request_id)?;
            Ok::<_, TenancyRequestError>(())
        })?;

        info!(request_id = %request_id, "tenancy request deleted");
        Ok(())
    }

    pub fn get(&self, request_id: &RequestId) -> Result<TenancyRequest, TenancyRequestError> {
        self.load(request_id)
    }

    /// Compare a prospective bid with the pending bids already on a listing.
    pub fn bid_standing(
        &self,
        listing_id: &ListingId,
        amount: Amount,
    ) -> Result<BidStanding, TenancyRequestError> {
        let pending: Vec<Amount> = self
            .requests
            .for_listing(listing_id)?
            .into_iter()
            .filter(|request| request.status == RequestStatus::Pending)
            .map(|request| request.bid_amount)
            .collect();

        let higher_bids_count = pending.iter().filter(|bid| **bid > amount).count();
        Ok(BidStanding {
            has_higher_bids: higher_bids_count > 0,
            highest_bid: pending.iter().copied().max().unwrap_or(Amount::ZERO),
            higher_bids_count,
        })
    }

    fn load(&self, request_id: &RequestId) -> Result<TenancyRequest, TenancyRequestError> {
        self.requests
            .fetch(request_id)?
            .ok_or_else(|| TenancyRequestError::NotFound(request_id.clone()))
    }
}

fn validate_submission(submission: &RequestSubmission) -> Result<(), ValidationError> {
    let required = [
        ("tenant_id", submission.tenant_id.as_str()),
        ("owner_id", submission.owner_id.as_str()),
        ("listing.listing_id", submission.listing.listing_id.as_str()),
        ("listing.title", submission.listing.title.as_str()),
        ("listing.address", submission.listing.address.as_str()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(ValidationError::MissingField(*field));
    }
    if submission.tenant_id == submission.owner_id {
        return Err(ValidationError::SameParty);
    }
    if submission.bid_amount.is_zero() {
        return Err(ValidationError::NonPositiveBid);
    }
    if !(MIN_MOVE_IN_YEAR..=MAX_MOVE_IN_YEAR).contains(&submission.move_in.year()) {
        return Err(ValidationError::MoveInOutOfRange {
            min_year: MIN_MOVE_IN_YEAR,
            max_year: MAX_MOVE_IN_YEAR,
            found: submission.move_in,
        });
    }
    if let Some(message) = &submission.message {
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ValidationError::MessageTooLong {
                max: MAX_MESSAGE_CHARS,
            });
        }
    }
    if let Some(months) = submission.lease_months {
        if !(MIN_LEASE_MONTHS..=MAX_LEASE_MONTHS).contains(&months) {
            return Err(ValidationError::LeaseDuration {
                min: MIN_LEASE_MONTHS,
                max: MAX_LEASE_MONTHS,
                found: months,
            });
        }
    }
    Ok(())
}

fn required_token(token: &str) -> Result<String, ValidationError> {
    let token = token.trim();
    if token.is_empty() {
        Err(ValidationError::MissingField("signature_token"))
    } else {
        Ok(token.to_string())
    }
}

fn ensure_party(
    request: &TenancyRequest,
    party: &PartyId,
    role: PartyRole,
) -> Result<(), TenancyRequestError> {
    let expected = match role {
        PartyRole::Tenant => &request.tenant_id,
        PartyRole::Owner => &request.owner_id,
    };
    if expected == party {
        Ok(())
    } else {
        Err(TenancyRequestError::WrongParty {
            request_id: request.id.clone(),
            party: party.clone(),
            role,
        })
    }
}

fn ensure_complete(profile: &PartyProfile, role: PartyRole) -> Result<(), TenancyRequestError> {
    if profile.completeness.is_complete() {
        Ok(())
    } else {
        Err(TenancyRequestError::ProfileIncomplete {
            party: profile.party_id.clone(),
            role,
            missing_fields: profile.completeness.missing_fields.clone(),
        })
    }
}

fn identity(profile: &PartyProfile) -> PartyIdentity {
    PartyIdentity {
        party_id: profile.party_id.clone(),
        name: profile.name.clone(),
        government_id: profile.government_id.clone(),
    }
}
