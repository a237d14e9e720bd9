use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::to_bytes;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::tenancy::collaborators::{
    Clock, Notification, NotificationError, NotificationKind, NotificationSink, PartyProfile,
    ProfileCompleteness, ProfileDirectory, ProfileError,
};
use crate::workflows::tenancy::domain::{
    Amount, ListingDescriptor, ListingId, PartyId, RequestId, TenancyId,
};
use crate::workflows::tenancy::ledger::Ledger;
use crate::workflows::tenancy::lifecycle::TenancyRequestService;
use crate::workflows::tenancy::payments::RentPaymentService;
use crate::workflows::tenancy::repository::{
    RepositoryError, RequestRepository, TenancyRepository,
};
use crate::workflows::tenancy::request::{RequestSubmission, TenancyRequest};
use crate::workflows::tenancy::router::TenancyApi;
use crate::workflows::tenancy::scheduler::AutoPaymentScheduler;
use crate::workflows::tenancy::tenancy::Tenancy;

pub(super) const TENANT: &str = "tenant-ana";
pub(super) const OWNER: &str = "owner-bo";
pub(super) const LISTING: &str = "listing-elm-12";

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid instant")
}

pub(super) fn tenant() -> PartyId {
    PartyId::new(TENANT)
}

pub(super) fn owner() -> PartyId {
    PartyId::new(OWNER)
}

pub(super) fn listing() -> ListingDescriptor {
    ListingDescriptor {
        listing_id: ListingId::new(LISTING),
        title: "Sunny two-bedroom on Elm".to_string(),
        address: "12 Elm Street, Springfield".to_string(),
    }
}

pub(super) fn submission() -> RequestSubmission {
    submission_from(tenant(), Amount::from_dollars(800))
}

pub(super) fn submission_from(tenant_id: PartyId, bid: Amount) -> RequestSubmission {
    RequestSubmission {
        tenant_id,
        owner_id: owner(),
        listing: listing(),
        move_in: date(2025, 3, 10),
        bid_amount: bid,
        message: Some("Quiet professional, no pets.".to_string()),
        lease_months: None,
    }
}

#[derive(Default)]
pub(super) struct MemoryRequests {
    records: Mutex<HashMap<RequestId, TenancyRequest>>,
}

impl MemoryRequests {
    pub(super) fn stored(&self, id: &RequestId) -> TenancyRequest {
        self.records
            .lock()
            .expect("request store poisoned")
            .get(id)
            .cloned()
            .expect("request stored")
    }
}

impl RequestRepository for MemoryRequests {
    fn insert(&self, request: TenancyRequest) -> Result<TenancyRequest, RepositoryError> {
        let mut guard = self.records.lock().expect("request store poisoned");
        if guard.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn update(&self, request: TenancyRequest) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("request store poisoned");
        if !guard.contains_key(&request.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(request.id.clone(), request);
        Ok(())
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<TenancyRequest>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("request store poisoned")
            .get(id)
            .cloned())
    }

    fn delete(&self, id: &RequestId) -> Result<(), RepositoryError> {
        self.records
            .lock()
            .expect("request store poisoned")
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn for_listing(&self, listing: &ListingId) -> Result<Vec<TenancyRequest>, RepositoryError> {
        let guard = self.records.lock().expect("request store poisoned");
        let mut matching: Vec<TenancyRequest> = guard
            .values()
            .filter(|request| &request.listing.listing_id == listing)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }
}

#[derive(Default)]
pub(super) struct MemoryTenancies {
    records: Mutex<HashMap<TenancyId, Tenancy>>,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryTenancies {
    pub(super) fn stored(&self, id: &TenancyId) -> Tenancy {
        self.records
            .lock()
            .expect("tenancy store poisoned")
            .get(id)
            .cloned()
            .expect("tenancy stored")
    }

    pub(super) fn count(&self) -> usize {
        self.records.lock().expect("tenancy store poisoned").len()
    }

    pub(super) fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub(super) fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a record, bypassing the services.
    pub(super) fn replace(&self, tenancy: Tenancy) {
        self.records
            .lock()
            .expect("tenancy store poisoned")
            .insert(tenancy.id.clone(), tenancy);
    }
}

impl TenancyRepository for MemoryTenancies {
    fn insert(&self, tenancy: Tenancy) -> Result<Tenancy, RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("insert disabled".to_string()));
        }
        let mut guard = self.records.lock().expect("tenancy store poisoned");
        if guard.contains_key(&tenancy.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(tenancy.id.clone(), tenancy.clone());
        Ok(tenancy)
    }

    fn update(&self, tenancy: Tenancy) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("update disabled".to_string()));
        }
        let mut guard = self.records.lock().expect("tenancy store poisoned");
        if !guard.contains_key(&tenancy.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(tenancy.id.clone(), tenancy);
        Ok(())
    }

    fn fetch(&self, id: &TenancyId) -> Result<Option<Tenancy>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("tenancy store poisoned")
            .get(id)
            .cloned())
    }

    fn find_by_request(&self, request: &RequestId) -> Result<Option<Tenancy>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .expect("tenancy store poisoned")
            .values()
            .find(|tenancy| &tenancy.request_id == request)
            .cloned())
    }

    fn due_for_auto_payment(&self, due_on: NaiveDate) -> Result<Vec<Tenancy>, RepositoryError> {
        let guard = self.records.lock().expect("tenancy store poisoned");
        let mut due: Vec<Tenancy> = guard
            .values()
            .filter(|tenancy| tenancy.due_for_auto_payment_on(due_on))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(due)
    }

    fn collectible(&self) -> Result<Vec<Tenancy>, RepositoryError> {
        let guard = self.records.lock().expect("tenancy store poisoned");
        let mut open: Vec<Tenancy> = guard
            .values()
            .filter(|tenancy| tenancy.is_collectible())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(open)
    }
}

/// Every party has a complete profile unless listed in `missing`.
#[derive(Default)]
pub(super) struct MemoryProfiles {
    missing: Mutex<HashMap<PartyId, Vec<String>>>,
}

impl MemoryProfiles {
    pub(super) fn mark_incomplete(&self, party: &PartyId, fields: &[&str]) {
        self.missing.lock().expect("profile store poisoned").insert(
            party.clone(),
            fields.iter().map(|field| field.to_string()).collect(),
        );
    }

    pub(super) fn mark_complete(&self, party: &PartyId) {
        self.missing
            .lock()
            .expect("profile store poisoned")
            .remove(party);
    }

    fn profile(&self, party: &PartyId) -> PartyProfile {
        let missing = self
            .missing
            .lock()
            .expect("profile store poisoned")
            .get(party)
            .cloned()
            .unwrap_or_default();
        PartyProfile {
            party_id: party.clone(),
            name: format!("{} Fullname", party.as_str()),
            government_id: format!("GOV-{}", party.as_str().to_uppercase()),
            completeness: ProfileCompleteness::missing(missing),
        }
    }
}

impl ProfileDirectory for MemoryProfiles {
    fn owner_profile(&self, owner: &PartyId) -> Result<PartyProfile, ProfileError> {
        Ok(self.profile(owner))
    }

    fn tenant_profile(&self, tenant: &PartyId) -> Result<PartyProfile, ProfileError> {
        Ok(self.profile(tenant))
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifications {
    events: Mutex<Vec<Notification>>,
}

impl MemoryNotifications {
    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notification mutex poisoned").clone()
    }

    pub(super) fn kinds_for(&self, party: &PartyId) -> Vec<NotificationKind> {
        self.events()
            .into_iter()
            .filter(|event| &event.recipient == party)
            .map(|event| event.kind)
            .collect()
    }

    pub(super) fn clear(&self) {
        self.events.lock().expect("notification mutex poisoned").clear();
    }
}

impl NotificationSink for MemoryNotifications {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        self.events
            .lock()
            .expect("notification mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct FailingNotifications;

impl NotificationSink for FailingNotifications {
    fn publish(&self, _notification: Notification) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }
}

pub(super) struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub(super) struct Harness {
    pub(super) requests: Arc<TenancyRequestService<MemoryRequests, MemoryTenancies>>,
    pub(super) payments: Arc<RentPaymentService<MemoryTenancies>>,
    pub(super) scheduler: Arc<AutoPaymentScheduler<MemoryTenancies>>,
    pub(super) request_store: Arc<MemoryRequests>,
    pub(super) tenancy_store: Arc<MemoryTenancies>,
    pub(super) profiles: Arc<MemoryProfiles>,
    pub(super) notifications: Arc<MemoryNotifications>,
    pub(super) ledger: Arc<Ledger>,
}

pub(super) fn harness() -> Harness {
    let request_store = Arc::new(MemoryRequests::default());
    let tenancy_store = Arc::new(MemoryTenancies::default());
    let profiles = Arc::new(MemoryProfiles::default());
    let notifications = Arc::new(MemoryNotifications::default());
    let ledger = Arc::new(Ledger::new());

    let requests = Arc::new(TenancyRequestService::new(
        request_store.clone(),
        tenancy_store.clone(),
        profiles.clone(),
        notifications.clone(),
    ));
    let payments = Arc::new(RentPaymentService::new(
        tenancy_store.clone(),
        ledger.clone(),
        notifications.clone(),
    ));
    let scheduler = Arc::new(AutoPaymentScheduler::new(
        tenancy_store.clone(),
        payments.clone(),
        notifications.clone(),
    ));

    Harness {
        requests,
        payments,
        scheduler,
        request_store,
        tenancy_store,
        profiles,
        notifications,
        ledger,
    }
}

impl Harness {
    pub(super) fn api(&self, now: DateTime<Utc>) -> Arc<TenancyApi<MemoryRequests, MemoryTenancies>> {
        Arc::new(TenancyApi {
            requests: self.requests.clone(),
            payments: self.payments.clone(),
            scheduler: self.scheduler.clone(),
            clock: Arc::new(FixedClock(now)),
            reminder_days: 3,
        })
    }

    /// Submit, accept and sign as tenant; the request ends awaiting countersignature.
    pub(super) fn tenant_signed_request(&self) -> TenancyRequest {
        let request = self
            .requests
            .submit(submission(), at(2025, 2, 20, 9))
            .expect("submitted");
        self.requests
            .accept(&request.id, &owner(), at(2025, 2, 21, 9))
            .expect("accepted");
        self.requests
            .sign_as_tenant(&request.id, &tenant(), "sig-tenant", at(2025, 2, 22, 9))
            .expect("tenant signed")
    }

    /// The full happy path: an $800 tenancy moving in on 2025-03-10.
    pub(super) fn tenancy(&self) -> Tenancy {
        let request = self.tenant_signed_request();
        self.requests
            .sign_as_owner(&request.id, &owner(), "sig-owner", at(2025, 2, 23, 9))
            .expect("owner signed")
            .tenancy
    }

    pub(super) fn fund(&self, party: &PartyId, dollars: u64) {
        self.ledger
            .deposit(party, Amount::from_dollars(dollars), None, at(2025, 2, 1, 0))
            .expect("deposit");
    }

    pub(super) fn balance(&self, party: &PartyId) -> Amount {
        self.ledger.balance(party).expect("balance")
    }
}

pub(super) async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}
