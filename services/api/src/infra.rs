use chrono::NaiveDate;
use leasekeeper::workflows::tenancy::{
    AutoPaymentScheduler, Clock, Ledger, ListingId, Notification, NotificationError,
    NotificationSink, PartyId, PartyProfile, ProfileCompleteness, ProfileDirectory, ProfileError,
    RentPaymentService, RepositoryError, RequestId, RequestRepository, SystemClock, Tenancy,
    TenancyApi, TenancyId, TenancyRepository, TenancyRequest, TenancyRequestService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub(crate) type ApiState = TenancyApi<InMemoryRequestRepository, InMemoryTenancyRepository>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryRequestRepository {
    records: Arc<Mutex<HashMap<RequestId, TenancyRequest>>>,
}

fn poisoned(store: &str) -> RepositoryError {
    RepositoryError::Unavailable(format!("{store} mutex poisoned"))
}

impl RequestRepository for InMemoryRequestRepository {
    fn insert(&self, request: TenancyRequest) -> Result<TenancyRequest, RepositoryError> {
        let mut guard = self.records.lock().map_err(|_| poisoned("request"))?;
        if guard.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn update(&self, request: TenancyRequest) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().map_err(|_| poisoned("request"))?;
        if guard.contains_key(&request.id) {
            guard.insert(request.id.clone(), request);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<TenancyRequest>, RepositoryError> {
        let guard = self.records.lock().map_err(|_| poisoned("request"))?;
        Ok(guard.get(id).cloned())
    }

    fn delete(&self, id: &RequestId) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().map_err(|_| poisoned("request"))?;
        guard
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    fn for_listing(&self, listing: &ListingId) -> Result<Vec<TenancyRequest>, RepositoryError> {
        let guard = self.records.lock().map_err(|_| poisoned("request"))?;
        let mut matching: Vec<TenancyRequest> = guard
            .values()
            .filter(|request| &request.listing.listing_id == listing)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryTenancyRepository {
    records: Arc<Mutex<HashMap<TenancyId, Tenancy>>>,
}

impl InMemoryTenancyRepository {
    fn select<F>(&self, predicate: F) -> Result<Vec<Tenancy>, RepositoryError>
    where
        F: Fn(&Tenancy) -> bool,
    {
        let guard = self.records.lock().map_err(|_| poisoned("tenancy"))?;
        let mut matching: Vec<Tenancy> = guard
            .values()
            .filter(|tenancy| predicate(tenancy))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }
}

impl TenancyRepository for InMemoryTenancyRepository {
    fn insert(&self, tenancy: Tenancy) -> Result<Tenancy, RepositoryError> {
        let mut guard = self.records.lock().map_err(|_| poisoned("tenancy"))?;
        if guard.contains_key(&tenancy.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(tenancy.id.clone(), tenancy.clone());
        Ok(tenancy)
    }

    fn update(&self, tenancy: Tenancy) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().map_err(|_| poisoned("tenancy"))?;
        if guard.contains_key(&tenancy.id) {
            guard.insert(tenancy.id.clone(), tenancy);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &TenancyId) -> Result<Option<Tenancy>, RepositoryError> {
        let guard = self.records.lock().map_err(|_| poisoned("tenancy"))?;
        Ok(guard.get(id).cloned())
    }

    fn find_by_request(&self, request: &RequestId) -> Result<Option<Tenancy>, RepositoryError> {
        let guard = self.records.lock().map_err(|_| poisoned("tenancy"))?;
        Ok(guard
            .values()
            .find(|tenancy| &tenancy.request_id == request)
            .cloned())
    }

    fn due_for_auto_payment(&self, due_on: NaiveDate) -> Result<Vec<Tenancy>, RepositoryError> {
        self.select(|tenancy| tenancy.due_for_auto_payment_on(due_on))
    }

    fn collectible(&self) -> Result<Vec<Tenancy>, RepositoryError> {
        self.select(Tenancy::is_collectible)
    }
}

/// Profile lookup backed by registered profiles.
///
/// A party never registered is provisioned with a complete profile, so the owner-at-accept
/// and tenant-at-countersign checks only reject parties registered with missing fields
/// (`PUT /api/v1/profiles/:party_id`). Until a profile backend is wired in, those checks
/// are inert for everyone else.
#[derive(Default, Clone)]
pub(crate) struct InMemoryProfileDirectory {
    profiles: Arc<Mutex<HashMap<PartyId, PartyProfile>>>,
}

impl InMemoryProfileDirectory {
    pub(crate) fn register(&self, profile: PartyProfile) -> Result<PartyProfile, ProfileError> {
        let mut guard = self
            .profiles
            .lock()
            .map_err(|_| ProfileError::Unavailable("profile mutex poisoned".to_string()))?;
        debug!(party_id = %profile.party_id, complete = profile.completeness.is_complete(), "profile registered");
        guard.insert(profile.party_id.clone(), profile.clone());
        Ok(profile)
    }

    fn lookup(&self, party: &PartyId) -> Result<PartyProfile, ProfileError> {
        let mut guard = self
            .profiles
            .lock()
            .map_err(|_| ProfileError::Unavailable("profile mutex poisoned".to_string()))?;
        let profile = guard.entry(party.clone()).or_insert_with(|| {
            debug!(party_id = %party, "provisioning default profile");
            PartyProfile {
                party_id: party.clone(),
                name: party.as_str().to_string(),
                government_id: format!("UNVERIFIED-{}", party.as_str()),
                completeness: ProfileCompleteness::complete(),
            }
        });
        Ok(profile.clone())
    }
}

impl ProfileDirectory for InMemoryProfileDirectory {
    fn owner_profile(&self, owner: &PartyId) -> Result<PartyProfile, ProfileError> {
        self.lookup(owner)
    }

    fn tenant_profile(&self, tenant: &PartyId) -> Result<PartyProfile, ProfileError> {
        self.lookup(tenant)
    }
}

/// Queues notifications for the delivery task; publishing never waits on delivery.
#[derive(Clone)]
pub(crate) struct ChannelNotificationSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotificationSink {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self { sender }
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sender
            .send(notification)
            .map_err(|_| NotificationError::Transport("delivery queue closed".to_string()))
    }
}

/// Drain the outbound queue until every sender is gone.
pub(crate) fn spawn_notification_delivery(
    mut receiver: mpsc::UnboundedReceiver<Notification>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut delivered = 0;
        while let Some(notification) = receiver.recv().await {
            info!(
                recipient = %notification.recipient,
                kind = notification.kind.label(),
                "notification delivered"
            );
            delivered += 1;
        }
        delivered
    })
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryOutbox {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationSink for InMemoryOutbox {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| NotificationError::Transport("outbox mutex poisoned".to_string()))?;
        guard.push(notification);
        Ok(())
    }
}

impl InMemoryOutbox {
    pub(crate) fn drain(&self) -> Vec<Notification> {
        match self.events.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Wire the tenancy services over the in-memory adapters.
pub(crate) fn assemble(
    profiles: InMemoryProfileDirectory,
    notifications: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    reminder_days: i64,
) -> Arc<ApiState> {
    let requests = Arc::new(InMemoryRequestRepository::default());
    let tenancies = Arc::new(InMemoryTenancyRepository::default());
    let ledger = Arc::new(Ledger::new());

    let request_service = Arc::new(TenancyRequestService::new(
        requests,
        tenancies.clone(),
        Arc::new(profiles),
        notifications.clone(),
    ));
    let payments = Arc::new(RentPaymentService::new(
        tenancies.clone(),
        ledger,
        notifications.clone(),
    ));
    let scheduler = Arc::new(AutoPaymentScheduler::new(
        tenancies,
        payments.clone(),
        notifications,
    ));

    Arc::new(TenancyApi {
        requests: request_service,
        payments,
        scheduler,
        clock,
        reminder_days,
    })
}

pub(crate) fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasekeeper::workflows::tenancy::NotificationKind;

    #[tokio::test]
    async fn channel_sink_feeds_the_delivery_task() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let delivery = spawn_notification_delivery(receiver);
        let sink = ChannelNotificationSink::new(sender);

        sink.publish(Notification::new(
            PartyId::new("tenant-1"),
            NotificationKind::RentReminder,
        ))
        .expect("queued");
        drop(sink);

        assert_eq!(delivery.await.expect("delivery task"), 1);
    }

    #[test]
    fn closed_queue_is_a_transport_error() {
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let sink = ChannelNotificationSink::new(sender);

        let result = sink.publish(Notification::new(
            PartyId::new("tenant-1"),
            NotificationKind::RentPaid,
        ));
        assert!(matches!(result, Err(NotificationError::Transport(_))));
    }

    #[test]
    fn registered_profiles_override_the_default() {
        let directory = InMemoryProfileDirectory::default();
        let party = PartyId::new("owner-1");
        directory.register(PartyProfile {
            party_id: party.clone(),
            name: "Olive Owner".to_string(),
            government_id: String::new(),
            completeness: ProfileCompleteness::missing(["government_id"]),
        })
        .expect("registered");

        let profile = directory.owner_profile(&party).expect("profile");
        assert!(!profile.completeness.is_complete());
        let stranger = directory
            .tenant_profile(&PartyId::new("tenant-9"))
            .expect("provisioned");
        assert!(stranger.completeness.is_complete());
    }
}
