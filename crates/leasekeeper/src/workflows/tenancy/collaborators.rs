//! Contracts for the systems the tenancy core calls out to.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::PartyId;

/// Completeness of a party's profile as judged by the profile service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCompleteness {
    pub missing_fields: Vec<String>,
}

impl ProfileCompleteness {
    pub fn complete() -> Self {
        Self::default()
    }

    pub fn missing<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            missing_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty()
    }
}

/// Profile service lookup; it owns the completeness predicate and the identity details.
pub trait ProfileDirectory: Send + Sync {
    fn owner_profile(&self, owner: &PartyId) -> Result<PartyProfile, ProfileError>;
    fn tenant_profile(&self, tenant: &PartyId) -> Result<PartyProfile, ProfileError>;
}

/// Identity details plus the completeness verdict for one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyProfile {
    pub party_id: PartyId,
    pub name: String,
    pub government_id: String,
    pub completeness: ProfileCompleteness,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found for party {0}")]
    NotFound(PartyId),
    #[error("profile service unavailable: {0}")]
    Unavailable(String),
}

/// Event types delivered to parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestSubmitted,
    RequestApproved,
    RequestRejected,
    RequestSuperseded,
    ContractSignedByTenant,
    TenancyCreated,
    RentPaid,
    RentReceived,
    AutoPaymentSucceeded,
    AutoPaymentFailed,
    RentReminder,
}

impl NotificationKind {
    pub const fn label(self) -> &'static str {
        match self {
            NotificationKind::RequestSubmitted => "request_submitted",
            NotificationKind::RequestApproved => "request_approved",
            NotificationKind::RequestRejected => "request_rejected",
            NotificationKind::RequestSuperseded => "request_superseded",
            NotificationKind::ContractSignedByTenant => "contract_signed_by_tenant",
            NotificationKind::TenancyCreated => "tenancy_created",
            NotificationKind::RentPaid => "rent_paid",
            NotificationKind::RentReceived => "rent_received",
            NotificationKind::AutoPaymentSucceeded => "auto_payment_succeeded",
            NotificationKind::AutoPaymentFailed => "auto_payment_failed",
            NotificationKind::RentReminder => "rent_reminder",
        }
    }
}

/// Outbound notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: PartyId,
    pub kind: NotificationKind,
    pub details: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(recipient: PartyId, kind: NotificationKind) -> Self {
        Self {
            recipient,
            kind,
            details: BTreeMap::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outbound notification hook (persisted inbox, e-mail, push fan-out).
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Best-effort delivery: failures are logged and never reach the caller.
pub(crate) fn dispatch<N>(sink: &N, notification: Notification)
where
    N: NotificationSink + ?Sized,
{
    let recipient = notification.recipient.clone();
    let kind = notification.kind;
    if let Err(error) = sink.publish(notification) {
        warn!(%recipient, kind = kind.label(), %error, "notification dropped");
    }
}

/// Source of the current instant for request-driven actions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
