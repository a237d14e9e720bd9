use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::contract::SECURITY_DEPOSIT_GRACE_DAYS;
use super::cycle::{CycleSnapshot, PaymentRecord, PaymentTrigger, RentCycle};
use super::domain::{
    Amount, ListingDescriptor, PartyId, RequestId, RequestStatus, TenancyId, TenancyStatus,
    TransactionId,
};
use super::request::TenancyRequest;

/// Agreement text and signature tokens frozen at countersignature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedContract {
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub tenant_signature: String,
    pub owner_signature: String,
}

/// Outcome of the latest unattended collection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPaymentStatus {
    Success,
    Skipped,
    InsufficientFunds,
    Error,
}

impl AutoPaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AutoPaymentStatus::Success => "success",
            AutoPaymentStatus::Skipped => "skipped",
            AutoPaymentStatus::InsufficientFunds => "insufficient_funds",
            AutoPaymentStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPaymentState {
    pub enabled: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_status: Option<AutoPaymentStatus>,
}

/// The binding agreement created from a completed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenancy {
    pub id: TenancyId,
    pub request_id: RequestId,
    pub tenant_id: PartyId,
    pub owner_id: PartyId,
    pub listing: ListingDescriptor,
    pub monthly_rent: Amount,
    pub security_deposit: Amount,
    pub move_in: NaiveDate,
    pub lease_start: NaiveDate,
    pub lease_end: NaiveDate,
    pub rent_due_day: u32,
    pub security_deposit_due: NaiveDate,
    pub contract_signed_at: DateTime<Utc>,
    pub signed_contract: SignedContract,
    pub status: TenancyStatus,
    pub current_cycle: RentCycle,
    pub payments: Vec<PaymentRecord>,
    pub auto_payment: AutoPaymentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenancy {
    /// Build the tenancy for a completed, fully signed request; `None` otherwise.
    pub fn from_completed_request(
        id: TenancyId,
        request: &TenancyRequest,
        signed_at: DateTime<Utc>,
    ) -> Option<Self> {
        if request.status != RequestStatus::Completed {
            return None;
        }
        let contract = request.contract.as_ref()?;
        if !contract.fully_signed() {
            return None;
        }
        let terms = &contract.terms;

        let signed_contract = SignedContract {
            content: terms.content.clone(),
            generated_at: terms.generated_at,
            tenant_signature: contract.tenant_signature.signature_token.clone()?,
            owner_signature: contract.owner_signature.signature_token.clone()?,
        };

        let security_deposit_due = signed_at
            .date_naive()
            .checked_add_days(Days::new(u64::from(SECURITY_DEPOSIT_GRACE_DAYS)))
            .unwrap_or(NaiveDate::MAX);

        Some(Self {
            id,
            request_id: request.id.clone(),
            tenant_id: request.tenant_id.clone(),
            owner_id: request.owner_id.clone(),
            listing: terms.listing.clone(),
            monthly_rent: terms.monthly_rent,
            security_deposit: terms.security_deposit,
            move_in: terms.move_in,
            lease_start: terms.lease_start,
            lease_end: terms.lease_end,
            rent_due_day: terms.rent_due_day,
            security_deposit_due,
            contract_signed_at: signed_at,
            signed_contract,
            status: TenancyStatus::Registered,
            current_cycle: RentCycle::initialize(
                terms.lease_start,
                terms.rent_due_day,
                terms.monthly_rent,
            ),
            payments: Vec::new(),
            auto_payment: AutoPaymentState::default(),
            created_at: signed_at,
            updated_at: signed_at,
        })
    }

    pub fn cycle_snapshot(&self, now: DateTime<Utc>) -> CycleSnapshot {
        self.current_cycle
            .snapshot(now, &self.payments, self.move_in)
    }

    /// Mark the current cycle paid, append the payment record and advance the cursor.
    pub fn settle_current_cycle(
        &mut self,
        trigger: PaymentTrigger,
        transaction_id: Option<TransactionId>,
        now: DateTime<Utc>,
    ) -> PaymentRecord {
        let record = self.current_cycle.mark_paid_and_advance(
            &mut self.payments,
            self.monthly_rent,
            trigger,
            transaction_id,
            now,
        );
        if self.status == TenancyStatus::Registered {
            self.status = TenancyStatus::Active;
        }
        self.updated_at = now;
        record
    }

    pub fn record_auto_payment_attempt(&mut self, status: AutoPaymentStatus, at: DateTime<Utc>) {
        self.auto_payment.last_attempt_at = Some(at);
        self.auto_payment.last_status = Some(status);
        self.updated_at = at;
    }

    pub fn set_auto_payment(&mut self, enabled: bool, at: DateTime<Utc>) {
        self.auto_payment.enabled = enabled;
        self.updated_at = at;
    }

    pub fn is_collectible(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Scheduler selection predicate: unattended payment on, collectible, unpaid and due no
    /// later than `date`. Overdue cycles stay selected until they settle.
    pub fn due_for_auto_payment_on(&self, date: NaiveDate) -> bool {
        self.auto_payment.enabled
            && self.is_collectible()
            && !self.current_cycle.is_paid
            && self.current_cycle.due_date <= date
    }
}
