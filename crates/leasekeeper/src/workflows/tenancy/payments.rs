//! Rent settlement shared by the manual pay-now action and the scheduler.
//!
//! A settlement holds the tenancy lock for the whole read-check-transfer-advance sequence and
//! compares the billing period the caller saw with the one stored. Whoever loses a race finds the
//! period already advanced and gets [`PaymentOutcome::AlreadyPaid`]; it is never charged twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::collaborators::{dispatch, Notification, NotificationKind, NotificationSink};
use super::cycle::{CycleSnapshot, PaymentRecord, PaymentTrigger};
use super::domain::{BillingPeriod, PartyId, TenancyId, TenancyStatus};
use super::ledger::{InsufficientFunds, Ledger, LedgerError, RentReceipt, RentTransfer};
use super::locks::KeyedLocks;
use super::repository::{RepositoryError, TenancyRepository};
use super::tenancy::{AutoPaymentStatus, Tenancy};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("tenancy {0} not found")]
    NotFound(TenancyId),
    #[error("party {party} is not the tenant of tenancy {tenancy_id}")]
    WrongParty { tenancy_id: TenancyId, party: PartyId },
    #[error("payment window for {period} opens in {opens_in_days} day(s)")]
    WindowClosed {
        period: BillingPeriod,
        opens_in_days: i64,
    },
    #[error("tenancy {tenancy_id} is {} and accepts no payments", .status.label())]
    NotCollectible {
        tenancy_id: TenancyId,
        status: TenancyStatus,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A settled cycle: the stored tenancy after advancing plus the ledger pair.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub tenancy: Tenancy,
    pub record: PaymentRecord,
    pub receipt: RentReceipt,
}

/// Result of a settlement attempt that reached the ledger decision.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Settled(Settlement),
    /// Another writer settled `period` first.
    AlreadyPaid { period: BillingPeriod },
    InsufficientFunds {
        period: BillingPeriod,
        #[serde(flatten)]
        funds: InsufficientFunds,
    },
    /// Unattended payment was switched off after the tenancy was selected.
    AutoPaymentDisabled { period: BillingPeriod },
}

/// Current-cycle view returned by `get-current-cycle`.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStatus {
    pub tenancy_id: TenancyId,
    pub status: TenancyStatus,
    pub auto_payment_enabled: bool,
    #[serde(flatten)]
    pub cycle: CycleSnapshot,
}

pub struct RentPaymentService<T> {
    tenancies: Arc<T>,
    ledger: Arc<Ledger>,
    notifications: Arc<dyn NotificationSink>,
    locks: KeyedLocks<TenancyId>,
}

impl<T> RentPaymentService<T>
where
    T: TenancyRepository + 'static,
{
    pub fn new(
        tenancies: Arc<T>,
        ledger: Arc<Ledger>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            tenancies,
            ledger,
            notifications,
            locks: KeyedLocks::default(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn tenancy(&self, tenancy_id: &TenancyId) -> Result<Tenancy, PaymentError> {
        self.tenancies
            .fetch(tenancy_id)?
            .ok_or_else(|| PaymentError::NotFound(tenancy_id.clone()))
    }

    pub fn current_cycle(
        &self,
        tenancy_id: &TenancyId,
        now: DateTime<Utc>,
    ) -> Result<CycleStatus, PaymentError> {
        let tenancy = self.tenancy(tenancy_id)?;
        Ok(CycleStatus {
            tenancy_id: tenancy.id.clone(),
            status: tenancy.status,
            auto_payment_enabled: tenancy.auto_payment.enabled,
            cycle: tenancy.cycle_snapshot(now),
        })
    }

    /// Manual settlement of the current cycle by its tenant.
    ///
    /// `expected` pins the period the caller saw; without it the period read before locking is
    /// used, so a concurrent settlement still surfaces as `AlreadyPaid`.
    pub fn pay_now(
        &self,
        tenancy_id: &TenancyId,
        payer: &PartyId,
        expected: Option<BillingPeriod>,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, PaymentError> {
        let observed = self.tenancy(tenancy_id)?;
        if &observed.tenant_id != payer {
            return Err(PaymentError::WrongParty {
                tenancy_id: tenancy_id.clone(),
                party: payer.clone(),
            });
        }
        let expected = expected.unwrap_or(observed.current_cycle.period);
        self.settle(tenancy_id, expected, PaymentTrigger::Manual, now)
    }

    /// Single-writer settlement of `expected` for one tenancy.
    pub fn settle(
        &self,
        tenancy_id: &TenancyId,
        expected: BillingPeriod,
        trigger: PaymentTrigger,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, PaymentError> {
        let outcome = self
            .locks
            .run(tenancy_id, || self.settle_locked(tenancy_id, expected, trigger, now))?;

        if let PaymentOutcome::Settled(settlement) = &outcome {
            info!(
                tenancy_id = %tenancy_id,
                period = %settlement.record.period,
                amount = %settlement.record.amount,
                trigger = ?trigger,
                "rent settled"
            );
            self.announce(settlement, trigger);
        }
        Ok(outcome)
    }

    fn settle_locked(
        &self,
        tenancy_id: &TenancyId,
        expected: BillingPeriod,
        trigger: PaymentTrigger,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, PaymentError> {
        let tenancy = self.tenancy(tenancy_id)?;
        if !tenancy.is_collectible() {
            return Err(PaymentError::NotCollectible {
                tenancy_id: tenancy.id,
                status: tenancy.status,
            });
        }
        if tenancy.current_cycle.period != expected || tenancy.current_cycle.is_paid {
            return Ok(PaymentOutcome::AlreadyPaid { period: expected });
        }
        match trigger {
            PaymentTrigger::Manual if !tenancy.current_cycle.can_pay_at(now) => {
                let snapshot = tenancy.cycle_snapshot(now);
                return Err(PaymentError::WindowClosed {
                    period: expected,
                    opens_in_days: snapshot.days_until_window_opens,
                });
            }
            PaymentTrigger::Scheduled if !tenancy.auto_payment.enabled => {
                return Ok(PaymentOutcome::AutoPaymentDisabled { period: expected });
            }
            _ => {}
        }

        let transfer = RentTransfer {
            tenancy_id: tenancy.id.clone(),
            payer: tenancy.tenant_id.clone(),
            payee: tenancy.owner_id.clone(),
            amount: tenancy.current_cycle.amount,
            period: expected,
            at: now,
        };

        let mut txn = self.ledger.begin()?;
        let receipt = match txn.transfer_rent(&transfer) {
            Ok(receipt) => receipt,
            Err(LedgerError::InsufficientFunds(funds)) => {
                return Ok(PaymentOutcome::InsufficientFunds {
                    period: expected,
                    funds,
                });
            }
            Err(error) => return Err(error.into()),
        };

        let mut updated = tenancy;
        let record = updated.settle_current_cycle(trigger, Some(receipt.payment.id.clone()), now);
        if trigger == PaymentTrigger::Scheduled {
            updated.record_auto_payment_attempt(AutoPaymentStatus::Success, now);
        }
        // Dropping `txn` on a failed write leaves both balances untouched.
        self.tenancies.update(updated.clone())?;
        txn.commit();

        Ok(PaymentOutcome::Settled(Settlement {
            tenancy: updated,
            record,
            receipt,
        }))
    }

    fn announce(&self, settlement: &Settlement, trigger: PaymentTrigger) {
        let tenancy = &settlement.tenancy;
        let record = &settlement.record;
        let (tenant_kind, owner_kind) = match trigger {
            PaymentTrigger::Manual => (NotificationKind::RentPaid, NotificationKind::RentReceived),
            PaymentTrigger::Scheduled => (
                NotificationKind::AutoPaymentSucceeded,
                NotificationKind::RentReceived,
            ),
        };

        dispatch(
            self.notifications.as_ref(),
            Notification::new(tenancy.tenant_id.clone(), tenant_kind)
                .detail("tenancy_id", &tenancy.id)
                .detail("period", record.period.label())
                .detail("amount", record.amount)
                .detail("balance", settlement.receipt.payment.balance_after)
                .detail("next_due_date", tenancy.current_cycle.due_date),
        );
        dispatch(
            self.notifications.as_ref(),
            Notification::new(tenancy.owner_id.clone(), owner_kind)
                .detail("tenancy_id", &tenancy.id)
                .detail("period", record.period.label())
                .detail("amount", record.amount)
                .detail("balance", settlement.receipt.received.balance_after),
        );
    }

    /// Toggle unattended payment; only the tenant may change it.
    pub fn set_auto_payment(
        &self,
        tenancy_id: &TenancyId,
        tenant_id: &PartyId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Tenancy, PaymentError> {
        let tenancy = self.locks.run(tenancy_id, || {
            let mut tenancy = self.tenancy(tenancy_id)?;
            if &tenancy.tenant_id != tenant_id {
                return Err(PaymentError::WrongParty {
                    tenancy_id: tenancy_id.clone(),
                    party: tenant_id.clone(),
                });
            }
            if !tenancy.is_collectible() {
                return Err(PaymentError::NotCollectible {
                    tenancy_id: tenancy.id,
                    status: tenancy.status,
                });
            }
            tenancy.set_auto_payment(enabled, now);
            self.tenancies.update(tenancy.clone())?;
            Ok::<_, PaymentError>(tenancy)
        })?;

        info!(tenancy_id = %tenancy.id, enabled, "auto payment toggled");
        Ok(tenancy)
    }

    /// Store the outcome of an unattended attempt that did not settle.
    pub fn record_attempt(
        &self,
        tenancy_id: &TenancyId,
        status: AutoPaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.locks.run(tenancy_id, || {
            let mut tenancy = self.tenancy(tenancy_id)?;
            tenancy.record_auto_payment_attempt(status, now);
            self.tenancies.update(tenancy)?;
            Ok::<_, PaymentError>(())
        })
    }
}
