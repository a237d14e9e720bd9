//! Off-chain ledger: per-party balances plus an append-only transaction log.
//!
//! Every balance mutation happens under the ledger mutex. Rent transfers are staged in a
//! [`LedgerTxn`] that holds the lock until it is committed or dropped, so the debit and the
//! credit become visible together or not at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Amount, BillingPeriod, PartyId, TenancyId, TransactionId};

static TRANSACTION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_transaction_id() -> TransactionId {
    let id = TRANSACTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    TransactionId(format!("txn-{id:06}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    RentPayment,
    RentReceived,
}

impl TransactionKind {
    pub const fn label(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::RentPayment => "rent_payment",
            TransactionKind::RentReceived => "rent_received",
        }
    }
}

/// Immutable record of one balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub party_id: PartyId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub balance_after: Amount,
    pub counterparty: Option<PartyId>,
    pub tenancy_id: Option<TenancyId>,
    pub period: Option<BillingPeriod>,
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Rent movement from tenant to owner for one billing period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentTransfer {
    pub tenancy_id: TenancyId,
    pub payer: PartyId,
    pub payee: PartyId,
    pub amount: Amount,
    pub period: BillingPeriod,
    pub at: DateTime<Utc>,
}

/// The paired records of a rent transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentReceipt {
    pub payment: LedgerTransaction,
    pub received: LedgerTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InsufficientFunds {
    pub available: Amount,
    pub required: Amount,
}

impl InsufficientFunds {
    pub fn shortfall(&self) -> Amount {
        self.required.saturating_sub(self.available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("insufficient funds: available {}, required {}", .0.available, .0.required)]
    InsufficientFunds(InsufficientFunds),
    #[error("payer and payee must differ")]
    SelfTransfer,
    #[error("balance overflow for party {0}")]
    Overflow(PartyId),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<PartyId, Amount>,
    transactions: Vec<LedgerTransaction>,
}

impl LedgerState {
    fn balance(&self, party: &PartyId) -> Amount {
        self.balances.get(party).copied().unwrap_or(Amount::ZERO)
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }

    pub fn balance(&self, party: &PartyId) -> Result<Amount, LedgerError> {
        Ok(self.lock()?.balance(party))
    }

    /// Credit funds that arrived from outside the platform (e.g. a settled chain deposit).
    pub fn deposit(
        &self,
        party: &PartyId,
        amount: Amount,
        reference: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerTransaction, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let mut state = self.lock()?;
        let balance = state
            .balance(party)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(party.clone()))?;

        let record = single_party_record(party, TransactionKind::Deposit, amount, balance, reference, at);
        state.balances.insert(party.clone(), balance);
        state.transactions.push(record.clone());
        Ok(record)
    }

    pub fn withdraw(
        &self,
        party: &PartyId,
        amount: Amount,
        reference: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerTransaction, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let mut state = self.lock()?;
        let available = state.balance(party);
        let balance = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds(InsufficientFunds {
                available,
                required: amount,
            }))?;

        let record =
            single_party_record(party, TransactionKind::Withdraw, amount, balance, reference, at);
        state.balances.insert(party.clone(), balance);
        state.transactions.push(record.clone());
        Ok(record)
    }

    /// Open a staged unit of work. The ledger stays locked until the returned value is
    /// committed or dropped.
    pub fn begin(&self) -> Result<LedgerTxn<'_>, LedgerError> {
        Ok(LedgerTxn {
            state: self.lock()?,
            staged_balances: HashMap::new(),
            staged_records: Vec::new(),
        })
    }

    pub fn history(&self, query: &TransactionQuery) -> Result<TransactionPage, LedgerError> {
        let state = self.lock()?;
        let mut matching: Vec<&LedgerTransaction> = state
            .transactions
            .iter()
            .filter(|record| query.matches(record))
            .collect();
        matching.reverse();

        let limit = query.limit.max(1);
        let page = query.page.max(1);
        let total = matching.len();
        let transactions = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        Ok(TransactionPage {
            transactions,
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
        })
    }

    pub fn transactions_for_tenancy(
        &self,
        tenancy_id: &TenancyId,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .transactions
            .iter()
            .filter(|record| record.tenancy_id.as_ref() == Some(tenancy_id))
            .cloned()
            .collect())
    }
}

fn single_party_record(
    party: &PartyId,
    kind: TransactionKind,
    amount: Amount,
    balance_after: Amount,
    reference: Option<String>,
    at: DateTime<Utc>,
) -> LedgerTransaction {
    LedgerTransaction {
        id: next_transaction_id(),
        party_id: party.clone(),
        kind,
        amount,
        balance_after,
        counterparty: None,
        tenancy_id: None,
        period: None,
        reference,
        recorded_at: at,
    }
}

/// Staged ledger mutations; nothing is visible to other callers until [`LedgerTxn::commit`].
pub struct LedgerTxn<'a> {
    state: MutexGuard<'a, LedgerState>,
    staged_balances: HashMap<PartyId, Amount>,
    staged_records: Vec<LedgerTransaction>,
}

impl LedgerTxn<'_> {
    fn balance(&self, party: &PartyId) -> Amount {
        self.staged_balances
            .get(party)
            .copied()
            .unwrap_or_else(|| self.state.balance(party))
    }

    /// Stage a debit of the payer and a credit of the payee with their paired records.
    pub fn transfer_rent(&mut self, transfer: &RentTransfer) -> Result<RentReceipt, LedgerError> {
        if transfer.amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        if transfer.payer == transfer.payee {
            return Err(LedgerError::SelfTransfer);
        }

        let available = self.balance(&transfer.payer);
        let payer_after = available.checked_sub(transfer.amount).ok_or(
            LedgerError::InsufficientFunds(InsufficientFunds {
                available,
                required: transfer.amount,
            }),
        )?;
        let payee_after = self
            .balance(&transfer.payee)
            .checked_add(transfer.amount)
            .ok_or_else(|| LedgerError::Overflow(transfer.payee.clone()))?;

        let payment = LedgerTransaction {
            id: next_transaction_id(),
            party_id: transfer.payer.clone(),
            kind: TransactionKind::RentPayment,
            amount: transfer.amount,
            balance_after: payer_after,
            counterparty: Some(transfer.payee.clone()),
            tenancy_id: Some(transfer.tenancy_id.clone()),
            period: Some(transfer.period),
            reference: None,
            recorded_at: transfer.at,
        };
        let received = LedgerTransaction {
            id: next_transaction_id(),
            party_id: transfer.payee.clone(),
            kind: TransactionKind::RentReceived,
            amount: transfer.amount,
            balance_after: payee_after,
            counterparty: Some(transfer.payer.clone()),
            tenancy_id: Some(transfer.tenancy_id.clone()),
            period: Some(transfer.period),
            reference: Some(payment.id.to_string()),
            recorded_at: transfer.at,
        };

        self.staged_balances
            .insert(transfer.payer.clone(), payer_after);
        self.staged_balances
            .insert(transfer.payee.clone(), payee_after);
        self.staged_records.push(payment.clone());
        self.staged_records.push(received.clone());

        Ok(RentReceipt { payment, received })
    }

    pub fn commit(self) {
        let LedgerTxn {
            mut state,
            staged_balances,
            staged_records,
        } = self;
        state.balances.extend(staged_balances);
        state.transactions.extend(staged_records);
    }
}

/// Filter and paging for [`Ledger::history`]; dates are inclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionQuery {
    pub party: PartyId,
    #[serde(default)]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    20
}

impl TransactionQuery {
    pub fn for_party(party: PartyId) -> Self {
        Self {
            party,
            kind: None,
            from: None,
            to: None,
            page: default_page(),
            limit: default_limit(),
        }
    }

    fn matches(&self, record: &LedgerTransaction) -> bool {
        let day = record.recorded_at.date_naive();
        record.party_id == self.party
            && self.kind.map_or(true, |kind| record.kind == kind)
            && self.from.map_or(true, |from| day >= from)
            && self.to.map_or(true, |to| day <= to)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<LedgerTransaction>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}
