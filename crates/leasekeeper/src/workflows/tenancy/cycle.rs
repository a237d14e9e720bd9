//! Rent-cycle engine: the single in-progress billing period of a tenancy.
//!
//! Dates are calendar dates; instants compare against midnight UTC of those dates. A due day
//! past the end of a short month (for example 31 in April) clamps to that month's last day.

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::contract::FRAUD_CLAIM_WINDOW_DAYS;
use super::domain::{Amount, BillingPeriod, TransactionId};

pub const PAYMENT_WINDOW_DAYS: u64 = 20;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Rent,
    SecurityDeposit,
}

/// How a settlement was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTrigger {
    Manual,
    Scheduled,
}

/// Durable record of one settled payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub kind: PaymentKind,
    pub amount: Amount,
    pub period: BillingPeriod,
    pub paid_at: DateTime<Utc>,
    pub trigger: PaymentTrigger,
    pub transaction_id: Option<TransactionId>,
}

/// Cursor over the next unpaid billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentCycle {
    pub period: BillingPeriod,
    pub due_day: u32,
    pub due_date: NaiveDate,
    pub payment_window_start: NaiveDate,
    pub amount: Amount,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Read-only evaluation of a cycle at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSnapshot {
    pub period: BillingPeriod,
    pub due_date: NaiveDate,
    pub payment_window_start: NaiveDate,
    pub amount: Amount,
    pub is_paid: bool,
    pub days_until_due: i64,
    pub can_pay_now: bool,
    pub days_until_window_opens: i64,
    pub is_first_payment: bool,
    pub show_move_in_warning: bool,
}

impl RentCycle {
    /// First cycle of a lease: the lease start month at the contract's due day.
    pub fn initialize(lease_start: NaiveDate, due_day: u32, monthly_rent: Amount) -> Self {
        let period = BillingPeriod::containing(lease_start);
        let due_date = due_date_for(period, due_day);
        Self {
            period,
            due_day,
            due_date,
            payment_window_start: window_start_for(due_date),
            amount: monthly_rent,
            is_paid: false,
            paid_at: None,
        }
    }

    pub fn payment_window_opens_at(&self) -> DateTime<Utc> {
        start_of_day(self.payment_window_start)
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        start_of_day(self.due_date)
    }

    pub fn can_pay_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_paid && now >= self.payment_window_opens_at()
    }

    pub fn snapshot(
        &self,
        now: DateTime<Utc>,
        history: &[PaymentRecord],
        move_in: NaiveDate,
    ) -> CycleSnapshot {
        let can_pay_now = self.can_pay_at(now);
        let days_until_window_opens = if can_pay_now {
            0
        } else {
            ceil_days(self.payment_window_opens_at() - now)
        };
        let is_first_payment = !history
            .iter()
            .any(|record| record.kind == PaymentKind::Rent);
        let grace_ends = start_of_day(move_in)
            .checked_add_signed(Duration::days(i64::from(FRAUD_CLAIM_WINDOW_DAYS)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        CycleSnapshot {
            period: self.period,
            due_date: self.due_date,
            payment_window_start: self.payment_window_start,
            amount: self.amount,
            is_paid: self.is_paid,
            days_until_due: ceil_days(self.due_at() - now),
            can_pay_now,
            days_until_window_opens,
            is_first_payment,
            show_move_in_warning: is_first_payment && now < grace_ends,
        }
    }

    /// Settle the current period and move the cursor to the next one.
    ///
    /// The only path that advances a cycle; a period can therefore never be skipped.
    pub fn mark_paid_and_advance(
        &mut self,
        history: &mut Vec<PaymentRecord>,
        monthly_rent: Amount,
        trigger: PaymentTrigger,
        transaction_id: Option<TransactionId>,
        now: DateTime<Utc>,
    ) -> PaymentRecord {
        self.is_paid = true;
        self.paid_at = Some(now);

        let record = PaymentRecord {
            kind: PaymentKind::Rent,
            amount: self.amount,
            period: self.period,
            paid_at: now,
            trigger,
            transaction_id,
        };
        history.push(record.clone());

        self.advance(monthly_rent);
        record
    }

    fn advance(&mut self, monthly_rent: Amount) {
        debug_assert!(self.is_paid, "advancing an unpaid cycle skips a period");
        self.period = self.period.next();
        self.due_date = due_date_for(self.period, self.due_day);
        self.payment_window_start = window_start_for(self.due_date);
        self.amount = monthly_rent;
        self.is_paid = false;
        self.paid_at = None;
    }
}

pub fn due_date_for(period: BillingPeriod, due_day: u32) -> NaiveDate {
    let day = due_day.clamp(1, days_in_month(period.year, period.month));
    // Periods always come from valid dates; out-of-range years saturate.
    NaiveDate::from_ymd_opt(period.year, period.month, day).unwrap_or(NaiveDate::MAX)
}

fn window_start_for(due_date: NaiveDate) -> NaiveDate {
    due_date
        .checked_sub_days(Days::new(PAYMENT_WINDOW_DAYS))
        .unwrap_or(NaiveDate::MIN)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if NaiveDate::from_ymd_opt(year, 2, 29).is_some() => 29,
        _ => 28,
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Whole days in `span`, rounded towards positive infinity.
fn ceil_days(span: Duration) -> i64 {
    let seconds = span.num_seconds();
    let whole = seconds.div_euclid(SECONDS_PER_DAY);
    if seconds.rem_euclid(SECONDS_PER_DAY) > 0 {
        whole + 1
    } else {
        whole
    }
}
