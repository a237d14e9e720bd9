//! Unattended rent collection and reminders, plus the background task that drives them.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::collaborators::{dispatch, Notification, NotificationKind, NotificationSink};
use super::cycle::PaymentTrigger;
use super::domain::{BillingPeriod, TenancyId};
use super::payments::{PaymentOutcome, RentPaymentService};
use super::repository::{RepositoryError, TenancyRepository};
use super::tenancy::{AutoPaymentStatus, Tenancy};

/// Per-tenancy result of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenancyRunResult {
    pub tenancy_id: TenancyId,
    pub period: BillingPeriod,
    pub status: AutoPaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    pub run_at: DateTime<Utc>,
    pub due_on: NaiveDate,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub reminders_sent: usize,
    pub results: Vec<TenancyRunResult>,
}

impl SchedulerReport {
    fn new(run_at: DateTime<Utc>, due_on: NaiveDate) -> Self {
        Self {
            run_at,
            due_on,
            total: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            reminders_sent: 0,
            results: Vec::new(),
        }
    }

    fn push(&mut self, result: TenancyRunResult) {
        self.total += 1;
        match result.status {
            AutoPaymentStatus::Success => self.successful += 1,
            AutoPaymentStatus::Skipped => self.skipped += 1,
            AutoPaymentStatus::InsufficientFunds | AutoPaymentStatus::Error => self.failed += 1,
        }
        self.results.push(result);
    }
}

pub struct AutoPaymentScheduler<T> {
    tenancies: Arc<T>,
    payments: Arc<RentPaymentService<T>>,
    notifications: Arc<dyn NotificationSink>,
}

impl<T> AutoPaymentScheduler<T>
where
    T: TenancyRepository + 'static,
{
    pub fn new(
        tenancies: Arc<T>,
        payments: Arc<RentPaymentService<T>>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            tenancies,
            payments,
            notifications,
        }
    }

    /// One collection pass followed by the reminder sweep.
    pub fn run_once(
        &self,
        now: DateTime<Utc>,
        reminder_days: i64,
    ) -> Result<SchedulerReport, RepositoryError> {
        let mut report = self.run_pass(now)?;
        report.reminders_sent = self.send_reminders(now, reminder_days)?;
        info!(
            due_on = %report.due_on,
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            reminders = report.reminders_sent,
            "auto payment pass finished"
        );
        Ok(report)
    }

    /// Attempt collection for every enabled tenancy whose cycle is due by tomorrow (UTC).
    ///
    /// A failure on one tenancy is recorded in the report and never stops the pass.
    pub fn run_pass(&self, now: DateTime<Utc>) -> Result<SchedulerReport, RepositoryError> {
        let due_on = now.date_naive().succ_opt().unwrap_or(NaiveDate::MAX);
        let mut report = SchedulerReport::new(now, due_on);

        for tenancy in self.tenancies.due_for_auto_payment(due_on)? {
            report.push(self.process(&tenancy, now));
        }
        Ok(report)
    }

    fn process(&self, tenancy: &Tenancy, now: DateTime<Utc>) -> TenancyRunResult {
        let period = tenancy.current_cycle.period;
        let result = |status, detail: Option<String>| TenancyRunResult {
            tenancy_id: tenancy.id.clone(),
            period,
            status,
            detail,
        };

        match self
            .payments
            .settle(&tenancy.id, period, PaymentTrigger::Scheduled, now)
        {
            Ok(PaymentOutcome::Settled(_)) => result(AutoPaymentStatus::Success, None),
            Ok(PaymentOutcome::AlreadyPaid { .. }) => {
                self.record(&tenancy.id, AutoPaymentStatus::Skipped, now);
                result(AutoPaymentStatus::Skipped, Some("already paid".to_string()))
            }
            Ok(PaymentOutcome::AutoPaymentDisabled { .. }) => {
                self.record(&tenancy.id, AutoPaymentStatus::Skipped, now);
                result(
                    AutoPaymentStatus::Skipped,
                    Some("auto payment disabled".to_string()),
                )
            }
            Ok(PaymentOutcome::InsufficientFunds { funds, .. }) => {
                self.record(&tenancy.id, AutoPaymentStatus::InsufficientFunds, now);
                info!(
                    tenancy_id = %tenancy.id,
                    available = %funds.available,
                    required = %funds.required,
                    "auto payment declined for insufficient funds"
                );
                dispatch(
                    self.notifications.as_ref(),
                    Notification::new(tenancy.tenant_id.clone(), NotificationKind::AutoPaymentFailed)
                        .detail("tenancy_id", &tenancy.id)
                        .detail("period", period.label())
                        .detail("reason", AutoPaymentStatus::InsufficientFunds.label())
                        .detail("shortfall", funds.shortfall()),
                );
                result(
                    AutoPaymentStatus::InsufficientFunds,
                    Some(format!("short by {}", funds.shortfall())),
                )
            }
            Err(failure) => {
                error!(tenancy_id = %tenancy.id, error = %failure, "auto payment failed");
                self.record(&tenancy.id, AutoPaymentStatus::Error, now);
                dispatch(
                    self.notifications.as_ref(),
                    Notification::new(tenancy.tenant_id.clone(), NotificationKind::AutoPaymentFailed)
                        .detail("tenancy_id", &tenancy.id)
                        .detail("period", period.label())
                        .detail("reason", AutoPaymentStatus::Error.label()),
                );
                result(AutoPaymentStatus::Error, Some(failure.to_string()))
            }
        }
    }

    fn record(&self, tenancy_id: &TenancyId, status: AutoPaymentStatus, now: DateTime<Utc>) {
        if let Err(failure) = self.payments.record_attempt(tenancy_id, status, now) {
            warn!(%tenancy_id, status = status.label(), error = %failure, "could not record auto payment attempt");
        }
    }

    /// Notify tenants whose unpaid cycle falls due within `horizon_days` (today included).
    pub fn send_reminders(
        &self,
        now: DateTime<Utc>,
        horizon_days: i64,
    ) -> Result<usize, RepositoryError> {
        let mut sent = 0;
        for tenancy in self.tenancies.collectible()? {
            let snapshot = tenancy.cycle_snapshot(now);
            if snapshot.is_paid || !(0..=horizon_days).contains(&snapshot.days_until_due) {
                continue;
            }
            dispatch(
                self.notifications.as_ref(),
                Notification::new(tenancy.tenant_id.clone(), NotificationKind::RentReminder)
                    .detail("tenancy_id", &tenancy.id)
                    .detail("listing", &tenancy.listing.title)
                    .detail("amount", snapshot.amount)
                    .detail("due_date", snapshot.due_date)
                    .detail("days_until_due", snapshot.days_until_due)
                    .detail("auto_payment", tenancy.auto_payment.enabled),
            );
            sent += 1;
        }
        Ok(sent)
    }
}

/// Running background task; stop it with [`SchedulerHandle::shutdown`].
pub struct SchedulerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        // The loop may already have exited; a closed channel is fine.
        let _ = self.stop.send(());
        if let Err(join_error) = self.task.await {
            warn!(error = %join_error, "auto payment task ended abnormally");
        }
    }
}

/// Start the periodic collection loop. The first pass runs immediately.
pub fn spawn_auto_payment_task<T>(
    scheduler: Arc<AutoPaymentScheduler<T>>,
    interval: StdDuration,
    reminder_days: i64,
) -> SchedulerHandle
where
    T: TenancyRepository + 'static,
{
    let (stop, mut stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "auto payment task started");

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&scheduler);
                    let pass = tokio::task::spawn_blocking(move || {
                        scheduler.run_once(Utc::now(), reminder_days)
                    })
                    .await;
                    match pass {
                        Ok(Ok(_)) => {}
                        Ok(Err(failure)) => error!(error = %failure, "auto payment pass aborted"),
                        Err(join_error) => error!(error = %join_error, "auto payment pass panicked"),
                    }
                }
            }
        }
        info!("auto payment task stopped");
    });

    SchedulerHandle { stop, task }
}
