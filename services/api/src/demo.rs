use crate::infra::{assemble, system_clock, ApiState, InMemoryOutbox, InMemoryProfileDirectory};
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use clap::Args;
use leasekeeper::error::AppError;
use leasekeeper::workflows::tenancy::{
    Amount, ListingDescriptor, ListingId, PartyId, PaymentOutcome, RequestSubmission,
    SchedulerReport, Tenancy,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Move-in date (YYYY-MM-DD). Defaults to 14 days from today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) move_in: Option<NaiveDate>,
    /// Monthly rent in whole dollars.
    #[arg(long, default_value_t = 1200)]
    pub(crate) rent: u64,
    /// Opening wallet balance for the tenant in whole dollars.
    #[arg(long, default_value_t = 3000)]
    pub(crate) wallet: u64,
    /// Print the settlement and scheduler report as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SchedulerRunArgs {
    /// Move-in date shared by the seeded tenancies (defaults to 14 days from today).
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) move_in: Option<NaiveDate>,
    /// Day to run the pass on. Defaults to the day before the first rent is due.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) on: Option<NaiveDate>,
    /// Reminder horizon in days.
    #[arg(long, default_value_t = 3)]
    pub(crate) reminder_days: i64,
}

struct DemoStack {
    api: Arc<ApiState>,
    outbox: InMemoryOutbox,
}

fn demo_stack(reminder_days: i64) -> DemoStack {
    let outbox = InMemoryOutbox::default();
    let api = assemble(
        InMemoryProfileDirectory::default(),
        Arc::new(outbox.clone()),
        system_clock(),
        reminder_days,
    );
    DemoStack { api, outbox }
}

fn morning(date: NaiveDate, hour: i64) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc() + Duration::hours(hour)
}

fn listing(code: &str, title: &str) -> ListingDescriptor {
    ListingDescriptor {
        listing_id: ListingId::new(code),
        title: title.to_string(),
        address: format!("{title}, Springfield"),
    }
}

fn submission(
    tenant: &PartyId,
    owner: &PartyId,
    listing: ListingDescriptor,
    move_in: NaiveDate,
    bid: Amount,
) -> RequestSubmission {
    RequestSubmission {
        tenant_id: tenant.clone(),
        owner_id: owner.clone(),
        listing,
        move_in,
        bid_amount: bid,
        message: Some("Looking forward to the viewing.".to_string()),
        lease_months: None,
    }
}

/// Take one request from submission to countersignature, starting on `opened`.
fn lease(
    api: &ApiState,
    request: RequestSubmission,
    opened: NaiveDate,
) -> Result<Tenancy, AppError> {
    let tenant = request.tenant_id.clone();
    let owner = request.owner_id.clone();
    let submitted = api.requests.submit(request, morning(opened, 9))?;
    api.requests
        .accept(&submitted.id, &owner, morning(opened + Duration::days(1), 9))?;
    api.requests.sign_as_tenant(
        &submitted.id,
        &tenant,
        &format!("sig-{}", tenant.as_str()),
        morning(opened + Duration::days(2), 9),
    )?;
    let countersigned = api.requests.sign_as_owner(
        &submitted.id,
        &owner,
        &format!("sig-{}", owner.as_str()),
        morning(opened + Duration::days(3), 9),
    )?;
    Ok(countersigned.tenancy)
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        move_in,
        rent,
        wallet,
        json,
    } = args;

    let move_in = move_in.unwrap_or_else(|| Local::now().date_naive() + Duration::days(14));
    let opened = move_in - Duration::days(20);
    let rent = Amount::from_dollars(rent);
    let stack = demo_stack(3);
    let api = &stack.api;

    let owner = PartyId::new("owner-demo");
    let tenant = PartyId::new("tenant-demo");
    let rival = PartyId::new("tenant-rival");
    let flat = listing("listing-demo-1", "Two-bedroom on Linden Row");

    println!("Tenancy lifecycle demo");
    println!("Listing {} | move-in {} | rent {}", flat.title, move_in, rent);

    let rival_bid = Amount(rent.cents().saturating_sub(5_000).max(1));
    let rival_request = api.requests.submit(
        submission(&rival, &owner, flat.clone(), move_in, rival_bid),
        morning(opened, 8),
    )?;
    let standing = api.requests.bid_standing(&flat.listing_id, rival_bid)?;
    println!(
        "- {} bid {} (higher bids pending: {})",
        rival, rival_bid, standing.has_higher_bids
    );

    let tenancy = lease(
        api,
        submission(&tenant, &owner, flat.clone(), move_in, rent),
        opened,
    )?;
    println!(
        "- {} bid {} and signed; tenancy {} registered",
        tenant, rent, tenancy.id
    );
    println!(
        "  Rent due on day {} | deposit {} due {} | lease {} -> {}",
        tenancy.rent_due_day,
        tenancy.security_deposit,
        tenancy.security_deposit_due,
        tenancy.lease_start,
        tenancy.lease_end
    );
    let superseded = api.requests.get(&rival_request.id)?;
    println!(
        "- Competing request {} is now {} ({})",
        superseded.id,
        superseded.status,
        superseded.rejection_reason.as_deref().unwrap_or("no reason")
    );

    let ledger = api.payments.ledger();
    ledger.deposit(
        &tenant,
        Amount::from_dollars(wallet),
        Some("demo-topup".to_string()),
        morning(opened + Duration::days(3), 12),
    )?;

    let window_opens = tenancy.current_cycle.payment_window_opens_at();
    let pay_at = window_opens.max(morning(opened + Duration::days(4), 0)) + Duration::hours(10);
    let cycle = api.payments.current_cycle(&tenancy.id, pay_at)?;
    println!(
        "\nCycle {} | due {} | window opens {} | payable now: {} | {} days to go",
        cycle.cycle.period,
        cycle.cycle.due_date,
        cycle.cycle.payment_window_start,
        cycle.cycle.can_pay_now,
        cycle.cycle.days_until_due
    );

    match api.payments.pay_now(&tenancy.id, &tenant, None, pay_at)? {
        PaymentOutcome::Settled(settlement) => {
            println!(
                "- Paid {} for {} (transaction {})",
                settlement.record.amount,
                settlement.record.period,
                settlement.receipt.payment.id
            );
            if json {
                print_json("Settlement", &settlement);
            }
        }
        other => println!("- Payment not settled: {other:?}"),
    }
    println!(
        "  Balances: tenant {} | owner {}",
        ledger.balance(&tenant)?,
        ledger.balance(&owner)?
    );

    let enabled = api
        .payments
        .set_auto_payment(&tenancy.id, &tenant, true, pay_at)?;
    let run_at = morning(enabled.current_cycle.due_date - Duration::days(1), 2);
    let report = api.scheduler.run_once(run_at, api.reminder_days)?;
    println!("\nAuto-payment pass on {}", run_at.date_naive());
    print_report(&report);
    if json {
        print_json("Scheduler report", &report);
    }

    let events = stack.outbox.drain();
    println!("\nNotifications ({})", events.len());
    for event in events {
        println!("  - {} -> {}", event.kind.label(), event.recipient);
    }

    Ok(())
}

pub(crate) fn run_scheduler_once(args: SchedulerRunArgs) -> Result<(), AppError> {
    let SchedulerRunArgs {
        move_in,
        on,
        reminder_days,
    } = args;

    let move_in = move_in.unwrap_or_else(|| Local::now().date_naive() + Duration::days(14));
    let opened = move_in - Duration::days(20);
    let stack = demo_stack(reminder_days);
    let api = &stack.api;
    let owner = PartyId::new("owner-portfolio");
    let portfolio = [
        ("tenant-funded", "listing-port-1", "Loft on Birch Street", 950, 2_000),
        ("tenant-short", "listing-port-2", "Studio on Cedar Lane", 800, 500),
    ];

    let mut first_due = None;
    for (tenant, code, title, rent, funds) in portfolio {
        let tenant = PartyId::new(tenant);
        let tenancy = lease(
            api,
            submission(
                &tenant,
                &owner,
                listing(code, title),
                move_in,
                Amount::from_dollars(rent),
            ),
            opened,
        )?;
        api.payments
            .set_auto_payment(&tenancy.id, &tenant, true, morning(opened + Duration::days(3), 12))?;
        api.payments.ledger().deposit(
            &tenant,
            Amount::from_dollars(funds),
            None,
            morning(opened + Duration::days(3), 12),
        )?;
        first_due = first_due.or(Some(tenancy.current_cycle.due_date));
    }

    let run_on = on
        .or_else(|| first_due.map(|due| due - Duration::days(1)))
        .unwrap_or(move_in);
    let report = api.scheduler.run_once(morning(run_on, 2), reminder_days)?;
    print_report(&report);
    print_json("Report", &report);
    Ok(())
}

fn print_report(report: &SchedulerReport) {
    println!(
        "- {} selected | {} collected | {} failed | {} skipped | {} reminders",
        report.total, report.successful, report.failed, report.skipped, report.reminders_sent
    );
    for result in &report.results {
        println!(
            "  - {} {} -> {}{}",
            result.tenancy_id,
            result.period,
            result.status.label(),
            result
                .detail
                .as_deref()
                .map(|detail| format!(" ({detail})"))
                .unwrap_or_default()
        );
    }
}

fn print_json<T: serde::Serialize>(label: &str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{label}:\n{json}"),
        Err(err) => println!("{label} unavailable: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasekeeper::workflows::tenancy::{AutoPaymentStatus, RequestStatus};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn lease_helper_produces_a_registered_tenancy() {
        let stack = demo_stack(3);
        let tenant = PartyId::new("tenant-t");
        let owner = PartyId::new("owner-o");
        let tenancy = lease(
            &stack.api,
            submission(
                &tenant,
                &owner,
                listing("listing-t", "Test flat"),
                date(2025, 3, 10),
                Amount::from_dollars(800),
            ),
            date(2025, 2, 18),
        )
        .expect("leased");

        assert_eq!(tenancy.current_cycle.due_date, date(2025, 3, 17));
        let request = stack.api.requests.get(&tenancy.request_id).expect("request");
        assert_eq!(request.status, RequestStatus::Completed);
    }

    #[test]
    fn seeded_portfolio_pass_reports_both_outcomes() {
        let stack = demo_stack(3);
        let owner = PartyId::new("owner-o");
        let move_in = date(2025, 3, 10);
        for (tenant, code, funds) in [("tenant-a", "listing-a", 2_000), ("tenant-b", "listing-b", 100)] {
            let tenant = PartyId::new(tenant);
            let tenancy = lease(
                &stack.api,
                submission(
                    &tenant,
                    &owner,
                    listing(code, "Flat"),
                    move_in,
                    Amount::from_dollars(800),
                ),
                date(2025, 2, 18),
            )
            .expect("leased");
            stack
                .api
                .payments
                .set_auto_payment(&tenancy.id, &tenant, true, morning(date(2025, 2, 22), 0))
                .expect("enabled");
            stack
                .api
                .payments
                .ledger()
                .deposit(&tenant, Amount::from_dollars(funds), None, morning(date(2025, 2, 22), 0))
                .expect("funded");
        }

        let report = stack
            .api
            .scheduler
            .run_once(morning(date(2025, 3, 16), 2), 3)
            .expect("pass");

        assert_eq!(report.total, 2);
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert!(report
            .results
            .iter()
            .any(|result| result.status == AutoPaymentStatus::InsufficientFunds));
    }
}
