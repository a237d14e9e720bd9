//! Rental agreement generation.
//!
//! Pure: the same input always renders the same agreement. Only `rent_due_day`, the deposit and
//! the lease boundaries feed the rent-cycle engine; the clauses are agreement text only.

use std::fmt::Write as _;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Amount, ListingDescriptor, PartyIdentity};

pub const DEFAULT_LEASE_MONTHS: u32 = 12;
pub const SECURITY_DEPOSIT_MULTIPLIER: u64 = 2;
pub const RENT_DUE_OFFSET_DAYS: u32 = 7;
pub const EARLY_TERMINATION_NOTICE_DAYS: u32 = 60;
pub const FRAUD_CLAIM_WINDOW_DAYS: u32 = 3;
pub const DEPOSIT_VERIFICATION_HOLD_DAYS: u32 = 7;
pub const SECURITY_DEPOSIT_GRACE_DAYS: u32 = 7;

/// Day of month rent falls due: move-in day plus seven, wrapped modulo 31 with zero mapped to 31.
///
/// The result is not clamped to the length of any month. Schedulers treat 31 (and any day past
/// the end of a short month) as the last day of that month.
pub fn rent_due_day(move_in: NaiveDate) -> u32 {
    match (move_in.day() + RENT_DUE_OFFSET_DAYS) % 31 {
        0 => 31,
        day => day,
    }
}

/// Calendar-month lease end; month ends clamp (Jan 31 + 1 month = Feb 28/29).
pub fn lease_end_date(lease_start: NaiveDate, lease_months: u32) -> NaiveDate {
    lease_start
        .checked_add_months(Months::new(lease_months))
        .unwrap_or(NaiveDate::MAX)
}

pub fn security_deposit_for(monthly_rent: Amount) -> Amount {
    Amount(monthly_rent.0.saturating_mul(SECURITY_DEPOSIT_MULTIPLIER))
}

/// Inputs to [`generate_contract`]; validated upstream by the request service.
#[derive(Debug, Clone)]
pub struct ContractInput {
    pub move_in: NaiveDate,
    pub monthly_rent: Amount,
    pub listing: ListingDescriptor,
    pub tenant: PartyIdentity,
    pub owner: PartyIdentity,
    pub lease_months: Option<u32>,
    pub generated_at: DateTime<Utc>,
}

/// Immutable agreement text plus the structured fields derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContract {
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub listing: ListingDescriptor,
    pub tenant: PartyIdentity,
    pub owner: PartyIdentity,
    pub request_date: NaiveDate,
    pub monthly_rent: Amount,
    pub rent_due_day: u32,
    pub security_deposit: Amount,
    pub lease_months: u32,
    pub lease_start: NaiveDate,
    pub lease_end: NaiveDate,
    pub move_in: NaiveDate,
}

pub fn generate_contract(input: ContractInput) -> GeneratedContract {
    let ContractInput {
        move_in,
        monthly_rent,
        listing,
        tenant,
        owner,
        lease_months,
        generated_at,
    } = input;

    let lease_months = lease_months.unwrap_or(DEFAULT_LEASE_MONTHS);
    let due_day = rent_due_day(move_in);
    let security_deposit = security_deposit_for(monthly_rent);
    let lease_start = move_in;
    let lease_end = lease_end_date(lease_start, lease_months);
    let request_date = generated_at.date_naive();

    let content = render_agreement(&AgreementView {
        listing: &listing,
        tenant: &tenant,
        owner: &owner,
        request_date,
        monthly_rent,
        due_day,
        security_deposit,
        lease_months,
        lease_start,
        lease_end,
    });

    GeneratedContract {
        content,
        generated_at,
        listing,
        tenant,
        owner,
        request_date,
        monthly_rent,
        rent_due_day: due_day,
        security_deposit,
        lease_months,
        lease_start,
        lease_end,
        move_in,
    }
}

struct AgreementView<'a> {
    listing: &'a ListingDescriptor,
    tenant: &'a PartyIdentity,
    owner: &'a PartyIdentity,
    request_date: NaiveDate,
    monthly_rent: Amount,
    due_day: u32,
    security_deposit: Amount,
    lease_months: u32,
    lease_start: NaiveDate,
    lease_end: NaiveDate,
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn ordinal(day: u32) -> String {
    let suffix = match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{day}{suffix}")
}

fn render_agreement(view: &AgreementView<'_>) -> String {
    let mut out = String::new();
    let due = ordinal(view.due_day);
    let start = long_date(view.lease_start);
    let end = long_date(view.lease_end);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "RESIDENTIAL RENTAL AGREEMENT");
    let _ = writeln!(out);
    let _ = writeln!(out, "Property: {}", view.listing.title);
    let _ = writeln!(out, "Address: {}", view.listing.address);
    let _ = writeln!(out);
    let _ = writeln!(out, "Owner:");
    let _ = writeln!(
        out,
        "{} (Government Issued ID: {})",
        view.owner.name, view.owner.government_id
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Tenant:");
    let _ = writeln!(
        out,
        "{} (Government Issued ID: {})",
        view.tenant.name, view.tenant.government_id
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Request Date: {}", long_date(view.request_date));
    let _ = writeln!(out);
    let _ = writeln!(out, "FINANCIAL TERMS");
    let _ = writeln!(out);
    let _ = writeln!(out, "Monthly Rent: {}", view.monthly_rent);
    let _ = writeln!(
        out,
        "Due Date: {due} of each month (move-in day plus {RENT_DUE_OFFSET_DAYS} days)"
    );
    let _ = writeln!(out, "Security Deposit: {}", view.security_deposit);
    let _ = writeln!(out, "Lease Duration: {} months", view.lease_months);
    let _ = writeln!(out, "Lease Term: {start} to {end}");
    let _ = writeln!(out, "Move-in Date: {start}");
    let _ = writeln!(out);
    let _ = writeln!(out, "TERMS AND CONDITIONS");
    let _ = writeln!(out);
    let _ = writeln!(out, "1. Rent Payments");
    let _ = writeln!(
        out,
        "The tenant agrees to pay the monthly rent of {} on the {due} day of each month through the platform wallet. Rent is paid in advance for every month. Payment is accepted from twenty days before each due date.",
        view.monthly_rent
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "2. Security Deposit Escrow");
    let _ = writeln!(
        out,
        "A security deposit of {} is held in escrow for the entire lease period and is due within {SECURITY_DEPOSIT_GRACE_DAYS} days after both parties have signed. Escrowed funds cannot be withdrawn by either party until the lease ends or a verified termination event occurs.",
        view.security_deposit
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "3. Lease Commencement");
    let _ = writeln!(
        out,
        "The lease term begins on {start}. The first month's rent becomes payable {FRAUD_CLAIM_WINDOW_DAYS} days after move-in."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "4. Tenant Responsibilities");
    let _ = writeln!(
        out,
        "The tenant shall keep the property in good condition and report damage or maintenance issues through the platform."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "5. Owner Responsibilities and Fraud Claims");
    let _ = writeln!(
        out,
        "The owner guarantees the listing is accurate at move-in. If the property is materially misrepresented, the tenant may cancel before or within {FRAUD_CLAIM_WINDOW_DAYS} days of move-in and reclaim the full security deposit."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "6. Termination and Deposit Refund");
    let _ = writeln!(
        out,
        "On normal completion the deposit stays on hold for up to {DEPOSIT_VERIFICATION_HOLD_DAYS} days for verification and is refunded in full if the owner raises no claim. Either party may terminate early with {EARLY_TERMINATION_NOTICE_DAYS} days' notice; the deposit then remains on a {EARLY_TERMINATION_NOTICE_DAYS}-day hold for dispute resolution."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "7. Inspections and Utilities");
    let _ = writeln!(
        out,
        "The owner may inspect the property with 24 hours' prior notice. Utilities follow the original listing."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "8. Finality");
    let _ = writeln!(
        out,
        "Once both parties sign, the terms above cannot be changed. Every deposit, payment and refund is recorded on the platform ledger."
    );
    let _ = writeln!(out);
    let _ = write!(
        out,
        "By signing, each party confirms they have read and agree to be bound by this agreement."
    );

    out
}
