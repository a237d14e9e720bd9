use super::common::*;
use crate::workflows::tenancy::contract::{
    generate_contract, lease_end_date, rent_due_day, security_deposit_for, ContractInput,
};
use crate::workflows::tenancy::domain::{Amount, PartyIdentity};

fn input(move_in: chrono::NaiveDate, lease_months: Option<u32>) -> ContractInput {
    ContractInput {
        move_in,
        monthly_rent: Amount::from_dollars(800),
        listing: listing(),
        tenant: PartyIdentity {
            party_id: tenant(),
            name: "Ana Lima".to_string(),
            government_id: "P-123456".to_string(),
        },
        owner: PartyIdentity {
            party_id: owner(),
            name: "Bo Park".to_string(),
            government_id: "D-998877".to_string(),
        },
        lease_months,
        generated_at: at(2025, 2, 21, 9),
    }
}

#[test]
fn derives_terms_from_move_in_and_bid() {
    let contract = generate_contract(input(date(2025, 3, 10), None));

    assert_eq!(contract.rent_due_day, 17);
    assert_eq!(contract.security_deposit, Amount::from_dollars(1600));
    assert_eq!(contract.lease_months, 12);
    assert_eq!(contract.lease_start, date(2025, 3, 10));
    assert_eq!(contract.lease_end, date(2026, 3, 10));
    assert_eq!(contract.request_date, date(2025, 2, 21));
}

#[test]
fn agreement_text_embeds_parties_terms_and_clauses() {
    let contract = generate_contract(input(date(2025, 3, 10), None));
    let text = &contract.content;

    assert!(text.contains("Sunny two-bedroom on Elm"));
    assert!(text.contains("12 Elm Street, Springfield"));
    assert!(text.contains("Ana Lima (Government Issued ID: P-123456)"));
    assert!(text.contains("Bo Park (Government Issued ID: D-998877)"));
    assert!(text.contains("Monthly Rent: $800.00"));
    assert!(text.contains("Security Deposit: $1600.00"));
    assert!(text.contains("Due Date: 17th of each month"));
    assert!(text.contains("Lease Term: March 10, 2025 to March 10, 2026"));
    assert!(text.contains("60 days' notice"));
    assert!(text.contains("within 3 days of move-in"));
    assert!(text.contains("up to 7 days for verification"));
}

#[test]
fn due_day_wraps_past_thirty_one() {
    assert_eq!(rent_due_day(date(2025, 1, 24)), 31);
    assert_eq!(rent_due_day(date(2025, 1, 25)), 1);
    assert_eq!(rent_due_day(date(2025, 1, 31)), 7);
    assert_eq!(rent_due_day(date(2025, 2, 1)), 8);
}

#[test]
fn lease_end_clamps_to_month_end() {
    assert_eq!(lease_end_date(date(2025, 1, 31), 1), date(2025, 2, 28));
    assert_eq!(lease_end_date(date(2023, 3, 31), 11), date(2024, 2, 29));
    assert_eq!(lease_end_date(date(2025, 3, 10), 6), date(2025, 9, 10));
}

#[test]
fn custom_lease_duration_is_honoured() {
    let contract = generate_contract(input(date(2025, 3, 10), Some(6)));
    assert_eq!(contract.lease_months, 6);
    assert_eq!(contract.lease_end, date(2025, 9, 10));
    assert!(contract.content.contains("Lease Duration: 6 months"));
}

#[test]
fn deposit_is_two_months_rent() {
    assert_eq!(
        security_deposit_for(Amount::from_cents(123_45)),
        Amount::from_cents(246_90)
    );
}
