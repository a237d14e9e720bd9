use super::common::*;
use crate::workflows::tenancy::domain::{Amount, BillingPeriod, PartyId, TenancyId};
use crate::workflows::tenancy::ledger::{
    InsufficientFunds, Ledger, LedgerError, RentTransfer, TransactionKind, TransactionQuery,
};

fn transfer(amount: Amount) -> RentTransfer {
    RentTransfer {
        tenancy_id: TenancyId::new("ten-test"),
        payer: tenant(),
        payee: owner(),
        amount,
        period: BillingPeriod {
            year: 2025,
            month: 3,
        },
        at: at(2025, 3, 1, 12),
    }
}

#[test]
fn deposit_and_withdraw_record_post_mutation_balances() {
    let ledger = Ledger::new();
    let party = tenant();

    let credit = ledger
        .deposit(
            &party,
            Amount::from_dollars(500),
            Some("0xabc".to_string()),
            at(2025, 2, 1, 0),
        )
        .expect("deposit");
    let debit = ledger
        .withdraw(&party, Amount::from_dollars(120), None, at(2025, 2, 2, 0))
        .expect("withdraw");

    assert_eq!(credit.kind, TransactionKind::Deposit);
    assert_eq!(credit.balance_after, Amount::from_dollars(500));
    assert_eq!(credit.reference.as_deref(), Some("0xabc"));
    assert_eq!(debit.kind, TransactionKind::Withdraw);
    assert_eq!(debit.balance_after, Amount::from_dollars(380));
    assert_eq!(
        ledger.balance(&party).expect("balance"),
        Amount::from_dollars(380)
    );
}

#[test]
fn overdrawn_withdrawal_changes_nothing() {
    let ledger = Ledger::new();
    let party = tenant();
    ledger
        .deposit(&party, Amount::from_dollars(50), None, at(2025, 2, 1, 0))
        .expect("deposit");

    let error = ledger
        .withdraw(&party, Amount::from_dollars(80), None, at(2025, 2, 2, 0))
        .expect_err("overdraw rejected");

    assert_eq!(
        error,
        LedgerError::InsufficientFunds(InsufficientFunds {
            available: Amount::from_dollars(50),
            required: Amount::from_dollars(80),
        })
    );
    assert_eq!(
        ledger.balance(&party).expect("balance"),
        Amount::from_dollars(50)
    );
    let history = ledger
        .history(&TransactionQuery::for_party(party))
        .expect("history");
    assert_eq!(history.total, 1);
}

#[test]
fn zero_amounts_are_rejected() {
    let ledger = Ledger::new();
    assert_eq!(
        ledger.deposit(&tenant(), Amount::ZERO, None, at(2025, 2, 1, 0)),
        Err(LedgerError::InvalidAmount)
    );
    let mut txn = ledger.begin().expect("txn");
    assert_eq!(
        txn.transfer_rent(&transfer(Amount::ZERO)),
        Err(LedgerError::InvalidAmount)
    );
}

#[test]
fn committed_transfer_conserves_value() {
    let ledger = Ledger::new();
    ledger
        .deposit(&tenant(), Amount::from_dollars(1000), None, at(2025, 2, 1, 0))
        .expect("deposit");
    ledger
        .deposit(&owner(), Amount::from_dollars(40), None, at(2025, 2, 1, 0))
        .expect("deposit");

    let mut txn = ledger.begin().expect("txn");
    let receipt = txn
        .transfer_rent(&transfer(Amount::from_dollars(800)))
        .expect("transfer staged");
    txn.commit();

    assert_eq!(receipt.payment.kind, TransactionKind::RentPayment);
    assert_eq!(receipt.received.kind, TransactionKind::RentReceived);
    assert_eq!(receipt.payment.amount, receipt.received.amount);
    assert_eq!(receipt.payment.counterparty, Some(owner()));
    assert_eq!(receipt.received.counterparty, Some(tenant()));
    assert_eq!(receipt.payment.balance_after, Amount::from_dollars(200));
    assert_eq!(receipt.received.balance_after, Amount::from_dollars(840));
    assert_eq!(
        receipt.received.reference.as_deref(),
        Some(receipt.payment.id.as_str())
    );

    let tenant_balance = ledger.balance(&tenant()).expect("balance");
    let owner_balance = ledger.balance(&owner()).expect("balance");
    assert_eq!(tenant_balance, Amount::from_dollars(200));
    assert_eq!(owner_balance, Amount::from_dollars(840));
    assert_eq!(
        tenant_balance.cents() + owner_balance.cents(),
        Amount::from_dollars(1040).cents()
    );
    assert_eq!(
        ledger
            .transactions_for_tenancy(&TenancyId::new("ten-test"))
            .expect("records")
            .len(),
        2
    );
}

#[test]
fn dropped_transfer_leaves_no_trace() {
    let ledger = Ledger::new();
    ledger
        .deposit(&tenant(), Amount::from_dollars(1000), None, at(2025, 2, 1, 0))
        .expect("deposit");

    {
        let mut txn = ledger.begin().expect("txn");
        txn.transfer_rent(&transfer(Amount::from_dollars(800)))
            .expect("transfer staged");
    }

    assert_eq!(
        ledger.balance(&tenant()).expect("balance"),
        Amount::from_dollars(1000)
    );
    assert_eq!(ledger.balance(&owner()).expect("balance"), Amount::ZERO);
    assert!(ledger
        .transactions_for_tenancy(&TenancyId::new("ten-test"))
        .expect("records")
        .is_empty());
}

#[test]
fn transfer_requires_distinct_parties_and_funds() {
    let ledger = Ledger::new();
    let mut txn = ledger.begin().expect("txn");

    let mut to_self = transfer(Amount::from_dollars(10));
    to_self.payee = to_self.payer.clone();
    assert_eq!(txn.transfer_rent(&to_self), Err(LedgerError::SelfTransfer));

    assert_eq!(
        txn.transfer_rent(&transfer(Amount::from_dollars(10))),
        Err(LedgerError::InsufficientFunds(InsufficientFunds {
            available: Amount::ZERO,
            required: Amount::from_dollars(10),
        }))
    );
}

#[test]
fn history_is_newest_first_and_paged() {
    let ledger = Ledger::new();
    let party = PartyId::new("wallet-holder");
    for day in 1..=5 {
        ledger
            .deposit(&party, Amount::from_dollars(day), None, at(2025, 1, day as u32, 0))
            .expect("deposit");
    }
    ledger
        .withdraw(&party, Amount::from_dollars(1), None, at(2025, 1, 6, 0))
        .expect("withdraw");

    let mut query = TransactionQuery::for_party(party.clone());
    query.limit = 2;
    let first = ledger.history(&query).expect("page one");
    assert_eq!(first.total, 6);
    assert_eq!(first.pages, 3);
    assert_eq!(first.transactions.len(), 2);
    assert_eq!(first.transactions[0].kind, TransactionKind::Withdraw);
    assert_eq!(first.transactions[1].amount, Amount::from_dollars(5));

    query.page = 3;
    let last = ledger.history(&query).expect("page three");
    assert_eq!(last.transactions[1].amount, Amount::from_dollars(1));

    let mut deposits = TransactionQuery::for_party(party.clone());
    deposits.kind = Some(TransactionKind::Deposit);
    deposits.from = Some(date(2025, 1, 2));
    deposits.to = Some(date(2025, 1, 4));
    let filtered = ledger.history(&deposits).expect("filtered");
    assert_eq!(filtered.total, 3);
    assert!(filtered
        .transactions
        .iter()
        .all(|record| record.kind == TransactionKind::Deposit));
}
