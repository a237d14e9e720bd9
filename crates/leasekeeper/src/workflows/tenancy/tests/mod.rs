mod common;
mod contract;
mod ledger;
