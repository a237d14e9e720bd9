use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::collaborators::Clock;
use super::domain::{Amount, BillingPeriod, ListingId, PartyId, RequestId, TenancyId};
use super::ledger::{LedgerError, TransactionKind, TransactionQuery};
use super::lifecycle::{TenancyRequestError, TenancyRequestService};
use super::payments::{PaymentError, PaymentOutcome, RentPaymentService};
use super::repository::{RepositoryError, RequestRepository, TenancyRepository};
use super::request::RequestSubmission;
use super::scheduler::AutoPaymentScheduler;

/// Everything the HTTP surface needs, shared behind one `Arc`.
pub struct TenancyApi<R, T> {
    pub requests: Arc<TenancyRequestService<R, T>>,
    pub payments: Arc<RentPaymentService<T>>,
    pub scheduler: Arc<AutoPaymentScheduler<T>>,
    pub clock: Arc<dyn Clock>,
    pub reminder_days: i64,
}

/// Router builder exposing the request, payment, scheduler and wallet endpoints.
pub fn tenancy_router<R, T>(api: Arc<TenancyApi<R, T>>) -> Router
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    Router::new()
        .route("/api/v1/requests", post(submit_handler::<R, T>))
        .route(
            "/api/v1/requests/:request_id",
            get(request_handler::<R, T>).delete(delete_handler::<R, T>),
        )
        .route(
            "/api/v1/requests/:request_id/accept",
            post(accept_handler::<R, T>),
        )
        .route(
            "/api/v1/requests/:request_id/reject",
            post(reject_handler::<R, T>),
        )
        .route(
            "/api/v1/requests/:request_id/sign/tenant",
            post(sign_tenant_handler::<R, T>),
        )
        .route(
            "/api/v1/requests/:request_id/sign/owner",
            post(sign_owner_handler::<R, T>),
        )
        .route(
            "/api/v1/listings/:listing_id/bid-standing",
            post(bid_standing_handler::<R, T>),
        )
        .route(
            "/api/v1/tenancies/:tenancy_id/cycle",
            get(cycle_handler::<R, T>),
        )
        .route(
            "/api/v1/tenancies/:tenancy_id/pay",
            post(pay_handler::<R, T>),
        )
        .route(
            "/api/v1/tenancies/:tenancy_id/auto-payment",
            put(auto_payment_handler::<R, T>),
        )
        .route("/api/v1/scheduler/run", post(scheduler_handler::<R, T>))
        .route("/api/v1/wallets/:party_id", get(balance_handler::<R, T>))
        .route(
            "/api/v1/wallets/:party_id/deposit",
            post(deposit_handler::<R, T>),
        )
        .route(
            "/api/v1/wallets/:party_id/withdraw",
            post(withdraw_handler::<R, T>),
        )
        .route(
            "/api/v1/wallets/:party_id/transactions",
            get(transactions_handler::<R, T>),
        )
        .with_state(api)
}

#[derive(Debug, Deserialize)]
pub struct OwnerAction {
    pub owner_id: PartyId,
}

#[derive(Debug, Deserialize)]
pub struct TenantAction {
    pub tenant_id: PartyId,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub owner_id: PartyId,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TenantSignBody {
    pub tenant_id: PartyId,
    pub signature_token: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerSignBody {
    pub owner_id: PartyId,
    pub signature_token: String,
}

#[derive(Debug, Deserialize)]
pub struct BidBody {
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct PayBody {
    pub tenant_id: PartyId,
    #[serde(default)]
    pub period: Option<BillingPeriod>,
}

#[derive(Debug, Deserialize)]
pub struct AutoPaymentBody {
    pub tenant_id: PartyId,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct WalletBody {
    pub amount: Amount,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn error_body(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn repository_status(error: &RepositoryError) -> StatusCode {
    match error {
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Conflict => StatusCode::CONFLICT,
        RepositoryError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn request_error_response(error: TenancyRequestError) -> Response {
    match error {
        TenancyRequestError::ProfileIncomplete {
            party,
            role,
            missing_fields,
        } => {
            let payload = json!({
                "error": format!("{role} profile incomplete"),
                "party_id": party,
                "missing_fields": missing_fields,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
        }
        TenancyRequestError::Validation(error) => {
            error_body(StatusCode::UNPROCESSABLE_ENTITY, error)
        }
        TenancyRequestError::NotFound(_) => error_body(StatusCode::NOT_FOUND, error),
        TenancyRequestError::WrongParty { .. } => error_body(StatusCode::FORBIDDEN, error),
        TenancyRequestError::Transition(_)
        | TenancyRequestError::DuplicateRequest { .. }
        | TenancyRequestError::ListingUnavailable(_) => error_body(StatusCode::CONFLICT, error),
        TenancyRequestError::Repository(ref repository) => {
            error_body(repository_status(repository), &error)
        }
        TenancyRequestError::Profile(super::collaborators::ProfileError::NotFound(_)) => {
            error_body(StatusCode::NOT_FOUND, error)
        }
        TenancyRequestError::Profile(_)
        | TenancyRequestError::UnsignedContract(_) => error_body(StatusCode::INTERNAL_SERVER_ERROR, error),
    }
}

pub(crate) fn payment_error_response(error: PaymentError) -> Response {
    match error {
        PaymentError::NotFound(_) => error_body(StatusCode::NOT_FOUND, error),
        PaymentError::WrongParty { .. } => error_body(StatusCode::FORBIDDEN, error),
        PaymentError::WindowClosed {
            period,
            opens_in_days,
        } => {
            let payload = json!({
                "error": error.to_string(),
                "period": period,
                "days_until_window_opens": opens_in_days,
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        PaymentError::NotCollectible { .. } => error_body(StatusCode::CONFLICT, error),
        PaymentError::Ledger(ledger) => ledger_error_response(ledger),
        PaymentError::Repository(ref repository) => {
            error_body(repository_status(repository), &error)
        }
    }
}

pub(crate) fn ledger_error_response(error: LedgerError) -> Response {
    match error {
        LedgerError::InsufficientFunds(funds) => {
            let payload = json!({
                "error": error.to_string(),
                "available": funds.available,
                "required": funds.required,
            });
            (StatusCode::PAYMENT_REQUIRED, Json(payload)).into_response()
        }
        LedgerError::InvalidAmount | LedgerError::SelfTransfer => {
            error_body(StatusCode::UNPROCESSABLE_ENTITY, error)
        }
        LedgerError::Overflow(_) => error_body(StatusCode::CONFLICT, error),
        LedgerError::Unavailable(_) => error_body(StatusCode::INTERNAL_SERVER_ERROR, error),
    }
}

fn payment_outcome_response(outcome: PaymentOutcome) -> Response {
    match outcome {
        PaymentOutcome::Settled(settlement) => {
            (StatusCode::OK, Json(PaymentOutcome::Settled(settlement))).into_response()
        }
        PaymentOutcome::AlreadyPaid { period } => {
            let payload = json!({
                "error": format!("rent for {period} is already paid"),
                "already_paid": true,
                "period": period,
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        PaymentOutcome::InsufficientFunds { period, funds } => {
            let payload = json!({
                "error": "insufficient funds",
                "period": period,
                "available": funds.available,
                "required": funds.required,
                "shortfall": funds.shortfall(),
            });
            (StatusCode::PAYMENT_REQUIRED, Json(payload)).into_response()
        }
        PaymentOutcome::AutoPaymentDisabled { period } => {
            let payload = json!({
                "error": "auto payment disabled",
                "period": period,
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn submit_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Json(submission): Json<RequestSubmission>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.requests.submit(submission, api.clock.now()) {
        Ok(request) => (StatusCode::CREATED, Json(request)).into_response(),
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn request_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(request_id): Path<String>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.requests.get(&RequestId(request_id)) {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn delete_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(request_id): Path<String>,
    Json(body): Json<TenantAction>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.requests.delete(&RequestId(request_id), &body.tenant_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn accept_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(request_id): Path<String>,
    Json(body): Json<OwnerAction>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api
        .requests
        .accept(&RequestId(request_id), &body.owner_id, api.clock.now())
    {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn reject_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(request_id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.requests.reject(
        &RequestId(request_id),
        &body.owner_id,
        &body.reason,
        api.clock.now(),
    ) {
        Ok(request) => (StatusCode::OK, Json(request.status_view())).into_response(),
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn sign_tenant_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(request_id): Path<String>,
    Json(body): Json<TenantSignBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.requests.sign_as_tenant(
        &RequestId(request_id),
        &body.tenant_id,
        &body.signature_token,
        api.clock.now(),
    ) {
        Ok(request) => (StatusCode::OK, Json(request.status_view())).into_response(),
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn sign_owner_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(request_id): Path<String>,
    Json(body): Json<OwnerSignBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.requests.sign_as_owner(
        &RequestId(request_id),
        &body.owner_id,
        &body.signature_token,
        api.clock.now(),
    ) {
        Ok(outcome) => {
            let status = if outcome.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(outcome)).into_response()
        }
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn bid_standing_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(listing_id): Path<String>,
    Json(body): Json<BidBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api
        .requests
        .bid_standing(&ListingId(listing_id), body.amount)
    {
        Ok(standing) => (StatusCode::OK, Json(standing)).into_response(),
        Err(error) => request_error_response(error),
    }
}

pub(crate) async fn cycle_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(tenancy_id): Path<String>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api
        .payments
        .current_cycle(&TenancyId(tenancy_id), api.clock.now())
    {
        Ok(cycle) => (StatusCode::OK, Json(cycle)).into_response(),
        Err(error) => payment_error_response(error),
    }
}

pub(crate) async fn pay_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(tenancy_id): Path<String>,
    Json(body): Json<PayBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.payments.pay_now(
        &TenancyId(tenancy_id),
        &body.tenant_id,
        body.period,
        api.clock.now(),
    ) {
        Ok(outcome) => payment_outcome_response(outcome),
        Err(error) => payment_error_response(error),
    }
}

pub(crate) async fn auto_payment_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(tenancy_id): Path<String>,
    Json(body): Json<AutoPaymentBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.payments.set_auto_payment(
        &TenancyId(tenancy_id),
        &body.tenant_id,
        body.enabled,
        api.clock.now(),
    ) {
        Ok(tenancy) => {
            let payload = json!({
                "tenancy_id": tenancy.id,
                "auto_payment": tenancy.auto_payment,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => payment_error_response(error),
    }
}

pub(crate) async fn scheduler_handler<R, T>(State(api): State<Arc<TenancyApi<R, T>>>) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    let scheduler = Arc::clone(&api.scheduler);
    let (now, reminder_days) = (api.clock.now(), api.reminder_days);
    let pass = tokio::task::spawn_blocking(move || scheduler.run_once(now, reminder_days)).await;

    match pass {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(error)) => error_body(repository_status(&error), error),
        Err(join_error) => {
            error!(error = %join_error, "manual auto payment pass panicked");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, join_error)
        }
    }
}

pub(crate) async fn balance_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(party_id): Path<String>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    let party = PartyId(party_id);
    match api.payments.ledger().balance(&party) {
        Ok(balance) => {
            let payload = json!({
                "party_id": party,
                "balance": balance,
                "display": balance.to_string(),
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => ledger_error_response(error),
    }
}

pub(crate) async fn deposit_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(party_id): Path<String>,
    Json(body): Json<WalletBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.payments.ledger().deposit(
        &PartyId(party_id),
        body.amount,
        body.reference,
        api.clock.now(),
    ) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => ledger_error_response(error),
    }
}

pub(crate) async fn withdraw_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(party_id): Path<String>,
    Json(body): Json<WalletBody>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    match api.payments.ledger().withdraw(
        &PartyId(party_id),
        body.amount,
        body.reference,
        api.clock.now(),
    ) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => ledger_error_response(error),
    }
}

pub(crate) async fn transactions_handler<R, T>(
    State(api): State<Arc<TenancyApi<R, T>>>,
    Path(party_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response
where
    R: RequestRepository + 'static,
    T: TenancyRepository + 'static,
{
    let mut query = TransactionQuery::for_party(PartyId(party_id));
    query.kind = params.kind;
    query.from = params.from;
    query.to = params.to;
    if let Some(page) = params.page {
        query.page = page;
    }
    if let Some(limit) = params.limit {
        query.limit = limit;
    }

    match api.payments.ledger().history(&query) {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(error) => ledger_error_response(error),
    }
}
