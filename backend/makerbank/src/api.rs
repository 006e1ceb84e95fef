//! Axum REST API handlers.
//!
//! Thin request layer over [`Ledger`]: handlers parse the body, call one
//! ledger operation and map [`LedgerError`] onto an HTTP status. Money travels
//! as decimal strings (`"12.50"`) in both directions.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::accounts::Receipt;
use crate::courses::{CourseSettings, CourseStats, CourseUpdate, IssuedCode, NewParticipant, Registration};
use crate::errors::LedgerError;
use crate::ledger::Ledger;
use crate::models::{Course, Participant, RateEntry, RateKind, Transaction};
use crate::money;

#[derive(Clone)]
pub struct ApiState {
    pub ledger: Ledger,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/courses", post(create_course))
        .route("/courses/:id", get(get_course).patch(update_course))
        .route("/courses/:id/finish", post(finish_course))
        .route("/courses/:id/rates/:kind", put(set_rate).get(get_rate))
        .route("/courses/:id/participants", post(import_participants))
        .route("/courses/:id/stats", get(course_stats))
        .route("/courses/:id/pending", get(list_pending))
        .route("/admins/:creator_id/courses", get(list_admin_courses))
        .route("/register", post(register))
        .route("/participants/:id", get(get_participant))
        .route(
            "/participants/by-telegram/:telegram_id",
            get(participant_by_telegram_id),
        )
        .route("/participants/by-code/:code", get(participant_by_code))
        .route("/participants/:id/transactions", get(list_transactions))
        .route("/participants/:id/withdrawals", post(request_withdrawal))
        .route("/participants/:id/deposits", post(request_deposit))
        .route(
            "/participants/:id/transactions/:tx_id/cancel",
            post(cancel_transaction),
        )
        .route("/transactions/:id/approve", post(approve))
        .route("/transactions/:id/decline", post(decline))
        .route("/participants/:id/savings/deposit", post(savings_deposit))
        .route("/participants/:id/savings/withdraw", post(savings_withdraw))
        .route("/participants/:id/loan/borrow", post(loan_borrow))
        .route("/participants/:id/loan/repay", post(loan_repay))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

#[derive(Deserialize)]
pub struct AmountRequest {
    pub amount: String,
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub rate: String,
}

#[derive(Serialize)]
pub struct RateResponse {
    pub kind: RateKind,
    pub rate: Decimal,
}

#[derive(Deserialize)]
pub struct CreateCourseRequest {
    pub name: String,
    pub description: Option<String>,
    pub creator_id: i64,
    pub max_loan_amount: Option<String>,
    pub savings_withdrawal_delay: Option<i64>,
    pub interest_day: Option<u8>,
    pub interest_time: Option<String>,
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub participants: Vec<NewParticipant>,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub code: String,
    pub telegram_id: i64,
}

#[derive(Deserialize)]
pub struct CourseFilter {
    #[serde(default)]
    pub active: bool,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        use LedgerError::*;
        match &self.0 {
            InvalidAmount(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_amount"),
            InsufficientFunds => (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds"),
            InsufficientSavings => (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_savings"),
            LoanLimitExceeded { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "loan_limit_exceeded"),
            SavingsLocked(_) => (StatusCode::UNPROCESSABLE_ENTITY, "savings_locked"),
            LoanOverpayment => (StatusCode::UNPROCESSABLE_ENTITY, "loan_overpayment"),
            InvalidSetting(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_setting"),
            AmountOverflow => (StatusCode::UNPROCESSABLE_ENTITY, "amount_overflow"),
            ParticipantNotFound(_) => (StatusCode::NOT_FOUND, "participant_not_found"),
            CourseNotFound(_) => (StatusCode::NOT_FOUND, "course_not_found"),
            TransactionNotFound(_) => (StatusCode::NOT_FOUND, "transaction_not_found"),
            TransactionNotPending(_) => (StatusCode::CONFLICT, "transaction_not_pending"),
            CourseFinished(_) => (StatusCode::CONFLICT, "course_finished"),
            DuplicateCourseName(_) => (StatusCode::CONFLICT, "duplicate_course_name"),
            NotTransactionOwner(_) => (StatusCode::FORBIDDEN, "not_transaction_owner"),
            Database(_) | Migrate(_) | Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_rate(raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw.trim())
        .map_err(|_| LedgerError::InvalidSetting(format!("rate {raw:?} is not a number")))
}

fn parse_kind(raw: &str) -> Result<RateKind, LedgerError> {
    RateKind::from_str(raw).map_err(|_| LedgerError::InvalidSetting(format!("unknown rate kind {raw:?}")))
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /courses`
///
/// Omitted settings fall back to the course defaults.
pub async fn create_course(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateCourseRequest>,
) -> ApiResult<(StatusCode, Json<Course>)> {
    let mut settings = CourseSettings::default();
    if let Some(raw) = &body.max_loan_amount {
        settings.max_loan_amount = Decimal::from_str(raw.trim()).map_err(|_| {
            LedgerError::InvalidSetting(format!("max_loan_amount {raw:?} is not a number"))
        })?;
    }
    if let Some(delay) = body.savings_withdrawal_delay {
        settings.savings_withdrawal_delay = delay;
    }
    if let Some(day) = body.interest_day {
        settings.interest_day = day;
    }
    if let Some(raw) = &body.interest_time {
        settings.interest_time = crate::courses::parse_interest_time(raw)?;
    }

    let course = state
        .ledger
        .create_course(&body.name, body.description.as_deref(), body.creator_id, settings)
        .await?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// `GET /courses/:id`
pub async fn get_course(
    State(state): State<Arc<ApiState>>,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<Course>> {
    Ok(Json(state.ledger.get_course(course_id).await?))
}

/// `PATCH /courses/:id`
pub async fn update_course(
    State(state): State<Arc<ApiState>>,
    Path(course_id): Path<i64>,
    Json(update): Json<CourseUpdate>,
) -> ApiResult<Json<Course>> {
    Ok(Json(state.ledger.update_course(course_id, update).await?))
}

/// `POST /courses/:id/finish`
pub async fn finish_course(
    State(state): State<Arc<ApiState>>,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<Course>> {
    Ok(Json(state.ledger.finish_course(course_id).await?))
}

/// `GET /admins/:creator_id/courses?active=true`
pub async fn list_admin_courses(
    State(state): State<Arc<ApiState>>,
    Path(creator_id): Path<i64>,
    Query(filter): Query<CourseFilter>,
) -> ApiResult<Json<ListResponse<Course>>> {
    let courses = state
        .ledger
        .list_courses_by_creator(creator_id, filter.active)
        .await?;
    Ok(Json(courses.into()))
}

/// `PUT /courses/:id/rates/:kind`
pub async fn set_rate(
    State(state): State<Arc<ApiState>>,
    Path((course_id, kind)): Path<(i64, String)>,
    Json(body): Json<RateRequest>,
) -> ApiResult<Json<RateEntry>> {
    let kind = parse_kind(&kind)?;
    let rate = parse_rate(&body.rate)?;
    Ok(Json(state.ledger.set_rate(course_id, kind, rate).await?))
}

/// `GET /courses/:id/rates/:kind`
pub async fn get_rate(
    State(state): State<Arc<ApiState>>,
    Path((course_id, kind)): Path<(i64, String)>,
) -> ApiResult<Json<RateResponse>> {
    let kind = parse_kind(&kind)?;
    let rate = state.ledger.get_current_rate(course_id, kind).await?;
    Ok(Json(RateResponse { kind, rate }))
}

/// `POST /courses/:id/participants`
///
/// Imports a roster and returns one registration code per person.
pub async fn import_participants(
    State(state): State<Arc<ApiState>>,
    Path(course_id): Path<i64>,
    Json(body): Json<ImportRequest>,
) -> ApiResult<(StatusCode, Json<ListResponse<IssuedCode>>)> {
    let issued = state
        .ledger
        .import_participants(course_id, body.participants)
        .await?;
    Ok((StatusCode::CREATED, Json(issued.into())))
}

/// `GET /courses/:id/stats`
pub async fn course_stats(
    State(state): State<Arc<ApiState>>,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<CourseStats>> {
    Ok(Json(state.ledger.course_stats(course_id).await?))
}

/// `GET /courses/:id/pending`
pub async fn list_pending(
    State(state): State<Arc<ApiState>>,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<ListResponse<Transaction>>> {
    Ok(Json(state.ledger.list_pending(course_id).await?.into()))
}

/// `POST /register`
pub async fn register(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Registration>)> {
    let outcome = state
        .ledger
        .register_by_code(&body.code, body.telegram_id)
        .await?;
    let status = match outcome {
        Registration::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// `GET /participants/:id`
pub async fn get_participant(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
) -> ApiResult<Json<Participant>> {
    Ok(Json(state.ledger.get_participant(participant_id).await?))
}

/// `GET /participants/by-code/:code`
pub async fn participant_by_code(
    State(state): State<Arc<ApiState>>,
    Path(code): Path<String>,
) -> Response {
    match state.ledger.participant_by_code(&code).await {
        Ok(Some(participant)) => Json(participant).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No participant with code {code:?}"),
                kind: "participant_not_found",
            }),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// `GET /participants/by-telegram/:telegram_id`
pub async fn participant_by_telegram_id(
    State(state): State<Arc<ApiState>>,
    Path(telegram_id): Path<i64>,
) -> Response {
    match state.ledger.participant_by_telegram_id(telegram_id).await {
        Ok(Some(participant)) => Json(participant).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No participant bound to chat {telegram_id}"),
                kind: "participant_not_found",
            }),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// `GET /participants/:id/transactions`
pub async fn list_transactions(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
) -> ApiResult<Json<ListResponse<Transaction>>> {
    Ok(Json(state.ledger.list_transactions(participant_id).await?.into()))
}

/// `POST /participants/:id/withdrawals`
pub async fn request_withdrawal(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let amount = money::parse_amount(&body.amount)?;
    let tx = state.ledger.request_withdrawal(participant_id, amount).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// `POST /participants/:id/deposits`
pub async fn request_deposit(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let amount = money::parse_amount(&body.amount)?;
    let tx = state.ledger.request_deposit(participant_id, amount).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// `POST /participants/:id/transactions/:tx_id/cancel`
pub async fn cancel_transaction(
    State(state): State<Arc<ApiState>>,
    Path((participant_id, tx_id)): Path<(i64, i64)>,
) -> ApiResult<Json<Transaction>> {
    Ok(Json(
        state.ledger.cancel_transaction(participant_id, tx_id).await?,
    ))
}

/// `POST /transactions/:id/approve`
pub async fn approve(
    State(state): State<Arc<ApiState>>,
    Path(tx_id): Path<i64>,
) -> ApiResult<Json<Transaction>> {
    Ok(Json(state.ledger.approve(tx_id).await?))
}

/// `POST /transactions/:id/decline`
pub async fn decline(
    State(state): State<Arc<ApiState>>,
    Path(tx_id): Path<i64>,
) -> ApiResult<Json<Transaction>> {
    Ok(Json(state.ledger.decline(tx_id).await?))
}

/// `POST /participants/:id/savings/deposit`
pub async fn savings_deposit(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Receipt>> {
    let amount = money::parse_amount(&body.amount)?;
    Ok(Json(state.ledger.move_to_savings(participant_id, amount).await?))
}

/// `POST /participants/:id/savings/withdraw`
pub async fn savings_withdraw(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Receipt>> {
    let amount = money::parse_amount(&body.amount)?;
    Ok(Json(
        state.ledger.withdraw_from_savings(participant_id, amount).await?,
    ))
}

/// `POST /participants/:id/loan/borrow`
pub async fn loan_borrow(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Receipt>> {
    let amount = money::parse_amount(&body.amount)?;
    Ok(Json(state.ledger.take_loan(participant_id, amount).await?))
}

/// `POST /participants/:id/loan/repay`
pub async fn loan_repay(
    State(state): State<Arc<ApiState>>,
    Path(participant_id): Path<i64>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Json<Receipt>> {
    let amount = money::parse_amount(&body.amount)?;
    Ok(Json(state.ledger.repay_loan(participant_id, amount).await?))
}
