//! HTTP surface over the quote lifecycle controller.
//!
//! Admin routes require `x-admin-key` to match `server.admin_api_key`; when no
//! key is configured they are refused outright. Signed-in customers are
//! identified by `x-account-id` (session handling lives in front of this
//! service). Every response error carries the request's correlation id.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use fleetquote_core::domain::account::{Account, AccountId, RegistrationPayload};
use fleetquote_core::domain::actor::Actor;
use fleetquote_core::domain::quote::{
    BookingStatus, ContactDetails, Quote, QuoteFilter, QuoteId, QuoteIntake, QuoteStatus,
    TripDetails,
};
use fleetquote_core::domain::vehicle::VehicleClass;
use fleetquote_core::errors::{ApplicationError, DomainError, ErrorKind};
use fleetquote_core::lifecycle::{
    DiscountReceipt, ManualBooking, OperationContext, QuoteLifecycleController, TokenCheckView,
};
use fleetquote_core::loyalty::LoyaltySummary;
use fleetquote_core::pricing::{EstimateRequest, PriceEstimate};

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    controller: Arc<QuoteLifecycleController>,
    admin_api_key: Option<SecretString>,
}

impl ApiState {
    pub fn new(
        controller: Arc<QuoteLifecycleController>,
        admin_api_key: Option<SecretString>,
    ) -> Self {
        Self { controller, admin_api_key }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, ApiFailure>;

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct QuoteRequest {
    pub purpose: String,
    pub trip_type: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    #[serde(default)]
    pub destination: Option<String>,
    pub vehicle_type: String,
    #[serde(default)]
    pub is_one_way: bool,
    pub trip_date: NaiveDate,
    #[serde(default)]
    pub trip_time: Option<NaiveTime>,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub passengers: Option<u32>,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub company: Option<String>,
    /// Honoured for admins only; customers always own what they create.
    #[serde(default)]
    pub account_id: Option<String>,
}

impl QuoteRequest {
    fn into_intake(self) -> Result<QuoteIntake, ApplicationError> {
        let vehicle_class = self.vehicle_type.parse::<VehicleClass>()?;
        let destination = self
            .destination
            .filter(|destination| !destination.trim().is_empty())
            .unwrap_or_else(|| self.dropoff_location.clone());
        Ok(QuoteIntake {
            trip: TripDetails {
                purpose: self.purpose,
                trip_type: self.trip_type,
                pickup_location: self.pickup_location,
                dropoff_location: self.dropoff_location,
                destination,
                vehicle_class,
                is_one_way: self.is_one_way,
                trip_date: self.trip_date,
                trip_time: self.trip_time,
                return_date: self.return_date,
                passengers: self.passengers,
            },
            contact: ContactDetails {
                name: self.name,
                email: self.email,
                phone: self.phone,
                company: self.company.filter(|company| !company.trim().is_empty()),
            },
            account_id: self.account_id.map(AccountId),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EstimateBody {
    pub vehicle_type: String,
    pub pickup: String,
    pub dropoff: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub is_one_way: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ManualBookingRequest {
    #[serde(flatten)]
    pub quote: QuoteRequest,
    #[serde(default)]
    pub final_price: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SendQuoteRequest {
    pub final_price: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    #[serde(default)]
    pub final_price: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConvertRequest {
    pub final_price: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeclineRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoyaltyDiscountRequest {
    pub points: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenAcceptRequest {
    pub token: String,
    #[serde(default)]
    pub register: Option<RegistrationPayload>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenDeclineRequest {
    pub token: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub quote_status: Option<String>,
    pub account_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub quote: Quote,
    pub account: Option<Account>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/quotes", post(create_quote))
        .route("/api/quotes/estimate", post(estimate))
        .route("/api/quotes/{id}", get(get_quote))
        .route("/api/quotes/{id}/accept", post(customer_accept))
        .route("/api/quotes/{id}/decline", post(customer_decline))
        .route("/api/quotes/{id}/loyalty-discount", post(apply_loyalty_discount))
        .route("/api/quotes/{id}/respond", get(check_token))
        .route("/api/quotes/{id}/respond/accept", post(token_accept))
        .route("/api/quotes/{id}/respond/decline", post(token_decline))
        .route("/api/accounts/me/quotes", get(my_quotes))
        .route("/api/accounts/me/loyalty", get(my_loyalty))
        .route("/api/admin/quotes", get(list_quotes))
        .route("/api/admin/quotes/{id}", axum::routing::delete(delete_quote))
        .route("/api/admin/quotes/{id}/send", post(price_and_send))
        .route("/api/admin/quotes/{id}/status", axum::routing::put(set_status))
        .route("/api/admin/quotes/{id}/convert", post(convert_to_booking))
        .route("/api/admin/bookings", post(create_manual_booking))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller resolution
// ---------------------------------------------------------------------------

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

fn admin_key_matches(configured: &SecretString, supplied: &str) -> bool {
    let expected = configured.expose_secret().as_bytes();
    let supplied = supplied.as_bytes();
    if expected.len() != supplied.len() {
        return false;
    }
    expected.iter().zip(supplied).fold(0u8, |diff, (left, right)| diff | (left ^ right)) == 0
}

/// Resolves the caller for routes open to everyone. A presented admin key
/// must be valid; a bad one is rejected rather than downgraded.
fn caller(state: &ApiState, headers: &HeaderMap) -> Result<OperationContext, ApiFailure> {
    let correlation_id = correlation_id(headers);
    if let Some(supplied) = header_value(headers, ADMIN_KEY_HEADER) {
        return match &state.admin_api_key {
            Some(configured) if admin_key_matches(configured, supplied) => {
                Ok(OperationContext::new(Actor::Admin, correlation_id))
            }
            _ => Err(failure(
                DomainError::Unauthorized("admin key rejected".to_owned()).into(),
                &correlation_id,
            )),
        };
    }
    let actor = match header_value(headers, ACCOUNT_ID_HEADER) {
        Some(account_id) => Actor::Customer(AccountId(account_id.to_owned())),
        None => Actor::Anonymous,
    };
    Ok(OperationContext::new(actor, correlation_id))
}

fn admin(state: &ApiState, headers: &HeaderMap) -> Result<OperationContext, ApiFailure> {
    let correlation_id = correlation_id(headers);
    let Some(configured) = &state.admin_api_key else {
        return Err(failure(
            DomainError::Unauthorized("admin api is disabled".to_owned()).into(),
            &correlation_id,
        ));
    };
    match header_value(headers, ADMIN_KEY_HEADER) {
        Some(supplied) if admin_key_matches(configured, supplied) => {
            Ok(OperationContext::new(Actor::Admin, correlation_id))
        }
        _ => Err(failure(
            DomainError::Unauthorized("admin key missing or invalid".to_owned()).into(),
            &correlation_id,
        )),
    }
}

fn anonymous(headers: &HeaderMap) -> OperationContext {
    OperationContext::new(Actor::Anonymous, correlation_id(headers))
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::InvalidToken => StatusCode::GONE,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InsufficientPoints => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: ApplicationError, correlation_id: &str) -> ApiFailure {
    let interface = error.clone().into_interface(correlation_id);
    let status = status_for(interface.kind);
    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            error = %error,
            "request failed on a dependency"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            correlation_id = %correlation_id,
            kind = ?interface.kind,
            error = %error,
            "request rejected"
        );
    }
    (
        status,
        Json(ApiError {
            error: interface.user_message().to_owned(),
            kind: interface.kind,
            message: interface.message,
            correlation_id: interface.correlation_id,
        }),
    )
}

fn parse_status(raw: &str) -> Result<BookingStatus, ApplicationError> {
    BookingStatus::parse(raw)
        .ok_or_else(|| DomainError::Validation(format!("unknown booking status `{raw}`")).into())
}

impl ListQuery {
    fn into_filter(self) -> Result<QuoteFilter, ApplicationError> {
        let status = self.status.as_deref().map(parse_status).transpose()?;
        let quote_status = self
            .quote_status
            .as_deref()
            .map(|raw| {
                QuoteStatus::parse(raw).ok_or_else(|| {
                    ApplicationError::from(DomainError::Validation(format!(
                        "unknown quote status `{raw}`"
                    )))
                })
            })
            .transpose()?;
        Ok(QuoteFilter { status, quote_status, account_id: self.account_id.map(AccountId) })
    }
}

// ---------------------------------------------------------------------------
// Public and customer handlers
// ---------------------------------------------------------------------------

pub async fn estimate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<EstimateBody>,
) -> ApiResult<PriceEstimate> {
    let ctx = anonymous(&headers);
    let vehicle_class =
        body.vehicle_type.parse::<VehicleClass>().map_err(|e| failure(e.into(), &ctx.correlation_id))?;
    let destination = body.destination.unwrap_or_else(|| body.dropoff.clone());
    let request = EstimateRequest {
        vehicle_class,
        pickup: body.pickup,
        dropoff: body.dropoff,
        destination,
        is_one_way: body.is_one_way,
    };
    Ok(Json(state.controller.estimate(&request)))
}

pub async fn create_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<QuoteRequest>,
) -> Result<(StatusCode, Json<Quote>), ApiFailure> {
    let ctx = caller(&state, &headers)?;
    let intake = body.into_intake().map_err(|e| failure(e, &ctx.correlation_id))?;
    let quote = state
        .controller
        .create_quote(&ctx, intake)
        .await
        .map_err(|e| failure(e, &ctx.correlation_id))?;
    Ok((StatusCode::CREATED, Json(quote)))
}

pub async fn get_quote(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Quote> {
    let ctx = caller(&state, &headers)?;
    state
        .controller
        .get_quote(&ctx, &QuoteId(id))
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn customer_accept(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Quote> {
    let ctx = caller(&state, &headers)?;
    state
        .controller
        .customer_accept(&ctx, &QuoteId(id))
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn customer_decline(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DeclineRequest>,
) -> ApiResult<Quote> {
    let ctx = caller(&state, &headers)?;
    state
        .controller
        .customer_decline(&ctx, &QuoteId(id), body.reason)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn apply_loyalty_discount(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<LoyaltyDiscountRequest>,
) -> ApiResult<DiscountReceipt> {
    let ctx = caller(&state, &headers)?;
    state
        .controller
        .apply_loyalty_discount(&ctx, &QuoteId(id), body.points)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn check_token(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> ApiResult<TokenCheckView> {
    let ctx = anonymous(&headers);
    state
        .controller
        .anonymous_check_token(&QuoteId(id), &query.token)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn token_accept(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TokenAcceptRequest>,
) -> ApiResult<AcceptResponse> {
    let ctx = anonymous(&headers);
    let quote_id = QuoteId(id);
    let result = match body.register {
        Some(registration) => state
            .controller
            .anonymous_accept_with_registration(&ctx, &quote_id, &body.token, registration)
            .await
            .map(|(quote, account)| AcceptResponse { quote, account: Some(account) }),
        None => state
            .controller
            .anonymous_accept(&ctx, &quote_id, &body.token)
            .await
            .map(|quote| AcceptResponse { quote, account: None }),
    };
    result.map(Json).map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn token_decline(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TokenDeclineRequest>,
) -> ApiResult<Quote> {
    let ctx = anonymous(&headers);
    state
        .controller
        .anonymous_decline(&ctx, &QuoteId(id), &body.token, body.reason)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn my_quotes(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Vec<Quote>> {
    let ctx = caller(&state, &headers)?;
    state
        .controller
        .list_quotes_for_account(&ctx)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn my_loyalty(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<LoyaltySummary> {
    let ctx = caller(&state, &headers)?;
    state
        .controller
        .loyalty_summary(&ctx)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

pub async fn list_quotes(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Vec<Quote>> {
    let ctx = admin(&state, &headers)?;
    let filter = query.into_filter().map_err(|e| failure(e, &ctx.correlation_id))?;
    state
        .controller
        .list_quotes(&ctx, &filter)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn price_and_send(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SendQuoteRequest>,
) -> ApiResult<Quote> {
    let ctx = admin(&state, &headers)?;
    state
        .controller
        .price_and_send(&ctx, &QuoteId(id), body.final_price, body.notes)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn set_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StatusRequest>,
) -> ApiResult<Quote> {
    let ctx = admin(&state, &headers)?;
    let status = parse_status(&body.status).map_err(|e| failure(e, &ctx.correlation_id))?;
    state
        .controller
        .set_status(&ctx, &QuoteId(id), status, body.final_price, body.notes)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn convert_to_booking(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ConvertRequest>,
) -> ApiResult<Quote> {
    let ctx = admin(&state, &headers)?;
    state
        .controller
        .convert_to_booking(&ctx, &QuoteId(id), body.final_price, body.notes)
        .await
        .map(Json)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn delete_quote(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiFailure> {
    let ctx = admin(&state, &headers)?;
    state
        .controller
        .delete_quote(&ctx, &QuoteId(id))
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| failure(e, &ctx.correlation_id))
}

pub async fn create_manual_booking(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ManualBookingRequest>,
) -> Result<(StatusCode, Json<Quote>), ApiFailure> {
    let ctx = admin(&state, &headers)?;
    let intake = body.quote.into_intake().map_err(|e| failure(e, &ctx.correlation_id))?;
    let booking = ManualBooking { intake, final_price: body.final_price, notes: body.notes };
    let quote = state
        .controller
        .create_manual_booking(&ctx, booking)
        .await
        .map_err(|e| failure(e, &ctx.correlation_id))?;
    Ok((StatusCode::CREATED, Json(quote)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use fleetquote_core::domain::account::{Account, AccountId, LoyaltyTier};
    use fleetquote_core::domain::quote::{BookingStatus, Quote, QuoteStatus};
    use fleetquote_core::lifecycle::{QuoteLifecycleController, TokenCheckView};
    use fleetquote_core::ports::{ManualClock, RecordingNotifier, SentNotification};
    use fleetquote_core::pricing::PriceEstimate;
    use fleetquote_db::{InMemoryAccountRepository, InMemoryQuoteRepository};

    use super::{router, AcceptResponse, ApiError, ApiState};

    const ADMIN_KEY: &str = "test-admin-key-0123456789";

    struct TestApp {
        router: Router,
        accounts: Arc<InMemoryAccountRepository>,
        notifier: RecordingNotifier,
    }

    fn app() -> TestApp {
        let accounts = Arc::new(InMemoryAccountRepository::default());
        let notifier = RecordingNotifier::default();
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).single().expect("valid timestamp"),
        );
        let controller = QuoteLifecycleController::new(
            Arc::new(InMemoryQuoteRepository::default()),
            accounts.clone(),
            Arc::new(notifier.clone()),
        )
        .with_clock(Arc::new(clock));
        let state = ApiState::new(
            Arc::new(controller),
            Some(SecretString::from(ADMIN_KEY.to_string())),
        );
        TestApp { router: router(state), accounts, notifier }
    }

    fn quote_body() -> Value {
        json!({
            "purpose": "Airport transfer",
            "trip_type": "transfer",
            "pickup_location": "Sandton",
            "dropoff_location": "OR Tambo",
            "vehicle_type": "4 Seater Sedan",
            "is_one_way": false,
            "trip_date": "2026-11-02",
            "name": "Thandi Mokoena",
            "email": "thandi@example.com",
            "phone": "+27 82 555 0101"
        })
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => request.body(Body::empty()).expect("request"),
        };
        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("json body")
    }

    async fn create(app: &TestApp, headers: &[(&str, &str)]) -> Quote {
        let (status, body) = send(&app.router, "POST", "/api/quotes", headers, Some(quote_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        parse(&body)
    }

    async fn send_priced(app: &TestApp, quote: &Quote, price: u32) -> String {
        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/admin/quotes/{}/send", quote.id),
            &[("x-admin-key", ADMIN_KEY)],
            Some(json!({ "final_price": price, "notes": "Includes tolls" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        app.notifier
            .sent()
            .into_iter()
            .find_map(|sent| match sent {
                SentNotification::QuoteReady { quote_id, token: Some(token), .. }
                    if quote_id == quote.id =>
                {
                    Some(token)
                }
                _ => None,
            })
            .expect("token issued")
    }

    #[tokio::test]
    async fn estimate_prices_unknown_locations_at_default_round_trip() {
        let app = app();
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/quotes/estimate",
            &[],
            Some(json!({
                "vehicle_type": "4 Seater Sedan",
                "pickup": "Sandton",
                "dropoff": "OR Tambo",
                "is_one_way": false
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let estimate: PriceEstimate = parse(&body);
        assert_eq!(estimate.price, Decimal::from(1800));
    }

    #[tokio::test]
    async fn unknown_vehicle_label_is_a_bad_request() {
        let app = app();
        let mut body = quote_body();
        body["vehicle_type"] = json!("Hovercraft");

        let (status, body) = send(&app.router, "POST", "/api/quotes", &[], Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ApiError = parse(&body);
        assert!(error.message.contains("Hovercraft"));
        assert!(!error.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn anonymous_flow_from_request_to_token_accept() {
        let app = app();
        let quote = create(&app, &[("x-correlation-id", "req-42")]).await;
        assert_eq!(quote.estimated_price, Decimal::from(1800));
        assert_eq!(quote.quote_status, QuoteStatus::PendingAdmin);

        let token = send_priced(&app, &quote, 1200).await;

        let (status, body) = send(
            &app.router,
            "GET",
            &format!("/api/quotes/{}/respond?token={token}", quote.id),
            &[],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let view: TokenCheckView = parse(&body);
        assert!(view.requires_registration);
        assert!(!view.email_registered);

        let (status, body) = send(
            &app.router,
            "POST",
            &format!("/api/quotes/{}/respond/accept", quote.id),
            &[],
            Some(json!({ "token": token })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let accepted: AcceptResponse = parse(&body);
        assert_eq!(accepted.quote.quote_status, QuoteStatus::Accepted);
        assert_eq!(accepted.quote.status, BookingStatus::Booked);
        assert!(accepted.account.is_none());

        let (status, body) = send(
            &app.router,
            "POST",
            &format!("/api/quotes/{}/respond/decline", quote.id),
            &[],
            Some(json!({ "token": token, "reason": "changed my mind" })),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
        let error: ApiError = parse(&body);
        assert!(error.error.contains("expired"));
    }

    #[tokio::test]
    async fn token_accept_can_register_the_contact() {
        let app = app();
        let quote = create(&app, &[]).await;
        let token = send_priced(&app, &quote, 1500).await;

        let (status, body) = send(
            &app.router,
            "POST",
            &format!("/api/quotes/{}/respond/accept", quote.id),
            &[],
            Some(json!({
                "token": token,
                "register": { "name": "Thandi M", "password": "a sturdy passphrase" }
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let accepted: AcceptResponse = parse(&body);
        let account = accepted.account.expect("account created");
        assert_eq!(account.email, "thandi@example.com");
        assert_eq!(accepted.quote.account_id, Some(account.id.clone()));

        let (status, body) = send(
            &app.router,
            "GET",
            "/api/accounts/me/quotes",
            &[("x-account-id", account.id.0.as_str())],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let mine: Vec<Quote> = parse(&body);
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn admin_routes_require_the_configured_key() {
        let app = app();
        let (status, _) = send(&app.router, "GET", "/api/admin/quotes", &[], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app.router,
            "GET",
            "/api/admin/quotes",
            &[("x-admin-key", "not-the-right-key-at-all")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app.router, "GET", "/api/admin/quotes", &[("x-admin-key", ADMIN_KEY)], None)
                .await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<Quote> = parse(&body);
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn admin_routes_are_refused_when_no_key_is_configured() {
        let controller = QuoteLifecycleController::new(
            Arc::new(InMemoryQuoteRepository::default()),
            Arc::new(InMemoryAccountRepository::default()),
            Arc::new(RecordingNotifier::default()),
        );
        let router = router(ApiState::new(Arc::new(controller), None));

        let (status, _) =
            send(&router, "GET", "/api/admin/quotes", &[("x-admin-key", ADMIN_KEY)], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn customer_completion_awards_points_and_discount_uses_them() {
        let app = app();
        let account_id = AccountId("acct-api-1".to_string());
        app.accounts
            .put(Account {
                id: account_id.clone(),
                version: 0,
                name: "Thandi Mokoena".to_string(),
                email: "thandi@example.com".to_string(),
                phone: None,
                loyalty_points: 0,
                total_trips: 0,
                total_spent: Decimal::ZERO,
                tier: LoyaltyTier::Bronze,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;
        let customer = [("x-account-id", "acct-api-1")];

        let quote = create(&app, &customer).await;
        assert_eq!(quote.account_id, Some(account_id));
        let admin = [("x-admin-key", ADMIN_KEY)];
        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/admin/quotes/{}/send", quote.id),
            &admin,
            Some(json!({ "final_price": "2000" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/quotes/{}/accept", quote.id),
            &customer,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app.router,
            "PUT",
            &format!("/api/admin/quotes/{}/status", quote.id),
            &admin,
            Some(json!({ "status": "completed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let completed: Quote = parse(&body);
        // floor(2000 / 10) + 50 for a sedan
        assert_eq!(completed.loyalty_points_earned, Some(250));

        let (status, body) =
            send(&app.router, "GET", "/api/accounts/me/loyalty", &customer, None).await;
        assert_eq!(status, StatusCode::OK);
        let summary: Value = parse(&body);
        assert_eq!(summary["loyalty_points"], json!(250));

        let second = create(&app, &customer).await;
        let discount_uri = format!("/api/quotes/{}/loyalty-discount", second.id);
        let (status, _) =
            send(&app.router, "POST", &discount_uri, &customer, Some(json!({ "points": 200 })))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "unpriced quote");

        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/admin/quotes/{}/send", second.id),
            &admin,
            Some(json!({ "final_price": 1000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) =
            send(&app.router, "POST", &discount_uri, &customer, Some(json!({ "points": 900 })))
                .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) =
            send(&app.router, "POST", &discount_uri, &customer, Some(json!({ "points": 250 })))
                .await;
        assert_eq!(status, StatusCode::OK);
        let receipt: Value = parse(&body);
        assert_eq!(receipt["points_used"], json!(200));
        assert_eq!(receipt["remaining_points"], json!(50));
    }

    #[tokio::test]
    async fn customers_cannot_read_other_quotes() {
        let app = app();
        let quote = create(&app, &[("x-account-id", "acct-owner")]).await;

        let (status, _) = send(
            &app.router,
            "GET",
            &format!("/api/quotes/{}", quote.id),
            &[("x-account-id", "acct-someone-else")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app.router,
            "GET",
            &format!("/api/quotes/{}", quote.id),
            &[("x-account-id", "acct-owner")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn manual_booking_convert_and_delete() {
        let app = app();
        let admin = [("x-admin-key", ADMIN_KEY)];
        let mut body = quote_body();
        body["final_price"] = json!("2500");
        body["notes"] = json!("Phoned in");

        let (status, response) =
            send(&app.router, "POST", "/api/admin/bookings", &admin, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let booking: Quote = parse(&response);
        assert_eq!(booking.status, BookingStatus::Booked);
        assert_eq!(booking.final_price, Some(Decimal::from(2500)));

        let quote = create(&app, &[]).await;
        let (status, response) = send(
            &app.router,
            "POST",
            &format!("/api/admin/quotes/{}/convert", quote.id),
            &admin,
            Some(json!({ "final_price": 1900 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let converted: Quote = parse(&response);
        assert_eq!(converted.quote_status, QuoteStatus::Converted);

        let uri = format!("/api/admin/quotes/{}", quote.id);
        let (status, _) = send(&app.router, "DELETE", &uri, &admin, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app.router, "DELETE", &uri, &admin, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_status_filter_is_rejected() {
        let app = app();
        let (status, body) = send(
            &app.router,
            "GET",
            "/api/admin/quotes?status=teleported",
            &[("x-admin-key", ADMIN_KEY)],
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ApiError = parse(&body);
        assert!(error.message.contains("teleported"));
    }
}
