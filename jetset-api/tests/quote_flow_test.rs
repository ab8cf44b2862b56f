use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jetset_api::{app, auth::StaffClaims, state::AuthConfig, AppState};
use jetset_booking::{
    DeadlineReaper, DispatchHandle, InMemoryEffectOutbox, InMemoryPaymentRepository,
    InMemoryQuoteRepository, QuoteLifecycle,
};
use jetset_catalog::InMemorySeatAllocator;
use jetset_core::{Clock, ManualClock};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-secret";

struct TestApp {
    router: Router,
    lifecycle: Arc<QuoteLifecycle>,
    clock: Arc<ManualClock>,
    staff_token: String,
}

fn token(role: &str) -> String {
    let claims = StaffClaims {
        sub: "ops-desk-1".into(),
        role: role.into(),
        exp: (Utc::now() + Duration::hours(2)).timestamp() as usize,
        iss: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn test_app() -> TestApp {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let outbox = Arc::new(InMemoryEffectOutbox::new());
    let lifecycle = Arc::new(QuoteLifecycle::new(
        Arc::new(InMemoryQuoteRepository::new(outbox.clone())),
        Arc::new(InMemoryPaymentRepository::new()),
        Arc::new(InMemorySeatAllocator::new()),
        DispatchHandle::new(outbox),
        clock.clone(),
    ));

    let state = AppState {
        lifecycle: lifecycle.clone(),
        auth: AuthConfig {
            secret: SECRET.into(),
            issuer: None,
        },
        rate_limiter: None,
    };

    TestApp {
        router: app(state),
        lifecycle,
        clock,
        staff_token: token("STAFF"),
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn staff(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(&self.staff_token), Some(body)).await
    }

    async fn publish_flight(&self, seats: u32) -> Uuid {
        let flight_id = Uuid::new_v4();
        let (status, _) = self
            .staff(
                &format!("/flights/{}/inventory", flight_id),
                json!({
                    "origin": "OMDB",
                    "destination": "LFMN",
                    "aircraft": "Challenger 350",
                    "departureAt": self.clock.now() + Duration::days(5),
                    "totalSeats": seats,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        flight_id
    }

    async fn available(&self, flight_id: Uuid) -> u64 {
        let (status, body) = self
            .call(Method::GET, &format!("/flights/{}/inventory", flight_id), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body["availableSeats"].as_u64().unwrap()
    }

    async fn book_empty_leg(&self, flight_id: Uuid, seats: u32) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/quotes/empty-leg",
            None,
            Some(json!({
                "emptyLegId": flight_id,
                "seatsRequested": seats,
                "contactInfo": {
                    "name": "Lena Fischer",
                    "email": "lena@example.com",
                    "phone": "+49 30 901820"
                }
            })),
        )
        .await
    }

    async fn version(&self, kind: &str, quote_id: &str) -> u64 {
        let (status, body) = self
            .call(Method::GET, &format!("/quotes/{}/{}", kind, quote_id), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body["version"].as_u64().unwrap()
    }

    fn approval(&self, version: u64) -> Value {
        json!({
            "totalPriceUsd": "24500.00",
            "paymentDeadline": self.clock.now() + Duration::hours(24),
            "bankDetails": {
                "accountName": "Jetset Aviation LLC",
                "bankName": "Emirates NBD",
                "accountNumber": "1015550001"
            },
            "expectedVersion": version
        })
    }

    async fn approve(&self, kind: &str, quote_id: &str) -> (StatusCode, Value) {
        let version = self.version(kind, quote_id).await;
        self.staff(&format!("/quotes/{}/{}/approve", kind, quote_id), self.approval(version))
            .await
    }
}

fn quote_id(body: &Value) -> String {
    body["quoteId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_full_empty_leg_booking_keeps_seats_committed() {
    let app = test_app();
    let flight_id = app.publish_flight(4).await;

    let (status, body) = app.book_empty_leg(flight_id, 4).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["referenceNumber"].as_str().unwrap().starts_with("EL-"));
    let id = quote_id(&body);
    assert_eq!(app.available(flight_id).await, 0);

    let (status, quote) = app.approve("empty-leg", &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["status"], "APPROVED");

    let (status, payment) = app
        .call(
            Method::POST,
            "/payments/webhook",
            None,
            Some(json!({
                "quoteId": id,
                "transactionRef": "txn_8842",
                "amountUsd": "24500.00",
                "status": "SUCCESS"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "SUCCESS");

    let version = quote["version"].as_u64().unwrap();
    let (status, quote) = app
        .staff(
            &format!("/quotes/empty-leg/{}/confirm-payment", id),
            json!({ "expectedVersion": version }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["status"], "PAID");
    assert_eq!(app.available(flight_id).await, 0);

    let (status, audit) = app
        .call(
            Method::GET,
            &format!("/flights/{}/inventory/audit", flight_id),
            Some(&app.staff_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit["consistent"], true);
}

#[tokio::test]
async fn test_overbooking_is_rejected_with_conflict() {
    let app = test_app();
    let flight_id = app.publish_flight(2).await;

    let (status, _) = app.book_empty_leg(flight_id, 2).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.book_empty_leg(flight_id, 1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVENTORY_UNAVAILABLE");
    assert_eq!(app.available(flight_id).await, 0);
}

#[tokio::test]
async fn test_unknown_flight_is_not_found() {
    let app = test_app();
    let (status, body) = app.book_empty_leg(Uuid::new_v4(), 1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_flights_are_listed_with_their_counters() {
    let app = test_app();
    let flight_id = app.publish_flight(6).await;
    app.book_empty_leg(flight_id, 2).await;

    let (status, body) = app.call(Method::GET, "/flights", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let flights = body.as_array().unwrap();
    assert_eq!(flights.len(), 1);
    assert_eq!(flights[0]["flightId"], flight_id.to_string());
    assert_eq!(flights[0]["availableSeats"], 4);
}

#[tokio::test]
async fn test_reject_pending_returns_seats() {
    let app = test_app();
    let flight_id = app.publish_flight(4).await;
    let (_, body) = app.book_empty_leg(flight_id, 2).await;
    let id = quote_id(&body);
    assert_eq!(app.available(flight_id).await, 2);

    let version = app.version("empty-leg", &id).await;
    let (status, quote) = app
        .staff(
            &format!("/quotes/empty-leg/{}/reject", id),
            json!({ "rejectionReason": "AIRCRAFT_UNAVAILABLE", "expectedVersion": version }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["status"], "REJECTED");
    assert_eq!(app.available(flight_id).await, 4);

    // Terminal: approving now looks exactly like a stale write.
    let (status, body) = app.approve("empty-leg", &id).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STATE_CONFLICT");
}

#[tokio::test]
async fn test_reject_with_unknown_reason_is_bad_request() {
    let app = test_app();
    let flight_id = app.publish_flight(4).await;
    let (_, body) = app.book_empty_leg(flight_id, 1).await;
    let id = quote_id(&body);

    let (status, body) = app
        .staff(
            &format!("/quotes/empty-leg/{}/reject", id),
            json!({ "rejectionReason": "WEATHER", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(app.available(flight_id).await, 3);
}

#[tokio::test]
async fn test_stale_version_asks_to_refresh() {
    let app = test_app();
    let flight_id = app.publish_flight(4).await;
    let (_, body) = app.book_empty_leg(flight_id, 1).await;
    let id = quote_id(&body);

    let version = app.version("empty-leg", &id).await;
    let (status, body) = app
        .staff(&format!("/quotes/empty-leg/{}/approve", id), app.approval(version + 7))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STATE_CONFLICT");
    assert!(body["error"].as_str().unwrap().contains("refresh and retry"));
}

#[tokio::test]
async fn test_resend_preserves_inventory() {
    let app = test_app();
    let flight_id = app.publish_flight(4).await;
    let (_, body) = app.book_empty_leg(flight_id, 3).await;
    let id = quote_id(&body);
    let (_, quote) = app.approve("empty-leg", &id).await;

    let (status, resent) = app
        .staff(
            &format!("/quotes/empty-leg/{}/resend", id),
            json!({ "totalPriceUsd": 21000, "expectedVersion": quote["version"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resent["status"], "APPROVED");
    assert_eq!(resent["paymentDeadline"], quote["paymentDeadline"]);
    assert_eq!(app.available(flight_id).await, 1);
}

#[tokio::test]
async fn test_confirm_payment_guards() {
    let app = test_app();
    let flight_id = app.publish_flight(4).await;
    let (_, body) = app.book_empty_leg(flight_id, 1).await;
    let id = quote_id(&body);
    let uri = format!("/quotes/empty-leg/{}/confirm-payment", id);

    let version = app.version("empty-leg", &id).await;
    let (status, body) = app.staff(&uri, json!({ "expectedVersion": version })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STATE_CONFLICT");

    let (_, quote) = app.approve("empty-leg", &id).await;
    let (status, body) = app.staff(&uri, json!({ "expectedVersion": quote["version"] })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PAYMENT_MISSING");
}

#[tokio::test]
async fn test_charter_receipt_enables_confirmation() {
    let app = test_app();
    let (status, body) = app
        .call(
            Method::POST,
            "/quotes/charter",
            None,
            Some(json!({
                "origin": "EGLF",
                "destination": "LSGG",
                "passengers": 6,
                "departureDateTime": app.clock.now() + Duration::days(10),
                "contactInfo": { "name": "Tom Hale", "email": "tom@example.com" }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["referenceNumber"].as_str().unwrap().starts_with("CH-"));
    let id = quote_id(&body);

    let (status, _) = app.approve("charter", &id).await;
    assert_eq!(status, StatusCode::OK);

    let (status, quote) = app
        .call(
            Method::POST,
            &format!("/quotes/charter/{}/receipt", id),
            None,
            Some(json!({ "receiptRef": "uploads/receipt-1182.pdf" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, quote) = app
        .staff(
            &format!("/quotes/charter/{}/confirm-payment", id),
            json!({ "expectedVersion": quote["version"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["status"], "PAID");

    let (status, quote) = app
        .staff(
            &format!("/quotes/charter/{}/complete", id),
            json!({ "expectedVersion": quote["version"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["status"], "COMPLETED");
}

#[tokio::test]
async fn test_reaper_expires_after_deadline() {
    let app = test_app();
    let flight_id = app.publish_flight(4).await;
    let (_, body) = app.book_empty_leg(flight_id, 4).await;
    let id = quote_id(&body);
    app.approve("empty-leg", &id).await;
    assert_eq!(app.available(flight_id).await, 0);

    app.clock.advance(Duration::hours(25));
    let reaper = DeadlineReaper::new(app.lifecycle.clone(), std::time::Duration::from_secs(60));
    let report = reaper.sweep_once().await.unwrap();
    assert_eq!(report.expired, 1);

    let (_, quote) = app
        .call(Method::GET, &format!("/quotes/empty-leg/{}", id), None, None)
        .await;
    assert_eq!(quote["status"], "EXPIRED");
    assert_eq!(app.available(flight_id).await, 4);
}

#[tokio::test]
async fn test_webhook_replay_returns_same_payment() {
    let app = test_app();
    let flight_id = app.publish_flight(2).await;
    let (_, body) = app.book_empty_leg(flight_id, 1).await;
    let id = quote_id(&body);
    app.approve("empty-leg", &id).await;

    let callback = json!({
        "quoteId": id,
        "transactionRef": "txn_replay",
        "amountUsd": 24500,
        "status": "SUCCESS"
    });
    let (_, first) = app.call(Method::POST, "/payments/webhook", None, Some(callback.clone())).await;
    let (status, second) = app.call(Method::POST, "/payments/webhook", None, Some(callback)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
}

#[tokio::test]
async fn test_lookup_and_kind_mismatch() {
    let app = test_app();
    let flight_id = app.publish_flight(2).await;
    let (_, body) = app.book_empty_leg(flight_id, 1).await;
    let id = quote_id(&body);
    let reference = body["referenceNumber"].as_str().unwrap().to_string();

    let (status, quote) = app
        .call(Method::GET, &format!("/quotes/by-reference/{}", reference), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["id"], id.as_str());

    let (status, _) = app
        .call(Method::GET, &format!("/quotes/charter/{}", id), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_staff_endpoints_require_token() {
    let app = test_app();
    let flight_id = app.publish_flight(2).await;
    let (_, body) = app.book_empty_leg(flight_id, 1).await;
    let id = quote_id(&body);
    let uri = format!("/quotes/empty-leg/{}/approve", id);

    let (status, body) = app.call(Method::POST, &uri, None, Some(app.approval(1))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let client = token("CUSTOMER");
    let (status, _) = app.call(Method::POST, &uri, Some(&client), Some(app.approval(1))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = test_app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/quotes/empty-leg")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"emptyLegId\": "))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deliveries_are_queued_on_approval() {
    let app = test_app();
    let flight_id = app.publish_flight(2).await;
    let (_, body) = app.book_empty_leg(flight_id, 1).await;
    let id = quote_id(&body);
    app.approve("empty-leg", &id).await;

    let (status, deliveries) = app
        .call(
            Method::GET,
            &format!("/quotes/empty-leg/{}/deliveries", id),
            Some(&app.staff_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = deliveries
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["QUOTE_CONFIRMATION"]);
}
