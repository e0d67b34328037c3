use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tower::ServiceExt;
use urlencoding::encode;

use exchange_engine::{
    api::{EFFECTIVE_DEPTH_HEADER, OWNER_HEADER, router},
    state::AppState,
};

fn test_app() -> Router {
    router(AppState::default())
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header(OWNER_HEADER, user);
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, value)
}

fn dec_of(v: &Value) -> Decimal {
    match v {
        Value::String(s) => s.parse().unwrap(),
        Value::Number(n) => n.to_string().parse().unwrap(),
        other => panic!("not a decimal: {other}"),
    }
}

async fn fund(app: &Router, user: &str, asset: &str, amount: &str) {
    let (status, _, tx) = send(
        app,
        "POST",
        "/api/wallet/deposit",
        Some(user),
        Some(json!({ "asset": asset, "amount": amount, "network": "internal" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["status"], "pending");

    let uri = format!("/api/wallet/transactions/{}/status", tx["id"].as_str().unwrap());
    let (status, _, tx) = send(app, "PUT", &uri, None, Some(json!({ "status": "completed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["status"], "completed");
}

async fn balance(app: &Router, user: &str, asset: &str) -> (Decimal, Decimal) {
    let (status, _, b) = send(
        app,
        "GET",
        &format!("/api/wallet/balance/{}", asset),
        Some(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (dec_of(&b["available"]), dec_of(&b["locked"]))
}

fn limit_buy(amount: &str, price: &str) -> Value {
    json!({
        "pair": "BTC/USDT",
        "side": "buy",
        "type": "limit",
        "amount": amount,
        "price": price,
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app();
    let (status, _, v) = send(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "OK");
}

#[tokio::test]
async fn place_locks_quote_and_cancel_restores_it() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;

    let (status, _, order) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(limit_buy("0.01", "50000")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "open");
    assert_eq!(order["pair"], "BTC/USDT");
    assert_eq!(dec_of(&order["remaining"]), dec!(0.01));
    assert_eq!(dec_of(&order["filled"]), dec!(0));
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(500), dec!(500)));

    let uri = format!("/api/trading/orders/{}", order["id"].as_str().unwrap());
    let (status, _, cancelled) = send(&app, "DELETE", &uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert!(cancelled["cancelled_at"].is_string());
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(1000), dec!(0)));
}

#[tokio::test]
async fn numeric_json_amounts_are_accepted() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;
    let (status, _, order) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(json!({ "pair": "BTC/USDT", "side": "buy", "kind": "limit", "amount": 2, "price": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dec_of(&order["amount"]), dec!(2));
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(800), dec!(200)));
}

#[tokio::test]
async fn negative_amount_is_rejected_and_wallet_unchanged() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;

    let (status, _, v) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(limit_buy("-1", "50000")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"].as_str().unwrap().contains("amount"));
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(1000), dec!(0)));

    let (_, _, list) = send(&app, "GET", "/api/trading/orders", Some("u1"), None).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn insufficient_balance_is_a_bad_request() {
    let app = test_app();
    fund(&app, "u1", "USDT", "500").await;

    let (status, _, v) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(limit_buy("0.012", "50000")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let msg = v["error"].as_str().unwrap();
    assert!(msg.contains("insufficient USDT balance"), "{msg}");
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(500), dec!(0)));
}

#[tokio::test]
async fn cancel_error_statuses() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;
    let (_, _, order) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(limit_buy("0.01", "50000")),
    )
    .await;
    let uri = format!("/api/trading/orders/{}", order["id"].as_str().unwrap());

    let (status, _, _) = send(&app, "DELETE", "/api/trading/orders/nope", Some("u1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "DELETE", &uri, Some("u2"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = send(&app, "GET", &uri, Some("u2"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(&app, "DELETE", &uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, v) = send(&app, "DELETE", &uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"].as_str().unwrap().contains("cancel"));
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(1000), dec!(0)));
}

#[tokio::test]
async fn owner_header_is_required() {
    let app = test_app();
    let (status, _, v) = send(
        &app,
        "POST",
        "/api/trading/orders",
        None,
        Some(limit_buy("0.01", "50000")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(v["error"].as_str().unwrap().contains(OWNER_HEADER));

    let (status, _, _) = send(&app, "GET", "/api/wallet/balances", Some("  "), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let app = test_app();

    let req = Request::builder()
        .method("POST")
        .uri("/api/trading/orders")
        .header(OWNER_HEADER, "u1")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method("POST")
        .uri("/api/trading/orders")
        .header(OWNER_HEADER, "u1")
        .body(Body::from(limit_buy("1", "1").to_string()))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let (status, _, v) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(json!({ "pair": "BTC/USDT", "side": "hold", "type": "limit", "amount": "1", "price": "1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"].is_string());
}

#[tokio::test]
async fn order_book_levels_and_effective_depth() {
    let app = test_app();
    fund(&app, "u1", "USDT", "100000").await;
    fund(&app, "u2", "BTC", "5").await;

    for (amount, price) in [("0.1", "49000"), ("0.2", "50000"), ("0.3", "50000")] {
        let (status, _, _) = send(
            &app,
            "POST",
            "/api/trading/orders",
            Some("u1"),
            Some(limit_buy(amount, price)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _, _) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u2"),
        Some(json!({ "pair": "BTC/USDT", "side": "sell", "type": "limit", "amount": "1", "price": "51000" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, book) =
        send(&app, "GET", "/api/trading/orderbook/BTC-USDT?depth=5000", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(EFFECTIVE_DEPTH_HEADER).unwrap(), "100");
    assert_eq!(book["pair"], "BTC/USDT");

    let bids = book["bids"].as_array().unwrap();
    assert_eq!(bids.len(), 2);
    assert_eq!(dec_of(&bids[0]["price"]), dec!(50000));
    assert_eq!(dec_of(&bids[0]["amount"]), dec!(0.5));
    assert_eq!(bids[0]["orders"], 2);
    assert_eq!(dec_of(&bids[1]["price"]), dec!(49000));
    let asks = book["asks"].as_array().unwrap();
    assert_eq!(dec_of(&asks[0]["price"]), dec!(51000));

    let (_, headers, book) =
        send(&app, "GET", "/api/trading/orderbook/BTC-USDT?depth=1", None, None).await;
    assert_eq!(headers.get(EFFECTIVE_DEPTH_HEADER).unwrap(), "1");
    assert_eq!(book["bids"].as_array().unwrap().len(), 1);

    let (status, _, _) = send(&app, "GET", "/api/trading/orderbook/BTCUSDT", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn orders_listing_paginates_forward() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;
    for price in ["10", "20", "30"] {
        send(
            &app,
            "POST",
            "/api/trading/orders",
            Some("u1"),
            Some(limit_buy("1", price)),
        )
        .await;
    }

    let (status, _, page1) =
        send(&app, "GET", "/api/trading/orders?limit=2", Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page1["orders"].as_array().unwrap().len(), 2);
    assert_eq!(dec_of(&page1["orders"][0]["price"]), dec!(10));
    let next = page1["next"].as_str().unwrap();

    let (status, _, page2) = send(
        &app,
        "GET",
        &format!("/api/trading/orders?limit=2&after={}", encode(next)),
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let orders = page2["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(dec_of(&orders[0]["price"]), dec!(30));
    assert!(page2["next"].is_null());

    let (status, _, _) = send(
        &app,
        "GET",
        "/api/trading/orders?after=not-a-cursor",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, _, other) = send(&app, "GET", "/api/trading/orders", Some("u2"), None).await;
    assert_eq!(other["total"], 0);
}

#[tokio::test]
async fn fill_settles_and_shows_in_history_and_stats() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;
    let (_, _, order) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(limit_buy("0.01", "50000")),
    )
    .await;
    let fill_uri = format!("/api/trading/orders/{}/fill", order["id"].as_str().unwrap());

    let (status, _, partial) =
        send(&app, "POST", &fill_uri, None, Some(json!({ "amount": "0.004" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(partial["status"], "partial");
    assert_eq!(dec_of(&partial["remaining"]), dec!(0.006));

    let (status, _, _) =
        send(&app, "POST", &fill_uri, None, Some(json!({ "amount": "1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, done) = send(
        &app,
        "POST",
        &fill_uri,
        None,
        Some(json!({ "amount": "0.006", "price": "45000" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "filled");
    assert!(done["filled_at"].is_string());

    // 200 + 270 spent, 30 refunded from price improvement
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(530), dec!(0)));
    assert_eq!(balance(&app, "u1", "BTC").await, (dec!(0.01), dec!(0)));

    let (_, _, history) = send(&app, "GET", "/api/trading/history", Some("u1"), None).await;
    assert_eq!(history["total"], 1);
    assert_eq!(history["trades"][0]["id"], order["id"]);

    let (status, _, stats) = send(&app, "GET", "/api/trading/stats/BTC-USDT", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_orders"], 1);
    assert_eq!(stats["filled_orders"], 1);
    assert_eq!(dec_of(&stats["total_volume"]), dec!(500));

    let (_, _, book) = send(&app, "GET", "/api/trading/orderbook/BTC-USDT", None, None).await;
    assert!(book["bids"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn withdrawal_lifecycle_over_http() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;

    let (status, _, tx) = send(
        &app,
        "POST",
        "/api/wallet/withdraw",
        Some("u1"),
        Some(json!({
            "asset": "USDT",
            "amount": "400",
            "address": "TXyz1234567890abc",
            "network": "TRC20",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["kind"], "withdraw");
    assert!(tx["tx_hash"].as_str().unwrap().starts_with("wit_"));
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(600), dec!(400)));

    let tx_uri = format!("/api/wallet/transactions/{}", tx["id"].as_str().unwrap());
    let (status, _, _) = send(&app, "GET", &tx_uri, Some("u2"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, done) = send(
        &app,
        "PUT",
        &format!("{}/status", tx_uri),
        None,
        Some(json!({ "status": "completed", "tx_hash": "0xfeed", "confirmations": 20 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["tx_hash"], "0xfeed");
    assert_eq!(done["confirmations"], 20);
    assert_eq!(balance(&app, "u1", "USDT").await, (dec!(600), dec!(0)));

    let (status, _, _) = send(
        &app,
        "PUT",
        &format!("{}/status", tx_uri),
        None,
        Some(json!({ "status": "failed" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, _, list) = send(
        &app,
        "GET",
        "/api/wallet/transactions?kind=withdraw",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(list["total"], 1);

    let (_, _, wallet) = send(&app, "GET", "/api/wallet/balances", Some("u1"), None).await;
    assert_eq!(wallet["owner"], "u1");
    assert_eq!(dec_of(&wallet["balances"]["USDT"]["available"]), dec!(600));
}

#[tokio::test]
async fn oversized_deposit_is_rejected_and_service_keeps_answering() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;

    for _ in 0..2 {
        let (status, _, v) = send(
            &app,
            "POST",
            "/api/wallet/deposit",
            Some("u1"),
            Some(json!({
                "asset": "USDT",
                "amount": "70000000000000000000000000000",
                "network": "internal",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(v["error"].as_str().unwrap().contains("maximum"));
    }

    let (status, _, v) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(limit_buy("0.01", "7000000000000000")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"].as_str().unwrap().contains("price"));

    let (status, _, wallet) = send(&app, "GET", "/api/wallet/balances", Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec_of(&wallet["balances"]["USDT"]["available"]), dec!(1000));
    let (_, _, txs) = send(&app, "GET", "/api/wallet/transactions", Some("u1"), None).await;
    assert_eq!(txs["total"], 1);
}

#[tokio::test]
async fn recent_trades_list_fills_newest_first() {
    let app = test_app();
    fund(&app, "u1", "USDT", "1000").await;
    let (_, _, order) = send(
        &app,
        "POST",
        "/api/trading/orders",
        Some("u1"),
        Some(limit_buy("0.01", "50000")),
    )
    .await;
    let fill_uri = format!("/api/trading/orders/{}/fill", order["id"].as_str().unwrap());
    send(&app, "POST", &fill_uri, None, Some(json!({ "amount": "0.004", "price": "49900" }))).await;
    send(&app, "POST", &fill_uri, None, Some(json!({ "amount": "0.006" }))).await;

    let (status, headers, v) =
        send(&app, "GET", "/api/trading/trades/BTC-USDT?limit=5000", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-effective-limit").unwrap(), "1000");
    assert_eq!(v["pair"], "BTC/USDT");
    let trades = v["trades"].as_array().unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(dec_of(&trades[0]["price"]), dec!(50000));
    assert_eq!(dec_of(&trades[1]["price"]), dec!(49900));
    assert_eq!(dec_of(&trades[1]["value"]), dec!(199.6));
    assert_eq!(trades[0]["side"], "buy");
    assert!(trades[0].get("owner").is_none());

    let (_, headers, v) =
        send(&app, "GET", "/api/trading/trades/BTC-USDT?limit=1", None, None).await;
    assert_eq!(headers.get("x-effective-limit").unwrap(), "1");
    assert_eq!(v["trades"].as_array().unwrap().len(), 1);

    let (status, _, _) = send(&app, "GET", "/api/trading/trades/BTC", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
