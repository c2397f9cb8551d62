use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::tempdir;
use tower::ServiceExt;
use urlencoding::encode;

use clob_exchange::{api::router, market::Market, state::AppState};

fn test_app() -> (Router, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let (state, _transfers_rx) =
        AppState::new([Market::new("ETH").unwrap()], dir.path()).unwrap();
    (router(state), dir)
}

async fn body_json(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn send(app: &Router, method: &str, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

fn limit_order(bid: bool, size: f64, price: f64, user_id: i64) -> Value {
    json!({
        "Type": "LIMIT",
        "Bid": bid,
        "Size": size,
        "Price": price,
        "Market": "ETH",
        "UserID": user_id
    })
}

fn market_order(bid: bool, size: f64, user_id: i64) -> Value {
    json!({
        "Type": "MARKET",
        "Bid": bid,
        "Size": size,
        "Market": "ETH",
        "UserID": user_id
    })
}

async fn place(app: &Router, body: Value) -> i64 {
    let res = send_json(app, "POST", "/order", body).await;
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["OrderID"].as_i64().unwrap()
}

#[tokio::test]
async fn limit_orders_rest_and_show_in_the_book() {
    let (app, _tmp) = test_app();

    place(&app, limit_order(false, 100.0, 10_000.0, 8)).await;
    place(&app, limit_order(false, 100.0, 9_000.0, 8)).await;
    place(&app, limit_order(true, 2_000.0, 9_000.0, 9)).await;

    let res = send(&app, "GET", "/book/ETH").await;
    assert_eq!(res.status(), StatusCode::OK);
    let book = body_json(res).await;
    assert_eq!(book["TotalAskVolume"].as_f64(), Some(200.0));
    assert_eq!(book["TotalBidVolume"].as_f64(), Some(2_000.0));
    assert_eq!(book["Asks"].as_array().unwrap().len(), 2);
    assert_eq!(book["Bids"].as_array().unwrap().len(), 1);
    // asks come back best (lowest) first, priced at the limit's level
    assert_eq!(book["Asks"][0]["Price"].as_f64(), Some(9_000.0));
    assert_eq!(book["Asks"][0]["UserID"].as_i64(), Some(8));
    assert_eq!(book["Asks"][0]["Bid"].as_bool(), Some(false));
}

#[tokio::test]
async fn market_order_consumes_resting_liquidity() {
    let (app, _tmp) = test_app();
    place(&app, limit_order(false, 20.0, 10_000.0, 8)).await;

    let res = send_json(&app, "POST", "/order", market_order(true, 10.0, 9)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_json(res).await["OrderID"].as_i64().unwrap() > 0);

    let book = body_json(send(&app, "GET", "/book/ETH").await).await;
    assert_eq!(book["TotalAskVolume"].as_f64(), Some(10.0));
    assert_eq!(book["Asks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn market_order_exceeding_liquidity_is_rejected_without_effect() {
    let (app, _tmp) = test_app();
    place(&app, limit_order(false, 15.0, 10_000.0, 8)).await;

    let res = send_json(&app, "POST", "/order", market_order(true, 100.0, 9)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = body_json(res).await;
    assert!(body["msg"].as_str().unwrap().contains("insufficient liquidity"));

    let book = body_json(send(&app, "GET", "/book/ETH").await).await;
    assert_eq!(book["TotalAskVolume"].as_f64(), Some(15.0));
}

#[tokio::test]
async fn best_prices_are_400_on_an_empty_book() {
    let (app, _tmp) = test_app();

    let res = send(&app, "GET", "/book/ETH/bestbid").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(res).await["msg"].as_str().is_some());

    place(&app, limit_order(true, 1.0, 48.0, 7)).await;
    place(&app, limit_order(false, 1.0, 52.0, 7)).await;

    let res = send(&app, "GET", "/book/ETH/bestbid").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["Price"].as_f64(), Some(48.0));

    let res = send(&app, "GET", "/book/ETH/bestask").await;
    assert_eq!(body_json(res).await["Price"].as_f64(), Some(52.0));
}

#[tokio::test]
async fn cancel_removes_the_order_and_unknown_ids_are_404() {
    let (app, _tmp) = test_app();
    let order_id = place(&app, limit_order(true, 20.0, 10_000.0, 7)).await;

    let book = body_json(send(&app, "GET", "/book/ETH").await).await;
    assert_eq!(book["TotalBidVolume"].as_f64(), Some(20.0));

    let res = send(&app, "DELETE", &format!("/order/{order_id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["id"].as_i64(), Some(order_id));

    let book = body_json(send(&app, "GET", "/book/ETH").await).await;
    assert_eq!(book["TotalBidVolume"].as_f64(), Some(0.0));

    let res = send(&app, "DELETE", &format!("/order/{order_id}")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_orders_list_only_that_users_resting_orders() {
    let (app, _tmp) = test_app();
    place(&app, limit_order(true, 5.0, 48.0, 7)).await;
    place(&app, limit_order(false, 3.0, 52.0, 7)).await;
    place(&app, limit_order(true, 9.0, 47.0, 8)).await;

    let res = send(&app, "GET", "/order/7").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["Bids"].as_array().unwrap().len(), 1);
    assert_eq!(body["Asks"].as_array().unwrap().len(), 1);
    assert_eq!(body["Bids"][0]["Price"].as_f64(), Some(48.0));
    assert_eq!(body["Asks"][0]["Size"].as_f64(), Some(3.0));

    let body = body_json(send(&app, "GET", "/order/99").await).await;
    assert!(body["Bids"].as_array().unwrap().is_empty());
    assert!(body["Asks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_market_and_malformed_bodies_are_400() {
    let (app, _tmp) = test_app();

    let res = send(&app, "GET", "/book/DOGE").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(res).await["msg"].as_str().unwrap().contains("market not found"));

    let res = send(&app, "GET", "/book/ETH-USD").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // unknown order type
    let res = send_json(
        &app,
        "POST",
        "/order",
        json!({"Type": "STOP", "Bid": true, "Size": 1.0, "Market": "ETH", "UserID": 1}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // not JSON at all
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/order")
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // limit order without a price
    let res = send_json(
        &app,
        "POST",
        "/order",
        json!({"Type": "LIMIT", "Bid": true, "Size": 1.0, "Market": "ETH", "UserID": 1}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(res).await["msg"].as_str().unwrap().contains("price"));

    // zero size
    let res = send_json(&app, "POST", "/order", limit_order(true, 0.0, 48.0, 1)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn trades_endpoint_records_fills_and_paginates() {
    let (app, _tmp) = test_app();
    place(&app, limit_order(false, 3.0, 52.0, 8)).await;
    for _ in 0..2 {
        let res = send_json(&app, "POST", "/order", market_order(true, 1.0, 9)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = send(&app, "GET", "/trades/ETH?limit=1").await;
    assert_eq!(res.status(), StatusCode::OK);
    let page1 = body_json(res).await;
    assert_eq!(page1["Trades"].as_array().unwrap().len(), 1);
    assert_eq!(page1["Trades"][0]["Price"].as_f64(), Some(52.0));
    assert_eq!(page1["Trades"][0]["Size"].as_f64(), Some(1.0));
    assert_eq!(page1["Trades"][0]["AskUserID"].as_i64(), Some(8));
    assert_eq!(page1["Trades"][0]["BidUserID"].as_i64(), Some(9));
    let next = page1["Next"].as_str().unwrap();

    let res = send(&app, "GET", &format!("/trades/ETH?limit=1&after={}", encode(next))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let page2 = body_json(res).await;
    assert_eq!(page2["Trades"].as_array().unwrap().len(), 1);
    assert!(page2["Next"].is_null());

    let res = send(&app, "GET", "/trades/ETH?after=garbage").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
