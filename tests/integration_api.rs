//! Integration tests for the REST API feature against a live engine.

#![cfg(feature = "api")]

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

use ev_cms::api::{AppState, router};
use ev_cms::config::ScenarioConfig;
use ev_cms::listeners::Intake;
use ev_cms::sim::engine::Engine;
use ev_cms::sim::roster::Roster;
use ev_cms::sim::scheduler::ArrivalQueue;
use ev_cms::sim::station::Station;
use ev_cms::sim::types::{ChargeMode, EngineParams, RESERVED_STATION};

fn build() -> (Engine, Arc<AppState>) {
    let cfg = ScenarioConfig::baseline();
    let params = EngineParams::from_config(&cfg);
    let roster = Roster::new(Station::pool(2, 13.5, 1.0));
    let arrivals = ArrivalQueue::new(vec![common::arrival("ds1", 0.0, 9_000.0, 50.0)]);
    let engine = Engine::new(params.clone(), roster, vec![60.0; 40], arrivals);
    let intake = Intake::new(engine.state(), engine.charger(), &cfg.battery_classes, params.clone());
    let state = Arc::new(AppState {
        engine: engine.state(),
        intake,
        params,
    });
    (engine, state)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn status_reflects_running_engine() {
    let (mut engine, state) = build();
    for _ in 0..5 {
        engine.step();
    }

    let req = Request::builder().uri("/status").body(Body::empty()).unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["tick_time"], 8.0);
    assert_eq!(json["stations"]["0"], "empty");
    assert_eq!(json["stations"]["1"]["id"], "ds1");
    assert_eq!(json["stations"]["2"], "empty");
    assert_eq!(json["totals"]["vehicles"], 1);
    assert_eq!(json["finished"], false);
}

#[tokio::test]
async fn posted_arrival_charges_on_the_hardware_slot() {
    let (mut engine, state) = build();
    engine.step();

    let req = Request::builder()
        .method("POST")
        .uri("/arrivals")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"type":"arrival","id":"hw1","battery_class":"Nissan Leaf","desired_soc_delta_pct":30,"deadline":5000,"sleep_mode":false}"#,
        ))
        .unwrap();
    let resp = router(Arc::clone(&state)).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // the next control pass gives it a priority, the tick after that a current
    while engine.step().is_some_and(|r| r.tick < 31) {}
    {
        let roster = state.engine.lock();
        let hw = roster.occupant(RESERVED_STATION).expect("hardware vehicle");
        assert_eq!(hw.mode, ChargeMode::HardwareBacked);
        assert!(hw.priority > 0.0);
        assert!(hw.assigned_current >= hw.min_current);
    }

    let req = Request::builder()
        .method("POST")
        .uri("/arrivals")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"type":"disconnect","id":"hw1"}"#))
        .unwrap();
    let resp = router(Arc::clone(&state)).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["final_soc"]["vehicle_id"], "hw1");
    assert!(state.engine.lock().occupant(RESERVED_STATION).is_none());

    let summary = engine.finish();
    assert_eq!(summary.departures.len(), 1);
}

#[tokio::test]
async fn finished_engine_refuses_arrivals() {
    let (engine, state) = build();
    engine.finish();

    let req = Request::builder()
        .method("POST")
        .uri("/arrivals")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"type":"arrival","id":"hw1","battery_class":"nissan leaf","desired_soc_delta_pct":30,"deadline":5000}"#,
        ))
        .unwrap();
    let resp = router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
