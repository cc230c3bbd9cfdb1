use super::*;
use axum::{body, body::Body, http::Request, response::Response};
use serde_json::{json, Value};
use shared::domain::WellKind;
use tower::ServiceExt;

const TEST_BODY_LIMIT: usize = 16 * 1024;

async fn test_app() -> (Router, Storage, WellId, Vec<StageId>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let api = ApiContext {
        storage: storage.clone(),
    };
    let well = create_well(
        &api,
        &NewWell {
            kind: WellKind::Onshore,
            team: "rig-4".into(),
            name: "W-http".into(),
            start_date: None,
            stages: ["26in", "20in", "13 3/8in"]
                .iter()
                .map(|name| NewStage {
                    stage_name: Some((*name).to_string()),
                    ..NewStage::default()
                })
                .collect(),
        },
    )
    .await
    .expect("well");
    let ids = list_stages(&api, well)
        .await
        .expect("stages")
        .into_iter()
        .map(|s| s.stage_id)
        .collect();

    let app = build_router(Arc::new(AppState { api }), TEST_BODY_LIMIT);
    (app, storage, well, ids)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn json_of(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn stored_order(storage: &Storage, well: WellId) -> Vec<StageId> {
    storage
        .list_stages(well)
        .await
        .expect("stages")
        .into_iter()
        .map(|s| s.stage_id)
        .collect()
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage, _well, _ids) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn reorder_route_acknowledges_and_persists() {
    let (app, storage, well, ids) = test_app().await;
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/operativo/wells/{well}/stages/reorder"),
            json!({ "order": [c.0, a.0, b.0] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_of(response).await, json!({ "ok": true }));

    let list = Request::get(format!("/api/operativo/wells/{well}/stages"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(list).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_of(response).await;
    assert_eq!(body["ok"], json!(true));
    let listed: Vec<i64> = body["data"]
        .as_array()
        .expect("data array")
        .iter()
        .map(|s| s["stage_id"].as_i64().expect("id"))
        .collect();
    assert_eq!(listed, vec![c.0, a.0, b.0]);
    let positions: Vec<i64> = body["data"]
        .as_array()
        .expect("data array")
        .iter()
        .map(|s| s["position"].as_i64().expect("position"))
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);
    assert_eq!(stored_order(&storage, well).await, vec![c, a, b]);
}

#[tokio::test]
async fn reorder_route_accepts_integer_strings() {
    let (app, storage, well, ids) = test_app().await;
    let response = app
        .oneshot(post_json(
            &format!("/api/operativo/wells/{well}/stages/reorder"),
            json!({ "order": [ids[2].to_string(), ids[1].to_string(), ids[0].to_string()] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stored_order(&storage, well).await, vec![ids[2], ids[1], ids[0]]);
}

#[tokio::test]
async fn duplicate_order_is_bad_request_with_envelope() {
    let (app, storage, well, ids) = test_app().await;
    let response = app
        .oneshot(post_json(
            &format!("/api/operativo/wells/{well}/stages/reorder"),
            json!({ "order": [ids[0].0, ids[0].0, ids[1].0] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_of(response).await;
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["code"], json!("validation"));
    assert!(body["error"].as_str().expect("message").contains("more than once"));
    assert_eq!(stored_order(&storage, well).await, ids);
}

#[tokio::test]
async fn missing_or_malformed_body_is_bad_request() {
    let (app, _storage, well, _ids) = test_app().await;
    let uri = format!("/api/operativo/wells/{well}/stages/reorder");

    let empty = app
        .clone()
        .oneshot(post_json(&uri, json!({})))
        .await
        .expect("response");
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let garbage = Request::post(uri.as_str())
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let response = app.oneshot(garbage).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_of(response).await["ok"], json!(false));
}

#[tokio::test]
async fn non_integer_well_id_is_bad_request() {
    let (app, _storage, _well, ids) = test_app().await;
    let response = app
        .oneshot(post_json(
            "/api/operativo/wells/abc/stages/reorder",
            json!({ "order": [ids[0].0] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stale_order_is_conflict_and_rolls_back() {
    let (app, storage, well, ids) = test_app().await;
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    let delete = Request::delete(format!("/api/operativo/stages/{b}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(delete).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post_json(
            &format!("/api/operativo/wells/{well}/stages/reorder"),
            json!({ "order": [c.0, a.0, b.0] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_of(response).await;
    assert_eq!(body["code"], json!("conflict"));

    let stages = storage.list_stages(well).await.expect("stages");
    let positions: Vec<_> = stages.iter().map(|s| (s.stage_id, s.position)).collect();
    assert_eq!(positions, vec![(a, 1), (c, 3)]);
}

#[tokio::test]
async fn unknown_well_is_not_found() {
    let (app, _storage, _well, ids) = test_app().await;
    let response = app
        .oneshot(post_json(
            "/api/operativo/wells/4242/stages/reorder",
            json!({ "order": [ids[0].0] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (app, _storage, well, _ids) = test_app().await;
    let huge: Vec<i64> = (1..=10_000).collect();
    let response = app
        .oneshot(post_json(
            &format!("/api/operativo/wells/{well}/stages/reorder"),
            json!({ "order": huge }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn stage_crud_routes_never_touch_other_positions() {
    let (app, storage, well, ids) = test_app().await;

    let create = post_json(
        &format!("/api/operativo/wells/{well}/stages"),
        json!({ "stage_name": "9 5/8in", "pipe": "P-110" }),
    );
    let response = app.clone().oneshot(create).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let created = json_of(response).await["id"].as_i64().expect("id");

    let update = Request::put(format!("/api/operativo/stages/{}", ids[0]))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "progress": "Completed", "position": 99 }).to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(update).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let stages = storage.list_stages(well).await.expect("stages");
    let positions: Vec<_> = stages.iter().map(|s| (s.stage_id.0, s.position)).collect();
    assert_eq!(
        positions,
        vec![(ids[0].0, 1), (ids[1].0, 2), (ids[2].0, 3), (created, 4)]
    );
    assert_eq!(stages[0].progress, "Completed");
}

#[tokio::test]
async fn well_routes_create_show_and_delete() {
    let (app, _storage, _well, _ids) = test_app().await;

    let create = post_json(
        "/api/operativo/wells",
        json!({
            "kind": "offshore",
            "team": "rig-8",
            "name": "W-new",
            "start_date": "2026-01-15",
            "stages": [{ "stage_name": "A" }, { "stage_name": "B" }]
        }),
    );
    let response = app.clone().oneshot(create).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let well_id = json_of(response).await["id"].as_i64().expect("id");

    let show = Request::get(format!("/api/operativo/wells/{well_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(show).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_of(response).await;
    assert_eq!(body["data"]["name"], json!("W-new"));
    assert_eq!(body["data"]["kind"], json!("offshore"));
    assert_eq!(body["data"]["stages"].as_array().expect("stages").len(), 2);

    let delete = Request::delete(format!("/api/operativo/wells/{well_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(delete).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let show_again = Request::get(format!("/api/operativo/wells/{well_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(show_again).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn datastore_failure_is_internal_error_without_detail() {
    let (app, storage, well, ids) = test_app().await;
    storage.pool().close().await;

    let response = app
        .oneshot(post_json(
            &format!("/api/operativo/wells/{well}/stages/reorder"),
            json!({ "order": [ids[1].0, ids[0].0, ids[2].0] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_of(response).await;
    assert_eq!(
        body,
        json!({
            "ok": false,
            "code": "internal",
            "error": server_api::REORDER_FAILED_MESSAGE
        })
    );
}
