use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use orchestrator::{GatewayConfig, InferenceGateway, OllamaGateway, ScriptedGateway};
use serde_json::{json, Value};
use server::config::{ServerConfig, StorageConfig};
use server::{create_router, state::AppState};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestApp {
    server: TestServer,
    _dir: TempDir,
}

async fn setup_with_gateway(gateway: Arc<dyn InferenceGateway>) -> TestApp {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = ServerConfig {
        storage: StorageConfig {
            data_dir: Some(dir.path().to_path_buf()),
            database_url: None,
        },
        ..Default::default()
    };

    let pool = db::connect(&config.database_url())
        .await
        .expect("Failed to open database");
    let state = AppState::new(pool, &config, gateway);
    state
        .seed_personas(&config)
        .await
        .expect("Failed to seed personas");

    let server = TestServer::new(create_router(state)).expect("Failed to create test server");
    TestApp { server, _dir: dir }
}

async fn setup_test_server() -> TestApp {
    setup_with_gateway(Arc::new(ScriptedGateway::new())).await
}

async fn start_session(server: &TestServer, body: Value) -> String {
    let response = server.post("/api/sessions").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    body["session_id"].as_str().unwrap().to_string()
}

/// `(id, event)` pairs of an SSE body, in order.
fn sse_events(text: &str) -> Vec<(u64, String)> {
    let mut events = Vec::new();
    let mut id = None;
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("id:") {
            id = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("event:") {
            events.push((id.take().unwrap_or(0), value.trim().to_string()));
        }
    }
    events
}

fn kinds(events: &[(u64, String)]) -> Vec<&str> {
    events.iter().map(|(_, kind)| kind.as_str()).collect()
}

async fn run(server: &TestServer, id: &str, route: &str) -> Vec<(u64, String)> {
    let response = server.get(&format!("/api/sessions/{}/{}", id, route)).await;
    response.assert_status_ok();
    sse_events(&response.text())
}

mod health {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = setup_test_server().await;

        let response = app.server.get("/health").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn test_openapi_document_lists_council_routes() {
        let app = setup_test_server().await;

        let response = app.server.get("/api/openapi.json").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["paths"]["/api/sessions/{id}/vote"].is_object());
        assert!(body["paths"]["/api/sessions/{id}/run"].is_object());
    }

    #[tokio::test]
    async fn test_personas_are_seeded() {
        let app = setup_test_server().await;

        let response = app.server.get("/api/personas").await;

        response.assert_status_ok();
        let body: Value = response.json();
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"skeptic"));
        assert!(ids.contains(&"pragmatist"));
    }
}

mod session_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_start_echoes_configuration() {
        let app = setup_test_server().await;

        let response = app
            .server
            .post("/api/sessions")
            .json(&json!({
                "prompt": "How should we price the new tier?",
                "worker_count": 2,
                "argument_rounds": 2,
                "personas": ["skeptic", "analyst"]
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert!(body["session_id"].is_string());
        assert_eq!(body["worker_count"], 2);
        assert_eq!(body["argument_rounds"], 2);
        assert_eq!(body["refinement_rounds"], 2);
        assert_eq!(body["personas"][0]["id"], "skeptic");
        assert_eq!(body["personas"][1]["id"], "analyst");
    }

    #[tokio::test]
    async fn test_start_rejects_out_of_range_config() {
        let app = setup_test_server().await;

        let response = app
            .server
            .post("/api/sessions")
            .json(&json!({"prompt": "Too many voices", "worker_count": 9}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "configuration_error");

        let list: Value = app.server.get("/api/sessions").await.json();
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_persona() {
        let app = setup_test_server().await;

        let response = app
            .server
            .post("/api/sessions")
            .json(&json!({
                "prompt": "Who decides?",
                "worker_count": 2,
                "personas": ["skeptic", "oracle"]
            }))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"], "persona_not_found");
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let app = setup_test_server().await;

        let response = app
            .server
            .get(&format!("/api/sessions/{}/status", uuid::Uuid::new_v4()))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"], "session_not_found");
    }

    #[tokio::test]
    async fn test_full_session_over_http() {
        let app = setup_test_server().await;
        let server = &app.server;
        let id = start_session(
            server,
            json!({
                "prompt": "Should we move our monolith to services?",
                "worker_count": 2,
                "refinement_rounds": 1
            }),
        )
        .await;

        let events = run(server, &id, "run").await;
        let kinds_seen = kinds(&events);
        assert_eq!(kinds_seen.first(), Some(&"stage_start"));
        assert_eq!(kinds_seen.last(), Some(&"awaiting_round_feedback"));
        assert!(kinds_seen.iter().filter(|k| **k == "worker_complete").count() >= 4);

        let status: Value = server
            .get(&format!("/api/sessions/{}/status", id))
            .await
            .json();
        assert_eq!(status["status"], "awaiting_input");
        assert_eq!(status["checkpoint"]["kind"], "round_feedback");
        assert_eq!(status["running"], false);

        server
            .post(&format!("/api/sessions/{}/round-feedback", id))
            .json(&json!({"round": 1, "worker_feedback": {"worker_1": "Cost it out"}}))
            .await
            .assert_status_ok();
        let events = run(server, &id, "continue").await;
        assert_eq!(kinds(&events).last(), Some(&"awaiting_collab_feedback"));

        server
            .post(&format!("/api/sessions/{}/collab-feedback", id))
            .json(&json!({"round": 1}))
            .await
            .assert_status_ok();
        let events = run(server, &id, "continue").await;
        assert_eq!(kinds(&events).last(), Some(&"awaiting_argument_feedback"));

        server
            .post(&format!("/api/sessions/{}/argument-feedback", id))
            .json(&json!({"round": 1}))
            .await
            .assert_status_ok();
        let events = run(server, &id, "continue").await;
        assert_eq!(kinds(&events).last(), Some(&"awaiting_user_input"));

        let response = server
            .post(&format!("/api/sessions/{}/vote", id))
            .json(&json!({
                "ranks": {"candidate_1": 1, "candidate_2": 2},
                "overall_feedback": "Gradual wins",
                "prompt_rating": 4
            }))
            .await;
        response.assert_status_ok();
        let outcome: Value = response.json();
        assert_eq!(outcome["winner"], "candidate_1");

        let events = run(server, &id, "finalize").await;
        let kinds_seen = kinds(&events);
        assert!(kinds_seen.contains(&"axiom_extracted"));
        assert!(kinds_seen.contains(&"final_output"));
        assert_eq!(kinds_seen.last(), Some(&"awaiting_user_input"));

        let response = server
            .post(&format!("/api/sessions/{}/final-feedback", id))
            .json(&json!({"text": ""}))
            .await;
        response.assert_status_ok();
        let status: Value = response.json();
        assert_eq!(status["status"], "completed");
        assert_eq!(status["stage"], "complete");

        let log: Value = server.get(&format!("/api/sessions/{}/log", id)).await.json();
        let entries = log.as_array().unwrap();
        assert_eq!(entries[0]["record"]["type"], "session_started");
        assert_eq!(
            entries.last().unwrap()["record"]["type"],
            "session_completed"
        );

        let report: Value = server
            .get(&format!("/api/sessions/{}/replay", id))
            .await
            .json();
        assert_eq!(report["matches"], true);

        let full: Value = server
            .get(&format!("/api/sessions/{}/full-state", id))
            .await
            .json();
        assert!(full["final_output"].is_string());

        let response = server.get(&format!("/api/sessions/{}/run", id)).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_feedback_for_wrong_round_is_rejected() {
        let app = setup_test_server().await;
        let id = start_session(
            &app.server,
            json!({"prompt": "Rewrite or refactor?", "worker_count": 2}),
        )
        .await;
        run(&app.server, &id, "run").await;

        let response = app
            .server
            .post(&format!("/api/sessions/{}/round-feedback", id))
            .json(&json!({"round": 2}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid_state");

        let response = app
            .server
            .post(&format!("/api/sessions/{}/vote", id))
            .json(&json!({"ranks": {}}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_while_awaiting_input_is_rejected() {
        let app = setup_test_server().await;
        let id = start_session(
            &app.server,
            json!({"prompt": "Build or buy?", "worker_count": 2}),
        )
        .await;
        run(&app.server, &id, "run").await;

        let response = app.server.get(&format!("/api/sessions/{}/continue", id)).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_swap_persona_and_end() {
        let app = setup_test_server().await;
        let id = start_session(
            &app.server,
            json!({"prompt": "Which database?", "worker_count": 2}),
        )
        .await;
        run(&app.server, &id, "run").await;

        let response = app
            .server
            .post(&format!("/api/sessions/{}/swap-persona", id))
            .json(&json!({"slot_id": "worker_2", "persona_id": "visionary", "mode": "restart"}))
            .await;
        response.assert_status_ok();
        let status: Value = response.json();
        assert_eq!(status["slots"][1]["persona"]["id"], "visionary");
        assert_eq!(status["slots"][1]["outputs"], 0);

        let response = app
            .server
            .post(&format!("/api/sessions/{}/swap-persona", id))
            .json(&json!({"slot_id": "worker_1", "persona_id": "nobody"}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = app
            .server
            .post(&format!("/api/sessions/{}/end", id))
            .json(&json!({"reason": "out of time"}))
            .await;
        response.assert_status_ok();
        let status: Value = response.json();
        assert_eq!(status["status"], "aborted");

        let response = app.server.post(&format!("/api/sessions/{}/end", id)).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let app = setup_test_server().await;
        let id = start_session(
            &app.server,
            json!({"prompt": "Ship on Friday?", "worker_count": 2}),
        )
        .await;

        app.server
            .delete(&format!("/api/sessions/{}", id))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        app.server
            .get(&format!("/api/sessions/{}/status", id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        let list: Value = app.server.get("/api/sessions").await.json();
        assert!(list.as_array().unwrap().is_empty());
    }
}

mod event_replay {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    /// Serve the router on an ephemeral port; the events route never closes
    /// on its own, so it is read over a real connection.
    async fn spawn_http(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Read SSE events until one with sequence `until` arrives.
    async fn read_until(response: reqwest::Response, until: u64) -> Vec<(u64, String)> {
        let mut body = response.bytes_stream();
        let mut text = String::new();
        let read = async {
            while let Some(chunk) = body.next().await {
                text.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
                if sse_events(&text).iter().any(|(seq, _)| *seq == until) {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), read)
            .await
            .expect("missed events were not replayed");
        sse_events(&text)
    }

    async fn halted_session() -> (TestApp, String, String, Vec<(u64, String)>) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            storage: StorageConfig {
                data_dir: Some(dir.path().to_path_buf()),
                database_url: None,
            },
            ..Default::default()
        };
        let pool = db::connect(&config.database_url()).await.unwrap();
        let state = AppState::new(pool, &config, Arc::new(ScriptedGateway::new()));
        state.seed_personas(&config).await.unwrap();

        let base = spawn_http(create_router(state.clone())).await;
        let app = TestApp {
            server: TestServer::new(create_router(state)).unwrap(),
            _dir: dir,
        };
        let id = start_session(
            &app.server,
            json!({"prompt": "Monorepo or polyrepo?", "worker_count": 2}),
        )
        .await;
        let delivered = run(&app.server, &id, "run").await;
        (app, base, id, delivered)
    }

    #[tokio::test]
    async fn test_run_stream_ids_are_contiguous() {
        let (_app, _base, _id, delivered) = halted_session().await;
        let ids: Vec<u64> = delivered.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(ids[0], 1);
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test]
    async fn test_events_after_cursor_skip_delivered_ones() {
        let (_app, base, id, delivered) = halted_session().await;
        let last = delivered.last().unwrap().0;
        let cursor = delivered[delivered.len() / 2].0;

        let response = reqwest::get(format!("{}/api/sessions/{}/events?after={}", base, id, cursor))
            .await
            .unwrap();
        assert!(response.status().is_success());
        let replayed = read_until(response, last).await;

        let ids: Vec<u64> = replayed.iter().map(|(seq, _)| *seq).collect();
        let expected: Vec<u64> = (cursor + 1..=last).collect();
        assert_eq!(ids, expected);
        assert_eq!(replayed.last().unwrap().1, "awaiting_round_feedback");
    }

    #[tokio::test]
    async fn test_last_event_id_header_wins_over_query() {
        let (_app, base, id, delivered) = halted_session().await;
        let last = delivered.last().unwrap().0;

        let response = reqwest::Client::new()
            .get(format!("{}/api/sessions/{}/events?after=0", base, id))
            .header("Last-Event-ID", "3")
            .send()
            .await
            .unwrap();
        let replayed = read_until(response, last).await;

        assert_eq!(replayed.first().unwrap().0, 4);
        assert_eq!(replayed.len() as u64, last - 3);
    }
}

mod http_gateway {
    use super::*;

    fn draft_body() -> Value {
        json!({
            "message": {
                "role": "assistant",
                "content": json!({
                    "summary": "Split billing out first",
                    "key_assumptions": ["billing is isolated"],
                    "strengths": ["small blast radius"],
                    "risks": ["dual writes"],
                    "confidence": 0.6
                }).to_string()
            },
            "prompt_eval_count": 10,
            "eval_count": 20
        })
    }

    #[tokio::test]
    async fn test_upstream_failure_ends_stream_with_error_and_is_resumable() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(draft_body()))
            .up_to_n_times(1)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&mock)
            .await;

        let gateway = OllamaGateway::new(GatewayConfig {
            base_url: mock.uri(),
            ..Default::default()
        })
        .unwrap();
        let app = setup_with_gateway(Arc::new(gateway)).await;
        let id = start_session(
            &app.server,
            json!({"prompt": "Split the billing service?", "worker_count": 2}),
        )
        .await;

        let events = run(&app.server, &id, "run").await;
        let kinds_seen = kinds(&events);
        assert_eq!(kinds_seen.last(), Some(&"error"));
        assert_eq!(
            kinds_seen.iter().filter(|k| **k == "worker_complete").count(),
            1
        );
        assert!(kinds_seen.contains(&"tokens_update"));

        let status: Value = app
            .server
            .get(&format!("/api/sessions/{}/status", id))
            .await
            .json();
        assert_eq!(status["status"], "error");
        assert_eq!(status["last_error"]["code"], "upstream_generation_error");
        assert_eq!(status["slots"][0]["outputs"], 1);
        assert_eq!(status["slots"][1]["outputs"], 0);
        assert_eq!(status["tokens"]["input_tokens"], 10);
        assert_eq!(status["tokens"]["output_tokens"], 20);
        assert_eq!(status["running"], false);
    }
}
