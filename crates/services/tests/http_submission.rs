use std::sync::Arc;
use std::time::Duration;

use quiz_core::model::{
    FieldDefinition, NextRule, OptionDefinition, QuizId, SessionStatus, StepDefinition, StepId,
};
use quiz_core::time::fixed_now;
use quiz_core::{FieldErrorKind, StepGraph, ValidationSettings};
use serde_json::json;
use services::submission::IDEMPOTENCY_KEY_HEADER;
use services::{
    Clock, EngineConfig, EngineError, HttpSubmissionClient, QuizConfig, QuizEngine,
    SubmissionClient, SubmissionError, SubmissionRequest,
};
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(quiz_id: QuizId) -> SubmissionRequest {
    SubmissionRequest {
        quiz_id,
        answers: [("category", "face"), ("email", "jane@x.com")]
            .into_iter()
            .collect(),
        submitted_at: fixed_now(),
    }
}

fn leads_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/leads", server.uri())).unwrap()
}

#[tokio::test]
async fn accepted_submission_is_acknowledged() {
    let server = MockServer::start().await;
    let quiz_id = QuizId::new();
    let key = quiz_id.to_string();

    Mock::given(method("POST"))
        .and(path("/leads"))
        .and(header(IDEMPOTENCY_KEY_HEADER, key.as_str()))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "quizId": key,
            "answers": {"category": "face", "email": "jane@x.com"},
            "submittedAt": "2023-11-14T22:13:20Z",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpSubmissionClient::new(leads_url(&server)).with_api_key("secret");
    let ack = client.submit(&request(quiz_id)).await.unwrap();
    assert_eq!(ack.quiz_id, quiz_id);
}

#[tokio::test]
async fn unprocessable_response_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "accepted": false,
            "fieldErrors": {"email": "already registered"},
        })))
        .mount(&server)
        .await;

    let client = HttpSubmissionClient::new(leads_url(&server));
    let err = client.submit(&request(QuizId::new())).await.unwrap_err();
    let SubmissionError::Rejected { field_errors } = err else {
        panic!("expected rejection, got {err:?}");
    };
    assert_eq!(field_errors["email"], "already registered");
}

#[tokio::test]
async fn overloaded_service_is_a_retryable_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpSubmissionClient::new(leads_url(&server));
    let err = client.submit(&request(QuizId::new())).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreadable_body_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let client = HttpSubmissionClient::new(leads_url(&server));
    let err = client.submit(&request(QuizId::new())).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Unknown(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unreachable_service_is_a_network_error() {
    let server = MockServer::start().await;
    let url = leads_url(&server);
    drop(server);

    let client = HttpSubmissionClient::new(url);
    let err = client.submit(&request(QuizId::new())).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_is_built_from_env_overrides() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/leads"))
        .and(header("authorization", "Bearer from-env"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": true})))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = leads_url(&server).to_string();
    let config = QuizConfig::from_json(
        r#"{"steps": [{"id": 1, "question": "Done", "kind": "terminal"}]}"#,
    )
    .unwrap()
    .with_overrides(|key: &str| match key {
        "QUIZ_SUBMIT_URL" => Some(endpoint.clone()),
        "QUIZ_SUBMIT_API_KEY" => Some("from-env".to_string()),
        _ => None,
    })
    .unwrap();

    let client = HttpSubmissionClient::from_config(&config.submission).unwrap();
    assert_eq!(client.endpoint().path(), "/leads");
    client.submit(&request(QuizId::new())).await.unwrap();
}

#[tokio::test]
async fn engine_surfaces_server_field_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "accepted": false,
            "fieldErrors": {"phone": "number not in service"},
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/leads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": true})))
        .mount(&server)
        .await;

    let graph = StepGraph::new(
        vec![
            StepDefinition::choice(
                StepId::new(1),
                "Pick one",
                "category",
                vec![OptionDefinition::new("face", "Face")],
            )
            .with_next(NextRule::fixed(StepId::new(2))),
            StepDefinition::form(
                StepId::new(2),
                "Contact",
                vec![FieldDefinition::tel("phone").required()],
            )
            .with_next(NextRule::fixed(StepId::new(3))),
            StepDefinition::terminal(StepId::new(3), "Thanks"),
        ],
        StepId::new(1),
    )
    .unwrap();
    let config = EngineConfig::new(
        Arc::new(graph),
        ValidationSettings::default(),
        Duration::from_secs(5),
    )
    .with_clock(Clock::fixed(fixed_now()));
    let engine = QuizEngine::new(config, Arc::new(HttpSubmissionClient::new(leads_url(&server))));

    engine.record_answer(StepId::new(1), "category", "face").unwrap();
    engine.record_answer(StepId::new(2), "phone", "+1 555 010 9999").unwrap();

    let err = engine.submit().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Submission(SubmissionError::Rejected { .. })
    ));
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(
        snapshot.errors.for_field("phone").map(|e| &e.kind),
        Some(&FieldErrorKind::Rejected("number not in service".into()))
    );

    engine.record_answer(StepId::new(2), "phone", "+1 555 010 1234").unwrap();
    engine.submit().await.unwrap();
    assert_eq!(engine.status(), SessionStatus::Submitted);
    assert_eq!(engine.current_step(), StepId::new(3));
}
