#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use tutor_backend::config::Config;
use tutor_backend::db::MemoryStore;
use tutor_backend::services::gateway::LlmGateway;
use tutor_backend::services::mock_llm::ScriptedCompletion;
use tutor_backend::state::AppState;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub llm: Arc<ScriptedCompletion>,
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(ScriptedCompletion::new([]), Config::default())
}

pub fn create_test_app_with(llm: ScriptedCompletion, config: Config) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(llm);
    let gateway = LlmGateway::new(llm.clone()).with_timeout(Duration::from_secs(2));
    let state = AppState::new(config, store.clone(), gateway);
    let router = tutor_backend::build_router(state.clone());

    TestApp { router, state, store, llm }
}

impl TestApp {
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }
}

pub fn cafe_worksheet() -> Value {
    serde_json::json!({
        "scenario_summary": "You are at a Parisian café and want to order breakfast. You greet the waiter, order and ask for the bill.",
        "vocabulary": [
            {"word": "un croissant", "translation": "a croissant", "example_sentence": "Je voudrais un croissant, s'il vous plaît."},
            {"word": "l'addition", "translation": "the bill", "example_sentence": "L'addition, s'il vous plaît."},
            {"word": "un café crème", "translation": "a coffee with cream", "example_sentence": "Un café crème pour moi."}
        ],
        "grammar_focus": "Le conditionnel de politesse (je voudrais)",
        "explanations": "Use « je voudrais » to order politely. It is the conditional of vouloir.",
        "exercises": [
            {"type": "fill_blank", "question": "Je ___ un café, s'il vous plaît. (vouloir)", "answer": "voudrais", "hint": "conditional"},
            {"type": "conjugation", "question": "Conjuguez « être » à la première personne : je ___", "answer": "suis", "hint": null},
            {"type": "sentence_building", "question": "Ordonnez : plaît / l'addition / vous / s'il", "answer": "L'addition, s'il vous plaît.", "hint": "polite request"},
            {"type": "translation", "question": "Translate: I would like a croissant.", "answer": "Je voudrais un croissant.", "hint": null}
        ],
        "roleplay_prompts": [
            "Bonjour ! Qu'est-ce que vous désirez ?",
            "Vous prenez un dessert ?",
            "Sur place ou à emporter ?"
        ]
    })
}
