use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use uuid::Uuid;

use tutor_backend::db::{MemoryStore, Store};
use tutor_backend::schema::{ConversationTurn, Language, Role};
use tutor_backend::services::conversation::{context_window, ConversationError, ConversationManager};
use tutor_backend::services::gateway::{GatewayError, LlmGateway};
use tutor_backend::services::mock_llm::{ScriptedCompletion, ScriptedReply};

struct Harness {
    manager: ConversationManager,
    store: Arc<MemoryStore>,
    llm: Arc<ScriptedCompletion>,
}

fn harness(llm: ScriptedCompletion) -> Harness {
    harness_with(llm, Duration::from_secs(2), Duration::from_secs(5))
}

fn harness_with(llm: ScriptedCompletion, gateway_timeout: Duration, lock_wait: Duration) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(llm);
    let gateway = LlmGateway::new(llm.clone()).with_timeout(gateway_timeout);
    let manager = ConversationManager::new(gateway, store.clone()).with_lock_wait(lock_wait);
    Harness { manager, store, llm }
}

async fn start(h: &Harness, language: Language) -> Uuid {
    h.manager.start(Uuid::new_v4(), language, None).await.unwrap().id
}

async fn seed_exchanges(h: &Harness, id: Uuid, exchanges: i32) {
    for i in 0..exchanges {
        let user = ConversationTurn::user(2 * i, format!("user {}", 2 * i), None);
        let reply = ConversationTurn::assistant(2 * i + 1, format!("tutor {}", 2 * i + 1));
        h.store.append_exchange(id, &user, &reply).await.unwrap();
    }
}

#[tokio::test]
async fn spanish_conversation_records_one_exchange() {
    let h = harness(ScriptedCompletion::new([ScriptedReply::text(
        "¡Genial! ¿Qué tema te interesa más, la comida o los viajes?",
    )]));
    let id = start(&h, Language::Es).await;

    let reply = h.manager.submit_user_message(id, "Hola, quiero practicar").await.unwrap();
    assert!(!reply.reply.is_empty());

    let session = h.manager.get(id).await.unwrap();
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[0].role, Role::User);
    assert_eq!(session.turns[0].text, "Hola, quiero practicar");
    assert_eq!(session.turns[1].role, Role::Assistant);
    assert!(session.is_well_formed());

    let system = &h.llm.requests()[0].messages[0].content;
    assert!(system.contains("Spanish"));
}

#[tokio::test]
async fn prompt_uses_only_the_last_ten_turns() {
    let h = harness(ScriptedCompletion::new([ScriptedReply::text("D'accord.")]));
    let id = start(&h, Language::Fr).await;
    seed_exchanges(&h, id, 11).await;

    h.manager.submit_user_message(id, "Et maintenant ?").await.unwrap();

    let messages = &h.llm.requests()[0].messages;
    assert_eq!(messages.len(), 1 + 10 + 1);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[1].content, "user 12");
    assert_eq!(messages[10].content, "tutor 21");
    assert_eq!(messages[11].content, "Et maintenant ?");
    for (message, expected_role) in messages[1..11].iter().zip(["user", "assistant"].iter().cycle()) {
        assert_eq!(message.role, *expected_role);
    }

    let session = h.manager.get(id).await.unwrap();
    assert_eq!(session.turns.len(), 24);
    assert!(session.is_well_formed());
}

#[tokio::test]
async fn short_history_is_sent_whole() {
    let h = harness(ScriptedCompletion::new([ScriptedReply::text("Yes!")]));
    let id = start(&h, Language::En).await;
    seed_exchanges(&h, id, 2).await;

    h.manager.submit_user_message(id, "Shall we go on?").await.unwrap();

    assert_eq!(h.llm.requests()[0].messages.len(), 1 + 4 + 1);
}

#[tokio::test]
async fn failed_reply_leaves_turns_untouched() {
    let h = harness_with(
        ScriptedCompletion::new([
            ScriptedReply::upstream_error(),
            ScriptedReply::text("too late").delayed(Duration::from_millis(300)),
        ]),
        Duration::from_millis(50),
        Duration::from_secs(5),
    );
    let id = start(&h, Language::Fr).await;
    seed_exchanges(&h, id, 1).await;

    let err = h.manager.submit_user_message(id, "Bonjour").await.unwrap_err();
    assert!(matches!(err, ConversationError::Upstream(GatewayError::Upstream(_))));

    let err = h.manager.submit_user_message(id, "Bonjour").await.unwrap_err();
    assert!(matches!(err, ConversationError::Upstream(GatewayError::Timeout(_))));

    let session = h.manager.get(id).await.unwrap();
    assert_eq!(session.turns.len(), 2);
    assert!(session.is_well_formed());
}

#[tokio::test]
async fn blank_message_is_rejected_without_a_model_call() {
    let h = harness(ScriptedCompletion::new([]));
    let id = start(&h, Language::Es).await;

    let err = h.manager.submit_user_message(id, " \n\t ").await.unwrap_err();

    assert!(matches!(err, ConversationError::InvalidInput(_)));
    assert_eq!(h.llm.call_count(), 0);
    assert!(h.manager.get(id).await.unwrap().turns.is_empty());
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let h = harness(ScriptedCompletion::new([]));
    let err = h.manager.submit_user_message(Uuid::new_v4(), "Hola").await.unwrap_err();
    assert!(matches!(err, ConversationError::NotFound(_)));
}

#[tokio::test]
async fn concurrent_messages_to_one_session_are_serialized() {
    let h = harness(ScriptedCompletion::with_responder(|request| {
        let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        ScriptedReply::text(format!("reply to {last}")).delayed(Duration::from_millis(100))
    }));
    let id = start(&h, Language::Fr).await;

    let (a, b) = tokio::join!(
        h.manager.submit_user_message(id, "premier"),
        h.manager.submit_user_message(id, "second"),
    );
    a.unwrap();
    b.unwrap();

    let session = h.manager.get(id).await.unwrap();
    assert_eq!(session.turns.len(), 4);
    assert!(session.is_well_formed());
    let indices: Vec<i32> = session.turns.iter().map(|t| t.turn_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(session.turns[1].text, format!("reply to {}", session.turns[0].text));
    assert_eq!(session.turns[3].text, format!("reply to {}", session.turns[2].text));

    let requests = h.llm.requests();
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
}

#[tokio::test]
async fn busy_session_rejects_after_bounded_wait() {
    let h = harness_with(
        ScriptedCompletion::with_responder(|_| ScriptedReply::text("lentement").delayed(Duration::from_millis(200))),
        Duration::from_secs(2),
        Duration::from_millis(20),
    );
    let id = start(&h, Language::Fr).await;

    let (first, second) = tokio::join!(h.manager.submit_user_message(id, "un"), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.manager.submit_user_message(id, "deux").await
    });

    first.unwrap();
    assert!(matches!(second.unwrap_err(), ConversationError::SessionBusy { .. }));
    assert_eq!(h.manager.get(id).await.unwrap().turns.len(), 2);
}

#[tokio::test]
async fn different_sessions_run_in_parallel() {
    let h = harness(ScriptedCompletion::with_responder(|_| {
        ScriptedReply::text("ok").delayed(Duration::from_millis(300))
    }));
    let a = start(&h, Language::Es).await;
    let b = start(&h, Language::Fr).await;

    let started = Instant::now();
    let (ra, rb) = tokio::join!(
        h.manager.submit_user_message(a, "hola"),
        h.manager.submit_user_message(b, "salut"),
    );
    ra.unwrap();
    rb.unwrap();

    assert!(started.elapsed() < Duration::from_millis(550));
}

#[tokio::test]
async fn abandoned_request_still_completes_the_exchange() {
    let h = harness(ScriptedCompletion::new([
        ScriptedReply::text("Je t'écoute.").delayed(Duration::from_millis(100)),
    ]));
    let id = start(&h, Language::Fr).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        h.manager.submit_detached(id, "Allô ?".to_string()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = h.manager.get(id).await.unwrap();
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[1].text, "Je t'écoute.");
}

fn turns(n: usize) -> Vec<ConversationTurn> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                ConversationTurn::user(i as i32, format!("u{i}"), None)
            } else {
                ConversationTurn::assistant(i as i32, format!("a{i}"))
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn window_is_the_most_recent_suffix(n in 0usize..80, window in 1usize..25) {
        let all = turns(n);
        let slice = context_window(&all, window);

        prop_assert_eq!(slice.len(), n.min(window));
        prop_assert_eq!(slice, &all[n - slice.len()..]);
        prop_assert!(slice.windows(2).all(|w| w[0].turn_index + 1 == w[1].turn_index));
    }

    #[test]
    fn turn_sequence_stays_contiguous(outcomes in proptest::collection::vec(any::<bool>(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let replies = outcomes.iter().map(|ok| {
                if *ok { ScriptedReply::text("bien") } else { ScriptedReply::upstream_error() }
            });
            let h = harness(ScriptedCompletion::new(replies.collect::<Vec<_>>()));
            let id = start(&h, Language::Fr).await;

            for (i, _) in outcomes.iter().enumerate() {
                let _ = h.manager.submit_user_message(id, &format!("message {i}")).await;
            }

            let session = h.manager.get(id).await.unwrap();
            let successes = outcomes.iter().filter(|ok| **ok).count();
            assert_eq!(session.turns.len(), 2 * successes);
            assert!(session.is_well_formed());
        });
    }
}
