use super::{create_test_relay, create_test_repo, default_relay_settings, test_user_id, Uuid};
use iknoweverything::models::internal::{NewConversation, Role};
use iknoweverything::relay::{RelayError, RelaySettings};
use iknoweverything::storage::repository::ConversationRepository;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_completion(server: &MockServer, reply: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [
                { "message": { "role": "assistant", "content": reply } }
            ]
        })))
        .mount(server)
        .await;
}

async fn create_conversation(
    repo: &dyn ConversationRepository,
    user: &str,
    title: Option<&str>,
) -> Uuid {
    repo.create(NewConversation {
        id: Some(Uuid::new_v4()),
        user_id: user.to_string(),
        title: title.map(|t| t.to_string()),
        messages: vec![],
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_pipeline_persists_both_sides() {
    let server = MockServer::start().await;
    mock_completion(&server, "Hi there!").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), &server.uri(), default_relay_settings());
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, Some("Greetings")).await;

    let reply = relay
        .send_message(&user, conv_id, "Hello!", None)
        .await
        .unwrap();

    assert_eq!(reply.content, "Hi there!");
    assert_eq!(reply.conversation_id, conv_id);

    let messages = repo
        .get_conversation_messages(&user, conv_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hello!");
    assert_eq!(messages[0].id, reply.user_message_id);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi there!");
    assert_eq!(messages[1].id, reply.assistant_message_id);
}

#[tokio::test]
async fn test_untitled_conversation_gets_auto_title() {
    let server = MockServer::start().await;
    mock_completion(&server, "ok").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), &server.uri(), default_relay_settings());
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, None).await;

    relay
        .send_message(&user, conv_id, "Plan a weekend trip to Lisbon", None)
        .await
        .unwrap();

    let conv = repo.find_by_id(&user, conv_id).await.unwrap().unwrap();
    assert_eq!(conv.title.as_deref(), Some("Plan a weekend trip to Lisbon"));
}

#[tokio::test]
async fn test_auto_title_truncated_on_char_boundary() {
    let server = MockServer::start().await;
    mock_completion(&server, "ok").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(
        repo.clone(),
        &server.uri(),
        RelaySettings {
            context_window: 30,
            system_prompt: None,
            title_max_chars: 10,
        },
    );
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, None).await;

    relay
        .send_message(&user, conv_id, "a very long first message indeed", None)
        .await
        .unwrap();

    let conv = repo.find_by_id(&user, conv_id).await.unwrap().unwrap();
    let title = conv.title.unwrap();
    assert!(title.chars().count() <= 11);
    assert!(title.ends_with('…'));
}

#[tokio::test]
async fn test_existing_title_is_preserved() {
    let server = MockServer::start().await;
    mock_completion(&server, "ok").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), &server.uri(), default_relay_settings());
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, Some("My title")).await;

    relay
        .send_message(&user, conv_id, "something unrelated", None)
        .await
        .unwrap();

    let conv = repo.find_by_id(&user, conv_id).await.unwrap().unwrap();
    assert_eq!(conv.title.as_deref(), Some("My title"));
}

#[tokio::test]
async fn test_context_window_bounds_forwarded_messages() {
    let server = MockServer::start().await;
    mock_completion(&server, "ok").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(
        repo.clone(),
        &server.uri(),
        RelaySettings {
            context_window: 3,
            system_prompt: Some("You are helpful.".to_string()),
            title_max_chars: 48,
        },
    );
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, Some("Long chat")).await;

    for i in 0..4 {
        relay
            .send_message(&user, conv_id, &format!("turn {}", i), None)
            .await
            .unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    let last_body: serde_json::Value =
        serde_json::from_slice(&requests.last().unwrap().body).unwrap();
    let messages = last_body["messages"].as_array().unwrap();

    // system prompt + at most 3 context messages
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[3]["content"], "turn 3");
}

#[tokio::test]
async fn test_image_attachment_forwarded_as_parts() {
    let server = MockServer::start().await;
    mock_completion(&server, "nice photo").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), &server.uri(), default_relay_settings());
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, Some("Photos")).await;

    relay
        .send_message(
            &user,
            conv_id,
            "what is this?",
            Some("data:image/png;base64,AAAA".to_string()),
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let content = &body["messages"][0]["content"];
    assert_eq!(content[0]["type"], "text");
    assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AAAA");

    // Attachment also survives persistence
    let messages = repo
        .get_conversation_messages(&user, conv_id)
        .await
        .unwrap();
    assert!(messages[0].attachment.is_some());
}

#[tokio::test]
async fn test_empty_content_rejected_before_any_write() {
    let server = MockServer::start().await;
    mock_completion(&server, "ok").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), &server.uri(), default_relay_settings());
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, None).await;

    let err = relay
        .send_message(&user, conv_id, "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::EmptyMessage));

    assert_eq!(repo.count_messages(&user, conv_id).await.unwrap(), 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_failure_keeps_inbound_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), &server.uri(), default_relay_settings());
    let user = test_user_id();
    let conv_id = create_conversation(repo.as_ref(), &user, Some("Flaky")).await;

    let err = relay
        .send_message(&user, conv_id, "still there?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Completion(_)));

    // Store-then-forward: the user message stays, no assistant reply
    let messages = repo
        .get_conversation_messages(&user, conv_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn test_unknown_conversation_is_not_found() {
    let server = MockServer::start().await;
    mock_completion(&server, "ok").await;

    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), &server.uri(), default_relay_settings());

    let err = relay
        .send_message(&test_user_id(), Uuid::new_v4(), "hello?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::ConversationNotFound(_)));
}
