use std::time::Duration;

use futures::channel::mpsc as fmpsc;
use tokio::sync::mpsc;

use super::*;
use crate::backend::{ArcBackend, CompletionStream, MockBackend};
use crate::models::{
    CompletionEvent, NoticeKind, Persona, Role, SourceFile, Usage, ValidationError,
};
use crate::storage::{ArcStorage, MockStorage};

struct Fixture {
    chat: Chat,
    rx: mpsc::UnboundedReceiver<Event>,
}

fn setup(storage: MockStorage, backend: MockBackend, persona: Persona) -> Fixture {
    let storage: ArcStorage = Arc::new(storage);
    let backend: ArcBackend = Arc::new(backend);
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let event_tx: ArcEventTx = Arc::new(tx);

    let session = Arc::new(Session::new(storage.clone(), event_tx.clone()));
    let prompt = Arc::new(Prompt::new(
        session.clone(),
        storage.clone(),
        event_tx.clone(),
    ));
    prompt.select_persona(Arc::new(persona));
    let conversations = Arc::new(Conversations::new(storage.clone(), event_tx.clone()));
    let transport = Transport::new(
        session.clone(),
        storage,
        backend,
        conversations.clone(),
        event_tx.clone(),
    );
    Fixture {
        chat: Chat::new(session, prompt, transport, conversations, event_tx),
        rx,
    }
}

fn writer() -> Persona {
    Persona::new("writer", "deepseek", "deepseek-chat").with_media_types(["text/*"])
}

/// Backend whose stream is fed by the test.
fn channel_backend() -> (MockBackend, fmpsc::UnboundedSender<Result<CompletionEvent>>) {
    let (tx, rx) = fmpsc::unbounded::<Result<CompletionEvent>>();
    let mut backend = MockBackend::new();
    backend
        .expect_stream_completion()
        .times(1)
        .return_once(move |_, _| {
            Box::pin(async move {
                let stream: CompletionStream = rx.boxed();
                Ok(stream)
            })
        });
    (backend, tx)
}

async fn until(what: &str, f: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

fn finish() -> CompletionEvent {
    CompletionEvent::Finish {
        usage: None,
        finish_reason: Some("stop".to_string()),
    }
}

#[tokio::test]
async fn test_submit_and_stream_to_completion() {
    let (backend, tx) = channel_backend();
    let mut storage = MockStorage::new();
    storage
        .expect_upload_file()
        .never();
    storage
        .expect_save_transcript()
        .times(1)
        .withf(|id, messages| {
            id.starts_with("chat-")
                && messages.len() == 2
                && messages[0].text() == "hello"
                && messages[1].text() == "hi there"
        })
        .returning(|_, _| Ok(()));
    storage.expect_list_conversations().times(1).returning(|| Ok(vec![]));

    let f = setup(storage, backend, writer());
    let c1 = f.chat.session().id();
    f.chat.prompt().change_text("hello");

    f.chat.handle_submit().await.expect("submit failed");
    assert!(f.chat.status().is_busy());
    assert_eq!(f.chat.messages()[0].text(), "hello");
    assert!(f.chat.prompt().text().is_empty());

    until("streaming", || f.chat.status() == GenerationStatus::Streaming).await;
    tx.unbounded_send(Ok(CompletionEvent::TextDelta("hi ".to_string())))
        .unwrap();
    tx.unbounded_send(Ok(CompletionEvent::TextDelta("there".to_string())))
        .unwrap();
    let usage = Usage {
        input_tokens: Some(3),
        output_tokens: Some(2),
        total_tokens: Some(5),
        ..Default::default()
    };
    tx.unbounded_send(Ok(CompletionEvent::StepFinish {
        usage: Some(usage.clone()),
        finish_reason: Some("stop".to_string()),
    }))
    .unwrap();
    tx.unbounded_send(Ok(finish())).unwrap();
    f.chat.wait().await;

    assert_eq!(f.chat.status(), GenerationStatus::Ready);
    assert_eq!(f.chat.usage(), Some(usage));
    let messages = f.chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role(), Role::Assistant);
    assert_eq!(messages[1].text(), "hi there");
    assert_eq!(f.chat.session().id(), c1);
    assert_eq!(f.chat.session().checkpoint(), 2);
}

#[tokio::test]
async fn test_submit_unsupported_attachment() {
    let mut backend = MockBackend::new();
    backend.expect_stream_completion().never();
    let mut storage = MockStorage::new();
    storage.expect_upload_file().never();

    let mut f = setup(storage, backend, writer());
    f.chat
        .prompt()
        .add_sources(vec![SourceFile::new("cat.png", "image/png", vec![1, 2, 3])]);

    let err = f.chat.handle_submit().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<ValidationError>(),
        Some(&ValidationError::UnsupportedFile {
            filename: "cat.png".to_string()
        })
    );
    assert_eq!(f.chat.status(), GenerationStatus::Ready);
    assert!(f.chat.messages().is_empty());

    match f.rx.try_recv() {
        Ok(Event::Notice(notice)) => {
            assert_eq!(notice.kind(), &NoticeKind::Warning);
            assert!(notice.description().unwrap_or_default().contains("cat.png"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_while_streaming_stops() {
    let (backend, tx) = channel_backend();
    let mut storage = MockStorage::new();
    storage.expect_save_transcript().never();

    let f = setup(storage, backend, writer());
    f.chat.prompt().change_text("write a long story");
    f.chat.handle_submit().await.unwrap();

    until("streaming", || f.chat.status() == GenerationStatus::Streaming).await;
    tx.unbounded_send(Ok(CompletionEvent::TextDelta("Once".to_string())))
        .unwrap();
    until("first delta", || {
        f.chat
            .messages()
            .last()
            .map(|m| m.text() == "Once")
            .unwrap_or(false)
    })
    .await;

    // The submit control stops a running generation
    f.chat.prompt().change_text("another");
    f.chat.handle_submit().await.unwrap();
    f.chat.stop();
    f.chat.wait().await;

    assert_eq!(f.chat.status(), GenerationStatus::Ready);
    assert_eq!(f.chat.messages().len(), 2);
    assert_eq!(f.chat.prompt().text(), "another");
}

#[tokio::test]
async fn test_navigation_during_generation() {
    let (backend, tx) = channel_backend();
    let mut storage = MockStorage::new();
    storage
        .expect_save_transcript()
        .times(1)
        .withf(|_, messages| messages.len() == 2 && messages[1].text() == "partial answer")
        .returning(|_, _| Ok(()));
    storage.expect_list_conversations().returning(|| Ok(vec![]));

    let f = setup(storage, backend, writer());
    let c1 = f.chat.session().id();
    f.chat.prompt().change_text("question");
    f.chat.handle_submit().await.unwrap();

    until("streaming", || f.chat.status() == GenerationStatus::Streaming).await;
    tx.unbounded_send(Ok(CompletionEvent::TextDelta("partial".to_string())))
        .unwrap();
    until("first delta", || {
        f.chat
            .messages()
            .last()
            .map(|m| m.text() == "partial")
            .unwrap_or(false)
    })
    .await;

    let c2 = f.chat.new_conversation().await;
    assert_ne!(c1, c2);
    assert!(f.chat.messages().is_empty());
    assert_eq!(f.chat.status(), GenerationStatus::Ready);

    tx.unbounded_send(Ok(CompletionEvent::TextDelta(" answer".to_string())))
        .unwrap();
    tx.unbounded_send(Ok(finish())).unwrap();
    f.chat.wait().await;

    // The old generation was saved without touching the new view
    assert!(f.chat.messages().is_empty());
    assert_eq!(f.chat.status(), GenerationStatus::Ready);
    assert_eq!(f.chat.session().checkpoint(), 0);
}

#[tokio::test]
async fn test_generation_failure_and_dismiss() {
    let mut backend = MockBackend::new();
    backend.expect_stream_completion().returning(|_, _| {
        Box::pin(async { Err(eyre::eyre!("provider deepseek is not available")) })
    });
    let mut storage = MockStorage::new();
    storage.expect_save_transcript().never();

    let f = setup(storage, backend, writer());
    f.chat.prompt().change_text("hello");
    f.chat.handle_submit().await.unwrap();
    f.chat.wait().await;

    assert_eq!(
        f.chat.error().as_deref(),
        Some("provider deepseek is not available")
    );
    assert_eq!(
        f.chat.status().submit_action(),
        SubmitAction::Dismiss
    );

    f.chat.handle_submit().await.unwrap();
    assert_eq!(f.chat.status(), GenerationStatus::Ready);
    assert!(f.chat.error().is_none());
}

#[tokio::test]
async fn test_load_messages_after_navigation() {
    let mut storage = MockStorage::new();
    storage
        .expect_load_transcript()
        .withf(|id| id == "chat-saved")
        .times(1)
        .returning(|_| {
            Ok(vec![
                DisplayMessage::new_user("hello"),
                DisplayMessage::new_assistant().with_part(crate::models::Part::text("hi")),
            ])
        });

    let f = setup(storage, MockBackend::new(), writer());
    f.chat.navigate_to("chat-saved").await;
    assert!(f.chat.session().require_loading());
    assert!(f.chat.messages().is_empty());

    f.chat.load_messages().await;
    assert_eq!(f.chat.messages().len(), 2);
    assert_eq!(f.chat.session().checkpoint(), 2);

    // Already loaded
    f.chat.load_messages().await;
    assert_eq!(f.chat.messages().len(), 2);
}

#[tokio::test]
async fn test_retry_loading() {
    let mut storage = MockStorage::new();
    let mut seq = mockall::Sequence::new();
    storage
        .expect_load_transcript()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(eyre::eyre!("database is locked")));
    storage
        .expect_load_transcript()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(vec![DisplayMessage::new_user("hello")]));

    let f = setup(storage, MockBackend::new(), writer());
    f.chat.navigate_to("chat-saved").await;
    f.chat.load_messages().await;
    assert_eq!(
        f.chat.session().load_error().as_deref(),
        Some("database is locked")
    );
    assert!(f.chat.messages().is_empty());

    f.chat.retry_loading().await;
    assert!(f.chat.session().load_error().is_none());
    assert_eq!(f.chat.messages().len(), 1);
}

#[tokio::test]
async fn test_submit_after_failed_load_keeps_transcript() {
    let mut backend = MockBackend::new();
    backend.expect_stream_completion().never();
    let mut storage = MockStorage::new();
    storage
        .expect_load_transcript()
        .times(1)
        .returning(|_| Err(eyre::eyre!("network down")));
    storage.expect_upload_file().never();
    storage.expect_save_transcript().never();

    let f = setup(storage, backend, writer());
    f.chat.navigate_to("chat-existing").await;
    f.chat.load_messages().await;
    assert!(f.chat.session().load_error().is_some());

    f.chat.prompt().change_text("hi");
    let err = f.chat.handle_submit().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<ValidationError>(),
        Some(&ValidationError::NotLoaded {
            id: "chat-existing".to_string()
        })
    );
    f.chat.wait().await;

    assert_eq!(f.chat.status(), GenerationStatus::Ready);
    assert!(f.chat.messages().is_empty());
    assert_eq!(f.chat.prompt().text(), "hi");
}

#[tokio::test]
async fn test_submit_before_load() {
    let mut backend = MockBackend::new();
    backend.expect_stream_completion().never();
    let mut storage = MockStorage::new();
    storage.expect_save_transcript().never();

    let f = setup(storage, backend, writer());
    f.chat.navigate_to("chat-existing").await;
    f.chat.prompt().change_text("hi");

    assert!(f.chat.handle_submit().await.is_err());
    assert!(f.chat.messages().is_empty());
    assert_eq!(f.chat.prompt().text(), "hi");
}
