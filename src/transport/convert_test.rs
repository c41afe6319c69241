use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::models::{ArcEventTx, Event, RawFile, ToolState};
use crate::storage::MockStorage;

fn setup(storage: MockStorage) -> (Session, ArcStorage) {
    let storage: ArcStorage = Arc::new(storage);
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();
    let event_tx: ArcEventTx = Arc::new(tx);
    (Session::new(storage.clone(), event_tx), storage)
}

#[test]
fn test_summary_text() {
    assert_eq!(
        summary_text(Some("notes.md"), "# Notes"),
        "Summarized by AI, the content of file 'notes.md' is:\n\n# Notes"
    );
    assert_eq!(
        summary_text(None, "plain"),
        "Summarized by AI, the content of file is:\n\nplain"
    );
}

#[tokio::test]
async fn test_convert_internal_files_uses_cache() {
    let mut storage = MockStorage::new();
    storage
        .expect_fetch_file()
        .withf(|url| url.ends_with("/file-text"))
        .times(1)
        .returning(|_| {
            Ok(RawFile {
                data: b"hello notes".to_vec(),
                media_type: "text/markdown".to_string(),
            })
        });
    storage
        .expect_fetch_file()
        .withf(|url| url.ends_with("/file-image"))
        .times(1)
        .returning(|_| {
            Ok(RawFile {
                data: vec![0x89, 0x50],
                media_type: "image/png".to_string(),
            })
        });
    let (session, storage) = setup(storage);
    let id = session.id();

    let text_url = format!("/api/files/{}/file-text", id);
    let image_url = format!("/api/files/{}/file-image", id);
    let messages = vec![DisplayMessage::new(Role::User).with_parts(vec![
        Part::file(&text_url, "text/markdown", Some("notes.md".to_string())),
        Part::file(&image_url, "image/png", Some("pixel.png".to_string())),
        Part::text("what are these?"),
    ])];

    let expected = vec![ModelMessage::new(
        ModelRole::User,
        vec![
            ModelContent::Text(summary_text(Some("notes.md"), "hello notes")),
            ModelContent::File {
                data: vec![0x89, 0x50],
                media_type: "image/png".to_string(),
                filename: Some("pixel.png".to_string()),
            },
            ModelContent::Text("what are these?".to_string()),
        ],
    )];

    let converted = convert_messages(&session, &storage, &id, &messages)
        .await
        .expect("failed to convert");
    assert_eq!(converted, expected);

    assert_eq!(
        session.cached_file(&id, &text_url),
        Some(FileContent::Text("hello notes".to_string()))
    );

    // Warm cache, no second fetch
    let converted = convert_messages(&session, &storage, &id, &messages)
        .await
        .expect("failed to convert");
    assert_eq!(converted, expected);
}

#[tokio::test]
async fn test_convert_stale_conversation_is_not_cached() {
    let mut storage = MockStorage::new();
    storage.expect_fetch_file().times(2).returning(|_| {
        Ok(RawFile {
            data: b"text".to_vec(),
            media_type: "text/plain".to_string(),
        })
    });
    let (session, storage) = setup(storage);
    session.navigate_to("chat-current");

    let url = "/api/files/chat-old/file-1";
    for _ in 0..2 {
        let content = resolve_file(&session, &storage, "chat-old", url)
            .await
            .unwrap();
        assert_eq!(content, FileContent::Text("text".to_string()));
    }
    assert_eq!(session.cached_file("chat-current", url), None);
}

#[tokio::test]
async fn test_convert_fetch_failure() {
    let mut storage = MockStorage::new();
    storage
        .expect_fetch_file()
        .returning(|_| Err(eyre::eyre!("gone")));
    let (session, storage) = setup(storage);
    let id = session.id();

    let messages = vec![DisplayMessage::new(Role::User).with_part(Part::file(
        "/api/files/x/y",
        "text/plain",
        None,
    ))];
    let err = convert_messages(&session, &storage, &id, &messages)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "fetching file /api/files/x/y");
}

#[tokio::test]
async fn test_convert_assistant_steps() {
    let mut storage = MockStorage::new();
    storage.expect_fetch_file().never();
    let (session, storage) = setup(storage);
    let id = session.id();

    let messages = vec![
        DisplayMessage::new(Role::User).with_parts(vec![
            Part::file("https://example.com/cat.png", "image/png", None),
            Part::text("look"),
        ]),
        DisplayMessage::new(Role::System).with_part(Part::text("ignored")),
        DisplayMessage::new_assistant().with_parts(vec![
            Part::Reasoning {
                text: "hmm".to_string(),
            },
            Part::ToolInvocation {
                tool_call_id: "call_1".to_string(),
                tool_name: "describe".to_string(),
                input: json!({"url": "cat"}),
                output: Some(json!("a cat")),
                state: ToolState::OutputAvailable,
            },
            Part::ToolInvocation {
                tool_call_id: "call_2".to_string(),
                tool_name: "describe".to_string(),
                input: json!({}),
                output: None,
                state: ToolState::InputAvailable,
            },
            Part::text("It is a cat."),
            Part::SourceUrl {
                source_id: "s1".to_string(),
                url: "https://example.com".to_string(),
                title: None,
            },
        ]),
    ];

    let converted = convert_messages(&session, &storage, &id, &messages)
        .await
        .unwrap();
    assert_eq!(
        converted,
        vec![
            ModelMessage::new(
                ModelRole::User,
                vec![
                    ModelContent::FileUrl {
                        url: "https://example.com/cat.png".to_string(),
                        media_type: "image/png".to_string(),
                    },
                    ModelContent::Text("look".to_string()),
                ]
            ),
            ModelMessage::new(
                ModelRole::Assistant,
                vec![
                    ModelContent::Reasoning("hmm".to_string()),
                    ModelContent::ToolCall(ToolCall {
                        id: "call_1".to_string(),
                        name: "describe".to_string(),
                        arguments: "{\"url\":\"cat\"}".to_string(),
                    }),
                ]
            ),
            ModelMessage::new(
                ModelRole::Tool,
                vec![ModelContent::ToolResult {
                    tool_call_id: "call_1".to_string(),
                    tool_name: "describe".to_string(),
                    output: json!("a cat"),
                }]
            ),
            ModelMessage::new(
                ModelRole::Assistant,
                vec![ModelContent::Text("It is a cat.".to_string())]
            ),
        ]
    );
}
