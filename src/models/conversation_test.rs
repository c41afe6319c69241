use super::*;
use crate::models::{FileContent, Part, RawFile, is_internal_file, is_textual};

#[test]
fn test_new_id_prefix() {
    let a = new_conversation_id();
    let b = new_conversation_id();
    assert!(a.starts_with("chat-"));
    assert_eq!(a.len(), "chat-".len() + 32);
    assert_ne!(a, b);
}

#[test]
fn test_title_of() {
    assert_eq!(title_of(&[]), "New Chat");

    let messages = vec![
        DisplayMessage::new_assistant().with_part(Part::text("Hello! How can I help?")),
        DisplayMessage::new_user("  \n"),
        DisplayMessage::new_user("Plan a trip\nto Kyoto in spring"),
    ];
    assert_eq!(title_of(&messages), "Plan a trip");

    let long = "a".repeat(80);
    let title = title_of(&[DisplayMessage::new_user(long)]);
    assert_eq!(title.chars().count(), 51);
    assert!(title.ends_with('…'));
}

#[test]
fn test_file_content_classification() {
    let text = FileContent::from(RawFile {
        data: b"# notes".to_vec(),
        media_type: "text/markdown; charset=utf-8".to_string(),
    });
    assert_eq!(text, FileContent::Text("# notes".to_string()));

    let json = FileContent::from(RawFile {
        data: b"{}".to_vec(),
        media_type: "application/json".to_string(),
    });
    assert!(matches!(json, FileContent::Text(_)));

    let png = FileContent::from(RawFile {
        data: vec![0x89, 0x50, 0x4e, 0x47],
        media_type: "image/png".to_string(),
    });
    assert!(matches!(png, FileContent::Binary(_)));

    let broken = FileContent::from(RawFile {
        data: vec![0xff, 0xfe, 0x00],
        media_type: "text/plain".to_string(),
    });
    assert_eq!(broken, FileContent::Binary(vec![0xff, 0xfe, 0x00]));
}

#[test]
fn test_internal_file_and_textual() {
    assert!(is_internal_file("/api/files/chat-1/file-1"));
    assert!(!is_internal_file("https://example.com/a.png"));
    assert!(is_textual("TEXT/PLAIN"));
    assert!(!is_textual("application/pdf"));
}
