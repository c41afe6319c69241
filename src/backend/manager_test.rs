use super::*;
use crate::backend::MockBackend;
use crate::models::CompletionEvent;
use futures::StreamExt;
use std::sync::Arc;

fn mock_backend(name: &str) -> MockBackend {
    let mut mock = MockBackend::new();
    mock.expect_name().return_const(name.to_string());
    mock
}

#[test]
fn test_add_connection() {
    let mut manager = Manager::default();
    assert!(manager.is_empty());

    manager
        .add_connection(Arc::new(mock_backend("deepseek")))
        .expect("failed to add connection");
    assert!(manager.get_connection("deepseek").is_some());
    assert!(manager.get_connection("openai").is_none());

    let err = manager
        .add_connection(Arc::new(mock_backend("deepseek")))
        .unwrap_err();
    assert_eq!(err.to_string(), "connection deepseek already exists");
}

#[tokio::test]
async fn test_stream_completion_routes_by_provider() {
    let mut openai = mock_backend("openai");
    openai.expect_stream_completion().never();

    let mut deepseek = mock_backend("deepseek");
    deepseek
        .expect_stream_completion()
        .withf(|req, _| req.model() == "deepseek-chat")
        .times(1)
        .returning(|_, _| {
            Box::pin(async {
                let events = vec![Ok(CompletionEvent::TextDelta("hi".to_string()))];
                Ok(futures::stream::iter(events).boxed())
            })
        });

    let mut manager = Manager::default();
    manager.add_connection(Arc::new(openai)).unwrap();
    manager.add_connection(Arc::new(deepseek)).unwrap();

    let mut stream = manager
        .stream_completion(
            CompletionRequest::new("deepseek", "deepseek-chat"),
            CancellationToken::new(),
        )
        .await
        .expect("failed to stream");
    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event, CompletionEvent::TextDelta("hi".to_string()));
}

#[tokio::test]
async fn test_stream_completion_unknown_provider() {
    let manager = Manager::default();
    let err = manager
        .stream_completion(
            CompletionRequest::new("missing", "model"),
            CancellationToken::new(),
        )
        .await
        .err()
        .expect("expected an error");
    assert_eq!(err.to_string(), "provider missing is not available");
}
