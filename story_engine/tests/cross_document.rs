use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use story_engine::{
    ChangeKind, DocumentSource, DocumentSourceError, EngineConfig, EngineError,
    FsDocumentSource, MemoryDocumentSource, SharedStory, Story,
};
use story_model::{CardId, CardKind, CardSpec, FieldValue, ParsedDocument, Visibility};
use tokio::sync::Notify;

fn learning_guide() -> ParsedDocument {
    ParsedDocument::new("learning_guide")
        .with_dependency("event_path", "event_path.json")
        .with_dependency("broken", "broken.json")
        .with_card(CardSpec::new(CardKind::Choice, "format"))
        .with_card(
            CardSpec::new(CardKind::Logic, "go_event")
                .with_field("action", "load")
                .with_field("target", "event_path")
                .with_reference("format::choice == event"),
        )
        .with_card(
            CardSpec::new(CardKind::Markdown, "after_event")
                .with_field("text", "Event: event_path::venue::value")
                .with_reference("event_path::venue::value"),
        )
        .with_location("/stories/learning_guide.json")
}

fn event_path() -> ParsedDocument {
    ParsedDocument::new("event_path")
        .with_card(CardSpec::new(CardKind::Input, "venue").with_field("value", "the park"))
        .with_card(
            CardSpec::new(CardKind::Markdown, "recap")
                .with_field("text", "Format: learning_guide::format::choice")
                .with_reference("learning_guide::format::choice is set"),
        )
}

fn source() -> MemoryDocumentSource {
    MemoryDocumentSource::new().with_document("/stories/event_path.json", event_path())
}

fn shared() -> SharedStory {
    SharedStory::new(Story::from_document(learning_guide(), EngineConfig::default()).unwrap())
}

#[tokio::test]
async fn test_pending_cards_resolve_after_load() {
    let story = shared();
    {
        let story = story.lock().await;
        let card = story.current().card(&CardId::from("after_event")).unwrap();
        assert_eq!(card.visibility(), Visibility::Pending);
        assert_eq!(
            story.field("after_event", "text"),
            Some(FieldValue::from("Event: event_path::venue::value"))
        );
    }

    let batch = story.load_dependency("event_path", &source()).await.unwrap();
    let added = batch.event_for("after_event").unwrap();
    assert_eq!(added.kind, ChangeKind::Added);
    assert_eq!(added.story_path, "learning_guide");

    let story = story.lock().await;
    assert_eq!(
        story.field("after_event", "text"),
        Some(FieldValue::from("Event: the park"))
    );
    let loaded = story.retained("event_path").unwrap();
    assert_eq!(loaded.location(), Some(Path::new("/stories/event_path.json")));
}

#[tokio::test]
async fn test_load_request_from_headless_card() {
    let story = shared();
    let batch = story
        .apply_field_change("format", "choice", "event")
        .await
        .unwrap();
    assert_eq!(batch.load_requests, vec!["event_path".to_string()]);
    assert!(batch.event_for("go_event").is_none());

    for request in &batch.load_requests {
        story.load_dependency(request, &source()).await.unwrap();
    }

    // The loaded path reads back into the one that loaded it.
    let story = story.lock().await;
    let recap = story
        .retained("event_path")
        .unwrap()
        .card(&CardId::from("recap"))
        .unwrap();
    assert!(recap.is_presented());
    assert_eq!(
        story.card_field(recap, "text"),
        Some(FieldValue::from("Format: event"))
    );
}

#[tokio::test]
async fn test_changes_relay_to_loaded_paths() {
    let story = shared();
    story.load_dependency("event_path", &source()).await.unwrap();

    let batch = story
        .apply_field_change("format", "choice", "event")
        .await
        .unwrap();
    let relayed = batch.event_for("recap").unwrap();
    assert_eq!(relayed.kind, ChangeKind::Added);
    assert_eq!(relayed.story_path, "event_path");
}

/// guide and event_path read each other; event_path also reads credits.
fn guide() -> ParsedDocument {
    ParsedDocument::new("guide")
        .with_dependency("event_path", "event_path.json")
        .with_dependency("credits", "credits.json")
        .with_card(CardSpec::new(CardKind::Input, "name"))
        .with_card(
            CardSpec::new(CardKind::Markdown, "back")
                .with_field("text", "Back to the guide")
                .with_reference("event_path::welcome::text"),
        )
        .with_card(
            CardSpec::new(CardKind::Markdown, "finale")
                .with_field("text", "That's a wrap")
                .with_reference("event_path::roll::text"),
        )
        .with_location("/round/guide.json")
}

fn round_trip_source() -> MemoryDocumentSource {
    let event_path = ParsedDocument::new("event_path")
        .with_card(
            CardSpec::new(CardKind::Markdown, "welcome")
                .with_field("text", "Welcome guide::name::value")
                .with_reference("guide::name::value"),
        )
        .with_card(
            CardSpec::new(CardKind::Markdown, "roll")
                .with_field("text", "Roll credits")
                .with_reference("credits::thanks::text"),
        );
    let credits = ParsedDocument::new("credits")
        .with_card(CardSpec::new(CardKind::Markdown, "thanks").with_field("text", "Thanks!"));
    MemoryDocumentSource::new()
        .with_document("/round/event_path.json", event_path)
        .with_document("/round/credits.json", credits)
}

fn visibility_in(story: &Story, story_path: &str, card: &str) -> Visibility {
    let graph = if story.current().id() == story_path {
        story.current()
    } else {
        story.retained(story_path).unwrap()
    };
    graph.card(&CardId::from(card)).unwrap().visibility()
}

#[tokio::test]
async fn test_changes_relay_back_into_current_path() {
    let mut story = Story::from_document(guide(), EngineConfig::default()).unwrap();
    story
        .load_dependency("event_path", &round_trip_source())
        .await
        .unwrap();
    assert_eq!(visibility_in(&story, "event_path", "welcome"), Visibility::Hidden);
    assert_eq!(visibility_in(&story, "guide", "back"), Visibility::Hidden);

    let batch = story.apply_field_change("name", "value", "Ada").unwrap();
    let events: Vec<(ChangeKind, &str, &str)> = batch
        .events
        .iter()
        .map(|e| (e.kind, e.story_path.as_str(), e.card.as_str()))
        .collect();
    assert_eq!(
        events,
        vec![
            (ChangeKind::Updated, "guide", "name"),
            (ChangeKind::Added, "event_path", "welcome"),
            (ChangeKind::Added, "guide", "back"),
        ]
    );
    assert_eq!(batch.event_for("back").unwrap().position, 1);
    assert_eq!(visibility_in(&story, "guide", "back"), Visibility::Visible);

    let batch = story.apply_field_change("name", "value", "").unwrap();
    assert_eq!(batch.event_for("welcome").unwrap().kind, ChangeKind::Removed);
    assert_eq!(batch.event_for("back").unwrap().kind, ChangeKind::Removed);
    assert_eq!(visibility_in(&story, "guide", "back"), Visibility::Hidden);
}

#[tokio::test]
async fn test_linking_wakes_every_waiting_path() {
    let mut story = Story::from_document(guide(), EngineConfig::default()).unwrap();
    let source = round_trip_source();
    story.load_dependency("event_path", &source).await.unwrap();
    assert_eq!(visibility_in(&story, "event_path", "roll"), Visibility::Pending);
    assert_eq!(visibility_in(&story, "guide", "finale"), Visibility::Pending);

    // guide loads credits, but event_path is the one reading it.
    let batch = story.load_dependency("credits", &source).await.unwrap();
    let roll = batch.event_for("roll").unwrap();
    assert_eq!(roll.kind, ChangeKind::Added);
    assert_eq!(roll.story_path, "event_path");
    assert_eq!(roll.position, 0);
    let finale = batch.event_for("finale").unwrap();
    assert_eq!(finale.kind, ChangeKind::Added);
    assert_eq!(finale.story_path, "guide");

    assert_eq!(visibility_in(&story, "event_path", "roll"), Visibility::Visible);
    assert_eq!(visibility_in(&story, "guide", "finale"), Visibility::Visible);
}

#[tokio::test]
async fn test_undeclared_dependency() {
    let story = shared();
    let err = story.load_dependency("nowhere", &source()).await.unwrap_err();
    assert!(matches!(err, EngineError::DependencyNotFound { .. }));
}

#[tokio::test]
async fn test_failed_load_keeps_current_graph() {
    let story = shared();
    let err = story.load_dependency("broken", &source()).await.unwrap_err();
    match err {
        EngineError::DocumentLoad { path, .. } => {
            assert_eq!(path, PathBuf::from("/stories/broken.json"));
        }
        other => panic!("expected a load error, got {other:?}"),
    }
    let story = story.lock().await;
    assert_eq!(story.current().id(), "learning_guide");
    assert!(story.retained_ids().is_empty());
}

/// Holds every fetch until released.
struct GatedSource {
    inner: MemoryDocumentSource,
    gate: Arc<Notify>,
}

#[async_trait]
impl DocumentSource for GatedSource {
    async fn load_document(&self, path: &Path) -> Result<ParsedDocument, DocumentSourceError> {
        self.gate.notified().await;
        self.inner.load_document(path).await
    }
}

#[tokio::test]
async fn test_dropped_load_links_nothing() {
    let story = shared();
    let gate = Arc::new(Notify::new());
    let source = GatedSource {
        inner: source(),
        gate: gate.clone(),
    };

    tokio::select! {
        biased;
        result = story.load_dependency("event_path", &source) => {
            panic!("load should still be waiting, got {result:?}");
        }
        _ = std::future::ready(()) => {}
    }

    {
        let guard = story.try_lock().expect("lock is free after the load is dropped");
        assert!(guard.retained("event_path").is_none());
        let card = guard.current().card(&CardId::from("after_event")).unwrap();
        assert_eq!(card.visibility(), Visibility::Pending);
    }

    gate.notify_one();
    story.load_dependency("event_path", &source).await.unwrap();
    assert!(story.lock().await.retained("event_path").is_some());
}

/// Checks the story is not locked while a document is fetched.
struct ProbingSource {
    inner: MemoryDocumentSource,
    story: SharedStory,
}

#[async_trait]
impl DocumentSource for ProbingSource {
    async fn load_document(&self, path: &Path) -> Result<ParsedDocument, DocumentSourceError> {
        assert!(self.story.try_lock().is_ok(), "story locked during fetch");
        self.inner.load_document(path).await
    }
}

#[tokio::test]
async fn test_lock_released_during_fetch() {
    let story = shared();
    let source = ProbingSource {
        inner: source(),
        story: story.clone(),
    };
    story.load_dependency("event_path", &source).await.unwrap();
}

#[tokio::test]
async fn test_fs_source_resolves_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    let guide = r#"{
        "id": "learning_guide",
        "dependencies": [{"dependency_id": "event_path", "dependency_file": "paths/event_path.json"}],
        "cards": [
            {"type": "markdown", "id": "after_event",
             "fields": {"text": "Event: event_path::venue::value"},
             "references": ["event_path::venue::value"]}
        ]
    }"#;
    let event = r#"{
        "id": "event_path",
        "cards": [{"type": "input", "id": "venue", "fields": {"value": "the park"}}]
    }"#;
    std::fs::create_dir(dir.path().join("paths")).unwrap();
    std::fs::write(dir.path().join("learning_guide.json"), guide).unwrap();
    std::fs::write(dir.path().join("paths/event_path.json"), event).unwrap();

    let source = FsDocumentSource;
    let document = source
        .load_document(&dir.path().join("learning_guide.json"))
        .await
        .unwrap();
    let mut story = Story::from_document(document, EngineConfig::default()).unwrap();

    let batch = story.load_dependency("event_path", &source).await.unwrap();
    assert_eq!(batch.count(ChangeKind::Added), 1);
    assert_eq!(story.resolve("event_path::venue::value"), "the park");

    story.navigate_to("event_path").unwrap();
    assert_eq!(story.current().id(), "event_path");
    assert!(story.retained_ids().is_empty());
}

#[tokio::test]
async fn test_fs_source_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = FsDocumentSource
        .load_document(&dir.path().join("missing.json"))
        .await
        .unwrap_err();
    assert!(matches!(missing, DocumentSourceError::NotFound(_)));

    std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
    let bad = FsDocumentSource
        .load_document(&dir.path().join("bad.json"))
        .await
        .unwrap_err();
    assert!(matches!(bad, DocumentSourceError::Json(_)));
}
