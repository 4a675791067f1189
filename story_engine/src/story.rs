//! The running story: the current story path plus every graph it links to.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use story_model::{
    Card, CardId, CardSpec, FieldValue, MediaReference, ParsedDocument, Visibility,
};
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{ChangeBatch, ChangeSink};
use crate::loader::{self, DependencyRequest, DocumentSource};
use crate::story_path::{LinkedDocuments, NoLinks, StoryPath};

/// The current graph and retained graphs, seen from a retained one.
struct StoryDocuments<'a> {
    current: &'a StoryPath,
    retained: &'a HashMap<String, StoryPath>,
}

impl LinkedDocuments for StoryDocuments<'_> {
    fn linked(&self, story_path: &str) -> Option<&StoryPath> {
        if self.current.id() == story_path {
            return Some(self.current);
        }
        self.retained.get(story_path)
    }
}

/// Owns every live graph and routes mutations between them.
///
/// Retained graphs are keyed by the dependency id they were loaded under,
/// which is also the path segment references use to reach them.
pub struct Story {
    config: EngineConfig,
    current: StoryPath,
    retained: HashMap<String, StoryPath>,
    media_files: HashMap<Uuid, MediaReference>,
    sink: Option<Box<dyn ChangeSink + Send>>,
}

impl Story {
    pub fn new(current: StoryPath, config: EngineConfig) -> Self {
        Self {
            config,
            current,
            retained: HashMap::new(),
            media_files: HashMap::new(),
            sink: None,
        }
    }

    pub fn from_document(document: ParsedDocument, config: EngineConfig) -> Result<Self> {
        let current = StoryPath::build(document, &NoLinks)?;
        Ok(Self::new(current, config))
    }

    /// Deliver every change event to `sink` as well as returning it.
    pub fn set_sink(&mut self, sink: impl ChangeSink + Send + 'static) {
        self.sink = Some(Box::new(sink));
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current(&self) -> &StoryPath {
        &self.current
    }

    pub fn retained(&self, dependency_id: &str) -> Option<&StoryPath> {
        self.retained.get(dependency_id)
    }

    pub fn retained_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.retained.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Presented cards of the current story path.
    pub fn valid_cards(&self) -> Vec<&Card> {
        self.current.valid_cards()
    }

    /// Write a field of a current card and propagate, including into
    /// retained graphs that read it.
    pub fn apply_field_change(
        &mut self,
        card: &str,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<ChangeBatch> {
        let card = CardId::from(card);
        let before = visibilities(&self.current);
        let mut batch =
            self.current
                .apply_field_change(&card, field, value.into(), &self.retained)?;
        batch.extend(self.relay_from_current(card, &before));
        self.deliver(&batch);
        Ok(batch)
    }

    /// Store captured media in a card's media field and register the file.
    pub fn attach_media(
        &mut self,
        card: &str,
        field: &str,
        media: MediaReference,
    ) -> Result<ChangeBatch> {
        let key = media.uuid;
        let batch = self.apply_field_change(card, field, FieldValue::Media(media.clone()))?;
        self.media_files.insert(key, media);
        Ok(batch)
    }

    pub fn media_file(&self, uuid: &Uuid) -> Option<&MediaReference> {
        self.media_files.get(uuid)
    }

    pub fn media_files(&self) -> impl Iterator<Item = &MediaReference> {
        self.media_files.values()
    }

    /// Forget a media file; unknown keys are ignored.
    pub fn remove_media_file(&mut self, uuid: &Uuid) -> Option<MediaReference> {
        let removed = self.media_files.remove(uuid);
        if removed.is_none() {
            tracing::debug!("no media file {uuid} to remove");
        }
        removed
    }

    pub fn insert_card(&mut self, spec: &CardSpec, after: Option<&str>) -> Result<ChangeBatch> {
        let after = after.map(CardId::from);
        let id = CardId::from(spec.id.as_str());
        let before = visibilities(&self.current);
        let mut batch = self
            .current
            .insert_card(spec, after.as_ref(), &self.retained)?;
        batch.extend(self.relay_from_current(id, &before));
        self.deliver(&batch);
        Ok(batch)
    }

    pub fn remove_card(&mut self, card: &str) -> Result<ChangeBatch> {
        let card = CardId::from(card);
        let before = visibilities(&self.current);
        let mut batch = self.current.remove_card(&card, &self.retained)?;
        batch.extend(self.relay_from_current(card, &before));
        self.deliver(&batch);
        Ok(batch)
    }

    /// Read a field of a current card, resolving placeholders.
    pub fn field(&self, card: &str, name: &str) -> Option<FieldValue> {
        self.current
            .field(&CardId::from(card), name, &self.retained, &self.config)
    }

    /// Read a field of any card, resolved against the graph that owns it.
    ///
    /// A card whose graph was torn down only has its stored value.
    pub fn card_field(&self, card: &Card, name: &str) -> Option<FieldValue> {
        let Some(owner) = card.owner() else {
            tracing::debug!("card {} is detached, reading {} unresolved", card.id(), name);
            return card.raw_field(name).cloned();
        };
        if self.current.handle() == owner {
            return self.current.field(card.id(), name, &self.retained, &self.config);
        }
        let graph = self.retained.values().find(|g| g.handle() == owner)?;
        let linked = StoryDocuments {
            current: &self.current,
            retained: &self.retained,
        };
        graph.field(card.id(), name, &linked, &self.config)
    }

    /// Resolve placeholders in text against the current story path.
    pub fn resolve(&self, text: &str) -> String {
        self.current.resolve(text, &self.retained, &self.config)
    }

    /// Resolve a declared dependency of the current story path.
    pub fn dependency_request(&self, dependency_id: &str) -> Result<DependencyRequest> {
        DependencyRequest::new(&self.current, dependency_id)
    }

    /// Build a fetched dependency and link it into the story.
    ///
    /// Every graph reading that story path is re-evaluated, and the
    /// visibility changes this causes are relayed onward. Loading the same
    /// dependency again replaces the previous graph.
    pub fn link_dependency(
        &mut self,
        request: &DependencyRequest,
        document: ParsedDocument,
    ) -> Result<ChangeBatch> {
        if self.graph(&request.from).is_none() {
            return Err(EngineError::DependencyNotFound {
                story_path: request.from.clone(),
                dependency: request.dependency_id.clone(),
            });
        }

        let linked = StoryDocuments {
            current: &self.current,
            retained: &self.retained,
        };
        let graph = StoryPath::build(document, &linked)?;
        let mut batch = ChangeBatch {
            events: Vec::new(),
            load_requests: graph.load_requests(),
        };
        if let Some(mut previous) = self.retained.insert(request.dependency_id.clone(), graph) {
            previous.teardown();
        }

        let mut queue = VecDeque::new();
        for reader in self.readers_of(&request.dependency_id, None) {
            let (refreshed, changed) = self.refresh_reader(&reader, &request.dependency_id, None);
            batch.extend(refreshed);
            queue.extend(changed.into_iter().map(|card| (reader.clone(), card)));
        }
        batch.extend(self.relay(queue));

        tracing::info!(
            "linked story path {} into {}",
            request.dependency_id,
            request.from
        );
        self.deliver(&batch);
        Ok(batch)
    }

    /// Fetch, build and link a declared dependency of the current story path.
    pub async fn load_dependency(
        &mut self,
        dependency_id: &str,
        source: &dyn DocumentSource,
    ) -> Result<ChangeBatch> {
        let request = self.dependency_request(dependency_id)?;
        let document = loader::fetch(source, &request).await?;
        self.link_dependency(&request, document)
    }

    /// Make a loaded dependency the current story path.
    ///
    /// The previous current graph is retained under its own id. With
    /// `release_unreachable`, graphs the new current one no longer reaches
    /// are torn down.
    pub fn navigate_to(&mut self, dependency_id: &str) -> Result<()> {
        let Some(next) = self.retained.remove(dependency_id) else {
            return Err(EngineError::DependencyNotFound {
                story_path: self.current.id().to_string(),
                dependency: dependency_id.to_string(),
            });
        };
        let previous = std::mem::replace(&mut self.current, next);
        let key = previous.id().to_string();
        if let Some(mut stale) = self.retained.insert(key, previous) {
            stale.teardown();
        }
        if self.config.release_unreachable {
            self.release_unreachable();
        }
        tracing::info!("navigated to story path {}", self.current.id());
        Ok(())
    }

    /// Tear down retained graphs the current one no longer reaches, either
    /// as a declared dependency or through a reference.
    pub fn release_unreachable(&mut self) {
        let mut reachable = BTreeSet::new();
        let mut queue = VecDeque::from([&self.current]);
        while let Some(graph) = queue.pop_front() {
            let links: Vec<&str> = graph
                .dependencies()
                .iter()
                .map(|d| d.dependency_id.as_str())
                .chain(graph.external_edges().map(|(edge, _)| edge.story_path.as_str()))
                .collect();
            for id in links {
                if let Some(next) = self.retained.get(id) {
                    if reachable.insert(id.to_string()) {
                        queue.push_back(next);
                    }
                }
            }
        }

        let dropped: Vec<String> = self
            .retained
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        for id in dropped {
            if let Some(mut graph) = self.retained.remove(&id) {
                graph.teardown();
                tracing::debug!("released unreachable story path {id}");
            }
        }
    }

    /// Jump to `card` or `path::card`, navigating if the path is retained.
    ///
    /// Returns the card's position among the presented cards, or `None` if
    /// it exists but is not presented. On error the story stays where it was.
    pub fn go_to_card(&mut self, reference: &str) -> Result<Option<usize>> {
        let segments: Vec<&str> = reference.split("::").collect();
        let (path, card) = match segments.as_slice() {
            [card] => (None, CardId::from(*card)),
            [path, card] if *path != self.current.id() => (Some(*path), CardId::from(*card)),
            [_, card] => (None, CardId::from(*card)),
            _ => {
                return Err(EngineError::InvalidCardReference {
                    reference: reference.to_string(),
                })
            }
        };

        let target = match path {
            Some(path) => self
                .retained
                .get(path)
                .ok_or_else(|| EngineError::DependencyNotFound {
                    story_path: self.current.id().to_string(),
                    dependency: path.to_string(),
                })?,
            None => &self.current,
        };
        if !target.contains(&card) {
            return Err(EngineError::UnknownCard {
                story_path: target.id().to_string(),
                card,
            });
        }

        if let Some(path) = path {
            self.navigate_to(path)?;
        }
        Ok(self.current.presented_position(&card))
    }

    pub fn mark_clean(&mut self) {
        self.current.mark_clean();
        for graph in self.retained.values_mut() {
            graph.mark_clean();
        }
    }

    /// A graph by the name references use for it: the current one by its
    /// id, retained ones by dependency id.
    fn graph(&self, name: &str) -> Option<&StoryPath> {
        if self.current.id() == name {
            return Some(&self.current);
        }
        self.retained.get(name)
    }

    /// Relay a mutation of `card` in the current graph, along with every
    /// current card whose visibility it changed.
    fn relay_from_current(
        &mut self,
        card: CardId,
        before: &HashMap<CardId, Visibility>,
    ) -> ChangeBatch {
        let source = self.current.id().to_string();
        let mut queue = VecDeque::from([(source.clone(), card)]);
        for changed in changed_since(&self.current, before) {
            queue.push_back((source.clone(), changed));
        }
        self.relay(queue)
    }

    /// Carry changes between graphs until no reader's visibility moves.
    ///
    /// Each item is a card of a named graph. An item is relayed once per
    /// visibility its card reaches, so cross-document cycles settle.
    fn relay(&mut self, mut queue: VecDeque<(String, CardId)>) -> ChangeBatch {
        let mut batch = ChangeBatch::default();
        let mut seen = HashSet::new();
        while let Some((source, card)) = queue.pop_front() {
            let visibility = self
                .graph(&source)
                .and_then(|graph| graph.card(&card))
                .map(Card::visibility);
            if !seen.insert((source.clone(), card.clone(), visibility)) {
                continue;
            }
            for reader in self.readers_of(&source, Some(&card)) {
                let (relayed, changed) = self.refresh_reader(&reader, &source, Some(&card));
                batch.extend(relayed);
                queue.extend(changed.into_iter().map(|c| (reader.clone(), c)));
            }
        }
        batch
    }

    /// Names of the other graphs that read `source`, or one card of it.
    fn readers_of(&self, source: &str, card: Option<&CardId>) -> Vec<String> {
        let reads = |graph: &StoryPath| match card {
            Some(card) => graph.has_external_edge(source, card),
            None => graph
                .external_edges()
                .any(|(edge, _)| edge.story_path == source),
        };
        let mut readers = Vec::new();
        if self.current.id() != source && reads(&self.current) {
            readers.push(self.current.id().to_string());
        }
        let mut retained: Vec<&String> = self
            .retained
            .iter()
            .filter(|(id, graph)| id.as_str() != source && reads(*graph))
            .map(|(id, _)| id)
            .collect();
        retained.sort();
        readers.extend(retained.into_iter().cloned());
        readers
    }

    /// Re-evaluate the cards of `reader` that read `source`. Also returns
    /// the cards whose visibility changed.
    fn refresh_reader(
        &mut self,
        reader: &str,
        source: &str,
        card: Option<&CardId>,
    ) -> (ChangeBatch, Vec<CardId>) {
        if reader == self.current.id() {
            let before = visibilities(&self.current);
            let batch = self.current.refresh_external(source, card, &self.retained);
            return (batch, changed_since(&self.current, &before));
        }
        let Some(mut graph) = self.retained.remove(reader) else {
            return (ChangeBatch::default(), Vec::new());
        };
        let before = visibilities(&graph);
        let linked = StoryDocuments {
            current: &self.current,
            retained: &self.retained,
        };
        let batch = graph.refresh_external(source, card, &linked);
        let changed = changed_since(&graph, &before);
        self.retained.insert(reader.to_string(), graph);
        (batch, changed)
    }

    fn deliver(&mut self, batch: &ChangeBatch) {
        if let Some(sink) = self.sink.as_mut() {
            for event in &batch.events {
                sink.apply(event);
            }
        }
    }
}

fn visibilities(graph: &StoryPath) -> HashMap<CardId, Visibility> {
    graph
        .cards()
        .iter()
        .map(|card| (card.id().clone(), card.visibility()))
        .collect()
}

/// Cards of `graph` that are new or whose visibility differs from `before`.
fn changed_since(graph: &StoryPath, before: &HashMap<CardId, Visibility>) -> Vec<CardId> {
    graph
        .cards()
        .iter()
        .filter(|card| before.get(card.id()) != Some(&card.visibility()))
        .map(|card| card.id().clone())
        .collect()
}

/// A [`Story`] shared between tasks.
///
/// Mutations take the lock for their whole duration. Loading holds it only
/// to resolve the request and to link the result, never across the fetch.
#[derive(Clone)]
pub struct SharedStory {
    inner: Arc<Mutex<Story>>,
}

impl SharedStory {
    pub fn new(story: Story) -> Self {
        Self {
            inner: Arc::new(Mutex::new(story)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Story> {
        self.inner.lock().await
    }

    pub fn try_lock(&self) -> std::result::Result<MutexGuard<'_, Story>, TryLockError> {
        self.inner.try_lock()
    }

    pub async fn apply_field_change(
        &self,
        card: &str,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<ChangeBatch> {
        self.inner.lock().await.apply_field_change(card, field, value)
    }

    /// Load a dependency of the current story path.
    ///
    /// Dropping the returned future before it completes leaves the story
    /// exactly as it was.
    pub async fn load_dependency(
        &self,
        dependency_id: &str,
        source: &dyn DocumentSource,
    ) -> Result<ChangeBatch> {
        let request = self.inner.lock().await.dependency_request(dependency_id)?;
        let document = loader::fetch(source, &request).await?;
        self.inner.lock().await.link_dependency(&request, document)
    }
}
