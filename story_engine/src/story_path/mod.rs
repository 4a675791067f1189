//! Story path graphs.
//!
//! A [`StoryPath`] owns the cards of one document and the dependency edges
//! between them. Edges are derived from each card's declared conditions and
//! kept as id-keyed adjacency sets, so cards never point at each other:
//!
//! - `observers`: local card -> cards whose conditions read it
//! - `external`: (story path, card) in another or not-yet-present place ->
//!   the local cards that read it
//! - `text_observers`: local field -> cards whose text shows it through a
//!   placeholder
//!
//! Every edge change goes through `rewire`, which recomputes the
//! topological order and rejects cycles without touching the live graph.

mod propagation;
mod topology;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use story_model::{
    Card, CardId, CardKind, CardLookup, DependencySpec, FieldLookup, FieldRef, FieldValue,
    GraphId, ParsedDocument, Visibility,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::reference::{self, Resolver};

/// Action value of a headless card that asks for another story path.
pub const LOAD_ACTION: &str = "load";

/// A card in another story path, or a local one that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalEdge {
    pub story_path: String,
    pub card: CardId,
}

/// Other story paths a graph may read from.
pub trait LinkedDocuments {
    fn linked(&self, story_path: &str) -> Option<&StoryPath>;
}

/// No other story path is loaded.
pub struct NoLinks;

impl LinkedDocuments for NoLinks {
    fn linked(&self, _story_path: &str) -> Option<&StoryPath> {
        None
    }
}

impl LinkedDocuments for HashMap<String, StoryPath> {
    fn linked(&self, story_path: &str) -> Option<&StoryPath> {
        self.get(story_path)
    }
}

/// Lookup scope of one graph: its own cards plus whatever is linked.
pub struct Scope<'a> {
    graph: &'a StoryPath,
    linked: &'a dyn LinkedDocuments,
}

impl<'a> Scope<'a> {
    pub fn new(graph: &'a StoryPath, linked: &'a dyn LinkedDocuments) -> Self {
        Self { graph, linked }
    }

    pub fn graph(&self) -> &'a StoryPath {
        self.graph
    }

    /// The graph a reference's path segment names, if loaded.
    pub fn document(&self, story_path: Option<&str>) -> Option<&'a StoryPath> {
        match story_path {
            None => Some(self.graph),
            Some(path) if path == self.graph.id => Some(self.graph),
            Some(path) => self.linked.linked(path),
        }
    }
}

impl FieldLookup for Scope<'_> {
    fn lookup(&self, target: &FieldRef) -> CardLookup<'_> {
        let card = self
            .document(target.story_path.as_deref())
            .and_then(|graph| graph.card(&target.card));
        match card {
            Some(card) => CardLookup::Present {
                visibility: card.visibility(),
                value: card.raw_field(&target.field),
            },
            None => CardLookup::Absent,
        }
    }
}

/// The cards of one document and the edges between them.
#[derive(Debug)]
pub struct StoryPath {
    id: String,
    title: String,
    handle: GraphId,
    location: Option<PathBuf>,
    dependencies: Vec<DependencySpec>,

    cards: Vec<Card>,
    index: HashMap<CardId, usize>,

    observers: HashMap<CardId, BTreeSet<CardId>>,
    external: BTreeMap<ExternalEdge, BTreeSet<CardId>>,
    text_observers: HashMap<FieldRef, BTreeSet<CardId>>,
    rank: HashMap<CardId, usize>,

    diagnostics: BTreeMap<CardId, String>,
}

impl StoryPath {
    /// Build a graph from a parsed document and evaluate every card.
    ///
    /// All or nothing: a duplicate id, an invalid field, an unparsable
    /// condition or a cycle returns an error and no graph.
    pub fn build(document: ParsedDocument, linked: &dyn LinkedDocuments) -> Result<Self> {
        let mut graph = StoryPath {
            id: document.id.clone(),
            title: document.title.clone(),
            handle: GraphId::new(),
            location: document.location.clone(),
            dependencies: document.dependencies.clone(),
            cards: Vec::with_capacity(document.cards.len()),
            index: HashMap::new(),
            observers: HashMap::new(),
            external: BTreeMap::new(),
            text_observers: HashMap::new(),
            rank: HashMap::new(),
            diagnostics: BTreeMap::new(),
        };

        for spec in &document.cards {
            let mut card = Card::from_spec(spec)?;
            if graph.index.contains_key(card.id()) {
                return Err(EngineError::DuplicateCard {
                    story_path: graph.id.clone(),
                    card: card.id().clone(),
                });
            }
            card.attach(graph.handle);
            graph.index.insert(card.id().clone(), graph.cards.len());
            graph.cards.push(card);
        }

        graph.rewire()?;
        let order = graph.topological_order();
        graph.recompute(&order, linked);

        tracing::debug!(
            "built story path {} with {} cards, {} visible",
            graph.id,
            graph.cards.len(),
            graph.valid_cards().len()
        );
        Ok(graph)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Handle stored as the owner of this graph's cards.
    pub fn handle(&self) -> GraphId {
        self.handle
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }

    pub fn dependency(&self, dependency_id: &str) -> Option<&DependencySpec> {
        self.dependencies
            .iter()
            .find(|d| d.dependency_id == dependency_id)
    }

    /// File of a dependency, relative to where this document was loaded from.
    pub fn dependency_path(&self, dependency: &DependencySpec) -> PathBuf {
        dependency.path_from(self.location.as_deref())
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.index.get(id).map(|&i| &self.cards[i])
    }

    pub fn contains(&self, id: &CardId) -> bool {
        self.index.contains_key(id)
    }

    /// Visible, non-headless cards in document order.
    pub fn valid_cards(&self) -> Vec<&Card> {
        self.cards.iter().filter(|c| c.is_presented()).collect()
    }

    /// Position of a card among [`valid_cards`](Self::valid_cards).
    pub fn presented_position(&self, id: &CardId) -> Option<usize> {
        self.cards
            .iter()
            .filter(|c| c.is_presented())
            .position(|c| c.id() == id)
    }

    /// Cards in an order where every dependency precedes its dependents.
    pub fn topological_order(&self) -> Vec<CardId> {
        let mut order: Vec<CardId> = self.index.keys().cloned().collect();
        order.sort_by_key(|id| self.rank.get(id).copied().unwrap_or(usize::MAX));
        order
    }

    /// Local cards whose conditions read `id`.
    pub fn observers_of(&self, id: &CardId) -> impl Iterator<Item = &CardId> {
        self.observers.get(id).into_iter().flatten()
    }

    /// Edges into other story paths, or to local cards that are missing.
    pub fn external_edges(&self) -> impl Iterator<Item = (&ExternalEdge, &BTreeSet<CardId>)> {
        self.external.iter()
    }

    pub fn has_external_edge(&self, story_path: &str, card: &CardId) -> bool {
        self.external
            .keys()
            .any(|edge| edge.story_path == story_path && &edge.card == card)
    }

    /// Why a card is stuck pending, when its conditions could not be evaluated.
    pub fn diagnostic(&self, id: &CardId) -> Option<&str> {
        self.diagnostics.get(id).map(String::as_str)
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = (&CardId, &str)> {
        self.diagnostics.iter().map(|(id, reason)| (id, reason.as_str()))
    }

    /// Targets of visible headless cards asking to load another story path.
    pub fn load_requests(&self) -> Vec<String> {
        self.cards
            .iter()
            .filter_map(|card| self.load_target(card))
            .collect()
    }

    pub fn dirty_cards(&self) -> Vec<&Card> {
        self.cards.iter().filter(|c| c.is_dirty()).collect()
    }

    pub fn mark_clean(&mut self) {
        for card in &mut self.cards {
            card.mark_clean();
        }
    }

    /// Read a field, resolving placeholders if the field carries them.
    pub fn field(
        &self,
        card: &CardId,
        name: &str,
        linked: &dyn LinkedDocuments,
        config: &EngineConfig,
    ) -> Option<FieldValue> {
        let card = self.card(card)?;
        let value = card.raw_field(name)?;
        if !card.is_reference_bearing(name) {
            return Some(value.clone());
        }
        Some(Resolver::new(Scope::new(self, linked), config).resolve_value(value))
    }

    /// Resolve placeholders in arbitrary text against this graph.
    pub fn resolve(&self, text: &str, linked: &dyn LinkedDocuments, config: &EngineConfig) -> String {
        Resolver::new(Scope::new(self, linked), config).resolve(text)
    }

    /// Detach every card from this graph before it is dropped.
    pub fn teardown(&mut self) {
        for card in &mut self.cards {
            card.detach();
        }
        tracing::debug!("tore down story path {}", self.id);
    }

    fn load_target(&self, card: &Card) -> Option<String> {
        if card.kind() != CardKind::Logic || card.visibility() != Visibility::Visible {
            return None;
        }
        let action = card.raw_field("action")?.as_text()?;
        if !action.trim().eq_ignore_ascii_case(LOAD_ACTION) {
            return None;
        }
        let target = card.raw_field("target")?.as_text()?.trim();
        (!target.is_empty()).then(|| target.to_string())
    }

    fn position_of(&self, id: &CardId) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| EngineError::UnknownCard {
                story_path: self.id.clone(),
                card: id.clone(),
            })
    }

    fn reindex(&mut self) {
        self.index = self
            .cards
            .iter()
            .enumerate()
            .map(|(i, card)| (card.id().clone(), i))
            .collect();
    }

    /// Recompute every edge and the topological order from the cards.
    ///
    /// On a cycle nothing is replaced, so the previous edges stay valid for
    /// the caller to roll back to.
    fn rewire(&mut self) -> Result<()> {
        let mut observers: HashMap<CardId, BTreeSet<CardId>> = HashMap::new();
        let mut external: BTreeMap<ExternalEdge, BTreeSet<CardId>> = BTreeMap::new();

        for card in &self.cards {
            for condition in card.conditions() {
                for target in condition.targets() {
                    let target = target.normalized(&self.id);
                    if target.story_path.is_none() && self.index.contains_key(&target.card) {
                        observers
                            .entry(target.card.clone())
                            .or_default()
                            .insert(card.id().clone());
                    } else {
                        let edge = ExternalEdge {
                            story_path: target.story_path_or(&self.id).to_string(),
                            card: target.card.clone(),
                        };
                        external.entry(edge).or_default().insert(card.id().clone());
                    }
                }
            }
        }

        let order = topological_order_of(&self.cards, &observers)?;
        self.rank = order
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        self.observers = observers;
        self.external = external;

        self.text_observers.clear();
        for i in 0..self.cards.len() {
            self.index_text_references(i);
        }
        Ok(())
    }

    /// Record which local fields a card's placeholders show.
    fn index_text_references(&mut self, position: usize) {
        let card = &self.cards[position];
        let id = card.id().clone();
        let mut shown = BTreeSet::new();
        for (name, value) in card.fields() {
            if !card.is_reference_bearing(name) {
                continue;
            }
            let texts: Vec<&str> = match value {
                FieldValue::Text(text) => vec![text.as_str()],
                FieldValue::List(items) => items.iter().map(String::as_str).collect(),
                FieldValue::Media(_) => Vec::new(),
            };
            for text in texts {
                for target in reference::placeholders(text) {
                    let target = target.normalized(&self.id);
                    if target.story_path.is_none() {
                        shown.insert(target);
                    }
                }
            }
        }

        for readers in self.text_observers.values_mut() {
            readers.remove(&id);
        }
        self.text_observers.retain(|_, readers| !readers.is_empty());
        for target in shown {
            self.text_observers.entry(target).or_default().insert(id.clone());
        }
    }

    /// Re-evaluate `ids`, which must be in topological order.
    ///
    /// Returns each card whose visibility changed with its previous value.
    fn recompute(
        &mut self,
        ids: &[CardId],
        linked: &dyn LinkedDocuments,
    ) -> Vec<(CardId, Visibility)> {
        let mut transitions = Vec::new();
        for id in ids {
            let Some(&i) = self.index.get(id) else {
                continue;
            };
            let evaluation = self.cards[i].evaluate_visibility(&Scope::new(self, linked));
            match evaluation.error {
                Some(err) => {
                    tracing::warn!("card {} in {} stays pending: {}", id, self.id, err);
                    self.diagnostics.insert(id.clone(), err.to_string());
                }
                None => {
                    self.diagnostics.remove(id);
                }
            }
            let previous = self.cards[i].visibility();
            if previous != evaluation.visibility {
                self.cards[i].set_visibility(evaluation.visibility);
                transitions.push((id.clone(), previous));
            }
        }
        transitions
    }
}

fn topological_order_of(
    cards: &[Card],
    observers: &HashMap<CardId, BTreeSet<CardId>>,
) -> Result<Vec<CardId>> {
    topology::topological_order(cards, observers).map_err(|cards| {
        tracing::error!(
            "rejecting cyclic dependency between {}",
            cards.iter().map(CardId::as_str).collect::<Vec<_>>().join(", ")
        );
        EngineError::CyclicDependency { cards }
    })
}
