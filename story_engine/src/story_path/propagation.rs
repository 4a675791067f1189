//! Reactive propagation: field writes, card insertion and removal.
//!
//! A mutation re-evaluates only the transitive closure of observers of what
//! changed, in topological order, then diffs the presented card list into
//! ordered [`ChangeEvent`]s.

use std::collections::{BTreeSet, HashMap, VecDeque};

use story_model::{Card, CardId, CardSpec, FieldRef, FieldValue, ParsedDocument, Visibility};

use super::{LinkedDocuments, StoryPath};
use crate::error::{EngineError, Result};
use crate::events::{ChangeBatch, ChangeEvent, ChangeKind};

impl StoryPath {
    /// Write a field and propagate the consequences through this graph.
    ///
    /// A rejected write changes nothing. Writing the value a field already
    /// holds marks the card dirty and produces no events.
    pub fn apply_field_change(
        &mut self,
        card: &CardId,
        field: &str,
        value: FieldValue,
        linked: &dyn LinkedDocuments,
    ) -> Result<ChangeBatch> {
        let position = self.position_of(card)?;
        let before = self.presented();
        if !self.cards[position].set_field(field, value)? {
            return Ok(ChangeBatch::default());
        }
        if self.cards[position].is_reference_bearing(field) {
            self.index_text_references(position);
        }

        let affected = self.closure([card.clone()], false);
        let transitions = self.recompute(&affected, linked);

        let mut touched = BTreeSet::from([card.clone()]);
        if let Some(readers) = self.text_observers.get(&FieldRef::local(card.clone(), field)) {
            touched.extend(readers.iter().cloned());
        }

        let batch = self.batch(before, &transitions, touched);
        tracing::debug!(
            "{}::{}::{} changed: {} re-evaluated, {} events",
            self.id,
            card,
            field,
            affected.len(),
            batch.events.len()
        );
        Ok(batch)
    }

    /// Insert a card after `after`, or at the end.
    ///
    /// The card is validated and wired in; a card that would close a cycle
    /// is refused and the graph is left as it was.
    pub fn insert_card(
        &mut self,
        spec: &CardSpec,
        after: Option<&CardId>,
        linked: &dyn LinkedDocuments,
    ) -> Result<ChangeBatch> {
        let mut card = Card::from_spec(spec)?;
        let id = card.id().clone();
        if self.contains(&id) {
            return Err(EngineError::DuplicateCard {
                story_path: self.id.clone(),
                card: id,
            });
        }
        let position = match after {
            Some(after) => self.position_of(after)? + 1,
            None => self.cards.len(),
        };

        let before = self.presented();
        card.attach(self.handle);
        self.cards.insert(position, card);
        self.reindex();
        if let Err(err) = self.rewire() {
            self.cards.remove(position);
            self.reindex();
            return Err(err);
        }

        let affected = self.closure([id.clone()], true);
        let transitions = self.recompute(&affected, linked);
        tracing::debug!("inserted card {} into {} at {}", id, self.id, position);
        Ok(self.batch(before, &transitions, BTreeSet::new()))
    }

    /// Remove a card; cards that read it become pending.
    pub fn remove_card(&mut self, id: &CardId, linked: &dyn LinkedDocuments) -> Result<ChangeBatch> {
        let position = self.position_of(id)?;
        let before = self.presented();
        let old_order = self.index.clone();
        let readers: Vec<CardId> = self.observers_of(id).cloned().collect();

        let mut removed = self.cards.remove(position);
        removed.detach();
        self.reindex();
        self.diagnostics.remove(id);
        self.rewire()?;

        let affected = self.closure(readers, true);
        let transitions = self.recompute(&affected, linked);

        let mut candidates: BTreeSet<CardId> =
            transitions.iter().map(|(id, _)| id.clone()).collect();
        candidates.insert(id.clone());
        let events = self.diff(before, candidates, &BTreeSet::new(), |c| {
            old_order.get(c).copied().unwrap_or(usize::MAX)
        });
        tracing::debug!("removed card {} from {}", id, self.id);
        Ok(ChangeBatch {
            events,
            load_requests: self.triggered_loads(&transitions),
        })
    }

    /// Re-evaluate the cards that read `story_path`, or one card in it.
    ///
    /// Called when another story path is linked, replaced or changed.
    pub fn refresh_external(
        &mut self,
        story_path: &str,
        card: Option<&CardId>,
        linked: &dyn LinkedDocuments,
    ) -> ChangeBatch {
        let seeds: BTreeSet<CardId> = self
            .external
            .iter()
            .filter(|(edge, _)| {
                edge.story_path == story_path && card.map_or(true, |c| &edge.card == c)
            })
            .flat_map(|(_, readers)| readers.iter().cloned())
            .collect();
        if seeds.is_empty() {
            return ChangeBatch::default();
        }

        let before = self.presented();
        let affected = self.closure(seeds, true);
        let transitions = self.recompute(&affected, linked);
        self.batch(before, &transitions, BTreeSet::new())
    }

    /// Take title and content fields from a fresh copy of this document.
    ///
    /// Cards are matched by id; user data, conditions and visibility stay.
    pub fn refresh_content(
        &mut self,
        fresh: &ParsedDocument,
        linked: &dyn LinkedDocuments,
    ) -> Result<ChangeBatch> {
        if fresh.id != self.id {
            tracing::warn!(
                "refreshing story path {} from document {}",
                self.id,
                fresh.id
            );
        }
        let before = self.presented();
        let mut touched = BTreeSet::new();
        for spec in &fresh.cards {
            let incoming = Card::from_spec(spec)?;
            let Some(&position) = self.index.get(incoming.id()) else {
                continue;
            };
            if self.cards[position].copy_fields_from(&incoming) {
                self.index_text_references(position);
                touched.insert(incoming.id().clone());
            }
        }

        let affected = self.closure(touched.iter().cloned(), false);
        let transitions = self.recompute(&affected, linked);
        Ok(self.batch(before, &transitions, touched))
    }

    /// Observers reachable from `seeds`, sorted topologically.
    fn closure(&self, seeds: impl IntoIterator<Item = CardId>, include_seeds: bool) -> Vec<CardId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if include_seeds {
                seen.insert(seed.clone());
            }
            queue.push_back(seed);
        }
        while let Some(id) = queue.pop_front() {
            for reader in self.observers_of(&id) {
                if seen.insert(reader.clone()) {
                    queue.push_back(reader.clone());
                }
            }
        }
        let mut affected: Vec<CardId> = seen.into_iter().collect();
        affected.sort_by_key(|id| self.rank.get(id).copied().unwrap_or(usize::MAX));
        affected
    }

    fn presented(&self) -> Vec<CardId> {
        self.cards
            .iter()
            .filter(|c| c.is_presented())
            .map(|c| c.id().clone())
            .collect()
    }

    fn batch(
        &self,
        before: Vec<CardId>,
        transitions: &[(CardId, Visibility)],
        touched: BTreeSet<CardId>,
    ) -> ChangeBatch {
        let mut candidates: BTreeSet<CardId> =
            transitions.iter().map(|(id, _)| id.clone()).collect();
        candidates.extend(touched.iter().cloned());
        let index: &HashMap<CardId, usize> = &self.index;
        let events = self.diff(before, candidates, &touched, |c| {
            index.get(c).copied().unwrap_or(usize::MAX)
        });
        ChangeBatch {
            events,
            load_requests: self.triggered_loads(transitions),
        }
    }

    /// Turn changed cards into events against the presented list `before`.
    ///
    /// Candidates are visited in document order and each event is applied
    /// to a running copy of the list, so positions hold when a host replays
    /// the events one after another.
    fn diff(
        &self,
        before: Vec<CardId>,
        candidates: BTreeSet<CardId>,
        touched: &BTreeSet<CardId>,
        order: impl Fn(&CardId) -> usize,
    ) -> Vec<ChangeEvent> {
        let mut candidates: Vec<CardId> = candidates.into_iter().collect();
        candidates.sort_by_key(|id| order(id));

        let mut shown = before;
        let mut events = Vec::new();
        for id in candidates {
            let was = shown.iter().position(|s| s == &id);
            let now = self.card(&id).is_some_and(Card::is_presented);
            let change = match (was, now) {
                (Some(position), false) => {
                    shown.remove(position);
                    Some((ChangeKind::Removed, position))
                }
                (None, true) => {
                    let key = order(&id);
                    let position = shown.iter().take_while(|s| order(*s) < key).count();
                    shown.insert(position, id.clone());
                    Some((ChangeKind::Added, position))
                }
                (Some(position), true) if touched.contains(&id) => {
                    Some((ChangeKind::Updated, position))
                }
                _ => None,
            };
            if let Some((kind, position)) = change {
                events.push(ChangeEvent {
                    kind,
                    story_path: self.id.clone(),
                    card: id,
                    position,
                });
            }
        }
        events
    }

    /// Load targets of headless cards that just became visible.
    fn triggered_loads(&self, transitions: &[(CardId, Visibility)]) -> Vec<String> {
        let mut requests: Vec<String> = Vec::new();
        for (id, _) in transitions {
            if let Some(target) = self.card(id).and_then(|card| self.load_target(card)) {
                if !requests.contains(&target) {
                    requests.push(target);
                }
            }
        }
        requests
    }
}
