//! Topological ordering of a story path's intra-document edges.

use std::collections::{BTreeSet, HashMap};

use story_model::{Card, CardId};

/// Order cards so every dependency comes before its dependents.
///
/// `observers` maps a card to the cards whose conditions read it. Among
/// cards that are ready at the same time, document order wins, so the result
/// is deterministic. On a cycle, returns the ids of the cards that lie on
/// one, in document order.
pub(crate) fn topological_order(
    cards: &[Card],
    observers: &HashMap<CardId, BTreeSet<CardId>>,
) -> Result<Vec<CardId>, Vec<CardId>> {
    let position: HashMap<&CardId, usize> = cards
        .iter()
        .enumerate()
        .map(|(i, card)| (card.id(), i))
        .collect();

    let mut in_degree = vec![0usize; cards.len()];
    for dependents in observers.values() {
        for dependent in dependents {
            if let Some(&i) = position.get(dependent) {
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| i)
        .collect();

    let mut ordered = Vec::with_capacity(cards.len());
    while let Some(next) = ready.pop_first() {
        let id = cards[next].id();
        ordered.push(id.clone());
        for dependent in observers.get(id).into_iter().flatten() {
            let Some(&i) = position.get(dependent) else {
                continue;
            };
            in_degree[i] = in_degree[i].saturating_sub(1);
            if in_degree[i] == 0 {
                ready.insert(i);
            }
        }
    }

    if ordered.len() == cards.len() {
        return Ok(ordered);
    }

    // Left over: cards on a cycle plus cards downstream of one. Peel off
    // the downstream ones, which nothing left over reads.
    let mut remaining: BTreeSet<usize> = (0..cards.len())
        .filter(|i| in_degree[*i] > 0)
        .collect();
    loop {
        let leaves: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|i| {
                observers
                    .get(cards[*i].id())
                    .into_iter()
                    .flatten()
                    .filter_map(|dependent| position.get(dependent))
                    .all(|j| !remaining.contains(j))
            })
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            remaining.remove(&leaf);
        }
    }

    Err(remaining.into_iter().map(|i| cards[i].id().clone()).collect())
}
