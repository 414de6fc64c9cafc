//! The syntax-analysis table: entries, actions, conflict resolution and
//! post-generation row merging.
//!
//! Actions are a tagged sum; the shift/reduce pair that operator grammars
//! need at one lookahead is its own variant rather than two entries, and
//! [`Action::is_same_or_part`] compares either half against a plain action.
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::token::{CallbackId, EntryId, ProductionId};

/// Everything a reduce dispatch needs: the produced nonterminal, the callback
/// to invoke, and a copy of the body for the frame-matching pop loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceData {
    /// The nonterminal the body reduces to.
    pub lhs: ProductionId,
    /// The reduction callback; only the augmented start production has none.
    pub callback: Option<CallbackId>,
    /// The body symbols in writing order.
    pub body: Vec<ProductionId>,
}

/// One action of a table entry under a terminal lookahead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Consume the token and move to the entry.
    Shift(EntryId),
    /// Complete a body.
    Reduce(ReduceData),
    /// Both are possible; the runtime arbitrates by operator precedence.
    ShiftReduce {
        /// The shift half's target entry.
        next: EntryId,
        /// The reduce half.
        reduce: ReduceData,
    },
    /// The input is a complete phrase of the root production.
    Accept,
}

impl Action {
    /// Whether `other` equals this action, or equals one half of this
    /// shift/reduce pair.
    pub fn is_same_or_part(&self, other: &Action) -> bool {
        match (self, other) {
            (Action::ShiftReduce { next, .. }, Action::Shift(other_next)) => next == other_next,
            (Action::ShiftReduce { reduce, .. }, Action::Reduce(other_reduce)) => {
                reduce == other_reduce
            }
            _ => self == other,
        }
    }
}

/// A conflict detected while installing an action. Carries ids; callers
/// decorate them with production names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActionConflict {
    /// Two same-kind actions disagree under one lookahead.
    #[error("conflicting actions under lookahead {0:?}")]
    Ambiguous(ProductionId),
    /// A shift/reduce pair on a terminal that carries no precedence.
    #[error("shift/reduce conflict on non-operator terminal {0:?}")]
    ShiftReduceOnNonOperator(ProductionId),
    /// The accept rewrite expected a reduce action.
    #[error("accept rewrite found no reduce action under {0:?}")]
    NotAReduce(ProductionId),
}

/// One table entry: terminal actions plus nonterminal gotos.
///
/// Both maps are ordered so the serialized artifact is bit-stable across
/// runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyntaxTableEntry {
    actions: BTreeMap<ProductionId, Action>,
    gotos: BTreeMap<ProductionId, EntryId>,
}

impl SyntaxTableEntry {
    /// The action under a terminal lookahead, if any.
    pub fn action(&self, terminal: ProductionId) -> Option<&Action> {
        self.actions.get(&terminal)
    }

    /// The goto target after shifting a nonterminal, if any.
    pub fn goto(&self, nonterminal: ProductionId) -> Option<EntryId> {
        self.gotos.get(&nonterminal).copied()
    }

    /// All terminal actions in id order.
    pub fn actions(&self) -> impl Iterator<Item = (ProductionId, &Action)> {
        self.actions.iter().map(|(&id, action)| (id, action))
    }

    /// All nonterminal gotos in id order.
    pub fn gotos(&self) -> impl Iterator<Item = (ProductionId, EntryId)> + use<'_> {
        self.gotos.iter().map(|(&id, &entry)| (id, entry))
    }

    /// Install an action under a terminal, resolving against whatever is
    /// already present.
    ///
    /// Same-kind repeats must be identical. A shift meeting a reduce (either
    /// order) combines into [`Action::ShiftReduce`] when the terminal is an
    /// operator and is fatal otherwise. An existing pair accepts a matching
    /// half and rejects anything else.
    pub(crate) fn set_action(
        &mut self,
        terminal: ProductionId,
        action: Action,
        is_operator: bool,
    ) -> Result<(), ActionConflict> {
        match self.actions.entry(terminal) {
            Entry::Vacant(vacant) => {
                vacant.insert(action);
                Ok(())
            }
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                let replacement = match (&*existing, action) {
                    (Action::Shift(a), Action::Shift(b)) => {
                        if *a == b {
                            None
                        } else {
                            return Err(ActionConflict::Ambiguous(terminal));
                        }
                    }
                    (Action::Reduce(r), Action::Reduce(incoming)) => {
                        if *r == incoming {
                            None
                        } else {
                            return Err(ActionConflict::Ambiguous(terminal));
                        }
                    }
                    (Action::Shift(a), Action::Reduce(incoming)) => {
                        if is_operator {
                            Some(Action::ShiftReduce {
                                next: *a,
                                reduce: incoming,
                            })
                        } else {
                            return Err(ActionConflict::ShiftReduceOnNonOperator(terminal));
                        }
                    }
                    (Action::Reduce(r), Action::Shift(next)) => {
                        if is_operator {
                            Some(Action::ShiftReduce {
                                next,
                                reduce: r.clone(),
                            })
                        } else {
                            return Err(ActionConflict::ShiftReduceOnNonOperator(terminal));
                        }
                    }
                    (pair @ Action::ShiftReduce { .. }, incoming) => {
                        if pair.is_same_or_part(&incoming) {
                            None
                        } else {
                            return Err(ActionConflict::Ambiguous(terminal));
                        }
                    }
                    _ => return Err(ActionConflict::Ambiguous(terminal)),
                };
                if let Some(new_action) = replacement {
                    *existing = new_action;
                }
                Ok(())
            }
        }
    }

    /// Record the goto target after shifting a nonterminal.
    pub(crate) fn set_goto(&mut self, nonterminal: ProductionId, target: EntryId) {
        self.gotos.insert(nonterminal, target);
    }

    /// Rewrite the reduce under `terminal` into the accept action.
    pub(crate) fn set_accept(&mut self, terminal: ProductionId) -> Result<(), ActionConflict> {
        match self.actions.get_mut(&terminal) {
            Some(slot @ Action::Reduce(_)) => {
                *slot = Action::Accept;
                Ok(())
            }
            _ => Err(ActionConflict::NotAReduce(terminal)),
        }
    }

    fn remap(&mut self, map: &AHashMap<EntryId, EntryId>) {
        for action in self.actions.values_mut() {
            match action {
                Action::Shift(next) | Action::ShiftReduce { next, .. } => {
                    *next = map[next];
                }
                Action::Reduce(_) | Action::Accept => {}
            }
        }
        for target in self.gotos.values_mut() {
            *target = map[target];
        }
    }
}

/// The serialized syntax-analysis table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxTable {
    /// The entry active before the first shift.
    pub root: EntryId,
    entries: Vec<SyntaxTableEntry>,
    /// Callback type tags, indexed by [`CallbackId`]; resolved to objects at
    /// load time.
    pub callbacks: Vec<String>,
}

impl SyntaxTable {
    pub(crate) fn new(callbacks: Vec<String>) -> Self {
        SyntaxTable {
            root: EntryId(0),
            entries: Vec::new(),
            callbacks,
        }
    }

    pub(crate) fn add_entry(&mut self) -> EntryId {
        let id = EntryId(self.entries.len() as u32);
        self.entries.push(SyntaxTableEntry::default());
        id
    }

    /// Look up an entry.
    pub fn entry(&self, id: EntryId) -> &SyntaxTableEntry {
        &self.entries[id.as_usize()]
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> &mut SyntaxTableEntry {
        &mut self.entries[id.as_usize()]
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the table in a readable form, with production names resolved
    /// through the grammar that generated it. Intended for grammar debugging.
    pub fn display_form(&self, grammar: &crate::grammar::Grammar) -> String {
        let mut out = String::new();
        out.push_str(&format!("root: {}\n", self.root.0));
        for (index, entry) in self.entries.iter().enumerate() {
            out.push_str(&format!("entry {index}:\n"));
            for (terminal, action) in entry.actions() {
                let name = grammar.display_form(terminal);
                match action {
                    Action::Shift(next) => {
                        out.push_str(&format!("  {name} -> shift {}\n", next.0));
                    }
                    Action::Reduce(reduce) => {
                        out.push_str(&format!(
                            "  {name} -> reduce {} ({} symbols)\n",
                            grammar.display_form(reduce.lhs),
                            reduce.body.len()
                        ));
                    }
                    Action::ShiftReduce { next, reduce } => {
                        out.push_str(&format!(
                            "  {name} -> shift {} / reduce {} ({} symbols)\n",
                            next.0,
                            grammar.display_form(reduce.lhs),
                            reduce.body.len()
                        ));
                    }
                    Action::Accept => {
                        out.push_str(&format!("  {name} -> accept\n"));
                    }
                }
            }
            for (nonterminal, target) in entry.gotos() {
                out.push_str(&format!(
                    "  {} => goto {}\n",
                    grammar.display_form(nonterminal),
                    target.0
                ));
            }
        }
        out
    }

    /// Merge equivalent entries and compact the table.
    ///
    /// Entries are bucketed by equality of all terminal actions, each bucket
    /// refined by equality of all nonterminal gotos; every bucket keeps its
    /// lowest-id member, survivors are compacted to a dense prefix, and all
    /// shift/goto targets (and the root) are remapped. Returns the number of
    /// entries merged away.
    pub fn merge_rows(&mut self) -> usize {
        let n = self.entries.len();
        let mut buckets: Vec<Vec<usize>> = Vec::new();
        for index in 0..n {
            let found = buckets
                .iter_mut()
                .find(|bucket| self.entries[bucket[0]].actions == self.entries[index].actions);
            match found {
                Some(bucket) => bucket.push(index),
                None => buckets.push(vec![index]),
            }
        }
        let mut final_buckets: Vec<Vec<usize>> = Vec::new();
        for bucket in buckets {
            let mut refined: Vec<Vec<usize>> = Vec::new();
            for index in bucket {
                let found = refined
                    .iter_mut()
                    .find(|sub| self.entries[sub[0]].gotos == self.entries[index].gotos);
                match found {
                    Some(sub) => sub.push(index),
                    None => refined.push(vec![index]),
                }
            }
            final_buckets.extend(refined);
        }
        let mut keep = vec![false; n];
        let mut target_of = vec![0usize; n];
        for bucket in &final_buckets {
            // first member is the lowest id: buckets form in id order
            let kept = bucket[0];
            keep[kept] = true;
            for &member in bucket {
                target_of[member] = kept;
            }
        }
        let mut dense = vec![0u32; n];
        let mut next = 0u32;
        for index in 0..n {
            if keep[index] {
                dense[index] = next;
                next += 1;
            }
        }
        let map: AHashMap<EntryId, EntryId> = (0..n)
            .map(|index| {
                (
                    EntryId(index as u32),
                    EntryId(dense[target_of[index]]),
                )
            })
            .collect();
        let old = std::mem::take(&mut self.entries);
        for (index, entry) in old.into_iter().enumerate() {
            if keep[index] {
                self.entries.push(entry);
            }
        }
        for entry in &mut self.entries {
            entry.remap(&map);
        }
        self.root = map[&self.root];
        n - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduce(lhs: u32) -> ReduceData {
        ReduceData {
            lhs: ProductionId(lhs),
            callback: Some(CallbackId(0)),
            body: vec![ProductionId(1)],
        }
    }

    #[test]
    fn shift_and_reduce_combine_on_operators_only() {
        let terminal = ProductionId(7);
        let mut entry = SyntaxTableEntry::default();
        entry
            .set_action(terminal, Action::Shift(EntryId(1)), true)
            .unwrap();
        entry
            .set_action(terminal, Action::Reduce(reduce(2)), true)
            .unwrap();
        assert!(matches!(
            entry.action(terminal),
            Some(Action::ShiftReduce { next, reduce: r }) if *next == EntryId(1) && r.lhs == ProductionId(2)
        ));
        // identical halves are accepted, a different reduce is not
        entry
            .set_action(terminal, Action::Shift(EntryId(1)), true)
            .unwrap();
        assert_eq!(
            entry.set_action(terminal, Action::Reduce(reduce(3)), true),
            Err(ActionConflict::Ambiguous(terminal))
        );

        let mut plain = SyntaxTableEntry::default();
        plain
            .set_action(terminal, Action::Shift(EntryId(1)), false)
            .unwrap();
        assert_eq!(
            plain.set_action(terminal, Action::Reduce(reduce(2)), false),
            Err(ActionConflict::ShiftReduceOnNonOperator(terminal))
        );
    }

    #[test]
    fn merge_rows_compacts_and_remaps() {
        let mut table = SyntaxTable::new(vec!["cb".to_string()]);
        let a = table.add_entry();
        let b = table.add_entry();
        let c = table.add_entry();
        let terminal = ProductionId(5);
        // a shifts to b; b and c are identical (both shift to c)
        table
            .entry_mut(a)
            .set_action(terminal, Action::Shift(b), false)
            .unwrap();
        table
            .entry_mut(b)
            .set_action(terminal, Action::Shift(c), false)
            .unwrap();
        table
            .entry_mut(c)
            .set_action(terminal, Action::Shift(c), false)
            .unwrap();
        table.root = a;
        let merged = table.merge_rows();
        assert_eq!(merged, 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.root, EntryId(0));
        // a's shift now targets the merged survivor, which self-loops
        let Some(Action::Shift(target)) = table.entry(EntryId(0)).action(terminal) else {
            panic!("expected a shift");
        };
        let Some(Action::Shift(self_loop)) = table.entry(*target).action(terminal) else {
            panic!("expected a shift");
        };
        assert_eq!(self_loop, target);
    }
}
