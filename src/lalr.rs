//! LALR(1) item-set construction and syntax-analysis table emission.
//!
//! Item sets are discovered breadth-first from the augmented root. Closure
//! records reduce rows, spreading records shift/goto transitions; a target
//! set that gains kernel items or lookaheads is re-enqueued so lookaheads
//! propagate to a fixpoint. Sets with the same advanced kernel core are
//! shared, which is what makes the construction LALR rather than canonical
//! LR(1).
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ahash::{AHashMap, AHashSet};

use crate::arena::{ObjectArena, ObjectId};
use crate::config::GeneratorConfig;
use crate::grammar::Grammar;
use crate::table::{Action, ActionConflict, ReduceData, SyntaxTable};
use crate::token::{EntryId, ProductionId};

/// An item: a production body with a dot position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Item {
    prod: ProductionId,
    body: u32,
    dot: u32,
}

type Lookaheads = AHashSet<ProductionId>;
type SetRef = ObjectId<ItemSet>;

/// One item set. `closed` is the closure-valid flag: any item or lookahead
/// change flips it off, and only closed sets participate in spreading.
#[derive(Debug)]
struct ItemSet {
    items: BTreeMap<Item, Lookaheads>,
    kernel: BTreeSet<Item>,
    closed: bool,
    entry: EntryId,
}

/// The error type for table construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Conflicting same-kind actions under one lookahead.
    #[error("grammar ambiguous: conflicting actions under lookahead {0:?}")]
    Ambiguous(String),
    /// A shift/reduce conflict that operator precedence cannot arbitrate.
    #[error("shift/reduce conflict on non-operator terminal {0:?}")]
    ShiftReduceConflict(String),
    /// The accept rewrite did not find the expected reduce action.
    #[error("internal error: accept rewrite found no reduce under end-of-input")]
    AcceptRewrite,
}

/// Build the syntax-analysis table for a closed grammar.
pub fn build(grammar: &Grammar, config: &GeneratorConfig) -> Result<SyntaxTable, BuildError> {
    let mut builder = LalrBuilder {
        grammar,
        sets: ObjectArena::new(),
        set_of_entry: Vec::new(),
        kernel_index: AHashMap::new(),
        table: SyntaxTable::new(grammar.callbacks().to_vec()),
    };
    let root_set = builder.new_set();
    let root_item = Item {
        prod: grammar.augmented_root(),
        body: 0,
        dot: 0,
    };
    let mut eof = Lookaheads::default();
    eof.insert(grammar.end());
    builder.add_lookaheads(root_set, root_item, &eof, true);

    let mut queue = VecDeque::from([root_set]);
    let mut queued: AHashSet<SetRef> = AHashSet::from_iter([root_set]);
    while let Some(set_id) = queue.pop_front() {
        queued.remove(&set_id);
        builder.closure(set_id)?;
        for target in builder.spread(set_id)? {
            if queued.insert(target) {
                queue.push_back(target);
            }
        }
    }
    log::debug!(
        "item-set construction finished: {} sets, {} table entries",
        builder.sets.len(),
        builder.table.len()
    );

    let root_entry = builder.set_entry(root_set);
    let accept_entry = builder
        .table
        .entry(root_entry)
        .goto(grammar.root())
        .ok_or(BuildError::AcceptRewrite)?;
    builder
        .table
        .entry_mut(accept_entry)
        .set_accept(grammar.end())
        .map_err(|_| BuildError::AcceptRewrite)?;

    let mut table = builder.table;
    table.root = root_entry;
    if config.compaction_enabled {
        let merged = table.merge_rows();
        log::debug!("table compaction merged {merged} entries");
    }
    Ok(table)
}

struct LalrBuilder<'g> {
    grammar: &'g Grammar,
    sets: ObjectArena<ItemSet>,
    set_of_entry: Vec<SetRef>,
    kernel_index: AHashMap<BTreeSet<Item>, SetRef>,
    table: SyntaxTable,
}

impl<'g> LalrBuilder<'g> {
    fn new_set(&mut self) -> SetRef {
        let entry = self.table.add_entry();
        let id = self.sets.insert(ItemSet {
            items: BTreeMap::new(),
            kernel: BTreeSet::new(),
            closed: false,
            entry,
        });
        debug_assert_eq!(self.set_of_entry.len(), entry.as_usize());
        self.set_of_entry.push(id);
        id
    }

    fn set_entry(&self, set_id: SetRef) -> EntryId {
        self.sets.get(set_id).expect("live item set").entry
    }

    /// Add an item (with lookaheads) to a set; reports whether anything
    /// changed and flips the closure-valid flag off when it did.
    fn add_lookaheads(
        &mut self,
        set_id: SetRef,
        item: Item,
        lookaheads: &Lookaheads,
        kernel: bool,
    ) -> bool {
        let set = self.sets.get_mut(set_id).expect("live item set");
        let existed = set.items.contains_key(&item);
        let slot = set.items.entry(item).or_default();
        let before = slot.len();
        slot.extend(lookaheads.iter().copied());
        if kernel {
            set.kernel.insert(item);
        }
        let changed = !existed || slot.len() != before;
        if changed {
            set.closed = false;
        }
        changed
    }

    /// Close a set: erase closure-derived items, re-derive them from the
    /// kernel, and record a reduce row for every reducible item's lookahead.
    fn closure(&mut self, set_id: SetRef) -> Result<(), BuildError> {
        let grammar = self.grammar;
        {
            let set = self.sets.get_mut(set_id).expect("live item set");
            if set.closed {
                return Ok(());
            }
            let ItemSet { items, kernel, .. } = set;
            items.retain(|item, _| kernel.contains(item));
        }
        let entry_id = self.set_entry(set_id);
        let mut worklist: VecDeque<Item> = self
            .sets
            .get(set_id)
            .expect("live item set")
            .items
            .keys()
            .copied()
            .collect();
        while let Some(item) = worklist.pop_front() {
            let lookaheads = self
                .sets
                .get(set_id)
                .expect("live item set")
                .items
                .get(&item)
                .cloned()
                .unwrap_or_default();
            let body = &grammar.bodies(item.prod)[item.body as usize];
            match body.symbols.get(item.dot as usize) {
                None => {
                    let reduce = ReduceData {
                        lhs: item.prod,
                        callback: body.callback,
                        body: body.symbols.clone(),
                    };
                    let mut sorted: Vec<ProductionId> = lookaheads.iter().copied().collect();
                    sorted.sort_unstable();
                    for lookahead in sorted {
                        let is_operator = grammar.is_operator(lookahead);
                        let result = self.table.entry_mut(entry_id).set_action(
                            lookahead,
                            Action::Reduce(reduce.clone()),
                            is_operator,
                        );
                        result.map_err(|conflict| self.decorate(conflict))?;
                    }
                }
                Some(&next) if grammar.is_nonterminal(next) => {
                    let follow = self.first(item.prod, item.body, item.dot + 1, &lookaheads);
                    for body_index in 0..grammar.bodies(next).len() {
                        let derived = Item {
                            prod: next,
                            body: body_index as u32,
                            dot: 0,
                        };
                        if self.add_lookaheads(set_id, derived, &follow, false) {
                            worklist.push_back(derived);
                        }
                    }
                    if grammar.nullable(next) {
                        let advanced = Item {
                            dot: item.dot + 1,
                            ..item
                        };
                        if self.add_lookaheads(set_id, advanced, &lookaheads, false) {
                            worklist.push_back(advanced);
                        }
                    }
                }
                Some(_) => {}
            }
        }
        self.sets.get_mut(set_id).expect("live item set").closed = true;
        Ok(())
    }

    /// FIRST of the body suffix starting at `dot`, with `tail` standing in
    /// for everything past the body end.
    fn first(
        &self,
        prod: ProductionId,
        body: u32,
        dot: u32,
        tail: &Lookaheads,
    ) -> Lookaheads {
        let grammar = self.grammar;
        let symbols = &grammar.bodies(prod)[body as usize].symbols;
        match symbols.get(dot as usize) {
            None => tail.clone(),
            Some(&symbol) if grammar.is_nonterminal(symbol) => {
                let mut out = Lookaheads::default();
                let mut visited = AHashSet::new();
                first_of_nonterminal(grammar, symbol, &mut visited, &mut out);
                if grammar.nullable(symbol) {
                    out.extend(self.first(prod, body, dot + 1, tail));
                }
                out
            }
            Some(&symbol) => Lookaheads::from_iter([symbol]),
        }
    }

    /// Record shift/goto transitions for every item with a symbol after the
    /// dot, sharing targets by advanced kernel core. Returns the targets
    /// that changed and need (re-)processing.
    fn spread(&mut self, set_id: SetRef) -> Result<Vec<SetRef>, BuildError> {
        let grammar = self.grammar;
        let entry_id = self.set_entry(set_id);
        let snapshot: Vec<(Item, Lookaheads)> = self
            .sets
            .get(set_id)
            .expect("live item set")
            .items
            .iter()
            .map(|(item, lookaheads)| (*item, lookaheads.clone()))
            .collect();
        let mut moves: BTreeMap<ProductionId, Vec<(Item, Lookaheads)>> = BTreeMap::new();
        for (item, lookaheads) in snapshot {
            let symbols = &grammar.bodies(item.prod)[item.body as usize].symbols;
            if symbols.get(item.dot as usize).is_some() {
                let next = symbols[item.dot as usize];
                let advanced = Item {
                    dot: item.dot + 1,
                    ..item
                };
                moves.entry(next).or_default().push((advanced, lookaheads));
            }
        }
        let mut changed_targets = Vec::new();
        for (symbol, advanced) in moves {
            let existing = if grammar.is_nonterminal(symbol) {
                self.table
                    .entry(entry_id)
                    .goto(symbol)
                    .map(|entry| self.set_of_entry[entry.as_usize()])
            } else {
                self.table
                    .entry(entry_id)
                    .action(symbol)
                    .and_then(|action| match action {
                        Action::Shift(next) | Action::ShiftReduce { next, .. } => {
                            Some(self.set_of_entry[next.as_usize()])
                        }
                        _ => None,
                    })
            };
            let (target, is_new) = match existing {
                Some(target) => (target, false),
                None => {
                    let core: BTreeSet<Item> = advanced.iter().map(|(item, _)| *item).collect();
                    match self.kernel_index.get(&core) {
                        Some(&shared) => (shared, false),
                        None => {
                            let fresh = self.new_set();
                            self.kernel_index.insert(core, fresh);
                            (fresh, true)
                        }
                    }
                }
            };
            let target_entry = self.set_entry(target);
            if grammar.is_nonterminal(symbol) {
                self.table.entry_mut(entry_id).set_goto(symbol, target_entry);
            } else {
                let result = self.table.entry_mut(entry_id).set_action(
                    symbol,
                    Action::Shift(target_entry),
                    grammar.is_operator(symbol),
                );
                result.map_err(|conflict| self.decorate(conflict))?;
            }
            let mut changed = is_new;
            for (item, lookaheads) in &advanced {
                changed |= self.add_lookaheads(target, *item, lookaheads, true);
            }
            if changed {
                changed_targets.push(target);
            }
        }
        Ok(changed_targets)
    }

    fn decorate(&self, conflict: ActionConflict) -> BuildError {
        match conflict {
            ActionConflict::Ambiguous(terminal) => {
                BuildError::Ambiguous(self.grammar.name(terminal).to_string())
            }
            ActionConflict::ShiftReduceOnNonOperator(terminal) => {
                BuildError::ShiftReduceConflict(self.grammar.name(terminal).to_string())
            }
            ActionConflict::NotAReduce(_) => BuildError::AcceptRewrite,
        }
    }
}

fn first_of_nonterminal(
    grammar: &Grammar,
    nonterminal: ProductionId,
    visited: &mut AHashSet<ProductionId>,
    out: &mut Lookaheads,
) {
    if !visited.insert(nonterminal) {
        return;
    }
    for body in grammar.bodies(nonterminal) {
        for &symbol in &body.symbols {
            if grammar.is_nonterminal(symbol) {
                first_of_nonterminal(grammar, symbol, visited, out);
                if !grammar.nullable(symbol) {
                    break;
                }
            } else {
                out.insert(symbol);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use crate::token::Assoc;

    fn expression_grammar() -> Grammar {
        let mut builder = GrammarBuilder::new();
        builder.add_terminal("ID", "[a-zA-Z]+", 0).unwrap();
        builder.add_terminal("NUM", "[0-9]+", 0).unwrap();
        builder
            .add_operator("+", Assoc::LeftToRight, 1, crate::grammar::OperatorKind::Binary)
            .unwrap();
        builder
            .add_operator("*", Assoc::LeftToRight, 2, crate::grammar::OperatorKind::Binary)
            .unwrap();
        builder.add_nonterminal("E", &["E", "\"+\"", "E"], "fold").unwrap();
        builder.add_nonterminal("E", &["E", "\"*\"", "E"], "fold").unwrap();
        builder.add_nonterminal("E", &["ID"], "leaf").unwrap();
        builder.add_nonterminal("E", &["NUM"], "leaf").unwrap();
        builder.finish("E").unwrap()
    }

    #[test]
    fn closure_is_idempotent() {
        let grammar = expression_grammar();
        let mut builder = LalrBuilder {
            grammar: &grammar,
            sets: ObjectArena::new(),
            set_of_entry: Vec::new(),
            kernel_index: AHashMap::new(),
            table: SyntaxTable::new(grammar.callbacks().to_vec()),
        };
        let root = builder.new_set();
        let mut eof = Lookaheads::default();
        eof.insert(grammar.end());
        builder.add_lookaheads(
            root,
            Item {
                prod: grammar.augmented_root(),
                body: 0,
                dot: 0,
            },
            &eof,
            true,
        );
        builder.closure(root).unwrap();
        let first_pass: Vec<(Item, Vec<ProductionId>)> = builder
            .sets
            .get(root)
            .unwrap()
            .items
            .iter()
            .map(|(item, la)| {
                let mut sorted: Vec<_> = la.iter().copied().collect();
                sorted.sort_unstable();
                (*item, sorted)
            })
            .collect();
        // force a recomputation from the kernel
        builder.sets.get_mut(root).unwrap().closed = false;
        builder.closure(root).unwrap();
        let second_pass: Vec<(Item, Vec<ProductionId>)> = builder
            .sets
            .get(root)
            .unwrap()
            .items
            .iter()
            .map(|(item, la)| {
                let mut sorted: Vec<_> = la.iter().copied().collect();
                sorted.sort_unstable();
                (*item, sorted)
            })
            .collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn operator_conflicts_build_shift_reduce_pairs() {
        let grammar = expression_grammar();
        let table = build(&grammar, &GeneratorConfig::default()).unwrap();
        let mut pairs = 0usize;
        for index in 0..table.len() {
            for (terminal, action) in table.entry(EntryId(index as u32)).actions() {
                if matches!(action, Action::ShiftReduce { .. }) {
                    assert!(grammar.is_operator(terminal));
                    pairs += 1;
                }
            }
        }
        assert!(pairs > 0, "E -> E op E grammars need shift/reduce pairs");
    }

    #[test]
    fn non_operator_shift_reduce_is_fatal() {
        // S -> S x | x with a plain terminal is fine (no conflict);
        // S -> S S | x forces a shift/reduce on a non-operator.
        let mut builder = GrammarBuilder::new();
        builder.add_terminal("X", "x", 0).unwrap();
        builder.add_nonterminal("S", &["S", "S"], "cb").unwrap();
        builder.add_nonterminal("S", &["X"], "cb").unwrap();
        let grammar = builder.finish("S").unwrap();
        assert_eq!(
            build(&grammar, &GeneratorConfig::default()),
            Err(BuildError::ShiftReduceConflict("X".to_string()))
        );
    }

    #[test]
    fn compaction_only_shrinks_the_table() {
        let grammar = expression_grammar();
        let plain = build(
            &grammar,
            &GeneratorConfig {
                compaction_enabled: false,
                ..GeneratorConfig::default()
            },
        )
        .unwrap();
        let compact = build(&grammar, &GeneratorConfig::default()).unwrap();
        assert!(compact.len() <= plain.len());
    }

    #[test]
    fn construction_is_deterministic() {
        let grammar = expression_grammar();
        let one = build(&grammar, &GeneratorConfig::default()).unwrap();
        let two = build(&grammar, &GeneratorConfig::default()).unwrap();
        assert_eq!(one, two);
    }
}
