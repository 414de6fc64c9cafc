//! Thompson NFA construction over the 8-bit alphabet.
//!
//! Every token pattern contributes a head/tail pair ε-linked from the global
//! start node; the tail carries the token's accept tag. Nodes live in an
//! [`AliasArena`] because the ε-merge optimization fuses nodes while outside
//! handles (transition targets of other nodes) keep resolving.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ahash::{AHashMap, AHashSet};
use fixedbitset_stack::FixedBitSet;

use crate::arena::{AliasArena, AliasId, ObjectId};
use crate::regex::{Pattern, RepeatKind};
use crate::token::ProductionId;

/// A handle to an NFA node. Survives merges.
pub type NfaStateId = AliasId<NfaState>;

/// A subset of NFA nodes, as a bitset over alias ids.
pub type StateSet = FixedBitSet;

/// One NFA node.
///
/// Invariant: at most one target per input byte; construction routes through
/// a fresh ε-linked node whenever a byte would get a second target.
#[derive(Debug, Clone, Default)]
pub struct NfaState {
    transitions: BTreeMap<u8, NfaStateId>,
    epsilon: BTreeSet<NfaStateId>,
}

impl NfaState {
    /// The byte-labelled transitions of this node.
    pub fn transitions(&self) -> &BTreeMap<u8, NfaStateId> {
        &self.transitions
    }

    /// The ε-transitions of this node.
    pub fn epsilon(&self) -> &BTreeSet<NfaStateId> {
        &self.epsilon
    }
}

/// The accept tag of a token pattern: which production it lexes, and its
/// lexing priority for overlap tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AcceptTag {
    /// The terminal or operator production the lexeme shifts as.
    pub token: ProductionId,
    /// Lexing priority; the highest-priority tag of a subset wins.
    pub priority: u32,
}

/// The error type for NFA construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NfaError {
    /// A token was declared with an empty lexeme.
    #[error("token {0:?} has an empty lexeme")]
    EmptyLexeme(ProductionId),
    /// Two distinct tokens accept the same input at the same priority.
    #[error("tokens {first:?} and {second:?} accept the same lexeme at equal priority {priority}")]
    AcceptTie {
        /// The earlier-registered token.
        first: ProductionId,
        /// The later-registered token.
        second: ProductionId,
        /// The shared priority.
        priority: u32,
    },
}

/// Builds a Thompson NFA from literal lexemes and parsed patterns.
pub struct NfaBuilder {
    states: AliasArena<NfaState>,
    accepts: AHashMap<ObjectId<NfaState>, AcceptTag>,
    start: NfaStateId,
}

impl std::fmt::Debug for NfaBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfaBuilder")
            .field("start", &self.start)
            .field("nodes", &self.states.len())
            .field(
                "accepts",
                &crate::utils::get_deterministic_display_form_from_hash_map(
                    &self.accepts,
                    |(slot, tag)| (*slot, *tag),
                ),
            )
            .finish()
    }
}

impl Default for NfaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NfaBuilder {
    /// Create a builder holding only the global start node.
    pub fn new() -> Self {
        let mut states = AliasArena::new();
        let start = states.insert(NfaState::default());
        NfaBuilder {
            states,
            accepts: AHashMap::new(),
            start,
        }
    }

    /// The global start node.
    pub fn start(&self) -> NfaStateId {
        self.start
    }

    /// Upper bound of alias ids, for sizing state subsets.
    pub fn alias_bound(&self) -> usize {
        self.states.alias_bound()
    }

    /// The storage slot currently behind a handle.
    pub fn slot_of(&self, id: NfaStateId) -> Option<ObjectId<NfaState>> {
        self.states.slot_of(id)
    }

    /// Look at a node.
    pub fn state(&self, id: NfaStateId) -> Option<&NfaState> {
        self.states.get(id)
    }

    fn node(&self, id: NfaStateId) -> &NfaState {
        self.states.get(id).expect("NFA handle outlived its node")
    }

    fn node_mut(&mut self, id: NfaStateId) -> &mut NfaState {
        self.states.get_mut(id).expect("NFA handle outlived its node")
    }

    fn new_state(&mut self) -> NfaStateId {
        self.states.insert(NfaState::default())
    }

    /// Add a literal lexeme as a linear chain of byte transitions.
    ///
    /// Returns the chain's head and accepting tail.
    pub fn add_literal(
        &mut self,
        lexeme: &[u8],
        tag: AcceptTag,
    ) -> Result<(NfaStateId, NfaStateId), NfaError> {
        if lexeme.is_empty() {
            return Err(NfaError::EmptyLexeme(tag.token));
        }
        let head = self.new_state();
        let mut tail = head;
        for &byte in lexeme {
            let next = self.new_state();
            self.link_byte(tail, byte, next);
            tail = next;
        }
        self.connect_to_start(head);
        self.set_accept(tail, tag)?;
        Ok((head, tail))
    }

    /// Add a parsed pattern; its synthesized tail becomes accepting.
    pub fn add_pattern(
        &mut self,
        pattern: &Pattern,
        tag: AcceptTag,
    ) -> Result<(NfaStateId, NfaStateId), NfaError> {
        let head = self.new_state();
        let tail = self.new_state();
        self.build(pattern, head, tail);
        self.connect_to_start(head);
        self.set_accept(tail, tag)?;
        Ok((head, tail))
    }

    fn connect_to_start(&mut self, head: NfaStateId) {
        let start = self.start;
        self.node_mut(start).epsilon.insert(head);
    }

    fn set_accept(&mut self, id: NfaStateId, tag: AcceptTag) -> Result<(), NfaError> {
        let slot = self.states.slot_of(id).expect("NFA handle outlived its node");
        match self.accepts.get(&slot).copied() {
            None => {
                self.accepts.insert(slot, tag);
                Ok(())
            }
            Some(existing) => {
                let merged = merge_tags(Some(existing), tag)?;
                self.accepts.insert(slot, merged.expect("tag present"));
                Ok(())
            }
        }
    }

    /// Link `from --byte--> to`, detouring through a fresh ε node if `from`
    /// already sends that byte elsewhere.
    fn link_byte(&mut self, from: NfaStateId, byte: u8, to: NfaStateId) {
        let from = if self
            .node(from)
            .transitions
            .get(&byte)
            .is_some_and(|&existing| existing != to)
        {
            let mid = self.new_state();
            self.node_mut(from).epsilon.insert(mid);
            mid
        } else {
            from
        };
        self.node_mut(from).transitions.insert(byte, to);
    }

    fn build(&mut self, pattern: &Pattern, current: NfaStateId, target: NfaStateId) {
        match pattern {
            Pattern::Literal(byte) => self.link_byte(current, *byte, target),
            Pattern::Class(set) => {
                let conflict = set
                    .ones()
                    .any(|b| self.node(current).transitions.contains_key(&(b as u8)));
                let from = if conflict {
                    let mid = self.new_state();
                    self.node_mut(current).epsilon.insert(mid);
                    mid
                } else {
                    current
                };
                for b in set.ones() {
                    self.node_mut(from).transitions.insert(b as u8, target);
                }
            }
            Pattern::Sequence(items) => {
                let mut cur = current;
                for (index, item) in items.iter().enumerate() {
                    let tgt = if index + 1 == items.len() {
                        target
                    } else {
                        self.new_state()
                    };
                    self.build(item, cur, tgt);
                    cur = tgt;
                }
            }
            Pattern::Alternation(branches) => {
                for branch in branches {
                    let sub = self.new_state();
                    self.node_mut(current).epsilon.insert(sub);
                    self.build(branch, sub, target);
                }
            }
            Pattern::Repeat { item, kind } => match kind {
                RepeatKind::ZeroOrMore => {
                    let s = self.new_state();
                    let e = self.new_state();
                    self.node_mut(current).epsilon.insert(s);
                    self.node_mut(current).epsilon.insert(target);
                    self.build(item, s, e);
                    self.node_mut(e).epsilon.insert(s);
                    self.node_mut(e).epsilon.insert(target);
                }
                RepeatKind::OneOrMore => {
                    let s = self.new_state();
                    let e = self.new_state();
                    self.node_mut(current).epsilon.insert(s);
                    self.build(item, s, e);
                    self.node_mut(e).epsilon.insert(s);
                    self.node_mut(e).epsilon.insert(target);
                }
                RepeatKind::ZeroOrOne => {
                    let s = self.new_state();
                    self.node_mut(current).epsilon.insert(s);
                    self.node_mut(current).epsilon.insert(target);
                    self.build(item, s, target);
                }
            },
        }
    }

    /// Fuse ε-linked node pairs whose byte transitions are disjoint and of
    /// which at most one is accepting. The recognized language is unchanged;
    /// outside handles keep resolving through the alias layer.
    pub fn merge_optimization(&mut self) {
        self.states.set_all_merge_allowed();
        let mut queue: VecDeque<NfaStateId> = self
            .node(self.start)
            .epsilon
            .iter()
            .copied()
            .collect();
        while let Some(now) = queue.pop_front() {
            if !self.states.can_merge(now) {
                continue;
            }
            let successors: Vec<NfaStateId> = match self.states.get(now) {
                Some(state) => state.epsilon.iter().copied().collect(),
                None => continue,
            };
            let mut merged_any = false;
            for succ in successors {
                if self.try_fuse(now, succ) {
                    merged_any = true;
                }
                queue.push_back(succ);
            }
            if merged_any {
                queue.push_back(now);
            } else {
                self.states.refuse_merge(now);
            }
        }
    }

    fn try_fuse(&mut self, dst: NfaStateId, src: NfaStateId) -> bool {
        let (Some(dst_slot), Some(src_slot)) = (self.states.slot_of(dst), self.states.slot_of(src))
        else {
            return false;
        };
        if dst_slot == src_slot {
            return false;
        }
        let src_tag = self.accepts.get(&src_slot).copied();
        if self.accepts.contains_key(&dst_slot) && src_tag.is_some() {
            return false;
        }
        let fused = self.states.merge(dst, src, |dst_state, src_state| {
            if src_state
                .transitions
                .keys()
                .any(|byte| dst_state.transitions.contains_key(byte))
            {
                return false;
            }
            dst_state.transitions.append(&mut src_state.transitions);
            dst_state.epsilon.append(&mut src_state.epsilon);
            true
        });
        if fused {
            if let Some(tag) = src_tag {
                self.accepts.remove(&src_slot);
                self.accepts.insert(dst_slot, tag);
            }
        }
        fused
    }

    /// The ε-closure of one node: every alias reachable without consuming a
    /// byte, plus the highest-priority accept tag found along the way.
    ///
    /// # Errors
    ///
    /// Fails when two reachable accepting nodes carry distinct tokens at the
    /// same priority — the grammar cannot decide which token wins.
    pub fn closure(&self, id: NfaStateId) -> Result<(StateSet, Option<AcceptTag>), NfaError> {
        let mut set = StateSet::with_capacity(self.states.alias_bound());
        let mut best: Option<AcceptTag> = None;
        let mut visited: AHashSet<ObjectId<NfaState>> = AHashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(alias) = queue.pop_front() {
            let Some(slot) = self.states.slot_of(alias) else {
                continue;
            };
            if !visited.insert(slot) {
                continue;
            }
            for &a in self.states.aliases_of(alias) {
                set.insert(a.as_usize());
            }
            if let Some(&tag) = self.accepts.get(&slot) {
                best = merge_tags(best, tag)?;
            }
            for &next in &self.node(alias).epsilon {
                queue.push_back(next);
            }
        }
        Ok((set, best))
    }

    /// The ε-closure of the node reached from `id` on `byte`, if any.
    pub fn goto(
        &self,
        id: NfaStateId,
        byte: u8,
    ) -> Result<Option<(StateSet, Option<AcceptTag>)>, NfaError> {
        let Some(state) = self.states.get(id) else {
            return Ok(None);
        };
        match state.transitions.get(&byte) {
            Some(&next) => self.closure(next).map(Some),
            None => Ok(None),
        }
    }

    /// Number of live nodes (not aliases).
    pub fn node_count(&self) -> usize {
        self.states.len()
    }
}

/// Keep the higher-priority tag; reject equal-priority distinct tokens.
pub(crate) fn merge_tags(
    best: Option<AcceptTag>,
    tag: AcceptTag,
) -> Result<Option<AcceptTag>, NfaError> {
    match best {
        None => Ok(Some(tag)),
        Some(current) if tag.priority > current.priority => Ok(Some(tag)),
        Some(current) if tag.priority == current.priority && tag.token != current.token => {
            Err(NfaError::AcceptTie {
                first: current.token,
                second: tag.token,
                priority: tag.priority,
            })
        }
        Some(current) => Ok(Some(current)),
    }
}
