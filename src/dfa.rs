//! Subset construction and minimization of the tokenizer DFA.
//!
//! The intermediate graph lives only during generation; the serialized
//! artifact keeps the dense minimized rows plus the end-of-input record.
use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

use crate::intern::{InternId, Interner};
use crate::nfa::{merge_tags, AcceptTag, NfaBuilder, NfaError, NfaStateId, StateSet};
use crate::token::{ProductionId, RowId, TokenData};

/// Size of the 8-bit alphabet: one transition cell per byte value.
pub const BYTE_SPAN: usize = 256;

/// The error type for DFA construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DfaError {
    /// A token conflict surfaced while closing or uniting NFA subsets.
    #[error(transparent)]
    Nfa(#[from] NfaError),
    /// Some token pattern matches the empty lexeme, which the tokenizer can
    /// never emit (it would loop without consuming input).
    #[error("token {0:?} accepts the empty lexeme")]
    EmptyMatch(ProductionId),
}

/// One live intermediate node: the dense transitions discovered for the NFA
/// subset it stands for, plus that subset's accept tag.
#[derive(Debug, Clone)]
struct IntermediateNode {
    next: Vec<Option<u32>>,
    tag: Option<AcceptTag>,
}

impl IntermediateNode {
    fn new(tag: Option<AcceptTag>) -> Self {
        IntermediateNode {
            next: vec![None; BYTE_SPAN],
            tag,
        }
    }
}

/// The subset-construction graph, ready for minimization.
#[derive(Debug)]
pub struct DfaBuilder {
    nodes: Vec<IntermediateNode>,
    start: usize,
}

impl DfaBuilder {
    /// Run subset construction over the NFA.
    ///
    /// Each distinct NFA subset materializes exactly one node; discovery is
    /// breadth-first, so node numbering is deterministic.
    pub fn construct(nfa: &NfaBuilder) -> Result<Self, DfaError> {
        let (start_set, start_tag) = nfa.closure(nfa.start())?;
        if let Some(tag) = start_tag {
            return Err(DfaError::EmptyMatch(tag.token));
        }
        let mut subsets: Interner<StateSet> = Interner::new();
        let (start_id, _) = subsets.intern(start_set);
        let mut nodes = vec![IntermediateNode::new(None)];
        let mut queue = VecDeque::from([start_id.as_usize()]);
        while let Some(index) = queue.pop_front() {
            let subset = subsets
                .resolve(InternId::from_index(index))
                .cloned()
                .expect("queued subsets are interned");
            for byte in 0..=u8::MAX {
                let mut union: Option<StateSet> = None;
                let mut tag: Option<AcceptTag> = None;
                let mut seen_slots = AHashSet::new();
                for bit in subset.ones() {
                    let alias = NfaStateId::from_index(bit);
                    let Some(slot) = nfa.slot_of(alias) else {
                        continue;
                    };
                    if !seen_slots.insert(slot) {
                        continue;
                    }
                    if let Some((set, found)) = nfa.goto(alias, byte)? {
                        match union.as_mut() {
                            Some(u) => u.union_with(&set),
                            None => union = Some(set),
                        }
                        if let Some(found) = found {
                            tag = merge_tags(tag, found)?;
                        }
                    }
                }
                let Some(set) = union else {
                    continue;
                };
                let (id, inserted) = subsets.intern(set);
                if inserted {
                    nodes.push(IntermediateNode::new(tag));
                    queue.push_back(id.as_usize());
                }
                nodes[index].next[byte as usize] = Some(id.as_usize() as u32);
            }
        }
        Ok(DfaBuilder {
            nodes,
            start: start_id.as_usize(),
        })
    }

    /// Number of intermediate nodes (pre-minimization states).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Minimize by partition refinement and emit the dense table.
    ///
    /// The initial partition groups nodes by accept tag; each full pass over
    /// the alphabet splits classes by the class of their byte-successor
    /// (no-transition is its own bucket) until a pass changes nothing.
    /// `token_data` expands an accepting production into its serialized
    /// descriptor; `file_end` is the record reported on exhausted input.
    pub fn into_table(
        self,
        token_data: impl Fn(ProductionId) -> TokenData,
        file_end: TokenData,
    ) -> DfaTable {
        let n = self.nodes.len();
        let mut class_of = vec![0u32; n];
        let mut first_seen: AHashMap<Option<AcceptTag>, u32> = AHashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            let fresh = first_seen.len() as u32;
            class_of[index] = *first_seen.entry(node.tag).or_insert(fresh);
        }
        let mut class_count = first_seen.len();
        loop {
            let mut changed = false;
            for byte in 0..BYTE_SPAN {
                let mut remap: AHashMap<(u32, Option<u32>), u32> = AHashMap::new();
                let mut new_class_of = vec![0u32; n];
                for index in 0..n {
                    let successor_class = self.nodes[index].next[byte].map(|j| class_of[j as usize]);
                    let fresh = remap.len() as u32;
                    new_class_of[index] = *remap
                        .entry((class_of[index], successor_class))
                        .or_insert(fresh);
                }
                if remap.len() != class_count {
                    changed = true;
                    class_count = remap.len();
                }
                class_of = new_class_of;
            }
            if !changed {
                break;
            }
        }
        let mut representative: Vec<Option<usize>> = vec![None; class_count];
        for index in 0..n {
            let class = class_of[index] as usize;
            if representative[class].is_none() {
                representative[class] = Some(index);
            }
        }
        let rows = representative
            .iter()
            .map(|rep| {
                let rep = rep.expect("every class has a member");
                let next = (0..BYTE_SPAN)
                    .map(|byte| {
                        self.nodes[rep].next[byte].map(|j| {
                            RowId::new(class_of[j as usize] as usize)
                                .expect("row count fits the id range")
                        })
                    })
                    .collect();
                let accept = self.nodes[rep].tag.map(|tag| token_data(tag.token));
                DfaRow { next, accept }
            })
            .collect();
        DfaTable {
            start: RowId::new(class_of[self.start] as usize).expect("row count fits the id range"),
            rows,
            file_end,
        }
    }
}

/// One row of the minimized DFA: a 256-wide transition array plus the token
/// descriptor of the row, if accepting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfaRow {
    /// Transition per byte value; `None` is the no-transition sentinel.
    pub next: Vec<Option<RowId>>,
    /// The descriptor emitted when a lexeme ends on this row.
    pub accept: Option<TokenData>,
}

impl DfaRow {
    /// The successor row on `byte`, if any.
    #[inline]
    pub fn successor(&self, byte: u8) -> Option<RowId> {
        self.next[byte as usize]
    }
}

/// The serialized tokenizer table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfaTable {
    /// The row scanning starts from.
    pub start: RowId,
    /// Dense rows; every row is reachable from `start`.
    pub rows: Vec<DfaRow>,
    /// The record reported at end of input.
    pub file_end: TokenData,
}

impl DfaTable {
    /// Look up a row.
    #[inline]
    pub fn row(&self, id: RowId) -> &DfaRow {
        &self.rows[id.as_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regex::Pattern;
    use crate::token::TokenKind;

    fn lexicon() -> NfaBuilder {
        let mut nfa = NfaBuilder::new();
        let id_pattern = Pattern::parse("[a-z][a-z0-9]*").unwrap();
        nfa.add_pattern(
            &id_pattern,
            AcceptTag {
                token: ProductionId(0),
                priority: 0,
            },
        )
        .unwrap();
        nfa.add_literal(
            b"if",
            AcceptTag {
                token: ProductionId(1),
                priority: 1,
            },
        )
        .unwrap();
        nfa
    }

    fn end_data() -> TokenData {
        TokenData::end(ProductionId(9))
    }

    fn accept_of(table: &DfaTable, input: &[u8]) -> Option<ProductionId> {
        let mut row = table.start;
        for &byte in input {
            row = table.row(row).successor(byte)?;
        }
        table.row(row).accept.map(|data| data.production)
    }

    #[test]
    fn keyword_priority_dominates_identifier() {
        let nfa = lexicon();
        let table = DfaBuilder::construct(&nfa)
            .unwrap()
            .into_table(TokenData::terminal, end_data());
        assert_eq!(accept_of(&table, b"if"), Some(ProductionId(1)));
        assert_eq!(accept_of(&table, b"iffy"), Some(ProductionId(0)));
        assert_eq!(accept_of(&table, b"x1"), Some(ProductionId(0)));
        assert_eq!(accept_of(&table, b"1x"), None);
    }

    #[test]
    fn minimization_never_grows_and_preserves_language() {
        let nfa = lexicon();
        let builder = DfaBuilder::construct(&nfa).unwrap();
        let intermediate = builder.node_count();
        let table = builder.into_table(TokenData::terminal, end_data());
        assert!(table.rows.len() <= intermediate);
        for word in [&b"if"[..], b"iffy", b"i", b"zz9", b"9", b""] {
            let mut nfa_accepts = None;
            // simulate the NFA by chained goto/closure unions
            let (mut set, _) = nfa.closure(nfa.start()).unwrap();
            for &byte in word {
                let mut next: Option<StateSet> = None;
                let mut tag = None;
                for bit in set.ones() {
                    if let Some((s, t)) = nfa.goto(NfaStateId::from_index(bit), byte).unwrap() {
                        match next.as_mut() {
                            Some(u) => u.union_with(&s),
                            None => next = Some(s),
                        }
                        if let Some(t) = t {
                            tag = merge_tags(tag, t).unwrap();
                        }
                    }
                }
                match next {
                    Some(s) => {
                        set = s;
                        nfa_accepts = tag.map(|t| t.token);
                    }
                    None => {
                        nfa_accepts = None;
                        set = StateSet::with_capacity(0);
                        break;
                    }
                }
            }
            assert_eq!(accept_of(&table, word), nfa_accepts, "word {word:?}");
        }
    }

    #[test]
    fn file_end_record_round_trips() {
        let nfa = lexicon();
        let table = DfaBuilder::construct(&nfa)
            .unwrap()
            .into_table(TokenData::terminal, end_data());
        assert_eq!(table.file_end.kind, TokenKind::End);
        assert_eq!(table.file_end.production, ProductionId(9));
    }
}
