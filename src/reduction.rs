//! Reduction callbacks: the user code a reduce action dispatches to.
//!
//! At grammar time a callback is only a type tag (a string); the serialized
//! syntax table stores the tag registry, and a [`CallbackRegistry`] resolves
//! every tag back to a live object when the table is loaded.
use ahash::AHashMap;

use crate::token::Token;

/// One value on the parser's stack, as seen by a reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<V> {
    /// A shifted token.
    Token(Token),
    /// The value a completed phrase reduced to.
    Node(V),
}

impl<V> Payload<V> {
    /// The contained node value, if this is one.
    pub fn into_node(self) -> Option<V> {
        match self {
            Payload::Node(value) => Some(value),
            Payload::Token(_) => None,
        }
    }

    /// The contained token, if this is one.
    pub fn into_token(self) -> Option<Token> {
        match self {
            Payload::Token(token) => Some(token),
            Payload::Node(_) => None,
        }
    }
}

/// The error a reduction raises to abort parsing; its text is reported
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ReduceError(pub String);

/// A reduction callback.
///
/// `args` holds one slot per body symbol in writing order; a slot is [`None`]
/// when its symbol is a nullable nonterminal that derived nothing.
pub trait Reduction<V> {
    /// Combine the body's values into the produced nonterminal's value.
    fn reduce(&self, args: Vec<Option<Payload<V>>>) -> Result<V, ReduceError>;
}

impl<V, F> Reduction<V> for F
where
    F: Fn(Vec<Option<Payload<V>>>) -> Result<V, ReduceError>,
{
    fn reduce(&self, args: Vec<Option<Payload<V>>>) -> Result<V, ReduceError> {
        self(args)
    }
}

/// The error type for callback resolution at load time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The loaded table references a tag the registry does not provide.
    #[error("no reduction registered for callback tag {0:?}")]
    MissingCallback(String),
}

/// Maps callback type tags to live reduction objects.
pub struct CallbackRegistry<V> {
    by_tag: AHashMap<String, Box<dyn Reduction<V>>>,
}

impl<V> Default for CallbackRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CallbackRegistry<V> {
    /// Create an empty registry.
    pub fn new() -> Self {
        CallbackRegistry {
            by_tag: AHashMap::new(),
        }
    }

    /// Register the reduction object for a tag, replacing any previous one.
    pub fn register(&mut self, tag: &str, reduction: impl Reduction<V> + 'static) -> &mut Self {
        self.by_tag.insert(tag.to_string(), Box::new(reduction));
        self
    }

    /// Resolve the serialized tag list into a dense callback vector.
    ///
    /// Every tag must resolve: each one was referenced by some reduce action
    /// when the table was generated.
    pub(crate) fn resolve(
        mut self,
        tags: &[String],
    ) -> Result<Vec<Box<dyn Reduction<V>>>, RegistryError> {
        tags.iter()
            .map(|tag| {
                self.by_tag
                    .remove(tag)
                    .ok_or_else(|| RegistryError::MissingCallback(tag.clone()))
            })
            .collect()
    }
}
