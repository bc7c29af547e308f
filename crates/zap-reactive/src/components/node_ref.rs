use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::api::host::NodeNamespace;
use crate::api::types::{NodeId, NodeLookup};
use crate::core::tree::NodeTree;

/// Node type that matches any node regardless of its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnyNode;

/// A node id that has been checked to carry data of type `T`.
pub struct Node<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Node<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Node<T> {}

impl<T> PartialEq for Node<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Node<T> {}

impl<T> Hash for Node<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

impl<T> From<Node<T>> for NodeId {
    fn from(node: Node<T>) -> NodeId {
        node.id
    }
}

/// Lazily resolved, cached handle to a node of type `T`.
///
/// Declared with a lookup strategy, bound to an owner with
/// [`configure`](NodeRef::configure) during the owner's ready phase, then
/// resolved on demand. Every miss (unconfigured, missing node, wrong type,
/// owner gone) is `None`; callers re-check later.
///
/// The cache only holds a `NodeId`, so it never keeps the target alive: a
/// freed target fails the generation check and the next `resolve` looks it
/// up again.
pub struct NodeRef<T> {
    lookup: NodeLookup,
    owner: Option<NodeId>,
    cached: Option<NodeId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> NodeRef<T> {
    pub fn new(lookup: NodeLookup) -> Self {
        Self {
            lookup,
            owner: None,
            cached: None,
            _marker: PhantomData,
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::new(NodeLookup::Path(path.into()))
    }

    pub fn unique(name: impl Into<String>) -> Self {
        Self::new(NodeLookup::UniqueName(name.into()))
    }

    pub fn group(group: impl Into<String>) -> Self {
        Self::new(NodeLookup::Group(group.into()))
    }

    /// Bind to the node performing the lookup. Always clears the cache.
    pub fn configure(&mut self, owner: NodeId) {
        if self.owner != Some(owner) {
            log::debug!("node ref {} bound to owner {owner}", self.lookup);
        }
        self.owner = Some(owner);
        self.cached = None;
    }

    pub fn is_configured(&self) -> bool {
        self.owner.is_some()
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub fn lookup(&self) -> &NodeLookup {
        &self.lookup
    }

    /// Drop the cached target; the next `resolve` performs a fresh lookup.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// The cached target id, without validating or resolving.
    pub fn cached(&self) -> Option<NodeId> {
        self.cached
    }

    fn accepts<N: NodeNamespace + ?Sized>(ns: &N, id: NodeId) -> bool {
        TypeId::of::<T>() == TypeId::of::<AnyNode>() || ns.is_type(id, TypeId::of::<T>())
    }

    /// Return the cached target if it is still alive, otherwise look it up
    /// and cache the result.
    pub fn resolve<N: NodeNamespace + ?Sized>(&mut self, ns: &N) -> Option<Node<T>> {
        let owner = self.owner?;
        if !ns.is_alive(owner) {
            self.cached = None;
            return None;
        }

        if let Some(id) = self.cached {
            if ns.is_alive(id) {
                return Some(Node {
                    id,
                    _marker: PhantomData,
                });
            }
            self.cached = None;
        }

        let id = ns.find(owner, &self.lookup).filter(|&id| Self::accepts(ns, id))?;
        self.cached = Some(id);
        Some(Node {
            id,
            _marker: PhantomData,
        })
    }

    /// Resolve and borrow the target's data.
    pub fn get<'t>(&mut self, tree: &'t NodeTree) -> Option<&'t T> {
        let node = self.resolve(tree)?;
        tree.get::<T>(node.id)
    }

    /// Resolve and mutably borrow the target's data.
    pub fn get_mut<'t>(&mut self, tree: &'t mut NodeTree) -> Option<&'t mut T> {
        let node = self.resolve(&*tree)?;
        tree.get_mut::<T>(node.id)
    }
}

impl<T> Clone for NodeRef<T> {
    /// Clones the declaration only; the clone starts unconfigured.
    fn clone(&self) -> Self {
        Self {
            lookup: self.lookup.clone(),
            owner: None,
            cached: None,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for NodeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("type", &std::any::type_name::<T>())
            .field("lookup", &self.lookup)
            .field("owner", &self.owner)
            .field("cached", &self.cached)
            .finish()
    }
}
