use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::api::host::NodeNamespace;
use crate::api::types::{NodeId, NodeLookup};
use crate::error::HostError;

/// Prefix marking a scene-unique name inside a path segment.
pub const UNIQUE_PREFIX: char = '%';

struct NodeEntry {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    groups: Vec<String>,
    /// Reachable through `%name` from anywhere in its scene.
    unique: bool,
    /// Scopes unique names of its descendants.
    scene_root: bool,
    data: Box<dyn Any>,
}

struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

/// Node arena with parent/child hierarchy, groups and scene-unique names.
///
/// Slots are reused after a node is freed; the generation in `NodeId`
/// makes stale handles miss instead of aliasing the new occupant.
pub struct NodeTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    /// Group name → members in insertion order.
    groups: HashMap<String, Vec<NodeId>>,
}

impl NodeTree {
    /// Create a tree holding only the root node, named `root`.
    pub fn new() -> Self {
        Self::with_root_name("root")
    }

    pub fn with_root_name(name: impl Into<String>) -> Self {
        let root = NodeId::new(0, 0);
        let entry = NodeEntry {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            groups: Vec::new(),
            unique: false,
            scene_root: true,
            data: Box::new(()),
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                entry: Some(entry),
            }],
            free: Vec::new(),
            root,
            groups: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn entry(&self, id: NodeId) -> Option<&NodeEntry> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut NodeEntry> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Add a child node carrying `data`. Sibling names must be unique.
    pub fn add_child<T: Any>(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        data: T,
    ) -> Result<NodeId, HostError> {
        let name = name.into();
        let Some(parent_entry) = self.entry(parent) else {
            return Err(HostError::InvalidObject(parent.into()));
        };
        if self.child_named(parent_entry, &name).is_some() {
            return Err(HostError::DuplicateName { parent, name });
        }

        let entry = NodeEntry {
            name,
            parent: Some(parent),
            children: Vec::new(),
            groups: Vec::new(),
            unique: false,
            scene_root: false,
            data: Box::new(data),
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                NodeId::new(index, 0)
            }
        };
        if let Some(parent_entry) = self.entry_mut(parent) {
            parent_entry.children.push(id);
        }
        log::debug!("node {id} added under {parent}");
        Ok(id)
    }

    /// Free a node and its whole subtree. Returns the freed ids, children
    /// before parents. The root cannot be freed.
    pub fn free(&mut self, id: NodeId) -> Vec<NodeId> {
        if id == self.root || !self.contains(id) {
            return Vec::new();
        }
        let freed = self.subtree(id);

        if let Some(parent) = self.entry(id).and_then(|e| e.parent) {
            if let Some(parent_entry) = self.entry_mut(parent) {
                parent_entry.children.retain(|&c| c != id);
            }
        }
        for &node in &freed {
            let index = node.index() as usize;
            let Some(entry) = self.slots[index].entry.take() else {
                continue;
            };
            for group in &entry.groups {
                if let Some(members) = self.groups.get_mut(group) {
                    members.retain(|&m| m != node);
                }
            }
            // A slot whose generation is exhausted is retired instead of
            // wrapping back to ids that may still be held.
            match self.slots[index].generation.checked_add(1) {
                Some(next) => {
                    self.slots[index].generation = next;
                    self.free.push(node.index());
                }
                None => log::debug!("slot {index} retired at its last generation"),
            }
        }
        self.groups.retain(|_, members| !members.is_empty());
        log::debug!("freed {} node(s) rooted at {id}", freed.len());
        freed
    }

    /// `id` and all its descendants, children before parents.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_post_order(id, &mut out);
        out
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if let Some(entry) = self.entry(id) {
            for &child in &entry.children {
                self.collect_post_order(child, out);
            }
            out.push(id);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.entry(id).map(|e| e.name.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.entry(id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: NodeId) -> Option<&[NodeId]> {
        self.entry(id).map(|e| e.children.as_slice())
    }

    /// Borrow the node's data as `T`. `None` if missing or of another type.
    pub fn get<T: Any>(&self, id: NodeId) -> Option<&T> {
        self.entry(id).and_then(|e| e.data.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, id: NodeId) -> Option<&mut T> {
        self.entry_mut(id).and_then(|e| e.data.downcast_mut::<T>())
    }

    /// Mark a node as reachable through `%name` within its scene.
    pub fn set_unique(&mut self, id: NodeId, unique: bool) {
        if let Some(entry) = self.entry_mut(id) {
            entry.unique = unique;
        }
    }

    /// Mark a node as the root of an instanced scene.
    pub fn set_scene_root(&mut self, id: NodeId, scene_root: bool) {
        if id == self.root {
            return;
        }
        if let Some(entry) = self.entry_mut(id) {
            entry.scene_root = scene_root;
        }
    }

    pub fn add_to_group(&mut self, id: NodeId, group: impl Into<String>) {
        let group = group.into();
        let Some(entry) = self.entry_mut(id) else { return };
        if entry.groups.contains(&group) {
            return;
        }
        entry.groups.push(group.clone());
        self.groups.entry(group).or_default().push(id);
    }

    pub fn remove_from_group(&mut self, id: NodeId, group: &str) {
        if let Some(entry) = self.entry_mut(id) {
            entry.groups.retain(|g| g != group);
        }
        if let Some(members) = self.groups.get_mut(group) {
            members.retain(|&m| m != id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }

    pub fn is_in_group(&self, id: NodeId, group: &str) -> bool {
        self.entry(id).is_some_and(|e| e.groups.iter().any(|g| g == group))
    }

    /// Earliest-added live member of `group`.
    pub fn first_in_group(&self, group: &str) -> Option<NodeId> {
        self.groups.get(group).and_then(|members| members.first().copied())
    }

    pub fn nodes_in_group(&self, group: &str) -> &[NodeId] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve `path` relative to `owner`.
    ///
    /// `/` separates segments, a leading `/` starts at the root (whose name
    /// must be the first segment), `.` is the current node, `..` its parent
    /// and `%name` a scene-unique lookup.
    pub fn get_node(&self, owner: NodeId, path: &str) -> Option<NodeId> {
        if path.is_empty() || !self.contains(owner) {
            return None;
        }
        let (mut current, rest) = match path.strip_prefix('/') {
            Some(absolute) => {
                let mut segments = absolute.splitn(2, '/');
                let root_name = segments.next()?;
                if self.name(self.root)? != root_name {
                    return None;
                }
                (self.root, segments.next().unwrap_or(""))
            }
            None => (owner, path),
        };

        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            current = match segment {
                "." => current,
                ".." => self.parent(current)?,
                s => match s.strip_prefix(UNIQUE_PREFIX) {
                    Some(unique) => self.find_unique(current, unique)?,
                    None => self.child_named(self.entry(current)?, s)?,
                },
            };
        }
        Some(current)
    }

    fn child_named(&self, entry: &NodeEntry, name: &str) -> Option<NodeId> {
        entry
            .children
            .iter()
            .copied()
            .find(|&c| self.name(c) == Some(name))
    }

    /// Nearest ancestor-or-self that roots a scene.
    pub fn scene_root_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            let entry = self.entry(current)?;
            if entry.scene_root {
                return Some(current);
            }
            current = entry.parent?;
        }
    }

    /// Find a `%name` node in the scene that `owner` belongs to.
    /// Does not descend into nested scenes.
    pub fn find_unique(&self, owner: NodeId, name: &str) -> Option<NodeId> {
        let scene = self.scene_root_of(owner)?;
        let mut stack: Vec<NodeId> = self.entry(scene)?.children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(entry) = self.entry(id) else { continue };
            if entry.unique && entry.name == name {
                return Some(id);
            }
            if !entry.scene_root {
                stack.extend(entry.children.iter().rev().copied());
            }
        }
        None
    }

    /// Absolute path of a node, e.g. `/root/Level/Player`.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let entry = self.entry(node)?;
            names.push(entry.name.as_str());
            current = entry.parent;
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeNamespace for NodeTree {
    fn find(&self, owner: NodeId, lookup: &NodeLookup) -> Option<NodeId> {
        if !self.contains(owner) {
            return None;
        }
        match lookup {
            NodeLookup::Path(path) => self.get_node(owner, path),
            NodeLookup::UniqueName(name) => self.find_unique(owner, name),
            NodeLookup::Group(group) => self.first_in_group(group),
        }
    }

    fn is_alive(&self, id: NodeId) -> bool {
        self.contains(id)
    }

    fn is_type(&self, id: NodeId, ty: TypeId) -> bool {
        self.entry(id).is_some_and(|e| (*e.data).type_id() == ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Player;
    struct Label(&'static str);

    fn level() -> (NodeTree, NodeId, NodeId, NodeId) {
        let mut tree = NodeTree::new();
        let level = tree.add_child(tree.root(), "Level", ()).unwrap();
        let player = tree.add_child(level, "Player", Player).unwrap();
        let hud = tree.add_child(level, "Hud", ()).unwrap();
        (tree, level, player, hud)
    }

    #[test]
    fn relative_and_absolute_paths() {
        let (tree, level, player, hud) = level();
        assert_eq!(tree.get_node(level, "Player"), Some(player));
        assert_eq!(tree.get_node(hud, "../Player"), Some(player));
        assert_eq!(tree.get_node(hud, "."), Some(hud));
        assert_eq!(tree.get_node(hud, "/root/Level/Player"), Some(player));
        assert_eq!(tree.get_node(hud, "/other/Level"), None);
        assert_eq!(tree.get_node(level, "Missing"), None);
        assert_eq!(tree.get_node(level, ""), None);
    }

    #[test]
    fn duplicate_sibling_name_is_rejected() {
        let (mut tree, level, _, _) = level();
        let err = tree.add_child(level, "Player", ()).unwrap_err();
        assert!(matches!(err, HostError::DuplicateName { .. }));
    }

    #[test]
    fn freed_ids_go_stale_after_slot_reuse() {
        let (mut tree, level, player, _) = level();
        let freed = tree.free(player);
        assert_eq!(freed, vec![player]);
        let newcomer = tree.add_child(level, "Newcomer", ()).unwrap();
        assert_eq!(newcomer.index(), player.index());
        assert!(!tree.contains(player));
        assert!(tree.get::<Player>(player).is_none());
        assert_eq!(tree.get_node(level, "Player"), None);
    }

    #[test]
    fn exhausted_slot_is_never_reused() {
        let (mut tree, level, player, _) = level();
        let index = player.index();
        tree.free(player);
        tree.slots[index as usize].generation = u32::MAX;

        let last = tree.add_child(level, "Last", ()).unwrap();
        assert_eq!((last.index(), last.generation()), (index, u32::MAX));
        tree.free(last);
        assert!(!tree.free.contains(&index));

        let next = tree.add_child(level, "Next", ()).unwrap();
        assert_ne!(next.index(), index);
        assert!(!tree.contains(last));
        assert!(tree.contains(next));
    }

    #[test]
    fn free_removes_subtree_children_first() {
        let (mut tree, level, player, hud) = level();
        let freed = tree.free(level);
        assert_eq!(freed.len(), 3);
        assert_eq!(freed.last(), Some(&level));
        assert!(!tree.contains(player) && !tree.contains(hud));
        assert_eq!(tree.children(tree.root()), Some([].as_slice()));
        assert!(tree.free(tree.root()).is_empty());
    }

    #[test]
    fn unique_names_scoped_to_scene() {
        let (mut tree, level, player, hud) = level();
        let score = tree.add_child(hud, "Score", Label("0")).unwrap();
        tree.set_unique(score, true);
        assert_eq!(tree.find_unique(player, "Score"), Some(score));
        assert_eq!(tree.get_node(player, "%Score"), Some(score));

        // Unique names inside a nested scene are hidden from the outer one.
        let enemy = tree.add_child(level, "Enemy", ()).unwrap();
        tree.set_scene_root(enemy, true);
        let eye = tree.add_child(enemy, "Eye", ()).unwrap();
        tree.set_unique(eye, true);
        assert_eq!(tree.find_unique(player, "Eye"), None);
        assert_eq!(tree.find_unique(eye, "Eye"), Some(eye));
        assert_eq!(tree.get_node(enemy, "%Eye"), Some(eye));
    }

    #[test]
    fn groups_keep_insertion_order() {
        let (mut tree, _, player, hud) = level();
        tree.add_to_group(hud, "ui");
        tree.add_to_group(player, "ui");
        tree.add_to_group(player, "ui");
        assert_eq!(tree.nodes_in_group("ui"), &[hud, player]);
        assert_eq!(tree.first_in_group("ui"), Some(hud));
        tree.free(hud);
        assert_eq!(tree.first_in_group("ui"), Some(player));
        tree.remove_from_group(player, "ui");
        assert_eq!(tree.first_in_group("ui"), None);
        assert!(!tree.is_in_group(player, "ui"));
    }

    #[test]
    fn typed_data_access() {
        let (mut tree, level, player, _) = level();
        let label = tree.add_child(level, "Label", Label("hi")).unwrap();
        assert!(tree.get::<Player>(player).is_some());
        assert!(tree.get::<Label>(player).is_none());
        tree.get_mut::<Label>(label).unwrap().0 = "bye";
        assert_eq!(tree.get::<Label>(label).unwrap().0, "bye");
        assert!(tree.is_type(label, TypeId::of::<Label>()));
        assert!(!tree.is_type(label, TypeId::of::<Player>()));
    }

    #[test]
    fn path_of_node() {
        let (tree, _, player, _) = level();
        assert_eq!(tree.path_of(player).as_deref(), Some("/root/Level/Player"));
    }
}
