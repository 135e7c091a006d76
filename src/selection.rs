//! Inclusion flags for every journal, page and heading of a session.
//!
//! The model is a forest stored in an arena:
//!
//! ```text
//! Journal ─┬─ Page ─┬─ Heading
//!          │        └─ Heading
//!          └─ Page ─── Heading
//! ```
//!
//! ## Propagation rules
//!
//! 1. Setting a Journal or Page flag cascades to every descendant.
//! 2. Setting a Heading flag touches nothing else.
//! 3. Cascading a node off snapshots its descendants' flags first; turning
//!    it back on restores the snapshot. A snapshot whose flags are all off
//!    restores as "everything on".
//! 4. A direct toggle of any descendant discards the snapshots held by its
//!    ancestors, so re-enabling them includes every descendant.
//!
//! Every mutation notifies subscribed [`SelectionObserver`]s with the ids
//! of the nodes whose flag changed. [`NodeId`]s stay valid across
//! [`SelectionModel::move_root`]; ids under a removed journal become stale.

use crate::error::Journal2PdfError;
use crate::model::JournalEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// ── Node types ───────────────────────────────────────────────────────────

/// Handle to one node of a [`SelectionModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

/// What a node stands for, by position in the journal list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Journal {
        journal: usize,
    },
    Page {
        journal: usize,
        page: usize,
    },
    Heading {
        journal: usize,
        page: usize,
        heading: usize,
    },
}

impl NodeKind {
    pub fn journal(&self) -> usize {
        match *self {
            NodeKind::Journal { journal }
            | NodeKind::Page { journal, .. }
            | NodeKind::Heading { journal, .. } => journal,
        }
    }

    fn with_journal(self, j: usize) -> Self {
        match self {
            NodeKind::Journal { .. } => NodeKind::Journal { journal: j },
            NodeKind::Page { page, .. } => NodeKind::Page { journal: j, page },
            NodeKind::Heading { page, heading, .. } => NodeKind::Heading {
                journal: j,
                page,
                heading,
            },
        }
    }

    fn cascades(&self) -> bool {
        !matches!(self, NodeKind::Heading { .. })
    }
}

/// Tristate shown by a checkbox widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckState {
    Checked,
    Unchecked,
    Partial,
}

/// A unit of content selected for rendering, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludedItem {
    /// A page title and its preface.
    Page { journal: usize, page: usize },
    /// A heading and its section.
    Heading {
        journal: usize,
        page: usize,
        heading: usize,
    },
}

#[derive(Debug, Clone)]
struct SelectionNode {
    kind: NodeKind,
    label: String,
    included: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Descendant flags captured when this node was cascaded off.
    snapshot: Option<Vec<(NodeId, bool)>>,
}

// ── Observers ────────────────────────────────────────────────────────────

/// Notified after every mutation of a [`SelectionModel`].
pub trait SelectionObserver: Send + Sync {
    /// `changed` lists the nodes whose flag changed, in tree order. It is
    /// empty for structural changes that altered no flag (e.g. a move).
    fn selection_changed(&self, model: &SelectionModel, changed: &[NodeId]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ── Model ────────────────────────────────────────────────────────────────

/// Inclusion state of a set of journals.
#[derive(Default)]
pub struct SelectionModel {
    /// Arena; removed subtrees leave `None` behind.
    nodes: Vec<Option<SelectionNode>>,
    roots: Vec<NodeId>,
    observers: Vec<(SubscriptionId, Arc<dyn SelectionObserver>)>,
    next_subscription: u64,
}

impl fmt::Debug for SelectionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionModel")
            .field("journals", &self.roots.len())
            .field("nodes", &self.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SelectionModel {
    /// Build a tree with every node included.
    pub fn build(journals: &[JournalEntry]) -> Self {
        let mut model = Self::default();
        for j in journals {
            model.insert_journal(j);
        }
        debug!(
            "Selection built: {} journal(s), {} node(s)",
            model.roots.len(),
            model.len()
        );
        model
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(|n| n.kind)
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.label.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// The node's own flag. Unknown ids read as excluded.
    pub fn is_included(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.included)
    }

    pub fn journal_node(&self, journal: usize) -> Option<NodeId> {
        self.roots.get(journal).copied()
    }

    pub fn page_node(&self, journal: usize, page: usize) -> Option<NodeId> {
        self.journal_node(journal)
            .and_then(|j| self.children(j).get(page).copied())
    }

    pub fn heading_node(&self, journal: usize, page: usize, heading: usize) -> Option<NodeId> {
        self.page_node(journal, page)
            .and_then(|p| self.children(p).get(heading).copied())
    }

    /// `Journal/Page/Heading` label path of a node.
    pub fn path(&self, id: NodeId) -> Option<String> {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let n = self.node(c)?;
            parts.push(n.label.as_str());
            cur = n.parent;
        }
        parts.reverse();
        Some(parts.join("/"))
    }

    /// Look a node up by label path: `Journal`, `Journal/Page` or
    /// `Journal/Page/Heading`. The heading segment may itself contain `/`.
    /// Exact matches win over case-insensitive ones.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut segments = path.splitn(3, '/').map(str::trim);
        let first = segments.next()?;
        let mut cur = self.match_label(&self.roots, first)?;
        for seg in segments {
            cur = self.match_label(self.children(cur), seg)?;
        }
        Some(cur)
    }

    fn match_label(&self, among: &[NodeId], label: &str) -> Option<NodeId> {
        among
            .iter()
            .copied()
            .find(|&id| self.label(id) == Some(label))
            .or_else(|| {
                among.iter().copied().find(|&id| {
                    self.label(id)
                        .is_some_and(|l| l.trim().eq_ignore_ascii_case(label))
                })
            })
    }

    /// Tristate of a node over itself and all its descendants.
    pub fn check_state(&self, id: NodeId) -> CheckState {
        let Some(n) = self.node(id) else {
            return CheckState::Unchecked;
        };
        let mut on = usize::from(n.included);
        let mut total = 1;
        for d in self.descendants(id) {
            total += 1;
            on += usize::from(self.is_included(d));
        }
        match on {
            0 => CheckState::Unchecked,
            x if x == total => CheckState::Checked,
            _ => CheckState::Partial,
        }
    }

    /// Everything to render, in journal → page → heading order.
    pub fn included_leaves(&self) -> Vec<IncludedItem> {
        let mut out = Vec::new();
        for &root in &self.roots {
            for &page in self.children(root) {
                if let Some(NodeKind::Page { journal, page: p }) = self.kind(page) {
                    if self.is_included(page) {
                        out.push(IncludedItem::Page { journal, page: p });
                    }
                }
                for &h in self.children(page) {
                    if let Some(NodeKind::Heading {
                        journal,
                        page,
                        heading,
                    }) = self.kind(h)
                    {
                        if self.is_included(h) {
                            out.push(IncludedItem::Heading {
                                journal,
                                page,
                                heading,
                            });
                        }
                    }
                }
            }
        }
        out
    }

    /// Number of nodes currently included.
    pub fn included_count(&self) -> usize {
        self.nodes.iter().flatten().filter(|n| n.included).count()
    }

    // ── Mutations ────────────────────────────────────────────────────────

    /// Set a node's flag, applying the propagation rules. Returns the ids
    /// whose flag changed.
    pub fn toggle(&mut self, id: NodeId, included: bool) -> Result<Vec<NodeId>, Journal2PdfError> {
        let kind = self
            .kind(id)
            .ok_or_else(|| Journal2PdfError::UnknownSelection {
                path: format!("{id:?}"),
            })?;

        self.discard_ancestor_snapshots(id);
        let mut changed = Vec::new();
        if self.set_flag(id, included) {
            changed.push(id);
        }

        if kind.cascades() {
            let descendants = self.descendants(id);
            if included {
                let snapshot = self.node_mut(id).and_then(|n| n.snapshot.take());
                let restore = snapshot.filter(|s| s.iter().any(|&(_, on)| on));
                match restore {
                    Some(flags) => {
                        for (d, on) in flags {
                            if self.set_flag(d, on) {
                                changed.push(d);
                            }
                        }
                    }
                    None => {
                        for &d in &descendants {
                            if self.set_flag(d, true) {
                                changed.push(d);
                            }
                        }
                    }
                }
            } else {
                let flags: Vec<(NodeId, bool)> = descendants
                    .iter()
                    .map(|&d| (d, self.is_included(d)))
                    .collect();
                let has_on = flags.iter().any(|&(_, on)| on);
                if let Some(n) = self.node_mut(id) {
                    if has_on || n.snapshot.is_none() {
                        n.snapshot = Some(flags);
                    }
                }
                for &d in &descendants {
                    if self.set_flag(d, false) {
                        changed.push(d);
                    }
                }
            }
        }

        changed.sort();
        debug!(
            "Toggled '{}' {} ({} node(s) changed)",
            self.path(id).unwrap_or_default(),
            if included { "on" } else { "off" },
            changed.len()
        );
        self.notify(&changed);
        Ok(changed)
    }

    /// Toggle the node at a label path.
    pub fn toggle_path(&mut self, path: &str, included: bool) -> Result<Vec<NodeId>, Journal2PdfError> {
        let id = self
            .find(path)
            .ok_or_else(|| Journal2PdfError::UnknownSelection {
                path: path.to_string(),
            })?;
        self.toggle(id, included)
    }

    /// Set every node's flag and forget all snapshots.
    pub fn set_all(&mut self, included: bool) -> Vec<NodeId> {
        let mut changed = Vec::new();
        for (i, slot) in self.nodes.iter_mut().enumerate() {
            if let Some(n) = slot {
                n.snapshot = None;
                if n.included != included {
                    n.included = included;
                    changed.push(NodeId(i));
                }
            }
        }
        self.notify(&changed);
        changed
    }

    /// Add a journal at the end, fully included.
    pub fn append(&mut self, journal: &JournalEntry) -> NodeId {
        let id = self.insert_journal(journal);
        let mut added = vec![id];
        added.extend(self.descendants(id));
        self.notify(&added);
        id
    }

    /// Remove the journal at `index`. Later journals shift down by one.
    pub fn remove_root(&mut self, index: usize) -> Result<(), Journal2PdfError> {
        if index >= self.roots.len() {
            return Err(Journal2PdfError::UnknownSelection {
                path: format!("journal #{}", index + 1),
            });
        }
        let root = self.roots.remove(index);
        let mut doomed = self.descendants(root);
        doomed.push(root);
        for d in &doomed {
            self.nodes[d.0] = None;
        }
        self.renumber();
        self.notify(&[]);
        Ok(())
    }

    /// Move the journal at `from` so it ends up at position `to`.
    pub fn move_root(&mut self, from: usize, to: usize) -> Result<(), Journal2PdfError> {
        let n = self.roots.len();
        if from >= n || to >= n {
            return Err(Journal2PdfError::UnknownSelection {
                path: format!("journal #{}", from.max(to) + 1),
            });
        }
        if from == to {
            return Ok(());
        }
        let id = self.roots.remove(from);
        self.roots.insert(to, id);
        self.renumber();
        self.notify(&[]);
        Ok(())
    }

    /// Register an observer; it hears about every later mutation.
    pub fn subscribe(&mut self, observer: Arc<dyn SelectionObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, observer));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(s, _)| *s != id);
        self.observers.len() != before
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn node(&self, id: NodeId) -> Option<&SelectionNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut SelectionNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn push(&mut self, node: SelectionNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let Some(parent) = node.parent {
            if let Some(p) = self.node_mut(parent) {
                p.children.push(id);
            }
        }
        self.nodes.push(Some(node));
        id
    }

    fn insert_journal(&mut self, journal: &JournalEntry) -> NodeId {
        let j = self.roots.len();
        let root = self.push(SelectionNode {
            kind: NodeKind::Journal { journal: j },
            label: journal.title.clone(),
            included: true,
            parent: None,
            children: Vec::new(),
            snapshot: None,
        });
        self.roots.push(root);
        for (p, page) in journal.pages.iter().enumerate() {
            let pid = self.push(SelectionNode {
                kind: NodeKind::Page { journal: j, page: p },
                label: page.title.clone(),
                included: true,
                parent: Some(root),
                children: Vec::new(),
                snapshot: None,
            });
            for (h, heading) in page.headings.iter().enumerate() {
                self.push(SelectionNode {
                    kind: NodeKind::Heading {
                        journal: j,
                        page: p,
                        heading: h,
                    },
                    label: heading.text.clone(),
                    included: true,
                    parent: Some(pid),
                    children: Vec::new(),
                    snapshot: None,
                });
            }
        }
        root
    }

    /// Depth-first, document order.
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(c) = stack.pop() {
            out.push(c);
            stack.extend(self.children(c).iter().rev().copied());
        }
        out
    }

    fn set_flag(&mut self, id: NodeId, included: bool) -> bool {
        match self.node_mut(id) {
            Some(n) if n.included != included => {
                n.included = included;
                true
            }
            _ => false,
        }
    }

    fn discard_ancestor_snapshots(&mut self, id: NodeId) {
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if let Some(n) = self.node_mut(p) {
                n.snapshot = None;
            }
            cur = self.parent(p);
        }
    }

    /// Re-derive journal indices from root order.
    fn renumber(&mut self) {
        for (j, root) in self.roots.clone().into_iter().enumerate() {
            let mut ids = self.descendants(root);
            ids.push(root);
            for id in ids {
                if let Some(n) = self.node_mut(id) {
                    n.kind = n.kind.with_journal(j);
                }
            }
        }
    }

    fn notify(&self, changed: &[NodeId]) {
        for (_, o) in &self.observers {
            o.selection_changed(self, changed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetStore, Heading, Page};
    use std::sync::Mutex;

    fn page(title: &str, headings: &[&str]) -> Page {
        Page {
            id: title.to_lowercase(),
            title: title.into(),
            level: 1,
            sort: 0,
            body: String::new(),
            blocks: Vec::new(),
            headings: headings
                .iter()
                .enumerate()
                .map(|(i, h)| Heading {
                    text: (*h).into(),
                    level: 2,
                    offset: i * 10,
                    block_index: i,
                })
                .collect(),
        }
    }

    fn journal(title: &str, pages: Vec<Page>) -> JournalEntry {
        JournalEntry {
            id: title.to_lowercase(),
            title: title.into(),
            pages,
            assets: Arc::new(AssetStore::new()),
        }
    }

    fn sample() -> SelectionModel {
        SelectionModel::build(&[
            journal(
                "Lore",
                vec![page("Gods", &["Sun", "Moon"]), page("Places", &["Keep"])],
            ),
            journal("Rules", vec![page("Combat", &[])]),
        ])
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<usize>>,
    }

    impl SelectionObserver for Recorder {
        fn selection_changed(&self, _model: &SelectionModel, changed: &[NodeId]) {
            self.calls.lock().unwrap().push(changed.len());
        }
    }

    #[test]
    fn build_includes_everything() {
        let m = sample();
        assert_eq!(m.len(), 9);
        assert_eq!(m.included_count(), 9);
        assert_eq!(m.included_leaves().len(), 6);
        assert_eq!(m.check_state(m.roots()[0]), CheckState::Checked);
    }

    #[test]
    fn find_by_path() {
        let m = sample();
        let moon = m.find("Lore/Gods/Moon").unwrap();
        assert_eq!(
            m.kind(moon),
            Some(NodeKind::Heading {
                journal: 0,
                page: 0,
                heading: 1
            })
        );
        assert_eq!(m.path(moon).as_deref(), Some("Lore/Gods/Moon"));
        assert_eq!(m.find("rules/combat"), m.page_node(1, 0));
        assert!(m.find("Lore/Nope").is_none());
    }

    #[test]
    fn heading_toggle_is_local() {
        let mut m = sample();
        let sun = m.find("Lore/Gods/Sun").unwrap();
        let changed = m.toggle(sun, false).unwrap();
        assert_eq!(changed, vec![sun]);
        let gods = m.find("Lore/Gods").unwrap();
        assert!(m.is_included(gods));
        assert_eq!(m.check_state(gods), CheckState::Partial);
        assert_eq!(m.check_state(m.roots()[0]), CheckState::Partial);
    }

    #[test]
    fn journal_off_then_on_restores_heading_flags() {
        let mut m = sample();
        let lore = m.roots()[0];
        let moon = m.find("Lore/Gods/Moon").unwrap();
        m.toggle(moon, false).unwrap();

        m.toggle(lore, false).unwrap();
        assert_eq!(m.check_state(lore), CheckState::Unchecked);
        assert!(m
            .included_leaves()
            .iter()
            .all(|i| !matches!(i, IncludedItem::Page { journal: 0, .. } | IncludedItem::Heading { journal: 0, .. })));

        m.toggle(lore, true).unwrap();
        assert!(!m.is_included(moon));
        assert!(m.is_included(m.find("Lore/Gods/Sun").unwrap()));
        assert!(m.is_included(m.find("Lore/Places").unwrap()));
    }

    #[test]
    fn direct_edit_discards_ancestor_snapshot() {
        let mut m = sample();
        let lore = m.roots()[0];
        let moon = m.find("Lore/Gods/Moon").unwrap();
        m.toggle(moon, false).unwrap();
        m.toggle(lore, false).unwrap();
        // edit a child while the journal is off
        let keep = m.find("Lore/Places/Keep").unwrap();
        m.toggle(keep, true).unwrap();
        m.toggle(keep, false).unwrap();
        m.toggle(lore, true).unwrap();
        assert!(m.is_included(moon));
        assert_eq!(m.check_state(lore), CheckState::Checked);
    }

    #[test]
    fn all_off_snapshot_restores_everything() {
        let mut m = sample();
        let gods = m.find("Lore/Gods").unwrap();
        m.toggle(gods, false).unwrap();
        let lore = m.roots()[0];
        m.toggle(lore, false).unwrap();
        m.toggle(lore, true).unwrap();
        assert!(!m.is_included(gods));
        m.toggle(gods, true).unwrap();
        assert_eq!(m.check_state(gods), CheckState::Checked);
    }

    #[test]
    fn page_excluded_with_included_heading() {
        let mut m = sample();
        let gods = m.find("Lore/Gods").unwrap();
        m.toggle(gods, false).unwrap();
        m.toggle(m.find("Lore/Gods/Moon").unwrap(), true).unwrap();
        let leaves = m.included_leaves();
        assert!(!leaves.contains(&IncludedItem::Page { journal: 0, page: 0 }));
        assert!(leaves.contains(&IncludedItem::Heading {
            journal: 0,
            page: 0,
            heading: 1
        }));
    }

    #[test]
    fn set_all_and_observers() {
        let mut m = sample();
        let rec = Arc::new(Recorder::default());
        let sub = m.subscribe(rec.clone());
        assert_eq!(m.set_all(false).len(), 9);
        assert!(m.included_leaves().is_empty());
        m.set_all(false);
        assert!(m.unsubscribe(sub));
        assert!(!m.unsubscribe(sub));
        m.set_all(true);
        assert_eq!(*rec.calls.lock().unwrap(), vec![9, 0]);
    }

    #[test]
    fn move_and_remove_renumber_journals() {
        let mut m = sample();
        let combat = m.find("Rules/Combat").unwrap();
        m.move_root(1, 0).unwrap();
        assert_eq!(m.kind(combat), Some(NodeKind::Page { journal: 0, page: 0 }));
        m.remove_root(0).unwrap();
        assert!(m.kind(combat).is_none());
        assert_eq!(m.roots().len(), 1);
        let sun = m.find("Lore/Gods/Sun").unwrap();
        assert_eq!(m.kind(sun).map(|k| k.journal()), Some(0));
        assert!(m.remove_root(3).is_err());
        assert!(m.move_root(0, 2).is_err());
    }

    #[test]
    fn append_adds_included_journal() {
        let mut m = sample();
        let rec = Arc::new(Recorder::default());
        m.subscribe(rec.clone());
        let id = m.append(&journal("Extra", vec![page("One", &["A"])]));
        assert_eq!(m.kind(id), Some(NodeKind::Journal { journal: 2 }));
        assert_eq!(*rec.calls.lock().unwrap(), vec![3]);
    }

    #[test]
    fn unknown_path_is_an_error() {
        let mut m = sample();
        let err = m.toggle_path("Nope", false).unwrap_err();
        assert!(matches!(err, Journal2PdfError::UnknownSelection { .. }));
    }
}
