//! In-memory symbol trees and name-path resolution.
//!
//! Trees are arenas: nodes live in a flat `Vec` and refer to parents and
//! children by index, so ancestor traversal needs no owning back-links. A
//! name-path is a `/`-separated chain of symbol names; an absolute path
//! (leading `/`) anchors at the file's top level, a relative one matches the
//! trailing chain anywhere in the tree.

use std::fmt;
use std::str::FromStr;

use lsp_types::{DocumentSymbol, DocumentSymbolResponse, Position, Range, SymbolInformation, SymbolKind};
use serde::{Deserialize, Serialize};

use crate::lsp::types::{range_contains, range_encloses, range_to_byte_span};

/// Index of a symbol inside its [`SymbolTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub u32);

impl SymbolId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One symbol in the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolNode {
    /// Symbol name as reported by the language server.
    pub name: String,
    /// LSP symbol kind.
    pub kind: SymbolKind,
    /// Full extent of the symbol, body included.
    pub range: Range,
    /// The identifier span inside `range`.
    pub selection_range: Range,
    /// Exact source slice of `range` at the content version the tree was
    /// built from.
    pub body: Option<String>,
    /// Parent index; `None` for top-level symbols.
    pub parent: Option<SymbolId>,
    /// Children in document order.
    pub children: Vec<SymbolId>,
}

/// A whole file's symbol hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolTree {
    nodes: Vec<SymbolNode>,
    roots: Vec<SymbolId>,
}

/// Options for [`SymbolTree::find_by_name_path`].
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// When true, the final segment matches as a substring; earlier segments
    /// stay exact.
    pub substring_match: bool,
    /// Restrict matches to these kinds (empty = all kinds).
    pub kinds: Vec<SymbolKind>,
    /// Stop after this many matches.
    pub max_results: usize,
    /// Do not descend below this depth (top level = 0).
    pub max_depth: Option<usize>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            substring_match: false,
            kinds: Vec::new(),
            max_results: usize::MAX,
            max_depth: None,
        }
    }
}

/// A `/`-separated chain of symbol names. `/Calc/add` is absolute (anchored
/// at the file's top level); `Calc/add` is relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePath {
    absolute: bool,
    segments: Vec<String>,
}

impl NamePath {
    /// The name segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when anchored at the file's top level.
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// The innermost segment.
    pub fn last(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl FromStr for NamePath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let absolute = s.starts_with('/');
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        if trimmed.is_empty() {
            return Err("empty name path".to_string());
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(format!("empty segment in name path '{s}'"));
        }
        Ok(Self { absolute, segments })
    }
}

impl fmt::Display for NamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        f.write_str(&self.segments.join("/"))
    }
}

impl SymbolTree {
    /// Builds the uniform tree from either document-symbol response variant.
    ///
    /// The nested variant maps directly; the flat variant has no parent
    /// links, so parenthood is synthesized from range containment.
    pub fn from_response(response: &DocumentSymbolResponse, content: &str) -> Self {
        match response {
            DocumentSymbolResponse::Nested(symbols) => Self::from_nested(symbols, content),
            DocumentSymbolResponse::Flat(symbols) => Self::from_flat(symbols, content),
        }
    }

    fn from_nested(symbols: &[DocumentSymbol], content: &str) -> Self {
        let mut tree = Self::default();
        for symbol in symbols {
            let id = tree.insert_nested(symbol, None, content);
            tree.roots.push(id);
        }
        tree
    }

    fn insert_nested(
        &mut self,
        symbol: &DocumentSymbol,
        parent: Option<SymbolId>,
        content: &str,
    ) -> SymbolId {
        let id = SymbolId(self.nodes.len() as u32);
        self.nodes.push(SymbolNode {
            name: symbol.name.clone(),
            kind: symbol.kind,
            range: symbol.range,
            selection_range: symbol.selection_range,
            body: Some(content[range_to_byte_span(content, symbol.range)].to_string()),
            parent,
            children: Vec::new(),
        });
        if let Some(children) = &symbol.children {
            for child in children {
                let child_id = self.insert_nested(child, Some(id), content);
                self.nodes[id.index()].children.push(child_id);
            }
        }
        id
    }

    fn from_flat(symbols: &[SymbolInformation], content: &str) -> Self {
        let mut order: Vec<usize> = (0..symbols.len()).collect();
        // Outer symbols first: earlier start, then wider extent.
        order.sort_by(|&a, &b| {
            let (ra, rb) = (symbols[a].location.range, symbols[b].location.range);
            ra.start
                .cmp(&rb.start)
                .then(rb.end.cmp(&ra.end))
                .then(a.cmp(&b))
        });

        let mut tree = Self::default();
        let mut stack: Vec<SymbolId> = Vec::new();
        for idx in order {
            let info = &symbols[idx];
            let range = info.location.range;
            while let Some(&top) = stack.last() {
                if range_encloses(tree.nodes[top.index()].range, range) {
                    break;
                }
                stack.pop();
            }
            let parent = stack.last().copied();
            let id = SymbolId(tree.nodes.len() as u32);
            tree.nodes.push(SymbolNode {
                name: info.name.clone(),
                kind: info.kind,
                range,
                selection_range: range,
                body: Some(content[range_to_byte_span(content, range)].to_string()),
                parent,
                children: Vec::new(),
            });
            match parent {
                Some(p) => tree.nodes[p.index()].children.push(id),
                None => tree.roots.push(id),
            }
            stack.push(id);
        }
        tree
    }

    /// Number of symbols in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the file has no symbols.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level symbols in document order.
    pub fn roots(&self) -> &[SymbolId] {
        &self.roots
    }

    /// Borrows a node.
    pub fn get(&self, id: SymbolId) -> &SymbolNode {
        &self.nodes[id.index()]
    }

    /// Depth of a symbol (top level = 0).
    pub fn depth(&self, id: SymbolId) -> usize {
        self.ancestors(id).count()
    }

    /// Ancestors of `id`, innermost first. Lazy and finite.
    pub fn ancestors(&self, id: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        let mut current = self.get(id).parent;
        std::iter::from_fn(move || {
            let next = current?;
            current = self.get(next).parent;
            Some(next)
        })
    }

    /// Descendants of `id` in pre-order, `id` excluded. Lazy and finite.
    pub fn descendants(&self, id: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        let mut stack: Vec<SymbolId> = self.get(id).children.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.get(next).children.iter().rev());
            Some(next)
        })
    }

    /// All symbols in pre-order.
    pub fn iter_preorder(&self) -> impl Iterator<Item = SymbolId> + '_ {
        let mut stack: Vec<SymbolId> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.get(next).children.iter().rev());
            Some(next)
        })
    }

    /// Absolute name-path of a symbol, built by ascending parent links.
    pub fn name_path_of(&self, id: SymbolId) -> NamePath {
        let mut segments: Vec<String> =
            self.ancestors(id).map(|a| self.get(a).name.clone()).collect();
        segments.reverse();
        segments.push(self.get(id).name.clone());
        NamePath {
            absolute: true,
            segments,
        }
    }

    /// Finds symbols matching a name-path.
    ///
    /// A symbol matches when its trailing ancestor-name chain equals the
    /// path's segments; an absolute path additionally requires the chain to
    /// start at the top level. With `substring_match`, the final segment is
    /// a substring match and all earlier segments stay exact. Results come
    /// back in pre-order; traversal stops early at `max_results`.
    pub fn find_by_name_path(&self, path: &NamePath, opts: &FindOptions) -> Vec<SymbolId> {
        let mut hits = Vec::new();
        let mut stack: Vec<(SymbolId, usize)> =
            self.roots.iter().rev().map(|&id| (id, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            if hits.len() >= opts.max_results {
                break;
            }
            if self.matches(id, path, opts) {
                hits.push(id);
                if hits.len() >= opts.max_results {
                    break;
                }
            }
            if opts.max_depth.is_none_or(|max| depth < max) {
                stack.extend(self.get(id).children.iter().rev().map(|&c| (c, depth + 1)));
            }
        }
        hits
    }

    fn matches(&self, id: SymbolId, path: &NamePath, opts: &FindOptions) -> bool {
        let node = self.get(id);
        if !opts.kinds.is_empty() && !opts.kinds.contains(&node.kind) {
            return false;
        }

        let segments = path.segments();
        let last = path.last();
        let final_matches = if opts.substring_match {
            node.name.contains(last)
        } else {
            node.name == last
        };
        if !final_matches {
            return false;
        }

        // Walk outward: every earlier segment must match an ancestor exactly.
        let mut ancestors = self.ancestors(id);
        for segment in segments[..segments.len() - 1].iter().rev() {
            match ancestors.next() {
                Some(ancestor) if self.get(ancestor).name == *segment => {}
                _ => return false,
            }
        }
        // Absolute paths anchor the chain at the file's top level.
        !path.is_absolute() || ancestors.next().is_none()
    }

    /// The smallest symbol whose range contains `position`.
    pub fn smallest_enclosing(&self, position: Position) -> Option<SymbolId> {
        let mut best: Option<SymbolId> = None;
        let mut candidates: Vec<SymbolId> = self.roots.to_vec();
        while let Some(id) = candidates.pop() {
            if range_contains(self.get(id).range, position) {
                best = Some(id);
                candidates.clear();
                candidates.extend(self.get(id).children.iter());
            }
        }
        best
    }

    /// Checks the structural invariants: child ranges strictly inside parent
    /// ranges, sibling ranges disjoint, selection ranges inside full ranges.
    pub fn validate(&self) -> Result<(), String> {
        for (index, node) in self.nodes.iter().enumerate() {
            if !range_encloses(node.range, node.selection_range) {
                return Err(format!("selection range of '{}' escapes its range", node.name));
            }
            if let Some(parent) = node.parent {
                let parent_node = self.get(parent);
                if !range_encloses(parent_node.range, node.range) {
                    return Err(format!(
                        "'{}' is not contained in parent '{}'",
                        node.name, parent_node.name
                    ));
                }
                if !parent_node.children.contains(&SymbolId(index as u32)) {
                    return Err(format!("'{}' missing from parent's children", node.name));
                }
            }
            for pair in node.children.windows(2) {
                let (a, b) = (self.get(pair[0]), self.get(pair[1]));
                if a.range.end > b.range.start {
                    return Err(format!(
                        "siblings '{}' and '{}' overlap",
                        a.name, b.name
                    ));
                }
            }
        }
        Ok(())
    }
}
