//! Scene tree: the document being exported.
//!
//! A [`Document`] is an arena of nodes addressed by [`NodeId`]. Elements carry
//! a tag, classes, attributes, inline style and a pre-computed layout frame in
//! document coordinates (pixels, origin at the root's top-left corner). The
//! frames are produced by whatever laid the document out; this crate never
//! lays out text itself.
//!
//! Documents are plain data: cloning a subtree yields an independent arena
//! that can be mutated and discarded without touching the source, which is
//! what the isolation stage relies on.
//!
//! ## JSON scenes
//!
//! [`Document::from_json`] accepts a nested tree:
//!
//! ```json
//! { "tag": "div", "class": "cv", "frame": { "x": 0, "y": 0, "width": 794, "height": 1400 },
//!   "children": [
//!     { "tag": "section", "frame": { "y": 0, "height": 300, "width": 794 },
//!       "style": { "background": "#f4f4f4" } },
//!     { "tag": "img", "attrs": { "src": "/users/me/image" },
//!       "frame": { "x": 20, "y": 20, "width": 120, "height": 120 } }
//!   ] }
//! ```

use crate::error::ExportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Index of a node inside one [`Document`]. Not meaningful across documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Axis-aligned box in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// An element node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
    /// Layout box relative to the document origin.
    pub frame: Rect,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_style(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(name.into(), value.into());
        self
    }

    pub fn with_frame(mut self, frame: Rect) -> Self {
        self.frame = frame;
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn is_image(&self) -> bool {
        self.tag == "img"
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    pub fn style(&self, name: &str) -> Option<&str> {
        self.style.get(name).map(String::as_str)
    }

    pub fn set_style(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.style.insert(name.into(), value.into());
    }
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

/// An arena-allocated element tree. The root is always an element.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// Create a document whose root is `root`.
    pub fn new(root: Element) -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Element(root),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, text nodes included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).map(|n| &n.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.data(id)? {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(id.0)?.data {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    fn push(&mut self, parent: NodeId, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Append an element as the last child of `parent`.
    pub fn append_element(&mut self, parent: NodeId, element: Element) -> Option<NodeId> {
        self.element(parent)?;
        Some(self.push(parent, NodeData::Element(element)))
    }

    /// Append a text node as the last child of `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: impl Into<String>) -> Option<NodeId> {
        self.element(parent)?;
        Some(self.push(parent, NodeData::Text(text.into())))
    }

    /// `id` and everything below it, in document (pre-)order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Elements strictly below `id` that match `selector`, in document order.
    pub fn select_all(&self, id: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .skip(1)
            .filter(|n| self.element(*n).is_some_and(|el| selector.matches(el)))
            .collect()
    }

    /// First element at or below `id` matching `selector`.
    pub fn find_first(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .find(|n| self.element(*n).is_some_and(|el| selector.matches(el)))
    }

    /// Every `<img>` element strictly below `id`, in document order.
    pub fn images(&self, id: NodeId) -> Vec<NodeId> {
        self.select_all(id, &Selector::Tag("img".into()))
    }

    /// Deep-copy the subtree rooted at `id` into a new document.
    ///
    /// Returns `None` when `id` is missing or is a text node.
    pub fn clone_subtree(&self, id: NodeId) -> Option<Document> {
        let root = self.element(id)?.clone();
        let mut out = Document::new(root);
        let out_root = out.root();
        for &child in self.children(id) {
            out.copy_from(out_root, self, child);
        }
        Some(out)
    }

    /// Deep-copy `src`'s subtree at `src_id` under `parent`. Returns the new
    /// node's id in `self`.
    pub fn append_subtree(
        &mut self,
        parent: NodeId,
        src: &Document,
        src_id: NodeId,
    ) -> Option<NodeId> {
        self.element(parent)?;
        src.data(src_id)?;
        Some(self.copy_from(parent, src, src_id))
    }

    fn copy_from(&mut self, parent: NodeId, src: &Document, src_id: NodeId) -> NodeId {
        // Explicit stack: CV trees are shallow but scenes come from user input.
        let first = self.push(parent, src.nodes[src_id.0].data.clone());
        let mut stack: Vec<(NodeId, NodeId)> = src
            .children(src_id)
            .iter()
            .rev()
            .map(|&c| (first, c))
            .collect();
        while let Some((dst_parent, src_child)) = stack.pop() {
            let copied = self.push(dst_parent, src.nodes[src_child.0].data.clone());
            stack.extend(src.children(src_child).iter().rev().map(|&c| (copied, c)));
        }
        first
    }

    /// Parse a nested JSON scene.
    pub fn from_json(json: &str) -> Result<Document, ExportError> {
        let scene: SceneNode =
            serde_json::from_str(json).map_err(|e| ExportError::InvalidScene(e.to_string()))?;
        Document::from_scene(scene)
    }

    /// Read and parse a JSON scene file.
    pub fn load(path: impl AsRef<Path>) -> Result<Document, ExportError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ExportError::SceneRead {
            path: path.to_path_buf(),
            source,
        })?;
        Document::from_json(&json)
    }

    /// Flatten a nested [`SceneNode`] into an arena.
    pub fn from_scene(scene: SceneNode) -> Result<Document, ExportError> {
        if scene.tag.trim().is_empty() {
            return Err(ExportError::InvalidScene("root node has no tag".into()));
        }
        let (root, text, children) = scene.into_parts();
        let mut doc = Document::new(root);
        let mut stack: Vec<(NodeId, Option<String>, Vec<SceneNode>)> =
            vec![(doc.root(), text, children)];

        while let Some((parent, text, children)) = stack.pop() {
            if let Some(text) = text {
                doc.push(parent, NodeData::Text(text));
            }
            for child in children {
                if child.tag.trim().is_empty() {
                    return Err(ExportError::InvalidScene(
                        "every node needs a tag (use \"text\" for text content)".into(),
                    ));
                }
                let (el, text, grand) = child.into_parts();
                let id = doc.push(parent, NodeData::Element(el));
                stack.push((id, text, grand));
            }
        }
        Ok(doc)
    }
}

/// Serialised form of one element in a JSON scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneNode {
    pub tag: String,
    /// Space-separated class list, as in HTML.
    pub class: String,
    pub attrs: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
    pub frame: Rect,
    /// Text content, stored as a text child ahead of `children`.
    pub text: Option<String>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    fn into_parts(self) -> (Element, Option<String>, Vec<SceneNode>) {
        let el = Element {
            tag: self.tag.trim().to_ascii_lowercase(),
            classes: self.class.split_whitespace().map(str::to_string).collect(),
            attributes: self.attrs,
            style: self.style,
            frame: self.frame,
        };
        (el, self.text, self.children)
    }
}

/// A simple selector: `.class` or a tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Class(String),
    Tag(String),
}

impl Selector {
    pub fn parse(s: &str) -> Selector {
        let s = s.trim();
        match s.strip_prefix('.') {
            Some(class) => Selector::Class(class.to_string()),
            None => Selector::Tag(s.to_ascii_lowercase()),
        }
    }

    pub fn matches(&self, el: &Element) -> bool {
        match self {
            Selector::Class(c) => el.has_class(c),
            Selector::Tag(t) => el.tag.eq_ignore_ascii_case(t),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Class(c) => write!(f, ".{c}"),
            Selector::Tag(t) => f.write_str(t),
        }
    }
}
