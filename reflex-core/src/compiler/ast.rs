//! Template AST.
//!
//! Nodes live in an arena owned by [`Ast`] and refer to each other by
//! [`NodeId`]. Every node knows its parent, so passes can walk up as well as
//! down without reference cycles.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Index of a node in its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A point in the template source. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

impl Position {
    /// The position reached after consuming `text` from here.
    pub fn advanced(mut self, text: &str) -> Position {
        let mut newlines = 0;
        let mut last_newline = None;
        for (i, c) in text.char_indices() {
            if c == '\n' {
                newlines += 1;
                last_newline = Some(i);
            }
        }
        self.offset += text.len();
        self.line += newlines;
        self.column = match last_newline {
            Some(i) => text[i + 1..].chars().count() + 1,
            None => self.column + text.chars().count(),
        };
        self
    }
}

/// A contiguous span of the template source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start: Position,
    pub end: Position,
    pub source: String,
}

/// How the parser classified an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Element,
    Component,
    Slot,
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    #[default]
    Html,
    Svg,
    MathMl,
}

/// A plain `name="value"` attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    pub loc: SourceLocation,
}

/// A directive argument (`click` in `@click`, `key` in `:[key]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveArg {
    pub content: String,
    pub is_static: bool,
    pub loc: SourceLocation,
}

/// A directive expression with its location (quotes excluded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveExp {
    pub content: String,
    pub loc: SourceLocation,
}

/// `v-name:arg.mod="exp"` and its shorthands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    /// Normalized name: `bind` for `:`, `on` for `@`, `slot` for `#`.
    pub name: String,
    /// The attribute name as written.
    pub raw_name: String,
    pub arg: Option<DirectiveArg>,
    pub exp: Option<DirectiveExp>,
    pub modifiers: SmallVec<[String; 4]>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prop {
    Attribute(Attribute),
    Directive(Directive),
}

impl Prop {
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Prop::Attribute(attr) => &attr.loc,
            Prop::Directive(dir) => &dir.loc,
        }
    }
}

/// Annotations filled in by the optimizer and read by code generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodegenHints {
    /// The node and its whole subtree never change between renders.
    pub is_static: bool,
    /// Top of a static subtree worth hoisting into the static render list.
    pub static_root: bool,
    /// Static, but inside a loop, so it cannot be cached across iterations.
    pub static_in_for: bool,
    /// Render once and reuse (`v-once`).
    pub once: bool,
    /// How much flattening the element's children need (0, 1 or 2).
    pub normalization: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    pub tag_type: ElementType,
    pub ns: Namespace,
    pub props: Vec<Prop>,
    pub is_self_closing: bool,
    /// Inside a `v-pre` subtree.
    pub pre: bool,
    pub hints: CodegenHints,
}

impl ElementNode {
    pub fn directive(&self, name: &str) -> Option<&Directive> {
        self.props.iter().find_map(|prop| match prop {
            Prop::Directive(dir) if dir.name == name => Some(dir),
            _ => None,
        })
    }

    pub fn has_directive(&self, name: &str) -> bool {
        self.directive(name).is_some()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.props.iter().find_map(|prop| match prop {
            Prop::Attribute(attr) if attr.name == name => Some(attr),
            _ => None,
        })
    }

    /// The `key` binding, static or bound.
    pub fn key_binding(&self) -> Option<KeyBinding> {
        for prop in &self.props {
            match prop {
                Prop::Attribute(attr) if attr.name == "key" => {
                    return Some(KeyBinding::Static(attr.value.clone().unwrap_or_default()));
                }
                Prop::Directive(dir) if dir.name == "bind" => {
                    if let (Some(arg), Some(exp)) = (&dir.arg, &dir.exp) {
                        if arg.is_static && arg.content == "key" {
                            return Some(KeyBinding::Dynamic(exp.content.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Remove and return the first directive called `name`.
    pub fn take_directive(&mut self, name: &str) -> Option<Directive> {
        let index = self
            .props
            .iter()
            .position(|prop| matches!(prop, Prop::Directive(dir) if dir.name == name))?;
        match self.props.remove(index) {
            Prop::Directive(dir) => Some(dir),
            Prop::Attribute(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBinding {
    Static(String),
    Dynamic(String),
}

/// One branch of a conditional chain. `condition` is `None` for `v-else`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBranch {
    pub condition: Option<String>,
}

/// `v-for="(value, key, index) in source"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForNode {
    pub source: String,
    pub value_alias: Option<String>,
    pub key_alias: Option<String>,
    pub index_alias: Option<String>,
    /// The directive text, kept for diagnostics.
    pub raw: String,
}

/// A piece of a merged text run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompoundPart {
    Text(String),
    Interpolation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    Element(ElementNode),
    Text(String),
    Interpolation(String),
    Comment(String),
    /// A conditional chain; children are `IfBranch` nodes.
    If,
    /// One branch; its single child is the branch's content.
    IfBranch(IfBranch),
    /// A loop; its single child is the repeated content.
    For(ForNode),
    /// Adjacent text and interpolations merged into one text node.
    Compound(Vec<CompoundPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: NodeKind,
    pub loc: SourceLocation,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl AstNode {
    pub fn as_element(&self) -> Option<&ElementNode> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementNode> {
        match &mut self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_text_like(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Text(_) | NodeKind::Interpolation(_) | NodeKind::Compound(_)
        )
    }
}

/// An arena of template nodes rooted at [`NodeId::ROOT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<AstNode>,
    pub source: String,
}

impl Ast {
    pub fn new(source: &str) -> Self {
        let root = AstNode {
            kind: NodeKind::Root,
            loc: SourceLocation {
                start: Position::default(),
                end: Position::default().advanced(source),
                source: source.to_string(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            source: source.to_string(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Allocate a detached node. Attach it with [`Ast::set_children`] or
    /// [`Ast::append_child`].
    pub fn alloc(&mut self, kind: NodeKind, loc: SourceLocation, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(AstNode {
            kind,
            loc,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementNode> {
        self.node(id).as_element()
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementNode> {
        self.node_mut(id).as_element_mut()
    }

    /// Replace `parent`'s children and point each child back at it.
    pub fn set_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        for &child in &children {
            self.nodes[child.index()].parent = Some(parent);
        }
        self.nodes[parent.index()].children = children;
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    /// Whether any ancestor of `id` is a loop.
    pub fn in_for(&self, id: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if matches!(self.kind(node), NodeKind::For(_)) {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Pre-order walk of the subtree rooted at `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Number of allocated nodes, including detached ones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_advances_across_lines() {
        let start = Position::default();
        let end = start.advanced("ab\ncd");
        assert_eq!(end.offset, 5);
        assert_eq!(end.line, 2);
        assert_eq!(end.column, 3);

        let same_line = start.advanced("héllo");
        assert_eq!(same_line.column, 6);
        assert_eq!(same_line.offset, 6);
    }

    #[test]
    fn arena_links_parents() {
        let mut ast = Ast::new("<p></p>");
        let text = ast.alloc(NodeKind::Text("x".into()), SourceLocation::default(), None);
        ast.append_child(ast.root(), text);

        assert_eq!(ast.parent(text), Some(NodeId::ROOT));
        assert_eq!(ast.children(NodeId::ROOT), &[text]);
        assert_eq!(ast.descendants(NodeId::ROOT), vec![NodeId::ROOT, text]);
    }
}
