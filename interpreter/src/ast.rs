use std::ops::{Index, IndexMut};
use std::rc::Rc;

use tag_core::Operator;

use crate::value::{Conversion, Value};

// The tree is kept in an arena: nodes refer to their parent and children by index, so walking
// up from the parser's cursor needs no back-references.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // A brace-delimited statement sequence, also the root of every parsed source.
    Tag,
    Expression,
    Brackets,

    Literal(Value),
    Operator(Operator),
    Reference(String),
    Declaration(String),
    Comma,
    Colon,

    Print,
    Input,
    Free,
    Fun,
    Break,
    Return,
    Call,
    If,
    Elif,
    Else,
    Repeat,
    While,
    Insert,
    Local,
    Convert(Conversion),
    Extern,
}

impl NodeKind {
    /// Nodes that yield a value when they appear in an operand position.
    pub(crate) fn is_value(&self) -> bool {
        matches!(
            self,
            NodeKind::Expression
                | NodeKind::Brackets
                | NodeKind::Literal(_)
                | NodeKind::Reference(_)
                | NodeKind::Call
                | NodeKind::Input
                | NodeKind::Convert(_)
        )
    }

    // Keyword nodes that live inside an expression and end with it.
    pub(crate) fn is_inline(&self) -> bool {
        matches!(self, NodeKind::Call | NodeKind::Input | NodeKind::Convert(_))
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            NodeKind::Tag => String::from("block"),
            NodeKind::Expression => String::from("expression"),
            NodeKind::Brackets => String::from("brackets"),
            NodeKind::Literal(value) => format!("literal '{}'", value),
            NodeKind::Operator(op) => format!("operator '{}'", op),
            NodeKind::Reference(name) | NodeKind::Declaration(name) => format!("name '{}'", name),
            NodeKind::Comma => String::from("','"),
            NodeKind::Colon => String::from("':'"),
            NodeKind::Convert(to) => format!("'{}'", format!("{:?}", to).to_lowercase()),
            other => format!("'{}'", format!("{:?}", other).to_lowercase()),
        }
    }
}

/// One operand of a flattened expression: the node producing the value, the prefix operators
/// applied to it and the subscripts that follow it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Operand {
    pub(crate) node: NodeId,
    pub(crate) prefix: Vec<Operator>,
    pub(crate) subscripts: Vec<NodeId>,
}

/// A flat run of operands interleaved with binary operators, `operators[i]` sitting between
/// `operands[i]` and `operands[i + 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Sequence {
    pub(crate) operands: Vec<Operand>,
    pub(crate) operators: Vec<(Operator, usize)>,
}

impl Sequence {
    pub(crate) fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    // The name if this sequence is nothing but a bare reference.
    pub(crate) fn single(&self) -> Option<NodeId> {
        match self.operands.as_slice() {
            [operand] if operand.prefix.is_empty() && operand.subscripts.is_empty() => {
                Some(operand.node)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BranchKind {
    If,
    Elif,
    While,
}

/// What a node learned about its children during the load pass.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shape {
    Unloaded,
    Leaf,
    Block,
    // Parenthesised groups split on commas; `Pair` when the group holds `name : collection`.
    Groups(Vec<Rc<Sequence>>),
    Pair(String, Rc<Sequence>),
    Array(Vec<Rc<Sequence>>),
    Print(Rc<Sequence>),
    Input(Rc<Sequence>),
    Return(Rc<Sequence>),
    Convert(Conversion, Rc<Sequence>),
    Insert(Rc<Sequence>),
    Declaration {
        name: String,
        subscripts: Vec<Rc<Sequence>>,
        op: Operator,
        value: Rc<Sequence>,
    },
    Branch {
        kind: BranchKind,
        condition: NodeId,
        body: NodeId,
        chained: Option<NodeId>,
    },
    Else {
        body: NodeId,
    },
    Repeat {
        count: NodeId,
        body: NodeId,
    },
    Foreach {
        item: String,
        collection: Rc<Sequence>,
        body: NodeId,
    },
    Call {
        name: String,
        args: Vec<Rc<Sequence>>,
    },
    Fun,
    Break,
    Free(Vec<String>),
    FreeAll,
    Local {
        body: NodeId,
    },
    Extern {
        module: String,
        alias: String,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    pub parent: NodeId,
    pub line: usize,
    pub(crate) executable: bool,
    pub(crate) current: usize,
    pub(crate) shape: Rc<Shape>,
}

#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Creates a root block whose parent is itself.
    pub(crate) fn add_root(&mut self, line: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(NodeKind::Tag, id, line));
        id
    }

    /// Creates a node and attaches it as the last child of `parent`. The parent link is set here
    /// and never changes afterwards.
    pub(crate) fn attach(&mut self, parent: NodeId, kind: NodeKind, line: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind, parent, line));
        self[parent].children.push(id);
        id
    }

    pub(crate) fn parent(&self, id: NodeId) -> NodeId {
        self[id].parent
    }

    pub(crate) fn kind(&self, id: NodeId) -> &NodeKind {
        &self[id].kind
    }

    // The sibling right after `id` in its parent's children, if any.
    pub(crate) fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id);
        if parent == id {
            return None;
        }
        let siblings = &self[parent].children;
        let pos = siblings.iter().position(|child| *child == id)?;
        siblings.get(pos + 1).copied()
    }

    pub(crate) fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id);
        if parent == id {
            return None;
        }
        let siblings = &self[parent].children;
        let pos = siblings.iter().position(|child| *child == id)?;
        pos.checked_sub(1).map(|prev| siblings[prev])
    }
}

impl Node {
    fn new(kind: NodeKind, parent: NodeId, line: usize) -> Self {
        Node {
            kind,
            children: Vec::new(),
            parent,
            line,
            executable: true,
            current: 0,
            shape: Rc::new(Shape::Unloaded),
        }
    }
}

impl Index<NodeId> for Ast {
    type Output = Node;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index.0]
    }
}

impl IndexMut<NodeId> for Ast {
    fn index_mut(&mut self, index: NodeId) -> &mut Self::Output {
        &mut self.nodes[index.0]
    }
}
