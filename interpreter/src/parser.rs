use tag_core::{Keyword, Token, TokenStream, Type};
use tracing::debug;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::error::{Error, TagResult};
use crate::value::{Conversion, Value};

/// Builds the tree while tokens arrive. There is no lookahead: every token either attaches a node
/// under the cursor, moves the cursor, or both.
pub struct Parser<'a> {
    ast: &'a mut Ast,
    root: NodeId,
    cursor: NodeId,

    // Blocks that are currently open, innermost last. A name read while the cursor sits on the
    // innermost one starts a statement.
    scopes: Vec<NodeId>,
}

impl<'a> Parser<'a> {
    /// Starts a new root block in `ast`. Every parsed source gets its own root so that the
    /// bodies of functions declared in inserted files stay in the shared arena.
    pub fn new(ast: &'a mut Ast) -> Self {
        let root = ast.add_root(1);
        Parser {
            ast,
            root,
            cursor: root,
            scopes: Vec::new(),
        }
    }

    pub fn parse(mut self, mut stream: TokenStream) -> TagResult<NodeId> {
        let mut line = 1;
        for token in stream.by_ref() {
            line = token.line;
            if token.ty == Type::Eof {
                break;
            }
            self.consume(token)?;
        }

        if let Some(err) = stream.error() {
            return Err(Error::from(err.clone()));
        }
        if let Some(open) = self.scopes.last() {
            return Err(Error::parser(
                line,
                format!("block opened on line {} is never closed", self.ast[*open].line),
            ));
        }

        debug!(nodes = self.ast.len(), "parsed source");
        Ok(self.root)
    }

    fn boundary(&self) -> NodeId {
        self.scopes.last().copied().unwrap_or(self.root)
    }

    fn attach(&mut self, kind: NodeKind, line: usize) -> NodeId {
        self.ast.attach(self.cursor, kind, line)
    }

    fn descend(&mut self, kind: NodeKind, line: usize) {
        self.cursor = self.attach(kind, line);
    }

    fn consume(&mut self, token: Token) -> TagResult<()> {
        let line = token.line;
        match token.ty {
            Type::Keyword(keyword) => self.descend(keyword_node(keyword), line),
            Type::Name => {
                if self.cursor == self.boundary() {
                    self.descend(NodeKind::Declaration(token.lexeme), line);
                } else {
                    self.attach(NodeKind::Reference(token.lexeme), line);
                }
            }
            Type::Operator(op) => {
                self.attach(NodeKind::Operator(op), line);
            }
            Type::String | Type::Int | Type::Float | Type::Bool => {
                self.attach(NodeKind::Literal(Value::from(token.value)), line);
            }
            Type::Comma => {
                self.attach(NodeKind::Comma, line);
            }
            Type::Colon => {
                self.attach(NodeKind::Colon, line);
            }
            Type::Separator => {
                if *self.ast.kind(self.cursor) == NodeKind::Expression {
                    self.cursor = self.ast.parent(self.cursor);
                } else {
                    self.cursor = self.boundary();
                }
            }
            Type::OpenExpression => self.descend(NodeKind::Expression, line),
            Type::CloseExpression => self.close_expression(),
            Type::OpenBlock => {
                self.descend(NodeKind::Tag, line);
                self.scopes.push(self.cursor);
            }
            Type::CloseBlock => {
                if self.scopes.pop().is_none() {
                    return Err(Error::parser(line, "unbalanced '}'"));
                }
                self.cursor = self.boundary();
            }
            Type::OpenIndex => self.descend(NodeKind::Brackets, line),
            Type::CloseIndex => self.close_index(line)?,
            Type::Eof => {
                return Err(Error::parser(line, "unexpected end of input"));
            }
        }
        Ok(())
    }

    // Walks out of any inline keyword node to the expression it lives in, then out of that
    // expression. An argument list also closes the call it belongs to.
    fn close_expression(&mut self) {
        let mut node = self.cursor;
        while self.ast.kind(node).is_inline() && node != self.root {
            node = self.ast.parent(node);
        }
        if *self.ast.kind(node) != NodeKind::Expression {
            return;
        }

        let parent = self.ast.parent(node);
        self.cursor = if *self.ast.kind(parent) == NodeKind::Call {
            self.ast.parent(parent)
        } else {
            parent
        };
    }

    fn close_index(&mut self, line: usize) -> TagResult<()> {
        let mut node = self.cursor;
        loop {
            if *self.ast.kind(node) == NodeKind::Brackets {
                self.cursor = self.ast.parent(node);
                return Ok(());
            }
            if node == self.boundary() || node == self.ast.parent(node) {
                return Err(Error::parser(line, "unbalanced ']'"));
            }
            node = self.ast.parent(node);
        }
    }
}

fn keyword_node(keyword: Keyword) -> NodeKind {
    match keyword {
        Keyword::Print => NodeKind::Print,
        Keyword::Input => NodeKind::Input,
        Keyword::Free => NodeKind::Free,
        Keyword::Fun => NodeKind::Fun,
        Keyword::Break => NodeKind::Break,
        Keyword::Return => NodeKind::Return,
        Keyword::Call => NodeKind::Call,
        Keyword::If => NodeKind::If,
        Keyword::Else => NodeKind::Else,
        Keyword::Elif => NodeKind::Elif,
        Keyword::Repeat => NodeKind::Repeat,
        Keyword::While => NodeKind::While,
        Keyword::Insert => NodeKind::Insert,
        Keyword::Local => NodeKind::Local,
        Keyword::String => NodeKind::Convert(Conversion::String),
        Keyword::Int => NodeKind::Convert(Conversion::Int),
        Keyword::Float => NodeKind::Convert(Conversion::Float),
        Keyword::Bool => NodeKind::Convert(Conversion::Bool),
        Keyword::Extern => NodeKind::Extern,
    }
}
