use std::rc::Rc;

use tag_core::Operator;
use tracing::debug;

use crate::ast::{Ast, BranchKind, NodeId, NodeKind, Operand, Sequence, Shape};
use crate::callable::{Callable, Function};
use crate::env::{Binding, Registry};
use crate::error::{Error, TagResult};

/// The load pass. It runs once over a freshly parsed tree, depth first with children before their
/// parent, and caches what every node needs from its children as a [`Shape`]. Structural errors
/// surface here, before anything has been executed. Function declarations take effect here too.
pub(crate) struct Resolver<'a> {
    ast: &'a mut Ast,
    registry: &'a mut Registry,

    // Set while loading an inserted file. Its `local` blocks are switched off and never loaded.
    inserting: bool,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(ast: &'a mut Ast, registry: &'a mut Registry, inserting: bool) -> Self {
        Resolver {
            ast,
            registry,
            inserting,
        }
    }

    pub(crate) fn resolve(&mut self, root: NodeId) -> TagResult<()> {
        self.load(root)?;
        debug!(inserting = self.inserting, "loaded tree");
        Ok(())
    }

    fn load(&mut self, id: NodeId) -> TagResult<()> {
        if self.inserting && *self.ast.kind(id) == NodeKind::Local {
            self.ast[id].executable = false;
            self.ast[id].shape = Rc::new(Shape::Leaf);
            return Ok(());
        }

        let children = self.ast[id].children.clone();
        for child in children {
            self.load(child)?;
        }

        let shape = self.shape(id)?;
        self.ast[id].shape = Rc::new(shape);
        Ok(())
    }

    fn shape(&mut self, id: NodeId) -> TagResult<Shape> {
        let line = self.ast[id].line;
        let children = self.ast[id].children.clone();

        let shape = match self.ast.kind(id).clone() {
            NodeKind::Literal(_)
            | NodeKind::Operator(_)
            | NodeKind::Reference(_)
            | NodeKind::Comma
            | NodeKind::Colon => Shape::Leaf,
            NodeKind::Tag => {
                for child in &children {
                    self.statement(*child)?;
                }
                Shape::Block
            }
            NodeKind::Expression => self.expression(&children, line)?,
            NodeKind::Brackets => Shape::Array(self.groups(&children, line)?),
            NodeKind::Declaration(name) => self.declaration(name, &children, line)?,
            NodeKind::Print => Shape::Print(Rc::new(self.sequence(&children)?)),
            NodeKind::Input => Shape::Input(Rc::new(self.sequence(&children)?)),
            NodeKind::Return => Shape::Return(Rc::new(self.sequence(&children)?)),
            NodeKind::Insert => Shape::Insert(self.required(&children, line, "'insert'")?),
            NodeKind::Convert(to) => {
                let what = format!("'{}'", format!("{:?}", to).to_lowercase());
                Shape::Convert(to, self.required(&children, line, &what)?)
            }
            NodeKind::If => self.branch(id, BranchKind::If, &children, line)?,
            NodeKind::Elif => {
                self.follows_branch(id, line, "elif")?;
                self.ast[id].executable = false;
                self.branch(id, BranchKind::Elif, &children, line)?
            }
            NodeKind::While => self.branch(id, BranchKind::While, &children, line)?,
            NodeKind::Else => {
                self.follows_branch(id, line, "else")?;
                self.ast[id].executable = false;
                let body = self.block(&children, line, "'else' expects a block")?;
                Shape::Else { body }
            }
            NodeKind::Repeat => self.repeat(&children, line)?,
            NodeKind::Fun => self.function(id, &children, line)?,
            NodeKind::Call => self.call(&children, line)?,
            NodeKind::Break => {
                if !children.is_empty() {
                    return Err(Error::spelling(line, "'break' takes no operand"));
                }
                Shape::Break
            }
            NodeKind::Free => self.free(&children, line)?,
            NodeKind::Local => {
                let body = self.block(&children, line, "'local' expects a block")?;
                Shape::Local { body }
            }
            NodeKind::Extern => self.import(&children, line)?,
        };
        Ok(shape)
    }

    fn statement(&self, id: NodeId) -> TagResult<()> {
        match self.ast.kind(id) {
            NodeKind::Operator(_) | NodeKind::Comma | NodeKind::Colon => Err(Error::spelling(
                self.ast[id].line,
                format!(
                    "unexpected {} at the start of a statement",
                    self.ast.kind(id).describe()
                ),
            )),
            NodeKind::Expression => self.single_value(id),
            _ => Ok(()),
        }
    }

    // A parenthesised group used as a value must hold at most one sequence.
    fn single_value(&self, id: NodeId) -> TagResult<()> {
        let line = self.ast[id].line;
        match &*self.ast[id].shape {
            Shape::Groups(groups) if groups.len() <= 1 => Ok(()),
            Shape::Pair(..) => Err(Error::spelling(
                line,
                "':' is only allowed in a repeat header",
            )),
            _ => Err(Error::spelling(
                line,
                "expected a single value in parentheses",
            )),
        }
    }

    fn expression(&self, children: &[NodeId], line: usize) -> TagResult<Shape> {
        let colon = children
            .iter()
            .position(|child| *self.ast.kind(*child) == NodeKind::Colon);
        let colon = match colon {
            Some(colon) => colon,
            None => return Ok(Shape::Groups(self.groups(children, line)?)),
        };

        match (colon, children.first().map(|child| self.ast.kind(*child))) {
            (1, Some(NodeKind::Reference(item))) => {
                let item = item.clone();
                let collection = self.required(&children[2..], line, "':'")?;
                Ok(Shape::Pair(item, collection))
            }
            _ => Err(Error::spelling(line, "expected 'name : collection'")),
        }
    }

    // Splits children on commas. No children means no groups; an empty group is an error.
    fn groups(&self, children: &[NodeId], line: usize) -> TagResult<Vec<Rc<Sequence>>> {
        if children.is_empty() {
            return Ok(Vec::new());
        }

        children
            .split(|child| *self.ast.kind(*child) == NodeKind::Comma)
            .map(|group| {
                let seq = self.sequence(group)?;
                if seq.is_empty() {
                    return Err(Error::spelling(line, "expected a value around ','"));
                }
                Ok(Rc::new(seq))
            })
            .collect()
    }

    fn required(&self, children: &[NodeId], line: usize, what: &str) -> TagResult<Rc<Sequence>> {
        let seq = self.sequence(children)?;
        if seq.is_empty() {
            return Err(Error::spelling(line, format!("expected a value after {}", what)));
        }
        Ok(Rc::new(seq))
    }

    /// Flattens children into alternating operands and binary operators. A `-` or `!` where an
    /// operand is expected is a prefix; brackets right after an operand subscript it.
    fn sequence(&self, children: &[NodeId]) -> TagResult<Sequence> {
        let mut seq = Sequence::default();
        let mut prefix: Vec<Operator> = Vec::new();
        let mut expect_operand = true;

        for &child in children {
            let line = self.ast[child].line;
            let kind = self.ast.kind(child);
            match kind {
                NodeKind::Operator(op) if expect_operand => match op {
                    Operator::Sub | Operator::Not => prefix.push(*op),
                    _ => {
                        return Err(Error::spelling(
                            line,
                            format!("expected a value before '{}'", op),
                        ))
                    }
                },
                NodeKind::Operator(op) => {
                    if op.is_assignment() || *op == Operator::Not {
                        return Err(Error::spelling(line, format!("unexpected '{}'", op)));
                    }
                    seq.operators.push((*op, line));
                    expect_operand = true;
                }
                NodeKind::Brackets if !expect_operand => {
                    self.subscript(child)?;
                    if let Some(operand) = seq.operands.last_mut() {
                        operand.subscripts.push(child);
                    }
                }
                kind if kind.is_value() => {
                    if !expect_operand {
                        return Err(Error::spelling(
                            line,
                            format!("expected an operator before {}", kind.describe()),
                        ));
                    }
                    if *kind == NodeKind::Expression {
                        self.single_value(child)?;
                    }
                    seq.operands.push(Operand {
                        node: child,
                        prefix: std::mem::take(&mut prefix),
                        subscripts: Vec::new(),
                    });
                    expect_operand = false;
                }
                other => {
                    return Err(Error::spelling(
                        line,
                        format!("unexpected {} in an expression", other.describe()),
                    ))
                }
            }
        }

        if expect_operand && (!seq.operands.is_empty() || !prefix.is_empty()) {
            let line = children.last().map_or(0, |child| self.ast[*child].line);
            return Err(Error::spelling(line, "expected a value at the end of the expression"));
        }
        Ok(seq)
    }

    fn subscript(&self, id: NodeId) -> TagResult<Rc<Sequence>> {
        match &*self.ast[id].shape {
            Shape::Array(items) if items.len() == 1 => Ok(Rc::clone(&items[0])),
            _ => Err(Error::spelling(
                self.ast[id].line,
                "a subscript takes exactly one index",
            )),
        }
    }

    fn declaration(&self, name: String, children: &[NodeId], line: usize) -> TagResult<Shape> {
        let mut subscripts = Vec::new();
        let mut rest = children;
        while let Some((first, tail)) = rest.split_first() {
            if *self.ast.kind(*first) != NodeKind::Brackets {
                break;
            }
            subscripts.push(self.subscript(*first)?);
            rest = tail;
        }

        let (op, value) = match rest.split_first() {
            Some((first, tail)) => match self.ast.kind(*first) {
                NodeKind::Operator(op) if op.is_assignment() => (*op, tail),
                _ => {
                    return Err(Error::spelling(
                        line,
                        format!("expected an assignment after '{}'", name),
                    ))
                }
            },
            None => {
                return Err(Error::spelling(
                    line,
                    format!("expected an assignment after '{}'", name),
                ))
            }
        };

        let value = self.required(value, line, &format!("'{}'", op))?;
        Ok(Shape::Declaration {
            name,
            subscripts,
            op,
            value,
        })
    }

    fn header(&self, children: &[NodeId], line: usize, what: &str) -> TagResult<(NodeId, NodeId)> {
        match children {
            [head, body]
                if *self.ast.kind(*head) == NodeKind::Expression
                    && *self.ast.kind(*body) == NodeKind::Tag =>
            {
                Ok((*head, *body))
            }
            _ => Err(Error::spelling(
                line,
                format!("{} expects a header in parentheses followed by a block", what),
            )),
        }
    }

    fn block(&mut self, children: &[NodeId], line: usize, msg: &str) -> TagResult<NodeId> {
        match children {
            [body] if *self.ast.kind(*body) == NodeKind::Tag => {
                self.ast[*body].executable = false;
                Ok(*body)
            }
            _ => Err(Error::spelling(line, msg)),
        }
    }

    fn branch(
        &mut self,
        id: NodeId,
        kind: BranchKind,
        children: &[NodeId],
        line: usize,
    ) -> TagResult<Shape> {
        let what = format!("'{}'", format!("{:?}", kind).to_lowercase());
        let (condition, body) = self.header(children, line, &what)?;
        match &*self.ast[condition].shape {
            Shape::Groups(groups) if groups.len() == 1 => {}
            _ => return Err(Error::spelling(line, format!("{} expects a condition", what))),
        }
        self.ast[body].executable = false;

        let chained = match kind {
            BranchKind::While => None,
            BranchKind::If | BranchKind::Elif => self
                .ast
                .next_sibling(id)
                .filter(|next| matches!(self.ast.kind(*next), NodeKind::Elif | NodeKind::Else)),
        };

        Ok(Shape::Branch {
            kind,
            condition,
            body,
            chained,
        })
    }

    fn follows_branch(&self, id: NodeId, line: usize, what: &str) -> TagResult<()> {
        match self.ast.previous_sibling(id).map(|prev| self.ast.kind(prev)) {
            Some(NodeKind::If) | Some(NodeKind::Elif) => Ok(()),
            _ => Err(Error::spelling(
                line,
                format!("'{}' must follow 'if' or 'elif'", what),
            )),
        }
    }

    fn repeat(&mut self, children: &[NodeId], line: usize) -> TagResult<Shape> {
        let (head, body) = self.header(children, line, "'repeat'")?;
        self.ast[body].executable = false;

        match &*self.ast[head].shape {
            Shape::Pair(item, collection) => Ok(Shape::Foreach {
                item: item.clone(),
                collection: Rc::clone(collection),
                body,
            }),
            Shape::Groups(groups) if groups.len() == 1 => Ok(Shape::Repeat { count: head, body }),
            _ => Err(Error::spelling(
                line,
                "'repeat' expects a count or 'name : collection'",
            )),
        }
    }

    fn function(&mut self, id: NodeId, children: &[NodeId], line: usize) -> TagResult<Shape> {
        let (name, params, body) = match children {
            [name, params, body] => match (
                self.ast.kind(*name),
                self.ast.kind(*params),
                self.ast.kind(*body),
            ) {
                (NodeKind::Reference(name), NodeKind::Expression, NodeKind::Tag) => {
                    (name.clone(), *params, *body)
                }
                _ => return Err(fun_shape_error(line)),
            },
            _ => return Err(fun_shape_error(line)),
        };

        let groups = match &*self.ast[params].shape {
            Shape::Groups(groups) => groups.clone(),
            _ => return Err(Error::spelling(line, "parameters must be names")),
        };
        let mut names: Vec<String> = Vec::with_capacity(groups.len());
        for group in groups {
            let param = match group.single().map(|node| self.ast.kind(node)) {
                Some(NodeKind::Reference(param)) => param.clone(),
                _ => return Err(Error::spelling(line, "parameters must be names")),
            };
            if names.contains(&param) {
                return Err(Error::name(
                    line,
                    format!("duplicate parameter '{}' in function '{}'", param, name),
                ));
            }
            names.push(param);
        }
        self.ast[body].executable = false;

        let fun = Function::new(&name, names, body);
        debug!(function = %name, arity = fun.arity(), "registered function");
        self.registry
            .declare(
                &name,
                Binding::function(Callable::Script(Rc::new(fun)), Some(id)),
            )
            .map_err(|_| Error::name(line, format!("'{}' is already declared", name)))?;
        Ok(Shape::Fun)
    }

    fn call(&self, children: &[NodeId], line: usize) -> TagResult<Shape> {
        let (name, args) = match children {
            [name, args] => match (self.ast.kind(*name), self.ast.kind(*args)) {
                (NodeKind::Reference(name), NodeKind::Expression) => (name.clone(), *args),
                _ => return Err(call_shape_error(line)),
            },
            _ => return Err(call_shape_error(line)),
        };

        match &*self.ast[args].shape {
            Shape::Groups(groups) => Ok(Shape::Call {
                name,
                args: groups.clone(),
            }),
            _ => Err(call_shape_error(line)),
        }
    }

    fn free(&self, children: &[NodeId], line: usize) -> TagResult<Shape> {
        let mut names = Vec::new();
        for child in children {
            match self.ast.kind(*child) {
                NodeKind::Reference(name) => names.push(name.clone()),
                NodeKind::Comma => {}
                other => {
                    return Err(Error::spelling(
                        line,
                        format!("'free' expects names, found {}", other.describe()),
                    ))
                }
            }
        }

        match names.as_slice() {
            [] => Err(Error::spelling(line, "'free' expects at least one name")),
            [all] if all == "all" => Ok(Shape::FreeAll),
            _ => Ok(Shape::Free(names)),
        }
    }

    fn import(&self, children: &[NodeId], line: usize) -> TagResult<Shape> {
        let names: Vec<&NodeKind> = children.iter().map(|child| self.ast.kind(*child)).collect();
        match names.as_slice() {
            [NodeKind::Reference(module)] => Ok(Shape::Extern {
                module: module.clone(),
                alias: module.clone(),
            }),
            [NodeKind::Reference(module), NodeKind::Reference(alias)] => Ok(Shape::Extern {
                module: module.clone(),
                alias: alias.clone(),
            }),
            _ => Err(Error::spelling(
                line,
                "'extern' expects a module name and an optional alias",
            )),
        }
    }
}

fn fun_shape_error(line: usize) -> Error {
    Error::spelling(
        line,
        "'fun' expects a name, a parameter list and a block",
    )
}

fn call_shape_error(line: usize) -> Error {
    Error::spelling(line, "'call' expects a function name and an argument list")
}

#[cfg(test)]
mod tests {
    use tag_core::{Operator, Scanner};

    use crate::ast::{Ast, NodeId, Shape};
    use crate::env::{BindingKind, Registry};
    use crate::error::{ErrorKind, TagResult};
    use crate::parser::Parser;
    use crate::resolver::Resolver;

    fn load(ast: &mut Ast, registry: &mut Registry, src: &str) -> TagResult<NodeId> {
        let mut scanner = Scanner::new();
        let root = Parser::new(ast).parse(scanner.scan_tokens(src))?;
        Resolver::new(ast, registry, false).resolve(root)?;
        Ok(root)
    }

    fn load_err(src: &str) -> ErrorKind {
        let mut ast = Ast::new();
        let mut registry = Registry::new();
        load(&mut ast, &mut registry, src).unwrap_err().kind()
    }

    #[test]
    fn test_declaration_shape() {
        let mut ast = Ast::new();
        let mut registry = Registry::new();
        let root = load(&mut ast, &mut registry, "a[1][2] -= -b * 2;").unwrap();
        let decl = ast[root].children[0];

        match &*ast[decl].shape {
            Shape::Declaration {
                name,
                subscripts,
                op,
                value,
            } => {
                assert_eq!(name, "a");
                assert_eq!(subscripts.len(), 2);
                assert_eq!(*op, Operator::SubAssign);
                assert_eq!(value.operands.len(), 2);
                assert_eq!(value.operands[0].prefix, vec![Operator::Sub]);
                assert_eq!(value.operators, vec![(Operator::Mul, 1)]);
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_functions_register_at_load() {
        let mut ast = Ast::new();
        let mut registry = Registry::new();
        load(&mut ast, &mut registry, "print 1; fun f(a, b) { return a; }").unwrap();

        let binding = registry.get("f").unwrap();
        match &binding.kind {
            BindingKind::Function(fun) => assert_eq!(fun.name(), "f"),
            other => panic!("unexpected binding {:?}", other),
        }
    }

    #[test]
    fn test_bodies_start_inert() {
        let mut ast = Ast::new();
        let mut registry = Registry::new();
        let root = load(
            &mut ast,
            &mut registry,
            "if (true) { print 1; } elif (false) { print 2; } else { print 3; }",
        )
        .unwrap();
        let nodes = ast[root].children.clone();

        assert!(ast[nodes[0]].executable);
        assert!(!ast[nodes[1]].executable);
        assert!(!ast[nodes[2]].executable);
        match &*ast[nodes[0]].shape {
            Shape::Branch { body, chained, .. } => {
                assert!(!ast[*body].executable);
                assert_eq!(*chained, Some(nodes[1]));
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_repeat_forms() {
        let mut ast = Ast::new();
        let mut registry = Registry::new();
        let root = load(
            &mut ast,
            &mut registry,
            "repeat (3) { print 1; } repeat (x : [1, 2]) { print x; }",
        )
        .unwrap();
        let nodes = ast[root].children.clone();

        assert!(matches!(&*ast[nodes[0]].shape, Shape::Repeat { .. }));
        assert!(
            matches!(&*ast[nodes[1]].shape, Shape::Foreach { item, .. } if item == "x")
        );
    }

    #[test]
    fn test_free_forms() {
        let mut ast = Ast::new();
        let mut registry = Registry::new();
        let root = load(&mut ast, &mut registry, "free a, b; free all;").unwrap();
        let nodes = ast[root].children.clone();

        assert_eq!(
            *ast[nodes[0]].shape,
            Shape::Free(vec![String::from("a"), String::from("b")])
        );
        assert_eq!(*ast[nodes[1]].shape, Shape::FreeAll);
    }

    #[test]
    fn test_spelling_errors() {
        assert_eq!(load_err("x;"), ErrorKind::Spelling);
        assert_eq!(load_err("x = ;"), ErrorKind::Spelling);
        assert_eq!(load_err("print 1 +;"), ErrorKind::Spelling);
        assert_eq!(load_err("print 1 2;"), ErrorKind::Spelling);
        assert_eq!(load_err("if (true) print 1;"), ErrorKind::Spelling);
        assert_eq!(load_err("else { print 1; }"), ErrorKind::Spelling);
        assert_eq!(load_err("print x[1, 2];"), ErrorKind::Spelling);
        assert_eq!(load_err("call f;"), ErrorKind::Spelling);
        assert_eq!(load_err("fun f(1) { }"), ErrorKind::Spelling);
        assert_eq!(load_err("free;"), ErrorKind::Spelling);
        assert_eq!(load_err("insert;"), ErrorKind::Spelling);
        assert_eq!(load_err("print (a : b);"), ErrorKind::Spelling);
    }

    #[test]
    fn test_duplicate_names() {
        assert_eq!(load_err("fun f(a, a) { }"), ErrorKind::Name);
        assert_eq!(load_err("fun f() { } fun f() { }"), ErrorKind::Name);
    }

    #[test]
    fn test_inserted_local_is_suppressed() {
        let mut scanner = Scanner::new();
        let mut ast = Ast::new();
        let mut registry = Registry::new();
        let root = Parser::new(&mut ast)
            .parse(scanner.scan_tokens("local { fun f() { } }"))
            .unwrap();
        Resolver::new(&mut ast, &mut registry, true)
            .resolve(root)
            .unwrap();

        let local = ast[root].children[0];
        assert!(!ast[local].executable);
        assert!(!registry.contains("f"));
    }
}
