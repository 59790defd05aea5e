use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ahash::RandomState;
use tag_core::{Operator, Scanner};
use tracing::debug;

use crate::ast::{Ast, BranchKind, NodeId, NodeKind, Operand, Sequence, Shape};
use crate::callable::{Callable, Function};
use crate::env::{Binding, BindingKind, Registry, RegistryError};
use crate::error::{Error, TagResult};
use crate::evaluator;
use crate::limits::{INDEX_FILE, MAX_CALL_DEPTH, MAX_INSERT_DEPTH};
use crate::native::{HostEntry, HostModules};
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::value::Value;

/// Where `insert` reads source text from.
pub trait SourceLoader {
    /// Maps the target of an `insert` to a path. Relative targets are taken against `base`, the
    /// directory of the file doing the insert.
    fn resolve(&self, base: &Path, target: &str) -> PathBuf;

    fn load(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn resolve(&self, base: &Path, target: &str) -> PathBuf {
        let mut path = base.join(target);
        if path.is_dir() {
            path.push(INDEX_FILE);
        }
        fs::canonicalize(&path).unwrap_or(path)
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// How a node finished. `Break` travels up to the nearest loop and `Return` to the nearest call;
/// whatever reaches the top of a script simply ends it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Flow {
    Completed,
    Break,
    Return(Value),
}

pub struct Interpreter<'a> {
    ast: Ast,
    registry: Registry,
    host: HostModules,
    loader: Box<dyn SourceLoader>,
    stdout: &'a mut dyn Write,
    stdin: Box<dyn BufRead + 'a>,
    base_dir: PathBuf,

    // Files being executed right now, outermost first. Inserting one of them again is an error.
    inserting: Vec<PathBuf>,
    inserted: HashMap<PathBuf, NodeId, RandomState>,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(stdout: &'a mut dyn Write) -> Self {
        let mut registry = Registry::new();
        registry.define("π", Binding::constant(Value::from(std::f64::consts::PI)));

        Interpreter {
            ast: Ast::new(),
            registry,
            host: HostModules::standard(),
            loader: Box::new(FsLoader),
            stdout,
            stdin: Box::new(BufReader::new(io::stdin())),
            base_dir: PathBuf::new(),
            inserting: Vec::new(),
            inserted: HashMap::default(),
            depth: 0,
        }
    }

    pub fn with_input(mut self, input: impl BufRead + 'a) -> Self {
        self.stdin = Box::new(input);
        self
    }

    pub fn with_host(mut self, host: HostModules) -> Self {
        self.host = host;
        self
    }

    pub fn with_loader(mut self, loader: impl SourceLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Parses, loads and executes `src` against the interpreter's registry. Nothing runs unless
    /// the whole source parses and loads.
    pub fn run(&mut self, src: &str) -> TagResult<()> {
        let root = self.prepare(src, false)?;
        self.execute(root)?;
        Ok(())
    }

    pub fn run_file(&mut self, path: impl AsRef<Path>) -> TagResult<()> {
        let path = self
            .loader
            .resolve(Path::new(""), &path.as_ref().to_string_lossy());
        let src = self.loader.load(&path).map_err(|err| Error::io(0, err))?;
        if let Some(dir) = path.parent() {
            self.base_dir = dir.to_path_buf();
        }

        self.inserting.push(path);
        let res = self.run(&src);
        self.inserting.pop();
        res
    }

    fn prepare(&mut self, src: &str, inserting: bool) -> TagResult<NodeId> {
        let mut scanner = Scanner::new();
        let stream = scanner.scan_tokens(src);
        let root = Parser::new(&mut self.ast).parse(stream)?;
        Resolver::new(&mut self.ast, &mut self.registry, inserting).resolve(root)?;
        Ok(root)
    }

    fn execute(&mut self, id: NodeId) -> TagResult<Flow> {
        if !self.ast[id].executable {
            return Ok(Flow::Completed);
        }
        self.run_node(id)
    }

    // Runs a node even if it is switched off, and leaves the switch as it was.
    fn force_execute(&mut self, id: NodeId) -> TagResult<Flow> {
        let was = mem::replace(&mut self.ast[id].executable, true);
        let res = self.run_node(id);
        self.ast[id].executable = was;
        res
    }

    fn run_node(&mut self, id: NodeId) -> TagResult<Flow> {
        let line = self.ast[id].line;

        #[cfg(feature = "debug-trace-execution")]
        writeln!(self.stdout, "[line {}] {}", line, self.ast[id].kind.describe())
            .map_err(|err| Error::io(line, err))?;

        let shape = Rc::clone(&self.ast[id].shape);
        match &*shape {
            Shape::Block => self.run_block(id),
            Shape::Print(value) => {
                let value = self.evaluate(value)?;
                writeln!(self.stdout, "{}", value).map_err(|err| Error::io(line, err))?;
                Ok(Flow::Completed)
            }
            Shape::Declaration {
                name,
                subscripts,
                op,
                value,
            } => {
                self.declare(id, name, subscripts, *op, value, line)?;
                Ok(Flow::Completed)
            }
            Shape::Branch {
                kind: BranchKind::While,
                condition,
                body,
                ..
            } => self.run_while(*condition, *body, line),
            Shape::Branch {
                kind,
                condition,
                body,
                chained,
            } => {
                if *kind == BranchKind::Elif {
                    self.ast[id].executable = false;
                }
                let holds = self.condition(*condition, line)?;
                if let Some(next) = chained {
                    self.ast[*next].executable = !holds;
                }
                if holds {
                    self.force_execute(*body)
                } else {
                    Ok(Flow::Completed)
                }
            }
            Shape::Else { body } => {
                self.ast[id].executable = false;
                self.force_execute(*body)
            }
            Shape::Repeat { count, body } => self.run_repeat(*count, *body, line),
            Shape::Foreach {
                item,
                collection,
                body,
            } => self.run_foreach(item, collection, *body, line),
            Shape::Break => Ok(Flow::Break),
            Shape::Return(value) => {
                let value = self.evaluate(value)?;
                if let Some(function) = self.registry.current_function().map(String::from) {
                    self.registry.set_result(&function, value.clone());
                }
                Ok(Flow::Return(value))
            }
            Shape::Fun => Ok(Flow::Completed),
            Shape::Free(names) => {
                for name in names {
                    self.registry
                        .remove(name)
                        .map_err(|_| Error::name(line, format!("'{}' is not defined", name)))?;
                }
                Ok(Flow::Completed)
            }
            Shape::FreeAll => {
                debug!(bindings = self.registry.len(), "freeing all bindings");
                self.registry.clear();
                Ok(Flow::Completed)
            }
            Shape::Local { body } => self.force_execute(*body),
            Shape::Extern { module, alias } => {
                self.import(module, alias, line)?;
                Ok(Flow::Completed)
            }
            Shape::Insert(target) => self.insert(target, line),
            Shape::Leaf
            | Shape::Groups(_)
            | Shape::Array(_)
            | Shape::Input(_)
            | Shape::Convert(..)
            | Shape::Call { .. } => {
                self.node_value(id)?;
                Ok(Flow::Completed)
            }
            Shape::Pair(..) | Shape::Unloaded => Err(Error::spelling(
                line,
                format!("{} cannot be executed", self.ast[id].kind.describe()),
            )),
        }
    }

    fn run_block(&mut self, id: NodeId) -> TagResult<Flow> {
        for i in 0..self.ast[id].children.len() {
            self.ast[id].current = i;
            let child = self.ast[id].children[i];
            match self.execute(child)? {
                Flow::Completed => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Completed)
    }

    fn condition(&mut self, id: NodeId, line: usize) -> TagResult<bool> {
        let value = self.node_value(id)?;
        value.as_bool().ok_or_else(|| {
            Error::operator(
                line,
                format!("condition must be a bool, got {}", value.type_name()),
            )
        })
    }

    fn run_while(&mut self, condition: NodeId, body: NodeId, line: usize) -> TagResult<Flow> {
        while self.condition(condition, line)? {
            match self.force_execute(body)? {
                Flow::Completed => {}
                Flow::Break => break,
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Completed)
    }

    fn run_repeat(&mut self, count: NodeId, body: NodeId, line: usize) -> TagResult<Flow> {
        let count = self.node_value(count)?;
        let times = count.as_int().ok_or_else(|| {
            Error::arity(
                line,
                format!("repeat count must be an int, got {}", count.type_name()),
            )
        })?;

        for _ in 0..times.max(0) {
            match self.force_execute(body)? {
                Flow::Completed => {}
                Flow::Break => break,
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Completed)
    }

    fn run_foreach(
        &mut self,
        item: &str,
        collection: &Sequence,
        body: NodeId,
        line: usize,
    ) -> TagResult<Flow> {
        let items = match self.evaluate(collection)? {
            Value::Array(items) => items,
            other => {
                return Err(Error::arity(
                    line,
                    format!("cannot iterate over {}", other.type_name()),
                ))
            }
        };

        // One binding for the whole loop, whatever the number of iterations.
        self.registry.push_item(item);
        let mut res = Ok(Flow::Completed);
        for value in items.iter() {
            self.registry
                .define(item, Binding::variable(value.clone(), None));
            match self.force_execute(body) {
                Ok(Flow::Completed) => {}
                Ok(Flow::Break) => break,
                other => {
                    res = other;
                    break;
                }
            }
        }
        self.registry.pop_item();
        res
    }

    fn declare(
        &mut self,
        id: NodeId,
        name: &str,
        subscripts: &[Rc<Sequence>],
        op: Operator,
        value: &Sequence,
        line: usize,
    ) -> TagResult<()> {
        let rhs = self.evaluate(value)?;

        if !subscripts.is_empty() {
            let mut path = Vec::with_capacity(subscripts.len());
            for index in subscripts {
                path.push(self.evaluate(index)?);
            }

            let mut target = self.lookup(name, line)?;
            let value = match op.compound() {
                Some(arith) => {
                    let mut current = target.clone();
                    for index in &path {
                        current = current
                            .index(index)
                            .map_err(|msg| Error::arity(line, msg))?;
                    }
                    current
                        .binary(arith, &rhs)
                        .map_err(|msg| Error::operator(line, msg))?
                }
                None => rhs,
            };
            target
                .set_index(&path, value)
                .map_err(|msg| Error::arity(line, msg))?;
            return self.assign(name, target, line);
        }

        if let Some(arith) = op.compound() {
            let current = self.lookup(name, line)?;
            let value = current
                .binary(arith, &rhs)
                .map_err(|msg| Error::operator(line, msg))?;
            return self.assign(name, value, line);
        }

        match self.registry.get(name).map(|binding| binding.origin) {
            None if self.registry.in_call() => {
                self.registry
                    .bind_local(name, Binding::variable(rhs, Some(id)));
                Ok(())
            }
            None => self
                .registry
                .declare(name, Binding::variable(rhs, Some(id)))
                .map_err(|_| Error::name(line, format!("'{}' is already declared", name))),
            // The same statement running again: a loop pass, or a nested call of the function
            // that declared it.
            Some(origin) if origin == Some(id) => {
                if self.registry.in_call() && !self.registry.is_local(name) {
                    self.registry
                        .bind_local(name, Binding::variable(rhs, Some(id)));
                    Ok(())
                } else {
                    self.assign(name, rhs, line)
                }
            }
            Some(_) => Err(Error::name(
                line,
                format!("'{}' is already declared", name),
            )),
        }
    }

    fn lookup(&self, name: &str, line: usize) -> TagResult<Value> {
        self.registry
            .value(name)
            .ok_or_else(|| Error::name(line, format!("'{}' is not defined", name)))
    }

    fn assign(&mut self, name: &str, value: Value, line: usize) -> TagResult<()> {
        self.registry
            .assign(name, value)
            .map_err(|err| match err {
                RegistryError::Constant => {
                    Error::name(line, format!("cannot assign to constant '{}'", name))
                }
                RegistryError::Undefined | RegistryError::AlreadyDeclared => {
                    Error::name(line, format!("'{}' is not defined", name))
                }
            })
    }

    fn evaluate(&mut self, sequence: &Sequence) -> TagResult<Value> {
        evaluator::reduce(sequence, |operand| self.operand(operand))
    }

    fn operand(&mut self, operand: &Operand) -> TagResult<Value> {
        let line = self.ast[operand.node].line;
        let mut value = self.node_value(operand.node)?;

        for subscript in &operand.subscripts {
            let shape = Rc::clone(&self.ast[*subscript].shape);
            let index = match &*shape {
                Shape::Array(items) if items.len() == 1 => self.evaluate(&items[0])?,
                _ => return Err(Error::spelling(line, "a subscript takes exactly one index")),
            };
            value = value
                .index(&index)
                .map_err(|msg| Error::arity(line, msg))?;
        }

        for op in operand.prefix.iter().rev() {
            value = value
                .unary(*op)
                .map_err(|msg| Error::operator(line, msg))?;
        }
        Ok(value)
    }

    fn node_value(&mut self, id: NodeId) -> TagResult<Value> {
        let line = self.ast[id].line;
        let shape = Rc::clone(&self.ast[id].shape);

        match &*shape {
            Shape::Leaf => match &self.ast[id].kind {
                NodeKind::Literal(value) => Ok(value.clone()),
                NodeKind::Reference(name) => self
                    .registry
                    .value(name)
                    .ok_or_else(|| Error::name(line, format!("'{}' is not defined", name))),
                other => Err(Error::spelling(
                    line,
                    format!("{} has no value", other.describe()),
                )),
            },
            Shape::Groups(groups) => match groups.first() {
                Some(value) => self.evaluate(value),
                None => Ok(Value::None),
            },
            Shape::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.evaluate(item)?);
                }
                Ok(Value::array(values))
            }
            Shape::Call { name, args } => self.invoke(name, args, line),
            Shape::Input(prompt) => self.input(prompt, line),
            Shape::Convert(to, value) => {
                let value = self.evaluate(value)?;
                value
                    .convert(*to)
                    .map_err(|msg| Error::operator(line, msg))
            }
            _ => Err(Error::spelling(
                line,
                format!("{} has no value", self.ast[id].kind.describe()),
            )),
        }
    }

    fn invoke(&mut self, name: &str, args: &[Rc<Sequence>], line: usize) -> TagResult<Value> {
        let callable = match self.registry.get(name).map(|binding| &binding.kind) {
            Some(BindingKind::Function(callable)) => callable.clone(),
            Some(_) => {
                return Err(Error::name(line, format!("'{}' is not a function", name)));
            }
            None => {
                return Err(Error::name(
                    line,
                    format!("function '{}' is not defined", name),
                ));
            }
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate(arg)?);
        }

        match callable {
            Callable::Host(fun) => {
                if let Some(arity) = fun.arity() {
                    if arity != values.len() {
                        return Err(arity_error(fun.name(), arity, values.len(), line));
                    }
                }
                debug!(function = %fun.name(), args = values.len(), "calling host function");
                fun.call(&values)
                    .map_err(|msg| Error::operator(line, format!("{}: {}", fun.name(), msg)))
            }
            Callable::Script(fun) => self.call_script(&fun, values, line),
        }
    }

    fn call_script(&mut self, fun: &Function, args: Vec<Value>, line: usize) -> TagResult<Value> {
        if fun.arity() != args.len() {
            return Err(arity_error(&fun.name, fun.arity(), args.len(), line));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::recursion(
                line,
                format!(
                    "call to '{}' exceeds the maximum depth of {}",
                    fun.name, MAX_CALL_DEPTH
                ),
            ));
        }

        debug!(function = %fun.name, args = args.len(), depth = self.depth, "invoking");
        self.registry.set_result(&fun.name, Value::None);
        self.registry.push_frame(&fun.name);
        for (param, arg) in fun.params.iter().zip(args) {
            self.registry.bind_local(param, Binding::variable(arg, None));
        }

        self.depth += 1;
        let res = self.force_execute(fun.body);
        self.depth -= 1;
        self.registry.pop_frame();

        match res? {
            Flow::Return(value) => Ok(value),
            Flow::Completed | Flow::Break => Ok(Value::None),
        }
    }

    fn input(&mut self, prompt: &Sequence, line: usize) -> TagResult<Value> {
        if !prompt.is_empty() {
            let prompt = self.evaluate(prompt)?;
            write!(self.stdout, "{}", prompt).map_err(|err| Error::io(line, err))?;
            self.stdout.flush().map_err(|err| Error::io(line, err))?;
        }

        let mut buf = String::new();
        self.stdin
            .read_line(&mut buf)
            .map_err(|err| Error::io(line, err))?;
        Ok(Value::from(buf.trim_end_matches(&['\r', '\n'][..])))
    }

    /// Registers every entry of a host module as `alias.name`. Host bindings may be imported
    /// again; anything a script declared under the same key may not be replaced.
    fn import(&mut self, module: &str, alias: &str, line: usize) -> TagResult<()> {
        let entries = self
            .host
            .module(module)
            .ok_or_else(|| Error::name(line, format!("unknown module '{}'", module)))?;

        for (name, entry) in entries {
            let key = format!("{}.{}", alias, name);
            if let Some(existing) = self.registry.get(&key) {
                if existing.origin.is_some() {
                    return Err(Error::name(line, format!("'{}' is already declared", key)));
                }
            }

            let binding = match entry {
                HostEntry::Function(fun) => Binding::function(Callable::Host(fun.clone()), None),
                HostEntry::Constant(value) => Binding::constant(value.clone()),
            };
            self.registry.define(&key, binding);
        }

        debug!(module = %module, alias = %alias, "imported host module");
        Ok(())
    }

    fn insert(&mut self, target: &Sequence, line: usize) -> TagResult<Flow> {
        let target = self.evaluate(target)?;
        let target = target.as_str().ok_or_else(|| {
            Error::operator(
                line,
                format!("'insert' expects a string path, got {}", target.type_name()),
            )
        })?;

        let path = self.loader.resolve(&self.base_dir, target);
        if self.inserting.contains(&path) {
            return Err(Error::parser(
                line,
                format!("'{}' is already being inserted", path.display()),
            ));
        }
        if self.inserting.len() >= MAX_INSERT_DEPTH {
            return Err(Error::parser(
                line,
                format!("inserts nested deeper than {}", MAX_INSERT_DEPTH),
            ));
        }

        // A file is parsed and loaded once; inserting it again runs the same tree.
        let root = match self.inserted.get(&path).copied() {
            Some(root) => root,
            None => {
                let src = self
                    .loader
                    .load(&path)
                    .map_err(|err| Error::io(line, err))?;
                debug!(path = %path.display(), "inserting file");
                let root = self.prepare(&src, true)?;
                self.inserted.insert(path.clone(), root);
                root
            }
        };

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let base = mem::replace(&mut self.base_dir, dir);
        self.inserting.push(path);
        let res = self.execute(root);
        self.inserting.pop();
        self.base_dir = base;

        // A `break` or `return` at the top of an inserted file only ends that file.
        res?;
        Ok(Flow::Completed)
    }
}

fn arity_error(name: &str, expected: usize, got: usize, line: usize) -> Error {
    Error::arity(
        line,
        format!(
            "function '{}' expects {} argument(s), got {}",
            name, expected, got
        ),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use crate::error::{ErrorKind, TagResult};
    use crate::interpreter::{Interpreter, SourceLoader};
    use crate::value::Value;

    fn run(src: &str) -> (TagResult<()>, String) {
        let mut out: Vec<u8> = Vec::new();
        let res = Interpreter::new(&mut out).with_input(&b""[..]).run(src);
        (res, String::from_utf8(out).unwrap())
    }

    fn output(src: &str) -> String {
        let (res, out) = run(src);
        res.unwrap();
        out
    }

    fn error(src: &str) -> ErrorKind {
        run(src).0.unwrap_err().kind()
    }

    #[derive(Default)]
    struct MemoryLoader(HashMap<PathBuf, String>);

    impl MemoryLoader {
        fn with(mut self, path: &str, src: &str) -> Self {
            self.0.insert(PathBuf::from(path), String::from(src));
            self
        }
    }

    impl SourceLoader for MemoryLoader {
        fn resolve(&self, base: &Path, target: &str) -> PathBuf {
            base.join(target)
        }

        fn load(&self, path: &Path) -> io::Result<String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(output("print 1 + 2 * 3;"), "7\n");
        assert_eq!(output("print (1 + 2) * 3;"), "9\n");
        // Equal precedence groups to the left.
        assert_eq!(output("print 2 ** 3 ** 2;"), "64\n");
        assert_eq!(output("print 10 - 2 - 3;"), "5\n");
        assert_eq!(output("print 20 / 2 / 5;"), "2\n");
        assert_eq!(output("print -2 ** 2 + 1 == 5 && !false;"), "true\n");
    }

    #[test]
    fn test_empty_parentheses_have_no_value() {
        assert_eq!(output("print ();"), "none\n");
    }

    #[test]
    fn test_declare_and_compound_assign() {
        let mut out: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut out);
        interpreter.run("x = 5; x += 3;").unwrap();
        assert_eq!(interpreter.registry().value("x"), Some(Value::from(8)));

        let err = interpreter.run("x = 1;").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Name);
        assert_eq!(err.to_string(), "[line 1] name error: 'x' is already declared");
    }

    #[test]
    fn test_compound_needs_existing_name() {
        assert_eq!(error("y += 1;"), ErrorKind::Name);
    }

    #[test]
    fn test_constants() {
        assert_eq!(error("π += 1;"), ErrorKind::Name);
        assert_eq!(error("π = 3;"), ErrorKind::Name);
        assert_eq!(output("print π > 3.14;"), "true\n");
    }

    #[test]
    fn test_redeclaring_in_a_loop_assigns() {
        assert_eq!(
            output("i = 0; repeat (3) { i += 1; y = i * 2; } print y;"),
            "6\n"
        );
    }

    #[test]
    fn test_if_elif_else() {
        assert_eq!(output("if (false) { print 1; } else { print 2; }"), "2\n");
        assert_eq!(
            output("if (false) { print 1; } elif (true) { print 2; } else { print 3; }"),
            "2\n"
        );
        assert_eq!(
            output("if (true) { print 1; } elif (true) { print 2; } else { print 3; }"),
            "1\n"
        );
        // The else branch runs exactly once per pass.
        assert_eq!(
            output("repeat (2) { if (false) { print \"a\"; } else { print \"b\"; } }"),
            "b\nb\n"
        );
    }

    #[test]
    fn test_condition_must_be_bool() {
        assert_eq!(error("if (1) { print 1; }"), ErrorKind::Operator);
        assert_eq!(error("while (\"yes\") { print 1; }"), ErrorKind::Operator);
    }

    #[test]
    fn test_repeat() {
        assert_eq!(output("n = 0; repeat (3) { n += 1; } print n;"), "3\n");
        assert_eq!(output("repeat (-2) { print 1; } print 0;"), "0\n");
        assert_eq!(error("repeat (\"3\") { print 1; }"), ErrorKind::Arity);
    }

    #[test]
    fn test_break_stops_loop() {
        assert_eq!(
            output(
                "i = 0; while (true) { i += 1; if (i == 3) { break; } print i; } print i;"
            ),
            "1\n2\n3\n"
        );
        assert_eq!(
            output("repeat (5) { print 1; break; print 2; }"),
            "1\n"
        );
    }

    #[test]
    fn test_break_only_leaves_innermost_loop() {
        assert_eq!(
            output("repeat (2) { repeat (3) { print 1; break; } print 2; }"),
            "1\n2\n1\n2\n"
        );
    }

    #[test]
    fn test_foreach() {
        assert_eq!(
            output("arr = [1, 2, 3]; total = 0; repeat (x : arr) { total += x; } print total;"),
            "6\n"
        );
        assert_eq!(error("repeat (x : [1]) { } print x;"), ErrorKind::Name);
        assert_eq!(error("repeat (x : 5) { }"), ErrorKind::Arity);
    }

    #[test]
    fn test_foreach_restores_shadowed_name() {
        assert_eq!(
            output("x = \"outer\"; repeat (x : [1, 2]) { print x; } print x;"),
            "1\n2\nouter\n"
        );
    }

    #[test]
    fn test_function_return() {
        assert_eq!(
            output("fun f() { return 42; print \"unreachable\"; } print call f();"),
            "42\n"
        );
        assert_eq!(
            output("fun add(a, b) { return a + b; } print call add(1, 2) * 2;"),
            "6\n"
        );
    }

    #[test]
    fn test_function_without_return() {
        assert_eq!(output("fun f() { print 1; } print call f();"), "1\nnone\n");
    }

    #[test]
    fn test_function_slot_holds_last_result() {
        assert_eq!(output("fun f(a) { return a; } call f(5); print f;"), "5\n");
    }

    #[test]
    fn test_functions_are_callable_before_declaration() {
        assert_eq!(output("print call f(); fun f() { return 1; }"), "1\n");
    }

    #[test]
    fn test_arity_error_names_function() {
        let (res, _) = run("fun add(a, b) { return a + b; } call add(1);");
        let err = res.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Arity);
        assert!(err.to_string().contains("'add'"));
    }

    #[test]
    fn test_calling_unknown_or_non_function() {
        assert_eq!(error("call nope();"), ErrorKind::Name);
        assert_eq!(error("x = 1; call x();"), ErrorKind::Name);
    }

    // A return issued inside nested loops leaves the function at once instead of only ending
    // the loop it was issued from.
    #[test]
    fn test_return_from_nested_loops() {
        let src = "
            fun find() {
                i = 0;
                while (true) {
                    repeat (10) {
                        i += 1;
                        if (i == 3) { return i; }
                    }
                }
            }
            print call find();
        ";
        assert_eq!(output(src), "3\n");
    }

    #[test]
    fn test_break_outside_loop_ends_function() {
        assert_eq!(
            output("fun f() { print 1; break; print 2; } call f(); print 3;"),
            "1\n3\n"
        );
    }

    #[test]
    fn test_return_at_top_level_ends_script() {
        assert_eq!(output("print 1; return; print 2;"), "1\n");
    }

    #[test]
    fn test_parameters_are_gone_after_call() {
        assert_eq!(
            error("fun f(a) { return a; } x = call f(1); print a;"),
            ErrorKind::Name
        );
        assert_eq!(
            error("fun f() { t = 1; return t; } call f(); print t;"),
            ErrorKind::Name
        );
    }

    #[test]
    fn test_locals_can_be_declared_on_every_call() {
        assert_eq!(
            output("fun f(a) { t = a * 2; return t; } print call f(1); print call f(2);"),
            "2\n4\n"
        );
    }

    #[test]
    fn test_parameters_shadow_globals() {
        assert_eq!(
            output("n = 10; fun f(n) { return n + 1; } print call f(1); print n;"),
            "2\n10\n"
        );
    }

    #[test]
    fn test_recursion() {
        let src = "
            fun fib(n) {
                if (n < 2) { return n; }
                r = call fib(n - 1) + call fib(n - 2);
                return r;
            }
            print call fib(10);
        ";
        assert_eq!(output(src), "55\n");
    }

    #[test]
    fn test_recursion_limit() {
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| error("fun f() { return call f(); } call f();"))
            .unwrap();

        assert_eq!(handle.join().unwrap(), ErrorKind::Recursion);
    }

    #[test]
    fn test_free() {
        assert_eq!(error("x = 1; free x; print x;"), ErrorKind::Name);
        assert_eq!(error("free nope;"), ErrorKind::Name);

        let mut out: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut out);
        interpreter.run("x = 1; fun f() { } free all;").unwrap();
        assert!(interpreter.registry().is_empty());
    }

    #[test]
    fn test_free_all_inside_foreach() {
        let mut out: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut out);
        interpreter
            .run("x = 1; repeat (x : [5]) { free all; }")
            .unwrap();
        assert!(interpreter.registry().is_empty());
        assert_eq!(interpreter.registry().value("x"), None);
    }

    #[test]
    fn test_arrays() {
        assert_eq!(
            output("a = [1, [2, 3]]; a[1][0] = 9; a[0] += 1; print a; print a[1][0];"),
            "[2, [9, 3]]\n9\n"
        );
        assert_eq!(output("a = [1]; b = a; b[0] = 2; print a;"), "[1]\n");
        assert_eq!(error("a = [1]; print a[1];"), ErrorKind::Arity);
        assert_eq!(error("a = 1; print a[0];"), ErrorKind::Arity);
    }

    #[test]
    fn test_operator_errors() {
        assert_eq!(error("print 1 + \"a\";"), ErrorKind::Operator);
        assert_eq!(error("print 1 / 0;"), ErrorKind::Operator);
        assert_eq!(error("print -\"a\";"), ErrorKind::Operator);
    }

    #[test]
    fn test_load_errors_come_before_side_effects() {
        let (res, out) = run("print 1; print 1 +;");

        assert_eq!(res.unwrap_err().kind(), ErrorKind::Spelling);
        assert_eq!(out, "");
    }

    #[test]
    fn test_input_and_conversions() {
        let mut out: Vec<u8> = Vec::new();
        Interpreter::new(&mut out)
            .with_input(&b"41\n"[..])
            .run("n = int input \"number? \"; print n + 1;")
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "number? 42\n");

        assert_eq!(output("print float 2; print (string 1) + \"x\";"), "2.0\n1x\n");
        assert_eq!(error("print int \"abc\";"), ErrorKind::Operator);
    }

    #[test]
    fn test_extern() {
        assert_eq!(output("extern math; print call math.sqrt(16);"), "4.0\n");
        assert_eq!(output("extern math m; print call m.abs(-3);"), "3\n");
        assert_eq!(output("extern math; extern math; print math.e > 2;"), "true\n");
        assert_eq!(error("extern nope;"), ErrorKind::Name);
        assert_eq!(error("extern math; call math.sqrt(1, 2);"), ErrorKind::Arity);
    }

    #[test]
    fn test_insert() {
        let loader = MemoryLoader::default()
            .with(
                "lib.tag",
                "fun double(x) { return x * 2; } local { print \"lib only\"; } shared = 4;",
            )
            .with("main.tag", "insert \"lib.tag\"; local { print \"main\"; } print call double(shared);");

        let mut out: Vec<u8> = Vec::new();
        Interpreter::new(&mut out)
            .with_loader(loader)
            .run_file("main.tag")
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "main\n8\n");
    }

    #[test]
    fn test_circular_insert() {
        let loader = MemoryLoader::default()
            .with("a.tag", "insert \"b.tag\";")
            .with("b.tag", "insert \"a.tag\";");

        let mut out: Vec<u8> = Vec::new();
        let err = Interpreter::new(&mut out)
            .with_loader(loader)
            .run_file("a.tag")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parser);
    }

    #[test]
    fn test_insert_runs_loaded_file_again() {
        let loader = MemoryLoader::default()
            .with("lib.tag", "fun twice(x) { return x * 2; } count = 0; print \"lib\";")
            .with("main.tag", "repeat (2) { insert \"lib.tag\"; } print call twice(3);");

        let mut out: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut out).with_loader(loader);
        interpreter.run_file("main.tag").unwrap();
        let nodes = interpreter.ast.len();
        interpreter.run("insert \"lib.tag\";").unwrap();
        // Only the new root, the insert and its path were added.
        assert_eq!(interpreter.ast.len(), nodes + 3);
        drop(interpreter);

        assert_eq!(String::from_utf8(out).unwrap(), "lib\nlib\n6\nlib\n");
    }

    // Hands out the same source for any path and never normalises targets.
    struct EchoLoader(&'static str);

    impl SourceLoader for EchoLoader {
        fn resolve(&self, base: &Path, target: &str) -> PathBuf {
            base.join(target)
        }

        fn load(&self, _: &Path) -> io::Result<String> {
            Ok(String::from(self.0))
        }
    }

    #[test]
    fn test_insert_depth_is_limited() {
        let mut out: Vec<u8> = Vec::new();
        let err = Interpreter::new(&mut out)
            .with_loader(EchoLoader("insert \"x/../a.tag\";"))
            .run_file("a.tag")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parser);
    }

    #[test]
    fn test_fs_insert_of_self_through_relative_path() {
        let dir = std::env::temp_dir().join(format!("tag-insert-{}", std::process::id()));
        fs::create_dir_all(dir.join("x")).unwrap();
        fs::write(dir.join("a.tag"), "print 1; insert \"x/../a.tag\";").unwrap();

        let mut out: Vec<u8> = Vec::new();
        let res = Interpreter::new(&mut out).run_file(dir.join("a.tag"));
        fs::remove_dir_all(&dir).unwrap();

        let err = res.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parser);
        assert_eq!(String::from_utf8(out).unwrap(), "1\n");
    }

    #[test]
    fn test_missing_insert() {
        let mut out: Vec<u8> = Vec::new();
        let err = Interpreter::new(&mut out)
            .with_loader(MemoryLoader::default())
            .run("insert \"missing.tag\";")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
