use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use crate::ast::NodeId;
use crate::value::Value;

/// Native functions return a plain message on failure; the call site turns it into an
/// operator error carrying the line of the call.
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Value, String>>;

/// A function declared in a script. The body is a block node of the shared syntax tree.
#[derive(Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub(crate) body: NodeId,
}

impl Function {
    pub(crate) fn new(name: &str, params: Vec<String>, body: NodeId) -> Self {
        Function {
            name: String::from(name),
            params,
            body,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

// `HostFunction` bridges native rust functions and the script's registry. They are registered
// under `module.method` when a module is imported.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    arity: Option<usize>,
    func: HostFn,
}

impl HostFunction {
    /// `arity` of `None` accepts any number of arguments.
    pub fn new(name: &str, arity: Option<usize>, func: HostFn) -> Self {
        HostFunction {
            name: String::from(name),
            arity,
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.func)(args)
    }
}

impl Debug for HostFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

#[derive(Debug, Clone)]
pub enum Callable {
    Script(Rc<Function>),
    Host(HostFunction),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::Script(fun) => &fun.name,
            Callable::Host(fun) => fun.name(),
        }
    }
}
