mod ast;
mod callable;
mod env;
mod error;
mod evaluator;
mod interpreter;
mod limits;
mod native;
mod parser;
mod resolver;
mod value;

pub use ast::{Ast, Node, NodeId, NodeKind};
pub use callable::{Callable, Function, HostFn, HostFunction};
pub use env::{Binding, BindingKind, Registry};
pub use error::{Error, ErrorKind, TagResult};
pub use interpreter::{FsLoader, Interpreter, SourceLoader};
pub use limits::INDEX_FILE;
pub use native::{HostEntry, HostModules};
pub use parser::Parser;
pub use value::{Conversion, Value};
