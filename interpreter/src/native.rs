use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::RandomState;

use crate::callable::{HostFn, HostFunction};
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum HostEntry {
    Function(HostFunction),
    Constant(Value),
}

/// The table of native modules a script can import with `extern`. Modules are plain lists of
/// `(method, entry)` pairs, looked up by name.
#[derive(Debug, Default, Clone)]
pub struct HostModules {
    modules: HashMap<String, Vec<(String, HostEntry)>, RandomState>,
}

impl HostModules {
    pub fn new() -> Self {
        HostModules::default()
    }

    pub fn register(&mut self, module: &str, method: &str, arity: Option<usize>, func: HostFn) {
        let qualified = format!("{}.{}", module, method);
        let entry = HostEntry::Function(HostFunction::new(&qualified, arity, func));
        self.insert(module, method, entry);
    }

    pub fn register_constant(&mut self, module: &str, name: &str, value: Value) {
        self.insert(module, name, HostEntry::Constant(value));
    }

    fn insert(&mut self, module: &str, method: &str, entry: HostEntry) {
        let entries = self.modules.entry(String::from(module)).or_default();
        match entries.iter_mut().find(|(name, _)| name == method) {
            Some((_, existing)) => *existing = entry,
            None => entries.push((String::from(method), entry)),
        }
    }

    pub fn module(&self, name: &str) -> Option<&[(String, HostEntry)]> {
        self.modules.get(name).map(Vec::as_slice)
    }

    /// Finds a function by its qualified `module.method` name.
    pub fn lookup(&self, qualified: &str) -> Option<HostFunction> {
        let (module, method) = qualified.split_once('.')?;
        self.module(module)?
            .iter()
            .find_map(|(name, entry)| match entry {
                HostEntry::Function(fun) if name == method => Some(fun.clone()),
                _ => None,
            })
    }

    /// A small standard table: `math`, `string`, `array` and `time`.
    pub fn standard() -> Self {
        let mut host = HostModules::new();

        host.register("math", "sqrt", Some(1), Rc::new(sqrt));
        host.register("math", "floor", Some(1), Rc::new(floor));
        host.register("math", "ceil", Some(1), Rc::new(ceil));
        host.register("math", "abs", Some(1), Rc::new(abs));
        host.register("math", "pow", Some(2), Rc::new(pow));
        host.register_constant("math", "e", Value::from(std::f64::consts::E));

        host.register("string", "len", Some(1), Rc::new(string_len));
        host.register("string", "upper", Some(1), Rc::new(upper));
        host.register("string", "lower", Some(1), Rc::new(lower));

        host.register("array", "len", Some(1), Rc::new(array_len));
        host.register("array", "push", Some(2), Rc::new(push));

        host.register("time", "clock", Some(0), Rc::new(clock));
        host
    }
}

fn float(value: &Value) -> Result<f64, String> {
    value
        .as_float()
        .ok_or_else(|| format!("expected a number, got {}", value.type_name()))
}

fn string(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {}", value.type_name()))
}

fn abs(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Int(val) => val
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| String::from("integer overflow")),
        Value::Float(val) => Ok(Value::Float(val.abs())),
        other => Err(format!("expected a number, got {}", other.type_name())),
    }
}

fn sqrt(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(float(&args[0])?.sqrt()))
}

fn floor(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(float(&args[0])?.floor()))
}

fn ceil(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(float(&args[0])?.ceil()))
}

fn pow(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(float(&args[0])?.powf(float(&args[1])?)))
}

fn string_len(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(string(&args[0])?.chars().count()))
}

fn upper(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(string(&args[0])?.to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value, String> {
    Ok(Value::from(string(&args[0])?.to_lowercase()))
}

fn array_len(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Array(items) => Ok(Value::from(items.len())),
        other => Err(format!("expected an array, got {}", other.type_name())),
    }
}

fn push(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Array(items) => {
            let mut items = Vec::clone(items);
            items.push(args[1].clone());
            Ok(Value::array(items))
        }
        other => Err(format!("expected an array, got {}", other.type_name())),
    }
}

fn clock(_: &[Value]) -> Result<Value, String> {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| err.to_string())?;
    Ok(Value::Float(since_epoch.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use crate::native::{HostEntry, HostModules};
    use crate::value::Value;

    #[test]
    fn test_lookup_qualified_name() {
        let host = HostModules::standard();
        let sqrt = host.lookup("math.sqrt").unwrap();

        assert_eq!(sqrt.name(), "math.sqrt");
        assert_eq!(sqrt.arity(), Some(1));
        assert_eq!(sqrt.call(&[Value::from(16)]), Ok(Value::from(4.0)));
        assert!(host.lookup("math.nope").is_none());
        assert!(host.lookup("sqrt").is_none());
    }

    #[test]
    fn test_module_lists_constants() {
        let host = HostModules::standard();
        let math = host.module("math").unwrap();

        assert!(math
            .iter()
            .any(|(name, entry)| name == "e" && matches!(entry, HostEntry::Constant(_))));
    }

    #[test]
    fn test_register_replaces() {
        let mut host = HostModules::new();
        host.register_constant("m", "x", Value::from(1));
        host.register_constant("m", "x", Value::from(2));

        assert_eq!(host.module("m").unwrap().len(), 1);
    }

    #[test]
    fn test_array_push_copies() {
        let host = HostModules::standard();
        let push = host.lookup("array.push").unwrap();
        let original = Value::array(vec![Value::from(1)]);

        assert_eq!(
            push.call(&[original.clone(), Value::from(2)]),
            Ok(Value::array(vec![Value::from(1), Value::from(2)]))
        );
        assert_eq!(original, Value::array(vec![Value::from(1)]));
    }
}
