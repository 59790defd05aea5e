use std::collections::HashMap;

use ahash::RandomState;
use tracing::trace;

use crate::ast::NodeId;
use crate::callable::Callable;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum BindingKind {
    Variable,
    Constant,
    Function(Callable),
}

/// One registry entry. Functions keep the value they returned last in `value`.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub kind: BindingKind,

    // The declaration node that created the binding, `None` for bindings provided by the host.
    pub(crate) origin: Option<NodeId>,
}

impl Binding {
    pub(crate) fn variable(value: Value, origin: Option<NodeId>) -> Self {
        Binding {
            value,
            kind: BindingKind::Variable,
            origin,
        }
    }

    pub(crate) fn constant(value: Value) -> Self {
        Binding {
            value,
            kind: BindingKind::Constant,
            origin: None,
        }
    }

    pub(crate) fn function(callable: Callable, origin: Option<NodeId>) -> Self {
        Binding {
            value: Value::None,
            kind: BindingKind::Function(callable),
            origin,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, BindingKind::Constant)
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum RegistryError {
    Undefined,
    AlreadyDeclared,
    Constant,
}

// A name bound for the lifetime of one invocation, together with whatever it hid.
#[derive(Debug)]
struct Local {
    key: String,
    shadowed: Option<Binding>,
}

#[derive(Debug)]
struct Frame {
    function: String,
    locals: Vec<Local>,
}

/// The flat name registry. There is a single namespace; function calls only add frames that
/// remember which names to tear down (and restore) when the call returns.
#[derive(Debug, Default)]
pub struct Registry {
    values: HashMap<String, Binding, RandomState>,
    frames: Vec<Frame>,
    // Items of the foreach loops currently running, innermost last.
    items: Vec<Local>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn get(&self, key: &str) -> Option<&Binding> {
        self.values.get(key)
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|binding| binding.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn declare(&mut self, key: &str, binding: Binding) -> Result<(), RegistryError> {
        if self.values.contains_key(key) {
            return Err(RegistryError::AlreadyDeclared);
        }
        self.values.insert(String::from(key), binding);
        Ok(())
    }

    // Inserts or replaces without any checks, used for host imports and loop items.
    pub(crate) fn define(&mut self, key: &str, binding: Binding) {
        self.values.insert(String::from(key), binding);
    }

    pub(crate) fn assign(&mut self, key: &str, value: Value) -> Result<(), RegistryError> {
        match self.values.get_mut(key) {
            None => Err(RegistryError::Undefined),
            Some(binding) if binding.is_constant() => Err(RegistryError::Constant),
            Some(binding) => {
                binding.value = value;
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Result<Binding, RegistryError> {
        self.values.remove(key).ok_or(RegistryError::Undefined)
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
        // Nothing hidden by an active call may come back once everything is freed.
        let locals = self.frames.iter_mut().flat_map(|frame| frame.locals.iter_mut());
        for local in locals.chain(self.items.iter_mut()) {
            local.shadowed = None;
        }
    }

    /// Binds `key` to `binding` and returns whatever the key was bound to before, so the caller
    /// can hand it back to `unshadow` once the new binding's lifetime is over.
    fn shadow(&mut self, key: &str, binding: Binding) -> Option<Binding> {
        self.values.insert(String::from(key), binding)
    }

    fn unshadow(&mut self, key: &str, shadowed: Option<Binding>) {
        match shadowed {
            Some(binding) => {
                self.values.insert(String::from(key), binding);
            }
            None => {
                self.values.remove(key);
            }
        }
    }

    /// Binds the item of a foreach loop for the whole loop. `pop_item` drops it again and hands
    /// back whatever it hid, unless everything was freed in between.
    pub(crate) fn push_item(&mut self, key: &str) {
        let shadowed = self.shadow(key, Binding::variable(Value::None, None));
        self.items.push(Local {
            key: String::from(key),
            shadowed,
        });
    }

    pub(crate) fn pop_item(&mut self) {
        if let Some(local) = self.items.pop() {
            self.unshadow(&local.key, local.shadowed);
        }
    }

    pub(crate) fn push_frame(&mut self, function: &str) {
        self.frames.push(Frame {
            function: String::from(function),
            locals: Vec::new(),
        });
    }

    /// Removes every local name of the innermost call, most recent first, restoring the
    /// bindings they shadowed.
    pub(crate) fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            trace!(function = %frame.function, locals = frame.locals.len(), "tearing down frame");
            for local in frame.locals.into_iter().rev() {
                self.unshadow(&local.key, local.shadowed);
            }
        }
    }

    pub(crate) fn in_call(&self) -> bool {
        !self.frames.is_empty()
    }

    pub(crate) fn current_function(&self) -> Option<&str> {
        self.frames.last().map(|frame| frame.function.as_str())
    }

    pub(crate) fn is_local(&self, key: &str) -> bool {
        self.frames
            .last()
            .map_or(false, |frame| frame.locals.iter().any(|local| local.key == key))
    }

    /// Binds a fresh local name in the innermost call.
    pub(crate) fn bind_local(&mut self, key: &str, binding: Binding) {
        let shadowed = self.shadow(key, binding);
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.push(Local {
                key: String::from(key),
                shadowed,
            });
        }
    }

    pub(crate) fn set_result(&mut self, function: &str, value: Value) {
        if let Some(binding) = self.values.get_mut(function) {
            if let BindingKind::Function(_) = binding.kind {
                binding.value = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::env::{Binding, Registry, RegistryError};
    use crate::value::Value;

    #[test]
    fn test_declare_and_get() {
        let mut registry = Registry::new();
        registry
            .declare("foo", Binding::variable(Value::from("bar"), None))
            .unwrap();
        registry
            .declare("baz", Binding::variable(Value::from(false), None))
            .unwrap();

        assert_eq!(registry.value("foo"), Some(Value::from("bar")));
        assert_eq!(registry.value("baz"), Some(Value::from(false)));
    }

    #[test]
    fn test_keys_are_unique() {
        let mut registry = Registry::new();
        registry
            .declare("foo", Binding::variable(Value::from(1), None))
            .unwrap();
        assert_eq!(
            registry.declare("foo", Binding::variable(Value::from(2), None)),
            Err(RegistryError::AlreadyDeclared)
        );
        assert_eq!(registry.value("foo"), Some(Value::from(1)));
    }

    #[test]
    fn test_assign_checks() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.assign("foo", Value::from(1)),
            Err(RegistryError::Undefined)
        );

        registry.define("pi", Binding::constant(Value::from(3.5)));
        assert_eq!(
            registry.assign("pi", Value::from(3)),
            Err(RegistryError::Constant)
        );
    }

    #[test]
    fn test_frames_restore_shadowed_names() {
        let mut registry = Registry::new();
        registry
            .declare("n", Binding::variable(Value::from("outer"), None))
            .unwrap();

        registry.push_frame("f");
        registry.bind_local("n", Binding::variable(Value::from(1), None));
        registry.bind_local("m", Binding::variable(Value::from(2), None));
        assert_eq!(registry.current_function(), Some("f"));
        assert!(registry.is_local("n"));
        assert_eq!(registry.value("n"), Some(Value::from(1)));

        registry.push_frame("f");
        registry.bind_local("n", Binding::variable(Value::from(0), None));
        assert!(!registry.is_local("m"));
        registry.pop_frame();

        assert_eq!(registry.value("n"), Some(Value::from(1)));
        registry.pop_frame();

        assert_eq!(registry.value("n"), Some(Value::from("outer")));
        assert!(!registry.contains("m"));
        assert!(!registry.in_call());
    }

    #[test]
    fn test_clear_drops_shadowed_names() {
        let mut registry = Registry::new();
        registry
            .declare("n", Binding::variable(Value::from(1), None))
            .unwrap();
        registry.push_frame("f");
        registry.bind_local("n", Binding::variable(Value::from(2), None));
        registry.clear();
        registry.pop_frame();

        assert!(registry.is_empty());
    }

    #[test]
    fn test_items_restore_shadowed_names() {
        let mut registry = Registry::new();
        registry
            .declare("x", Binding::variable(Value::from(1), None))
            .unwrap();

        registry.push_item("x");
        registry.define("x", Binding::variable(Value::from(5), None));
        registry.push_item("y");
        assert_eq!(registry.value("y"), Some(Value::None));
        registry.pop_item();
        assert!(!registry.contains("y"));
        registry.pop_item();

        assert_eq!(registry.value("x"), Some(Value::from(1)));
    }

    #[test]
    fn test_clear_drops_names_hidden_by_items() {
        let mut registry = Registry::new();
        registry
            .declare("x", Binding::variable(Value::from(1), None))
            .unwrap();
        registry.push_item("x");
        registry.clear();
        registry.pop_item();

        assert!(registry.is_empty());
    }
}
