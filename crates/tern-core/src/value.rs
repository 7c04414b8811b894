use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap as SpurMap;

use crate::instruction::Instruction;
use crate::symbol::{compare_spurs, intern, resolve, Spur};

/// A pair. The empty list is the cell `(Nil . Nil)`.
#[derive(Debug, Clone)]
pub struct Cons {
    pub car: Value,
    pub cdr: Value,
}

impl Cons {
    pub fn is_empty(&self) -> bool {
        matches!((&self.car, &self.cdr), (Value::Nil, Value::Nil))
    }
}

// Unlink the cdr chain one cell at a time so long lists don't recurse on drop.
impl Drop for Cons {
    fn drop(&mut self) {
        let mut next = std::mem::replace(&mut self.cdr, Value::Nil);
        while let Value::Cons(cell) = next {
            match Rc::try_unwrap(cell) {
                Ok(mut cell) => next = std::mem::replace(&mut cell.cdr, Value::Nil),
                Err(_) => break,
            }
        }
    }
}

/// A callable value: the captured frame, the parameter names and the body.
///
/// The body is the closure-local instruction block; its jump targets are
/// relative to its own start. Activations are created from a closure on
/// every call and own their stack and PC; the closure itself never changes.
#[derive(Debug)]
pub struct Closure {
    pub env: Rc<Env>,
    pub params: Vec<Spur>,
    pub code: Rc<[Instruction]>,
}

impl Closure {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// The runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(i64),
    Symbol(Spur),
    String(Spur),
    Cons(Rc<Cons>),
    Array(Rc<RefCell<Vec<Value>>>),
    HashMap(Rc<RefCell<SpurMap<Spur, Value>>>),
    Closure(Rc<Closure>),
    Environment(Rc<Env>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Symbol(_) => "symbol",
            Value::String(_) => "string",
            Value::Cons(_) => "cons",
            Value::Array(_) => "array",
            Value::HashMap(_) => "hashmap",
            Value::Closure(_) => "closure",
            Value::Environment(_) => "environment",
        }
    }

    pub fn symbol(s: &str) -> Value {
        Value::Symbol(intern(s))
    }

    pub fn string(s: &str) -> Value {
        Value::String(intern(s))
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Cons(Rc::new(Cons { car, cdr }))
    }

    pub fn empty_list() -> Value {
        Value::cons(Value::Nil, Value::Nil)
    }

    /// Build a proper list terminated by the empty list.
    pub fn list(items: Vec<Value>) -> Value {
        Value::improper_list(items, Value::empty_list())
    }

    /// Build a list whose final cdr is `tail`.
    pub fn improper_list(items: Vec<Value>, tail: Value) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn hashmap() -> Value {
        Value::HashMap(Rc::new(RefCell::new(SpurMap::new())))
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_symbol_spur(&self) -> Option<Spur> {
        match self {
            Value::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_cons(&self) -> Option<&Rc<Cons>> {
        match self {
            Value::Cons(c) => Some(c),
            _ => None,
        }
    }

    /// The interned index of a Symbol or String, used as a map key.
    pub fn as_key(&self) -> Option<Spur> {
        match self {
            Value::Symbol(s) | Value::String(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_empty_list(&self) -> bool {
        matches!(self, Value::Cons(c) if c.is_empty())
    }

    /// The elements of a proper list, or `None` for anything else.
    pub fn list_items(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cur = self;
        loop {
            match cur {
                Value::Cons(c) if c.is_empty() => return Some(items),
                Value::Cons(c) => {
                    items.push(c.car.clone());
                    cur = &c.cdr;
                }
                _ => return None,
            }
        }
    }

    /// Runtime equality: numbers by value, symbols and strings by index,
    /// every compound value by identity. Values of different tags are unequal.
    pub fn eqv(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Cons(a), Value::Cons(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::HashMap(a), Value::HashMap(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Environment(a), Value::Environment(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The form `print` writes: strings without quotes, everything else as displayed.
    pub fn display_string(&self) -> String {
        match self {
            Value::String(s) => resolve(*s).to_string(),
            other => other.to_string(),
        }
    }
}

// Structural on cons cells, identity on the mutable and callable kinds.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let (mut a, mut b) = (self, other);
        loop {
            match (a, b) {
                (Value::Cons(x), Value::Cons(y)) => {
                    if Rc::ptr_eq(x, y) {
                        return true;
                    }
                    if x.car != y.car {
                        return false;
                    }
                    a = &x.cdr;
                    b = &y.cdr;
                }
                _ => return a.eqv(b),
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "#nil"),
            Value::Bool(true) => write!(f, "#t"),
            Value::Bool(false) => write!(f, "#f"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{}", resolve(*s)),
            Value::String(s) => write!(f, "\"{}\"", resolve(*s)),
            Value::Cons(cell) => {
                if cell.is_empty() {
                    return write!(f, "()");
                }
                write!(f, "({}", cell.car)?;
                let mut rest = &cell.cdr;
                loop {
                    match rest {
                        Value::Cons(next) if next.is_empty() => break,
                        Value::Cons(next) => {
                            write!(f, " {}", next.car)?;
                            rest = &next.cdr;
                        }
                        tail => {
                            write!(f, " . {tail}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::HashMap(map) => {
                let map = map.borrow();
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|(k1, _), (k2, _)| compare_spurs(**k1, **k2));
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "\"{}\" {v}", resolve(**k))?;
                }
                write!(f, "}}")
            }
            Value::Closure(c) => write!(f, "<closure/{}>", c.arity()),
            Value::Environment(_) => write!(f, "<environment>"),
        }
    }
}

/// A frame of bindings with an optional parent frame.
pub struct Env {
    bindings: RefCell<SpurMap<Spur, Value>>,
    parent: Option<Rc<Env>>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            bindings: RefCell::new(SpurMap::new()),
            parent: None,
        }
    }

    pub fn with_parent(parent: Rc<Env>) -> Self {
        Env {
            bindings: RefCell::new(SpurMap::new()),
            parent: Some(parent),
        }
    }

    pub fn parent(&self) -> Option<&Rc<Env>> {
        self.parent.as_ref()
    }

    /// Look a name up, walking outward through parent frames.
    pub fn get(&self, name: Spur) -> Option<Value> {
        let mut frame = self;
        loop {
            if let Some(val) = frame.bindings.borrow().get(&name) {
                return Some(val.clone());
            }
            match &frame.parent {
                Some(parent) => frame = parent.as_ref(),
                None => return None,
            }
        }
    }

    /// Bind in this frame, shadowing any outer binding.
    pub fn define(&self, name: Spur, val: Value) {
        self.bindings.borrow_mut().insert(name, val);
    }

    /// Overwrite the nearest existing binding. Returns false if there is none.
    pub fn set_existing(&self, name: Spur, val: Value) -> bool {
        let mut frame = self;
        loop {
            if let Some(entry) = frame.bindings.borrow_mut().get_mut(&name) {
                *entry = val;
                return true;
            }
            match &frame.parent {
                Some(parent) => frame = parent.as_ref(),
                None => return false,
            }
        }
    }

    /// `set` semantics: update the nearest binding, or bind here if none exists.
    pub fn assign(&self, name: Spur, val: Value) {
        if !self.set_existing(name, val.clone()) {
            self.define(name, val);
        }
    }

    pub fn contains_local(&self, name: Spur) -> bool {
        self.bindings.borrow().contains_key(&name)
    }

    /// Names bound directly in this frame, sorted by text.
    pub fn local_names(&self) -> Vec<Spur> {
        let mut names: Vec<Spur> = self.bindings.borrow().keys().copied().collect();
        names.sort_by(|a, b| compare_spurs(*a, *b));
        names
    }

    /// Number of frames from this one to the root, inclusive.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = self;
        while let Some(parent) = &frame.parent {
            depth += 1;
            frame = parent.as_ref();
        }
        depth
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

// Frames can reach closures that capture them, so Debug stays shallow.
impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("bindings", &self.bindings.borrow().len())
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_construction() {
        let list = Value::list(vec![Value::Number(1), Value::Number(2)]);
        assert_eq!(list.to_string(), "(1 2)");
        assert_eq!(
            list.list_items().unwrap(),
            vec![Value::Number(1), Value::Number(2)]
        );
    }

    #[test]
    fn test_empty_list() {
        let empty = Value::empty_list();
        assert!(empty.is_empty_list());
        assert_eq!(empty.to_string(), "()");
        assert_eq!(empty.list_items().unwrap(), vec![]);
    }

    #[test]
    fn test_improper_list() {
        let pair = Value::improper_list(vec![Value::symbol("a")], Value::symbol("b"));
        assert_eq!(pair.to_string(), "(a . b)");
        assert_eq!(pair.list_items(), None);
    }

    #[test]
    fn test_display_atoms() {
        assert_eq!(Value::Nil.to_string(), "#nil");
        assert_eq!(Value::Bool(true).to_string(), "#t");
        assert_eq!(Value::Number(-5).to_string(), "-5");
        assert_eq!(Value::string("hi there").to_string(), "\"hi there\"");
        assert_eq!(Value::string("hi there").display_string(), "hi there");
    }

    #[test]
    fn test_display_array_and_map() {
        let arr = Value::array(vec![Value::Number(1), Value::string("x")]);
        assert_eq!(arr.to_string(), "[1 \"x\"]");
        let map = Value::hashmap();
        if let Value::HashMap(m) = &map {
            m.borrow_mut().insert(intern("b"), Value::Number(2));
            m.borrow_mut().insert(intern("a"), Value::Number(1));
        }
        assert_eq!(map.to_string(), "{\"a\" 1 \"b\" 2}");
    }

    #[test]
    fn test_eqv_identity_for_cons() {
        let a = Value::list(vec![Value::Number(1)]);
        let b = Value::list(vec![Value::Number(1)]);
        assert!(!a.eqv(&b));
        assert!(a.eqv(&a.clone()));
        // host-side equality is structural
        assert_eq!(a, b);
    }

    #[test]
    fn test_eqv_scalars() {
        assert!(Value::Number(3).eqv(&Value::Number(3)));
        assert!(Value::symbol("x").eqv(&Value::symbol("x")));
        assert!(!Value::symbol("x").eqv(&Value::string("x")));
        assert!(!Value::Nil.eqv(&Value::Bool(false)));
    }

    #[test]
    fn test_array_identity() {
        let a = Value::array(vec![]);
        let b = Value::array(vec![]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_env_lookup_walks_parents() {
        let root = Rc::new(Env::new());
        root.define(intern("x"), Value::Number(1));
        let child = Env::with_parent(root.clone());
        assert_eq!(child.get(intern("x")), Some(Value::Number(1)));
        assert_eq!(child.get(intern("missing-binding")), None);
        assert_eq!(child.depth(), 2);
    }

    #[test]
    fn test_env_assign_updates_nearest() {
        let root = Rc::new(Env::new());
        root.define(intern("x"), Value::Number(1));
        let child = Env::with_parent(root.clone());
        child.assign(intern("x"), Value::Number(2));
        assert_eq!(root.get(intern("x")), Some(Value::Number(2)));
        assert!(!child.contains_local(intern("x")));
    }

    #[test]
    fn test_env_assign_falls_back_to_current_frame() {
        let root = Rc::new(Env::new());
        let child = Env::with_parent(root.clone());
        child.assign(intern("fresh"), Value::Bool(true));
        assert!(child.contains_local(intern("fresh")));
        assert_eq!(root.get(intern("fresh")), None);
    }

    #[test]
    fn test_env_define_shadows() {
        let root = Rc::new(Env::new());
        root.define(intern("y"), Value::Number(1));
        let child = Env::with_parent(root.clone());
        child.define(intern("y"), Value::Number(9));
        assert_eq!(child.get(intern("y")), Some(Value::Number(9)));
        assert_eq!(root.get(intern("y")), Some(Value::Number(1)));
    }

    #[test]
    fn test_long_list_drops_and_compares_without_recursion() {
        let items: Vec<Value> = (0..1_000_000).map(Value::Number).collect();
        let a = Value::list(items.clone());
        let b = Value::list(items);
        assert_eq!(a, b);
        drop(a);
        drop(b);
    }

    #[test]
    fn test_drop_keeps_shared_tail() {
        let tail = Value::list(vec![Value::Number(2), Value::Number(3)]);
        let head = Value::cons(Value::Number(1), tail.clone());
        drop(head);
        assert_eq!(tail.list_items().map(|v| v.len()), Some(2));
    }
}
