use crate::compile::code::CompiledFunction;
use std::fmt;
use std::sync::Arc;

/// Names of the VM builtins, in slot order. The compiler defines these in
/// its symbol table with matching indices.
pub fn builtin_names() -> &'static [&'static str] {
    &["puts", "len", "first", "rest", "push"]
}

/// A runtime value. Heap payloads are reference counted so stack slots and
/// captured free variables can share them.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Integer(i64),
    Boolean(bool),
    Str(Arc<String>),
    Array(Arc<Vec<Object>>),
    /// A compiled function constant, before closure capture.
    Function(Arc<CompiledFunction>),
    Closure(Arc<Closure>),
    Builtin(u8),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub func: Arc<CompiledFunction>,
    pub free: Vec<Object>,
}

impl Object {
    /// The VM object kind, as shown in variable listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Integer(_) => "INTEGER",
            Object::Boolean(_) => "BOOLEAN",
            Object::Str(_) => "STRING",
            Object::Array(_) => "ARRAY",
            Object::Function(_) => "FUNCTION",
            Object::Closure(_) => "CLOSURE",
            Object::Builtin(_) => "BUILTIN",
            Object::Null => "NULL",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Object::Closure(_) | Object::Function(_) | Object::Builtin(_)
        )
    }

    /// Everything except `false` and `null` is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Object::Boolean(b) => *b,
            Object::Null => false,
            _ => true,
        }
    }

    /// Human-readable inspection string, used for variable display.
    pub fn inspect(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(value) => write!(f, "{value}"),
            Object::Boolean(value) => write!(f, "{value}"),
            Object::Str(value) => write!(f, "{value}"),
            Object::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Object::Function(func) => {
                write!(f, "fn/{}", func.num_params)
            }
            Object::Closure(closure) => {
                write!(f, "fn/{}", closure.func.num_params)
            }
            Object::Builtin(index) => {
                let name = builtin_names()
                    .get(*index as usize)
                    .copied()
                    .unwrap_or("unknown");
                write!(f, "builtin {name}")
            }
            Object::Null => write!(f, "null"),
        }
    }
}
