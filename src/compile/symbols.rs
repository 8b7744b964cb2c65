use crate::compile::location::ScopeId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Free,
    Builtin,
    /// The name a function literal is bound to, visible inside its own body
    /// for recursion.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// Lexically scoped symbol table. Each function literal gets an enclosed
/// table; resolving a name from an outer function scope captures it as a
/// free variable.
#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    free: Vec<Symbol>,
}

impl SymbolTable {
    pub fn enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..Default::default()
        }
    }

    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|boxed| *boxed)
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let outer = self.outer.as_mut()?;
        let symbol = outer.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            _ => Some(self.define_free(symbol)),
        }
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free.push(original.clone());
        let symbol = Symbol {
            name: original.name,
            scope: SymbolScope::Free,
            index: self.free.len() - 1,
        };
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }
}

/// One named slot with the instruction index from which it holds a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub slot: usize,
    pub live_from: usize,
}

/// Maps VM slots back to source-level names, per scope. Built by the
/// compiler; the VM consults it to enumerate the objects live in a frame.
#[derive(Debug, Clone, Default)]
pub struct NameStore {
    globals: Vec<Binding>,
    locals: HashMap<ScopeId, Vec<Binding>>,
}

impl NameStore {
    pub fn record_global(&mut self, name: &str, slot: usize, live_from: usize) {
        self.globals.push(Binding {
            name: name.to_string(),
            slot,
            live_from,
        });
    }

    pub fn record_local(&mut self, scope: ScopeId, name: &str, slot: usize, live_from: usize) {
        self.locals.entry(scope).or_default().push(Binding {
            name: name.to_string(),
            slot,
            live_from,
        });
    }

    /// Globals live at instruction `ip` of the top-level scope.
    pub fn live_globals(&self, ip: usize) -> Vec<&Binding> {
        live(&self.globals, ip)
    }

    /// Locals (parameters included) live at instruction `ip` of `scope`.
    pub fn live_locals(&self, scope: ScopeId, ip: usize) -> Vec<&Binding> {
        self.locals.get(&scope).map_or_else(Vec::new, |b| live(b, ip))
    }
}

/// Declaration order preserved; a later binding of the same name shadows
/// the earlier one.
fn live(bindings: &[Binding], ip: usize) -> Vec<&Binding> {
    let mut out: Vec<&Binding> = Vec::new();
    for binding in bindings.iter().filter(|b| b.live_from <= ip) {
        if let Some(slot) = out.iter_mut().find(|b| b.name == binding.name) {
            *slot = binding;
        } else {
            out.push(binding);
        }
    }
    out
}
