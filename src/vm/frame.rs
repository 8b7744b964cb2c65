use crate::compile::code::Op;
use crate::compile::location::ScopeId;
use crate::vm::object::Closure;
use std::sync::Arc;

/// One activation record on the VM's call stack. `ip` always designates the
/// next instruction to execute; for suspended caller frames that is the
/// instruction following the call.
#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Arc<Closure>,
    pub ip: usize,
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Arc<Closure>, base_pointer: usize) -> Self {
        Frame {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    pub fn instructions(&self) -> &[Op] {
        &self.closure.func.instructions
    }

    pub fn scope(&self) -> ScopeId {
        self.closure.func.scope
    }

    /// Display name for stack traces; the outermost frame is relabeled
    /// `main` by the driver.
    pub fn name(&self) -> &str {
        self.closure.func.name.as_deref().unwrap_or("<fn>")
    }
}
