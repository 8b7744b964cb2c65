//! Bytecode compiler: AST in, compiled program (instructions, constants,
//! location map, name store) out.

pub mod code;
pub mod location;
pub mod symbols;

use crate::compile::code::{CompiledFunction, Op};
use crate::compile::location::{LocationKey, LocationMap, ScopeId, SourceRange};
use crate::compile::symbols::{NameStore, Symbol, SymbolScope, SymbolTable};
use crate::lang::ast::{Block, Expression, InfixOp, PrefixOp, Program, Statement};
use crate::vm::object::{builtin_names, Object};
use std::sync::Arc;

/// A compile error with 1-based source coordinates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl CompileError {
    fn at(range: SourceRange, message: String) -> Self {
        CompileError {
            line: range.start.line,
            col: range.start.col,
            message,
        }
    }
}

/// Everything the VM needs to execute and debug a program.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub main: Arc<CompiledFunction>,
    pub constants: Vec<Object>,
    pub locations: LocationMap,
    pub names: NameStore,
}

/// Compile a parsed program. Returns the first error encountered; the
/// parser is responsible for multi-error reporting.
pub fn compile(program: &Program) -> Result<CompiledProgram, CompileError> {
    let mut compiler = Compiler::new();
    for statement in &program.statements {
        compiler.compile_statement(statement)?;
    }
    Ok(compiler.finish())
}

struct CompilationScope {
    id: ScopeId,
    instructions: Vec<Op>,
}

struct Compiler {
    constants: Vec<Object>,
    symbols: SymbolTable,
    scopes: Vec<CompilationScope>,
    next_scope: ScopeId,
    locations: LocationMap,
    names: NameStore,
}

impl Compiler {
    fn new() -> Self {
        let mut symbols = SymbolTable::default();
        for (index, name) in builtin_names().iter().enumerate() {
            symbols.define_builtin(index, name);
        }
        Compiler {
            constants: Vec::new(),
            symbols,
            scopes: vec![CompilationScope {
                id: 0,
                instructions: Vec::new(),
            }],
            next_scope: 1,
            locations: LocationMap::default(),
            names: NameStore::default(),
        }
    }

    fn finish(mut self) -> CompiledProgram {
        let scope = self.scopes.remove(0);
        let main = CompiledFunction {
            instructions: scope.instructions,
            num_locals: 0,
            num_params: 0,
            scope: scope.id,
            name: None,
        };
        CompiledProgram {
            main: Arc::new(main),
            constants: self.constants,
            locations: self.locations,
            names: self.names,
        }
    }

    fn scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compiler scope stack is never empty")
    }

    fn scope_id(&self) -> ScopeId {
        self.scopes.last().expect("compiler scope stack is never empty").id
    }

    fn emit(&mut self, op: Op, range: SourceRange) -> usize {
        let id = self.scope_id();
        let scope = self.scope();
        let ip = scope.instructions.len();
        scope.instructions.push(op);
        self.locations.insert(LocationKey { scope: id, ip }, range);
        ip
    }

    fn last_op(&mut self) -> Option<Op> {
        self.scope().instructions.last().copied()
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope {
            id: self.next_scope,
            instructions: Vec::new(),
        });
        self.next_scope += 1;
        let outer = std::mem::take(&mut self.symbols);
        self.symbols = SymbolTable::enclosed(outer);
    }

    fn leave_scope(&mut self) -> (ScopeId, Vec<Op>, Vec<Symbol>, usize) {
        let scope = self.scopes.pop().expect("leave_scope without enter_scope");
        let table = std::mem::take(&mut self.symbols);
        let free = table.free_symbols().to_vec();
        let num_locals = table.num_definitions();
        self.symbols = table.into_outer().unwrap_or_default();
        (scope.id, scope.instructions, free, num_locals)
    }

    fn add_constant(&mut self, object: Object, range: SourceRange) -> Result<u16, CompileError> {
        if self.constants.len() > u16::MAX as usize {
            return Err(CompileError::at(range, "too many constants".to_string()));
        }
        self.constants.push(object);
        Ok((self.constants.len() - 1) as u16)
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Let { name, value, range } => {
                let symbol = self.symbols.define(&name.name);
                if let Expression::Function { params, body, range } = value {
                    self.compile_function(params, body, *range, Some(name.name.as_str()))?;
                } else {
                    self.compile_expression(value)?;
                }
                match symbol.scope {
                    SymbolScope::Global => {
                        let ip = self.emit(Op::SetGlobal(symbol.index as u16), *range);
                        self.names.record_global(&name.name, symbol.index, ip + 1);
                    }
                    _ => {
                        let ip = self.emit(Op::SetLocal(symbol.index as u8), *range);
                        let scope = self.scope_id();
                        self.names.record_local(scope, &name.name, symbol.index, ip + 1);
                    }
                }
                Ok(())
            }
            Statement::Return { value, range } => {
                if self.scopes.len() == 1 {
                    return Err(CompileError::at(
                        *range,
                        "`return` outside of a function".to_string(),
                    ));
                }
                self.compile_expression(value)?;
                self.emit(Op::ReturnValue, *range);
                Ok(())
            }
            Statement::Expression { value, range } => {
                self.compile_expression(value)?;
                self.emit(Op::Pop, *range);
                Ok(())
            }
        }
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Integer { value, range } => {
                let constant = self.add_constant(Object::Integer(*value), *range)?;
                self.emit(Op::Constant(constant), *range);
            }
            Expression::Boolean { value, range } => {
                self.emit(if *value { Op::True } else { Op::False }, *range);
            }
            Expression::Str { value, range } => {
                let constant = self.add_constant(Object::Str(Arc::new(value.clone())), *range)?;
                self.emit(Op::Constant(constant), *range);
            }
            Expression::Array { elements, range } => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                if elements.len() > u16::MAX as usize {
                    return Err(CompileError::at(*range, "array literal too long".to_string()));
                }
                self.emit(Op::Array(elements.len() as u16), *range);
            }
            Expression::Ident(ident) => {
                let Some(symbol) = self.symbols.resolve(&ident.name) else {
                    return Err(CompileError::at(
                        ident.range,
                        format!("undefined variable `{}`", ident.name),
                    ));
                };
                self.load_symbol(&symbol, ident.range);
            }
            Expression::Prefix { op, right, range } => {
                self.compile_expression(right)?;
                let op = match op {
                    PrefixOp::Minus => Op::Minus,
                    PrefixOp::Bang => Op::Bang,
                };
                self.emit(op, *range);
            }
            Expression::Infix {
                op: InfixOp::Lt,
                left,
                right,
                range,
            } => {
                // a < b compiles as b > a
                self.compile_expression(right)?;
                self.compile_expression(left)?;
                self.emit(Op::GreaterThan, *range);
            }
            Expression::Infix {
                op,
                left,
                right,
                range,
            } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                let op = match op {
                    InfixOp::Add => Op::Add,
                    InfixOp::Sub => Op::Sub,
                    InfixOp::Mul => Op::Mul,
                    InfixOp::Div => Op::Div,
                    InfixOp::Gt => Op::GreaterThan,
                    InfixOp::Eq => Op::Equal,
                    InfixOp::NotEq => Op::NotEqual,
                    InfixOp::Lt => unreachable!("handled above"),
                };
                self.emit(op, *range);
            }
            Expression::Index { left, index, range } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Op::Index, *range);
            }
            Expression::If {
                condition,
                consequence,
                alternative,
                range,
            } => {
                self.compile_expression(condition)?;
                let jump_if_false = self.emit(Op::JumpIfFalse(0), condition.range());
                self.compile_block(consequence)?;
                self.drop_trailing_pop();
                let jump = self.emit(Op::Jump(0), *range);
                self.patch_jump(jump_if_false);
                match alternative {
                    Some(block) => {
                        self.compile_block(block)?;
                        self.drop_trailing_pop();
                    }
                    None => {
                        self.emit(Op::Null, *range);
                    }
                }
                self.patch_jump(jump);
            }
            Expression::Function { params, body, range } => {
                self.compile_function(params, body, *range, None)?;
            }
            Expression::Call { callee, args, range } => {
                self.compile_expression(callee)?;
                for arg in args {
                    self.compile_expression(arg)?;
                }
                if args.len() > u8::MAX as usize {
                    return Err(CompileError::at(*range, "too many call arguments".to_string()));
                }
                self.emit(Op::Call(args.len() as u8), *range);
            }
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        params: &[crate::lang::ast::Ident],
        body: &Block,
        range: SourceRange,
        name: Option<&str>,
    ) -> Result<(), CompileError> {
        if params.len() > u8::MAX as usize {
            return Err(CompileError::at(range, "too many parameters".to_string()));
        }
        self.enter_scope();
        if let Some(name) = name {
            self.symbols.define_function_name(name);
        }
        let scope = self.scope_id();
        for param in params {
            let symbol = self.symbols.define(&param.name);
            self.names.record_local(scope, &param.name, symbol.index, 0);
        }
        self.compile_block(body)?;

        // Implicit return of the last expression; bare `fn` bodies return null.
        match self.last_op() {
            Some(Op::Pop) => {
                let scope = self.scope();
                let last = scope.instructions.len() - 1;
                scope.instructions[last] = Op::ReturnValue;
            }
            Some(Op::ReturnValue) => {}
            _ => {
                self.emit(Op::Return, body.range);
            }
        }

        let (scope_id, instructions, free, num_locals) = self.leave_scope();
        for symbol in &free {
            self.load_symbol(symbol, range);
        }
        let function = CompiledFunction {
            instructions,
            num_locals,
            num_params: params.len(),
            scope: scope_id,
            name: name.map(String::from),
        };
        let constant = self.add_constant(Object::Function(Arc::new(function)), range)?;
        self.emit(
            Op::Closure {
                constant,
                free: free.len() as u8,
            },
            range,
        );
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol, range: SourceRange) {
        let op = match symbol.scope {
            SymbolScope::Global => Op::GetGlobal(symbol.index as u16),
            SymbolScope::Local => Op::GetLocal(symbol.index as u8),
            SymbolScope::Free => Op::GetFree(symbol.index as u8),
            SymbolScope::Builtin => Op::GetBuiltin(symbol.index as u8),
            SymbolScope::Function => Op::CurrentClosure,
        };
        self.emit(op, range);
    }

    /// Keep the value of a block's trailing expression statement on the
    /// stack, so an `if` block yields it.
    fn drop_trailing_pop(&mut self) {
        if self.last_op() == Some(Op::Pop) {
            self.scope().instructions.pop();
        }
    }

    fn patch_jump(&mut self, at: usize) {
        let target = self.scope().instructions.len();
        match &mut self.scope().instructions[at] {
            Op::Jump(t) | Op::JumpIfFalse(t) => *t = target,
            other => unreachable!("patching a non-jump instruction {other:?}"),
        }
    }
}
