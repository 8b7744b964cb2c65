//! Interactive debugger for the tamarin scripting language.
//!
//! The crate bundles the language pipeline (lexer, parser, bytecode compiler)
//! with a stack VM that supports predicate-driven execution, a debug driver
//! that turns source-line commands into instruction-level stop conditions,
//! and a Debug Adapter Protocol front-end served over stdio by the
//! `tamarin-dap` binary.

pub mod compile;
pub mod debugger;
pub mod lang;
pub mod ui;
pub mod vm;
