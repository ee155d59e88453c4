//! A Warren Abstract Machine core for Horn-clause logic programs written as
//! S-expression terms: a clause compiler (register assignment, flattening,
//! tokenization, code emission with constant folding) and a tagged-cell
//! abstract machine with unification, a trail, and choice-point
//! backtracking.
//!
//! The engine is self-contained: a [`Machine`] owns its heap, stacks,
//! functor table and code store, so multiple engines coexist freely. Facts
//! and rules are asserted through [`Machine::invoke_fact`] and
//! [`Machine::invoke_rule`] inside scoped logic frames, and queries
//! enumerate answers lazily through [`Machine::run_query`].

mod allocator;
mod and_stack;
mod ast;
mod atom_table;
mod builtins;
mod codegen;
mod dynamic_database;
mod fixtures;
mod flatten;
mod heap;
mod heap_print;
mod instructions;
mod machine;
mod machine_errors;
mod or_stack;
mod parser;
mod toplevel;

pub use ast::{Atom, Level, RegType, Term, Var};
pub use atom_table::{Functor, FunctorTable};
pub use codegen::SourceClause;
pub use instructions::{
    ChoiceInstruction, Code, CodePtr, ControlInstruction, CutInstruction, FactInstruction, Line,
    QueryInstruction,
};
pub use machine::Machine;
pub use machine_errors::{CompileError, Error, MachineError};
pub use parser::ParseError;
pub use toplevel::{Answers, Bindings};
