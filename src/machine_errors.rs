use thiserror::Error;

use crate::ast::Term;
use crate::parser::ParseError;

/// Synchronous errors raised while turning terms into bytecode. The database
/// and the current logic frame are left untouched when one of these is
/// returned.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum CompileError {
    #[error("cannot use a variable as a predicate head: {0}")]
    HeadIsVar(Term),
    #[error("term is not callable: {0}")]
    NotCallable(Term),
    #[error("predicate has no clauses")]
    EmptyPredicate,
    #[error("clause head {found} does not match predicate {expected}")]
    ArityMismatch { expected: String, found: String },
    #[error("term requires more than {0} registers")]
    RegisterOverflow(usize),
    #[error("no logic frame to pop")]
    NoFrameToPop,
    #[error("no logic frame to finalize")]
    NoFrameToFinalize,
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Either error category, as surfaced by the query conveniences.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Machine(#[from] MachineError),
}

/// Violations of machine invariants. These indicate a compiler or machine
/// bug and are never reachable from well-formed assertions and queries; each
/// aborts the current query only.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum MachineError {
    #[error("jump target {0} is outside the code store")]
    BadJump(usize),
    #[error("attempted to bind an already bound cell at heap address {0}")]
    BindToBound(usize),
    #[error("instruction requires an environment but none is allocated")]
    MissingEnvironment,
    #[error("choice point stack underflow")]
    ChoiceStackUnderflow,
}
