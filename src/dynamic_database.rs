use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::ast::Term;
use crate::atom_table::Functor;
use crate::codegen::{CodeGenerator, SourceClause};
use crate::machine::{CodeDir, Machine};
use crate::machine_errors::CompileError;

type ClauseDir = IndexMap<Functor, Vec<SourceClause>, FxBuildHasher>;

/// Snapshot taken by `push_logic_frame`: popping truncates the code store,
/// restores the label table and trims every predicate's clause list back to
/// this point.
struct FrameRecord {
    code_len: usize,
    code_dir: CodeDir,
    clause_counts: IndexMap<Functor, usize, FxBuildHasher>,
}

/// The clause database: predicates in source form (so chains can be
/// recompiled on assertion) and the stack of open logic frames.
pub(crate) struct Database {
    clauses: ClauseDir,
    frames: Vec<FrameRecord>,
}

impl Database {
    pub(crate) fn new() -> Self {
        Database {
            clauses: ClauseDir::default(),
            frames: Vec::new(),
        }
    }
}

impl Machine {
    /// Assert a fact into the current logic frame.
    pub fn invoke_fact(&mut self, head: Term) -> Result<(), CompileError> {
        self.assert_clause(SourceClause::fact(head))
    }

    /// Assert a rule into the current logic frame.
    pub fn invoke_rule(&mut self, head: Term, body: Vec<Term>) -> Result<(), CompileError> {
        self.assert_clause(SourceClause::rule(head, body))
    }

    /// Append the clause to its predicate and recompile the predicate's
    /// whole `try_me_else`/`retry_me_else`/`trust_me` chain at the end of
    /// the code store. On any compile error the database is untouched.
    fn assert_clause(&mut self, clause: SourceClause) -> Result<(), CompileError> {
        let name = match clause.head.name() {
            Some(name) => name.clone(),
            None => return Err(CompileError::HeadIsVar(clause.head.clone())),
        };

        let arity = clause.head.arity();
        let functor = self.functors.intern(&name, arity);

        let mut clauses = self
            .database
            .clauses
            .get(&functor)
            .cloned()
            .unwrap_or_default();

        clauses.push(clause);

        let chain = CodeGenerator::new().compile_predicate(&clauses, &mut self.functors)?;
        let entry = self.code.len();

        self.code.extend(chain);
        self.code_dir.insert(functor, entry);
        self.database.clauses.insert(functor, clauses);

        trace!(predicate = %format!("{}/{}", name, arity), entry, "asserted clause");

        Ok(())
    }

    /// Open a scoped assertion batch.
    pub fn push_logic_frame(&mut self) {
        let clause_counts = self
            .database
            .clauses
            .iter()
            .map(|(f, clauses)| (*f, clauses.len()))
            .collect();

        self.database.frames.push(FrameRecord {
            code_len: self.code.len(),
            code_dir: self.code_dir.clone(),
            clause_counts,
        });

        debug!(depth = self.database.frames.len(), "pushed logic frame");
    }

    /// Retract every clause asserted since the matching push.
    pub fn pop_logic_frame(&mut self) -> Result<(), CompileError> {
        let record = self
            .database
            .frames
            .pop()
            .ok_or(CompileError::NoFrameToPop)?;

        self.code.truncate(record.code_len);
        self.code_dir = record.code_dir;

        let mut clauses = ClauseDir::default();

        for (functor, count) in record.clause_counts {
            if let Some(mut list) = self.database.clauses.swap_remove(&functor) {
                list.truncate(count);
                clauses.insert(functor, list);
            }
        }

        self.database.clauses = clauses;

        debug!(depth = self.database.frames.len(), "popped logic frame");

        Ok(())
    }

    /// Make the current frame's assertions permanent: the frame boundary is
    /// removed, folding its contents into the enclosing scope.
    pub fn finalize_logic_frame(&mut self) -> Result<(), CompileError> {
        self.database
            .frames
            .pop()
            .map(|_| ())
            .ok_or(CompileError::NoFrameToFinalize)
    }

    /// Clear all clauses and all logic frames, then reinstall the builtin
    /// library. The functor table is process-wide and append-only, so
    /// interned indices stay valid.
    pub fn reset_database(&mut self) {
        self.code.clear();
        self.code_dir.clear();
        self.database = Database::new();

        crate::builtins::install(self);
    }
}
