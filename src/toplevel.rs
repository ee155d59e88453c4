use indexmap::IndexMap;

use crate::ast::{Term, Var};
use crate::codegen::CodeGenerator;
use crate::heap_print::decode_addr;
use crate::machine::Machine;
use crate::machine_errors::{CompileError, Error, MachineError};

/// One answer: each named query variable mapped to its (decoded) binding,
/// in first occurrence order.
pub type Bindings = IndexMap<Var, Term>;

/// Lazy answer enumeration. Each `next` drives the machine to its next
/// `done` suspension; answers arrive in the depth-first, left-to-right
/// order of the clause chains. Dropping the iterator (at exhaustion or
/// mid-enumeration) resets the machine's query-scratch state.
pub struct Answers<'a> {
    machine: &'a mut Machine,
    var_slots: Vec<(Var, usize)>,
    started: bool,
    finished: bool,
}

impl Answers<'_> {
    fn decode_bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();

        for (var, slot) in &self.var_slots {
            let addr = self.machine.ms.and_stack[0][*slot];
            let term = decode_addr(&self.machine.ms, &self.machine.functors, addr);

            bindings.insert(var.clone(), term);
        }

        bindings
    }
}

impl Iterator for Answers<'_> {
    type Item = Result<Bindings, MachineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let step = if self.started {
            self.machine.continue_query()
        } else {
            self.started = true;
            self.machine.query_stepper()
        };

        match step {
            Ok(true) => Some(Ok(self.decode_bindings())),
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

impl Drop for Answers<'_> {
    fn drop(&mut self) {
        self.machine.ms.reset();
        self.machine.cached_query.clear();
    }
}

impl Machine {
    /// Compile a conjunction of goals and return the lazy answer iterator.
    /// Compile errors surface here, synchronously.
    pub fn run_query(&mut self, goals: Vec<Term>) -> Result<Answers<'_>, CompileError> {
        let query = CodeGenerator::new().compile_query(&goals, &mut self.functors)?;

        self.ms.reset();
        self.cached_query = query.code;

        Ok(Answers {
            machine: self,
            var_slots: query.var_slots,
            started: false,
            finished: false,
        })
    }

    /// The first answer, if any.
    pub fn query_one(&mut self, goals: Vec<Term>) -> Result<Option<Bindings>, Error> {
        let mut answers = self.run_query(goals)?;

        match answers.next() {
            None => Ok(None),
            Some(Ok(bindings)) => Ok(Some(bindings)),
            Some(Err(err)) => Err(err.into()),
        }
    }

    /// Every answer, in enumeration order.
    pub fn query_all(&mut self, goals: Vec<Term>) -> Result<Vec<Bindings>, Error> {
        let answers = self.run_query(goals)?;
        let mut all = Vec::new();

        for answer in answers {
            all.push(answer?);
        }

        Ok(all)
    }

    /// Map `f` over every answer.
    pub fn query_map<T, F>(&mut self, mut f: F, goals: Vec<Term>) -> Result<Vec<T>, Error>
    where
        F: FnMut(Bindings) -> T,
    {
        let answers = self.run_query(goals)?;
        let mut all = Vec::new();

        for answer in answers {
            all.push(f(answer?));
        }

        Ok(all)
    }

    /// Success or failure without materializing bindings.
    pub fn prove(&mut self, goals: Vec<Term>) -> Result<bool, Error> {
        let mut answers = self.run_query(goals)?;

        match answers.next() {
            None => Ok(false),
            Some(Ok(_)) => Ok(true),
            Some(Err(err)) => Err(err.into()),
        }
    }
}
