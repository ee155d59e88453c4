use fxhash::FxBuildHasher;
use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use crate::allocator::{AllocSeed, RegisterAllocator, TargetReg};
use crate::ast::{Level, RegType, Term, Var};
use crate::atom_table::FunctorTable;
use crate::fixtures::{analyze_clause, is_inline_goal};
use crate::flatten::{flatten_program, flatten_query, Token};
use crate::instructions::*;
use crate::machine_errors::CompileError;

/// One stored clause, retained in source form so predicate chains can be
/// recompiled when clauses are added or retracted.
#[derive(Clone, PartialEq, Debug)]
pub struct SourceClause {
    pub head: Term,
    pub body: Vec<Term>,
}

impl SourceClause {
    pub fn fact(head: Term) -> Self {
        SourceClause { head, body: vec![] }
    }

    pub fn rule(head: Term, body: Vec<Term>) -> Self {
        SourceClause { head, body }
    }
}

/// A compiled query: its code (terminated by `Done`) and the permanent
/// slots holding each named source variable.
#[derive(Debug)]
pub(crate) struct CompiledQuery {
    pub code: Code,
    pub var_slots: Vec<(Var, usize)>,
}

/// Emits instructions from token streams. The variable/value decision
/// tracks permanent registers for the whole clause and temporaries for the
/// current chunk only; temporaries are clobbered at every call.
pub(crate) struct CodeGenerator {
    seen_perms: IndexSet<usize, FxBuildHasher>,
    seen_temps: IndexSet<usize, FxBuildHasher>,
}

impl CodeGenerator {
    pub(crate) fn new() -> Self {
        CodeGenerator {
            seen_perms: IndexSet::default(),
            seen_temps: IndexSet::default(),
        }
    }

    fn reset(&mut self) {
        self.seen_perms.clear();
        self.seen_temps.clear();
    }

    fn advance_chunk(&mut self) {
        self.seen_temps.clear();
    }

    fn is_seen(&self, reg: RegType) -> bool {
        match reg {
            RegType::Perm(p) => self.seen_perms.contains(&p),
            RegType::Temp(t) => self.seen_temps.contains(&t),
        }
    }

    fn mark_seen(&mut self, reg: RegType) {
        match reg {
            RegType::Perm(p) => {
                self.seen_perms.insert(p);
            }
            RegType::Temp(t) => {
                self.seen_temps.insert(t);
            }
        }
    }

    fn structure_target(target: TargetReg) -> (Level, RegType) {
        match target {
            TargetReg::Arg(i) => (Level::Shallow, RegType::Temp(i)),
            TargetReg::Norm(reg) => (Level::Deep, reg),
        }
    }

    fn emit_program_term(&mut self, tokens: &[Token], code: &mut Code) {
        for token in tokens {
            match token {
                Token::Structure(target, f, args) => {
                    let (lvl, reg) = Self::structure_target(*target);

                    self.mark_seen(reg);
                    code.push(Line::Fact(FactInstruction::GetStructure(
                        lvl,
                        *f,
                        args.len(),
                        reg,
                    )));

                    for &arg in args {
                        if self.is_seen(arg) {
                            code.push(Line::Fact(FactInstruction::UnifyValue(arg)));
                        } else {
                            self.mark_seen(arg);
                            code.push(Line::Fact(FactInstruction::UnifyVariable(arg)));
                        }
                    }
                }
                Token::Argument(arg, src) => {
                    if self.is_seen(*src) {
                        code.push(Line::Fact(FactInstruction::GetValue(*src, *arg)));
                    } else {
                        self.mark_seen(*src);
                        code.push(Line::Fact(FactInstruction::GetVariable(*src, *arg)));
                    }
                }
                Token::Call(..) => {}
            }
        }
    }

    fn emit_query_term(&mut self, tokens: &[Token], table: &FunctorTable, code: &mut Code) {
        for token in tokens {
            match token {
                Token::Structure(target, f, args) => {
                    let (lvl, reg) = Self::structure_target(*target);

                    self.mark_seen(reg);
                    code.push(Line::Query(QueryInstruction::PutStructure(
                        lvl,
                        *f,
                        args.len(),
                        reg,
                    )));

                    for &arg in args {
                        if self.is_seen(arg) {
                            code.push(Line::Query(QueryInstruction::SetValue(arg)));
                        } else {
                            self.mark_seen(arg);
                            code.push(Line::Query(QueryInstruction::SetVariable(arg)));
                        }
                    }
                }
                Token::Argument(arg, src) => {
                    if self.is_seen(*src) {
                        code.push(Line::Query(QueryInstruction::PutValue(*src, *arg)));
                    } else {
                        self.mark_seen(*src);
                        code.push(Line::Query(QueryInstruction::PutVariable(*src, *arg)));
                    }
                }
                Token::Call(f, arity) => {
                    if table.name(*f) == "call" && *arity == 1 {
                        code.push(Line::Control(ControlInstruction::CallN(1)));
                    } else {
                        code.push(Line::Control(ControlInstruction::Call(*f, *arity)));
                    }

                    self.advance_chunk();
                }
            }
        }
    }

    fn compile_goal(
        &mut self,
        goal: &Term,
        perm_names: &[Var],
        seed: Option<AllocSeed>,
        reserved_arity: usize,
        table: &mut FunctorTable,
        code: &mut Code,
    ) -> Result<(), CompileError> {
        let alloc = RegisterAllocator::new(perm_names, seed, reserved_arity);
        let (allocated, _) = alloc.parse(goal, table)?;
        let tokens = flatten_query(&allocated);

        self.emit_query_term(&tokens, table, code);
        Ok(())
    }

    /// Compile one clause into straight-line code: facts as head code plus
    /// `Proceed`, rules as `Allocate`/head/body/`Deallocate`. Body goals
    /// `true`, `fail` and `!` compile inline; a variable goal `G` compiles
    /// as `call(G)`.
    pub(crate) fn compile_clause(
        &mut self,
        head: &Term,
        body: &[Term],
        table: &mut FunctorTable,
    ) -> Result<Code, CompileError> {
        self.reset();

        if head.is_var() {
            return Err(CompileError::HeadIsVar(head.clone()));
        }

        let body: Vec<Term> = body
            .iter()
            .map(|goal| match goal {
                Term::Var(_) => Term::clause("call", vec![goal.clone()]),
                _ => goal.clone(),
            })
            .collect();

        if body.is_empty() {
            let mut code = Code::new();
            let alloc = RegisterAllocator::new(&[], None, head.arity());
            let (allocated, _) = alloc.parse(head, table)?;

            self.emit_program_term(&flatten_program(&allocated), &mut code);
            code.push(Line::Control(ControlInstruction::Proceed));

            return Ok(constant_fold(code));
        }

        let fixtures = analyze_clause(Some(head), &body);
        let first_call = body.iter().position(|goal| !is_inline_goal(goal));

        let reserved_arity = match first_call {
            Some(idx) => head.arity().max(body[idx].arity()),
            None => head.arity(),
        };

        let mut code = Code::new();

        code.push(Line::Control(ControlInstruction::Allocate(
            fixtures.perm_names.len(),
        )));

        if fixtures.has_cut {
            code.push(Line::Cut(CutInstruction::GetLevel));
        }

        let alloc = RegisterAllocator::new(&fixtures.perm_names, None, reserved_arity);
        let (allocated, head_seed) = alloc.parse(head, table)?;

        self.emit_program_term(&flatten_program(&allocated), &mut code);

        let mut head_seed = Some(head_seed);

        for (idx, goal) in body.iter().enumerate() {
            match goal {
                Term::Atom(name) if name == "!" => {
                    code.push(Line::Cut(CutInstruction::Cut));
                }
                Term::Atom(name) if name == "true" => {}
                Term::Atom(name) if name == "fail" => {
                    code.push(Line::Control(ControlInstruction::Fail));
                }
                _ => {
                    let seed = if Some(idx) == first_call {
                        head_seed.take()
                    } else {
                        None
                    };

                    let arity = if Some(idx) == first_call {
                        reserved_arity
                    } else {
                        goal.arity()
                    };

                    self.compile_goal(goal, &fixtures.perm_names, seed, arity, table, &mut code)?;
                }
            }
        }

        code.push(Line::Control(ControlInstruction::Deallocate));

        Ok(constant_fold(code))
    }

    /// Compile a conjunction of goals as a toplevel query. Every variable
    /// is made permanent so bindings survive to the `Done` suspension;
    /// returns the environment slot of each named variable.
    pub(crate) fn compile_query(
        &mut self,
        goals: &[Term],
        table: &mut FunctorTable,
    ) -> Result<CompiledQuery, CompileError> {
        self.reset();

        let goals: Vec<Term> = goals
            .iter()
            .map(|goal| match goal {
                Term::Var(_) => Term::clause("call", vec![goal.clone()]),
                _ => goal.clone(),
            })
            .collect();

        let fixtures = analyze_clause(None, &goals);

        // every query variable is permanent, in first occurrence order.
        let mut perm_names: IndexSet<Var, FxBuildHasher> = IndexSet::default();

        for goal in &goals {
            collect_vars(goal, &mut perm_names);
        }

        let perm_names: Vec<Var> = perm_names.into_iter().collect();
        let mut code = Code::new();

        code.push(Line::Control(ControlInstruction::Allocate(perm_names.len())));

        if fixtures.has_cut {
            code.push(Line::Cut(CutInstruction::GetLevel));
        }

        for goal in &goals {
            match goal {
                Term::Atom(name) if name == "!" => {
                    code.push(Line::Cut(CutInstruction::Cut));
                }
                Term::Atom(name) if name == "true" => {}
                Term::Atom(name) if name == "fail" => {
                    code.push(Line::Control(ControlInstruction::Fail));
                }
                _ => {
                    self.compile_goal(goal, &perm_names, None, goal.arity(), table, &mut code)?;
                }
            }
        }

        code.push(Line::Control(ControlInstruction::Done));

        let code = constant_fold(code);
        let var_slots = perm_names
            .into_iter()
            .enumerate()
            .map(|(i, var)| (var, i + 1))
            .collect();

        Ok(CompiledQuery { code, var_slots })
    }

    /// Compile a whole predicate: a single clause compiles bare, multiple
    /// clauses get a `try_me_else`/`retry_me_else`/`trust_me` chain. Each
    /// choice instruction's jump offset is patched once the clause after it
    /// has been emitted.
    pub(crate) fn compile_predicate(
        &mut self,
        clauses: &[SourceClause],
        table: &mut FunctorTable,
    ) -> Result<Code, CompileError> {
        let first = clauses.first().ok_or(CompileError::EmptyPredicate)?;

        let expected = (
            first.head.name().cloned().unwrap_or_default(),
            first.head.arity(),
        );

        for clause in &clauses[1..] {
            let found = (
                clause.head.name().cloned().unwrap_or_default(),
                clause.head.arity(),
            );

            if found != expected {
                return Err(CompileError::ArityMismatch {
                    expected: format!("{}/{}", expected.0, expected.1),
                    found: format!("{}/{}", found.0, found.1),
                });
            }
        }

        if clauses.len() == 1 {
            return self.compile_clause(&first.head, &first.body, table);
        }

        let mut code = Code::new();
        let mut prev_choice = 0;

        for (i, clause) in clauses.iter().enumerate() {
            if i > 0 {
                let offset = code.len() - prev_choice;

                match &mut code[prev_choice] {
                    Line::Choice(ChoiceInstruction::TryMeElse(o))
                    | Line::Choice(ChoiceInstruction::RetryMeElse(o)) => *o = offset,
                    line => unreachable!("patched a non-choice line: {:?}", line),
                }
            }

            let choice = if i == 0 {
                ChoiceInstruction::TryMeElse(0)
            } else if i + 1 == clauses.len() {
                ChoiceInstruction::TrustMe
            } else {
                ChoiceInstruction::RetryMeElse(0)
            };

            prev_choice = code.len();
            code.push(Line::Choice(choice));
            code.extend(self.compile_clause(&clause.head, &clause.body, table)?);
        }

        trace!(
            clauses = clauses.len(),
            instructions = code.len(),
            "compiled predicate chain"
        );

        Ok(code)
    }
}

fn collect_vars(term: &Term, vars: &mut IndexSet<Var, FxBuildHasher>) {
    match term {
        Term::Var(v) => {
            vars.insert(v.clone());
        }
        Term::Clause(_, args) => {
            for arg in args {
                collect_vars(arg, vars);
            }
        }
        Term::Atom(_) => {}
    }
}

/// Peephole pass: rewrite 0-arity structures as constants, then fuse the
/// deep constant builds whose register is referenced exactly once.
fn constant_fold(code: Code) -> Code {
    let mut code: Vec<Line> = code
        .into_iter()
        .map(|line| match line {
            Line::Fact(FactInstruction::GetStructure(lvl, f, 0, reg)) => {
                Line::Fact(FactInstruction::GetConstant(lvl, f, reg))
            }
            Line::Query(QueryInstruction::PutStructure(lvl, f, 0, reg)) => {
                Line::Query(QueryInstruction::PutConstant(lvl, f, reg))
            }
            line => line,
        })
        .collect();

    let mut dead = vec![false; code.len()];

    // deep put_constant feeding a single set_value collapses to
    // set_constant; unify_variable feeding a deep get_constant collapses to
    // unify_constant. Temporaries die at calls, so pending entries do too.
    let mut pending_put: IndexMap<usize, (usize, crate::atom_table::Functor), FxBuildHasher> =
        IndexMap::default();
    let mut pending_unify: IndexMap<usize, usize, FxBuildHasher> = IndexMap::default();

    for idx in 0..code.len() {
        match code[idx] {
            Line::Query(QueryInstruction::PutConstant(Level::Deep, f, RegType::Temp(t))) => {
                pending_put.insert(t, (idx, f));
            }
            Line::Query(QueryInstruction::SetValue(RegType::Temp(t))) => {
                if let Some((put_idx, f)) = pending_put.swap_remove(&t) {
                    dead[put_idx] = true;
                    code[idx] = Line::Query(QueryInstruction::SetConstant(f));
                }
            }
            Line::Fact(FactInstruction::UnifyVariable(RegType::Temp(t))) => {
                pending_unify.insert(t, idx);
            }
            Line::Fact(FactInstruction::GetConstant(Level::Deep, f, RegType::Temp(t))) => {
                if let Some(unify_idx) = pending_unify.swap_remove(&t) {
                    code[unify_idx] = Line::Fact(FactInstruction::UnifyConstant(f));
                    dead[idx] = true;
                }
            }
            Line::Control(ControlInstruction::Call(..))
            | Line::Control(ControlInstruction::CallN(_)) => {
                pending_put.clear();
                pending_unify.clear();
            }
            _ => {}
        }
    }

    code.into_iter()
        .zip(dead)
        .filter(|(_, dead)| !dead)
        .map(|(line, _)| line)
        .collect()
}
