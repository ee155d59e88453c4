use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use crate::ast::{Atom, RegType, Term, Var};
use crate::atom_table::{Functor, FunctorTable};
use crate::machine_errors::CompileError;

/// Upper bound on the shared argument/local register bank.
pub(crate) const MAX_REGS: usize = 256;

/// Where an assignment lands: an argument register of the term being
/// compiled, or a local/permanent register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum TargetReg {
    Arg(usize),
    Norm(RegType),
}

/// What a register is assigned.
#[derive(Clone, PartialEq, Debug)]
pub(crate) enum RegValue {
    /// An inline structure; the `Vec` holds the registers of its arguments.
    Structure(Functor, Vec<RegType>),
    /// An argument register aliasing the register that holds a variable.
    RegPtr(RegType),
    /// A permanent slot the term never mentions. Dropped by the flattener;
    /// present so every slot keeps its clause-global number.
    Unused,
}

/// One parsed term: its interned functor and the ordered register
/// assignments that reconstruct it.
#[derive(Debug)]
pub(crate) struct AllocatedTerm {
    pub name: Atom,
    pub functor: Functor,
    pub arity: usize,
    pub assignments: Vec<(TargetReg, RegValue)>,
}

/// Variable bindings carried from one parse to the next so that the head
/// and the first call goal of a clause agree on register numbers.
#[derive(Debug, Default)]
pub(crate) struct AllocSeed {
    pub bindings: IndexMap<Var, RegType, FxBuildHasher>,
    pub temp_c: usize,
}

pub(crate) struct RegisterAllocator<'a> {
    perm_slots: &'a [Var],
    bindings: IndexMap<Var, RegType, FxBuildHasher>,
    temp_c: usize,
    used_perms: Vec<bool>,
}

impl<'a> RegisterAllocator<'a> {
    /// `reserved_arity` is the number of argument registers to keep clear:
    /// the maximum of the head's and the first call goal's arities when the
    /// two share registers, the term's own arity otherwise.
    pub(crate) fn new(perm_slots: &'a [Var], seed: Option<AllocSeed>, reserved_arity: usize) -> Self {
        let seed = seed.unwrap_or_default();

        RegisterAllocator {
            perm_slots,
            temp_c: seed.temp_c.max(reserved_arity + 1),
            bindings: seed.bindings,
            used_perms: vec![false; perm_slots.len()],
        }
    }

    fn fresh_temp(&mut self) -> Result<RegType, CompileError> {
        if self.temp_c >= MAX_REGS {
            return Err(CompileError::RegisterOverflow(MAX_REGS));
        }

        let temp = RegType::Temp(self.temp_c);
        self.temp_c += 1;

        Ok(temp)
    }

    /// The permanent bank is consulted first, then registers seeded from an
    /// earlier parse or seen in this one; an unseen variable gets a fresh
    /// local.
    fn lookup_or_alloc(&mut self, var: &Var) -> Result<RegType, CompileError> {
        if let Some(slot) = self.perm_slots.iter().position(|name| name == var) {
            self.used_perms[slot] = true;
            return Ok(RegType::Perm(slot + 1));
        }

        if let Some(&reg) = self.bindings.get(var) {
            return Ok(reg);
        }

        let reg = self.fresh_temp()?;
        self.bindings.insert(var.clone(), reg);

        Ok(reg)
    }

    fn alloc_subterms(
        &mut self,
        args: &[Term],
        table: &mut FunctorTable,
        out: &mut Vec<(TargetReg, RegValue)>,
    ) -> Result<Vec<RegType>, CompileError> {
        let mut regs = Vec::with_capacity(args.len());

        for sub in args {
            match sub {
                Term::Var(v) => regs.push(self.lookup_or_alloc(v)?),
                Term::Atom(name) => {
                    let reg = self.fresh_temp()?;
                    let con = table.intern(name, 0);

                    out.push((TargetReg::Norm(reg), RegValue::Structure(con, vec![])));
                    regs.push(reg);
                }
                Term::Clause(name, sub_args) => {
                    let reg = self.fresh_temp()?;
                    let f = table.intern(name, sub_args.len());
                    let sub_regs = self.alloc_subterms(sub_args, table, out)?;

                    out.push((TargetReg::Norm(reg), RegValue::Structure(f, sub_regs)));
                    regs.push(reg);
                }
            }
        }

        Ok(regs)
    }

    /// Turn one head or goal term into register assignments. Argument
    /// registers `A1..An` are filled in order; constants become 0-arity
    /// structures.
    pub(crate) fn parse(
        mut self,
        term: &Term,
        table: &mut FunctorTable,
    ) -> Result<(AllocatedTerm, AllocSeed), CompileError> {
        let (name, args): (&Atom, &[Term]) = match term {
            Term::Atom(name) => (name, &[]),
            Term::Clause(name, args) => (name, args),
            Term::Var(_) => return Err(CompileError::NotCallable(term.clone())),
        };

        let arity = args.len();

        if arity >= MAX_REGS {
            return Err(CompileError::RegisterOverflow(MAX_REGS));
        }

        let functor = table.intern(name, arity);
        let mut assignments = Vec::new();

        for (i, arg) in args.iter().enumerate() {
            let target = TargetReg::Arg(i + 1);

            match arg {
                Term::Var(v) => {
                    let reg = self.lookup_or_alloc(v)?;
                    assignments.push((target, RegValue::RegPtr(reg)));
                }
                Term::Atom(name) => {
                    let con = table.intern(name, 0);
                    assignments.push((target, RegValue::Structure(con, vec![])));
                }
                Term::Clause(name, sub_args) => {
                    let f = table.intern(name, sub_args.len());
                    let sub_regs = self.alloc_subterms(sub_args, table, &mut assignments)?;

                    assignments.push((target, RegValue::Structure(f, sub_regs)));
                }
            }
        }

        for (slot, used) in self.used_perms.iter().enumerate() {
            if !used {
                assignments.push((
                    TargetReg::Norm(RegType::Perm(slot + 1)),
                    RegValue::Unused,
                ));
            }
        }

        let allocated = AllocatedTerm {
            name: name.clone(),
            functor,
            arity,
            assignments,
        };

        let seed = AllocSeed {
            bindings: self.bindings,
            temp_c: self.temp_c,
        };

        Ok((allocated, seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Term {
        src.parse().unwrap()
    }

    #[test]
    fn argument_variables_share_registers_across_seeded_parses() {
        let mut table = FunctorTable::new();
        let head = parse("(p ?x ?y)");
        let goal = parse("(q ?y ?x)");

        let alloc = RegisterAllocator::new(&[], None, 2);
        let (head_alloc, seed) = alloc.parse(&head, &mut table).unwrap();

        let x_reg = match head_alloc.assignments[0].1 {
            RegValue::RegPtr(r) => r,
            ref other => panic!("expected RegPtr, found {:?}", other),
        };

        let alloc = RegisterAllocator::new(&[], Some(seed), 2);
        let (goal_alloc, _) = alloc.parse(&goal, &mut table).unwrap();

        match goal_alloc.assignments[1].1 {
            RegValue::RegPtr(r) => assert_eq!(r, x_reg),
            ref other => panic!("expected RegPtr, found {:?}", other),
        }
    }

    #[test]
    fn locals_start_above_the_reserved_arity() {
        let mut table = FunctorTable::new();
        let head = parse("(p ?x)");

        let alloc = RegisterAllocator::new(&[], None, 3);
        let (head_alloc, _) = alloc.parse(&head, &mut table).unwrap();

        match head_alloc.assignments[0].1 {
            RegValue::RegPtr(RegType::Temp(n)) => assert_eq!(n, 4),
            ref other => panic!("expected temp RegPtr, found {:?}", other),
        }
    }

    #[test]
    fn permanent_bank_wins_over_locals() {
        let mut table = FunctorTable::new();
        let perms = vec!["?y".to_owned()];
        let head = parse("(p ?x ?y)");

        let alloc = RegisterAllocator::new(&perms, None, 2);
        let (head_alloc, _) = alloc.parse(&head, &mut table).unwrap();

        match head_alloc.assignments[1].1 {
            RegValue::RegPtr(r) => assert_eq!(r, RegType::Perm(1)),
            ref other => panic!("expected perm RegPtr, found {:?}", other),
        }
    }

    #[test]
    fn unreferenced_permanent_slots_keep_their_numbers() {
        let mut table = FunctorTable::new();
        let perms = vec!["?a".to_owned(), "?b".to_owned()];
        let goal = parse("(q ?b)");

        let alloc = RegisterAllocator::new(&perms, None, 1);
        let (goal_alloc, _) = alloc.parse(&goal, &mut table).unwrap();

        assert!(goal_alloc.assignments.contains(&(
            TargetReg::Norm(RegType::Perm(1)),
            RegValue::Unused
        )));

        match goal_alloc.assignments[0].1 {
            RegValue::RegPtr(r) => assert_eq!(r, RegType::Perm(2)),
            ref other => panic!("expected perm RegPtr, found {:?}", other),
        }
    }

    #[test]
    fn constants_become_zero_arity_structures() {
        let mut table = FunctorTable::new();
        let head = parse("(p red)");

        let alloc = RegisterAllocator::new(&[], None, 1);
        let (head_alloc, _) = alloc.parse(&head, &mut table).unwrap();

        let red = table.get("red", 0).unwrap();

        assert_eq!(
            head_alloc.assignments[0],
            (TargetReg::Arg(1), RegValue::Structure(red, vec![]))
        );
    }
}
