use std::collections::VecDeque;

use fxhash::FxBuildHasher;
use indexmap::{IndexMap, IndexSet};

use crate::allocator::{AllocatedTerm, RegValue, TargetReg};
use crate::ast::RegType;
use crate::atom_table::Functor;

/// The intermediate stream between register assignment and code emission.
#[derive(Clone, PartialEq, Debug)]
pub(crate) enum Token {
    /// `reg <- f(arg registers...)`.
    Structure(TargetReg, Functor, Vec<RegType>),
    /// `A_n <- register holding a variable`.
    Argument(usize, RegType),
    /// Appended at the end of every goal term.
    Call(Functor, usize),
}

type StructMap<'a> = IndexMap<RegType, (Functor, &'a [RegType]), FxBuildHasher>;

fn structure_map(term: &AllocatedTerm) -> StructMap {
    let mut map = StructMap::default();

    for (target, value) in &term.assignments {
        if let (TargetReg::Norm(reg), RegValue::Structure(f, args)) = (target, value) {
            map.insert(*reg, (*f, args.as_slice()));
        }
    }

    map
}

fn emit_subterms_post_order(
    reg: RegType,
    structs: &StructMap,
    emitted: &mut IndexSet<RegType, FxBuildHasher>,
    tokens: &mut Vec<Token>,
) {
    if emitted.contains(&reg) {
        return;
    }

    if let Some(&(f, args)) = structs.get(&reg) {
        emitted.insert(reg);

        for &arg in args {
            emit_subterms_post_order(arg, structs, emitted, tokens);
        }

        tokens.push(Token::Structure(TargetReg::Norm(reg), f, args.to_vec()));
    }
}

/// Goal-side order: for each argument register in index order, the
/// argument's subterm structures bottom-up, then the argument itself;
/// terminated by the goal's `Call` token. A register is always assigned
/// before any structure mentions it.
pub(crate) fn flatten_query(term: &AllocatedTerm) -> Vec<Token> {
    let structs = structure_map(term);
    let mut emitted = IndexSet::default();
    let mut tokens = Vec::new();

    for (target, value) in &term.assignments {
        let arg = match target {
            TargetReg::Arg(n) => *n,
            TargetReg::Norm(_) => continue,
        };

        match value {
            RegValue::Structure(f, args) => {
                for &sub in args {
                    emit_subterms_post_order(sub, &structs, &mut emitted, &mut tokens);
                }

                tokens.push(Token::Structure(TargetReg::Arg(arg), *f, args.clone()));
            }
            RegValue::RegPtr(reg) => tokens.push(Token::Argument(arg, *reg)),
            RegValue::Unused => {}
        }
    }

    tokens.push(Token::Call(term.functor, term.arity));
    tokens
}

/// Head-side order: argument tokens in index order, then deeper structures
/// in breadth-first discovery order, so every structure precedes its
/// subterm structures.
pub(crate) fn flatten_program(term: &AllocatedTerm) -> Vec<Token> {
    let structs = structure_map(term);
    let mut emitted: IndexSet<RegType, FxBuildHasher> = IndexSet::default();
    let mut queue: VecDeque<RegType> = VecDeque::new();
    let mut tokens = Vec::new();

    for (target, value) in &term.assignments {
        let arg = match target {
            TargetReg::Arg(n) => *n,
            TargetReg::Norm(_) => continue,
        };

        match value {
            RegValue::Structure(f, args) => {
                tokens.push(Token::Structure(TargetReg::Arg(arg), *f, args.clone()));
                queue.extend(args.iter().copied());
            }
            RegValue::RegPtr(reg) => tokens.push(Token::Argument(arg, *reg)),
            RegValue::Unused => {}
        }
    }

    while let Some(reg) = queue.pop_front() {
        if emitted.contains(&reg) {
            continue;
        }

        if let Some(&(f, args)) = structs.get(&reg) {
            emitted.insert(reg);
            tokens.push(Token::Structure(TargetReg::Norm(reg), f, args.to_vec()));
            queue.extend(args.iter().copied());
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::RegisterAllocator;
    use crate::ast::Term;
    use crate::atom_table::FunctorTable;

    fn allocated(src: &str, table: &mut FunctorTable) -> AllocatedTerm {
        let term: Term = src.parse().unwrap();
        let alloc = RegisterAllocator::new(&[], None, term.arity());

        alloc.parse(&term, table).map(|(t, _)| t).unwrap()
    }

    fn structure_regs(tokens: &[Token]) -> Vec<TargetReg> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Structure(reg, _, _) => Some(*reg),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn query_side_builds_subterms_first() {
        let mut table = FunctorTable::new();
        let term = allocated("(p (f (g a)))", &mut table);

        let tokens = flatten_query(&term);
        let regs = structure_regs(&tokens);

        // a, then (g a), then the shallow (f ...) argument.
        assert_eq!(regs.len(), 3);
        assert_eq!(regs[2], TargetReg::Arg(1));

        assert!(matches!(tokens.last(), Some(Token::Call(_, 1))));
    }

    #[test]
    fn program_side_puts_arguments_before_deep_structures() {
        let mut table = FunctorTable::new();
        let term = allocated("(p (f (g ?x)) ?y)", &mut table);

        let tokens = flatten_program(&term);
        let regs = structure_regs(&tokens);

        assert_eq!(regs[0], TargetReg::Arg(1));
        assert!(matches!(regs[1], TargetReg::Norm(_)));
        assert!(matches!(tokens[1], Token::Argument(2, _)));
        assert!(!tokens.iter().any(|t| matches!(t, Token::Call(..))));
    }

    #[test]
    fn shared_subterm_is_emitted_once() {
        let mut table = FunctorTable::new();
        let term = allocated("(p (f ?x) (g ?x))", &mut table);

        let tokens = flatten_query(&term);

        assert_eq!(structure_regs(&tokens).len(), 2);
    }
}
