use crate::ast::Term;
use crate::atom_table::FunctorTable;
use crate::heap::{Addr, HeapCellValue};
use crate::machine::MachineState;

/// Unparsing stops at this depth. Cyclic terms are legal (there is no
/// occurs check), so the decoder must terminate on its own.
pub(crate) const MAX_DECODE_DEPTH: usize = 64;

const DEPTH_CUTOFF: &str = "...";

/// Read the term rooted at `addr` back out of the heap. Unbound cells
/// decode as fresh variables named after their address.
pub(crate) fn decode_addr(ms: &MachineState, functors: &FunctorTable, addr: Addr) -> Term {
    decode_at(ms, functors, addr, MAX_DECODE_DEPTH)
}

fn decode_at(ms: &MachineState, functors: &FunctorTable, addr: Addr, depth: usize) -> Term {
    let addr = ms.deref(addr);

    match ms.store(addr) {
        Addr::Con(c) => Term::Atom(functors.name(c).to_owned()),
        Addr::Str(a) => match ms.heap[a] {
            HeapCellValue::NamedStr(arity, f) => {
                if depth == 0 {
                    return Term::atom(DEPTH_CUTOFF);
                }

                let name = functors.name(f).to_owned();

                if arity == 0 {
                    Term::Atom(name)
                } else {
                    let args = (1..arity + 1)
                        .map(|i| decode_at(ms, functors, Addr::HeapCell(a + i), depth - 1))
                        .collect();

                    Term::Clause(name, args)
                }
            }
            // a Str cell always points at a functor cell; anything else is
            // garbage we surface rather than chase.
            _ => Term::atom(DEPTH_CUTOFF),
        },
        Addr::HeapCell(h) => Term::Var(format!("?_{}", h)),
        Addr::StackCell(fr, sc) => Term::Var(format!("?_s{}_{}", fr, sc)),
    }
}
