use indexmap::{IndexMap, IndexSet};

use crate::ast::{Term, Var};

/// Goals that compile inline and never clobber the argument registers.
pub(crate) fn is_inline_goal(goal: &Term) -> bool {
    matches!(goal, Term::Atom(name) if name == "!" || name == "true" || name == "fail")
}

/// Clause-wide variable classification. A chunk is the head plus the body
/// goals up to and including the first call-generating goal; every later
/// call-generating goal ends the next chunk. Variables occurring in more
/// than one chunk must survive calls and are made permanent, in first
/// occurrence order.
#[derive(Debug)]
pub(crate) struct ClauseFixtures {
    pub perm_names: Vec<Var>,
    pub has_cut: bool,
}

fn term_vars<'a>(term: &'a Term, vars: &mut IndexSet<&'a Var>) {
    match term {
        Term::Var(v) => {
            vars.insert(v);
        }
        Term::Clause(_, args) => {
            for arg in args {
                term_vars(arg, vars);
            }
        }
        Term::Atom(_) => {}
    }
}

fn record_chunk_vars<'a>(
    term: &'a Term,
    chunk_num: usize,
    occurrences: &mut IndexMap<&'a Var, IndexSet<usize>>,
) {
    let mut vars = IndexSet::new();
    term_vars(term, &mut vars);

    for v in vars {
        occurrences.entry(v).or_default().insert(chunk_num);
    }
}

pub(crate) fn analyze_clause<'a>(head: Option<&'a Term>, body: &'a [Term]) -> ClauseFixtures {
    let has_cut = body
        .iter()
        .any(|goal| matches!(goal, Term::Atom(name) if name == "!"));

    // the set of chunks each variable occurs in, in first occurrence order.
    let mut occurrences: IndexMap<&Var, IndexSet<usize>> = IndexMap::new();
    let mut chunk_num = 0;

    if let Some(head) = head {
        record_chunk_vars(head, 0, &mut occurrences);
    }

    for goal in body {
        record_chunk_vars(goal, chunk_num, &mut occurrences);

        if !is_inline_goal(goal) {
            chunk_num += 1;
        }
    }

    let perm_names = occurrences
        .iter()
        .filter(|(_, chunks)| chunks.len() > 1)
        .map(|(v, _)| (*v).clone())
        .collect();

    ClauseFixtures {
        perm_names,
        has_cut,
    }
}
