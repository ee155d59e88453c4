use crate::ast::Term;
use crate::machine::Machine;

/// The builtin library, asserted as ordinary clauses in a finalized frame.
/// `!`, `fail` and `call/1` compile to dedicated instructions; everything
/// else is defined in terms of them.
const LIBRARY: &[(&str, &[&str])] = &[
    ("true", &[]),
    ("(= ?x ?x)", &[]),
    ("(not ?g)", &["(call ?g)", "!", "fail"]),
    ("(not ?g)", &[]),
    ("(or ?x ?y)", &["(call ?x)"]),
    ("(or ?x ?y)", &["(call ?y)"]),
    ("(distinct ?x ?y)", &["(not (= ?x ?y))"]),
];

pub(crate) fn install(machine: &mut Machine) {
    machine.push_logic_frame();

    for (head, body) in LIBRARY {
        let head: Term = head.parse().expect("builtin head parses");
        let body: Vec<Term> = body
            .iter()
            .map(|goal| goal.parse().expect("builtin goal parses"))
            .collect();

        if body.is_empty() {
            machine.invoke_fact(head).expect("builtin fact compiles");
        } else {
            machine
                .invoke_rule(head, body)
                .expect("builtin rule compiles");
        }
    }

    machine
        .finalize_logic_frame()
        .expect("builtin frame is open");
}
