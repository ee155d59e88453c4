use augur_prolog::{
    CompileError, Error, FactInstruction, Line, Machine, QueryInstruction, Term,
};

fn t(src: &str) -> Term {
    src.parse().unwrap()
}

fn cons_list(items: &[&str]) -> Term {
    items.iter().rev().fold(Term::atom("nil"), |tail, item| {
        Term::clause("cons", vec![t(item), tail])
    })
}

fn install_member(machine: &mut Machine) {
    machine.invoke_fact(t("(member ?x (cons ?x ?t))")).unwrap();
    machine
        .invoke_rule(t("(member ?x (cons ?h ?t))"), vec![t("(member ?x ?t)")])
        .unwrap();
}

fn install_append(machine: &mut Machine) {
    machine.invoke_fact(t("(append nil ?l ?l)")).unwrap();
    machine
        .invoke_rule(
            t("(append (cons ?x ?l1) ?l2 (cons ?x ?l3))"),
            vec![t("(append ?l1 ?l2 ?l3)")],
        )
        .unwrap();
}

#[test]
fn append_enumerates_every_split_in_order() {
    let mut machine = Machine::new();
    install_append(&mut machine);

    let answers = machine
        .query_all(vec![Term::clause(
            "append",
            vec![t("?a"), t("?b"), cons_list(&["1", "2", "3"])],
        )])
        .unwrap();

    assert_eq!(answers.len(), 4);

    let expected = [
        (cons_list(&[]), cons_list(&["1", "2", "3"])),
        (cons_list(&["1"]), cons_list(&["2", "3"])),
        (cons_list(&["1", "2"]), cons_list(&["3"])),
        (cons_list(&["1", "2", "3"]), cons_list(&[])),
    ];

    for (answer, (a, b)) in answers.iter().zip(&expected) {
        assert_eq!(answer.get("?a"), Some(a));
        assert_eq!(answer.get("?b"), Some(b));
    }
}

#[test]
fn member_enumerates_in_clause_order() {
    let mut machine = Machine::new();
    install_member(&mut machine);

    let answers = machine
        .query_all(vec![Term::clause(
            "member",
            vec![t("?x"), cons_list(&["a", "b", "c"])],
        )])
        .unwrap();

    let bindings: Vec<&Term> = answers.iter().map(|a| a.get("?x").unwrap()).collect();

    assert_eq!(bindings, vec![&t("a"), &t("b"), &t("c")]);
}

#[test]
fn constant_facts_compile_to_constant_opcodes() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(color red)")).unwrap();
    machine.invoke_fact(t("(color blue)")).unwrap();

    assert!(machine
        .code()
        .iter()
        .any(|line| matches!(line, Line::Fact(FactInstruction::GetConstant(..)))));

    // a constant nested under a goal structure folds on the query side.
    machine
        .invoke_rule(t("(reddish ?x)"), vec![t("(member ?x (cons red nil))")])
        .unwrap();

    assert!(machine
        .code()
        .iter()
        .any(|line| matches!(line, Line::Query(QueryInstruction::SetConstant(_)))));

    let answers = machine.query_all(vec![t("(color ?x)")]).unwrap();
    let bindings: Vec<&Term> = answers.iter().map(|a| a.get("?x").unwrap()).collect();

    assert_eq!(bindings, vec![&t("red"), &t("blue")]);
}

#[test]
fn cut_commits_to_the_first_solution() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(p 1)")).unwrap();
    machine.invoke_fact(t("(p 2)")).unwrap();
    machine.invoke_fact(t("(p 3)")).unwrap();
    machine
        .invoke_rule(t("(q ?x)"), vec![t("(p ?x)"), t("!")])
        .unwrap();

    let answers = machine.query_all(vec![t("(q ?x)")]).unwrap();

    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].get("?x"), Some(&t("1")));
}

#[test]
fn nested_backtracking_enumerates_lexicographically() {
    let mut machine = Machine::new();
    install_member(&mut machine);

    machine
        .invoke_rule(
            t("(p ?x ?y)"),
            vec![
                Term::clause("member", vec![t("?x"), cons_list(&["1", "2"])]),
                Term::clause("member", vec![t("?y"), cons_list(&["a", "b"])]),
            ],
        )
        .unwrap();

    let answers = machine.query_all(vec![t("(p ?x ?y)")]).unwrap();
    let pairs: Vec<(String, String)> = answers
        .iter()
        .map(|a| {
            (
                a.get("?x").unwrap().to_string(),
                a.get("?y").unwrap().to_string(),
            )
        })
        .collect();

    let expected = ["1", "2"]
        .iter()
        .flat_map(|x| ["a", "b"].iter().map(move |y| (x.to_string(), y.to_string())))
        .collect::<Vec<_>>();

    assert_eq!(pairs, expected);
}

#[test]
fn popped_logic_frame_retracts_its_facts() {
    let mut machine = Machine::new();

    machine.push_logic_frame();
    machine.invoke_fact(t("(true at_home)")).unwrap();

    assert!(machine.prove(vec![t("(true at_home)")]).unwrap());

    machine.pop_logic_frame().unwrap();

    assert!(!machine.prove(vec![t("(true at_home)")]).unwrap());
}

#[test]
fn finalized_logic_frame_is_permanent() {
    let mut machine = Machine::new();

    machine.push_logic_frame();
    machine.invoke_fact(t("(does robot noop)")).unwrap();
    machine.finalize_logic_frame().unwrap();

    assert!(machine.prove(vec![t("(does robot noop)")]).unwrap());
    assert_eq!(
        machine.pop_logic_frame().unwrap_err(),
        CompileError::NoFrameToPop
    );
    assert!(machine.prove(vec![t("(does robot noop)")]).unwrap());
}

#[test]
fn nested_frames_roll_back_independently() {
    let mut machine = Machine::new();

    machine.push_logic_frame();
    machine.invoke_fact(t("(true outer)")).unwrap();

    machine.push_logic_frame();
    machine.invoke_fact(t("(true inner)")).unwrap();

    assert!(machine.prove(vec![t("(true outer)")]).unwrap());
    assert!(machine.prove(vec![t("(true inner)")]).unwrap());

    machine.pop_logic_frame().unwrap();

    assert!(machine.prove(vec![t("(true outer)")]).unwrap());
    assert!(!machine.prove(vec![t("(true inner)")]).unwrap());

    machine.pop_logic_frame().unwrap();

    assert!(!machine.prove(vec![t("(true outer)")]).unwrap());
}

#[test]
fn frame_assertions_extend_existing_predicates() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(legal noop)")).unwrap();

    machine.push_logic_frame();
    machine.invoke_fact(t("(legal jump)")).unwrap();

    assert_eq!(machine.query_all(vec![t("(legal ?m)")]).unwrap().len(), 2);

    machine.pop_logic_frame().unwrap();

    let answers = machine.query_all(vec![t("(legal ?m)")]).unwrap();

    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].get("?m"), Some(&t("noop")));
}

#[test]
fn negation_as_failure() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(color red)")).unwrap();

    assert!(machine.prove(vec![t("(not (color green))")]).unwrap());
    assert!(!machine.prove(vec![t("(not (color red))")]).unwrap());
}

#[test]
fn disjunction_enumerates_both_branches() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(p 1)")).unwrap();
    machine.invoke_fact(t("(q 2)")).unwrap();

    let answers = machine
        .query_all(vec![t("(or (p ?x) (q ?x))")])
        .unwrap();
    let bindings: Vec<&Term> = answers.iter().map(|a| a.get("?x").unwrap()).collect();

    assert_eq!(bindings, vec![&t("1"), &t("2")]);
}

#[test]
fn distinct_is_non_unifiability() {
    let mut machine = Machine::new();

    assert!(machine.prove(vec![t("(distinct a b)")]).unwrap());
    assert!(!machine.prove(vec![t("(distinct a a)")]).unwrap());
    assert!(!machine.prove(vec![t("(distinct ?x ?x)")]).unwrap());
    // an unbound pair unifies, so it is not distinct.
    assert!(!machine.prove(vec![t("(distinct ?x ?y)")]).unwrap());
}

#[test]
fn meta_call_dispatches_on_the_bound_goal() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(color red)")).unwrap();

    assert!(machine.prove(vec![t("(call (color red))")]).unwrap());
    assert!(!machine.prove(vec![t("(call (color green))")]).unwrap());
    assert!(machine.prove(vec![t("(call true)")]).unwrap());
}

#[test]
fn variable_body_goals_compile_as_meta_calls() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(color red)")).unwrap();
    machine.invoke_rule(t("(holds ?g)"), vec![t("?g")]).unwrap();

    assert!(machine.prove(vec![t("(holds (color red))")]).unwrap());
    assert!(!machine.prove(vec![t("(holds (color green))")]).unwrap());
}

#[test]
fn unknown_predicates_fail_quietly() {
    let mut machine = Machine::new();

    assert!(!machine.prove(vec![t("(zebra stripes)")]).unwrap());
}

#[test]
fn fail_and_true_compile_inline() {
    let mut machine = Machine::new();

    assert!(machine.prove(vec![t("true")]).unwrap());
    assert!(!machine.prove(vec![t("fail")]).unwrap());
    assert!(!machine.prove(vec![t("true"), t("fail")]).unwrap());
}

#[test]
fn asserting_a_variable_head_is_a_compile_error() {
    let mut machine = Machine::new();

    assert!(matches!(
        machine.invoke_fact(t("?x")),
        Err(CompileError::HeadIsVar(_))
    ));
    assert!(matches!(
        machine.invoke_rule(t("?x"), vec![t("(p a)")]),
        Err(CompileError::HeadIsVar(_))
    ));
}

#[test]
fn answers_are_enumerated_lazily() {
    let mut machine = Machine::new();
    install_member(&mut machine);

    let goal = Term::clause("member", vec![t("?x"), cons_list(&["a", "b", "c"])]);
    let mut answers = machine.run_query(vec![goal]).unwrap();

    let first = answers.next().unwrap().unwrap();
    assert_eq!(first.get("?x"), Some(&t("a")));

    let second = answers.next().unwrap().unwrap();
    assert_eq!(second.get("?x"), Some(&t("b")));

    // abandon the rest; the machine must come back clean.
    drop(answers);

    let rerun = machine
        .query_all(vec![Term::clause(
            "member",
            vec![t("?x"), cons_list(&["a", "b", "c"])],
        )])
        .unwrap();

    assert_eq!(rerun.len(), 3);
}

#[test]
fn query_one_and_query_map() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(p 1)")).unwrap();
    machine.invoke_fact(t("(p 2)")).unwrap();

    let first = machine.query_one(vec![t("(p ?x)")]).unwrap().unwrap();
    assert_eq!(first.get("?x"), Some(&t("1")));

    assert!(machine.query_one(vec![t("(p 9)")]).unwrap().is_none());

    let mapped: Vec<String> = machine
        .query_map(|b| b.get("?x").unwrap().to_string(), vec![t("(p ?x)")])
        .unwrap();

    assert_eq!(mapped, vec!["1".to_owned(), "2".to_owned()]);
}

#[test]
fn queries_without_variables_yield_one_empty_binding_map() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(p a)")).unwrap();

    let answers = machine.query_all(vec![t("(p a)")]).unwrap();

    assert_eq!(answers.len(), 1);
    assert!(answers[0].is_empty());
}

#[test]
fn cyclic_bindings_are_tolerated_by_the_decoder() {
    let mut machine = Machine::new();

    // no occurs check: ?x = f(?x) builds a cyclic structure.
    let answer = machine
        .query_one(vec![t("(= ?x (f ?x))")])
        .unwrap()
        .unwrap();

    let rendered = answer.get("?x").unwrap().to_string();

    assert!(rendered.starts_with("(f "));
    assert!(rendered.contains("..."));
}

#[test]
fn reset_database_clears_user_clauses_and_keeps_builtins() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(p a)")).unwrap();
    machine.reset_database();

    assert!(!machine.prove(vec![t("(p a)")]).unwrap());
    assert!(machine.prove(vec![t("(distinct a b)")]).unwrap());
}

#[test]
fn rules_spanning_multiple_goals_share_permanent_variables() {
    let mut machine = Machine::new();

    machine.invoke_fact(t("(edge a b)")).unwrap();
    machine.invoke_fact(t("(edge b c)")).unwrap();
    machine
        .invoke_rule(
            t("(path ?x ?z)"),
            vec![t("(edge ?x ?y)"), t("(edge ?y ?z)")],
        )
        .unwrap();

    let answers = machine.query_all(vec![t("(path ?from ?to)")]).unwrap();

    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].get("?from"), Some(&t("a")));
    assert_eq!(answers[0].get("?to"), Some(&t("c")));
}

#[test]
fn clause_order_changes_answer_order_but_not_the_set() {
    let mut forward = Machine::new();
    forward.invoke_fact(t("(p 1)")).unwrap();
    forward.invoke_fact(t("(p 2)")).unwrap();

    let mut backward = Machine::new();
    backward.invoke_fact(t("(p 2)")).unwrap();
    backward.invoke_fact(t("(p 1)")).unwrap();

    let collect = |machine: &mut Machine| -> Result<Vec<String>, Error> {
        machine.query_map(|b| b.get("?x").unwrap().to_string(), vec![t("(p ?x)")])
    };

    let mut fwd = collect(&mut forward).unwrap();
    let mut bwd = collect(&mut backward).unwrap();

    assert_ne!(fwd, bwd);

    fwd.sort();
    bwd.sort();

    assert_eq!(fwd, bwd);
}
