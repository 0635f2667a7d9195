use xl_ast::{Span, TreeId};

use crate::test_logging::init_test_logging;
use crate::trace::UnifyAction;
use crate::{Category, GuardKind, InferenceOptions, TypeInference};

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn s() -> Span {
    Span::unknown()
}

fn int(e: &mut TypeInference, value: i64) -> TreeId {
    e.trees_mut().integer(value, s())
}

fn real(e: &mut TypeInference, value: f64) -> TreeId {
    e.trees_mut().real(value, s())
}

fn text(e: &mut TypeInference, value: &str) -> TreeId {
    e.trees_mut().text(value, s())
}

fn name(e: &mut TypeInference, value: &str) -> TreeId {
    e.trees_mut().name(value, s())
}

fn prefix(e: &mut TypeInference, left: TreeId, right: TreeId) -> TreeId {
    e.trees_mut().prefix(left, right, s())
}

fn infix(e: &mut TypeInference, op: &str, left: TreeId, right: TreeId) -> TreeId {
    e.trees_mut().infix(op, left, right, s())
}

fn paren(e: &mut TypeInference, child: TreeId) -> TreeId {
    e.trees_mut().paren(child, s())
}

/// `head argument` with a named head.
fn call(e: &mut TypeInference, head: &str, argument: TreeId) -> TreeId {
    let head = name(e, head);
    prefix(e, head, argument)
}

/// `X:T`
fn typed(e: &mut TypeInference, formal: &str, ty: &str) -> TreeId {
    let formal = name(e, formal);
    let ty = name(e, ty);
    infix(e, ":", formal, ty)
}

fn rule(e: &mut TypeInference, pattern: TreeId, body: TreeId) -> TreeId {
    infix(e, "->", pattern, body)
}

/// `X:ty op Y:ty as ty -> opcode Code`
fn primitive(e: &mut TypeInference, op: &str, ty: &str, code: &str) -> TreeId {
    let x = typed(e, "X", ty);
    let y = typed(e, "Y", ty);
    let form = infix(e, op, x, y);
    let result = name(e, ty);
    let pattern = infix(e, "as", form, result);
    let code = name(e, code);
    let body = call(e, "opcode", code);
    rule(e, pattern, body)
}

/// Statements joined by `;`.
fn seq(e: &mut TypeInference, items: &[TreeId]) -> TreeId {
    let (&first, rest) = items.split_first().expect("at least one statement");
    rest.iter()
        .fold(first, |program, &item| infix(e, ";", program, item))
}

fn arithmetic(e: &mut TypeInference) -> Vec<TreeId> {
    vec![
        primitive(e, "+", "integer", "Add"),
        primitive(e, "+", "real", "FAdd"),
        primitive(e, "*", "integer", "Mul"),
        primitive(e, "-", "integer", "Sub"),
    ]
}

/// `fact 0 -> 1` and `fact N -> N * fact(N-1)`
fn factorial(e: &mut TypeInference) -> Vec<TreeId> {
    let zero = int(e, 0);
    let base_pattern = call(e, "fact", zero);
    let one = int(e, 1);
    let base_case = rule(e, base_pattern, one);

    let n = name(e, "N");
    let step_pattern = call(e, "fact", n);
    let n1 = name(e, "N");
    let one = int(e, 1);
    let minus = infix(e, "-", n1, one);
    let arg = paren(e, minus);
    let recurse = call(e, "fact", arg);
    let n2 = name(e, "N");
    let body = infix(e, "*", n2, recurse);
    let step = rule(e, step_pattern, body);
    vec![base_case, step]
}

/// `f X:integer -> X+1` and `f X:real -> X+1.0`
fn overloaded_f(e: &mut TypeInference) -> Vec<TreeId> {
    let formal = typed(e, "X", "integer");
    let pattern = call(e, "f", formal);
    let x = name(e, "X");
    let one = int(e, 1);
    let body = infix(e, "+", x, one);
    let integer_rule = rule(e, pattern, body);

    let formal = typed(e, "X", "real");
    let pattern = call(e, "f", formal);
    let x = name(e, "X");
    let one = real(e, 1.0);
    let body = infix(e, "+", x, one);
    let real_rule = rule(e, pattern, body);
    vec![integer_rule, real_rule]
}

fn messages(e: &TypeInference) -> Vec<String> {
    e.errors().iter().map(|d| d.message.clone()).collect()
}

// ---------------------------------------------------------------------------
// Unification
// ---------------------------------------------------------------------------

#[test]
fn literal_promotes_to_its_builtin() {
    let mut e = TypeInference::new();
    let three = int(&mut e, 3);
    let integer = e.builtins().integer;
    assert!(e.unify_types(three, integer));
    assert_eq!(e.base(three), integer);
    assert!(!e.has_errors());

    let pi = real(&mut e, 3.14);
    let real_ty = e.builtins().real;
    assert!(e.unify_types(real_ty, pi));
    assert_eq!(e.base(pi), real_ty);
}

#[test]
fn character_literal_promotes_to_character() {
    let mut e = TypeInference::new();
    let ch = e.trees_mut().character("a", s());
    let character = e.builtins().character;
    assert!(e.unify_types(ch, character));
    let text_ty = e.builtins().text;
    assert!(!e.unify_types(ch, text_ty));
}

#[test]
fn generic_variables_join_either_way() {
    let mut e = TypeInference::new();
    let a = e.new_type_name(s());
    let b = e.new_type_name(s());
    let integer = e.builtins().integer;
    assert!(e.unify_types(a, b));
    assert_eq!(e.base(a), e.base(b));
    assert!(e.unify_types(integer, b));
    assert_eq!(e.base(a), integer);
    assert_eq!(e.base(b), integer);
}

#[test]
fn spelled_type_name_resolves_through_scope() {
    let mut e = TypeInference::new();
    let spelled = name(&mut e, "integer");
    let a = e.new_type_name(s());
    assert!(e.unify_types(a, spelled));
    assert_eq!(e.base(a), e.builtins().integer);
    assert_eq!(e.base(spelled), e.builtins().integer);
}

#[test]
fn distinct_named_types_fail_with_two_diagnostics() {
    let mut e = TypeInference::new();
    let (integer, real_ty) = (e.builtins().integer, e.builtins().real);
    assert!(!e.unify_types(integer, real_ty));
    assert_eq!(
        messages(&e),
        vec![
            "Cannot unify named type 'integer'".to_string(),
            "with named type 'real'".to_string(),
        ]
    );
    assert!(e.errors().iter().all(|d| d.category == Category::TypeMismatch));
    let labels: Vec<&str> = e
        .errors()
        .iter()
        .flat_map(|d| d.labels.iter().map(|label| label.message.as_str()))
        .collect();
    assert_eq!(labels, vec!["unified with 'real'", "unified with 'integer'"]);
}

#[test]
fn named_type_against_structure() {
    let mut e = TypeInference::new();
    let integer = e.builtins().integer;
    let x = name(&mut e, "X");
    let pattern = call(&mut e, "type", x);
    assert!(!e.unify_types(pattern, integer));
    insta::assert_snapshot!(messages(&e).join(" / "), @"Cannot unify named type 'integer' / with structured type 'type X'");
}

#[test]
fn function_types_unify_componentwise() {
    let mut e = TypeInference::new();
    let integer = e.builtins().integer;
    let a = e.new_type_name(s());
    let b = e.new_type_name(s());
    let f1 = infix(&mut e, "=>", integer, a);
    let f2 = infix(&mut e, "=>", b, integer);
    assert!(e.unify_types(f1, f2));
    assert_eq!(e.base(a), integer);
    assert_eq!(e.base(b), integer);
}

#[test]
fn function_type_against_non_function() {
    let mut e = TypeInference::new();
    let integer = e.builtins().integer;
    let f1 = infix(&mut e, "=>", integer, integer);
    let x = name(&mut e, "X");
    let pattern = call(&mut e, "type", x);
    assert!(!e.unify_types(pattern, f1));
    assert_eq!(
        messages(&e),
        vec![
            "Cannot unify function type 'integer => integer'".to_string(),
            "with non-function 'type X'".to_string(),
        ]
    );
}

#[test]
fn union_unifies_with_either_member() {
    let mut e = TypeInference::new();
    let (integer, real_ty, text_ty) = (
        e.builtins().integer,
        e.builtins().real,
        e.builtins().text,
    );
    let union = infix(&mut e, "|", integer, real_ty);
    assert!(e.unify_types(union, real_ty));
    assert!(!e.has_errors());

    let union = infix(&mut e, "|", integer, real_ty);
    assert!(!e.unify_types(text_ty, union));
    assert_eq!(
        messages(&e),
        vec![
            "Unable to unify 'integer | real'".to_string(),
            "with 'text'".to_string(),
        ]
    );
}

#[test]
fn union_match_keeps_classes_apart() {
    let mut e = TypeInference::new();
    let (integer, real_ty) = (e.builtins().integer, e.builtins().real);
    let union = infix(&mut e, "|", integer, real_ty);
    let a = e.new_type_name(s());
    assert!(e.unify_types(a, real_ty));
    assert!(e.unify_types(union, a));
    assert_eq!(e.base(a), real_ty);
    assert_eq!(e.base(union), union);
    assert_ne!(e.base(union), e.base(a));
}

#[test]
fn blocks_are_transparent() {
    let mut e = TypeInference::new();
    let integer = e.builtins().integer;
    let a = e.new_type_name(s());
    let grouped = paren(&mut e, a);
    assert!(e.unify_types(grouped, integer));
    assert_eq!(e.base(a), integer);
    assert_eq!(e.base(grouped), integer);
}

/// `type(head X, Y)`
fn pattern_type(e: &mut TypeInference, head: &str, x: &str, y: &str) -> TreeId {
    let x = name(e, x);
    let y = name(e, y);
    let comma = infix(e, ",", x, y);
    let form = call(e, head, comma);
    let group = paren(e, form);
    call(e, "type", group)
}

#[test]
fn pattern_types_compare_up_to_renaming() {
    let mut e = TypeInference::new();
    let p1 = pattern_type(&mut e, "f", "X", "Y");
    let p2 = pattern_type(&mut e, "f", "A", "B");
    assert!(e.unify_types(p1, p2));
    assert_eq!(e.base(p1), e.base(p2));
    assert!(!e.has_errors());

    let p3 = pattern_type(&mut e, "g", "X", "Y");
    assert!(!e.unify_types(p1, p3));
    assert_eq!(e.errors().len(), 2);
}

#[test]
fn pattern_renaming_is_one_to_one() {
    let mut e = TypeInference::new();
    let p1 = pattern_type(&mut e, "f", "X", "Y");
    let p2 = pattern_type(&mut e, "f", "A", "A");
    assert!(!e.unify_types(p1, p2));
}

#[test]
fn bound_names_in_patterns_compare_by_text() {
    let mut e = TypeInference::new();
    let p1 = pattern_type(&mut e, "f", "X", "true");
    let p2 = pattern_type(&mut e, "f", "A", "B");
    assert!(!e.unify_types(p1, p2));
}

#[test]
fn unification_trace_is_opt_in() {
    let mut e = TypeInference::new();
    let a = e.new_type_name(s());
    let integer = e.builtins().integer;
    assert!(e.unify_types(a, integer));
    assert!(e.unify_trace().is_empty());

    e.enable_tracing();
    let b = e.new_type_name(s());
    assert!(e.unify_types(b, integer));
    let actions: Vec<UnifyAction> = e.unify_trace().iter().map(|step| step.action).collect();
    assert_eq!(actions, vec![UnifyAction::Join]);
    let json = serde_json::to_string(&e.unify_trace()[0]).unwrap();
    assert!(json.contains(r#""action":"join""#), "{json}");
    assert!(json.contains(r#""right":"integer""#), "{json}");
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

#[test]
fn constants_type_as_themselves() {
    let mut e = TypeInference::new();
    let seven = int(&mut e, 7);
    assert!(e.type_check(seven));
    assert_eq!(e.tables().assigned(seven), Some(seven));
}

#[test]
fn annotation_types_the_value() {
    let mut e = TypeInference::new();
    let seven = int(&mut e, 7);
    let integer = name(&mut e, "integer");
    let annotated = infix(&mut e, ":", seven, integer);
    assert!(e.type_check(annotated), "{:?}", messages(&e));
    let ty = e.type_of(annotated);
    assert_eq!(ty, e.builtins().integer);
}

#[test]
fn conflicting_annotation_fails() {
    let mut e = TypeInference::new();
    let seven = int(&mut e, 7);
    let text_ty = name(&mut e, "text");
    let annotated = infix(&mut e, ":", seven, text_ty);
    assert!(!e.type_check(annotated));
    assert_eq!(e.errors().len(), 2);
}

#[test]
fn bound_name_takes_type_of_definition() {
    let mut e = TypeInference::new();
    let pi = name(&mut e, "pi");
    let value = real(&mut e, 3.14);
    let declaration = rule(&mut e, pi, value);
    let use_site = name(&mut e, "pi");
    let program = seq(&mut e, &[declaration, use_site]);
    assert!(e.type_check(program), "{:?}", messages(&e));
    let ty = e.type_of(use_site);
    assert_eq!(ty, e.builtins().real);
}

#[test]
fn self_bound_names_need_no_rule() {
    let mut e = TypeInference::new();
    let truth = name(&mut e, "true");
    assert!(e.type_check(truth));
    assert!(!e.has_errors());
}

#[test]
fn undeclared_name_has_no_form() {
    init_test_logging();
    let mut e = TypeInference::new();
    let foo = name(&mut e, "foo");
    assert!(!e.type_check(foo));
    insta::assert_snapshot!(messages(&e).join("\n"), @"No form matches 'foo'");
    assert_eq!(e.errors()[0].category, Category::NoFormMatches);
}

#[test]
fn sequence_analyses_every_statement() {
    let mut e = TypeInference::new();
    let foo = name(&mut e, "foo");
    let bar = name(&mut e, "bar");
    let program = seq(&mut e, &[foo, bar]);
    assert!(!e.type_check(program));
    assert_eq!(
        messages(&e),
        vec![
            "No form matches 'foo'".to_string(),
            "No form matches 'bar'".to_string(),
        ]
    );
}

#[test]
fn pattern_without_leading_symbol_is_malformed() {
    let mut e = TypeInference::new();
    let one = int(&mut e, 1);
    let head = paren(&mut e, one);
    let two = int(&mut e, 2);
    let pattern = prefix(&mut e, head, two);
    let three = int(&mut e, 3);
    let declaration = rule(&mut e, pattern, three);
    assert!(!e.type_check(declaration));
    assert_eq!(messages(&e), vec!["Malformed rewrite pattern '(1) 2'".to_string()]);
    assert_eq!(e.errors()[0].category, Category::MalformedPattern);
}

#[test]
fn declaration_has_function_type() {
    let mut e = TypeInference::new();
    let x = name(&mut e, "X");
    let pattern = call(&mut e, "double", x);
    let x = name(&mut e, "X");
    let body = infix(&mut e, "+", x, x);
    let declaration = rule(&mut e, pattern, body);
    assert!(e.type_check(declaration), "{:?}", messages(&e));
    let ty = e.type_of(declaration);
    let (domain, range) = xl_types::as_function(e.trees(), ty).expect("function type");
    assert_eq!(e.base(domain), e.base(range));
}

#[test]
fn infix_pattern_is_typed_by_its_shape() {
    let mut e = TypeInference::new();
    let x = name(&mut e, "X");
    let y = name(&mut e, "Y");
    let pattern = infix(&mut e, "&", x, y);
    let body = name(&mut e, "X");
    let declaration = rule(&mut e, pattern, body);
    assert!(e.type_check(declaration), "{:?}", messages(&e));
    let ty = e.type_of(pattern);
    assert_eq!(e.trees().render(ty), "type X & Y");
}

// ---------------------------------------------------------------------------
// Rule resolution
// ---------------------------------------------------------------------------

#[test]
fn factorial_has_guarded_base_case() {
    init_test_logging();
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    items.extend(factorial(&mut e));
    let three = int(&mut e, 3);
    let query = call(&mut e, "fact", three);
    items.push(query);
    let program = seq(&mut e, &items);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let calls = e.calls(query).expect("fact 3 was resolved").clone();
    assert_eq!(calls.candidates.len(), 2);

    let base_case = &calls.candidates[0];
    assert_eq!(base_case.conditions.len(), 1);
    let guard = base_case.conditions[0];
    assert_eq!(guard.kind, GuardKind::SameValue);
    assert_eq!(guard.value, three);
    assert_eq!(e.trees().as_integer(guard.test), Some(0));

    let step = &calls.candidates[1];
    assert!(step.is_unconditional());
    assert!(!step.recursive);
    assert_eq!(step.binding("N").map(|b| b.value), Some(three));

    let root = e.root_session();
    assert_eq!(e.result_type(root, query), Some(e.builtins().integer));
}

#[test]
fn recursive_call_reuses_the_instance_in_progress() {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    items.extend(factorial(&mut e));
    let three = int(&mut e, 3);
    let query = call(&mut e, "fact", three);
    items.push(query);
    let program = seq(&mut e, &items);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let step = e.calls(query).unwrap().candidates[1].clone();
    // N * fact(N-1)
    let (_, _, recurse) = e.trees().as_infix(step.body).unwrap();
    let inner = e.calls_in(step.session, recurse).expect("inner call resolved");
    let recursive = &inner.candidates[1];
    assert!(recursive.recursive);
    assert_eq!(recursive.body, step.body);
    assert_eq!(recursive.session, step.session);
}

#[test]
fn typed_formals_select_by_argument_type() {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    items.extend(overloaded_f(&mut e));
    let five = int(&mut e, 5);
    let query = call(&mut e, "f", five);
    items.push(query);
    let program = seq(&mut e, &items);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let root = e.root_session();
    let calls = e.calls(query).unwrap().clone();
    assert_eq!(calls.candidates.len(), 2);
    assert!(calls.candidates.iter().all(|c| c.is_unconditional()));

    let result = e.result_type(root, query).unwrap();
    assert_eq!(e.trees().render(result), "integer | real");
    assert_eq!(e.narrowed_type(root, query), Some(e.builtins().integer));

    // The real overload sees 5 widened to 5.0
    let widened = calls.candidates[1].binding("X").unwrap().value;
    assert_eq!(e.trees().as_real(widened), Some(5.0));
}

#[test]
fn undeclared_call_reports_whole_form_once() {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    items.extend(overloaded_f(&mut e));
    let three = int(&mut e, 3);
    let bar = call(&mut e, "bar", three);
    let five = int(&mut e, 5);
    let f5 = call(&mut e, "f", five);
    items.extend([bar, f5]);
    let program = seq(&mut e, &items);
    assert!(!e.type_check(program));
    assert_eq!(messages(&e), vec!["No form matches 'bar 3'".to_string()]);
    assert!(e.calls(f5).is_some());
}

#[test]
fn failing_operand_does_not_stop_its_sibling() {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    let three = int(&mut e, 3);
    let bar = call(&mut e, "bar", three);
    let four = int(&mut e, 4);
    let baz = call(&mut e, "baz", four);
    let sum = infix(&mut e, "+", bar, baz);
    items.push(sum);
    let program = seq(&mut e, &items);
    assert!(!e.type_check(program));
    assert_eq!(
        messages(&e),
        vec![
            "No form matches 'bar 3'".to_string(),
            "No form matches 'baz 4'".to_string(),
        ]
    );
    // The sum itself is still resolved, guarded on the unknown operand types
    let calls = e.calls(sum).expect("sum was evaluated");
    assert_eq!(calls.candidates.len(), 2);
    assert!(
        calls
            .candidates
            .iter()
            .all(|c| c.conditions.iter().all(|g| g.kind == GuardKind::HasType))
    );
}

#[test]
fn failing_argument_still_evaluates_the_call() {
    let mut e = TypeInference::new();
    // wrap X -> 0
    let x = name(&mut e, "X");
    let pattern = call(&mut e, "wrap", x);
    let zero = int(&mut e, 0);
    let wrap = rule(&mut e, pattern, zero);
    let three = int(&mut e, 3);
    let bar = call(&mut e, "bar", three);
    let argument = paren(&mut e, bar);
    let query = call(&mut e, "wrap", argument);
    let program = seq(&mut e, &[wrap, query]);
    assert!(!e.type_check(program));
    assert_eq!(messages(&e), vec!["No form matches 'bar 3'".to_string()]);
    let calls = e.calls(query).expect("wrap call was evaluated");
    assert!(calls.is_direct());
}

#[test]
fn disjoint_argument_type_rejects_rule() {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    items.extend(overloaded_f(&mut e));
    let hello = text(&mut e, "hello");
    let query = call(&mut e, "f", hello);
    items.push(query);
    let program = seq(&mut e, &items);
    assert!(!e.type_check(program));
    assert_eq!(messages(&e), vec!["No form matches 'f \"hello\"'".to_string()]);
}

#[test]
fn overlapping_argument_type_becomes_a_guard() {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    items.extend(overloaded_f(&mut e));
    // g X -> f X, called with a value that is an integer or a real
    let x = name(&mut e, "X");
    let pattern = call(&mut e, "g", x);
    let x = name(&mut e, "X");
    let body = call(&mut e, "f", x);
    let g_rule = rule(&mut e, pattern, body);
    items.push(g_rule);

    let integer = name(&mut e, "integer");
    let real_ty = name(&mut e, "real");
    let number = infix(&mut e, "|", integer, real_ty);
    let seven = int(&mut e, 7);
    let annotated = infix(&mut e, ":", seven, number);
    let argument = paren(&mut e, annotated);
    let query = call(&mut e, "g", argument);
    items.push(query);
    let program = seq(&mut e, &items);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let g = e.calls(query).unwrap().candidates[0].clone();
    let (_, inner_arg) = e.trees().as_prefix(g.body).unwrap();
    let inner = e.calls_in(g.session, g.body).unwrap();
    assert_eq!(inner.candidates.len(), 2);
    for candidate in &inner.candidates {
        assert_eq!(candidate.conditions.len(), 1);
        assert_eq!(candidate.conditions[0].kind, GuardKind::HasType);
        assert_eq!(candidate.conditions[0].value, inner_arg);
    }
}

#[test]
fn constant_rules_rewrite_literals() {
    let mut e = TypeInference::new();
    let zero = int(&mut e, 0);
    let word = text(&mut e, "zero");
    let declaration = rule(&mut e, zero, word);
    let query = int(&mut e, 0);
    let other = int(&mut e, 1);
    let program = seq(&mut e, &[declaration, query, other]);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let calls = e.calls(query).unwrap();
    assert_eq!(calls.candidates.len(), 1);
    assert_eq!(calls.candidates[0].conditions[0].kind, GuardKind::SameValue);
    let ty = e.type_of(query);
    assert_eq!(ty, e.builtins().text);
    // No rule for 1: it stands for itself
    assert!(e.calls(other).is_none());
    assert_eq!(e.tables().assigned(other), Some(other));
}

#[test]
fn repeated_formal_guards_equality() {
    let mut e = TypeInference::new();
    let x1 = name(&mut e, "X");
    let x2 = name(&mut e, "X");
    let pattern = infix(&mut e, "=", x1, x2);
    let body = name(&mut e, "true");
    let same = rule(&mut e, pattern, body);
    let one = int(&mut e, 1);
    let two = int(&mut e, 2);
    let query = infix(&mut e, "=", one, two);
    let program = seq(&mut e, &[same, query]);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let candidate = &e.calls(query).unwrap().candidates[0];
    assert_eq!(candidate.bindings.len(), 1);
    assert_eq!(candidate.conditions.len(), 1);
    assert_eq!(candidate.conditions[0].value, two);
    assert_eq!(candidate.conditions[0].test, one);
}

#[test]
fn self_bound_pattern_names_are_guards() {
    let mut e = TypeInference::new();
    let t = name(&mut e, "true");
    let pattern = call(&mut e, "not", t);
    let body = name(&mut e, "false");
    let not_true = rule(&mut e, pattern, body);
    let b = name(&mut e, "false");
    let query = call(&mut e, "not", b);
    let program = seq(&mut e, &[not_true, query]);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let candidate = &e.calls(query).unwrap().candidates[0];
    assert!(candidate.bindings.is_empty());
    assert_eq!(candidate.conditions.len(), 1);
    assert_eq!(candidate.conditions[0].value, b);
    let ty = e.type_of(query);
    assert_eq!(ty, e.builtins().boolean);
}

#[test]
fn inner_scope_rules_come_first() {
    let mut e = TypeInference::new();
    // h X -> (h X -> 2; h X)
    let outer_x = name(&mut e, "X");
    let outer_pattern = call(&mut e, "h", outer_x);
    let inner_x = name(&mut e, "X");
    let inner_pattern = call(&mut e, "h", inner_x);
    let two = int(&mut e, 2);
    let inner_rule = rule(&mut e, inner_pattern, two);
    let use_x = name(&mut e, "X");
    let inner_call = call(&mut e, "h", use_x);
    let body = seq(&mut e, &[inner_rule, inner_call]);
    let outer_rule = rule(&mut e, outer_pattern, body);
    let one = int(&mut e, 1);
    let query = call(&mut e, "h", one);
    let program = seq(&mut e, &[outer_rule, query]);
    assert!(e.type_check(program), "{:?}", messages(&e));

    let outer = e.calls(query).unwrap().candidates[0].clone();
    let (_, _, instance_call) = e.trees().as_infix(outer.body).unwrap();
    let inner = e.calls_in(outer.session, instance_call).unwrap();
    assert_eq!(inner.candidates.len(), 2);
    assert_ne!(inner.candidates[0].rule.scope, outer.rule.scope);
    assert!(!inner.candidates[0].recursive);
    assert!(inner.candidates[1].recursive);
}

#[test]
fn nesting_limit_stops_runaway_instantiation() {
    let options = InferenceOptions {
        max_nesting: 2,
        ..InferenceOptions::default()
    };
    let mut e = TypeInference::with_options(xl_ast::TreeArena::new(), options);
    // a X -> b X; b X -> c X; c X -> X
    let mut items = Vec::new();
    for (head, next) in [("a", Some("b")), ("b", Some("c")), ("c", None)] {
        let x = name(&mut e, "X");
        let pattern = call(&mut e, head, x);
        let x = name(&mut e, "X");
        let body = match next {
            Some(next) => call(&mut e, next, x),
            None => x,
        };
        items.push(rule(&mut e, pattern, body));
    }
    let one = int(&mut e, 1);
    let query = call(&mut e, "a", one);
    items.push(query);
    let program = seq(&mut e, &items);
    assert!(!e.type_check(program));
    let categories: Vec<Category> = e.errors().iter().map(|d| d.category).collect();
    assert!(categories.contains(&Category::RecursionLimit), "{categories:?}");
    let limit = e
        .errors()
        .iter()
        .find(|d| d.category == Category::RecursionLimit)
        .expect("nesting limit reported");
    assert_eq!(
        limit.help.as_deref(),
        Some("Raise the nesting limit above 2 or make the recursion explicit.")
    );
}

// ---------------------------------------------------------------------------
// Dumps
// ---------------------------------------------------------------------------

#[test]
fn dumps_show_types_and_links() {
    let mut e = TypeInference::new();
    let three = int(&mut e, 3);
    assert!(e.assign_type(three, Some(three)));
    let integer = e.builtins().integer;
    assert!(e.unify_types(three, integer));
    assert_eq!(
        e.dump_types(),
        "#1\ttrue\t: boolean\n#2\tfalse\t: boolean\n#3\t3\t: 3\t= integer\n"
    );
    assert_eq!(e.dump_unifications(), "#1\t3\t= integer\t= integer\n");
}

#[test]
fn dump_calls_lists_candidates_and_bindings() {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    items.extend(factorial(&mut e));
    let three = int(&mut e, 3);
    let query = call(&mut e, "fact", three);
    items.push(query);
    let program = seq(&mut e, &items);
    assert!(e.type_check(program));
    let dump = e.dump_calls();
    assert!(dump.starts_with("#1\tfact 3\n\t#1\tfact 0\t: "), "{dump}");
    assert!(dump.contains("\t#2\tfact N\t: integer\n\t\tN\t= 3\n"), "{dump}");
}

#[test]
fn inference_trace_records_calls() {
    let options = InferenceOptions {
        tracing: true,
        ..InferenceOptions::default()
    };
    let mut e = TypeInference::with_options(xl_ast::TreeArena::new(), options);
    let mut items = arithmetic(&mut e);
    let one = int(&mut e, 1);
    let two = int(&mut e, 2);
    let sum = infix(&mut e, "+", one, two);
    items.push(sum);
    let program = seq(&mut e, &items);
    assert!(e.type_check(program), "{:?}", messages(&e));
    let step = e
        .infer_trace()
        .iter()
        .find(|step| step.expr == "1 + 2")
        .expect("call step");
    // 1 + 2 also fits the real overload once widened
    assert_eq!(step.ty, "integer | real");
    let json = serde_json::to_value(step).unwrap();
    assert_eq!(json["type"], "integer | real");
    assert_eq!(json["rule"], "call");
    assert!(json.get("span").is_none());

    let root = e.root_session();
    assert_eq!(e.narrowed_type(root, sum), Some(e.builtins().integer));
}
