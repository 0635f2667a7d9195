//! Program builders shared by the benchmarks and the metrics binary.
//!
//! Trees are built directly in the arena; every builder returns the engine
//! holding the trees and the root of a program ready to type-check.

use xl_ast::{Span, TreeId};
use xl_infer::TypeInference;

fn s() -> Span {
    Span::unknown()
}

fn call(e: &mut TypeInference, head: &str, argument: TreeId) -> TreeId {
    let trees = e.trees_mut();
    let head = trees.name(head, s());
    trees.prefix(head, argument, s())
}

fn rule(e: &mut TypeInference, pattern: TreeId, body: TreeId) -> TreeId {
    e.trees_mut().infix("->", pattern, body, s())
}

fn seq(e: &mut TypeInference, items: &[TreeId]) -> TreeId {
    let (&first, rest) = items.split_first().expect("programs are not empty");
    rest.iter().fold(first, |program, &item| {
        e.trees_mut().infix(";", program, item, s())
    })
}

/// `X:ty op Y:ty as ty -> opcode code`
fn primitive(e: &mut TypeInference, op: &str, ty: &str, code: &str) -> TreeId {
    let trees = e.trees_mut();
    let typed = |trees: &mut xl_ast::TreeArena, formal: &str| {
        let formal = trees.name(formal, s());
        let ty = trees.name(ty, s());
        trees.infix(":", formal, ty, s())
    };
    let x = typed(trees, "X");
    let y = typed(trees, "Y");
    let form = trees.infix(op, x, y, s());
    let result = trees.name(ty, s());
    let pattern = trees.infix("as", form, result, s());
    let code = trees.name(code, s());
    let body = call(e, "opcode", code);
    rule(e, pattern, body)
}

/// Integer and real arithmetic on `+`, `-` and `*`.
pub fn arithmetic(e: &mut TypeInference) -> Vec<TreeId> {
    vec![
        primitive(e, "+", "integer", "Add"),
        primitive(e, "+", "real", "FAdd"),
        primitive(e, "-", "integer", "Sub"),
        primitive(e, "-", "real", "FSub"),
        primitive(e, "*", "integer", "Mul"),
        primitive(e, "*", "real", "FMul"),
    ]
}

/// `fact 0 -> 1; fact N -> N * fact(N-1)` applied to `0..calls`.
pub fn factorial_program(calls: usize) -> (TypeInference, TreeId) {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);

    let zero = e.trees_mut().integer(0, s());
    let base_pattern = call(&mut e, "fact", zero);
    let one = e.trees_mut().integer(1, s());
    items.push(rule(&mut e, base_pattern, one));

    let trees = e.trees_mut();
    let n = trees.name("N", s());
    let n1 = trees.name("N", s());
    let one = trees.integer(1, s());
    let minus = trees.infix("-", n1, one, s());
    let argument = trees.paren(minus, s());
    let step_pattern = call(&mut e, "fact", n);
    let recurse = call(&mut e, "fact", argument);
    let n2 = e.trees_mut().name("N", s());
    let body = e.trees_mut().infix("*", n2, recurse, s());
    items.push(rule(&mut e, step_pattern, body));

    for value in 0..calls {
        let value = e.trees_mut().integer(value as i64, s());
        items.push(call(&mut e, "fact", value));
    }
    let program = seq(&mut e, &items);
    (e, program)
}

/// `pick 0 -> 0; ...; pick K -> K; pick N -> N` and a call per case: a
/// priority chain of `cases + 1` candidates at every call site.
pub fn constant_cases_program(cases: usize) -> (TypeInference, TreeId) {
    let mut e = TypeInference::new();
    let mut items = Vec::with_capacity(2 * cases + 1);
    for case in 0..cases {
        let pattern_value = e.trees_mut().integer(case as i64, s());
        let pattern = call(&mut e, "pick", pattern_value);
        let body = e.trees_mut().integer(case as i64, s());
        items.push(rule(&mut e, pattern, body));
    }
    let formal = e.trees_mut().name("N", s());
    let pattern = call(&mut e, "pick", formal);
    let body = e.trees_mut().name("N", s());
    items.push(rule(&mut e, pattern, body));

    for case in 0..cases {
        let value = e.trees_mut().integer(case as i64, s());
        items.push(call(&mut e, "pick", value));
    }
    let program = seq(&mut e, &items);
    (e, program)
}

/// `f X:integer -> X + 1; f X:real -> X + 1.0` called with alternating
/// integers and reals.
pub fn overload_program(calls: usize) -> (TypeInference, TreeId) {
    let mut e = TypeInference::new();
    let mut items = arithmetic(&mut e);
    for ty in ["integer", "real"] {
        let trees = e.trees_mut();
        let formal = trees.name("X", s());
        let declared = trees.name(ty, s());
        let typed = trees.infix(":", formal, declared, s());
        let x = trees.name("X", s());
        let one = if ty == "real" {
            trees.real(1.0, s())
        } else {
            trees.integer(1, s())
        };
        let body = trees.infix("+", x, one, s());
        let pattern = call(&mut e, "f", typed);
        items.push(rule(&mut e, pattern, body));
    }
    for index in 0..calls {
        let argument = if index % 2 == 0 {
            e.trees_mut().integer(index as i64, s())
        } else {
            e.trees_mut().real(index as f64 + 0.5, s())
        };
        items.push(call(&mut e, "f", argument));
    }
    let program = seq(&mut e, &items);
    (e, program)
}
