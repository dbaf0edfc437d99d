use std::collections::HashSet;

use proptest::prelude::*;

use minic::{
    ast::{BinOp, Builder, Declaration, Expr, Program, Statement, UnOp},
    pipeline::{self, Config},
    source::Source,
    target::Arch,
    ty::Type,
};

fn numeric() -> impl Strategy<Value = Type> {
    prop_oneof![Just(Type::Char), Just(Type::Int), Just(Type::Float)]
}

proptest! {
    #[test]
    fn common_type_is_reached_by_both_operands(a in numeric(), b in numeric()) {
        let common = Type::common(&a, &b).expect("numeric types have a common type");

        prop_assert!(a.promotes_to(&common));
        prop_assert!(b.promotes_to(&common));
        prop_assert_eq!(Type::common(&b, &a), Some(common));
    }

    #[test]
    fn promotion_never_goes_both_ways(a in numeric(), b in numeric()) {
        if a.promotes_to(&b) && b.promotes_to(&a) {
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn float_never_narrows(target in prop_oneof![Just(Type::Char), Just(Type::Int)]) {
        prop_assert!(!Type::Float.promotes_to(&target));
        prop_assert!(target.promotes_to(&Type::Float));
    }
}

/// Forma de una expresión, independiente de identificadores de nodo.
#[derive(Clone, Debug)]
enum Shape {
    Int(i32),
    Float(f32),
    Var(usize),
    Binary(BinOp, Box<Shape>, Box<Shape>),
    Negate(Box<Shape>),
    Not(Box<Shape>),
}

const VARIABLES: [&str; 3] = ["x", "y", "c"];

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        (-1000..1000).prop_map(Shape::Int),
        (-100.0f32..100.0).prop_map(Shape::Float),
        (0..VARIABLES.len()).prop_map(Shape::Var),
    ];

    let op = prop_oneof![
        Just(BinOp::Add),
        Just(BinOp::Sub),
        Just(BinOp::Mul),
        Just(BinOp::Div),
        Just(BinOp::Less),
        Just(BinOp::GreaterOrEqual),
        Just(BinOp::NotEqual),
        Just(BinOp::And),
        Just(BinOp::Or),
    ];

    leaf.prop_recursive(4, 24, 2, move |inner| {
        prop_oneof![
            (op.clone(), inner.clone(), inner.clone())
                .prop_map(|(op, lhs, rhs)| Shape::Binary(op, Box::new(lhs), Box::new(rhs))),
            inner.clone().prop_map(|operand| Shape::Negate(Box::new(operand))),
            inner.prop_map(|operand| Shape::Not(Box::new(operand))),
        ]
    })
}

fn build(b: &Builder, shape: &Shape) -> Expr {
    match shape {
        Shape::Int(value) => b.int(*value),
        Shape::Float(value) => b.float(*value),
        Shape::Var(index) => b.ident(VARIABLES[*index]),
        Shape::Binary(op, lhs, rhs) => b.binary(*op, build(b, lhs), build(b, rhs)),
        Shape::Negate(operand) => b.unary(UnOp::Negate, build(b, operand)),
        Shape::Not(operand) => b.unary(UnOp::Not, build(b, operand)),
    }
}

/// `int puts(char*); float <name>(int x, float y, char c) { puts("s"); return <shape>; }`
fn program(name: &str, shape: &Shape) -> Program {
    let b = Builder::new(Source::unnamed("<generated>"));

    let puts = b.external("puts", vec![b.param("s", Type::pointer_to(Type::Char))], Type::Int);
    let function = b.function(
        name,
        vec![
            b.param("x", Type::Int),
            b.param("y", Type::Float),
            b.param("c", Type::Char),
        ],
        Type::Float,
        vec![
            Statement::Expr(b.call("puts", vec![b.string("s")])),
            b.ret(Some(build(&b, shape))),
        ],
    );

    Program {
        declarations: vec![Declaration::Function(puts), Declaration::Function(function)],
    }
}

/// Nombres que se parecen a los símbolos internos del ensamblador.
fn name() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("f"), Just("str"), Just("C"), Just("LC0")]
}

fn label_definitions(asm: &str) -> Vec<&str> {
    asm.lines()
        .filter_map(|line| line.strip_suffix(':'))
        .filter(|label| !label.starts_with('\t'))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn generated_expressions_lower_to_valid_ir(shape in shape()) {
        // La IR se valida dentro de la compilación
        let ir = pipeline::lower(&program("f", &shape), &Config::default());
        prop_assert!(ir.is_ok());

        let dump = ir.map(|ir| ir.to_string()).unwrap_or_default();
        let again = pipeline::lower(&program("f", &shape), &Config::default())
            .map(|ir| ir.to_string())
            .unwrap_or_default();

        prop_assert_eq!(dump, again);
    }

    #[test]
    fn generated_expressions_emit_deterministically(shape in shape()) {
        for arch in [Arch::X86_64, Arch::Xtensa] {
            let config = Config { arch, ..Config::default() };

            let mut first = Vec::new();
            let mut second = Vec::new();

            prop_assert!(pipeline::compile(&program("f", &shape), &config, &mut first).is_ok());
            prop_assert!(pipeline::compile(&program("f", &shape), &config, &mut second).is_ok());
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn emitted_labels_are_defined_once(name in name(), shape in shape()) {
        for arch in [Arch::X86_64, Arch::Xtensa] {
            let config = Config { arch, ..Config::default() };

            let mut output = Vec::new();
            prop_assert!(pipeline::compile(&program(name, &shape), &config, &mut output).is_ok());

            let asm = String::from_utf8_lossy(&output);
            let labels = label_definitions(&asm);
            let unique: HashSet<_> = labels.iter().collect();

            prop_assert_eq!(unique.len(), labels.len(), "duplicate labels in:\n{}", asm);
        }
    }
}
