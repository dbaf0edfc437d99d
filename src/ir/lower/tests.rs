use indoc::indoc;

use super::*;
use crate::{
    ast::{Builder, Program as Tree},
    index::Index,
    ir::verify::verify,
    semantic::analyze,
    source::Source,
};

fn builder() -> Builder {
    Builder::new(Source::unnamed("<test>"))
}

fn lower(declarations: Vec<Declaration>) -> Program {
    let tree = Tree { declarations };
    let analyzed = analyze(&tree).expect("program is well typed");

    let program = generate(&analyzed);
    verify(&program).expect("generated IR is valid");

    program
}

fn cfg<'p>(program: &'p Program, name: &str) -> &'p Cfg {
    program
        .function(name)
        .and_then(Function::cfg)
        .expect("function is defined")
}

fn count(cfg: &Cfg, predicate: impl Fn(&Instruction) -> bool) -> usize {
    cfg.blocks
        .iter()
        .flat_map(|block| &block.instructions)
        .filter(|instruction| predicate(instruction))
        .count()
}

#[test]
fn sum_of_parameters() {
    let b = builder();

    let f = b.function(
        "f",
        vec![b.param("a", Type::Int), b.param("b", Type::Int)],
        Type::Int,
        vec![b.ret(Some(b.binary(BinOp::Add, b.ident("a"), b.ident("b"))))],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let expected = indoc! {"
        fn f(%0: int, %1: int) -> int {
        bb0:
            %2: int* = alloca int
            %3: int* = alloca int
            store %2, %0
            store %3, %1
            %4: int = load %2
            %5: int = load %3
            %6: int = add %4, %5
            ret %6
        }
    "};

    assert_eq!(program.to_string(), expected);
}

#[test]
fn if_without_fallthrough_has_no_join() {
    let b = builder();

    // int f() { if (1) { return 1; } return 0; }
    let f = b.function(
        "f",
        vec![],
        Type::Int,
        vec![
            Statement::when(
                b.int(1),
                Statement::Block(b.block(vec![b.ret(Some(b.int(1)))])),
                None,
            ),
            b.ret(Some(b.int(0))),
        ],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let expected = indoc! {"
        fn f() -> int {
        bb0:
            %0: int = cmp ne 1, 0
            br %0, bb1, bb2
        bb1:
            ret 1
        bb2:
            ret 0
        }
    "};

    assert_eq!(program.to_string(), expected);
}

#[test]
fn if_else_where_both_arms_return() {
    let b = builder();

    let f = b.function(
        "f",
        vec![b.param("x", Type::Int)],
        Type::Int,
        vec![Statement::when(
            b.ident("x"),
            b.ret(Some(b.int(1))),
            Some(b.ret(Some(b.int(2)))),
        )],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let cfg = cfg(&program, "f");

    // Entrada, then y else; sin bloque de unión ni retorno implícito
    assert_eq!(cfg.blocks.len(), 3);
    assert_eq!(count(cfg, |i| matches!(i, Instruction::Return(_))), 2);
}

#[test]
fn statements_after_return_are_not_lowered() {
    let b = builder();

    let f = b.function(
        "f",
        vec![],
        Type::Int,
        vec![
            b.ret(Some(b.int(1))),
            b.local("dead", Type::Int, Some(b.int(2))),
            b.ret(Some(b.int(3))),
        ],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let cfg = cfg(&program, "f");

    assert_eq!(cfg.blocks.len(), 1);
    assert_eq!(count(cfg, |i| matches!(i, Instruction::Store { .. })), 0);
}

#[test]
fn while_loop_shape() {
    let b = builder();

    // int f(int n) { int s = 0; while (n > 0) { s = s + n; n = n - 1; } return s; }
    let f = b.function(
        "f",
        vec![b.param("n", Type::Int)],
        Type::Int,
        vec![
            b.local("s", Type::Int, Some(b.int(0))),
            Statement::while_loop(
                b.binary(BinOp::Greater, b.ident("n"), b.int(0)),
                Statement::Block(b.block(vec![
                    Statement::assign(b.ident("s"), b.binary(BinOp::Add, b.ident("s"), b.ident("n"))),
                    Statement::assign(b.ident("n"), b.binary(BinOp::Sub, b.ident("n"), b.int(1))),
                ])),
            ),
            b.ret(Some(b.ident("s"))),
        ],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let cfg = cfg(&program, "f");

    let header = BlockId::new(1);
    let body = BlockId::new(2);
    let exit = BlockId::new(3);

    assert_eq!(cfg.blocks.len(), 4);
    assert_eq!(
        cfg.blocks[header].terminator(),
        Some(&Instruction::Branch {
            condition: Value::Register(RegisterId::new(4)),
            positive: body,
            negative: exit,
        })
    );

    assert_eq!(cfg.blocks[body].terminator(), Some(&Instruction::Jump(header)));
    assert_eq!(cfg.predecessors(header), vec![BlockId::new(0), body]);
}

#[test]
fn infinite_for_has_no_exit() {
    let b = builder();

    let f = b.function(
        "spin",
        vec![],
        Type::Void,
        vec![
            Statement::for_loop(None, None, None, Statement::Block(b.block(vec![]))),
            b.ret(None),
        ],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let cfg = cfg(&program, "spin");

    assert_eq!(cfg.blocks.len(), 2);
    assert_eq!(cfg.blocks[BlockId::new(1)].terminator(), Some(&Instruction::Jump(BlockId::new(1))));
    assert_eq!(count(cfg, |i| matches!(i, Instruction::Return(_))), 0);
}

#[test]
fn implicit_returns() {
    let b = builder();

    let int = b.function("int_fn", vec![], Type::Int, vec![]);
    let float = b.function("float_fn", vec![], Type::Float, vec![]);
    let void = b.function("void_fn", vec![], Type::Void, vec![]);

    let program = lower(vec![
        Declaration::Function(int),
        Declaration::Function(float),
        Declaration::Function(void),
    ]);

    let returned = |name| cfg(&program, name).blocks[BlockId::new(0)].terminator().cloned();

    assert_eq!(
        returned("int_fn"),
        Some(Instruction::Return(Some(Value::Constant(Constant::int(0)))))
    );

    assert_eq!(
        returned("float_fn"),
        Some(Instruction::Return(Some(Value::Constant(Constant::float(0.0)))))
    );

    assert_eq!(returned("void_fn"), Some(Instruction::Return(None)));
}

#[test]
fn promotion_is_an_explicit_cast() {
    let b = builder();

    // float g(int x, char c) { return x + c; }
    let g = b.function(
        "g",
        vec![b.param("x", Type::Int), b.param("c", Type::Char)],
        Type::Float,
        vec![b.ret(Some(b.binary(BinOp::Add, b.ident("x"), b.ident("c"))))],
    );

    let program = lower(vec![Declaration::Function(g)]);
    let function = program.function("g").expect("function exists");
    let cfg = function.cfg().expect("function is defined");

    let casts: Vec<_> = cfg
        .blocks
        .iter()
        .flat_map(|block| &block.instructions)
        .filter_map(|instruction| match instruction {
            Instruction::Cast { dst, .. } => Some(function.registers[*dst].clone()),
            _ => None,
        })
        .collect();

    // `c` se promueve a int para la suma, y el resultado a float para el retorno
    assert_eq!(casts, vec![Type::Int, Type::Float]);
}

#[test]
fn short_circuit_goes_through_a_slot() {
    let b = builder();

    let f = b.function(
        "f",
        vec![b.param("a", Type::Int), b.param("p", Type::pointer_to(Type::Char))],
        Type::Int,
        vec![b.ret(Some(b.binary(BinOp::Or, b.ident("a"), b.ident("p"))))],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let cfg = cfg(&program, "f");

    let rhs = BlockId::new(1);
    let end = BlockId::new(2);

    assert_eq!(cfg.blocks.len(), 3);
    assert!(matches!(
        cfg.blocks[BlockId::new(0)].terminator(),
        Some(Instruction::Branch { positive, negative, .. }) if *positive == end && *negative == rhs
    ));

    assert_eq!(count(cfg, |i| matches!(i, Instruction::Alloca { .. })), 3);
}

#[test]
fn arrays_decay_and_index() {
    let b = builder();

    // int f() { int a[4]; a[2] = 7; int *p = a; return p[2]; }
    let f = b.function(
        "f",
        vec![],
        Type::Int,
        vec![
            b.local("a", Type::array_of(Type::Int, 4), None),
            Statement::assign(b.index(b.ident("a"), b.int(2)), b.int(7)),
            b.local("p", Type::pointer_to(Type::Int), Some(b.ident("a"))),
            b.ret(Some(b.index(b.ident("p"), b.int(2)))),
        ],
    );

    let program = lower(vec![Declaration::Function(f)]);
    let function = program.function("f").expect("function exists");
    let cfg = function.cfg().expect("function is defined");

    // a[2] como destino, decaimiento de `a`, y p[2]
    assert_eq!(count(cfg, |i| matches!(i, Instruction::ElementPtr { .. })), 3);

    let areas: Vec<_> = cfg.blocks[cfg.entry]
        .instructions
        .iter()
        .filter_map(|instruction| match instruction {
            Instruction::Alloca { ty, .. } => Some(ty.clone()),
            _ => None,
        })
        .collect();

    assert_eq!(
        areas,
        vec![Type::array_of(Type::Int, 4), Type::pointer_to(Type::Int)]
    );
}

#[test]
fn string_literals_are_deduplicated_constants() {
    let b = builder();

    let puts = b.external("puts", vec![b.param("s", Type::pointer_to(Type::Char))], Type::Int);
    let greeting = b.var("greeting", Type::pointer_to(Type::Char), Some(b.string("hi")));
    let main = b.function(
        "main",
        vec![],
        Type::Int,
        vec![
            Statement::Expr(b.call("puts", vec![b.string("hi")])),
            Statement::Expr(b.call("puts", vec![b.string("bye")])),
            b.ret(Some(b.int(0))),
        ],
    );

    let program = lower(vec![
        Declaration::Function(puts),
        Declaration::Variable(greeting),
        Declaration::Function(main),
    ]);

    let names: Vec<_> = program.globals.iter().map(|global| global.name.as_str()).collect();
    assert_eq!(names, [".LC0", "greeting", ".LC1"]);

    let hi = &program.globals[GlobalId::new(0)];
    assert!(hi.constant);
    assert_eq!(hi.ty, Type::array_of(Type::Char, 3));
    assert_eq!(hi.init, Initializer::String(b"hi".to_vec()));

    assert_eq!(
        program.globals[GlobalId::new(1)].init,
        Initializer::Address(GlobalId::new(0))
    );

    assert!(program.function("puts").map_or(false, Function::is_external));
}

#[test]
fn global_initializers_are_converted() {
    let b = builder();

    let ratio = b.var("ratio", Type::Float, Some(b.unary(UnOp::Negate, b.int(2))));
    let count = b.var("count", Type::Int, None);

    let program = lower(vec![Declaration::Variable(ratio), Declaration::Variable(count)]);

    assert_eq!(
        program.globals[GlobalId::new(0)].init,
        Initializer::Scalar(Constant::float(-2.0))
    );

    assert_eq!(program.globals[GlobalId::new(1)].init, Initializer::Zero);
}
