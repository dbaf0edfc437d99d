use std::collections::HashSet;

use indoc::indoc;

use minic::{
    ast::{BinOp, Builder, Declaration, Program, Statement, UnOp},
    index::Index,
    ir::{BinaryOp, BlockId, Instruction},
    pipeline::{self, CompileError, Config, Options},
    source::Source,
    target::Arch,
    ty::Type,
};

fn builder() -> Builder {
    Builder::new(Source::unnamed("<test>"))
}

fn functions(declarations: Vec<minic::ast::FunctionDecl>) -> Program {
    Program {
        declarations: declarations.into_iter().map(Declaration::Function).collect(),
    }
}

fn config(arch: Arch) -> Config {
    Config {
        arch,
        ..Config::default()
    }
}

fn assembly(program: &Program, arch: Arch) -> String {
    let mut output = Vec::new();
    pipeline::compile(program, &config(arch), &mut output).expect("program compiles");

    String::from_utf8(output).expect("assembly is UTF-8")
}

fn rejected(program: &Program) -> Vec<String> {
    match pipeline::lower(program, &Config::default()) {
        Err(CompileError::Rejected(diagnostics)) => {
            diagnostics.records().map(|(message, _)| message).collect()
        }

        Err(error) => panic!("unexpected error: {}", error),
        Ok(_) => panic!("program was accepted"),
    }
}

/// `int f(int a, int b) { return a + b; }`
fn sum() -> Program {
    let b = builder();

    functions(vec![b.function(
        "f",
        vec![b.param("a", Type::Int), b.param("b", Type::Int)],
        Type::Int,
        vec![b.ret(Some(b.binary(BinOp::Add, b.ident("a"), b.ident("b"))))],
    )])
}

#[test]
fn sum_of_parameters_is_a_single_block() {
    let ir = pipeline::lower(&sum(), &Config::default()).expect("program is valid");

    let function = ir.function("f").expect("function exists");
    let cfg = function.cfg().expect("function is defined");

    assert_eq!(ir.functions.len(), 1);
    assert_eq!(cfg.blocks.len(), 1);

    let block = &cfg.blocks[BlockId::new(0)];
    assert!(block
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::Binary { op: BinaryOp::Add, .. })));

    assert!(matches!(block.terminator(), Some(Instruction::Return(Some(_)))));
}

#[test]
fn float_result_returned_from_int_function_is_rejected() {
    let b = builder();

    // int f() { int x; return x + 1.0; }
    let program = functions(vec![b.function(
        "f",
        vec![],
        Type::Int,
        vec![
            b.local("x", Type::Int, None),
            b.ret(Some(b.binary(BinOp::Add, b.ident("x"), b.float(1.0)))),
        ],
    )]);

    let messages = rejected(&program);
    assert_eq!(messages, ["Type mismatch: expected `int`, found `float`"]);
}

#[test]
fn if_produces_three_reachable_blocks() {
    let b = builder();

    // int f() { if (1) { return 1; } return 0; }
    let program = functions(vec![b.function(
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
    )]);

    let ir = pipeline::lower(&program, &Config::default()).expect("program is valid");
    let cfg = ir.function("f").and_then(|f| f.cfg()).expect("function is defined");

    assert_eq!(cfg.blocks.len(), 3);
    for block in cfg.blocks.iter().filter(|block| block.id != cfg.entry) {
        assert_eq!(cfg.predecessors(block.id), vec![cfg.entry]);
    }
}

#[test]
fn call_to_undeclared_function_is_reported_once() {
    let b = builder();

    let program = functions(vec![b.function(
        "f",
        vec![],
        Type::Void,
        vec![Statement::Expr(b.at(3, 5).call("g", vec![]))],
    )]);

    match pipeline::lower(&program, &Config::default()) {
        Err(CompileError::Rejected(diagnostics)) => {
            let records: Vec<_> = diagnostics
                .records()
                .map(|(message, location)| (message, location.start().line()))
                .collect();

            assert_eq!(records, [(String::from("Symbol `g` is undefined"), 3)]);
        }

        _ => panic!("expected diagnostics"),
    }
}

#[test]
fn void_parameter_in_a_prototype_is_rejected() {
    let b = builder();

    // void v(); int g(void x); int f() { return g(v()); }
    let program = functions(vec![
        b.external("v", vec![], Type::Void),
        b.external("g", vec![b.param("x", Type::Void)], Type::Int),
        b.function(
            "f",
            vec![],
            Type::Int,
            vec![b.ret(Some(b.call("g", vec![b.call("v", vec![])])))],
        ),
    ]);

    assert_eq!(rejected(&program), ["Variable `x` is declared `void`"]);
}

#[test]
fn shadowing_is_accepted() {
    let b = builder();

    let program = functions(vec![b.function(
        "f",
        vec![b.param("x", Type::Int)],
        Type::Float,
        vec![
            Statement::Block(b.block(vec![
                b.local("x", Type::Float, Some(b.float(0.5))),
                b.ret(Some(b.ident("x"))),
            ])),
            b.ret(Some(b.ident("x"))),
        ],
    )]);

    assert!(pipeline::lower(&program, &Config::default()).is_ok());
}

#[test]
fn ir_dump_of_widening() {
    let b = builder();

    // float f(int x) { return x; }
    let program = functions(vec![b.function(
        "f",
        vec![b.param("x", Type::Int)],
        Type::Float,
        vec![b.ret(Some(b.ident("x")))],
    )]);

    let ir = pipeline::lower(&program, &Config::default()).expect("program is valid");
    let expected = indoc! {"
        fn f(%0: int) -> float {
        bb0:
            %1: int* = alloca int
            store %1, %0
            %2: int = load %1
            %3: float = cast %2
            ret %3
        }
    "};

    assert_eq!(ir.to_string(), expected);
}

#[test]
fn x86_64_assembly_of_a_sum() {
    let asm = assembly(&sum(), Arch::X86_64);

    assert!(asm.starts_with(".text\n"));
    assert!(asm.contains(".global f\nf:\n"));
    assert!(asm.contains("\tpushq   %rbp\n"));
    assert!(asm.contains("\taddl    %ecx, %eax\n"));
    assert!(asm.ends_with("\tpopq    %rbp\n\tret\n"));
}

#[test]
fn xtensa_assembly_of_a_sum() {
    let asm = assembly(&sum(), Arch::Xtensa);

    assert!(asm.starts_with(".text\n.literal_position\n"));
    assert!(asm.contains(".balign 4\n.global f\nf:\n"));
    assert!(asm.contains("\tadd     a8, a8, a9\n"));
    assert!(asm.ends_with("\tret.n\n"));
}

#[test]
fn globals_and_strings_are_emitted_as_data() {
    let b = builder();

    let puts = b.external("puts", vec![b.param("s", Type::pointer_to(Type::Char))], Type::Int);
    let counter = b.var("counter", Type::Int, Some(b.int(3)));
    let ratio = b.var("ratio", Type::Float, None);
    let main = b.function(
        "main",
        vec![],
        Type::Int,
        vec![
            Statement::Expr(b.call("puts", vec![b.string("hi \"there\"")])),
            b.ret(Some(b.ident("counter"))),
        ],
    );

    let program = Program {
        declarations: vec![
            Declaration::Function(puts),
            Declaration::Variable(counter),
            Declaration::Variable(ratio),
            Declaration::Function(main),
        ],
    };

    let asm = assembly(&program, Arch::X86_64);

    assert!(asm.contains(".section .rodata\n.balign 1\n.LC0:\n\t.asciz \"hi \\\"there\\\"\"\n"));
    assert!(asm.contains(".data\n.balign 4\n.global counter\ncounter:\n\t.long 3\n"));
    assert!(asm.contains("ratio:\n\t.zero 4\n"));
    assert!(asm.contains("leaq    .LC0(%rip), %rax"));
    assert!(asm.contains("call    puts"));

    // Las funciones externas no se emiten
    assert!(!asm.contains("puts:"));

    let asm = assembly(&program, Arch::Xtensa);
    assert!(asm.contains("counter:\n\t.word 3\n"));
    assert!(asm.contains("movi    a8, .LC0"));
    assert!(asm.contains("call0   puts"));
}

fn duplicate_labels(asm: &str) -> Vec<&str> {
    let mut seen = HashSet::new();
    asm.lines()
        .filter_map(|line| line.strip_suffix(':'))
        .filter(|label| !label.starts_with('\t'))
        .filter(|label| !seen.insert(*label))
        .collect()
}

#[test]
fn string_constants_never_clash_with_block_labels() {
    let b = builder();

    // int puts(char*); int str(int c) { puts("a"); puts("b"); if (c) { return 1; } return 0; }
    let puts = b.external("puts", vec![b.param("s", Type::pointer_to(Type::Char))], Type::Int);
    let function = b.function(
        "str",
        vec![b.param("c", Type::Int)],
        Type::Int,
        vec![
            Statement::Expr(b.call("puts", vec![b.string("a")])),
            Statement::Expr(b.call("puts", vec![b.string("b")])),
            Statement::when(
                b.ident("c"),
                Statement::Block(b.block(vec![b.ret(Some(b.int(1)))])),
                None,
            ),
            b.ret(Some(b.int(0))),
        ],
    );

    let program = functions(vec![puts, function]);

    for arch in [Arch::X86_64, Arch::Xtensa] {
        let asm = assembly(&program, arch);

        assert!(asm.contains(".LC0:\n"));
        assert!(asm.contains(".LC1:\n"));
        assert!(asm.contains(".Lstr.1:\n"));
        assert_eq!(duplicate_labels(&asm), Vec::<&str>::new());
    }
}

#[test]
fn float_comparison_uses_the_target_conventions() {
    let b = builder();

    let program = functions(vec![b.function(
        "less",
        vec![b.param("a", Type::Float), b.param("b", Type::Float)],
        Type::Int,
        vec![b.ret(Some(b.binary(BinOp::Less, b.ident("a"), b.ident("b"))))],
    )]);

    let x86 = assembly(&program, Arch::X86_64);
    assert!(x86.contains("movss   %xmm0, "));
    assert!(x86.contains("movss   %xmm1, "));
    assert!(x86.contains("ucomiss %xmm1, %xmm0"));
    assert!(x86.contains("seta    %al"));

    let xtensa = assembly(&program, Arch::Xtensa);
    assert!(xtensa.contains("call0   __ltsf2"));
    assert!(xtensa.contains("bltz    a2, .Lless.flag0"));
    assert!(xtensa.contains("\n.Lless.flag0:\n"));
}

#[test]
fn many_arguments_spill_to_the_stack() {
    let b = builder();

    let parameters: Vec<_> = (0..8)
        .map(|i| b.param(&format!("p{}", i), Type::Int))
        .collect();

    let last = b.function(
        "last",
        parameters,
        Type::Int,
        vec![b.ret(Some(b.ident("p7")))],
    );

    let caller = b.function(
        "caller",
        vec![],
        Type::Int,
        vec![b.ret(Some(b.call("last", (0..8).map(|i| b.int(i)).collect())))],
    );

    let program = functions(vec![last, caller]);

    let x86 = assembly(&program, Arch::X86_64);
    assert!(x86.contains("movq    24(%rbp), %rax"));
    assert!(x86.contains("pushq   %rax"));
    assert!(x86.contains("addq    $16, %rsp"));

    let xtensa = assembly(&program, Arch::Xtensa);
    assert!(xtensa.contains("s32i    a8, a1, 4"));
    assert!(xtensa.contains("call0   last"));
}

#[test]
fn logical_operators_and_loops_compile_for_both_targets() {
    let b = builder();

    // int f(int n, char *p) { int k = 0; while (n > 0 && !(p == p)) { n = n - 1; k = -k; } return k || n; }
    let program = functions(vec![b.function(
        "f",
        vec![b.param("n", Type::Int), b.param("p", Type::pointer_to(Type::Char))],
        Type::Int,
        vec![
            b.local("k", Type::Int, Some(b.int(0))),
            Statement::while_loop(
                b.binary(
                    BinOp::And,
                    b.binary(BinOp::Greater, b.ident("n"), b.int(0)),
                    b.unary(UnOp::Not, b.binary(BinOp::Equal, b.ident("p"), b.ident("p"))),
                ),
                Statement::Block(b.block(vec![
                    Statement::assign(b.ident("n"), b.binary(BinOp::Sub, b.ident("n"), b.int(1))),
                    Statement::assign(b.ident("k"), b.unary(UnOp::Negate, b.ident("k"))),
                ])),
            ),
            b.ret(Some(b.binary(BinOp::Or, b.ident("k"), b.ident("n")))),
        ],
    )]);

    let x86 = assembly(&program, Arch::X86_64);
    assert!(x86.contains("cmpq    %rcx, %rax"));
    assert!(x86.contains("negl    %eax"));
    assert!(x86.contains("jnz     .Lf."));

    let xtensa = assembly(&program, Arch::Xtensa);
    assert!(xtensa.contains("neg     a8, a8"));
    assert!(xtensa.contains("bnez    a8, .Lf."));
}

#[test]
fn emission_is_deterministic() {
    for arch in [Arch::X86_64, Arch::Xtensa] {
        assert_eq!(assembly(&sum(), arch), assembly(&sum(), arch));
    }
}

#[test]
fn verification_can_be_disabled() {
    let config = Config {
        arch: Arch::Xtensa,
        options: Options::OPTIMIZE,
    };

    let mut output = Vec::new();
    assert!(pipeline::compile(&sum(), &config, &mut output).is_ok());
    assert!(!output.is_empty());
}

#[test]
fn unknown_targets_are_rejected() {
    assert!("riscv".parse::<Arch>().is_err());
    assert_eq!("XTENSA".parse::<Arch>().ok(), Some(Arch::Xtensa));
    assert_eq!(Arch::X86_64.to_string(), "x86_64");
}
