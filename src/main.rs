//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI. Como el crate no incluye un front
//! end, el programa compilado es un programa de demostración
//! construido directamente como árbol sintáctico.

use anyhow::{self, bail, Context};
use clap::{crate_version, Arg, ArgAction, Command};
use minic::{
    ast::{BinOp, Builder, Declaration, Program, Statement},
    pipeline::{self, CompileError, Config, Options},
    source::Source,
    target::Arch,
    ty::Type,
};

use std::{
    fs::File,
    io::{self, Write},
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parsing de CLI
    let args = Command::new("minic")
        .version(crate_version!())
        .about("Back end for a small C-like language")
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .value_name("ARCH")
                .takes_value(true)
                .default_value("x86_64")
                .help("Target architecture (x86_64, xtensa)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .takes_value(true)
                .default_value("-")
                .help("Output file ('-' for stdout)"),
        )
        .arg(
            Arg::new("emit")
                .long("emit")
                .value_name("KIND")
                .takes_value(true)
                .default_value("asm")
                .value_parser(["asm", "ir"])
                .help("Emit target assembly or the intermediate representation"),
        )
        .arg(
            Arg::new("optimize")
                .short('O')
                .action(ArgAction::SetTrue)
                .help("Enable optimizations (currently none)"),
        )
        .arg(
            Arg::new("no-verify")
                .long("no-verify")
                .action(ArgAction::SetTrue)
                .help("Skip validation of the intermediate representation"),
        )
        .get_matches();

    // Se extraen argumentos necesarios
    let arch: Arch = args
        .get_one::<String>("target")
        .map(String::as_str)
        .unwrap_or("x86_64")
        .parse()?;

    let mut options = Options::default();
    if args.get_flag("optimize") {
        options |= Options::OPTIMIZE;
    }

    if args.get_flag("no-verify") {
        options -= Options::VERIFY;
    }

    let config = Config { arch, options };
    let emit_ir = args.get_one::<String>("emit").map_or(false, |kind| kind == "ir");
    let output = args
        .get_one::<String>("output")
        .map(String::as_str)
        .unwrap_or("-");

    let program = demo_program();
    let result = match output {
        "-" => {
            let stdout = io::stdout();
            let mut stdout = stdout.lock();
            run(&program, &config, emit_ir, &mut stdout)
        }

        path => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            run(&program, &config, emit_ir, &mut file)
        }
    };

    match result {
        Ok(()) => Ok(()),

        // Los diagnósticos se despliegan tal cual, sin contexto adicional
        Err(CompileError::Rejected(diagnostics)) => {
            eprint!("{}", diagnostics);
            std::process::exit(1);
        }

        Err(CompileError::Internal(error)) => bail!(error),
        Err(CompileError::Io(error)) => {
            Err(error).with_context(|| format!("Failed to emit to: {}", output))
        }
    }
}

fn run<W: Write>(
    program: &Program,
    config: &Config,
    emit_ir: bool,
    output: &mut W,
) -> Result<(), CompileError> {
    if emit_ir {
        let ir = pipeline::lower(program, config)?;
        write!(output, "{}", ir)?;
    } else {
        pipeline::compile(program, config, output)?;
    }

    output.flush()?;
    Ok(())
}

/// Programa de demostración.
///
/// ```c
/// int putchar(int c);
///
/// int sum(int n) {
///     int s = 0;
///     for (int i = 1; i <= n; i = i + 1) {
///         s = s + i;
///     }
///
///     return s;
/// }
///
/// int main() {
///     int digits[4];
///     digits[0] = '0' + sum(3);
///     putchar(digits[0]);
///     return 0;
/// }
/// ```
fn demo_program() -> Program {
    let b = Builder::new(Source::unnamed("<demo>"));

    let putchar = b.external("putchar", vec![b.param("c", Type::Int)], Type::Int);

    let sum = b.function(
        "sum",
        vec![b.param("n", Type::Int)],
        Type::Int,
        vec![
            b.local("s", Type::Int, Some(b.int(0))),
            Statement::for_loop(
                Some(b.local("i", Type::Int, Some(b.int(1)))),
                Some(b.binary(BinOp::LessOrEqual, b.ident("i"), b.ident("n"))),
                Some(Statement::assign(
                    b.ident("i"),
                    b.binary(BinOp::Add, b.ident("i"), b.int(1)),
                )),
                Statement::Block(b.block(vec![Statement::assign(
                    b.ident("s"),
                    b.binary(BinOp::Add, b.ident("s"), b.ident("i")),
                )])),
            ),
            b.ret(Some(b.ident("s"))),
        ],
    );

    let main = b.function(
        "main",
        vec![],
        Type::Int,
        vec![
            b.local("digits", Type::array_of(Type::Int, 4), None),
            Statement::assign(
                b.index(b.ident("digits"), b.int(0)),
                b.binary(BinOp::Add, b.char(b'0'), b.call("sum", vec![b.int(3)])),
            ),
            Statement::Expr(b.call("putchar", vec![b.index(b.ident("digits"), b.int(0))])),
            b.ret(Some(b.int(0))),
        ],
    );

    Program {
        declarations: vec![
            Declaration::Function(putchar),
            Declaration::Function(sum),
            Declaration::Function(main),
        ],
    }
}
