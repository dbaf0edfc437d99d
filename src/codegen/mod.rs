//! Generación de código ensamblador.
//!
//! La salida es texto para el ensamblador de GNU. Primero se emiten los
//! datos globales y luego el código de cada función definida. Los detalles
//! de cada instrucción dependen de la arquitectura y se delegan a
//! implementaciones de [`Emitter`](crate::arch::Emitter).

use std::io::{self, Write};

use log::{debug, trace};

use crate::{
    arch::{Arch, Emitter},
    index::Index,
    ir::{BlockId, Function, Global, Initializer, Instruction, Program, RegisterId, Value},
    ty::Type,
};

pub mod frame;

use frame::Frame;

/// Contexto de emisión de una función.
pub struct Context<'a> {
    output: &'a mut dyn Write,
    program: &'a Program,
    function: &'a Function,
    frame: Frame,
}

impl<'a> Context<'a> {
    pub fn output(&mut self) -> &mut (dyn Write + 'a) {
        &mut *self.output
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn function(&self) -> &'a Function {
        self.function
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn type_of(&self, value: &Value) -> Type {
        self.program.type_of(self.function, value)
    }

    pub fn register_type(&self, register: RegisterId) -> &'a Type {
        &self.function.registers[register]
    }

    /// Símbolo local para un bloque de esta función.
    pub fn label(&self, block: BlockId) -> String {
        label_symbol(self.function, block)
    }

    /// Nombre de un dato global.
    pub fn global_name(&self, value: &Value) -> Option<&'a str> {
        match value {
            Value::Global(global) => Some(&self.program.globals[*global].name),
            _ => None,
        }
    }
}

/// Emite un programa completo para la arquitectura dada.
pub fn emit<W: Write>(program: &Program, arch: Arch, output: &mut W) -> io::Result<()> {
    debug!("Emitting {} assembly", arch);

    dispatch_arch!(Target: arch => emit_data::<Target>(program, output))?;
    dispatch_arch!(Target: arch => Target::text_header(output))?;

    for function in &program.functions {
        if function.is_external() {
            continue;
        }

        trace!("Emitting function `{}`", function.name);
        dispatch_arch!(Target: arch => emit_function::<Target>(output, program, function))?;
    }

    Ok(())
}

fn emit_data<'a, E: Emitter<'a>>(program: &Program, output: &mut dyn Write) -> io::Result<()> {
    let (constants, variables): (Vec<&Global>, Vec<&Global>) =
        program.globals.iter().partition(|global| global.constant);

    for (section, globals) in [(".section .rodata", constants), (".data", variables)] {
        if globals.is_empty() {
            continue;
        }

        writeln!(output, "{}", section)?;
        for global in globals {
            emit_global::<E>(program, global, output)?;
        }
    }

    Ok(())
}

fn emit_global<'a, E: Emitter<'a>>(
    program: &Program,
    global: &Global,
    output: &mut dyn Write,
) -> io::Result<()> {
    let alignment = match &global.ty {
        Type::Array(element, _) => E::size_of(element),
        ty => E::size_of(ty),
    };

    writeln!(output, ".balign {}", alignment.clamp(1, E::VALUE_SIZE))?;
    if !global.constant {
        writeln!(output, ".global {}", global.name)?;
    }

    writeln!(output, "{}:", global.name)?;

    match &global.init {
        Initializer::Zero => writeln!(output, "\t.zero {}", E::size_of(&global.ty).max(1)),
        Initializer::Scalar(constant) => {
            let size = E::size_of(&constant.ty);
            let value = match constant.ty {
                Type::Float => constant.bits as u32 as i64,
                Type::Char | Type::Int => constant.as_i32() as i64,
                _ => 0,
            };

            writeln!(output, "\t{} {}", E::data_directive(size), value)
        }

        Initializer::String(bytes) => writeln!(output, "\t.asciz \"{}\"", escape(bytes)),
        Initializer::Address(target) => {
            let directive = E::data_directive(E::VALUE_SIZE);
            writeln!(output, "\t{} {}", directive, program.globals[*target].name)
        }
    }
}

fn emit_function<'a, E: Emitter<'a>>(
    output: &'a mut dyn Write,
    program: &'a Program,
    function: &'a Function,
) -> io::Result<()> {
    let cfg = match function.cfg() {
        Some(cfg) => cfg,
        None => return Ok(()),
    };

    let frame = Frame::layout(function, cfg, E::VALUE_SIZE, E::size_of);
    trace!(
        "Frame of `{}`: {} bytes of locals",
        function.name,
        frame.locals()
    );

    writeln!(output, ".balign {}", E::FUNCTION_ALIGNMENT)?;
    writeln!(output, ".global {0}\n{0}:", function.name)?;

    let cx = Context {
        output,
        program,
        function,
        frame,
    };

    let mut emitter = E::new(cx)?;
    for block in &cfg.blocks {
        // La entrada cae directo desde el prólogo
        if block.id != cfg.entry {
            let label = label_symbol(function, block.id);
            writeln!(emitter.cx().output(), "{}:", label)?;
        }

        for instruction in &block.instructions {
            put_instruction(&mut emitter, instruction)?;
        }
    }

    Ok(())
}

fn put_instruction<'a, E: Emitter<'a>>(emitter: &mut E, instruction: &Instruction) -> io::Result<()> {
    use Instruction::*;

    match instruction {
        Binary { op, dst, lhs, rhs } => emitter.binary(*op, *dst, lhs, rhs),
        Unary { op, dst, src } => emitter.unary(*op, *dst, src),
        Cast { dst, src } => emitter.cast(*dst, src),
        Compare { op, dst, lhs, rhs } => emitter.compare(*op, *dst, lhs, rhs),
        Load { dst, address } => emitter.load(*dst, address),
        Store { address, value } => emitter.store(address, value),

        // Las áreas se reservan en el prólogo
        Alloca { .. } => Ok(()),

        ElementPtr { dst, base, index } => emitter.element_ptr(*dst, base, index),
        Call {
            dst,
            callee,
            arguments,
        } => {
            let target = &emitter.cx().program().functions[*callee];
            emitter.call(*dst, target, arguments)
        }

        Branch {
            condition,
            positive,
            negative,
        } => {
            let positive = emitter.cx().label(*positive);
            let negative = emitter.cx().label(*negative);
            emitter.branch(condition, &positive, &negative)
        }

        Jump(target) => {
            let label = emitter.cx().label(*target);
            emitter.jump(&label)
        }

        Return(value) => emitter.ret(value.as_ref()),
    }
}

fn label_symbol(function: &Function, block: BlockId) -> String {
    format!(".L{}.{}", function.name, block.index())
}

/// Escapa bytes para una cadena de `.asciz`.
fn escape(bytes: &[u8]) -> String {
    let mut escaped = String::with_capacity(bytes.len());
    for &byte in bytes {
        match byte {
            b'"' => escaped.push_str("\\\""),
            b'\\' => escaped.push_str("\\\\"),
            b' '..=b'~' => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\{:03o}", byte)),
        }
    }

    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_strings_for_the_assembler() {
        assert_eq!(escape(b"hi"), "hi");
        assert_eq!(escape(b"a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(escape(b"line\n\0"), "line\\012\\000");
    }
}
