//! Implementación para Tensilica Xtensa.
//!
//! # Manual de ISA
//! <https://0x04.net/~mwk/doc/xtensa.pdf>
//!
//! La ABI `call0` está documentada en 8.1.2. No se supone una unidad de
//! punto flotante: toda operación sobre `float` se delega a las rutinas
//! de emulación de libgcc.

use std::io::{self, Write};

use crate::{
    codegen::{
        frame::{align, Home},
        Context,
    },
    ir::{BinaryOp, CompareOp, Function, RegisterId, UnaryOp, Value},
    ty::Type,
};

/// Esta es una arquitectura de 32 bits.
const VALUE_SIZE: u32 = 4;

/// Para la ABI `call0` se colocan los primeros seis argumentos en `a2`-`a7`.
const MAX_ARGS: usize = 6;

/// Máximo desplazamiento inmediato de `l32i`/`s32i`.
const MAX_OFFSET: u32 = 1020;

/// Rango de `addi`.
const MAX_ADDI: u32 = 127;

/// Registro para direcciones que no caben en un inmediato.
const ADDRESSING: &str = "a11";

/// Registro donde se coloca el argumento `n`, a partir de cero.
fn argument_register(n: usize) -> String {
    format!("a{}", 2 + n)
}

/// Implementación de emisión de código para Xtensa.
pub struct Emitter<'a> {
    cx: Context<'a>,

    /// Tamaño total del frame, múltiplo de 16.
    frame_size: u32,

    /// Bytes al fondo del frame para argumentos salientes.
    outgoing: u32,

    /// Contador para etiquetas internas de comparaciones.
    flags: u32,
}

impl<'a> super::Emitter<'a> for Emitter<'a> {
    const VALUE_SIZE: u32 = VALUE_SIZE;
    const FUNCTION_ALIGNMENT: u32 = 4;

    fn data_directive(size: u32) -> &'static str {
        match size {
            1 => ".byte",
            _ => ".word",
        }
    }

    fn text_header(output: &mut dyn io::Write) -> io::Result<()> {
        // Las constantes grandes de `movi` se colocan en literales
        writeln!(output, ".text")?;
        writeln!(output, ".literal_position")
    }

    fn new(cx: Context<'a>) -> io::Result<Self> {
        let outgoing = cx.frame().stack_arguments() * VALUE_SIZE;

        // "+ 4" debido a que se debe preservar a0
        let frame_size = align(outgoing + cx.frame().locals() + VALUE_SIZE, 16);

        let mut emitter = Emitter {
            cx,
            frame_size,
            outgoing,
            flags: 0,
        };

        if frame_size <= MAX_ADDI + 1 {
            emit!(emitter, "addi", "a1, a1, -{}", frame_size)?;
        } else {
            emit!(emitter, "movi", "a8, {}", frame_size)?;
            emit!(emitter, "sub", "a1, a1, a8")?;
        }

        // Se preserva la dirección de retorno
        let (base, offset) = emitter.base(frame_size - VALUE_SIZE)?;
        emit!(emitter, "s32i", "a0, {}, {}", base, offset)?;

        let function = emitter.cx.function();
        for (i, parameter) in function.parameters.iter().enumerate() {
            if i < MAX_ARGS {
                emitter.store_slot(*parameter, &argument_register(i))?;
            } else {
                // Argumentos en el área saliente del frame anterior
                let incoming = frame_size + (i - MAX_ARGS) as u32 * VALUE_SIZE;
                let (base, offset) = emitter.base(incoming)?;

                emit!(emitter, "l32i", "a8, {}, {}", base, offset)?;
                emitter.store_slot(*parameter, "a8")?;
            }
        }

        Ok(emitter)
    }

    fn cx(&mut self) -> &mut Context<'a> {
        &mut self.cx
    }

    fn binary(&mut self, op: BinaryOp, dst: RegisterId, lhs: &Value, rhs: &Value) -> io::Result<()> {
        let ty = self.cx.register_type(dst);

        let routine = match (op, ty) {
            (BinaryOp::Add, Type::Float) => Some("__addsf3"),
            (BinaryOp::Sub, Type::Float) => Some("__subsf3"),
            (BinaryOp::Mul, Type::Float) => Some("__mulsf3"),
            (BinaryOp::Div, Type::Float) | (BinaryOp::Mod, Type::Float) => Some("__divsf3"),
            (BinaryOp::Div, _) => Some("__divsi3"),
            (BinaryOp::Mod, _) => Some("__modsi3"),
            _ => None,
        };

        if let Some(routine) = routine {
            self.libcall(routine, &[lhs, rhs])?;
            self.narrow(ty, "a2")?;
            return self.store_slot(dst, "a2");
        }

        self.load_value(lhs, "a8")?;
        self.load_value(rhs, "a9")?;

        let instruction = match op {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            _ => "mull",
        };

        emit!(self, instruction, "a8, a8, a9")?;
        self.narrow(ty, "a8")?;
        self.store_slot(dst, "a8")
    }

    fn unary(&mut self, op: UnaryOp, dst: RegisterId, src: &Value) -> io::Result<()> {
        let ty = self.cx.register_type(dst);
        self.load_value(src, "a8")?;

        match (op, ty) {
            (UnaryOp::Neg, Type::Float) => {
                // Solamente se invierte el bit de signo
                emit!(self, "movi", "a9, 1")?;
                emit!(self, "slli", "a9, a9, 31")?;
                emit!(self, "xor", "a8, a8, a9")?;
            }

            (UnaryOp::Neg, _) => emit!(self, "neg", "a8, a8")?,
        }

        self.narrow(ty, "a8")?;
        self.store_slot(dst, "a8")
    }

    fn cast(&mut self, dst: RegisterId, src: &Value) -> io::Result<()> {
        let from = self.cx.type_of(src);
        let to = self.cx.register_type(dst);

        match (&from, to) {
            (Type::Float, Type::Float) => {
                self.load_value(src, "a8")?;
                self.store_slot(dst, "a8")
            }

            (_, Type::Float) => {
                self.libcall("__floatsisf", &[src])?;
                self.store_slot(dst, "a2")
            }

            (Type::Float, _) => {
                self.libcall("__fixsfsi", &[src])?;
                self.narrow(to, "a2")?;
                self.store_slot(dst, "a2")
            }

            _ => {
                self.load_value(src, "a8")?;
                self.narrow(to, "a8")?;
                self.store_slot(dst, "a8")
            }
        }
    }

    fn compare(
        &mut self,
        op: CompareOp,
        dst: RegisterId,
        lhs: &Value,
        rhs: &Value,
    ) -> io::Result<()> {
        let ty = self.cx.type_of(lhs);
        let label = self.flag_label();

        if ty == Type::Float {
            // Cada rutina retorna un entero cuyo signo indica el resultado
            let (routine, instruction, operands) = match op {
                CompareOp::Eq => ("__eqsf2", "beqz", "a2"),
                CompareOp::Ne => ("__nesf2", "bnez", "a2"),
                CompareOp::Lt => ("__ltsf2", "bltz", "a2"),
                CompareOp::Le => ("__lesf2", "blti", "a2, 1"),
                CompareOp::Gt => ("__gtsf2", "bgei", "a2, 1"),
                CompareOp::Ge => ("__gesf2", "bgez", "a2"),
            };

            self.libcall(routine, &[lhs, rhs])?;
            emit!(self, "movi", "a10, 1")?;
            emit!(self, instruction, "{}, {}", operands, label)?;
        } else {
            self.load_value(lhs, "a8")?;
            self.load_value(rhs, "a9")?;
            emit!(self, "movi", "a10, 1")?;

            // No existen ble ni bgt, por lo cual se invierten operandos
            let unsigned = matches!(ty, Type::Pointer(_));
            let (instruction, operands) = match (op, unsigned) {
                (CompareOp::Eq, _) => ("beq", "a8, a9"),
                (CompareOp::Ne, _) => ("bne", "a8, a9"),
                (CompareOp::Lt, false) => ("blt", "a8, a9"),
                (CompareOp::Ge, false) => ("bge", "a8, a9"),
                (CompareOp::Le, false) => ("bge", "a9, a8"),
                (CompareOp::Gt, false) => ("blt", "a9, a8"),
                (CompareOp::Lt, true) => ("bltu", "a8, a9"),
                (CompareOp::Ge, true) => ("bgeu", "a8, a9"),
                (CompareOp::Le, true) => ("bgeu", "a9, a8"),
                (CompareOp::Gt, true) => ("bltu", "a9, a8"),
            };

            emit!(self, instruction, "{}, {}", operands, label)?;
        }

        emit!(self, "movi", "a10, 0")?;
        writeln!(self.output(), "{}:", label)?;
        self.store_slot(dst, "a10")
    }

    fn load(&mut self, dst: RegisterId, address: &Value) -> io::Result<()> {
        self.load_value(address, "a8")?;

        if *self.cx.register_type(dst) == Type::Char {
            emit!(self, "l8ui", "a9, a8, 0")?;
            self.narrow(&Type::Char, "a9")?;
        } else {
            emit!(self, "l32i", "a9, a8, 0")?;
        }

        self.store_slot(dst, "a9")
    }

    fn store(&mut self, address: &Value, value: &Value) -> io::Result<()> {
        self.load_value(address, "a8")?;
        self.load_value(value, "a9")?;

        if self.cx.type_of(value) == Type::Char {
            emit!(self, "s8i", "a9, a8, 0")
        } else {
            emit!(self, "s32i", "a9, a8, 0")
        }
    }

    fn element_ptr(&mut self, dst: RegisterId, base: &Value, index: &Value) -> io::Result<()> {
        let size = self
            .cx
            .register_type(dst)
            .pointee()
            .map_or(1, <Self as super::Emitter>::size_of);

        self.load_value(base, "a8")?;
        self.load_value(index, "a9")?;

        if size.is_power_of_two() {
            let shift = size.trailing_zeros();
            if shift > 0 {
                emit!(self, "slli", "a9, a9, {}", shift)?;
            }
        } else {
            emit!(self, "movi", "a10, {}", size)?;
            emit!(self, "mull", "a9, a9, a10")?;
        }

        emit!(self, "add", "a8, a8, a9")?;
        self.store_slot(dst, "a8")
    }

    fn call(
        &mut self,
        dst: Option<RegisterId>,
        target: &Function,
        arguments: &[Value],
    ) -> io::Result<()> {
        // Argumentos del séptimo en adelante van al fondo del frame, en orden
        for (i, argument) in arguments.iter().enumerate().skip(MAX_ARGS) {
            let outgoing = (i - MAX_ARGS) as u32 * VALUE_SIZE;

            self.load_value(argument, "a8")?;
            let (base, offset) = self.base(outgoing)?;
            emit!(self, "s32i", "a8, {}, {}", base, offset)?;
        }

        for (i, argument) in arguments.iter().enumerate().take(MAX_ARGS) {
            self.load_value(argument, &argument_register(i))?;
        }

        emit!(self, "call0", "{}", target.name)?;

        if let Some(dst) = dst {
            self.narrow(&target.return_type, "a2")?;
            self.store_slot(dst, "a2")?;
        }

        Ok(())
    }

    fn branch(&mut self, condition: &Value, positive: &str, negative: &str) -> io::Result<()> {
        self.load_value(condition, "a8")?;
        emit!(self, "bnez", "a8, {}", positive)?;
        emit!(self, "j", "{}", negative)
    }

    fn jump(&mut self, label: &str) -> io::Result<()> {
        emit!(self, "j", "{}", label)
    }

    fn ret(&mut self, value: Option<&Value>) -> io::Result<()> {
        if let Some(value) = value {
            self.load_value(value, "a2")?;
        }

        // Revierte al estado justo antes de la llamada
        let frame_size = self.frame_size;
        let (base, offset) = self.base(frame_size - VALUE_SIZE)?;
        emit!(self, "l32i", "a0, {}, {}", base, offset)?;

        if frame_size <= MAX_ADDI {
            emit!(self, "addi", "a1, a1, {}", frame_size)?;
        } else {
            emit!(self, "movi", "a8, {}", frame_size)?;
            emit!(self, "add", "a1, a1, a8")?;
        }

        emit!(self, "ret.n")
    }
}

impl<'a> Emitter<'a> {
    fn output(&mut self) -> &mut (dyn Write + 'a) {
        self.cx.output()
    }

    fn flag_label(&mut self) -> String {
        let label = format!(".L{}.flag{}", self.cx.function().name, self.flags);
        self.flags += 1;
        label
    }

    /// Desplazamiento de una ranura o área respecto a `a1`.
    fn offset_of(&self, register: RegisterId) -> u32 {
        let offset = match self.cx.frame().home(register) {
            Home::Slot(offset) | Home::Area(offset) => offset,
        };

        self.outgoing + offset
    }

    /// Base y desplazamiento inmediato para acceder a `a1 + offset`.
    fn base(&mut self, offset: u32) -> io::Result<(&'static str, u32)> {
        if offset <= MAX_OFFSET {
            return Ok(("a1", offset));
        }

        emit!(self, "movi", "{}, {}", ADDRESSING, offset)?;
        emit!(self, "add", "{0}, {0}, a1", ADDRESSING)?;

        Ok((ADDRESSING, 0))
    }

    /// Carga un valor a un registro. Los flotantes se cargan como bits.
    fn load_value(&mut self, value: &Value, register: &str) -> io::Result<()> {
        match value {
            Value::Register(virtual_register) => {
                let offset = self.offset_of(*virtual_register);

                match self.cx.frame().home(*virtual_register) {
                    Home::Slot(_) => {
                        let (base, offset) = self.base(offset)?;
                        emit!(self, "l32i", "{}, {}, {}", register, base, offset)
                    }

                    Home::Area(_) if offset <= MAX_ADDI => {
                        emit!(self, "addi", "{}, a1, {}", register, offset)
                    }

                    Home::Area(_) => {
                        emit!(self, "movi", "{}, {}", register, offset)?;
                        emit!(self, "add", "{0}, {0}, a1", register)
                    }
                }
            }

            Value::Constant(constant) => {
                let bits = match constant.ty {
                    Type::Char | Type::Int => constant.as_i32(),
                    _ => constant.bits as u32 as i32,
                };

                emit!(self, "movi", "{}, {}", register, bits)
            }

            Value::Global(_) => {
                let name = self.cx.global_name(value).unwrap_or_default();
                emit!(self, "movi", "{}, {}", register, name)
            }
        }
    }

    /// Guarda un registro en la ranura de `dst`.
    fn store_slot(&mut self, dst: RegisterId, register: &str) -> io::Result<()> {
        let offset = self.offset_of(dst);
        let (base, offset) = self.base(offset)?;
        emit!(self, "s32i", "{}, {}, {}", register, base, offset)
    }

    /// Llamada a una rutina de soporte con argumentos en `a2`, `a3`, ...
    fn libcall(&mut self, routine: &str, arguments: &[&Value]) -> io::Result<()> {
        for (i, argument) in arguments.iter().enumerate() {
            self.load_value(argument, &argument_register(i))?;
        }

        emit!(self, "call0", "{}", routine)
    }

    /// Los `char` se mantienen extendidos en signo a 32 bits.
    fn narrow(&mut self, ty: &Type, register: &str) -> io::Result<()> {
        if *ty == Type::Char {
            emit!(self, "slli", "{0}, {0}, 24", register)?;
            emit!(self, "srai", "{0}, {0}, 24", register)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_registers() {
        let registers: Vec<_> = (0..MAX_ARGS).map(argument_register).collect();
        assert_eq!(registers, ["a2", "a3", "a4", "a5", "a6", "a7"]);
    }
}
