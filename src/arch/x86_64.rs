//! Implementación para x86-64.
//!
//! Se sigue la convención de llamadas System V: los primeros seis
//! argumentos enteros o punteros van en `%rdi`, `%rsi`, `%rdx`, `%rcx`,
//! `%r8` y `%r9`, los primeros ocho flotantes en `%xmm0`-`%xmm7` y el
//! resto en pila. Los valores de retorno van en `%rax` o `%xmm0`.

use std::io::{self, Write};

use crate::{
    codegen::{
        frame::{align, Home},
        Context,
    },
    ir::{BinaryOp, CompareOp, Function, RegisterId, UnaryOp, Value},
    ty::Type,
};

/// Esta es una arquitectura de 64 bits.
const VALUE_SIZE: u32 = 8;

/// Cantidad de registros de argumentos flotantes.
const FLOAT_ARGS: u8 = 8;

/// Registro de propósito general.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
}

impl Reg {
    fn argument_sequence() -> impl Iterator<Item = Reg> {
        use Reg::*;

        std::iter::successors(Some(Rdi), |last| match last {
            Rdi => Some(Rsi),
            Rsi => Some(Rdx),
            Rdx => Some(Rcx),
            Rcx => Some(R8),
            R8 => Some(R9),
            _ => None,
        })
    }

    fn quad(self) -> &'static str {
        use Reg::*;

        match self {
            Rax => "rax",
            Rcx => "rcx",
            Rdx => "rdx",
            Rsi => "rsi",
            Rdi => "rdi",
            R8 => "r8",
            R9 => "r9",
        }
    }

    fn dword(self) -> &'static str {
        use Reg::*;

        match self {
            Rax => "eax",
            Rcx => "ecx",
            Rdx => "edx",
            Rsi => "esi",
            Rdi => "edi",
            R8 => "r8d",
            R9 => "r9d",
        }
    }
}

/// Ubicación de un argumento durante una llamada.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Passing {
    Gpr(Reg),
    Xmm(u8),

    /// Posición entre los argumentos en pila, a partir de cero.
    Stack(u32),
}

/// Asigna ubicaciones a una secuencia de argumentos.
fn classify(types: &[Type]) -> Vec<Passing> {
    let mut gprs = Reg::argument_sequence();
    let mut xmms = 0..FLOAT_ARGS;
    let mut stack = 0..;

    types
        .iter()
        .map(|ty| {
            let passing = match ty {
                Type::Float => xmms.next().map(Passing::Xmm),
                _ => gprs.next().map(Passing::Gpr),
            };

            passing.unwrap_or_else(|| Passing::Stack(stack.next().unwrap_or_default()))
        })
        .collect()
}

fn is_wide(ty: &Type) -> bool {
    matches!(ty, Type::Pointer(_))
}

/// Implementación de emisión de código para x86-64.
pub struct Emitter<'a> {
    cx: Context<'a>,

    /// Tamaño reservado bajo `%rbp`, múltiplo de 16.
    frame_size: u32,
}

impl<'a> super::Emitter<'a> for Emitter<'a> {
    const VALUE_SIZE: u32 = VALUE_SIZE;
    const FUNCTION_ALIGNMENT: u32 = 16;

    fn data_directive(size: u32) -> &'static str {
        match size {
            1 => ".byte",
            4 => ".long",
            _ => ".quad",
        }
    }

    fn new(cx: Context<'a>) -> io::Result<Self> {
        let frame_size = align(cx.frame().locals(), 16);
        let mut emitter = Emitter { cx, frame_size };

        // Prólogo, crea un stack frame
        emit!(emitter, "pushq", "%rbp")?;
        emit!(emitter, "movq", "%rsp, %rbp")?;
        if frame_size > 0 {
            emit!(emitter, "subq", "${}, %rsp", frame_size)?;
        }

        // Se copian argumentos a sus ranuras
        let function = emitter.cx.function();
        let types: Vec<Type> = function
            .parameters
            .iter()
            .map(|parameter| function.registers[*parameter].clone())
            .collect();

        for (parameter, passing) in function.parameters.iter().zip(classify(&types)) {
            match passing {
                Passing::Gpr(register) => emitter.store_gpr(*parameter, register)?,
                Passing::Xmm(number) => {
                    let slot = emitter.address(*parameter);
                    emit!(emitter, "movss", "%xmm{}, {}", number, slot)?;
                }

                Passing::Stack(position) => {
                    // Dirección de retorno y %rbp anterior preceden a los argumentos
                    let offset = 2 * VALUE_SIZE + position * VALUE_SIZE;
                    emit!(emitter, "movq", "{}(%rbp), %rax", offset)?;
                    emitter.store_gpr(*parameter, Reg::Rax)?;
                }
            }
        }

        Ok(emitter)
    }

    fn cx(&mut self) -> &mut Context<'a> {
        &mut self.cx
    }

    fn binary(&mut self, op: BinaryOp, dst: RegisterId, lhs: &Value, rhs: &Value) -> io::Result<()> {
        let ty = self.cx.register_type(dst);

        if *ty == Type::Float {
            self.load_float(lhs, 0)?;
            self.load_float(rhs, 1)?;

            let instruction = match op {
                BinaryOp::Add => "addss",
                BinaryOp::Sub => "subss",
                BinaryOp::Mul => "mulss",
                BinaryOp::Div | BinaryOp::Mod => "divss",
            };

            emit!(self, instruction, "%xmm1, %xmm0")?;
            return self.store_float(dst, 0);
        }

        self.load_gpr(lhs, Reg::Rax)?;
        self.load_gpr(rhs, Reg::Rcx)?;

        match op {
            BinaryOp::Add => emit!(self, "addl", "%ecx, %eax")?,
            BinaryOp::Sub => emit!(self, "subl", "%ecx, %eax")?,
            BinaryOp::Mul => emit!(self, "imull", "%ecx, %eax")?,
            BinaryOp::Div | BinaryOp::Mod => {
                emit!(self, "cltd")?;
                emit!(self, "idivl", "%ecx")?;

                if op == BinaryOp::Mod {
                    emit!(self, "movl", "%edx, %eax")?;
                }
            }
        }

        self.narrow(ty)?;
        self.store_gpr(dst, Reg::Rax)
    }

    fn unary(&mut self, op: UnaryOp, dst: RegisterId, src: &Value) -> io::Result<()> {
        let ty = self.cx.register_type(dst);
        self.load_gpr(src, Reg::Rax)?;

        match (op, ty) {
            // Solamente se invierte el bit de signo
            (UnaryOp::Neg, Type::Float) => emit!(self, "xorl", "$0x80000000, %eax")?,
            (UnaryOp::Neg, _) => emit!(self, "negl", "%eax")?,
        }

        self.narrow(ty)?;
        self.store_gpr(dst, Reg::Rax)
    }

    fn cast(&mut self, dst: RegisterId, src: &Value) -> io::Result<()> {
        let from = self.cx.type_of(src);
        let to = self.cx.register_type(dst);

        match (&from, to) {
            (Type::Float, Type::Float) => {
                self.load_float(src, 0)?;
                self.store_float(dst, 0)
            }

            (_, Type::Float) => {
                self.load_gpr(src, Reg::Rax)?;
                emit!(self, "cvtsi2ssl", "%eax, %xmm0")?;
                self.store_float(dst, 0)
            }

            (Type::Float, _) => {
                self.load_float(src, 0)?;
                emit!(self, "cvttss2si", "%xmm0, %eax")?;
                self.narrow(to)?;
                self.store_gpr(dst, Reg::Rax)
            }

            _ => {
                self.load_gpr(src, Reg::Rax)?;
                self.narrow(to)?;
                self.store_gpr(dst, Reg::Rax)
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

        if ty == Type::Float {
            // ucomiss solo tiene condiciones "mayor que", por lo cual se invierten operandos
            let (first, second) = match op {
                CompareOp::Lt | CompareOp::Le => (rhs, lhs),
                _ => (lhs, rhs),
            };

            self.load_float(first, 0)?;
            self.load_float(second, 1)?;
            emit!(self, "ucomiss", "%xmm1, %xmm0")?;

            // Comparaciones con NaN son desordenadas, PF=1
            match op {
                CompareOp::Eq => {
                    emit!(self, "sete", "%al")?;
                    emit!(self, "setnp", "%cl")?;
                    emit!(self, "andb", "%cl, %al")?;
                }

                CompareOp::Ne => {
                    emit!(self, "setne", "%al")?;
                    emit!(self, "setp", "%cl")?;
                    emit!(self, "orb", "%cl, %al")?;
                }

                CompareOp::Lt | CompareOp::Gt => emit!(self, "seta", "%al")?,
                CompareOp::Le | CompareOp::Ge => emit!(self, "setae", "%al")?,
            }
        } else {
            self.load_gpr(lhs, Reg::Rax)?;
            self.load_gpr(rhs, Reg::Rcx)?;

            let wide = is_wide(&ty);
            if wide {
                emit!(self, "cmpq", "%rcx, %rax")?;
            } else {
                emit!(self, "cmpl", "%ecx, %eax")?;
            }

            // Las direcciones se comparan sin signo
            let instruction = match (op, wide) {
                (CompareOp::Eq, _) => "sete",
                (CompareOp::Ne, _) => "setne",
                (CompareOp::Lt, false) => "setl",
                (CompareOp::Le, false) => "setle",
                (CompareOp::Gt, false) => "setg",
                (CompareOp::Ge, false) => "setge",
                (CompareOp::Lt, true) => "setb",
                (CompareOp::Le, true) => "setbe",
                (CompareOp::Gt, true) => "seta",
                (CompareOp::Ge, true) => "setae",
            };

            emit!(self, instruction, "%al")?;
        }

        emit!(self, "movzbl", "%al, %eax")?;
        self.store_gpr(dst, Reg::Rax)
    }

    fn load(&mut self, dst: RegisterId, address: &Value) -> io::Result<()> {
        self.load_gpr(address, Reg::Rax)?;

        match self.cx.register_type(dst) {
            Type::Char => emit!(self, "movsbl", "(%rax), %ecx")?,
            Type::Pointer(_) => emit!(self, "movq", "(%rax), %rcx")?,
            _ => emit!(self, "movl", "(%rax), %ecx")?,
        }

        self.store_gpr(dst, Reg::Rcx)
    }

    fn store(&mut self, address: &Value, value: &Value) -> io::Result<()> {
        self.load_gpr(address, Reg::Rax)?;
        self.load_gpr(value, Reg::Rcx)?;

        match self.cx.type_of(value) {
            Type::Char => emit!(self, "movb", "%cl, (%rax)"),
            Type::Pointer(_) => emit!(self, "movq", "%rcx, (%rax)"),
            _ => emit!(self, "movl", "%ecx, (%rax)"),
        }
    }

    fn element_ptr(&mut self, dst: RegisterId, base: &Value, index: &Value) -> io::Result<()> {
        let size = self
            .cx
            .register_type(dst)
            .pointee()
            .map_or(1, <Self as super::Emitter>::size_of);

        self.load_gpr(base, Reg::Rax)?;
        self.load_gpr(index, Reg::Rcx)?;

        emit!(self, "movslq", "%ecx, %rcx")?;
        if size != 1 {
            emit!(self, "imulq", "${}, %rcx, %rcx", size)?;
        }

        emit!(self, "addq", "%rcx, %rax")?;
        self.store_gpr(dst, Reg::Rax)
    }

    fn call(
        &mut self,
        dst: Option<RegisterId>,
        target: &Function,
        arguments: &[Value],
    ) -> io::Result<()> {
        let types: Vec<Type> = arguments.iter().map(|argument| self.cx.type_of(argument)).collect();
        let passing = classify(&types);

        let stacked: Vec<&Value> = arguments
            .iter()
            .zip(&passing)
            .filter(|(_, passing)| matches!(passing, Passing::Stack(_)))
            .map(|(argument, _)| argument)
            .collect();

        // %rsp debe quedar alineado a 16 bytes en la instrucción call
        let padding = stacked.len() % 2;
        if padding > 0 {
            emit!(self, "subq", "${}, %rsp", VALUE_SIZE)?;
        }

        // Argumentos en pila se colocan en orden inverso
        for argument in stacked.iter().rev() {
            self.load_gpr(argument, Reg::Rax)?;
            emit!(self, "pushq", "%rax")?;
        }

        let mut floats = 0;
        for (argument, passing) in arguments.iter().zip(&passing) {
            match *passing {
                Passing::Gpr(register) => self.load_gpr(argument, register)?,
                Passing::Xmm(number) => {
                    self.load_float(argument, number)?;
                    floats += 1;
                }

                Passing::Stack(_) => (),
            }
        }

        // Cantidad de registros vectoriales usados, por si la función es variádica
        emit!(self, "movl", "${}, %eax", floats)?;
        emit!(self, "call", "{}", target.name)?;

        if let Some(dst) = dst {
            match target.return_type {
                Type::Float => self.store_float(dst, 0)?,
                Type::Char => {
                    emit!(self, "movsbl", "%al, %eax")?;
                    self.store_gpr(dst, Reg::Rax)?;
                }

                _ => self.store_gpr(dst, Reg::Rax)?,
            }
        }

        let reclaimed = (stacked.len() + padding) as u32 * VALUE_SIZE;
        if reclaimed > 0 {
            emit!(self, "addq", "${}, %rsp", reclaimed)?;
        }

        Ok(())
    }

    fn branch(&mut self, condition: &Value, positive: &str, negative: &str) -> io::Result<()> {
        self.load_gpr(condition, Reg::Rax)?;

        if is_wide(&self.cx.type_of(condition)) {
            emit!(self, "testq", "%rax, %rax")?;
        } else {
            emit!(self, "testl", "%eax, %eax")?;
        }

        emit!(self, "jnz", "{}", positive)?;
        emit!(self, "jmp", "{}", negative)
    }

    fn jump(&mut self, label: &str) -> io::Result<()> {
        emit!(self, "jmp", "{}", label)
    }

    fn ret(&mut self, value: Option<&Value>) -> io::Result<()> {
        if let Some(value) = value {
            if self.cx.type_of(value) == Type::Float {
                self.load_float(value, 0)?;
            } else {
                self.load_gpr(value, Reg::Rax)?;
            }
        }

        // Epílogo, revierte al estado justo antes de la llamada
        emit!(self, "movq", "%rbp, %rsp")?;
        emit!(self, "popq", "%rbp")?;
        emit!(self, "ret")
    }
}

impl<'a> Emitter<'a> {
    fn output(&mut self) -> &mut (dyn Write + 'a) {
        self.cx.output()
    }

    /// Dirección de la ranura o área de un registro virtual, relativa a `%rbp`.
    fn address(&self, register: RegisterId) -> String {
        let offset = match self.cx.frame().home(register) {
            Home::Slot(offset) | Home::Area(offset) => offset,
        };

        format!("{}(%rbp)", offset as i64 - self.frame_size as i64)
    }

    /// Carga un valor entero, puntero o los bits de un flotante a un registro.
    fn load_gpr(&mut self, value: &Value, register: Reg) -> io::Result<()> {
        match value {
            Value::Register(virtual_register) => {
                let address = self.address(*virtual_register);

                match self.cx.frame().home(*virtual_register) {
                    Home::Area(_) => emit!(self, "leaq", "{}, %{}", address, register.quad()),
                    Home::Slot(_) if is_wide(self.cx.register_type(*virtual_register)) => {
                        emit!(self, "movq", "{}, %{}", address, register.quad())
                    }

                    Home::Slot(_) => emit!(self, "movl", "{}, %{}", address, register.dword()),
                }
            }

            Value::Constant(constant) => {
                let bits = match constant.ty {
                    Type::Float => constant.bits as u32 as i64,
                    Type::Char | Type::Int => constant.as_i32() as i64,
                    _ => 0,
                };

                if is_wide(&constant.ty) {
                    emit!(self, "movq", "${}, %{}", bits, register.quad())
                } else {
                    emit!(self, "movl", "${}, %{}", bits, register.dword())
                }
            }

            Value::Global(_) => {
                let name = self.cx.global_name(value).unwrap_or_default();
                emit!(self, "leaq", "{}(%rip), %{}", name, register.quad())
            }
        }
    }

    fn load_float(&mut self, value: &Value, number: u8) -> io::Result<()> {
        match value {
            Value::Register(register) => {
                let address = self.address(*register);
                emit!(self, "movss", "{}, %xmm{}", address, number)
            }

            _ => {
                self.load_gpr(value, Reg::Rax)?;
                emit!(self, "movd", "%eax, %xmm{}", number)
            }
        }
    }

    fn store_gpr(&mut self, dst: RegisterId, register: Reg) -> io::Result<()> {
        let address = self.address(dst);

        if is_wide(self.cx.register_type(dst)) {
            emit!(self, "movq", "%{}, {}", register.quad(), address)
        } else {
            emit!(self, "movl", "%{}, {}", register.dword(), address)
        }
    }

    fn store_float(&mut self, dst: RegisterId, number: u8) -> io::Result<()> {
        let address = self.address(dst);
        emit!(self, "movss", "%xmm{}, {}", number, address)
    }

    /// Los `char` se mantienen extendidos en signo a 32 bits.
    fn narrow(&mut self, ty: &Type) -> io::Result<()> {
        if *ty == Type::Char {
            emit!(self, "movsbl", "%al, %eax")?;
        }

        Ok(())
    }
}
