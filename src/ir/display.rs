//! Volcado textual de la IR.
//!
//! ```text
//! fn add(%0: int, %1: int) -> int {
//! bb0:
//!     %2: int* = alloca int
//!     store %2, %0
//!     %4: int = load %2
//!     ...
//!     ret %6
//! }
//! ```

use std::fmt::{self, Display, Formatter};

use super::{
    BinaryOp, BlockId, CompareOp, Constant, Function, FunctionBody, Initializer, Instruction,
    Program, RegisterId, UnaryOp, Value,
};

use crate::{index::Index, ty::Type};

impl Display for RegisterId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "%{}", self.index())
    }
}

impl Display for BlockId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "bb{}", self.index())
    }
}

impl Display for Constant {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Float => write!(fmt, "{:?}", self.as_f32()),
            Type::Int | Type::Char => write!(fmt, "{}", self.as_i32()),
            _ => fmt.write_str("null"),
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        };

        fmt.write_str(name)
    }
}

impl Display for UnaryOp {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => fmt.write_str("neg"),
        }
    }
}

impl Display for CompareOp {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        };

        fmt.write_str(name)
    }
}

/// Elemento de IR junto con el programa que le da nombre a globales y funciones.
struct Named<'a, T> {
    program: &'a Program,
    item: T,
}

impl Display for Named<'_, &Value> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self.item {
            Value::Register(register) => write!(fmt, "{}", register),
            Value::Constant(constant) => write!(fmt, "{}", constant),
            Value::Global(global) => write!(fmt, "@{}", self.program.globals[*global].name),
        }
    }
}

impl Display for Named<'_, (&Function, &Instruction)> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        let (function, instruction) = self.item;
        let value = |value| Named {
            program: self.program,
            item: value,
        };

        if let Some(dst) = instruction.defined() {
            write!(fmt, "{}: {} = ", dst, function.registers[dst])?;
        }

        match instruction {
            Binary { op, lhs, rhs, .. } => write!(fmt, "{} {}, {}", op, value(lhs), value(rhs)),
            Unary { op, src, .. } => write!(fmt, "{} {}", op, value(src)),
            Cast { src, .. } => write!(fmt, "cast {}", value(src)),
            Compare { op, lhs, rhs, .. } => {
                write!(fmt, "cmp {} {}, {}", op, value(lhs), value(rhs))
            }

            Load { address, .. } => write!(fmt, "load {}", value(address)),
            Store { address, value: stored } => {
                write!(fmt, "store {}, {}", value(address), value(stored))
            }

            Alloca { ty, .. } => write!(fmt, "alloca {}", ty),
            ElementPtr { base, index, .. } => {
                write!(fmt, "elementptr {}, {}", value(base), value(index))
            }

            Call {
                callee, arguments, ..
            } => {
                write!(fmt, "call {}(", self.program.functions[*callee].name)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        fmt.write_str(", ")?;
                    }

                    write!(fmt, "{}", value(argument))?;
                }

                fmt.write_str(")")
            }

            Branch {
                condition,
                positive,
                negative,
            } => write!(fmt, "br {}, {}, {}", value(condition), positive, negative),

            Jump(target) => write!(fmt, "jmp {}", target),
            Return(Some(returned)) => write!(fmt, "ret {}", value(returned)),
            Return(None) => fmt.write_str("ret"),
        }
    }
}

impl Display for Program {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            write!(fmt, "@{}: {} = ", global.name, global.ty)?;

            match &global.init {
                Initializer::Zero => fmt.write_str("zeroinit")?,
                Initializer::Scalar(constant) => write!(fmt, "{}", constant)?,
                Initializer::String(bytes) => {
                    write!(fmt, "\"{}\"", bytes.escape_ascii())?;
                }

                Initializer::Address(target) => write!(fmt, "@{}", self.globals[*target].name)?,
            }

            if global.constant {
                fmt.write_str(" (constant)")?;
            }

            writeln!(fmt)?;
        }

        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 || !self.globals.is_empty() {
                writeln!(fmt)?;
            }

            let keyword = match function.body {
                FunctionBody::External => "extern fn",
                FunctionBody::Generated(_) => "fn",
            };

            write!(fmt, "{} {}(", keyword, function.name)?;
            for (i, parameter) in function.parameters.iter().enumerate() {
                if i > 0 {
                    fmt.write_str(", ")?;
                }

                write!(fmt, "{}: {}", parameter, function.registers[*parameter])?;
            }

            write!(fmt, ") -> {}", function.return_type)?;

            let cfg = match &function.body {
                FunctionBody::Generated(cfg) => cfg,
                FunctionBody::External => {
                    writeln!(fmt)?;
                    continue;
                }
            };

            writeln!(fmt, " {{")?;
            for block in &cfg.blocks {
                writeln!(fmt, "{}:", block.id)?;

                for instruction in &block.instructions {
                    let named = Named {
                        program: self,
                        item: (function, instruction),
                    };

                    writeln!(fmt, "    {}", named)?;
                }
            }

            writeln!(fmt, "}}")?;
        }

        Ok(())
    }
}
