//! Detalles específicos para cada arquitectura objetivo.
//!
//! Este módulo expone interfaces de generación de código
//! y de parámetros de arquitectura que son implementadas
//! por sus propios submódulos. En general, debe utilizarse
//! la macro `dispatch_arch!()` para acceder a estas
//! implementaciones.

use crate::{
    codegen::Context,
    ir::{BinaryOp, CompareOp, Function, RegisterId, UnaryOp, Value},
    ty::Type,
};

use std::{
    fmt::{self, Display},
    io,
    str::FromStr,
};

use thiserror::Error;

/// Arquitectura de procesador (ISA).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Xtensa,
}

impl Arch {
    /// Tamaño de un puntero, en bytes.
    pub fn pointer_size(self) -> u32 {
        dispatch_arch!(Target: self => <Target as Emitter>::VALUE_SIZE)
    }
}

#[derive(Error, Debug)]
#[error("Unknown target architecture `{0}`")]
pub struct UnknownArch(String);

impl FromStr for Arch {
    type Err = UnknownArch;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let is = |other| unicase::eq_ascii(name, other);

        if is("x86_64") || is("x86-64") {
            Ok(Arch::X86_64)
        } else if is("xtensa") {
            Ok(Arch::Xtensa)
        } else {
            Err(UnknownArch(name.to_string()))
        }
    }
}

impl Display for Arch {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86_64 => fmt.write_str("x86_64"),
            Arch::Xtensa => fmt.write_str("xtensa"),
        }
    }
}

mod x86_64;
mod xtensa;

pub use x86_64::Emitter as X86_64;
pub use xtensa::Emitter as Xtensa;

/// Emisión de código ensamblador para una función.
///
/// Los tipos que implementa ese trait traducen cada operación del
/// lenguaje intermedio a una secuencia fija de instrucciones de la
/// arquitectura objetivo. Todo registro virtual reside en una ranura
/// del frame, por lo cual cada plantilla carga sus operandos a
/// registros de trabajo, opera y guarda el resultado.
pub trait Emitter<'a>: Sized {
    /// Tamaño natural de un valor no tipado, en bytes. Es a la vez el
    /// tamaño de un puntero y el de cada ranura del frame.
    const VALUE_SIZE: u32;

    /// Alineación del punto de entrada de cada función.
    const FUNCTION_ALIGNMENT: u32;

    /// Tamaño de un valor de un tipo dado, en bytes.
    fn size_of(ty: &Type) -> u32 {
        match ty {
            Type::Void => 0,
            Type::Char => 1,
            Type::Int | Type::Float => 4,
            Type::Pointer(_) | Type::Function(..) => Self::VALUE_SIZE,
            Type::Array(element, length) => Self::size_of(element) * *length as u32,
        }
    }

    /// Directiva de datos para un escalar de `size` bytes.
    fn data_directive(size: u32) -> &'static str;

    /// Encabezado de la sección de código.
    fn text_header(output: &mut dyn io::Write) -> io::Result<()> {
        writeln!(output, ".text")
    }

    /// Construir a partir de un contexto de emisión.
    ///
    /// El prólogo de la función debe emitirse aquí, ajustando la pila,
    /// creando un stack frame y copiando parámetros a sus ranuras.
    fn new(cx: Context<'a>) -> io::Result<Self>;

    /// Obtiene el contexto de emisión.
    ///
    /// Implicado aquí que todo `Emitter` debe guardar as-is el [`Context`]
    /// que se le otorga en [`Emitter::new()`].
    fn cx(&mut self) -> &mut Context<'a>;

    fn binary(&mut self, op: BinaryOp, dst: RegisterId, lhs: &Value, rhs: &Value) -> io::Result<()>;

    fn unary(&mut self, op: UnaryOp, dst: RegisterId, src: &Value) -> io::Result<()>;

    /// Conversión numérica hacia el tipo de `dst`.
    fn cast(&mut self, dst: RegisterId, src: &Value) -> io::Result<()>;

    /// Comparación, `dst` recibe 0 o 1.
    fn compare(&mut self, op: CompareOp, dst: RegisterId, lhs: &Value, rhs: &Value)
        -> io::Result<()>;

    fn load(&mut self, dst: RegisterId, address: &Value) -> io::Result<()>;

    fn store(&mut self, address: &Value, value: &Value) -> io::Result<()>;

    fn element_ptr(&mut self, dst: RegisterId, base: &Value, index: &Value) -> io::Result<()>;

    /// Invocar a una función.
    ///
    /// El `Emitter` debe disponer los argumentos en los registros
    /// o ubicaciones correctas, llamar propiamente a la función,
    /// y opcionalmente guardar su valor de retorno en `dst`.
    fn call(&mut self, dst: Option<RegisterId>, target: &Function, arguments: &[Value])
        -> io::Result<()>;

    /// Saltar a `positive` si la condición es distinta de cero, o a `negative` si no.
    fn branch(&mut self, condition: &Value, positive: &str, negative: &str) -> io::Result<()>;

    /// Saltar incondicionalmente a una etiqueta.
    fn jump(&mut self, label: &str) -> io::Result<()>;

    /// Retorna de la función, emitiendo su epílogo.
    fn ret(&mut self, value: Option<&Value>) -> io::Result<()>;
}
