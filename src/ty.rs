//! Tipos del lenguaje.
//!
//! La igualdad entre tipos es estructural. Los tipos numéricos están
//! ordenados por rango (`char < int < float`) y solo se convierten
//! implícitamente hacia arriba en ese orden.

use std::fmt::{self, Display};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int,
    Float,
    Char,
    Pointer(Box<Type>),
    Array(Box<Type>, usize),
    Function(Vec<Type>, Box<Type>),
}

impl Type {
    pub fn pointer_to(pointee: Type) -> Type {
        Type::Pointer(Box::new(pointee))
    }

    pub fn array_of(element: Type, length: usize) -> Type {
        Type::Array(Box::new(element), length)
    }

    /// Rango numérico, `None` para tipos no numéricos.
    pub fn rank(&self) -> Option<u8> {
        match self {
            Type::Char => Some(0),
            Type::Int => Some(1),
            Type::Float => Some(2),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.rank().is_some()
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Char | Type::Int)
    }

    /// Punteros y arreglos, estos últimos tras decaer a puntero.
    pub fn is_pointer_like(&self) -> bool {
        matches!(self, Type::Pointer(_) | Type::Array(..))
    }

    /// Tipos con valor de verdad: cero o nulo es falso.
    pub fn is_scalar(&self) -> bool {
        self.is_numeric() || self.is_pointer_like()
    }

    /// Tipo apuntado por un puntero o tipo de elemento de un arreglo.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(pointee) | Type::Array(pointee, _) => Some(pointee),
            _ => None,
        }
    }

    /// Un arreglo decae a puntero a su primer elemento.
    pub fn decay(&self) -> Type {
        match self {
            Type::Array(element, _) => Type::Pointer(element.clone()),
            other => other.clone(),
        }
    }

    /// Determina si un valor de este tipo puede usarse donde se espera `target`.
    pub fn promotes_to(&self, target: &Type) -> bool {
        if self == target {
            return true;
        }

        match (self.rank(), target.rank()) {
            (Some(from), Some(to)) => from <= to,
            _ => matches!(self, Type::Array(..)) && &self.decay() == target,
        }
    }

    /// Tipo común de dos operandos numéricos.
    pub fn common(a: &Type, b: &Type) -> Option<Type> {
        match (a.rank(), b.rank()) {
            (Some(x), Some(y)) if x >= y => Some(a.clone()),
            (Some(_), Some(_)) => Some(b.clone()),
            _ => None,
        }
    }
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => fmt.write_str("void"),
            Type::Int => fmt.write_str("int"),
            Type::Float => fmt.write_str("float"),
            Type::Char => fmt.write_str("char"),
            Type::Pointer(pointee) => write!(fmt, "{}*", pointee),
            Type::Array(element, length) => write!(fmt, "{}[{}]", element, length),
            Type::Function(parameters, return_type) => {
                write!(fmt, "{}(", return_type)?;
                for (i, parameter) in parameters.iter().enumerate() {
                    if i > 0 {
                        fmt.write_str(", ")?;
                    }

                    write!(fmt, "{}", parameter)?;
                }

                fmt.write_str(")")
            }
        }
    }
}
