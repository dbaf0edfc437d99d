//! Back end de un compilador para un lenguaje pequeño similar a C.
//!
//! # Entrada
//! Un front end externo entrega una unidad de traducción completa como
//! un árbol sintáctico ([`ast`]). Este crate no analiza texto fuente.
//!
//! # Análisis semántico
//! El árbol se somete a resolución de nombres y verificación de tipos
//! en [`semantic`], con lo cual se obtiene un árbol anotado o una lista
//! de errores ubicados que [`error::Diagnostics`] sabe desplegar.
//!
//! # Representación intermedia
//! A partir del árbol anotado se construye en [`ir`] un grafo de control
//! de flujo por función, sobre registros virtuales de una sola
//! asignación. La IR puede validarse y desplegarse en forma textual.
//!
//! # Generación de código
//! En esta sección el compilador deja de ser agnóstico al sistema
//! objetivo. La IR se traduce a ensamblador de GNU en [`target`],
//! con implementaciones para x86-64 (System V) y Xtensa (`call0`).
//! [`pipeline`] encadena todas las fases.

#[macro_use]
mod macros;

pub mod ast;
pub mod error;
pub mod index;
pub mod ir;
pub mod pipeline;
pub mod semantic;
pub mod source;
pub mod ty;

mod arch;
mod codegen;

/// Emisión de código.
///
/// Este módulo reexporta suficientes ítems internos relacionados a generación de código para
/// traducir IR a alguna arquitectura en específico.
pub mod target {
    pub use crate::arch::{Arch, UnknownArch};
    pub use crate::codegen::emit;
}
