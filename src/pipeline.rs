//! Encadenamiento de fases.
//!
//! Un árbol sintáctico pasa por análisis semántico, generación de IR,
//! validación opcional de la IR y emisión de ensamblador. Ningún estado
//! sobrevive de una compilación a otra.

use std::io::{self, Write};

use bitflags::bitflags;
use log::{debug, info};
use thiserror::Error;

use crate::{
    ast,
    error::Diagnostics,
    ir::{self, verify::VerifyError},
    target::{self, Arch},
};

bitflags! {
    /// Opciones de compilación.
    pub struct Options: u32 {
        /// Reservado. No existe aún ninguna optimización.
        const OPTIMIZE = 0x01;

        /// Validar la IR antes de emitir código.
        const VERIFY = 0x02;
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::VERIFY
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub arch: Arch,
    pub options: Options,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            arch: Arch::X86_64,
            options: Options::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    /// El programa fuente no es válido.
    #[error("{0}")]
    Rejected(Diagnostics),

    /// Defecto del compilador.
    #[error("Internal compiler error: {0}")]
    Internal(#[from] VerifyError),

    #[error("I/O error")]
    Io(#[from] io::Error),
}

/// Analiza un programa y genera su IR.
pub fn lower(program: &ast::Program, config: &Config) -> Result<ir::Program, CompileError> {
    let analyzed = crate::semantic::analyze(program).map_err(|errors| {
        debug!("Semantic analysis failed with {} errors", errors.len());
        CompileError::Rejected(Diagnostics::from(errors).kind("Semantic error"))
    })?;

    let ir = ir::generate(&analyzed);

    if config.options.contains(Options::VERIFY) {
        ir::verify::verify(&ir)?;
    }

    Ok(ir)
}

/// Compila un programa completo hacia ensamblador.
pub fn compile<W: Write>(
    program: &ast::Program,
    config: &Config,
    output: &mut W,
) -> Result<(), CompileError> {
    let ir = lower(program, config)?;

    info!(
        "Compiling {} functions and {} globals for {}",
        ir.functions.len(),
        ir.globals.len(),
        config.arch
    );

    target::emit(&ir, config.arch, output)?;
    Ok(())
}
