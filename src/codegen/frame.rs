//! Disposición del stack frame.
//!
//! Todo registro virtual tiene una ranura propia en el frame. Los
//! registros definidos por `alloca` no tienen ranura: su valor es la
//! dirección de un área reservada dentro del mismo frame, la cual se
//! calcula relativa al frame en vez de guardarse.
//!
//! Los desplazamientos son relativos a la base del área de locales y
//! crecen hacia direcciones altas. Cada arquitectura decide dónde se
//! ubica esa base respecto a su registro de frame o de pila.

use crate::{
    index::IndexVec,
    ir::{Cfg, Function, Instruction, RegisterId},
    ty::Type,
};

/// Ubicación de un registro virtual.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Home {
    /// El valor del registro reside en esta ranura.
    Slot(u32),

    /// El registro es la dirección de esta área.
    Area(u32),
}

#[derive(Debug)]
pub struct Frame {
    homes: IndexVec<RegisterId, Home>,
    locals: u32,
    stack_arguments: u32,
}

impl Frame {
    /// Calcula la disposición de una función. `slot` es el tamaño de cada
    /// ranura y a la vez la alineación de cada área.
    pub fn layout<F>(function: &Function, cfg: &Cfg, slot: u32, size_of: F) -> Frame
    where
        F: Fn(&Type) -> u32,
    {
        let mut areas = IndexVec::<RegisterId, Option<&Type>>::new();
        for _ in function.registers.iter() {
            areas.push(None);
        }

        let mut stack_arguments = 0;
        for instruction in cfg.blocks.iter().flat_map(|block| &block.instructions) {
            match instruction {
                Instruction::Alloca { dst, ty } => areas[*dst] = Some(ty),
                Instruction::Call { arguments, .. } => {
                    stack_arguments = stack_arguments.max(arguments.len().saturating_sub(6) as u32);
                }

                _ => (),
            }
        }

        let mut cursor = 0;
        let homes = areas
            .iter()
            .map(|area| {
                let offset = cursor;
                match area {
                    None => {
                        cursor += slot;
                        Home::Slot(offset)
                    }

                    Some(ty) => {
                        cursor += align(size_of(ty).max(1), slot);
                        Home::Area(offset)
                    }
                }
            })
            .collect();

        Frame {
            homes,
            locals: cursor,
            stack_arguments,
        }
    }

    pub fn home(&self, register: RegisterId) -> Home {
        self.homes[register]
    }

    /// Tamaño total de ranuras y áreas, en bytes.
    pub fn locals(&self) -> u32 {
        self.locals
    }

    /// Máxima cantidad de argumentos que alguna llamada pasa por pila,
    /// suponiendo seis registros de argumentos.
    pub fn stack_arguments(&self) -> u32 {
        self.stack_arguments
    }
}

/// Redondea hacia arriba a un múltiplo de `to`.
pub fn align(value: u32, to: u32) -> u32 {
    (value + to - 1) / to * to
}
