//! Validación estructural de la IR.
//!
//! Una falla aquí indica un defecto del compilador y no un error del
//! programa fuente, por lo cual nunca se reporta como diagnóstico.

use std::collections::HashMap;

use log::debug;
use thiserror::Error;

use super::{BlockId, Cfg, Function, FunctionBody, Instruction, Program, RegisterId, Value};
use crate::index::{Index, IndexVec};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("in `{function}`: block {block} does not end in a terminator")]
    MissingTerminator { function: String, block: BlockId },

    #[error("in `{function}`: block {block} has a terminator before its end")]
    EarlyTerminator { function: String, block: BlockId },

    #[error("in `{function}`: block {block} transfers control to nonexistent {target}")]
    BadTarget {
        function: String,
        block: BlockId,
        target: BlockId,
    },

    #[error("in `{function}`: block {block} is unreachable from the entry block")]
    Unreachable { function: String, block: BlockId },

    #[error("in `{function}`: register {register} is not declared")]
    UnknownRegister {
        function: String,
        register: RegisterId,
    },

    #[error("in `{function}`: register {register} is defined more than once")]
    Redefined {
        function: String,
        register: RegisterId,
    },

    #[error("in `{function}`: register {register} is used in {block} where its definition does not reach")]
    UseBeforeDefinition {
        function: String,
        register: RegisterId,
        block: BlockId,
    },

    #[error("in `{function}`: reference to nonexistent global or function")]
    BadReference { function: String },
}

/// Verifica todas las funciones definidas del programa.
pub fn verify(program: &Program) -> Result<(), VerifyError> {
    for function in &program.functions {
        if let FunctionBody::Generated(cfg) = &function.body {
            verify_function(program, function, cfg)?;
        }
    }

    debug!("IR verified: {} functions", program.functions.len());
    Ok(())
}

/// Sitio de definición de un registro.
#[derive(Copy, Clone)]
enum Site {
    /// Parámetros, definidos antes de la primera instrucción.
    Entry,
    At(BlockId, usize),
}

fn verify_function(program: &Program, function: &Function, cfg: &Cfg) -> Result<(), VerifyError> {
    let name = || function.name.clone();

    for block in &cfg.blocks {
        let last = block.instructions.len().checked_sub(1);
        for (i, instruction) in block.instructions.iter().enumerate() {
            if instruction.is_terminator() && Some(i) != last {
                return Err(VerifyError::EarlyTerminator {
                    function: name(),
                    block: block.id,
                });
            }

            for target in instruction.successors() {
                if cfg.blocks.get(target).is_none() {
                    return Err(VerifyError::BadTarget {
                        function: name(),
                        block: block.id,
                        target,
                    });
                }
            }

            let bad_reference = match instruction {
                Instruction::Call { callee, .. } => program.functions.get(*callee).is_none(),
                _ => instruction.operands().into_iter().any(|value| {
                    matches!(value, Value::Global(global) if program.globals.get(*global).is_none())
                }),
            };

            if bad_reference {
                return Err(VerifyError::BadReference { function: name() });
            }
        }

        if block.terminator().is_none() {
            return Err(VerifyError::MissingTerminator {
                function: name(),
                block: block.id,
            });
        }
    }

    let reachable = reachable(cfg);
    if let Some(block) = cfg.blocks.indices().find(|block| !reachable[block.index()]) {
        return Err(VerifyError::Unreachable {
            function: name(),
            block,
        });
    }

    // Cada registro se define exactamente una vez
    let mut definitions = HashMap::new();
    for parameter in &function.parameters {
        definitions.insert(*parameter, Site::Entry);
    }

    for block in &cfg.blocks {
        for (i, instruction) in block.instructions.iter().enumerate() {
            if let Some(register) = instruction.defined() {
                if function.registers.get(register).is_none() {
                    return Err(VerifyError::UnknownRegister {
                        function: name(),
                        register,
                    });
                }

                if definitions.insert(register, Site::At(block.id, i)).is_some() {
                    return Err(VerifyError::Redefined {
                        function: name(),
                        register,
                    });
                }
            }
        }
    }

    // Cada uso está dominado por su definición
    let dominators = dominators(cfg);
    for block in &cfg.blocks {
        for (i, instruction) in block.instructions.iter().enumerate() {
            for value in instruction.operands() {
                let register = match value {
                    Value::Register(register) => *register,
                    _ => continue,
                };

                let reaches = match definitions.get(&register) {
                    None => false,
                    Some(Site::Entry) => true,
                    Some(Site::At(defined_in, position)) if *defined_in == block.id => *position < i,
                    Some(Site::At(defined_in, _)) => {
                        dominators[block.id][defined_in.index()]
                    }
                };

                if !reaches {
                    return Err(VerifyError::UseBeforeDefinition {
                        function: name(),
                        register,
                        block: block.id,
                    });
                }
            }
        }
    }

    Ok(())
}

fn reachable(cfg: &Cfg) -> Vec<bool> {
    let mut reachable = vec![false; cfg.blocks.len()];
    let mut pending = vec![cfg.entry];

    while let Some(block) = pending.pop() {
        if std::mem::replace(&mut reachable[block.index()], true) {
            continue;
        }

        if let Some(terminator) = cfg.blocks[block].terminator() {
            pending.extend(terminator.successors());
        }
    }

    reachable
}

/// Conjuntos de dominadores por el método iterativo clásico.
fn dominators(cfg: &Cfg) -> IndexVec<BlockId, Vec<bool>> {
    let count = cfg.blocks.len();
    let predecessors: IndexVec<BlockId, Vec<BlockId>> = cfg
        .blocks
        .indices()
        .map(|block| cfg.predecessors(block))
        .collect();

    let mut dominators: IndexVec<BlockId, Vec<bool>> = cfg
        .blocks
        .indices()
        .map(|block| {
            let mut set = vec![block != cfg.entry; count];
            set[block.index()] = true;
            set
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;

        for block in cfg.blocks.indices().filter(|block| *block != cfg.entry) {
            let mut set = vec![true; count];
            for predecessor in &predecessors[block] {
                for (bit, dominates) in set.iter_mut().zip(&dominators[*predecessor]) {
                    *bit &= *dominates;
                }
            }

            set[block.index()] = true;
            if set != dominators[block] {
                dominators[block] = set;
                changed = true;
            }
        }
    }

    dominators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Block, CompareOp, Constant},
        ty::Type,
    };

    fn function(registers: Vec<Type>, blocks: Vec<Vec<Instruction>>) -> Program {
        let blocks = blocks
            .into_iter()
            .enumerate()
            .map(|(i, instructions)| Block {
                id: BlockId::new(i),
                instructions,
            })
            .collect();

        let mut program = Program::default();
        program.functions.push(Function {
            name: String::from("f"),
            parameters: vec![],
            return_type: Type::Int,
            registers: registers.into_iter().collect(),
            body: FunctionBody::Generated(Cfg {
                entry: BlockId::new(0),
                blocks,
            }),
        });

        program
    }

    fn r(index: usize) -> RegisterId {
        RegisterId::new(index)
    }

    fn b(index: usize) -> BlockId {
        BlockId::new(index)
    }

    #[test]
    fn accepts_diamond() {
        let program = function(
            vec![Type::Int, Type::Int],
            vec![
                vec![
                    Instruction::Compare {
                        op: CompareOp::Ne,
                        dst: r(0),
                        lhs: Value::Constant(Constant::int(1)),
                        rhs: Value::Constant(Constant::int(0)),
                    },
                    Instruction::Branch {
                        condition: Value::Register(r(0)),
                        positive: b(1),
                        negative: b(2),
                    },
                ],
                vec![Instruction::Jump(b(3))],
                vec![Instruction::Jump(b(3))],
                vec![Instruction::Return(Some(Value::Register(r(0))))],
            ],
        );

        assert!(verify(&program).is_ok());
    }

    #[test]
    fn rejects_missing_terminator() {
        let program = function(vec![], vec![vec![]]);
        assert!(matches!(
            verify(&program),
            Err(VerifyError::MissingTerminator { .. })
        ));
    }

    #[test]
    fn rejects_branch_to_nowhere() {
        let program = function(vec![], vec![vec![Instruction::Jump(b(7))]]);
        assert!(matches!(verify(&program), Err(VerifyError::BadTarget { .. })));
    }

    #[test]
    fn rejects_unreachable_block() {
        let program = function(
            vec![],
            vec![
                vec![Instruction::Return(None)],
                vec![Instruction::Return(None)],
            ],
        );

        assert!(matches!(verify(&program), Err(VerifyError::Unreachable { .. })));
    }

    #[test]
    fn rejects_use_on_a_path_without_definition() {
        let define = Instruction::Cast {
            dst: r(1),
            src: Value::Constant(Constant::int(2)),
        };

        let program = function(
            vec![Type::Int, Type::Float],
            vec![
                vec![
                    Instruction::Compare {
                        op: CompareOp::Eq,
                        dst: r(0),
                        lhs: Value::Constant(Constant::int(1)),
                        rhs: Value::Constant(Constant::int(0)),
                    },
                    Instruction::Branch {
                        condition: Value::Register(r(0)),
                        positive: b(1),
                        negative: b(2),
                    },
                ],
                vec![define, Instruction::Jump(b(2))],
                vec![Instruction::Return(Some(Value::Register(r(1))))],
            ],
        );

        assert!(matches!(
            verify(&program),
            Err(VerifyError::UseBeforeDefinition { .. })
        ));
    }

    #[test]
    fn rejects_double_definition() {
        let cast = Instruction::Cast {
            dst: r(0),
            src: Value::Constant(Constant::int(2)),
        };

        let program = function(
            vec![Type::Float],
            vec![vec![cast.clone(), cast, Instruction::Return(None)]],
        );

        assert!(matches!(verify(&program), Err(VerifyError::Redefined { .. })));
    }
}
