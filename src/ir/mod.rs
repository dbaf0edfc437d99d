//! Representación intermedia.
//!
//! Cada función definida es un grafo de control de flujo ([`Cfg`]) de
//! bloques básicos. Cada bloque es una secuencia de instrucciones que
//! termina en exactamente una instrucción terminadora (salto, salto
//! condicional o retorno). Las instrucciones operan sobre registros
//! virtuales de una sola asignación: cada registro se define una única
//! vez y tiene un tipo fijo. No existen nodos φ, ya que toda variable
//! del programa fuente reside en memoria de pila (`alloca`) y se accede
//! por medio de `load`/`store`.
//!
//! La IR se construye a partir de un árbol anotado en [`lower`], se
//! valida en [`verify`] y se despliega en forma textual en [`display`].

use crate::{index::IndexVec, ty::Type};

pub mod display;
pub mod lower;
pub mod verify;

pub use lower::generate;

simple_index! {
    /// Registro virtual, local a una función.
    pub struct RegisterId;
}

simple_index! {
    /// Bloque básico, local a una función.
    pub struct BlockId;
}

simple_index! {
    pub struct GlobalId;
}

simple_index! {
    pub struct FunctionId;
}

/// Constante tipada.
///
/// Los enteros se almacenan en complemento a dos truncado al ancho del
/// tipo, los flotantes como su representación IEEE 754 y los punteros
/// constantes (únicamente nulo) como cero.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: Type,
    pub bits: u64,
}

impl Constant {
    pub fn int(value: i32) -> Self {
        Constant {
            ty: Type::Int,
            bits: value as u32 as u64,
        }
    }

    pub fn char(value: i8) -> Self {
        Constant {
            ty: Type::Char,
            bits: value as u8 as u64,
        }
    }

    pub fn float(value: f32) -> Self {
        Constant {
            ty: Type::Float,
            bits: value.to_bits() as u64,
        }
    }

    /// Cero del tipo dado: `0`, `0.0` o nulo.
    pub fn zero(ty: &Type) -> Self {
        Constant {
            ty: ty.decay(),
            bits: 0,
        }
    }

    /// Valor entero con signo, para constantes `char` o `int`.
    pub fn as_i32(&self) -> i32 {
        match self.ty {
            Type::Char => self.bits as u8 as i8 as i32,
            _ => self.bits as u32 as i32,
        }
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.bits as u32)
    }

    /// Cambio de signo en tiempo de compilación.
    pub fn negate(&self) -> Self {
        match self.ty {
            Type::Float => Constant::float(-self.as_f32()),
            Type::Char => Constant::char((self.as_i32() as i8).wrapping_neg()),
            _ => Constant::int(self.as_i32().wrapping_neg()),
        }
    }

    /// Conversión numérica en tiempo de compilación.
    pub fn convert(&self, target: &Type) -> Self {
        match (&self.ty, target) {
            (from, to) if from == to => self.clone(),
            (Type::Float, Type::Int) => Constant::int(self.as_f32() as i32),
            (Type::Float, Type::Char) => Constant::char(self.as_f32() as i8),
            (_, Type::Float) => Constant::float(self.as_i32() as f32),
            (_, Type::Char) => Constant::char(self.as_i32() as i8),
            (_, Type::Int) => Constant::int(self.as_i32()),
            (_, other) => Constant::zero(other),
        }
    }
}

/// Operando de una instrucción.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Register(RegisterId),
    Constant(Constant),

    /// Dirección de un dato global.
    Global(GlobalId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Binary {
        op: BinaryOp,
        dst: RegisterId,
        lhs: Value,
        rhs: Value,
    },

    Unary {
        op: UnaryOp,
        dst: RegisterId,
        src: Value,
    },

    /// Conversión numérica hacia el tipo de `dst`.
    Cast {
        dst: RegisterId,
        src: Value,
    },

    /// Produce un `int` con valor 0 o 1.
    Compare {
        op: CompareOp,
        dst: RegisterId,
        lhs: Value,
        rhs: Value,
    },

    Load {
        dst: RegisterId,
        address: Value,
    },

    Store {
        address: Value,
        value: Value,
    },

    /// Reserva un área de pila para un valor de tipo `ty`. `dst` es su dirección.
    Alloca {
        dst: RegisterId,
        ty: Type,
    },

    /// Dirección del elemento `index` a partir de `base`. El tamaño de
    /// cada elemento es el del tipo apuntado por `dst`.
    ElementPtr {
        dst: RegisterId,
        base: Value,
        index: Value,
    },

    Call {
        dst: Option<RegisterId>,
        callee: FunctionId,
        arguments: Vec<Value>,
    },

    Branch {
        condition: Value,
        positive: BlockId,
        negative: BlockId,
    },

    Jump(BlockId),

    Return(Option<Value>),
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. } | Instruction::Jump(_) | Instruction::Return(_)
        )
    }

    /// Registro definido por esta instrucción, si alguno.
    pub fn defined(&self) -> Option<RegisterId> {
        use Instruction::*;

        match self {
            Binary { dst, .. }
            | Unary { dst, .. }
            | Cast { dst, .. }
            | Compare { dst, .. }
            | Load { dst, .. }
            | Alloca { dst, .. }
            | ElementPtr { dst, .. } => Some(*dst),

            Call { dst, .. } => *dst,
            Store { .. } | Branch { .. } | Jump(_) | Return(_) => None,
        }
    }

    /// Operandos leídos por esta instrucción.
    pub fn operands(&self) -> Vec<&Value> {
        use Instruction::*;

        match self {
            Binary { lhs, rhs, .. } | Compare { lhs, rhs, .. } => vec![lhs, rhs],
            Unary { src, .. } | Cast { src, .. } => vec![src],
            Load { address, .. } => vec![address],
            Store { address, value } => vec![address, value],
            ElementPtr { base, index, .. } => vec![base, index],
            Call { arguments, .. } => arguments.iter().collect(),
            Branch { condition, .. } => vec![condition],
            Return(value) => value.iter().collect(),
            Alloca { .. } | Jump(_) => Vec::new(),
        }
    }

    /// Bloques a los que puede transferir control.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instruction::Branch {
                positive, negative, ..
            } => vec![*positive, *negative],

            Instruction::Jump(target) => vec![*target],
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|instruction| instruction.is_terminator())
    }
}

/// Grafo de control de flujo. Los bloques están en orden de creación.
#[derive(Clone, Debug)]
pub struct Cfg {
    pub entry: BlockId,
    pub blocks: IndexVec<BlockId, Block>,
}

impl Cfg {
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|other| {
                other
                    .terminator()
                    .map_or(false, |terminator| terminator.successors().contains(&block))
            })
            .map(|other| other.id)
            .collect()
    }
}

#[derive(Clone, Debug)]
pub enum FunctionBody {
    /// Definida en otra unidad, no se genera código.
    External,
    Generated(Cfg),
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,

    /// Registros definidos a la entrada, uno por parámetro.
    pub parameters: Vec<RegisterId>,
    pub return_type: Type,
    pub registers: IndexVec<RegisterId, Type>,
    pub body: FunctionBody,
}

impl Function {
    pub fn is_external(&self) -> bool {
        matches!(self.body, FunctionBody::External)
    }

    pub fn cfg(&self) -> Option<&Cfg> {
        match &self.body {
            FunctionBody::Generated(cfg) => Some(cfg),
            FunctionBody::External => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Initializer {
    Zero,
    Scalar(Constant),

    /// Bytes de una cadena, sin el terminador nulo.
    String(Vec<u8>),

    /// Dirección de otro global.
    Address(GlobalId),
}

#[derive(Clone, Debug)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Initializer,
    pub constant: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub globals: IndexVec<GlobalId, Global>,
    pub functions: IndexVec<FunctionId, Function>,
}

impl Program {
    /// Tipo de un operando dentro de una función.
    pub fn type_of(&self, function: &Function, value: &Value) -> Type {
        match value {
            Value::Register(register) => function.registers[*register].clone(),
            Value::Constant(constant) => constant.ty.clone(),
            Value::Global(global) => Type::pointer_to(self.globals[*global].ty.clone()),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }
}
