//! Generación de IR a partir de un programa analizado.
//!
//! La generación es total: todo programa aceptado por el análisis
//! semántico produce IR válida. Cualquier inconsistencia entre el
//! árbol y sus anotaciones es un defecto interno y provoca un pánico.

use std::collections::HashMap;

use log::{debug, trace};

use super::{
    BinaryOp, Block, BlockId, Cfg, CompareOp, Constant, Function, FunctionBody, FunctionId,
    Global, GlobalId, Initializer, Instruction, Program, RegisterId, UnaryOp, Value,
};

use crate::{
    ast::{self, BinOp, Declaration, Expr, ExprKind, Literal, NodeId, Statement, UnOp},
    index::IndexVec,
    semantic::{scope::SymbolId, Analyzed},
    ty::Type,
};

/// Genera la IR de un programa semánticamente válido.
pub fn generate(analyzed: &Analyzed<'_>) -> Program {
    let mut generator = Generator {
        analyzed,
        program: Program::default(),
        strings: HashMap::new(),
        globals: HashMap::new(),
        functions: HashMap::new(),
    };

    let declarations = &analyzed.program().declarations;

    for declaration in declarations {
        match declaration {
            Declaration::Variable(var) => generator.global(var),
            Declaration::Function(function) => generator.declare_function(function),
        }
    }

    for declaration in declarations {
        if let Declaration::Function(function) = declaration {
            generator.define_function(function);
        }
    }

    debug!(
        "IR generated: {} globals, {} functions",
        generator.program.globals.len(),
        generator.program.functions.len()
    );

    generator.program
}

struct Generator<'a, 'ast> {
    analyzed: &'a Analyzed<'ast>,
    program: Program,
    strings: HashMap<Vec<u8>, GlobalId>,
    globals: HashMap<SymbolId, GlobalId>,
    functions: HashMap<SymbolId, FunctionId>,
}

impl Generator<'_, '_> {
    fn symbol_of(&self, node: NodeId) -> SymbolId {
        self.analyzed
            .declaration_of(node)
            .expect("declaration without symbol")
    }

    /// Obtiene o crea el global constante de una cadena literal.
    fn string(&mut self, text: &str) -> GlobalId {
        let bytes = text.as_bytes().to_vec();
        if let Some(global) = self.strings.get(&bytes) {
            return *global;
        }

        let global = self.program.globals.push(Global {
            name: format!(".LC{}", self.strings.len()),
            ty: Type::array_of(Type::Char, bytes.len() + 1),
            init: Initializer::String(bytes.clone()),
            constant: true,
        });

        self.strings.insert(bytes, global);
        global
    }

    fn global(&mut self, var: &ast::VarDecl) {
        let init = match &var.initializer {
            None => Initializer::Zero,
            Some(Expr {
                kind: ExprKind::Literal(Literal::Str(text)),
                ..
            }) => Initializer::Address(self.string(text)),

            Some(expr) => Initializer::Scalar(constant_initializer(expr).convert(&var.ty)),
        };

        let global = self.program.globals.push(Global {
            name: var.name.as_ref().to_string(),
            ty: var.ty.clone(),
            init,
            constant: false,
        });

        let symbol = self.symbol_of(var.id);
        self.globals.insert(symbol, global);
    }

    fn declare_function(&mut self, function: &ast::FunctionDecl) {
        let mut registers = IndexVec::new();
        let parameters = function
            .parameters
            .iter()
            .map(|parameter| registers.push(parameter.ty.decay()))
            .collect();

        let id = self.program.functions.push(Function {
            name: function.name.as_ref().to_string(),
            parameters,
            return_type: function.return_type.clone(),
            registers,
            body: FunctionBody::External,
        });

        let symbol = self.symbol_of(function.id);
        self.functions.insert(symbol, id);
    }

    fn define_function(&mut self, function: &ast::FunctionDecl) {
        let body = match &function.body {
            Some(body) => body,
            None => return,
        };

        let id = self.functions[&self.symbol_of(function.id)];
        let registers = self.program.functions[id].registers.clone();
        let parameters = self.program.functions[id].parameters.clone();

        trace!("lowering function `{}`", function.name.as_ref());

        let mut lowering = FunctionLowering {
            generator: &mut *self,
            return_type: function.return_type.clone(),
            registers,
            blocks: IndexVec::new(),
            allocas: Vec::new(),
            current: None,
            slots: HashMap::new(),
        };

        let entry = lowering.new_block();
        lowering.current = Some(entry);

        // Cada parámetro se copia a su propia ranura de pila
        for (parameter, register) in function.parameters.iter().zip(parameters) {
            let ty = lowering.registers[register].clone();
            let slot = lowering.alloca(ty);

            let symbol = lowering.generator.symbol_of(parameter.id);
            lowering.slots.insert(symbol, slot);
            lowering.push(Instruction::Store {
                address: Value::Register(slot),
                value: Value::Register(register),
            });
        }

        for statement in &body.statements {
            lowering.statement(statement);
        }

        // Retorno implícito al caer fuera del cuerpo
        if lowering.current.is_some() {
            let value = match &lowering.return_type {
                Type::Void => None,
                ty => Some(Value::Constant(Constant::zero(ty))),
            };

            lowering.terminate(Instruction::Return(value));
        }

        let FunctionLowering {
            registers,
            mut blocks,
            allocas,
            ..
        } = lowering;

        let mut instructions = allocas;
        instructions.append(&mut blocks[entry].instructions);
        blocks[entry].instructions = instructions;

        let function = &mut self.program.functions[id];
        function.registers = registers;
        function.body = FunctionBody::Generated(Cfg { entry, blocks });
    }
}

struct FunctionLowering<'g, 'a, 'ast> {
    generator: &'g mut Generator<'a, 'ast>,
    return_type: Type,
    registers: IndexVec<RegisterId, Type>,
    blocks: IndexVec<BlockId, Block>,

    /// Reservas de pila, se colocan al inicio del bloque de entrada.
    allocas: Vec<Instruction>,

    /// Bloque abierto. `None` tras un terminador: lo que sigue es inalcanzable.
    current: Option<BlockId>,
    slots: HashMap<SymbolId, RegisterId>,
}

impl FunctionLowering<'_, '_, '_> {
    fn type_of(&self, expr: &Expr) -> Type {
        self.generator
            .analyzed
            .type_of(expr.id)
            .cloned()
            .expect("expression without type")
    }

    fn resolution_of(&self, expr: &Expr) -> SymbolId {
        self.generator
            .analyzed
            .resolution_of(expr.id)
            .expect("unresolved identifier")
    }

    fn new_register(&mut self, ty: Type) -> RegisterId {
        self.registers.push(ty)
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.blocks.next_index();
        self.blocks.push(Block {
            id,
            instructions: Vec::new(),
        })
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    fn push(&mut self, instruction: Instruction) {
        if let Some(block) = self.current {
            self.blocks[block].instructions.push(instruction);
        }
    }

    fn terminate(&mut self, instruction: Instruction) {
        self.push(instruction);
        self.current = None;
    }

    fn alloca(&mut self, ty: Type) -> RegisterId {
        let dst = self.new_register(Type::pointer_to(ty.clone()));
        self.allocas.push(Instruction::Alloca { dst, ty });
        dst
    }

    fn statement(&mut self, statement: &Statement) {
        if self.current.is_none() {
            return;
        }

        match statement {
            Statement::Declaration(var) => {
                let slot = self.alloca(var.ty.clone());
                if let Some(initializer) = &var.initializer {
                    let value = self.expr_as(initializer, &var.ty);
                    self.push(Instruction::Store {
                        address: Value::Register(slot),
                        value,
                    });
                }

                // Se enlaza tras el inicializador, que puede referirse a un nombre externo
                let symbol = self.generator.symbol_of(var.id);
                self.slots.insert(symbol, slot);
            }

            Statement::Block(block) => {
                for statement in &block.statements {
                    self.statement(statement);
                }
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => self.if_else(condition, then, otherwise.as_deref()),

            Statement::While { condition, body } => self.lower_loop(Some(condition), None, body),

            Statement::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.statement(init);
                }

                self.lower_loop(condition.as_ref(), step.as_deref(), body);
            }

            Statement::Return { value, .. } => {
                let return_type = self.return_type.clone();
                let value = value.as_ref().map(|value| self.expr_as(value, &return_type));
                self.terminate(Instruction::Return(value));
            }

            Statement::Expr(expr) => match &expr.kind {
                ExprKind::Call(..) => {
                    self.call(expr);
                }

                _ => {
                    self.expr(expr);
                }
            },

            Statement::Assignment { target, value } => {
                let target_type = self.type_of(target);
                let address = self.address(target);
                let value = self.expr_as(value, &target_type);

                self.push(Instruction::Store { address, value });
            }
        }
    }

    fn if_else(&mut self, condition: &Expr, then: &Statement, otherwise: Option<&Statement>) {
        let then_block = self.new_block();
        let (else_block, mut join) = match otherwise {
            Some(_) => (self.new_block(), None),
            None => {
                let join = self.new_block();
                (join, Some(join))
            }
        };

        self.branch(condition, then_block, else_block);

        self.switch_to(then_block);
        self.statement(then);
        let then_end = self.current;

        let else_end = match otherwise {
            Some(otherwise) => {
                self.switch_to(else_block);
                self.statement(otherwise);
                self.current
            }

            None => None,
        };

        // El bloque de unión solo existe si algún brazo continúa
        for open in [then_end, else_end].into_iter().flatten() {
            let target = *join.get_or_insert_with(|| self.new_block());

            self.switch_to(open);
            self.terminate(Instruction::Jump(target));
        }

        self.current = join;
    }

    /// `while` y `for`. Un ciclo sin condición no tiene bloque de salida.
    fn lower_loop(&mut self, condition: Option<&Expr>, step: Option<&Statement>, body: &Statement) {
        let header = self.new_block();
        self.terminate(Instruction::Jump(header));
        self.switch_to(header);

        let exit = match condition {
            Some(condition) => {
                let body_block = self.new_block();
                let exit = self.new_block();

                self.branch(condition, body_block, exit);
                self.switch_to(body_block);

                Some(exit)
            }

            None => None,
        };

        self.statement(body);
        if let Some(step) = step {
            self.statement(step);
        }

        if self.current.is_some() {
            self.terminate(Instruction::Jump(header));
        }

        self.current = exit;
    }

    /// Salto condicional según el valor de verdad de una expresión.
    fn branch(&mut self, condition: &Expr, positive: BlockId, negative: BlockId) {
        let condition = self.truth(condition);
        self.terminate(Instruction::Branch {
            condition,
            positive,
            negative,
        });
    }

    /// Valor de verdad (`int` 0 o 1) de una expresión escalar.
    fn truth(&mut self, expr: &Expr) -> Value {
        match &expr.kind {
            ExprKind::Binary(op, ..) if op.is_comparison() || op.is_logical() => self.expr(expr),
            ExprKind::Unary(UnOp::Not, _) => self.expr(expr),
            _ => {
                let ty = self.type_of(expr).decay();
                let value = self.expr(expr);

                self.compare(CompareOp::Ne, value, Value::Constant(Constant::zero(&ty)))
            }
        }
    }

    fn compare(&mut self, op: CompareOp, lhs: Value, rhs: Value) -> Value {
        let dst = self.new_register(Type::Int);
        self.push(Instruction::Compare { op, dst, lhs, rhs });

        Value::Register(dst)
    }

    /// Evalúa una expresión y la promueve al tipo esperado.
    fn expr_as(&mut self, expr: &Expr, target: &Type) -> Value {
        let from = self.type_of(expr).decay();
        let value = self.expr(expr);

        self.convert(value, &from, target)
    }

    fn convert(&mut self, value: Value, from: &Type, to: &Type) -> Value {
        if from == to || !from.is_numeric() || !to.is_numeric() {
            return value;
        }

        let dst = self.new_register(to.clone());
        self.push(Instruction::Cast { dst, src: value });

        Value::Register(dst)
    }

    fn expr(&mut self, expr: &Expr) -> Value {
        match &expr.kind {
            ExprKind::Literal(literal) => match literal {
                Literal::Int(value) => Value::Constant(Constant::int(*value)),
                Literal::Float(value) => Value::Constant(Constant::float(*value)),
                Literal::Char(value) => Value::Constant(Constant::char(*value as i8)),
                Literal::Str(text) => {
                    let global = self.generator.string(text);
                    self.element_ptr(Type::Char, Value::Global(global), 0)
                }
            },

            ExprKind::Identifier(_) => {
                let address = self.address(expr);
                self.read(address, &self.type_of(expr))
            }

            ExprKind::Binary(op, lhs, rhs) if op.is_logical() => self.logical(*op, lhs, rhs),

            ExprKind::Binary(op, lhs, rhs) if op.is_comparison() => {
                let (lhs_type, rhs_type) = (self.type_of(lhs).decay(), self.type_of(rhs).decay());
                let operand_type = Type::common(&lhs_type, &rhs_type).unwrap_or(lhs_type);

                let lhs = self.expr_as(lhs, &operand_type);
                let rhs = self.expr_as(rhs, &operand_type);

                let op = match op {
                    BinOp::Equal => CompareOp::Eq,
                    BinOp::NotEqual => CompareOp::Ne,
                    BinOp::Less => CompareOp::Lt,
                    BinOp::LessOrEqual => CompareOp::Le,
                    BinOp::Greater => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };

                self.compare(op, lhs, rhs)
            }

            ExprKind::Binary(op, lhs, rhs) => {
                let ty = self.type_of(expr);
                let lhs = self.expr_as(lhs, &ty);
                let rhs = self.expr_as(rhs, &ty);

                let op = match op {
                    BinOp::Add => BinaryOp::Add,
                    BinOp::Sub => BinaryOp::Sub,
                    BinOp::Mul => BinaryOp::Mul,
                    BinOp::Div => BinaryOp::Div,
                    _ => BinaryOp::Mod,
                };

                let dst = self.new_register(ty);
                self.push(Instruction::Binary { op, dst, lhs, rhs });

                Value::Register(dst)
            }

            ExprKind::Unary(UnOp::Negate, operand) => {
                let src = self.expr(operand);
                let dst = self.new_register(self.type_of(expr));
                self.push(Instruction::Unary {
                    op: UnaryOp::Neg,
                    dst,
                    src,
                });

                Value::Register(dst)
            }

            ExprKind::Unary(UnOp::Not, operand) => {
                let ty = self.type_of(operand).decay();
                let value = self.expr(operand);

                self.compare(CompareOp::Eq, value, Value::Constant(Constant::zero(&ty)))
            }

            ExprKind::Call(..) => self.call(expr).expect("void call used as a value"),

            ExprKind::Index(..) | ExprKind::Deref(_) => {
                let address = self.address(expr);
                self.read(address, &self.type_of(expr))
            }

            ExprKind::AddressOf(operand) => self.address(operand),
        }
    }

    /// `&&` y `||` con cortocircuito. El resultado pasa por una ranura de
    /// pila para no requerir nodos φ.
    fn logical(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Value {
        let slot = self.alloca(Type::Int);

        let lhs = self.truth(lhs);
        self.push(Instruction::Store {
            address: Value::Register(slot),
            value: lhs.clone(),
        });

        let rhs_block = self.new_block();
        let end = self.new_block();

        let (positive, negative) = match op {
            BinOp::And => (rhs_block, end),
            _ => (end, rhs_block),
        };

        self.terminate(Instruction::Branch {
            condition: lhs,
            positive,
            negative,
        });

        self.switch_to(rhs_block);
        let rhs = self.truth(rhs);
        self.push(Instruction::Store {
            address: Value::Register(slot),
            value: rhs,
        });

        self.terminate(Instruction::Jump(end));
        self.switch_to(end);

        let dst = self.new_register(Type::Int);
        self.push(Instruction::Load {
            dst,
            address: Value::Register(slot),
        });

        Value::Register(dst)
    }

    /// Llamada a función. `None` si la función retorna `void`.
    fn call(&mut self, expr: &Expr) -> Option<Value> {
        let arguments = match &expr.kind {
            ExprKind::Call(_, arguments) => arguments,
            _ => unreachable!("not a call"),
        };

        let callee = self.generator.functions[&self.resolution_of(expr)];
        let function = &self.generator.program.functions[callee];

        let parameter_types: Vec<Type> = function
            .parameters
            .iter()
            .map(|parameter| function.registers[*parameter].clone())
            .collect();

        let return_type = function.return_type.clone();

        let arguments = arguments
            .iter()
            .zip(&parameter_types)
            .map(|(argument, ty)| self.expr_as(argument, ty))
            .collect();

        let dst = match return_type {
            Type::Void => None,
            ty => Some(self.new_register(ty)),
        };

        self.push(Instruction::Call {
            dst,
            callee,
            arguments,
        });

        dst.map(Value::Register)
    }

    /// Dirección de una expresión designadora de memoria.
    fn address(&mut self, expr: &Expr) -> Value {
        match &expr.kind {
            ExprKind::Identifier(_) => {
                let symbol = self.resolution_of(expr);
                match self.slots.get(&symbol) {
                    Some(slot) => Value::Register(*slot),
                    None => Value::Global(self.generator.globals[&symbol]),
                }
            }

            ExprKind::Index(base, index) => {
                let element = self.type_of(expr);
                let base = match self.type_of(base) {
                    Type::Array(..) => self.address(base),
                    _ => self.expr(base),
                };

                let index = self.expr_as(index, &Type::Int);
                let dst = self.new_register(Type::pointer_to(element));
                self.push(Instruction::ElementPtr { dst, base, index });

                Value::Register(dst)
            }

            ExprKind::Deref(operand) => self.expr(operand),

            _ => unreachable!("expression does not designate memory"),
        }
    }

    /// Lee un valor de memoria. Los arreglos decaen a la dirección de su primer elemento.
    fn read(&mut self, address: Value, ty: &Type) -> Value {
        match ty {
            Type::Array(element, _) => self.element_ptr((**element).clone(), address, 0),
            ty => {
                let dst = self.new_register(ty.clone());
                self.push(Instruction::Load { dst, address });

                Value::Register(dst)
            }
        }
    }

    fn element_ptr(&mut self, element: Type, base: Value, index: i32) -> Value {
        let dst = self.new_register(Type::pointer_to(element));
        self.push(Instruction::ElementPtr {
            dst,
            base,
            index: Value::Constant(Constant::int(index)),
        });

        Value::Register(dst)
    }
}

/// Valor de un inicializador global: un literal, posiblemente negado.
fn constant_initializer(expr: &Expr) -> Constant {
    let (negate, literal) = match &expr.kind {
        ExprKind::Unary(UnOp::Negate, operand) => (true, &operand.kind),
        kind => (false, kind),
    };

    let constant = match literal {
        ExprKind::Literal(Literal::Int(value)) => Constant::int(*value),
        ExprKind::Literal(Literal::Float(value)) => Constant::float(*value),
        ExprKind::Literal(Literal::Char(value)) => Constant::char(*value as i8),
        _ => unreachable!("non-constant global initializer"),
    };

    if negate {
        constant.negate()
    } else {
        constant
    }
}

#[cfg(test)]
mod tests;
