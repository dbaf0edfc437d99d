//! Análisis semántico.
//!
//! Recorre el árbol sintáctico una sola vez, de arriba hacia abajo,
//! manteniendo una pila de ámbitos. Cada nombre se resuelve a su
//! declaración y cada expresión recibe exactamente un tipo. El árbol
//! no se modifica: los resultados se guardan en tablas indexadas por
//! [`NodeId`] dentro de [`Analyzed`].
//!
//! # Errores
//! Los errores no detienen el recorrido. En el punto de error se asume
//! el tipo esperado por el contexto (o `int`, si no hay ninguno) y el
//! análisis continúa, de manera que una sola ejecución reporte tantos
//! errores independientes como sea posible. El análisis es exitoso
//! únicamente si no se reportó ningún error, y solo en ese caso se
//! obtiene un [`Analyzed`], que es la única entrada que acepta la
//! generación de IR.

use std::collections::HashMap;

use log::{debug, trace};
use thiserror::Error;

use crate::{
    ast::{
        self, BinOp, Declaration, Expr, ExprKind, FunctionDecl, Identifier, Literal, NodeId,
        Statement, UnOp, VarDecl,
    },
    index::IndexVec,
    source::{Located, Location},
    ty::Type,
};

pub mod scope;

use scope::{Scopes, Storage, Symbol, SymbolId};

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Redefinition of `{0}` in the same scope")]
    Redefinition(Identifier),

    #[error("Type mismatch: expected `{0}`, found `{1}`")]
    ExpectedType(Type, Type),

    #[error("Type mismatch: expected a numeric type, found `{0}`")]
    ExpectedNumeric(Type),

    #[error("Type mismatch: expected `char` or `int`, found `{0}`")]
    ExpectedInteger(Type),

    #[error("Type mismatch: expected a numeric or pointer type, found `{0}`")]
    ExpectedScalar(Type),

    #[error("Type mismatch: expected a pointer or array, found `{0}`")]
    ExpectedPointer(Type),

    #[error("Cannot compare `{0}` with `{1}`")]
    Incomparable(Type, Type),

    #[error("Expected variable, found function `{0}`")]
    ExpectedVar(Identifier),

    #[error("`{0}` is not a function")]
    NotCallable(Identifier),

    #[error("Function `{name}` expects {expected} arguments, found {found}")]
    ArityMismatch {
        name: Identifier,
        expected: usize,
        found: usize,
    },

    #[error("Cannot take the address of a temporary value")]
    NotAddressable,

    #[error("Invalid assignment target")]
    NotAssignable,

    #[error("Function returning `{0}` must return a value")]
    MissingReturnValue(Type),

    #[error("Function returning `void` cannot return a value")]
    UnexpectedReturnValue,

    #[error("Variable `{0}` is declared `void`")]
    VoidVariable(Identifier),

    #[error("Global initializers must be constant literals")]
    NonConstantInitializer,
}

/// Un programa semánticamente válido junto con sus anotaciones.
pub struct Analyzed<'ast> {
    program: &'ast ast::Program,
    types: HashMap<NodeId, Type>,
    uses: HashMap<NodeId, SymbolId>,
    declarations: HashMap<NodeId, SymbolId>,
    symbols: IndexVec<SymbolId, Symbol>,
}

impl<'ast> Analyzed<'ast> {
    pub fn program(&self) -> &'ast ast::Program {
        self.program
    }

    /// Tipo resuelto de una expresión.
    pub fn type_of(&self, expr: NodeId) -> Option<&Type> {
        self.types.get(&expr)
    }

    /// Símbolo al que hace referencia un identificador o una llamada.
    pub fn resolution_of(&self, expr: NodeId) -> Option<SymbolId> {
        self.uses.get(&expr).copied()
    }

    /// Símbolo introducido por una declaración o parámetro.
    pub fn declaration_of(&self, node: NodeId) -> Option<SymbolId> {
        self.declarations.get(&node).copied()
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }
}

/// Valida un programa y anota sus expresiones con tipos.
pub fn analyze(program: &ast::Program) -> Result<Analyzed<'_>, Vec<Located<SemanticError>>> {
    let mut analyzer = Analyzer {
        scopes: Scopes::new(),
        types: HashMap::new(),
        uses: HashMap::new(),
        declarations: HashMap::new(),
        errors: Vec::new(),
        return_type: Type::Void,
    };

    // Primero se registran todas las firmas y globales, de manera que los
    // cuerpos puedan referirse a funciones declaradas más adelante
    for declaration in &program.declarations {
        match declaration {
            Declaration::Function(function) => analyzer.declare_function(function),
            Declaration::Variable(var) => analyzer.global_var(var),
        }
    }

    for declaration in &program.declarations {
        if let Declaration::Function(function) = declaration {
            analyzer.function(function);
        }
    }

    let Analyzer {
        scopes,
        types,
        uses,
        declarations,
        errors,
        ..
    } = analyzer;

    debug!(
        "semantic analysis: {} typed expressions, {} errors",
        types.len(),
        errors.len()
    );

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Analyzed {
        program,
        types,
        uses,
        declarations,
        symbols: scopes.into_symbols(),
    })
}

struct Analyzer {
    scopes: Scopes,
    types: HashMap<NodeId, Type>,
    uses: HashMap<NodeId, SymbolId>,
    declarations: HashMap<NodeId, SymbolId>,
    errors: Vec<Located<SemanticError>>,
    return_type: Type,
}

impl Analyzer {
    fn report(&mut self, error: SemanticError, location: &Location) {
        self.errors.push(Located::at(error, location.clone()));
    }

    fn declare(&mut self, name: &Located<Identifier>, ty: Type, storage: Storage, node: NodeId) {
        match self.scopes.declare(name.as_ref(), ty, storage, node) {
            Ok(symbol) => {
                self.declarations.insert(node, symbol);
            }

            Err(_) => self.report(
                SemanticError::Redefinition(name.as_ref().clone()),
                name.location(),
            ),
        }
    }

    fn declare_function(&mut self, function: &FunctionDecl) {
        // Aplica también a prototipos sin cuerpo
        for parameter in &function.parameters {
            if parameter.ty == Type::Void {
                self.report(
                    SemanticError::VoidVariable(parameter.name.as_ref().clone()),
                    parameter.name.location(),
                );
            }
        }

        let parameters = function
            .parameters
            .iter()
            .map(|parameter| parameter.ty.decay())
            .collect();

        let ty = Type::Function(parameters, Box::new(function.return_type.clone()));
        self.declare(&function.name, ty, Storage::Global, function.id);
    }

    fn global_var(&mut self, var: &VarDecl) {
        if let Some(initializer) = &var.initializer {
            if !is_constant(initializer) {
                self.report(SemanticError::NonConstantInitializer, &initializer.location);
            }
        }

        self.var(var, Storage::Global);
    }

    fn var(&mut self, var: &VarDecl, storage: Storage) {
        if var.ty == Type::Void {
            self.report(
                SemanticError::VoidVariable(var.name.as_ref().clone()),
                var.name.location(),
            );
        }

        if let Some(initializer) = &var.initializer {
            let found = self.expr(initializer, Some(&var.ty));

            if let Type::Array(..) = var.ty {
                self.report(SemanticError::NotAssignable, &initializer.location);
            } else if !found.promotes_to(&var.ty) {
                self.report(
                    SemanticError::ExpectedType(var.ty.clone(), found),
                    &initializer.location,
                );
            }
        }

        // El nombre entra en ámbito después de su inicializador
        self.declare(&var.name, var.ty.clone(), storage, var.id);
    }

    fn function(&mut self, function: &FunctionDecl) {
        let body = match &function.body {
            Some(body) => body,
            None => return,
        };

        trace!("analyzing function `{}`", function.name.as_ref());

        self.return_type = function.return_type.clone();
        self.scopes.push();

        for parameter in &function.parameters {
            let ty = parameter.ty.decay();
            self.declare(&parameter.name, ty, Storage::Parameter, parameter.id);
        }

        // El cuerpo comparte el ámbito de los parámetros, como en C
        for statement in &body.statements {
            self.statement(statement);
        }

        self.scopes.pop();
    }

    fn scoped<F: FnOnce(&mut Self)>(&mut self, inner: F) {
        self.scopes.push();
        inner(self);
        self.scopes.pop();
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Declaration(var) => self.var(var, Storage::Local),

            Statement::Block(block) => self.scoped(|this| {
                for statement in &block.statements {
                    this.statement(statement);
                }
            }),

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                self.condition(condition);
                self.scoped(|this| this.statement(then));

                if let Some(otherwise) = otherwise {
                    self.scoped(|this| this.statement(otherwise));
                }
            }

            Statement::While { condition, body } => {
                self.condition(condition);
                self.scoped(|this| this.statement(body));
            }

            Statement::For {
                init,
                condition,
                step,
                body,
            } => self.scoped(|this| {
                if let Some(init) = init {
                    this.statement(init);
                }

                if let Some(condition) = condition {
                    this.condition(condition);
                }

                if let Some(step) = step {
                    this.statement(step);
                }

                this.scoped(|this| this.statement(body));
            }),

            Statement::Return { value, location } => self.ret(value.as_ref(), location),

            Statement::Expr(expr) => {
                self.expr(expr, None);
            }

            Statement::Assignment { target, value } => {
                let target_type = self.expr(target, None);
                let assignable = is_addressable(target)
                    && !matches!(target_type, Type::Array(..) | Type::Function(..));

                let found = self.expr(value, Some(&target_type));

                if !assignable {
                    self.report(SemanticError::NotAssignable, &target.location);
                } else if !found.promotes_to(&target_type) {
                    self.report(
                        SemanticError::ExpectedType(target_type, found),
                        &value.location,
                    );
                }
            }
        }
    }

    fn ret(&mut self, value: Option<&Expr>, location: &Location) {
        let expected = self.return_type.clone();

        match (value, &expected) {
            (None, Type::Void) => (),

            (None, _) => self.report(SemanticError::MissingReturnValue(expected), location),

            (Some(value), Type::Void) => {
                self.expr(value, None);
                self.report(SemanticError::UnexpectedReturnValue, &value.location);
            }

            (Some(value), _) => {
                let found = self.expr(value, Some(&expected));
                if !found.promotes_to(&expected) {
                    self.report(SemanticError::ExpectedType(expected, found), &value.location);
                }
            }
        }
    }

    fn condition(&mut self, condition: &Expr) {
        let ty = self.expr(condition, None);
        if !ty.is_scalar() {
            self.report(SemanticError::ExpectedScalar(ty), &condition.location);
        }
    }

    /// Resuelve el tipo de una expresión y lo registra.
    ///
    /// `expected` es el tipo que el contexto espera, si lo hay, y se
    /// asume como resultado si la expresión es inválida.
    fn expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Type {
        let ty = match self.check(expr) {
            Ok(ty) => ty,
            Err(error) => {
                self.errors.push(error);
                expected.cloned().unwrap_or(Type::Int)
            }
        };

        self.types.insert(expr.id, ty.clone());
        ty
    }

    fn check(&mut self, expr: &Expr) -> Semantic<Type> {
        match &expr.kind {
            ExprKind::Literal(Literal::Int(_)) => Ok(Type::Int),
            ExprKind::Literal(Literal::Float(_)) => Ok(Type::Float),
            ExprKind::Literal(Literal::Char(_)) => Ok(Type::Char),
            ExprKind::Literal(Literal::Str(_)) => Ok(Type::pointer_to(Type::Char)),

            ExprKind::Identifier(name) => {
                let symbol = match self.scopes.lookup(name) {
                    Some(symbol) => symbol,
                    None => return error_at(SemanticError::Undefined(name.clone()), &expr.location),
                };

                let symbol_ref = self.scopes.symbol(symbol);
                if symbol_ref.is_function() {
                    return error_at(SemanticError::ExpectedVar(name.clone()), &expr.location);
                }

                let ty = symbol_ref.ty.clone();
                self.uses.insert(expr.id, symbol);

                Ok(ty)
            }

            ExprKind::Binary(op, lhs, rhs) => {
                let lhs_type = self.expr(lhs, None);
                let rhs_type = self.expr(rhs, None);

                if op.is_arithmetic() {
                    let operand_check: fn(&Type) -> bool = match op {
                        BinOp::Mod => Type::is_integer,
                        _ => Type::is_numeric,
                    };

                    for (operand, ty) in [(lhs, &lhs_type), (rhs, &rhs_type)] {
                        if !operand_check(ty) {
                            let error = match op {
                                BinOp::Mod => SemanticError::ExpectedInteger(ty.clone()),
                                _ => SemanticError::ExpectedNumeric(ty.clone()),
                            };

                            return error_at(error, &operand.location);
                        }
                    }

                    Ok(Type::common(&lhs_type, &rhs_type).unwrap_or(Type::Int))
                } else if op.is_comparison() {
                    let comparable = (lhs_type.is_numeric() && rhs_type.is_numeric())
                        || (lhs_type.is_pointer_like()
                            && rhs_type.is_pointer_like()
                            && lhs_type.decay() == rhs_type.decay());

                    if !comparable {
                        return error_at(
                            SemanticError::Incomparable(lhs_type, rhs_type),
                            &expr.location,
                        );
                    }

                    Ok(Type::Int)
                } else {
                    for (operand, ty) in [(lhs, &lhs_type), (rhs, &rhs_type)] {
                        if !ty.is_scalar() {
                            return error_at(
                                SemanticError::ExpectedScalar(ty.clone()),
                                &operand.location,
                            );
                        }
                    }

                    Ok(Type::Int)
                }
            }

            ExprKind::Unary(op, operand) => {
                let ty = self.expr(operand, None);
                match op {
                    UnOp::Negate if ty.is_numeric() => Ok(ty),
                    UnOp::Negate => error_at(SemanticError::ExpectedNumeric(ty), &operand.location),
                    UnOp::Not if ty.is_scalar() => Ok(Type::Int),
                    UnOp::Not => error_at(SemanticError::ExpectedScalar(ty), &operand.location),
                }
            }

            ExprKind::Call(callee, arguments) => self.call(expr, callee, arguments),

            ExprKind::Index(base, index) => {
                let base_type = self.expr(base, None);
                let index_type = self.expr(index, Some(&Type::Int));

                if !index_type.is_integer() {
                    self.report(SemanticError::ExpectedInteger(index_type), &index.location);
                }

                match base_type.pointee() {
                    Some(element) => Ok(element.clone()),
                    None => error_at(SemanticError::ExpectedPointer(base_type), &base.location),
                }
            }

            ExprKind::Deref(operand) => {
                let ty = self.expr(operand, None);
                match ty.pointee() {
                    Some(pointee) => Ok(pointee.clone()),
                    None => error_at(SemanticError::ExpectedPointer(ty), &operand.location),
                }
            }

            ExprKind::AddressOf(operand) => {
                let ty = self.expr(operand, None);
                if !is_addressable(operand) {
                    return error_at(SemanticError::NotAddressable, &operand.location);
                }

                Ok(Type::pointer_to(ty))
            }
        }
    }

    fn call(
        &mut self,
        expr: &Expr,
        callee: &Located<Identifier>,
        arguments: &[Expr],
    ) -> Semantic<Type> {
        let name = callee.as_ref();
        let symbol = self.scopes.lookup(name);

        let signature = symbol.map(|symbol| (symbol, self.scopes.symbol(symbol).ty.clone()));
        let (symbol, parameters, return_type) = match signature {
            Some((symbol, Type::Function(parameters, return_type))) => {
                (symbol, parameters, *return_type)
            }

            other => {
                // Los argumentos se analizan de todas formas para reportar sus errores
                for argument in arguments {
                    self.expr(argument, None);
                }

                let error = match other {
                    None => SemanticError::Undefined(name.clone()),
                    Some(_) => SemanticError::NotCallable(name.clone()),
                };

                return Err(Located::at(error, callee.location().clone()));
            }
        };

        self.uses.insert(expr.id, symbol);

        if parameters.len() != arguments.len() {
            for argument in arguments {
                self.expr(argument, None);
            }

            let error = SemanticError::ArityMismatch {
                name: name.clone(),
                expected: parameters.len(),
                found: arguments.len(),
            };

            return Err(Located::at(error, expr.location.clone()));
        }

        for (argument, parameter) in arguments.iter().zip(parameters.iter()) {
            let found = self.expr(argument, Some(parameter));
            if !found.promotes_to(parameter) {
                self.report(
                    SemanticError::ExpectedType(parameter.clone(), found),
                    &argument.location,
                );
            }
        }

        Ok(return_type)
    }
}

fn error_at<T>(error: SemanticError, location: &Location) -> Semantic<T> {
    Err(Located::at(error, location.clone()))
}

/// Una expresión denota una ubicación en memoria.
fn is_addressable(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Identifier(_) | ExprKind::Index(..) | ExprKind::Deref(_)
    )
}

/// Literales y literales numéricos negados.
fn is_constant(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Literal(_) => true,
        ExprKind::Unary(UnOp::Negate, operand) => matches!(
            operand.kind,
            ExprKind::Literal(Literal::Int(_) | Literal::Float(_) | Literal::Char(_))
        ),

        _ => false,
    }
}
