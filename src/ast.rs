//! Árbol sintáctico.
//!
//! El front end entrega una unidad de traducción completa como un
//! [`Program`]. El árbol es inmutable: las fases posteriores no lo
//! modifican, sino que asocian información a sus nodos mediante tablas
//! externas indexadas por [`NodeId`]. Cada expresión y cada declaración
//! tiene un identificador único dentro del programa.

use std::{
    cell::Cell,
    fmt::{self, Display},
    rc::Rc,
};

use crate::{
    source::{Located, Location, Position, Source},
    ty::Type,
};

simple_index! {
    /// Identidad de un nodo del árbol.
    pub struct NodeId;
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(fmt)
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

#[derive(Debug)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

#[derive(Debug)]
pub enum Declaration {
    Function(FunctionDecl),
    Variable(VarDecl),
}

/// Declaración de función. Sin cuerpo, la función es externa.
#[derive(Debug)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub name: Located<Identifier>,
    pub parameters: Vec<Parameter>,
    pub return_type: Type,
    pub body: Option<Block>,
}

#[derive(Debug)]
pub struct Parameter {
    pub id: NodeId,
    pub name: Located<Identifier>,
    pub ty: Type,
}

#[derive(Debug)]
pub struct VarDecl {
    pub id: NodeId,
    pub name: Located<Identifier>,
    pub ty: Type,
    pub initializer: Option<Expr>,
}

#[derive(Debug)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub location: Location,
}

#[derive(Debug)]
pub enum Statement {
    Declaration(VarDecl),

    Block(Block),

    If {
        condition: Expr,
        then: Box<Statement>,
        otherwise: Option<Box<Statement>>,
    },

    While {
        condition: Expr,
        body: Box<Statement>,
    },

    For {
        init: Option<Box<Statement>>,
        condition: Option<Expr>,
        step: Option<Box<Statement>>,
        body: Box<Statement>,
    },

    Return {
        value: Option<Expr>,
        location: Location,
    },

    Expr(Expr),

    Assignment {
        target: Expr,
        value: Expr,
    },
}

impl Statement {
    pub fn when(condition: Expr, then: Statement, otherwise: Option<Statement>) -> Self {
        Statement::If {
            condition,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        }
    }

    pub fn while_loop(condition: Expr, body: Statement) -> Self {
        Statement::While {
            condition,
            body: Box::new(body),
        }
    }

    pub fn for_loop(
        init: Option<Statement>,
        condition: Option<Expr>,
        step: Option<Statement>,
        body: Statement,
    ) -> Self {
        Statement::For {
            init: init.map(Box::new),
            condition,
            step: step.map(Box::new),
            body: Box::new(body),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Statement::Assignment { target, value }
    }
}

#[derive(Debug)]
pub struct Expr {
    pub id: NodeId,
    pub location: Location,
    pub kind: ExprKind,
}

#[derive(Debug)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(Identifier),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Call(Located<Identifier>, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    AddressOf(Box<Expr>),
    Deref(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i32),
    Float(f32),
    Char(u8),
    Str(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        use BinOp::*;
        matches!(self, Add | Sub | Mul | Div | Mod)
    }

    pub fn is_comparison(self) -> bool {
        use BinOp::*;
        matches!(
            self,
            Equal | NotEqual | Less | LessOrEqual | Greater | GreaterOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Negate,
    Not,
}

impl Program {
    /// Recorre todas las expresiones del programa, incluyendo subexpresiones.
    pub fn for_each_expr<F: FnMut(&Expr)>(&self, mut f: F) {
        for declaration in &self.declarations {
            match declaration {
                Declaration::Variable(var) => var.for_each_expr(&mut f),
                Declaration::Function(function) => {
                    if let Some(body) = &function.body {
                        for statement in &body.statements {
                            statement.for_each_expr(&mut f);
                        }
                    }
                }
            }
        }
    }
}

impl VarDecl {
    fn for_each_expr<F: FnMut(&Expr)>(&self, f: &mut F) {
        if let Some(initializer) = &self.initializer {
            initializer.for_each(f);
        }
    }
}

impl Statement {
    fn for_each_expr<F: FnMut(&Expr)>(&self, f: &mut F) {
        match self {
            Statement::Declaration(var) => var.for_each_expr(f),
            Statement::Block(block) => {
                for statement in &block.statements {
                    statement.for_each_expr(f);
                }
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                condition.for_each(f);
                then.for_each_expr(f);
                if let Some(otherwise) = otherwise {
                    otherwise.for_each_expr(f);
                }
            }

            Statement::While { condition, body } => {
                condition.for_each(f);
                body.for_each_expr(f);
            }

            Statement::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(init) = init {
                    init.for_each_expr(f);
                }

                if let Some(condition) = condition {
                    condition.for_each(f);
                }

                if let Some(step) = step {
                    step.for_each_expr(f);
                }

                body.for_each_expr(f);
            }

            Statement::Return { value, .. } => {
                if let Some(value) = value {
                    value.for_each(f);
                }
            }

            Statement::Expr(expr) => expr.for_each(f),
            Statement::Assignment { target, value } => {
                target.for_each(f);
                value.for_each(f);
            }
        }
    }
}

impl Expr {
    /// Visita esta expresión y luego sus subexpresiones, en preorden.
    pub fn for_each<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);

        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Identifier(_) => (),
            ExprKind::Binary(_, lhs, rhs) | ExprKind::Index(lhs, rhs) => {
                lhs.for_each(f);
                rhs.for_each(f);
            }

            ExprKind::Unary(_, operand)
            | ExprKind::AddressOf(operand)
            | ExprKind::Deref(operand) => operand.for_each(f),

            ExprKind::Call(_, arguments) => {
                for argument in arguments {
                    argument.for_each(f);
                }
            }
        }
    }
}

/// Constructor de nodos.
///
/// Asigna identificadores frescos y ubica cada nodo en la posición
/// actual del cursor, la cual se ajusta con [`Builder::at()`]. Los
/// métodos toman `&self` para poder anidar llamadas al construir
/// expresiones.
pub struct Builder {
    source: Rc<Source>,
    cursor: Cell<Position>,
    next_id: Cell<u32>,
}

impl Builder {
    pub fn new(source: Rc<Source>) -> Self {
        Builder {
            source,
            cursor: Cell::new(Position::default()),
            next_id: Cell::new(0),
        }
    }

    /// Mueve el cursor para los nodos construidos a continuación.
    pub fn at(&self, line: u32, column: u32) -> &Self {
        self.cursor.set(Position::new(line, column));
        self
    }

    pub fn location(&self) -> Location {
        Location::point(&self.source, self.cursor.get())
    }

    fn id(&self) -> NodeId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        NodeId(id)
    }

    fn expr(&self, kind: ExprKind) -> Expr {
        Expr {
            id: self.id(),
            location: self.location(),
            kind,
        }
    }

    pub fn name(&self, name: &str) -> Located<Identifier> {
        Located::at(Identifier::from(name), self.location())
    }

    pub fn int(&self, value: i32) -> Expr {
        self.expr(ExprKind::Literal(Literal::Int(value)))
    }

    pub fn float(&self, value: f32) -> Expr {
        self.expr(ExprKind::Literal(Literal::Float(value)))
    }

    pub fn char(&self, value: u8) -> Expr {
        self.expr(ExprKind::Literal(Literal::Char(value)))
    }

    pub fn string(&self, value: &str) -> Expr {
        self.expr(ExprKind::Literal(Literal::Str(String::from(value))))
    }

    pub fn ident(&self, name: &str) -> Expr {
        self.expr(ExprKind::Identifier(Identifier::from(name)))
    }

    pub fn binary(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    pub fn unary(&self, op: UnOp, operand: Expr) -> Expr {
        self.expr(ExprKind::Unary(op, Box::new(operand)))
    }

    pub fn call(&self, callee: &str, arguments: Vec<Expr>) -> Expr {
        let callee = self.name(callee);
        self.expr(ExprKind::Call(callee, arguments))
    }

    pub fn index(&self, base: Expr, index: Expr) -> Expr {
        self.expr(ExprKind::Index(Box::new(base), Box::new(index)))
    }

    pub fn address_of(&self, operand: Expr) -> Expr {
        self.expr(ExprKind::AddressOf(Box::new(operand)))
    }

    pub fn deref(&self, operand: Expr) -> Expr {
        self.expr(ExprKind::Deref(Box::new(operand)))
    }

    pub fn var(&self, name: &str, ty: Type, initializer: Option<Expr>) -> VarDecl {
        VarDecl {
            id: self.id(),
            name: self.name(name),
            ty,
            initializer,
        }
    }

    /// Declaración local como sentencia.
    pub fn local(&self, name: &str, ty: Type, initializer: Option<Expr>) -> Statement {
        Statement::Declaration(self.var(name, ty, initializer))
    }

    pub fn param(&self, name: &str, ty: Type) -> Parameter {
        Parameter {
            id: self.id(),
            name: self.name(name),
            ty,
        }
    }

    pub fn block(&self, statements: Vec<Statement>) -> Block {
        Block {
            statements,
            location: self.location(),
        }
    }

    pub fn function(
        &self,
        name: &str,
        parameters: Vec<Parameter>,
        return_type: Type,
        body: Vec<Statement>,
    ) -> FunctionDecl {
        FunctionDecl {
            id: self.id(),
            name: self.name(name),
            parameters,
            return_type,
            body: Some(self.block(body)),
        }
    }

    pub fn external(&self, name: &str, parameters: Vec<Parameter>, return_type: Type) -> FunctionDecl {
        FunctionDecl {
            id: self.id(),
            name: self.name(name),
            parameters,
            return_type,
            body: None,
        }
    }

    pub fn ret(&self, value: Option<Expr>) -> Statement {
        Statement::Return {
            value,
            location: self.location(),
        }
    }
}
