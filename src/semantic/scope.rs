//! Tabla de símbolos.
//!
//! Los ámbitos forman un árbol cuya raíz es el ámbito global. Se almacenan
//! en una arena y se enlazan con su ámbito externo por índice. La pila de
//! ámbitos activa es la cadena que va desde el ámbito actual hasta la raíz.

use std::collections::HashMap;

use crate::{
    ast::{Identifier, NodeId},
    index::IndexVec,
    ty::Type,
};

simple_index! {
    /// Identidad de un símbolo, estable durante todo el análisis.
    pub struct SymbolId;
}

simple_index! {
    struct ScopeId;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    Global,
    Local,
    Parameter,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: Identifier,
    pub ty: Type,
    pub depth: u32,
    pub storage: Storage,
    pub declared_by: NodeId,
}

impl Symbol {
    pub fn is_function(&self) -> bool {
        matches!(self.ty, Type::Function(..))
    }
}

struct Scope {
    parent: Option<ScopeId>,
    depth: u32,
    symbols: HashMap<Identifier, SymbolId>,
}

pub struct Scopes {
    scopes: IndexVec<ScopeId, Scope>,
    symbols: IndexVec<SymbolId, Symbol>,
    current: ScopeId,
}

impl Scopes {
    /// Crea la tabla con el ámbito global como único ámbito activo.
    pub fn new() -> Self {
        let mut scopes = IndexVec::new();
        let current = scopes.push(Scope {
            parent: None,
            depth: 0,
            symbols: HashMap::new(),
        });

        Scopes {
            scopes,
            symbols: IndexVec::new(),
            current,
        }
    }

    pub fn depth(&self) -> u32 {
        self.scopes[self.current].depth
    }

    pub fn push(&mut self) {
        let scope = Scope {
            parent: Some(self.current),
            depth: self.depth() + 1,
            symbols: HashMap::new(),
        };

        self.current = self.scopes.push(scope);
    }

    pub fn pop(&mut self) {
        // El ámbito global nunca se desapila
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
        }
    }

    /// Declara un símbolo en el ámbito actual.
    ///
    /// Falla con el símbolo previo si el nombre ya existe en este mismo
    /// ámbito. Ocultar un nombre de un ámbito externo es válido.
    pub fn declare(
        &mut self,
        name: &Identifier,
        ty: Type,
        storage: Storage,
        declared_by: NodeId,
    ) -> Result<SymbolId, SymbolId> {
        let depth = self.depth();
        if let Some(previous) = self.scopes[self.current].symbols.get(name) {
            return Err(*previous);
        }

        let id = self.symbols.push(Symbol {
            name: name.clone(),
            ty,
            depth,
            storage,
            declared_by,
        });

        self.scopes[self.current].symbols.insert(name.clone(), id);
        Ok(id)
    }

    /// Busca un nombre desde el ámbito actual hacia afuera.
    pub fn lookup(&self, name: &Identifier) -> Option<SymbolId> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            let Scope {
                parent, symbols, ..
            } = &self.scopes[id];

            if let Some(symbol) = symbols.get(name) {
                return Some(*symbol);
            }

            scope = *parent;
        }

        None
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn into_symbols(self) -> IndexVec<SymbolId, Symbol> {
        self.symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    fn name(name: &str) -> Identifier {
        Identifier::from(name)
    }

    #[test]
    fn lookup_walks_outward() {
        let mut scopes = Scopes::new();
        let global = scopes
            .declare(&name("x"), Type::Int, Storage::Global, NodeId::new(0))
            .unwrap();

        scopes.push();
        scopes.push();
        assert_eq!(scopes.depth(), 2);
        assert_eq!(scopes.lookup(&name("x")), Some(global));
        assert_eq!(scopes.lookup(&name("y")), None);
    }

    #[test]
    fn shadowing_is_allowed_but_redeclaration_is_not() {
        let mut scopes = Scopes::new();
        let outer = scopes
            .declare(&name("x"), Type::Int, Storage::Global, NodeId::new(0))
            .unwrap();

        scopes.push();
        let inner = scopes
            .declare(&name("x"), Type::Float, Storage::Local, NodeId::new(1))
            .unwrap();

        assert_ne!(outer, inner);
        assert_eq!(scopes.lookup(&name("x")), Some(inner));
        assert_eq!(scopes.symbol(inner).depth, 1);

        let clash = scopes.declare(&name("x"), Type::Char, Storage::Local, NodeId::new(2));
        assert_eq!(clash, Err(inner));

        scopes.pop();
        assert_eq!(scopes.lookup(&name("x")), Some(outer));

        // Desapilar el ámbito global no tiene efecto
        scopes.pop();
        assert_eq!(scopes.depth(), 0);
    }
}
