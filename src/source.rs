//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos internos que el compilador construye
//! deben llevar cuenta de posiciones o rangos de ubicaciones en
//! el código fuente original, lo cual permite determinar un punto
//! exacto o aproximado en donde ocurre un error de abstracción
//! arbitraria.
//!
//! El front end es quien conoce el texto original. Este módulo solo
//! preserva lo necesario para señalar errores: el nombre del origen,
//! opcionalmente sus líneas, y rangos línea-columna.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Range,
    rc::Rc,
};

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Nombre de origen y, si el front end lo provee, su texto por líneas.
pub struct Source {
    name: String,
    lines: Vec<String>,
}

impl Source {
    /// Origen del que se conoce el texto completo.
    pub fn new<S: Into<String>>(name: S, text: &str) -> Rc<Self> {
        Rc::new(Source {
            name: name.into(),
            lines: text.lines().map(String::from).collect(),
        })
    }

    /// Origen sin texto, por ejemplo un árbol construido en memoria.
    pub fn unnamed<S: Into<String>>(name: S) -> Rc<Self> {
        Rc::new(Source {
            name: name.into(),
            lines: Vec::new(),
        })
    }

    /// Nombre del origen.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Obtiene una línea (base 1), si el texto es conocido.
    pub fn line(&self, number: u32) -> Option<&str> {
        let index = (number as usize).checked_sub(1)?;
        self.lines.get(index).map(String::as_str)
    }
}

/// Una ubicación está conformada por un origen y un rango de posiciones.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    position: Range<Position>,
}

impl Location {
    /// Construye una ubicación que abarca `start` hasta `end`, exclusivo.
    pub fn new(from: &Rc<Source>, start: Position, end: Position) -> Self {
        Location {
            from: Rc::clone(from),
            position: start..end,
        }
    }

    /// Ubicación de una sola columna.
    pub fn point(from: &Rc<Source>, at: Position) -> Self {
        Location::new(from, at, at.advance())
    }

    /// Obtiene el origen.
    pub fn source(&self) -> &Source {
        &self.from
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.position.start
    }

    /// Obtiene la posición de fin.
    pub fn end(&self) -> Position {
        self.position.end
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.from.name)?;

        let Range { start, end } = self.position;
        if end == start.advance() {
            // Solo se señala una columna en específico
            write!(formatter, "{}", start)
        } else {
            write!(formatter, "[{}-{}]", start, end.back())
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna en un archivo.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Construye una posición. Líneas y columnas inician en 1.
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }

    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Incrementa el número de columna.
    pub fn advance(self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }

    /// Decrementa el número de columna.
    pub fn back(self) -> Position {
        Position {
            line: self.line,
            column: self.column.saturating_sub(1).max(1),
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_column_location_displays_as_point() {
        let source = Source::unnamed("<test>");
        let location = Location::point(&source, Position::new(3, 7));

        assert_eq!(location.to_string(), "<test>:3:7");
    }

    #[test]
    fn range_displays_inclusive_end() {
        let source = Source::new("main.c", "int x;\nint y;\n");
        let range = Location::new(&source, Position::new(1, 1), Position::new(2, 7));

        assert_eq!(range.to_string(), "main.c:[1:1-2:6]");
        assert_eq!(range.source().line(2), Some("int y;"));
        assert_eq!(range.source().line(3), None);
    }
}
