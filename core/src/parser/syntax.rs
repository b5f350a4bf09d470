// These are common syntax structures shared by the parser, the analysis stages
// and the bytecode layers.

use core::fmt;
use core::ops::Range;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span(pub Range<usize>);

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self(start..end)
    }
    pub fn combine(a: &Span, b: &Span) -> Span {
        Span::new(a.0.start.min(b.0.start), a.0.end.max(b.0.end))
    }
    pub fn str_of<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.0.start..self.0.end).unwrap_or("")
    }
    pub fn start(&self) -> usize {
        self.0.start
    }
    pub fn end(&self) -> usize {
        self.0.end
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self(range)
    }
}

/// 1-based line and column of a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn of(source: &str, offset: usize) -> Self {
        let mut line = 1;
        let mut column = 1;
        for (i, ch) in source.char_indices() {
            if i >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Component selection applied to a vector value, e.g. `.xy` or `[2]`.
///
/// Up to four component indices (each 0..=3) are packed two bits apiece into
/// `pattern`, first component in the lowest bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Swizzle {
    pub count: u8,
    pub pattern: u8,
}

impl Swizzle {
    pub fn from_components(components: &[u8]) -> Option<Self> {
        if components.is_empty() || components.len() > 4 {
            return None;
        }
        let mut pattern = 0u8;
        for (i, &c) in components.iter().enumerate() {
            if c > 3 {
                return None;
            }
            pattern |= c << (i * 2);
        }
        Some(Self {
            count: components.len() as u8,
            pattern,
        })
    }

    /// Parse `xyzw`/`rgba` component letters.
    pub fn parse(letters: &str) -> Option<Self> {
        let mut components = [0u8; 4];
        let mut len = 0;
        for ch in letters.chars() {
            if len == 4 {
                return None;
            }
            components[len] = match ch {
                'x' | 'r' => 0,
                'y' | 'g' => 1,
                'z' | 'b' => 2,
                'w' | 'a' => 3,
                _ => return None,
            };
            len += 1;
        }
        Self::from_components(&components[..len])
    }

    pub fn component(self, i: usize) -> u8 {
        (self.pattern >> (i * 2)) & 0b11
    }

    pub fn components(self) -> impl Iterator<Item = u8> {
        (0..self.count as usize).map(move |i| self.component(i))
    }

    /// Highest component index referenced.
    pub fn max_component(self) -> u8 {
        self.components().max().unwrap_or(0)
    }

    /// The selection `outer` applied after `self`, as one swizzle. `None`
    /// when `outer` reads past the components `self` produces.
    pub fn then(self, outer: Swizzle) -> Option<Swizzle> {
        let mut components = [0u8; 4];
        for (i, c) in outer.components().enumerate() {
            if c >= self.count {
                return None;
            }
            components[i] = self.component(c as usize);
        }
        Self::from_components(&components[..outer.count as usize])
    }
}

impl fmt::Display for Swizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(".")?;
        for c in self.components() {
            let letter = match c {
                0 => 'x',
                1 => 'y',
                2 => 'z',
                _ => 'w',
            };
            write!(f, "{}", letter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzle_packs_components_low_first() {
        let s = Swizzle::parse("zx").unwrap();
        assert_eq!(s.count, 2);
        assert_eq!(s.component(0), 2);
        assert_eq!(s.component(1), 0);
        assert_eq!(s.to_string(), ".zx");
    }

    #[test]
    fn swizzles_compose() {
        let inner = Swizzle::parse("zyx").unwrap();
        let outer = Swizzle::parse("xx").unwrap();
        assert_eq!(inner.then(outer), Swizzle::parse("zz"));
        assert_eq!(Swizzle::parse("xy").unwrap().then(Swizzle::parse("z").unwrap()), None);
    }

    #[test]
    fn swizzle_rejects_bad_letters() {
        assert!(Swizzle::parse("xq").is_none());
        assert!(Swizzle::parse("xyzwx").is_none());
    }

    #[test]
    fn position_counts_lines() {
        let src = "a = 1;\nb = 2;";
        assert_eq!(Position::of(src, 7), Position { line: 2, column: 1 });
    }
}
