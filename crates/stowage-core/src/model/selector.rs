use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use super::Record;

/// Addresses records within a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every record, in index order.
    All,
    Key(String),
    Index(usize),
    /// Inclusive window `[start, start + offset]`.
    Range { start: usize, offset: usize },
    /// Each entry resolved independently, order preserved.
    List(Vec<Selector>),
}

impl Selector {
    /// Whether the selector can address at most one record.
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Key(_) | Self::Index(_))
    }
}

/// A string without commas is a key. A comma list resolves each token as
/// an index when it parses as one, otherwise as a key.
impl FromStr for Selector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.contains(',') {
            return Ok(Self::Key(s.to_owned()));
        }
        Ok(Self::List(
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| {
                    t.parse::<usize>()
                        .map_or_else(|_| Self::Key(t.to_owned()), Self::Index)
                })
                .collect(),
        ))
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(sel) => sel,
            Err(never) => match never {},
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<usize> for Selector {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&Record> for Selector {
    fn from(r: &Record) -> Self {
        Self::Key(r.key.clone())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{i}"),
            Self::Range { start, offset } => {
                write!(f, "{start}..={}", start.saturating_add(*offset))
            }
            Self::List(items) => {
                for (n, item) in items.iter().enumerate() {
                    if n > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}
