use std::fmt;

/// Memory access ordering class, carried on memory microinstructions.
///
/// The backend keeps program order for all accesses; `Ordered` additionally
/// forbids the host from reordering around the access (acquire/release
/// forms such as LDAR/STLR and LDAEX/STLEX).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccType {
    Normal,
    Ordered,
}

impl fmt::Display for AccType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccType::Normal => f.write_str("normal"),
            AccType::Ordered => f.write_str("ordered"),
        }
    }
}
