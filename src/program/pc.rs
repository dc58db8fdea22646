use std::fmt::Display;

/// Denotes a program counter in an instruction sequence.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[repr(transparent)]
pub struct ProgramCounter(u16);

impl ProgramCounter {
    /// Denotes the entry point of a method body.
    pub const ZERO: Self = Self(0);

    /// Creates a program counter from a raw value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Checks if the program counter is an entry point.
    #[must_use]
    pub const fn is_entry_point(&self) -> bool {
        self.0 == 0
    }
}

impl Display for ProgramCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:05}", self.0)
    }
}

impl From<u16> for ProgramCounter {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<ProgramCounter> for u16 {
    fn from(val: ProgramCounter) -> Self {
        val.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point() {
        assert!(ProgramCounter::ZERO.is_entry_point());
        assert!(!ProgramCounter::from(1).is_entry_point());
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(ProgramCounter::from(1) < ProgramCounter::from(2));
        assert_eq!(ProgramCounter::new(7), ProgramCounter::from(7));
    }
}
