use super::RegisterId;

/// One named bit of a register, optionally halting execution when set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ConditionBit {
    name: String,
    register: RegisterId,
    bit: u32,
    halt: bool,
}

impl ConditionBit {
    /// Creates a condition bit over `register` at bit index `bit`.
    #[must_use]
    pub fn new(name: impl Into<String>, register: RegisterId, bit: u32) -> Self {
        Self {
            name: name.into(),
            register,
            bit,
            halt: false,
        }
    }

    /// Makes execution halt whenever this bit is set.
    #[must_use]
    pub const fn halting(mut self, halt: bool) -> Self {
        self.halt = halt;
        self
    }

    /// Condition bit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning register.
    #[must_use]
    pub const fn register(&self) -> RegisterId {
        self.register
    }

    /// Bit index within the owning register.
    #[must_use]
    pub const fn bit(&self) -> u32 {
        self.bit
    }

    /// Whether a set bit halts execution.
    #[must_use]
    pub const fn halts(&self) -> bool {
        self.halt
    }
}
