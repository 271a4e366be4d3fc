//! Query options: the (mode, flags, context) tuple a lookup is evaluated under.
//!
//! `QueryOptions` is immutable and value-hashed; it is the cache key of the
//! cached-data manager.

use std::fmt;

use crate::context::ContextSet;

/// Whether node contexts are matched against the query context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryMode {
    Contextual,
    NonContextual,
}

/// Lookup settings folded into a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    /// Nodes without a `server` context apply.
    IncludeNodesWithoutServerContext = 0,
    /// Nodes without a `world` context apply.
    IncludeNodesWithoutWorldContext = 1,
    /// Inheritance nodes without a `server` context apply.
    ApplyInheritanceNodesWithoutServerContext = 2,
    /// Inheritance nodes without a `world` context apply.
    ApplyInheritanceNodesWithoutWorldContext = 3,
    /// Inheritance edges are followed at all.
    ResolveInheritance = 4,
    /// A user's primary group is applied even without an explicit edge.
    ApplyPrimaryGroupImplicitly = 5,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::IncludeNodesWithoutServerContext,
        Flag::IncludeNodesWithoutWorldContext,
        Flag::ApplyInheritanceNodesWithoutServerContext,
        Flag::ApplyInheritanceNodesWithoutWorldContext,
        Flag::ResolveInheritance,
        Flag::ApplyPrimaryGroupImplicitly,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Compact set of [`Flag`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagSet(u8);

impl FlagSet {
    pub fn none() -> Self {
        FlagSet(0)
    }

    pub fn all() -> Self {
        Flag::ALL.into_iter().fold(Self::none(), |set, flag| set.with(flag, true))
    }

    pub fn contains(self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    #[must_use]
    pub fn with(self, flag: Flag, enabled: bool) -> Self {
        if enabled {
            FlagSet(self.0 | flag.bit())
        } else {
            FlagSet(self.0 & !flag.bit())
        }
    }
}

impl Default for FlagSet {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(Flag::ALL.into_iter().filter(|flag| self.contains(*flag)))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryOptions {
    mode: QueryMode,
    flags: FlagSet,
    context: ContextSet,
}

impl QueryOptions {
    /// Contextual options with default flags.
    pub fn contextual(context: ContextSet) -> Self {
        Self {
            mode: QueryMode::Contextual,
            flags: FlagSet::default(),
            context,
        }
    }

    /// Non-contextual options: every node applies regardless of its contexts.
    pub fn non_contextual() -> Self {
        Self {
            mode: QueryMode::NonContextual,
            flags: FlagSet::default(),
            context: ContextSet::empty(),
        }
    }

    #[must_use]
    pub fn with_flag(mut self, flag: Flag, enabled: bool) -> Self {
        self.flags = self.flags.with(flag, enabled);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: FlagSet) -> Self {
        self.flags = flags;
        self
    }

    /// Replaces the context. Ignored for non-contextual options.
    #[must_use]
    pub fn with_context(mut self, context: ContextSet) -> Self {
        if self.mode == QueryMode::Contextual {
            self.context = context;
        }
        self
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn flags(&self) -> FlagSet {
        self.flags
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn context(&self) -> &ContextSet {
        &self.context
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::non_contextual()
    }
}
