//! Stack elements: which resolved nodes may fill a slot of a meta stack.

use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;
use crate::holder::HolderIdentifier;
use crate::resolver::ResolvedNode;

/// One slot of a meta stack.
///
/// Each element selects a single entry: the highest (or lowest) priority
/// node among those its origin predicate accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StackElement {
    Highest,
    Lowest,
    HighestOwn,
    LowestOwn,
    HighestInherited,
    LowestInherited,
    HighestFromGroup(String),
    LowestFromGroup(String),
    HighestNotFromGroup(String),
    LowestNotFromGroup(String),
}

impl StackElement {
    /// Whether the element keeps the highest priority rather than the lowest.
    pub fn prefers_higher(&self) -> bool {
        matches!(
            self,
            StackElement::Highest
                | StackElement::HighestOwn
                | StackElement::HighestInherited
                | StackElement::HighestFromGroup(_)
                | StackElement::HighestNotFromGroup(_)
        )
    }

    /// Origin predicate.
    pub fn accepts(&self, resolved: &ResolvedNode) -> bool {
        let from_group = |name: &str| {
            matches!(&resolved.origin, HolderIdentifier::Group(origin) if origin == name)
        };
        match self {
            StackElement::Highest | StackElement::Lowest => true,
            StackElement::HighestOwn | StackElement::LowestOwn => resolved.is_own(),
            StackElement::HighestInherited | StackElement::LowestInherited => !resolved.is_own(),
            StackElement::HighestFromGroup(group) | StackElement::LowestFromGroup(group) => {
                from_group(group)
            }
            StackElement::HighestNotFromGroup(group) | StackElement::LowestNotFromGroup(group) => {
                !from_group(group)
            }
        }
    }

    /// Returns whether `s` names a track-based element, which this engine does not evaluate.
    pub fn is_track_element(s: &str) -> bool {
        let s = s.trim().to_lowercase();
        s.contains("_on_track_")
    }
}

impl FromStr for StackElement {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let group = |prefix: &str| {
            lower
                .strip_prefix(prefix)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        };

        let element = match lower.as_str() {
            "highest" => Some(StackElement::Highest),
            "lowest" => Some(StackElement::Lowest),
            "highest_own" => Some(StackElement::HighestOwn),
            "lowest_own" => Some(StackElement::LowestOwn),
            "highest_inherited" => Some(StackElement::HighestInherited),
            "lowest_inherited" => Some(StackElement::LowestInherited),
            _ => group("highest_from_group_")
                .map(StackElement::HighestFromGroup)
                .or_else(|| group("lowest_from_group_").map(StackElement::LowestFromGroup))
                .or_else(|| group("highest_not_from_group_").map(StackElement::HighestNotFromGroup))
                .or_else(|| group("lowest_not_from_group_").map(StackElement::LowestNotFromGroup)),
        };

        element.ok_or_else(|| DomainError::InvalidStackElement {
            value: s.to_string(),
        })
    }
}

impl fmt::Display for StackElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackElement::Highest => f.write_str("highest"),
            StackElement::Lowest => f.write_str("lowest"),
            StackElement::HighestOwn => f.write_str("highest_own"),
            StackElement::LowestOwn => f.write_str("lowest_own"),
            StackElement::HighestInherited => f.write_str("highest_inherited"),
            StackElement::LowestInherited => f.write_str("lowest_inherited"),
            StackElement::HighestFromGroup(g) => write!(f, "highest_from_group_{g}"),
            StackElement::LowestFromGroup(g) => write!(f, "lowest_from_group_{g}"),
            StackElement::HighestNotFromGroup(g) => write!(f, "highest_not_from_group_{g}"),
            StackElement::LowestNotFromGroup(g) => write!(f, "lowest_not_from_group_{g}"),
        }
    }
}
