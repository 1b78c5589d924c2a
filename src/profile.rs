//! Share profiles: named visibility partitions of the share.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identifier of a share profile.
pub type ProfileToken = u32;

/// The profile every root belongs to unless configured otherwise.
pub const DEFAULT_PROFILE: ProfileToken = 0;

/// An ordered set of profile tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileSet(BTreeSet<ProfileToken>);

impl ProfileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(profile: ProfileToken) -> Self {
        Self(BTreeSet::from([profile]))
    }

    pub fn insert(&mut self, profile: ProfileToken) -> bool {
        self.0.insert(profile)
    }

    pub fn remove(&mut self, profile: ProfileToken) -> bool {
        self.0.remove(&profile)
    }

    pub fn contains(&self, profile: ProfileToken) -> bool {
        self.0.contains(&profile)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProfileToken> + '_ {
        self.0.iter().copied()
    }

    pub fn intersects(&self, other: &ProfileSet) -> bool {
        // Walk the smaller set.
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().any(|profile| large.contains(profile))
    }

    pub fn intersection(&self, other: &ProfileSet) -> ProfileSet {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    pub fn union(&self, other: &ProfileSet) -> ProfileSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn extend(&mut self, other: &ProfileSet) {
        self.0.extend(other.iter());
    }
}

impl FromIterator<ProfileToken> for ProfileSet {
    fn from_iter<I: IntoIterator<Item = ProfileToken>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which roots a caller may see.
///
/// `Unrestricted` is for callers without profile scoping (local user, NMDC
/// hubs). An empty `Profiles` set sees nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileFilter {
    Unrestricted,
    Profiles(ProfileSet),
}

impl ProfileFilter {
    pub fn profile(profile: ProfileToken) -> Self {
        Self::Profiles(ProfileSet::single(profile))
    }

    /// Returns true if a root with the given profiles is visible.
    pub fn allows(&self, root_profiles: &ProfileSet) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Profiles(profiles) => profiles.intersects(root_profiles),
        }
    }
}

impl From<ProfileToken> for ProfileFilter {
    fn from(profile: ProfileToken) -> Self {
        Self::profile(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let a: ProfileSet = [1, 2, 3].into_iter().collect();
        let b: ProfileSet = [3, 4].into_iter().collect();
        assert!(a.intersects(&b));
        assert_eq!(a.intersection(&b), ProfileSet::single(3));
        assert_eq!(a.union(&b).len(), 4);

        let c = ProfileSet::single(9);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn filter_semantics() {
        let root: ProfileSet = [0, 5].into_iter().collect();
        assert!(ProfileFilter::Unrestricted.allows(&root));
        assert!(ProfileFilter::profile(5).allows(&root));
        assert!(!ProfileFilter::profile(7).allows(&root));
        assert!(!ProfileFilter::Profiles(ProfileSet::new()).allows(&root));
    }
}
