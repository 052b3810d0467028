//! Named timeout profiles for store calls.

use std::collections::HashMap;
use std::time::Duration;

pub const PROFILE_QUICK: &str = "quick";
pub const PROFILE_NORMAL: &str = "normal";
pub const PROFILE_COMPLEX: &str = "complex";
pub const PROFILE_BACKGROUND: &str = "background";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutProfile {
    pub name: String,
    pub timeout: Duration,
    pub retry_enabled: bool,
}

impl TimeoutProfile {
    pub fn new(name: &str, timeout_ms: u64, retry_enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            timeout: Duration::from_millis(timeout_ms),
            retry_enabled,
        }
    }
}

/// Lookup table of timeout profiles keyed by name.
#[derive(Debug, Clone)]
pub struct TimeoutProfiles {
    profiles: HashMap<String, TimeoutProfile>,
}

impl TimeoutProfiles {
    /// Builds a registry from explicit profiles. Later duplicates replace earlier ones.
    pub fn from_profiles(profiles: impl IntoIterator<Item = TimeoutProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TimeoutProfile> {
        self.profiles.get(name)
    }

    /// Replaces (or adds) a single profile.
    pub fn set(&mut self, profile: TimeoutProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for TimeoutProfiles {
    fn default() -> Self {
        Self::from_profiles([
            TimeoutProfile::new(PROFILE_QUICK, 2_000, false),
            TimeoutProfile::new(PROFILE_NORMAL, 5_000, true),
            TimeoutProfile::new(PROFILE_COMPLEX, 15_000, true),
            TimeoutProfile::new(PROFILE_BACKGROUND, 30_000, true),
        ])
    }
}
