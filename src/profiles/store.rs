//! Profile persistence over a [`Preferences`] store
//!
//! Each profile is stored under its own name as a string set record. Older
//! installs kept a single identity in three flat string keys; [`ProfileStore::load`]
//! migrates those into a profile named `default`.

use super::preferences::{PrefValue, Preferences};
use super::profile::{ConnectionProfile, ProfileError};
use tracing::{debug, info, warn};

pub const DEFAULT_PROFILE_NAME: &str = "default";

pub const LEGACY_ORGANIZATION_KEY: &str = "organization";
pub const LEGACY_DEVICE_ID_KEY: &str = "deviceid";
pub const LEGACY_AUTH_TOKEN_KEY: &str = "authtoken";

pub struct ProfileStore<P: Preferences> {
    prefs: P,
    profiles: Vec<ConnectionProfile>,
}

impl<P: Preferences> ProfileStore<P> {
    /// Wrap a preference store. Call [`load`](Self::load) to read profiles.
    pub fn new(prefs: P) -> Self {
        Self {
            prefs,
            profiles: Vec::new(),
        }
    }

    /// Create a store and load its profiles
    pub fn open(prefs: P) -> Result<Self, ProfileError> {
        let mut store = Self::new(prefs);
        store.load()?;
        Ok(store)
    }

    /// Replace the in-memory list with what is persisted
    ///
    /// Records that fail to parse are skipped with a warning. Non-set values
    /// are ignored.
    pub fn load(&mut self) -> Result<(), ProfileError> {
        self.profiles.clear();

        if self.prefs.contains(LEGACY_ORGANIZATION_KEY) {
            self.migrate_legacy()?;
        }

        for key in self.prefs.keys() {
            let Some(record) = self.prefs.get_string_set(&key) else {
                continue;
            };
            match ConnectionProfile::from_record(record) {
                Ok(profile) => self.profiles.push(profile),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable profile record"),
            }
        }

        debug!(count = self.profiles.len(), "Profiles loaded");
        Ok(())
    }

    fn migrate_legacy(&mut self) -> Result<(), ProfileError> {
        let field = |key: &str| self.prefs.get_string(key).unwrap_or_default().to_string();
        let profile = ConnectionProfile::new(
            DEFAULT_PROFILE_NAME,
            field(LEGACY_ORGANIZATION_KEY),
            field(LEGACY_DEVICE_ID_KEY),
            field(LEGACY_AUTH_TOKEN_KEY),
        );

        self.prefs
            .put(DEFAULT_PROFILE_NAME, PrefValue::Set(profile.to_record()));
        self.prefs.remove(LEGACY_ORGANIZATION_KEY);
        self.prefs.remove(LEGACY_DEVICE_ID_KEY);
        self.prefs.remove(LEGACY_AUTH_TOKEN_KEY);
        self.prefs.commit()?;

        info!(
            organization = %profile.organization,
            device_id = %profile.device_id,
            "Migrated legacy settings into the default profile"
        );
        Ok(())
    }

    /// Persist a new profile and append it to the list
    ///
    /// Names are not checked for uniqueness; a second save under an existing
    /// name replaces the stored record but leaves both entries in memory.
    pub fn save(&mut self, profile: ConnectionProfile) -> Result<(), ProfileError> {
        if profile.name.is_empty() {
            return Err(ProfileError::EmptyName);
        }
        if self.find(&profile.name).is_some() {
            warn!(name = %profile.name, "Saving profile under a name that already exists");
        }

        self.prefs
            .put(&profile.name, PrefValue::Set(profile.to_record()));
        self.prefs.commit()?;

        info!(name = %profile.name, "Profile saved");
        self.profiles.push(profile);
        Ok(())
    }

    /// Replace the stored record and the first in-memory profile with the same name
    pub fn overwrite_profile(&mut self, profile: ConnectionProfile) -> Result<(), ProfileError> {
        if profile.name.is_empty() {
            return Err(ProfileError::EmptyName);
        }

        self.prefs.remove(&profile.name);
        self.prefs
            .put(&profile.name, PrefValue::Set(profile.to_record()));
        self.prefs.commit()?;

        if let Some(index) = self.profiles.iter().position(|p| p.name == profile.name) {
            self.profiles.remove(index);
        }
        info!(name = %profile.name, "Profile overwritten");
        self.profiles.push(profile);
        Ok(())
    }

    /// Drop every profile and wipe the preference store
    pub fn clear_profiles(&mut self) -> Result<(), ProfileError> {
        self.profiles.clear();
        self.prefs.clear();
        self.prefs.commit()?;
        info!("All profiles cleared");
        Ok(())
    }

    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// The profile named `default`, whose values prefill the login form
    pub fn default_profile(&self) -> Option<&ConnectionProfile> {
        self.find(DEFAULT_PROFILE_NAME)
    }

    pub fn preferences(&self) -> &P {
        &self.prefs
    }
}
