//! Connection profiles and their persistence

pub mod preferences;
pub mod profile;
pub mod store;

pub use preferences::{FilePreferences, MemoryPreferences, PrefValue, Preferences, PreferencesError};
pub use profile::{ConnectionProfile, ProfileError};
pub use store::{ProfileStore, DEFAULT_PROFILE_NAME};
