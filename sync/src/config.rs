//! Configuration for feeds and the favorites coordinator.

use std::env;

use parkspot_engine::Feed;
use serde::Deserialize;

use crate::error::StoreError;

/// When a failed favorites update falls back to upserting the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertPolicy {
    /// Only when the update failed because the document does not exist
    #[default]
    #[serde(rename = "not_found")]
    NotFoundOnly,
    /// On any update failure
    AnyError,
}

impl UpsertPolicy {
    /// Whether `error` from the direct update should trigger the upsert.
    pub fn should_upsert(self, error: &StoreError) -> bool {
        match self {
            UpsertPolicy::NotFoundOnly => error.is_not_found(),
            UpsertPolicy::AnyError => true,
        }
    }
}

impl std::str::FromStr for UpsertPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(UpsertPolicy::NotFoundOnly),
            "any_error" => Ok(UpsertPolicy::AnyError),
            other => Err(ConfigError::InvalidUpsertPolicy(other.to_string())),
        }
    }
}

/// Where favorites live and how they are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FavoritesSettings {
    /// Collection holding one favorites document per principal
    pub collection: String,
    /// Field storing the owning principal id
    pub owner_field: String,
    /// Field storing the favorite parking ids
    pub items_field: String,
    pub upsert_policy: UpsertPolicy,
}

impl FavoritesSettings {
    /// The feed that streams a principal's favorites document.
    pub fn feed(&self) -> Feed {
        Feed::scoped(self.collection.clone(), self.owner_field.clone())
    }
}

impl Default for FavoritesSettings {
    fn default() -> Self {
        Self {
            collection: "favorites".to_string(),
            owner_field: "userId".to_string(),
            items_field: "parkingIds".to_string(),
            upsert_policy: UpsertPolicy::default(),
        }
    }
}

/// Sync configuration, from environment variables or any serde source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Collection of all parking spaces
    pub parkings_collection: String,
    /// Field on a parking that holds its owner's principal id
    pub parking_owner_field: String,
    pub favorites: FavoritesSettings,
}

impl SyncConfig {
    /// Load configuration from `PARKSPOT_*` environment variables, falling
    /// back to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let upsert_policy = match env::var("PARKSPOT_UPSERT_ON") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.favorites.upsert_policy,
        };

        Ok(Self {
            parkings_collection: var_or(
                "PARKSPOT_PARKINGS_COLLECTION",
                defaults.parkings_collection,
            )?,
            parking_owner_field: var_or(
                "PARKSPOT_PARKING_OWNER_FIELD",
                defaults.parking_owner_field,
            )?,
            favorites: FavoritesSettings {
                collection: var_or(
                    "PARKSPOT_FAVORITES_COLLECTION",
                    defaults.favorites.collection,
                )?,
                owner_field: var_or(
                    "PARKSPOT_FAVORITES_OWNER_FIELD",
                    defaults.favorites.owner_field,
                )?,
                items_field: var_or("PARKSPOT_FAVORITES_FIELD", defaults.favorites.items_field)?,
                upsert_policy,
            },
        })
    }

    /// Every parking, for the discovery screens.
    pub fn parkings_feed(&self) -> Feed {
        Feed::global(self.parkings_collection.clone())
    }

    /// Parkings owned by the current principal, for the owner screens.
    pub fn owned_parkings_feed(&self) -> Feed {
        Feed::scoped(self.parkings_collection.clone(), self.parking_owner_field.clone())
    }

    /// The current principal's favorites document.
    pub fn favorites_feed(&self) -> Feed {
        self.favorites.feed()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parkings_collection: "parkings".to_string(),
            parking_owner_field: "ownerId".to_string(),
            favorites: FavoritesSettings::default(),
        }
    }
}

fn var_or(name: &'static str, default: String) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(ConfigError::Empty(name)),
        Ok(value) => Ok(value),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Invalid PARKSPOT_UPSERT_ON value: {0} (expected not_found or any_error)")]
    InvalidUpsertPolicy(String),
}
