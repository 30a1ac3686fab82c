//! The main profile entity.
//!
//! The persistence layer treats profile contents as opaque: a JSON object of
//! named fields that the host game reads and writes. Only the dirty flag and
//! the serialized form matter to the store. Unknown fields written by newer
//! versions survive a load/save cycle untouched.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::ids::PlayerId;

/// A player's main profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainPlayer {
    player_id: PlayerId,
    fields: Map<String, Value>,
    dirty: bool,
}

impl MainPlayer {
    /// A brand-new, empty, clean profile.
    pub fn new(player_id: PlayerId) -> Self {
        Self::from_fields(player_id, Map::new())
    }

    /// Rebuild a profile from a stored payload. The result is clean.
    pub const fn from_fields(player_id: PlayerId, fields: Map<String, Value>) -> Self {
        Self {
            player_id,
            fields,
            dirty: false,
        }
    }

    /// The owning player.
    pub const fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Raw value of a profile field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Typed value of a profile field; `None` if absent or of another shape.
    pub fn field_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.fields
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// All profile fields, i.e. the stored payload.
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Set a field and mark the profile dirty.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_owned(), value.into());
        self.dirty = true;
    }

    /// Remove a field. Marks dirty only if the field existed.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        let removed = self.fields.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Whether there are unsaved mutations.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reset dirty state. Only the store calls this, right after a save.
    pub const fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
