use serde::Serialize;

use crate::room_store::RoomManifest;

/// Which image the room view should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DisplayState {
    /// Latest textured composite. `stale` when it was rendered from an
    /// earlier photo than the one currently committed.
    Composite { generation: u64, stale: bool },
    /// Raw room photo, no texture applied yet
    Photo { generation: u64 },
    /// Nothing uploaded
    Empty,
}

impl DisplayState {
    /// Route serving the image for this state
    pub fn path(&self) -> Option<&'static str> {
        match self {
            DisplayState::Composite { .. } => Some("/room/composite"),
            DisplayState::Photo { .. } => Some("/room/photo"),
            DisplayState::Empty => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, DisplayState::Composite { stale: true, .. })
    }
}

/// Composite if one is recorded, else the photo, else nothing
pub fn resolve_display(manifest: Option<&RoomManifest>) -> DisplayState {
    let Some(manifest) = manifest else {
        return DisplayState::Empty;
    };

    match &manifest.textured_room {
        Some(composite) => DisplayState::Composite {
            generation: composite.generation,
            stale: composite.generation != manifest.generation,
        },
        None => DisplayState::Photo {
            generation: manifest.generation,
        },
    }
}
