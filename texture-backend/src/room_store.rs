//! Single-slot persisted room state.
//!
//! Artifacts are written under generation-suffixed file names and a manifest
//! (`manifest.json`) records which generation is current. The manifest is
//! replaced with a rename, so readers see either the previous or the new
//! {photo, wall mask, corners} triple and never a mix of both.

use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use wall_estimator::{BinaryMask, CornerEstimate};

use crate::error::{Result, RoomError};

const MANIFEST_FILE: &str = "manifest.json";

/// Fixed logical keys of the persisted artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKey {
    RoomPhoto,
    WallMask,
    CornerEstimate,
    TexturedRoom,
}

impl ArtifactKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKey::RoomPhoto => "room-photo",
            ArtifactKey::WallMask => "wall-mask",
            ArtifactKey::CornerEstimate => "corner-estimate",
            ArtifactKey::TexturedRoom => "textured-room",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ArtifactKey::CornerEstimate => "json",
            _ => "png",
        }
    }

    pub fn file_name(&self, generation: u64) -> String {
        format!("{}-{:06}.{}", self.as_str(), generation, self.extension())
    }
}

/// What an upload does to a composite made from the previous photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositePolicy {
    /// Drop it; the room view falls back to the new photo
    Orphan,
    /// Keep showing it until a texture is selected for the new photo
    Keep,
}

impl FromStr for CompositePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orphan" => Ok(CompositePolicy::Orphan),
            "keep" => Ok(CompositePolicy::Keep),
            other => Err(format!("unknown composite policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRecord {
    /// Generation of the photo the composite was rendered from
    pub generation: u64,
    pub file: String,
    pub texture: String,
    pub created_at: DateTime<Utc>,
}

/// Commit record for the current room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomManifest {
    pub generation: u64,
    pub committed_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub photo: String,
    pub wall_mask: String,
    pub corners: String,
    pub wall_pixels: usize,
    #[serde(default)]
    pub textured_room: Option<CompositeRecord>,
}

impl RoomManifest {
    pub fn file_for(&self, key: ArtifactKey) -> Option<&str> {
        match key {
            ArtifactKey::RoomPhoto => Some(&self.photo),
            ArtifactKey::WallMask => Some(&self.wall_mask),
            ArtifactKey::CornerEstimate => Some(&self.corners),
            ArtifactKey::TexturedRoom => self.textured_room.as_ref().map(|c| c.file.as_str()),
        }
    }

    /// Composite exists and was rendered from the current photo
    pub fn has_current_composite(&self) -> bool {
        self.textured_room
            .as_ref()
            .is_some_and(|c| c.generation == self.generation)
    }
}

/// File-system backed store for the current room
pub struct RoomStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RoomStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            RoomError::storage(format!("cannot create {}: {}", dir.display(), e))
        })?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| RoomError::storage("room store lock poisoned"))
    }

    /// Latest committed state, or `None` before the first upload
    pub fn snapshot(&self) -> Result<Option<RoomManifest>> {
        let path = self.dir.join(MANIFEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RoomError::storage(format!("{}: {}", path.display(), e))),
        };

        let manifest: RoomManifest = serde_json::from_slice(&bytes)
            .map_err(|e| RoomError::storage(format!("{}: {}", path.display(), e)))?;
        Ok(Some(manifest))
    }

    fn artifact_path(&self, file: &str) -> Result<PathBuf> {
        // Manifest entries are plain file names inside the store directory
        if file.is_empty() || file.contains('/') || file.contains('\\') || file.starts_with('.') {
            return Err(RoomError::storage(format!("invalid artifact name {:?}", file)));
        }
        Ok(self.dir.join(file))
    }

    fn read_file(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.artifact_path(file)?;
        fs::read(&path).map_err(|e| RoomError::storage(format!("{}: {}", path.display(), e)))
    }

    pub fn load_artifact_bytes(
        &self,
        manifest: &RoomManifest,
        key: ArtifactKey,
    ) -> Result<Option<Vec<u8>>> {
        match manifest.file_for(key) {
            Some(file) => self.read_file(file).map(Some),
            None => Ok(None),
        }
    }

    pub fn load_photo(&self, manifest: &RoomManifest) -> Result<RgbImage> {
        let bytes = self.read_file(&manifest.photo)?;
        let photo = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|e| RoomError::storage(format!("{}: {}", manifest.photo, e)))?
            .to_rgb8();

        if photo.dimensions() != (manifest.width, manifest.height) {
            return Err(RoomError::storage(format!(
                "{} is {:?}, manifest says {}x{}",
                manifest.photo,
                photo.dimensions(),
                manifest.width,
                manifest.height
            )));
        }
        Ok(photo)
    }

    pub fn load_wall_mask(&self, manifest: &RoomManifest) -> Result<BinaryMask> {
        let bytes = self.read_file(&manifest.wall_mask)?;
        let mask = BinaryMask::from_png_bytes(&bytes)
            .map_err(|e| RoomError::storage(format!("{}: {}", manifest.wall_mask, e)))?;

        if mask.dimensions() != (manifest.width, manifest.height) {
            return Err(RoomError::storage(format!(
                "{} is {:?}, manifest says {}x{}",
                manifest.wall_mask,
                mask.dimensions(),
                manifest.width,
                manifest.height
            )));
        }
        Ok(mask)
    }

    pub fn load_corners(&self, manifest: &RoomManifest) -> Result<CornerEstimate> {
        let bytes = self.read_file(&manifest.corners)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RoomError::storage(format!("{}: {}", manifest.corners, e)))
    }

    /// Commit a new {photo, wall mask, corners} triple as the next generation.
    ///
    /// Nothing becomes visible until the manifest is replaced; if any write
    /// fails the files written so far are removed and the previous state
    /// stays authoritative.
    pub fn commit_upload(
        &self,
        photo: &RgbImage,
        mask: &BinaryMask,
        corners: &CornerEstimate,
        policy: CompositePolicy,
    ) -> Result<RoomManifest> {
        if mask.dimensions() != photo.dimensions() {
            return Err(RoomError::storage(format!(
                "wall mask {:?} does not match photo {:?}",
                mask.dimensions(),
                photo.dimensions()
            )));
        }

        let _guard = self.lock()?;

        let previous = match self.snapshot() {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Replacing unreadable room manifest: {}", e);
                None
            }
        };
        let generation = previous.as_ref().map_or(1, |m| m.generation + 1);

        let carried = match policy {
            CompositePolicy::Keep => previous.as_ref().and_then(|m| m.textured_room.clone()),
            CompositePolicy::Orphan => None,
        };

        let mut written = Vec::new();
        let manifest = match self.write_generation(
            generation,
            photo,
            mask,
            corners,
            carried,
            &mut written,
        ) {
            Ok(manifest) => manifest,
            Err(e) => {
                for path in &written {
                    remove_best_effort(path);
                }
                return Err(e);
            }
        };

        if let Some(previous) = previous {
            self.remove_superseded(&previous, &manifest);
        }

        info!(
            "Committed room generation {} ({}x{}, {} polygons, {} wall px)",
            manifest.generation,
            manifest.width,
            manifest.height,
            corners.len(),
            manifest.wall_pixels
        );

        Ok(manifest)
    }

    fn write_generation(
        &self,
        generation: u64,
        photo: &RgbImage,
        mask: &BinaryMask,
        corners: &CornerEstimate,
        textured_room: Option<CompositeRecord>,
        written: &mut Vec<PathBuf>,
    ) -> Result<RoomManifest> {
        let photo_file = ArtifactKey::RoomPhoto.file_name(generation);
        let mask_file = ArtifactKey::WallMask.file_name(generation);
        let corners_file = ArtifactKey::CornerEstimate.file_name(generation);

        let photo_bytes = encode_png(photo)?;
        written.push(self.write_atomic(&photo_file, &photo_bytes)?);

        let mask_bytes = mask.to_png_bytes().map_err(RoomError::storage)?;
        written.push(self.write_atomic(&mask_file, &mask_bytes)?);

        let corners_bytes = serde_json::to_vec(corners).map_err(RoomError::storage)?;
        written.push(self.write_atomic(&corners_file, &corners_bytes)?);

        let manifest = RoomManifest {
            generation,
            committed_at: Utc::now(),
            width: photo.width(),
            height: photo.height(),
            photo: photo_file,
            wall_mask: mask_file,
            corners: corners_file,
            wall_pixels: mask.count(),
            textured_room,
        };
        self.write_manifest(&manifest)?;

        Ok(manifest)
    }

    /// Store a composite rendered from `generation`, replacing any previous one.
    ///
    /// Fails with `Superseded` when another upload was committed after the
    /// caller took its snapshot.
    pub fn commit_composite(
        &self,
        generation: u64,
        composite: &RgbImage,
        texture: &str,
    ) -> Result<RoomManifest> {
        let _guard = self.lock()?;

        let mut manifest = self.snapshot()?.ok_or(RoomError::Precondition)?;
        if manifest.generation != generation {
            warn!(
                "Discarding composite for generation {}, current is {}",
                generation, manifest.generation
            );
            return Err(RoomError::Superseded);
        }
        if composite.dimensions() != (manifest.width, manifest.height) {
            return Err(RoomError::storage(format!(
                "composite {:?} does not match photo {}x{}",
                composite.dimensions(),
                manifest.width,
                manifest.height
            )));
        }

        let file = ArtifactKey::TexturedRoom.file_name(generation);
        let bytes = encode_png(composite)?;
        self.write_atomic(&file, &bytes)?;

        let previous = manifest.textured_room.replace(CompositeRecord {
            generation,
            file: file.clone(),
            texture: texture.to_string(),
            created_at: Utc::now(),
        });
        self.write_manifest(&manifest)?;

        if let Some(previous) = previous {
            if previous.file != file {
                if let Ok(path) = self.artifact_path(&previous.file) {
                    remove_best_effort(&path);
                }
            }
        }

        info!(
            "Committed textured room for generation {} (texture {})",
            generation, texture
        );
        Ok(manifest)
    }

    fn write_manifest(&self, manifest: &RoomManifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest).map_err(RoomError::storage)?;
        self.write_atomic(MANIFEST_FILE, &bytes)?;
        Ok(())
    }

    /// Write to a temp file in the same directory, then rename over the target
    fn write_atomic(&self, file: &str, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.dir.join(file);
        let temp = self
            .dir
            .join(format!(".{}.{}.tmp", file, uuid::Uuid::new_v4()));

        fs::write(&temp, bytes)
            .map_err(|e| RoomError::storage(format!("{}: {}", temp.display(), e)))?;
        if let Err(e) = fs::rename(&temp, &target) {
            remove_best_effort(&temp);
            return Err(RoomError::storage(format!("{}: {}", target.display(), e)));
        }

        debug!("Wrote {} ({} bytes)", target.display(), bytes.len());
        Ok(target)
    }

    /// Delete artifacts of the previous generation the new manifest no longer references
    fn remove_superseded(&self, previous: &RoomManifest, current: &RoomManifest) {
        let keys = [
            ArtifactKey::RoomPhoto,
            ArtifactKey::WallMask,
            ArtifactKey::CornerEstimate,
            ArtifactKey::TexturedRoom,
        ];

        for key in keys {
            let Some(old) = previous.file_for(key) else {
                continue;
            };
            if current.file_for(key) == Some(old) {
                continue;
            }
            if let Ok(path) = self.artifact_path(old) {
                remove_best_effort(&path);
            }
        }
    }
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(RoomError::storage)?;
    Ok(bytes)
}

fn remove_best_effort(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
