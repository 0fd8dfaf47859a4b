//! Read-only texture library rooted at a single directory.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::error::{Result, RoomError};

/// Raster extensions offered to the user
const TEXTURE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct TextureLibrary {
    dir: PathBuf,
}

impl TextureLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Texture identifiers (file names) with a known raster extension, sorted
    pub fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read texture library {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| has_texture_extension(name))
            .collect();

        names.sort();
        names
    }

    /// Resolve a texture identifier to a file strictly inside the library.
    ///
    /// Identifiers are bare file names. Anything with a directory component,
    /// a parent reference or an absolute path is rejected, as is a name whose
    /// canonical location (after following symlinks) leaves the library.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if !is_plain_file_name(name) {
            return Err(RoomError::PathEscape(name.to_string()));
        }
        if !has_texture_extension(name) {
            return Err(RoomError::Texture(name.to_string()));
        }

        let root = self
            .dir
            .canonicalize()
            .map_err(|e| RoomError::Texture(format!("{}: {}", self.dir.display(), e)))?;
        let candidate = root.join(name);

        let resolved = candidate
            .canonicalize()
            .map_err(|_| RoomError::Texture(name.to_string()))?;

        if !resolved.starts_with(&root) {
            return Err(RoomError::PathEscape(name.to_string()));
        }
        if !resolved.is_file() {
            return Err(RoomError::Texture(name.to_string()));
        }

        Ok(resolved)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return false;
    }

    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn has_texture_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            TEXTURE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> (tempfile::TempDir, TextureLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let textures = dir.path().join("textures");
        fs::create_dir_all(&textures).unwrap();
        for name in ["wood.jpg", "brick.png", "Marble.JPEG", "notes.txt", "readme"] {
            fs::write(textures.join(name), b"x").unwrap();
        }
        fs::create_dir_all(textures.join("nested.png")).unwrap();
        fs::write(dir.path().join("secret.png"), b"x").unwrap();

        let library = TextureLibrary::new(textures);
        (dir, library)
    }

    #[test]
    fn test_list_filters_extensions_and_sorts() {
        let (_dir, library) = library();
        assert_eq!(library.list(), vec!["Marble.JPEG", "brick.png", "wood.jpg"]);
    }

    #[test]
    fn test_list_of_missing_dir_is_empty() {
        let library = TextureLibrary::new("/nonexistent/texture/library");
        assert!(library.list().is_empty());
    }

    #[test]
    fn test_resolve_plain_name() {
        let (_dir, library) = library();
        let path = library.resolve("brick.png").unwrap();
        assert!(path.ends_with("brick.png"));
        assert!(path.starts_with(library.dir().canonicalize().unwrap()));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let (_dir, library) = library();
        for name in [
            "../secret.png",
            "..",
            "./brick.png",
            "sub/brick.png",
            "..\\secret.png",
            "/etc/passwd",
            "",
        ] {
            assert!(
                matches!(library.resolve(name), Err(RoomError::PathEscape(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_out_of_library() {
        let (dir, library) = library();
        std::os::unix::fs::symlink(dir.path().join("secret.png"), library.dir().join("link.png"))
            .unwrap();

        assert!(matches!(
            library.resolve("link.png"),
            Err(RoomError::PathEscape(_))
        ));
    }

    #[test]
    fn test_resolve_missing_or_non_raster() {
        let (_dir, library) = library();
        assert!(matches!(library.resolve("missing.png"), Err(RoomError::Texture(_))));
        assert!(matches!(library.resolve("notes.txt"), Err(RoomError::Texture(_))));
        assert!(matches!(library.resolve("nested.png"), Err(RoomError::Texture(_))));
    }
}
