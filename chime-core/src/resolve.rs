//! Sound reference resolution.
//!
//! A sound reference is either a URL (`file://`, `http://`, `https://`) or a
//! filesystem path. Relative paths are searched for under the configured sound
//! directories, the same way a project root and its `sounds/` folder are.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// URL schemes a sound reference may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    File,
    Http,
    Https,
}

impl Scheme {
    fn parse(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// A sound reference resolved to a loadable location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoundUrl {
    scheme: Scheme,
    /// Everything after `scheme://`, percent-encoding preserved.
    location: String,
}

impl SoundUrl {
    /// Builds a `file` URL for a filesystem path.
    pub fn from_path(path: &Path) -> Self {
        Self {
            scheme: Scheme::File,
            location: path.to_string_lossy().into_owned(),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns the filesystem path for `file` URLs.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        match self.scheme {
            Scheme::File => {
                let decoded = urlencoding::decode(&self.location)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| self.location.clone());
                Some(PathBuf::from(decoded))
            }
            _ => None,
        }
    }

    /// The decoded final path component; this is the sound's name.
    pub fn last_path_component(&self) -> String {
        last_path_component(&self.location)
    }
}

impl fmt::Display for SoundUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.location)
    }
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://(.*)$").expect("static regex is valid")
    })
}

/// Returns the final non-empty path component of a sound reference, with any
/// scheme, query and fragment stripped and percent-encoding decoded.
///
/// `"https://cdn.example.com/fx/click%20soft.mp3?v=2"` names `"click soft.mp3"`.
pub fn last_path_component(sound: &str) -> String {
    let trimmed = sound.trim();
    let rest = match url_pattern().captures(trimmed) {
        Some(caps) => caps.get(2).map_or("", |m| m.as_str()),
        None => trimmed,
    };
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    let segment = rest
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or("");
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Turns sound references into loadable URLs.
#[derive(Debug, Clone, Default)]
pub struct SoundResolver {
    search_dirs: Vec<PathBuf>,
}

impl SoundResolver {
    /// Creates a resolver searching the given directories for relative paths.
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Resolves a sound reference.
    pub fn resolve(&self, sound: &str) -> Result<SoundUrl> {
        let trimmed = sound.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
            return Err(Error::InvalidSoundRef(sound.to_string()));
        }

        if let Some(caps) = url_pattern().captures(trimmed) {
            let scheme_str = caps.get(1).map_or("", |m| m.as_str());
            let location = caps.get(2).map_or("", |m| m.as_str());
            let scheme =
                Scheme::parse(scheme_str).ok_or_else(|| Error::UnsupportedScheme(scheme_str.to_string()))?;
            if location.is_empty() || location.chars().any(char::is_whitespace) {
                return Err(Error::InvalidSoundRef(sound.to_string()));
            }
            return Ok(SoundUrl {
                scheme,
                location: location.to_string(),
            });
        }

        Ok(SoundUrl::from_path(&self.resolve_path(trimmed)?))
    }

    /// Resolves a filesystem path.
    /// Search order: absolute → each dir → each dir/sounds → error.
    fn resolve_path(&self, file: &str) -> Result<PathBuf> {
        let path = Path::new(file);
        if path.is_absolute() || self.search_dirs.is_empty() {
            return Ok(path.to_path_buf());
        }

        for dir in &self.search_dirs {
            let candidate = dir.join(file);
            if candidate.exists() {
                return Ok(candidate);
            }
            let candidate = dir.join("sounds").join(file);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(Error::SoundFileNotFound(file.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blank_reference_is_invalid() {
        let resolver = SoundResolver::default();
        assert!(matches!(resolver.resolve(""), Err(Error::InvalidSoundRef(_))));
        assert!(matches!(resolver.resolve("   "), Err(Error::InvalidSoundRef(_))));
        assert!(matches!(resolver.resolve("beep\u{0}.mp3"), Err(Error::InvalidSoundRef(_))));
    }

    #[test]
    fn test_url_references() {
        let resolver = SoundResolver::default();
        let url = resolver.resolve("https://cdn.example.com/fx/click.mp3").unwrap();
        assert_eq!(url.scheme(), Scheme::Https);
        assert_eq!(url.to_string(), "https://cdn.example.com/fx/click.mp3");
        assert_eq!(url.to_file_path(), None);

        let url = resolver.resolve("file:///tmp/my%20beep.wav").unwrap();
        assert_eq!(url.to_file_path(), Some(PathBuf::from("/tmp/my beep.wav")));
    }

    #[test]
    fn test_unsupported_scheme() {
        let resolver = SoundResolver::default();
        assert!(matches!(resolver.resolve("ftp://host/a.mp3"), Err(Error::UnsupportedScheme(s)) if s == "ftp"));
    }

    #[test]
    fn test_malformed_url() {
        let resolver = SoundResolver::default();
        assert!(matches!(resolver.resolve("https://"), Err(Error::InvalidSoundRef(_))));
        assert!(matches!(resolver.resolve("https://host/a b.mp3"), Err(Error::InvalidSoundRef(_))));
    }

    #[test]
    fn test_relative_without_search_dirs() {
        let resolver = SoundResolver::default();
        let url = resolver.resolve("beep.mp3").unwrap();
        assert_eq!(url.to_file_path(), Some(PathBuf::from("beep.mp3")));
    }

    #[test]
    fn test_search_dirs_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::create_dir_all(second.path().join("sounds")).unwrap();
        std::fs::write(second.path().join("sounds").join("beep.wav"), b"fake").unwrap();

        let resolver = SoundResolver::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let url = resolver.resolve("beep.wav").unwrap();
        assert_eq!(url.to_file_path(), Some(second.path().join("sounds").join("beep.wav")));

        std::fs::write(first.path().join("beep.wav"), b"fake").unwrap();
        let url = resolver.resolve("beep.wav").unwrap();
        assert_eq!(url.to_file_path(), Some(first.path().join("beep.wav")));
    }

    #[test]
    fn test_resolve_path_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = SoundResolver::new(vec![temp_dir.path().to_path_buf()]);
        assert!(matches!(resolver.resolve("nonexistent.wav"), Err(Error::SoundFileNotFound(_))));
    }

    #[test]
    fn test_last_path_component() {
        assert_eq!(last_path_component("click.mp3"), "click.mp3");
        assert_eq!(last_path_component("sounds/ui/click.mp3"), "click.mp3");
        assert_eq!(last_path_component("file:///a/b/click.mp3"), "click.mp3");
        assert_eq!(last_path_component("https://x.io/fx/click%20soft.mp3?v=2"), "click soft.mp3");
        assert_eq!(last_path_component("https://x.io/fx/"), "fx");
        assert_eq!(last_path_component(""), "");
    }
}
