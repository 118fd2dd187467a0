//! Queue elements: pointer files that stand in for a payload.
//!
//! A queue element is a small text file whose entire content is the absolute
//! path of the payload to deliver. Because the element, not the payload, is
//! what moves between queue directories, one payload on disk can be fanned
//! out to any number of destination queues without being copied.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, StationError};

/// File extension for queue element files.
pub const ELEMENT_EXT: &str = "qe";

/// A pointer file referencing a payload elsewhere on disk.
#[derive(Debug, Clone)]
pub struct QueueElement {
    path: PathBuf,
}

impl QueueElement {
    /// Wrap an existing queue element file. Does not touch the filesystem.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a new element next to `payload`, pointing at it.
    ///
    /// The element gets a process-unique name so that elements for the same
    /// payload bound for different destinations never collide.
    pub fn create(payload: &Path) -> Result<Self> {
        let payload = absolute(payload)?;
        let dir = payload
            .parent()
            .ok_or_else(|| StationError::queue("payload has no parent directory"))?;
        let path = dir.join(unique_name());
        fs::write(&path, payload.to_string_lossy().as_bytes())?;
        Ok(Self { path })
    }

    /// Copy `payload` into `pool_dir` under a unique name, then create an
    /// element pointing at the copy.
    ///
    /// Used when the payload lives on a different filesystem from the queue
    /// directories, where a plain rename is not atomic.
    pub fn create_copied(payload: &Path, pool_dir: &Path) -> Result<Self> {
        fs::create_dir_all(pool_dir)?;
        let name = payload
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| format!("{}-{}", Uuid::new_v4(), n))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let copy = pool_dir.join(name);
        fs::copy(payload, &copy)?;
        Self::create(&copy)
    }

    /// Path of the element file itself.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the payload path.
    ///
    /// A missing or unreadable pointer, an empty body, or a payload that no
    /// longer exists on disk are all permanent failures for this element:
    /// the payload can never be located again, so callers must quarantine
    /// rather than retry.
    pub fn resolve(&self) -> Result<PathBuf> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            StationError::queue(format!(
                "unreadable queue element {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(StationError::queue(format!(
                "empty queue element {}",
                self.path.display()
            )));
        }
        let payload = PathBuf::from(trimmed);
        if !payload.exists() {
            return Err(StationError::queue(format!(
                "queue element {} references a missing payload {}",
                self.path.display(),
                payload.display()
            )));
        }
        Ok(payload)
    }

    /// Rename this element into a destination queue directory, creating the
    /// directory if necessary.
    ///
    /// On a name collision the element is renamed under an alternate unique
    /// name rather than overwriting the entry already in the queue.
    pub fn enqueue(mut self, dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let name = self
            .path
            .file_name()
            .ok_or_else(|| StationError::queue("queue element has no file name"))?
            .to_os_string();
        let mut target = dir.join(&name);
        if target.exists() {
            target = dir.join(format!(
                "alt-{}-{}",
                Uuid::new_v4(),
                name.to_string_lossy()
            ));
        }
        fs::rename(&self.path, &target)?;
        self.path = target;
        Ok(self)
    }

    /// Delete the element file. The payload is untouched.
    pub fn remove(self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

fn unique_name() -> String {
    format!("{}.{}", Uuid::new_v4(), ELEMENT_EXT)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("image.dat");
        fs::write(&payload, b"pixels").unwrap();

        let element = QueueElement::create(&payload).unwrap();
        assert!(element.path().exists());
        assert_eq!(element.resolve().unwrap(), payload);
    }

    #[test]
    fn test_enqueue_moves_the_pointer_not_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("image.dat");
        fs::write(&payload, b"pixels").unwrap();
        let queue_dir = dir.path().join("dest");

        let element = QueueElement::create(&payload).unwrap();
        let element = element.enqueue(&queue_dir).unwrap();

        assert!(element.path().starts_with(&queue_dir));
        assert!(payload.exists());
        assert_eq!(element.resolve().unwrap(), payload);
    }

    #[test]
    fn test_enqueue_collision_uses_alternate_name() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("image.dat");
        fs::write(&payload, b"pixels").unwrap();
        let queue_dir = dir.path().join("dest");
        fs::create_dir_all(&queue_dir).unwrap();

        let element = QueueElement::create(&payload).unwrap();
        let name = element.path().file_name().unwrap().to_os_string();
        // Occupy the element's name in the destination.
        fs::write(queue_dir.join(&name), b"squatter").unwrap();

        let element = element.enqueue(&queue_dir).unwrap();
        let moved = element.path().file_name().unwrap().to_string_lossy();
        assert!(moved.starts_with("alt-"));
        // The original entry is intact.
        assert_eq!(fs::read(queue_dir.join(&name)).unwrap(), b"squatter");
    }

    #[test]
    fn test_create_copied_points_at_the_copy() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("image.dat");
        fs::write(&payload, b"pixels").unwrap();
        let pool = dir.path().join("pool");

        let element = QueueElement::create_copied(&payload, &pool).unwrap();
        let resolved = element.resolve().unwrap();
        assert!(resolved.starts_with(&pool));
        assert_eq!(fs::read(&resolved).unwrap(), b"pixels");
        assert!(payload.exists());
    }

    #[test]
    fn test_resolve_missing_pointer_is_permanent_failure() {
        let element = QueueElement::open("/nonexistent/element.qe");
        assert!(element.resolve().is_err());
    }

    #[test]
    fn test_resolve_missing_payload_is_permanent_failure() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("image.dat");
        fs::write(&payload, b"pixels").unwrap();

        let element = QueueElement::create(&payload).unwrap();
        fs::remove_file(&payload).unwrap();
        assert!(element.resolve().is_err());
    }

    #[test]
    fn test_resolve_empty_pointer_is_permanent_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.qe");
        fs::write(&path, b"   \n").unwrap();
        assert!(QueueElement::open(&path).resolve().is_err());
    }
}
