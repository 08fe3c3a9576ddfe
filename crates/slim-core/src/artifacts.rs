//! On-disk artifact layout for a profiling session.
//!
//! ```text
//! <state_dir>/images/<image id>/image.json
//! <state_dir>/images/<image id>/artifacts/creport.json   (written by the sensor)
//! <state_dir>/images/<image id>/artifacts/events.json
//! ```

use std::path::{Path, PathBuf};

use slim_types::{ExternalStep, ImageInfo, LaunchedContainer, Result, SensorEvent, SlimError};
use tracing::{debug, info};

/// Report the sensor leaves in the artifact directory.
pub const SENSOR_REPORT_FILE: &str = "creport.json";
const IMAGE_FILE: &str = "image.json";
const EVENTS_FILE: &str = "events.json";

/// Prepares, fills and removes the artifact location of one session.
pub trait ArtifactStore: Send {
    /// Create the artifact directory for `image` and return its path.
    fn prepare(&mut self, image: &ImageInfo) -> Result<PathBuf>;

    /// Persist the image metadata next to the artifacts.
    fn process_image_data(&mut self, image: &ImageInfo) -> Result<()>;

    /// Validate what the sensor produced and record the session's events.
    fn process_container_data(
        &mut self,
        container: &LaunchedContainer,
        events: &[SensorEvent],
    ) -> Result<PathBuf>;

    /// Delete the artifact directory.
    fn remove_artifacts(&mut self) -> Result<()>;
}

/// Filesystem artifact store rooted at the state directory.
pub struct FsArtifactStore {
    state_dir: PathBuf,
    image_dir: Option<PathBuf>,
}

impl FsArtifactStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            image_dir: None,
        }
    }

    pub fn artifact_dir(&self) -> Option<PathBuf> {
        self.image_dir.as_ref().map(|d| d.join("artifacts"))
    }

    fn require_image_dir(&self, step: ExternalStep) -> Result<&Path> {
        self.image_dir
            .as_deref()
            .ok_or_else(|| SlimError::step(step, "artifact location was never prepared"))
    }
}

/// Directory-safe form of an image id (`sha256:abc` -> `abc`).
fn image_dir_name(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

impl ArtifactStore for FsArtifactStore {
    fn prepare(&mut self, image: &ImageInfo) -> Result<PathBuf> {
        let image_dir = self.state_dir.join("images").join(image_dir_name(&image.id));
        let artifact_dir = image_dir.join("artifacts");
        std::fs::create_dir_all(&artifact_dir).map_err(|e| {
            SlimError::step(
                ExternalStep::ImageInspection,
                format!("failed to create {}: {e}", artifact_dir.display()),
            )
        })?;

        debug!(dir = %artifact_dir.display(), "Artifact location prepared");
        self.image_dir = Some(image_dir);
        Ok(artifact_dir)
    }

    fn process_image_data(&mut self, image: &ImageInfo) -> Result<()> {
        let path = self.require_image_dir(ExternalStep::ImageInspection)?.join(IMAGE_FILE);
        let json = serde_json::to_string_pretty(image)?;
        std::fs::write(&path, json).map_err(|e| {
            SlimError::step(
                ExternalStep::ImageInspection,
                format!("failed to write {}: {e}", path.display()),
            )
        })?;
        debug!(path = %path.display(), "Image metadata saved");
        Ok(())
    }

    fn process_container_data(
        &mut self,
        container: &LaunchedContainer,
        events: &[SensorEvent],
    ) -> Result<PathBuf> {
        let artifact_dir = self
            .require_image_dir(ExternalStep::DataCollection)?
            .join("artifacts");

        let report_path = artifact_dir.join(SENSOR_REPORT_FILE);
        let raw = std::fs::read_to_string(&report_path).map_err(|e| {
            SlimError::step(
                ExternalStep::DataCollection,
                format!("sensor report {} unavailable: {e}", report_path.display()),
            )
        })?;
        serde_json::from_str::<serde_json::Value>(&raw).map_err(|e| {
            SlimError::step(
                ExternalStep::DataCollection,
                format!("sensor report {} is not valid JSON: {e}", report_path.display()),
            )
        })?;

        let record = serde_json::json!({
            "container_id": container.id,
            "container_name": container.name,
            "events": events,
        });
        let events_path = artifact_dir.join(EVENTS_FILE);
        std::fs::write(&events_path, serde_json::to_string_pretty(&record)?).map_err(|e| {
            SlimError::step(
                ExternalStep::DataCollection,
                format!("failed to write {}: {e}", events_path.display()),
            )
        })?;

        info!(report = %report_path.display(), events = events.len(), "Container data collected");
        Ok(report_path)
    }

    fn remove_artifacts(&mut self) -> Result<()> {
        let artifact_dir = self
            .require_image_dir(ExternalStep::ArtifactRemoval)?
            .join("artifacts");
        std::fs::remove_dir_all(&artifact_dir).map_err(|e| {
            SlimError::step(
                ExternalStep::ArtifactRemoval,
                format!("failed to remove {}: {e}", artifact_dir.display()),
            )
        })?;
        info!(dir = %artifact_dir.display(), "Artifacts removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageInfo {
        ImageInfo {
            id: "sha256:0f1e2d".to_string(),
            repo_tags: vec!["nginx:latest".to_string()],
            ..Default::default()
        }
    }

    fn container() -> LaunchedContainer {
        LaunchedContainer {
            id: "c0ffee".to_string(),
            name: "slim-profile".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn image_dir_name_strips_digest_prefix() {
        assert_eq!(image_dir_name("sha256:0f1e2d"), "0f1e2d");
        assert_eq!(image_dir_name("repo/app:1.0"), "repo_app_1.0");
    }

    #[test]
    fn prepare_creates_layout_and_saves_image() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsArtifactStore::new(tmp.path());

        let dir = store.prepare(&image()).unwrap();
        assert_eq!(dir, tmp.path().join("images/0f1e2d/artifacts"));
        assert!(dir.is_dir());

        store.process_image_data(&image()).unwrap();
        let saved = std::fs::read_to_string(tmp.path().join("images/0f1e2d/image.json")).unwrap();
        let saved: ImageInfo = serde_json::from_str(&saved).unwrap();
        assert_eq!(saved.repo_tags, vec!["nginx:latest"]);
    }

    #[test]
    fn collection_requires_sensor_report() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsArtifactStore::new(tmp.path());
        store.prepare(&image()).unwrap();

        let err = store.process_container_data(&container(), &[]).unwrap_err();
        assert!(matches!(
            err,
            SlimError::Step {
                step: ExternalStep::DataCollection,
                ..
            }
        ));
    }

    #[test]
    fn collection_records_events() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsArtifactStore::new(tmp.path());
        let dir = store.prepare(&image()).unwrap();
        std::fs::write(dir.join(SENSOR_REPORT_FILE), r#"{"monitors":{}}"#).unwrap();

        let events = [SensorEvent::new("monitor.finish.completed")];
        let report = store.process_container_data(&container(), &events).unwrap();
        assert_eq!(report, dir.join(SENSOR_REPORT_FILE));

        let record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(EVENTS_FILE)).unwrap()).unwrap();
        assert_eq!(record["container_id"], "c0ffee");
        assert_eq!(record["events"][0]["payload"], "monitor.finish.completed");
    }

    #[test]
    fn remove_deletes_artifacts_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FsArtifactStore::new(tmp.path());
        let dir = store.prepare(&image()).unwrap();
        store.process_image_data(&image()).unwrap();

        store.remove_artifacts().unwrap();
        assert!(!dir.exists());
        assert!(tmp.path().join("images/0f1e2d/image.json").exists());

        // Second removal has nothing to delete.
        assert!(store.remove_artifacts().is_err());
    }

    #[test]
    fn unprepared_store_rejects_collection() {
        let mut store = FsArtifactStore::new("/nonexistent");
        assert!(store.process_container_data(&container(), &[]).is_err());
        assert!(store.remove_artifacts().is_err());
    }
}
