//! Item data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::state::Status;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub status: Status,
    pub created_at: chrono::DateTime<chrono::Utc>,

    #[serde(default)]
    pub preset: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub cli: String,
    #[serde(default)]
    pub cookies: Option<String>,

    pub auto_start: bool,
    #[serde(default)]
    pub extras: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub extractor: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,

    /// Progress fields, updated in-place while `downloading`. Not persisted
    /// to the history table (reset/omitted once terminal).
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub speed_bytes_per_sec: Option<f64>,
    #[serde(default)]
    pub eta_seconds: Option<u64>,
}

/// Request shape for `add`/`add_batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemSpec {
    pub url: String,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub cli: Option<String>,
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Item {
    pub fn new(id: String, spec: ItemSpec, created_at: chrono::DateTime<chrono::Utc>) -> Self {
        let status = Status::initial(spec.auto_start);
        Self {
            id,
            url: spec.url,
            status,
            created_at,
            preset: spec.preset.unwrap_or_default(),
            folder: spec.folder.unwrap_or_default(),
            template: spec.template.unwrap_or_default(),
            cli: spec.cli.unwrap_or_default(),
            cookies: spec.cookies,
            auto_start: spec.auto_start,
            extras: spec.extras,
            error: None,
            filename: None,
            file_size: None,
            extractor: None,
            title: None,
            thumbnail: None,
            duration: None,
            downloaded_bytes: 0,
            total_bytes: None,
            speed_bytes_per_sec: None,
            eta_seconds: None,
        }
    }
}

/// Rejects `folder` values that would escape the download root.
pub fn validate_folder(folder: &str) -> Result<(), String> {
    if folder.is_empty() {
        return Ok(());
    }
    let path = std::path::Path::new(folder);
    if path.is_absolute() {
        return Err(format!("folder {folder:?} must be relative to the download root"));
    }
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(format!("folder {folder:?} must not contain '..'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_folder_is_rejected() {
        assert!(validate_folder("/abs").is_err());
    }

    #[test]
    fn parent_dir_escape_is_rejected() {
        assert!(validate_folder("../escape").is_err());
        assert!(validate_folder("a/../../b").is_err());
    }

    #[test]
    fn plain_relative_folder_is_accepted() {
        assert!(validate_folder("movies/2024").is_ok());
        assert!(validate_folder("").is_ok());
    }

    #[test]
    fn new_item_status_depends_on_auto_start() {
        let now = chrono::Utc::now();
        let spec = ItemSpec {
            url: "https://example.com/v".into(),
            preset: None,
            folder: None,
            template: None,
            cli: None,
            cookies: None,
            auto_start: false,
            extras: HashMap::new(),
        };
        let item = Item::new("id1".into(), spec, now);
        assert_eq!(item.status, Status::Paused);
    }
}
