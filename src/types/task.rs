//! Task descriptors and payloads
//!
//! A queue element carries a free-text reference and an optional JSON
//! payload. [`TaskDescriptor::resolve`] turns that into a [`RefreshTarget`];
//! anything wrong with the payload is a business error.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::TaskError;

/// Post-processing tag that triggers the monthly archive copy
pub const MONTHLY_FOLDER: &str = "MonthlyFolder";

/// Separator of the legacy `<file_path>|<tag>` reference format
pub const LEGACY_SEPARATOR: char = '|';

// ─────────────────────────────────────────────────────────────────
// Wire Payload
// ─────────────────────────────────────────────────────────────────

/// JSON payload stored in a queue element's data field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Remote site URL
    #[serde(rename = "SharePointSite", default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// `<library>/<subfolder…>/<filename>`
    #[serde(rename = "FolderPath", default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,

    /// Optional post-processing mode
    #[serde(rename = "CustomFunction", default, skip_serializing_if = "Option::is_none")]
    pub custom_function: Option<String>,
}

/// What happens after the refreshed file has been uploaded back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostProcessing {
    #[default]
    Standard,
    /// Also upload a dated copy into the monthly archive folder
    MonthlyFolder,
}

impl PostProcessing {
    /// Unknown or empty tags are treated as standard processing
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            Some(MONTHLY_FOLDER) => PostProcessing::MonthlyFolder,
            _ => PostProcessing::Standard,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Remote Path
// ─────────────────────────────────────────────────────────────────

/// A remote file location split into library, subfolder and filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub library: String,
    pub subfolder: Option<String>,
    pub filename: String,
}

impl RemotePath {
    /// Parse `<library>/<subfolder…>/<filename>`
    ///
    /// Leading, trailing and repeated slashes are tolerated, except that a
    /// trailing slash means the path names a folder and is rejected.
    pub fn parse(raw: &str) -> Result<Self, TaskError> {
        let trimmed = raw.trim();
        if trimmed.ends_with('/') || trimmed.ends_with('\\') {
            return Err(TaskError::business(format!(
                "FolderPath '{}' does not name a file",
                raw
            )));
        }

        let segments: Vec<&str> = trimmed
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        match segments.as_slice() {
            [] => Err(TaskError::business("FolderPath is empty")),
            [_] => Err(TaskError::business(format!(
                "FolderPath '{}' must contain a library and a file name",
                raw
            ))),
            [library, middle @ .., filename] => {
                if segments.iter().any(|s| *s == "." || *s == "..") {
                    return Err(TaskError::business(format!(
                        "FolderPath '{}' contains relative segments",
                        raw
                    )));
                }
                Ok(Self {
                    library: library.to_string(),
                    subfolder: (!middle.is_empty()).then(|| middle.join("/")),
                    filename: filename.to_string(),
                })
            }
        }
    }

    /// Remote folder containing the file
    pub fn folder(&self) -> String {
        match &self.subfolder {
            Some(sub) => format!("{}/{}", self.library, sub),
            None => self.library.clone(),
        }
    }

    /// Directory under the work dir receiving the local copy
    pub fn local_dir(&self) -> &str {
        self.subfolder.as_deref().unwrap_or(&self.library)
    }

    /// File extension including the dot, or empty
    pub fn extension(&self) -> &str {
        match self.filename.rfind('.') {
            Some(idx) if idx > 0 => &self.filename[idx..],
            _ => "",
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder(), self.filename)
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Descriptor
// ─────────────────────────────────────────────────────────────────

/// One dequeued work item, immutable once read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Queue element identifier
    pub id: Uuid,

    /// Free-text reference (the folder path for seeded elements)
    pub reference: String,

    /// Raw JSON payload
    pub data: Option<String>,
}

/// A validated task, ready for the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    pub site: String,
    pub path: RemotePath,
    pub post_processing: PostProcessing,
}

impl TaskDescriptor {
    pub fn new(id: Uuid, reference: impl Into<String>, data: Option<String>) -> Self {
        Self {
            id,
            reference: reference.into(),
            data,
        }
    }

    /// Validate the payload and build the refresh target
    ///
    /// Elements without data fall back to the legacy `<path>|<tag>`
    /// reference, paired with `default_site`.
    pub fn resolve(&self, default_site: Option<&str>) -> Result<RefreshTarget, TaskError> {
        let payload = self.payload()?;

        let site = payload
            .site
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| default_site.map(str::trim).filter(|s| !s.is_empty()))
            .ok_or_else(|| TaskError::business("SharePointSite is missing and no default site is configured"))?;

        Url::parse(site)
            .map_err(|e| TaskError::business(format!("SharePointSite '{}' is not a valid URL: {}", site, e)))?;

        let folder_path = payload
            .folder_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| TaskError::business("FolderPath is missing"))?;

        Ok(RefreshTarget {
            site: site.trim_end_matches('/').to_string(),
            path: RemotePath::parse(folder_path)?,
            post_processing: PostProcessing::from_tag(payload.custom_function.as_deref()),
        })
    }

    fn payload(&self) -> Result<TaskPayload, TaskError> {
        match self.data.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| TaskError::business(format!("Task data is not a valid payload: {}", e))),
            None => {
                let (path, _tag) = self.reference.split_once(LEGACY_SEPARATOR).ok_or_else(|| {
                    TaskError::business(format!(
                        "Element '{}' has no data and is not a '<path>|<tag>' reference",
                        self.reference
                    ))
                })?;
                Ok(TaskPayload {
                    site: None,
                    folder_path: Some(path.trim().to_string()),
                    custom_function: None,
                })
            }
        }
    }
}
