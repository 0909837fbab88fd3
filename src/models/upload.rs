//! Wire types for the upload and delete endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage tag carried by every result and accepted by deletion.
pub const LOCAL_STORAGE: &str = "local";

/// Public description of one stored image.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FullResult {
    /// `<digest><ext>`
    #[serde(rename = "fileName")]
    pub file_name: String,

    #[serde(rename = "imgURL")]
    pub img_url: String,

    /// Extension including the leading dot.
    pub extname: String,

    #[serde(rename = "type")]
    pub kind: String,

    /// Fresh per response; never used for lookup.
    pub id: Uuid,

    /// Seconds since the Unix epoch. For a duplicate upload this is the
    /// existing file's modification time.
    #[serde(rename = "createdAt")]
    pub created_at: i64,

    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

/// Response envelope shared by upload and delete.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UploadResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<String>>,

    #[serde(rename = "fullResult", skip_serializing_if = "Option::is_none")]
    pub full_result: Option<Vec<FullResult>>,
}

impl UploadResponse {
    pub fn uploaded(results: Vec<FullResult>) -> Self {
        Self {
            success: true,
            message: None,
            result: Some(results.iter().map(|r| r.img_url.clone()).collect()),
            full_result: Some(results),
        }
    }

    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// One entry of a delete request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeleteItem {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "imgURL")]
    pub img_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeleteRequest {
    #[serde(default)]
    pub list: Vec<DeleteItem>,
}

/// JSON upload body (clipboard when `list` is empty, local paths otherwise).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadRequest {
    #[serde(default)]
    pub list: Vec<String>,
}
