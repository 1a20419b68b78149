use serde::{Deserialize, Serialize};

/// Body of a successful upload: the public path of the stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
}
