//! Build output: the created template.

use crate::error::ProviderError;
use crate::provider::{tolerate, ResourceProvider, BENIGN_DELETE};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const BUILDER_ID: &str = "gridbake.gridscale";

/// A template produced by a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub uuid: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }

    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    pub fn id(&self) -> &str {
        &self.uuid
    }

    /// Delete the template. A template that is already gone counts as destroyed.
    pub async fn destroy(&self, provider: &dyn ResourceProvider) -> Result<(), ProviderError> {
        tolerate(provider.delete_template(&self.uuid).await, BENIGN_DELETE)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A template was created: '{}' (ID: {})", self.name, self.uuid)
    }
}
