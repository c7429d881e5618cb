#![forbid(unsafe_code)]

//! "File an issue" deep links.
//!
//! The override hook receives an [`IssueLinker`] so it can send the user to
//! an issue tracker with the error details pre-filled.

use std::sync::Arc;

use url::form_urlencoded;

use crate::error::CollaboratorError;
use crate::platform::Platform;

/// A deep link waiting to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueLink {
    pub base_url: String,
    pub params: Vec<(String, String)>,
}

impl IssueLink {
    pub fn new<K, V>(base_url: impl Into<String>, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            base_url: base_url.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// `base_url?query`, with the query form-urlencoded in parameter order.
    #[must_use]
    pub fn to_url(&self) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish();
        format!("{}?{}", self.base_url, query)
    }
}

/// Opens issue links through the platform's URL opener.
#[derive(Clone)]
pub struct IssueLinker {
    platform: Arc<dyn Platform>,
}

impl std::fmt::Debug for IssueLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueLinker").finish()
    }
}

impl IssueLinker {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Build `page_url?params` and open it externally.
    ///
    /// `page_url` is not validated; the hook calling this is trusted.
    pub fn create_issue<K, V>(
        &self,
        page_url: &str,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(), CollaboratorError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.open(IssueLink::new(page_url, params))
    }

    /// Open a prepared link. The link is consumed.
    pub fn open(&self, link: IssueLink) -> Result<(), CollaboratorError> {
        self.platform.open_url(&link.to_url())
    }
}
