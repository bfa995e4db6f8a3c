use std::{collections::BTreeMap, fmt};

use {
    chrono::NaiveDate,
    serde::{Deserialize, Serialize},
};

/// A supertag applied to a new node, with optional field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supertag {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Plain,
    Reference,
    Date,
    Url,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Reference => "reference",
            Self::Date => "date",
            Self::Url => "url",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of one node-creation call.
///
/// Exactly one of `name`, `referenceId`, `date` or `url` is set, chosen by the
/// constructor; absent fields are omitted from the JSON document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    #[serde(skip)]
    kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_node_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    supertags: Vec<Supertag>,
}

impl NodeRequest {
    fn empty(kind: NodeKind) -> Self {
        Self {
            kind,
            name: None,
            reference_id: None,
            date: None,
            url: None,
            description: None,
            target_node_id: None,
            supertags: Vec::new(),
        }
    }

    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::empty(NodeKind::Plain)
        }
    }

    pub fn reference(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            ..Self::empty(NodeKind::Reference)
        }
    }

    pub fn date(date: NaiveDate) -> Self {
        Self {
            date: Some(date.format("%Y-%m-%d").to_string()),
            ..Self::empty(NodeKind::Date)
        }
    }

    /// The caller is expected to have validated `url` already.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::empty(NodeKind::Url)
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_target(mut self, target_node_id: Option<String>) -> Self {
        self.target_node_id = target_node_id;
        self
    }

    pub fn with_supertags(mut self, supertags: Vec<Supertag>) -> Self {
        self.supertags = supertags;
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn target_node_id(&self) -> Option<&str> {
        self.target_node_id.as_deref()
    }
}
