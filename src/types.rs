use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Current time truncated to whole seconds, the precision the card codec
/// stores, so freshly created cards survive a serialize/parse round trip.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// A single card. One card maps to exactly one file on disk; the identity is
/// stable for the lifetime of the card and, together with the column id,
/// determines the file path. Titles may change freely without a rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub title: String,
    pub column: String,
    /// Ordering key, see `position`. Plain string comparison over these keys
    /// is the collection's sort order.
    pub position: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub body: String,
}

impl Card {
    /// Sort key used everywhere the collection is ordered. The id tiebreak
    /// only matters across columns, where equal position keys are legal.
    pub fn sort_key(&self) -> (&str, &str) {
        (&self.position, &self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Board configuration: column order, label palette, and the optional
/// template body applied to newly created cards that supply none.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub title: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl Board {
    pub fn has_column(&self, id: &str) -> bool {
        self.columns.iter().any(|c| c.id == id)
    }

    pub fn has_label(&self, id: &str) -> bool {
        self.labels.iter().any(|l| l.id == id)
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }
}
