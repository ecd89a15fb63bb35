//! Citation grouping for assistant messages.
//!
//! Annotations arrive as a flat list (one per retrieved chunk), so the same
//! document usually shows up several times with different pages. Grouping
//! collapses them into one [`ReferenceGroup`] per document, in first-seen order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Group key used when an annotation names neither a file nor a text.
pub const UNKNOWN_DOCUMENT: &str = "Unknown Document";

/// Placeholder rendered for missing pages or links.
pub const NOT_AVAILABLE: &str = "N/A";

/// A citation attached to an assistant message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub page_number: Option<i64>,
}

impl Annotation {
    /// Display key: `file_name`, else `text`, else [`UNKNOWN_DOCUMENT`]. Empty strings count as absent.
    pub fn group_key(&self) -> &str {
        non_empty(self.file_name.as_deref())
            .or_else(|| non_empty(self.text.as_deref()))
            .unwrap_or(UNKNOWN_DOCUMENT)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// One document's aggregated citations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceGroup {
    pub document: String,
    /// URL of the first annotation seen for this document.
    pub url: Option<String>,
    /// Strictly ascending, no duplicates.
    pub pages: Vec<i64>,
}

impl ReferenceGroup {
    /// `"1, 3, 7"` or [`NOT_AVAILABLE`].
    pub fn pages_label(&self) -> String {
        if self.pages.is_empty() {
            return NOT_AVAILABLE.to_string();
        }
        self.pages
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The URL, only when it is non-blank.
    pub fn link(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }

    pub fn link_label(&self) -> &str {
        self.link().unwrap_or(NOT_AVAILABLE)
    }
}

/// Group annotations by document, preserving first-seen order.
pub fn group_annotations(annotations: &[Annotation]) -> Vec<ReferenceGroup> {
    let mut groups: Vec<ReferenceGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for annotation in annotations {
        let key = annotation.group_key();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(ReferenceGroup {
                document: key.to_string(),
                url: annotation.url.clone(),
                pages: Vec::new(),
            });
            groups.len() - 1
        });
        if let Some(page) = annotation.page_number {
            groups[slot].pages.push(page);
        }
    }

    for group in &mut groups {
        group.pages.sort_unstable();
        group.pages.dedup();
    }
    groups
}

/// Plain-text reference panel, or `None` when there is nothing to cite.
pub fn render_references(annotations: &[Annotation]) -> Option<String> {
    let groups = group_annotations(annotations);
    if groups.is_empty() {
        return None;
    }
    let mut out = String::from("References:\n");
    for (i, group) in groups.iter().enumerate() {
        out.push_str(&format!(
            "  [{}] {} | pages: {} | link: {}\n",
            i + 1,
            group.document,
            group.pages_label(),
            group.link_label()
        ));
    }
    Some(out)
}
