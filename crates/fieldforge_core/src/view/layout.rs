//! Base layout analysis.
//!
//! # Responsibility
//! - Locate anchor fields inside a layout arch.
//! - Resolve where the "end of the main field list" is for each view type.
//!
//! # Invariants
//! - Offsets returned here are byte offsets into the analysed arch and always
//!   fall on element boundaries.
//! - Only the first occurrence of an anchor counts.

use crate::model::attribute::TargetView;
use crate::repo::view_repo::{ViewError, ViewResult};
use once_cell::sync::Lazy;
use regex::Regex;

static ROOT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*<([a-z][a-z0-9_]*)[\s>]").expect("valid root tag regex"));

/// Where and how a field element is spliced into an arch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionPoint {
    /// Byte offset the element is inserted at.
    pub offset: usize,
    /// Xpath expression addressing the reference node in fragment XML.
    pub xpath: String,
    /// Xpath `position` attribute (`after`, `inside`, `before`).
    pub position: &'static str,
}

/// Returns the root element name of `arch`.
pub fn root_tag(arch: &str) -> Option<&str> {
    ROOT_TAG_RE
        .captures(arch)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Returns the byte span of the first `<field name="...">` element for `name`.
///
/// Both self-closing and paired forms are recognized.
pub fn find_field(arch: &str, name: &str) -> Option<(usize, usize)> {
    let pattern = format!(
        r#"(?s)<field\s+name="{}"(?:\s[^>]*?)?(?:/>|>.*?</field>)"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    re.find(arch).map(|m| (m.start(), m.end()))
}

pub fn has_field(arch: &str, name: &str) -> bool {
    find_field(arch, name).is_some()
}

/// Insertion point right after the anchor field, if the anchor exists.
pub fn anchor_point(arch: &str, anchor: &str) -> Option<InsertionPoint> {
    find_field(arch, anchor).map(|(_, end)| InsertionPoint {
        offset: end,
        xpath: format!("//field[@name='{anchor}']"),
        position: "after",
    })
}

/// Insertion point at the end of the main field list of `target_view`.
///
/// - form: end of the first `<group>`, else end of the root.
/// - kanban: right before `<templates>`, else end of the root.
/// - tree: end of the root.
pub fn main_list_point(arch: &str, target_view: TargetView) -> ViewResult<InsertionPoint> {
    let root = root_tag(arch)
        .ok_or_else(|| ViewError::InvalidLayout("arch has no root element".to_string()))?;

    match target_view {
        TargetView::Form => {
            if let Some(offset) = arch.find("</group>") {
                return Ok(InsertionPoint {
                    offset,
                    xpath: "//group".to_string(),
                    position: "inside",
                });
            }
        }
        TargetView::Kanban => {
            if let Some(offset) = arch.find("<templates") {
                return Ok(InsertionPoint {
                    offset,
                    xpath: "//templates".to_string(),
                    position: "before",
                });
            }
        }
        TargetView::Tree => {}
    }

    let closing = format!("</{root}>");
    let offset = arch.rfind(&closing).ok_or_else(|| {
        ViewError::InvalidLayout(format!("arch root `{root}` is never closed"))
    })?;
    Ok(InsertionPoint {
        offset,
        xpath: format!("/{root}"),
        position: "inside",
    })
}
