//! View fragment domain model.
//!
//! # Invariants
//! - At most one fragment exists per `(owner_kind, target_view, attribute)`.
//! - `xml_fragment` is always derived from `descriptor`, never edited alone.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::attribute::{OwnerKind, TargetView};

/// Stable identifier for one view fragment.
pub type FragmentId = Uuid;

/// Outbound description of how one attribute is exposed in one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    pub target_view: TargetView,
    /// Field the widget is inserted after; `None` appends to the main list.
    pub anchor: Option<String>,
    pub attribute: String,
    pub label: String,
    pub widget_hint: String,
    /// Context expression hiding the widget outside its scope.
    pub visibility_guard: Option<String>,
}

/// Layout patch exposing one attribute in one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFragment {
    pub id: FragmentId,
    pub owner_kind: OwnerKind,
    pub descriptor: FragmentDescriptor,
    pub xml_fragment: String,
    pub priority: i64,
}

impl ViewFragment {
    pub fn target_view(&self) -> TargetView {
        self.descriptor.target_view
    }

    pub fn attached_attribute(&self) -> &str {
        &self.descriptor.attribute
    }

    /// Whether the fragment fell back to appending at the end of the main list.
    pub fn is_fallback(&self) -> bool {
        self.descriptor.anchor.is_none()
    }
}
