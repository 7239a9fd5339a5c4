//! View compilation: base layout plus fragments.
//!
//! # Invariants
//! - Fragments apply in `(priority, attribute)` order; fragments sharing an
//!   insertion point keep that order in the output.
//! - A field already present in the base arch is never inserted twice.
//! - Compilation is a pure function of its inputs.

use crate::model::view::ViewFragment;
use crate::repo::view_repo::{BaseLayout, ViewResult};
use crate::view::fragment::render_field_element;
use crate::view::layout::{anchor_point, has_field, main_list_point};
use std::collections::BTreeMap;

/// Applies `fragments` to `layout` and returns the effective arch.
pub fn compile_view(layout: &BaseLayout, fragments: &[ViewFragment]) -> ViewResult<String> {
    let mut ordered: Vec<&ViewFragment> = fragments
        .iter()
        .filter(|fragment| {
            fragment.owner_kind == layout.owner_kind
                && fragment.target_view() == layout.target_view
        })
        .collect();
    ordered.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.attached_attribute().cmp(b.attached_attribute()))
    });

    // (offset, is_main_list) -> rendered elements, in application order.
    let mut insertions: BTreeMap<(usize, bool), String> = BTreeMap::new();
    for fragment in ordered {
        if has_field(&layout.arch, fragment.attached_attribute()) {
            continue;
        }
        let anchored = fragment
            .descriptor
            .anchor
            .as_deref()
            .and_then(|anchor| anchor_point(&layout.arch, anchor));
        let key = match anchored {
            Some(point) => (point.offset, false),
            None => (main_list_point(&layout.arch, layout.target_view)?.offset, true),
        };
        insertions
            .entry(key)
            .or_default()
            .push_str(&render_field_element(&fragment.descriptor));
    }

    // Splice back to front so earlier offsets stay valid. At equal offsets the
    // main-list block goes in first so the anchored block lands before it.
    let mut arch = layout.arch.clone();
    for ((offset, _), elements) in insertions.iter().rev() {
        arch.insert_str(*offset, elements);
    }
    Ok(arch)
}
