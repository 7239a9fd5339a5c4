//! View fragment manager.
//!
//! # Responsibility
//! - Attach and detach one attribute's fragment per target view.
//! - Compile effective views for the registry cache.
//!
//! # Invariants
//! - `attach` replaces an existing fragment for the same attribute; it never
//!   creates a second one.
//! - `detach`/`detach_all` succeed when nothing is attached.

use crate::model::attribute::{AttributeDefinition, OwnerKind, TargetView};
use crate::model::view::{FragmentDescriptor, ViewFragment};
use crate::repo::view_repo::{BaseLayout, ViewError, ViewFragmentRepository, ViewResult};
use crate::view::compile::compile_view;
use crate::view::fragment::{build_fragment, fragment_name, FragmentOptions};
use log::debug;

/// Fragment lifecycle over a layout/fragment repository.
pub struct ViewFragmentManager<V: ViewFragmentRepository> {
    repo: V,
    priority: i64,
    scope_context_key: String,
}

impl<V: ViewFragmentRepository> ViewFragmentManager<V> {
    pub fn new(repo: V, priority: i64, scope_context_key: impl Into<String>) -> Self {
        Self {
            repo,
            priority,
            scope_context_key: scope_context_key.into(),
        }
    }

    pub fn repo(&self) -> &V {
        &self.repo
    }

    /// Builds and stores the fragment exposing `definition` in `target_view`.
    ///
    /// # Errors
    /// - `MissingBaseLayout` when the owner kind has no such view.
    /// - Storage errors from the repository.
    pub fn attach(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
        definition: &AttributeDefinition,
        scope_entity_id: Option<i64>,
    ) -> ViewResult<FragmentDescriptor> {
        let layout = self.require_layout(owner_kind, target_view)?;
        let fragment = build_fragment(
            &layout,
            definition,
            FragmentOptions {
                scope: scope_entity_id,
                priority: self.priority,
                scope_context_key: &self.scope_context_key,
            },
        )?;
        self.repo.upsert_fragment(&fragment)?;

        debug!(
            "event=view_attach module=view status=ok name={} fallback={}",
            fragment_name(owner_kind, target_view, &definition.physical_name),
            fragment.is_fallback()
        );
        Ok(fragment.descriptor)
    }

    /// Removes the fragment of `attribute` in `target_view`, if any.
    pub fn detach(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
        attribute: &str,
    ) -> ViewResult<bool> {
        let removed = self.repo.delete_fragment(owner_kind, target_view, attribute)?;
        debug!(
            "event=view_detach module=view status=ok name={} removed={removed}",
            fragment_name(owner_kind, target_view, attribute)
        );
        Ok(removed)
    }

    /// Removes the fragments of `attribute` from every target view.
    ///
    /// Returns the views a fragment was actually removed from.
    pub fn detach_all(&self, owner_kind: OwnerKind, attribute: &str) -> ViewResult<Vec<TargetView>> {
        let mut removed = Vec::new();
        for target_view in TargetView::ALL {
            if self.detach(owner_kind, target_view, attribute)? {
                removed.push(target_view);
            }
        }
        Ok(removed)
    }

    pub fn list(
        &self,
        owner_kind: OwnerKind,
        target_view: Option<TargetView>,
    ) -> ViewResult<Vec<ViewFragment>> {
        self.repo.list_fragments(owner_kind, target_view)
    }

    /// Fragments currently attached for one attribute, across views.
    pub fn list_for_attribute(
        &self,
        owner_kind: OwnerKind,
        attribute: &str,
    ) -> ViewResult<Vec<ViewFragment>> {
        Ok(self
            .repo
            .list_fragments(owner_kind, None)?
            .into_iter()
            .filter(|fragment| fragment.attached_attribute() == attribute)
            .collect())
    }

    /// Effective arch of one view: base layout with all fragments applied.
    pub fn compiled_view(&self, owner_kind: OwnerKind, target_view: TargetView) -> ViewResult<String> {
        let layout = self.require_layout(owner_kind, target_view)?;
        let fragments = self.repo.list_fragments(owner_kind, Some(target_view))?;
        compile_view(&layout, &fragments)
    }

    /// Views of `owner_kind` that have a base layout.
    pub fn available_views(&self, owner_kind: OwnerKind) -> ViewResult<Vec<TargetView>> {
        let mut views = Vec::new();
        for target_view in TargetView::ALL {
            if self.repo.base_layout(owner_kind, target_view)?.is_some() {
                views.push(target_view);
            }
        }
        Ok(views)
    }

    fn require_layout(&self, owner_kind: OwnerKind, target_view: TargetView) -> ViewResult<BaseLayout> {
        self.repo
            .base_layout(owner_kind, target_view)?
            .ok_or(ViewError::MissingBaseLayout {
                owner_kind,
                target_view,
            })
    }
}
