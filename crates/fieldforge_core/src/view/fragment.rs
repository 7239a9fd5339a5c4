//! View fragment construction.
//!
//! # Responsibility
//! - Build the descriptor and XML patch exposing one attribute in one view.
//! - Render field elements shared by fragments and compiled views.
//!
//! # Invariants
//! - Attribute values written into XML are escaped.
//! - A missing anchor degrades to a main-list append; it never fails.

use crate::model::attribute::{AttributeDefinition, OwnerKind, TargetView};
use crate::model::view::{FragmentDescriptor, ViewFragment};
use crate::repo::view_repo::{BaseLayout, ViewResult};
use crate::view::layout::{anchor_point, main_list_point, InsertionPoint};
use uuid::Uuid;

/// Inputs of one fragment build beyond the attribute itself.
#[derive(Debug, Clone, Copy)]
pub struct FragmentOptions<'a> {
    pub scope: Option<i64>,
    pub priority: i64,
    pub scope_context_key: &'a str,
}

/// Builds the fragment exposing `definition` in `layout`.
pub fn build_fragment(
    layout: &BaseLayout,
    definition: &AttributeDefinition,
    options: FragmentOptions<'_>,
) -> ViewResult<ViewFragment> {
    let anchor = layout.owner_kind.anchor_field();
    let (point, anchor) = match anchor_point(&layout.arch, anchor) {
        Some(point) => (point, Some(anchor.to_string())),
        None => (main_list_point(&layout.arch, layout.target_view)?, None),
    };

    let descriptor = FragmentDescriptor {
        target_view: layout.target_view,
        anchor,
        attribute: definition.physical_name.clone(),
        label: definition.display_label.clone(),
        widget_hint: definition.widget_hint().to_string(),
        visibility_guard: options
            .scope
            .map(|scope| visibility_guard(options.scope_context_key, scope)),
    };
    let xml_fragment = render_fragment_xml(&descriptor, &point);

    Ok(ViewFragment {
        id: Uuid::new_v4(),
        owner_kind: layout.owner_kind,
        descriptor,
        xml_fragment,
        priority: options.priority,
    })
}

/// Expression hiding a widget unless the view context carries `scope`.
pub fn visibility_guard(context_key: &str, scope: i64) -> String {
    format!("context.get('{context_key}') != {scope}")
}

/// Renders the `<field/>` element for one descriptor.
pub fn render_field_element(descriptor: &FragmentDescriptor) -> String {
    let mut element = format!(
        r#"<field name="{}" string="{}" widget="{}""#,
        escape_attr(&descriptor.attribute),
        escape_attr(&descriptor.label),
        escape_attr(&descriptor.widget_hint)
    );
    if let Some(guard) = &descriptor.visibility_guard {
        element.push_str(&format!(r#" invisible="{}""#, escape_attr(guard)));
    }
    element.push_str("/>");
    element
}

/// Wraps the field element in an xpath patch document.
pub fn render_fragment_xml(descriptor: &FragmentDescriptor, point: &InsertionPoint) -> String {
    format!(
        r#"<data><xpath expr="{}" position="{}">{}</xpath></data>"#,
        escape_attr(&point.xpath),
        point.position,
        render_field_element(descriptor)
    )
}

/// Stable record name of a fragment, as shown to layout tooling.
pub fn fragment_name(owner_kind: OwnerKind, target_view: TargetView, attribute: &str) -> String {
    format!("{owner_kind}.{target_view}.dynamic.{attribute}")
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\n' | '\r' => escaped.push(' '),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attribute::{LogicalType, SelectionOption};

    fn layout(target_view: TargetView, arch: &str) -> BaseLayout {
        BaseLayout {
            owner_kind: OwnerKind::Group,
            target_view,
            arch: arch.to_string(),
        }
    }

    fn options(scope: Option<i64>) -> FragmentOptions<'static> {
        FragmentOptions {
            scope,
            priority: 100,
            scope_context_key: "default_scope_id",
        }
    }

    fn priority_definition() -> AttributeDefinition {
        let mut definition = AttributeDefinition::new(
            OwnerKind::Group,
            "x_priority_level",
            "Priority <Level>",
            LogicalType::Enumerated,
        );
        definition.enumerated_options = vec![SelectionOption::new("low", "Low")];
        definition
    }

    #[test]
    fn builds_fragment_after_anchor() {
        let base = layout(
            TargetView::Tree,
            r#"<tree><field name="name"/><field name="person"/></tree>"#,
        );
        let fragment = build_fragment(&base, &priority_definition(), options(None)).unwrap();

        assert_eq!(fragment.descriptor.anchor.as_deref(), Some("person"));
        assert_eq!(fragment.descriptor.widget_hint, "selection");
        assert_eq!(
            fragment.xml_fragment,
            r#"<data><xpath expr="//field[@name='person']" position="after"><field name="x_priority_level" string="Priority &lt;Level&gt;" widget="selection"/></xpath></data>"#
        );
    }

    #[test]
    fn falls_back_to_main_list_without_anchor() {
        let base = layout(
            TargetView::Form,
            r#"<form><sheet><group><field name="name"/></group></sheet></form>"#,
        );
        let fragment = build_fragment(&base, &priority_definition(), options(None)).unwrap();

        assert!(fragment.is_fallback());
        assert!(fragment
            .xml_fragment
            .contains(r#"<xpath expr="//group" position="inside">"#));
    }

    #[test]
    fn scope_adds_visibility_guard() {
        let base = layout(TargetView::Tree, r#"<tree><field name="person"/></tree>"#);
        let fragment = build_fragment(&base, &priority_definition(), options(Some(7))).unwrap();

        assert_eq!(
            fragment.descriptor.visibility_guard.as_deref(),
            Some("context.get('default_scope_id') != 7")
        );
        assert!(fragment
            .xml_fragment
            .contains(r#"invisible="context.get('default_scope_id') != 7""#));
    }

    #[test]
    fn fragment_name_is_stable() {
        assert_eq!(
            fragment_name(OwnerKind::SubItem, TargetView::Form, "x_hours"),
            "sub_item.form.dynamic.x_hours"
        );
    }
}
