//! Tag ownership for declaratively managed resources
//!
//! capz owns only the tags it applied. The keys it wrote last time are kept
//! in an annotation on the child resource; a later pass removes those that
//! are no longer wanted and never touches keys someone else added.

use kube::api::DynamicObject;
use serde_json::Value;

use capz_common::tags::{tags_changed, Tags};
use capz_common::{Error, Result, LAST_APPLIED_TAGS_ANNOTATION};

/// Access to the tags of a child resource kind
pub trait TagsGetterSetter: Send + Sync {
    /// Tags every resource of the cluster carries
    fn additional_tags(&self) -> Tags;

    /// Tags capz itself puts on the resource, such as cluster ownership
    ///
    /// Derived from the owning object, never from the child's current spec,
    /// so keys added by someone else are not mistaken for wanted ones.
    fn desired_tags(&self) -> Tags;

    /// Tags present on the Azure resource, as reported in status
    fn actual_tags(&self, resource: &DynamicObject) -> Tags {
        tags_at(resource, "/status/tags")
    }

    /// Replace the tags requested in the resource's spec
    fn set_tags(&self, resource: &mut DynamicObject, tags: Tags) {
        set_spec_tags(resource, tags);
    }
}

/// Whether tag reconciliation changed the parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagsOutcome {
    /// The resource already carries the wanted tags
    Unchanged,
    /// New tags were written into the parameters
    Updated,
}

/// Merge capz-owned tags into `parameters`
///
/// Starts from the tags on the Azure resource, drops the keys capz applied
/// before that are no longer wanted and overlays the wanted ones (the
/// desired tags plus the additional tags). The merged set
/// and the new last-applied annotation are written to `parameters`.
///
/// A last-applied annotation that is not a JSON object of strings is a
/// terminal error.
pub fn reconcile_tags(
    t: &dyn TagsGetterSetter,
    existing: Option<&DynamicObject>,
    parameters: &mut DynamicObject,
) -> Result<TagsOutcome> {
    let mut wanted = t.desired_tags();
    wanted.extend(t.additional_tags());

    let (actual, last_applied) = match existing {
        Some(existing) => (t.actual_tags(existing), last_applied_tags(existing)?),
        None => (Tags::new(), Tags::new()),
    };

    let diff = tags_changed(&last_applied, &wanted, &actual);
    let mut merged = actual.clone();
    merged.extend(diff.created_or_updated);
    for key in diff.deleted.keys() {
        merged.remove(key);
    }

    let outcome = if merged == actual && existing.is_some() {
        TagsOutcome::Unchanged
    } else {
        TagsOutcome::Updated
    };

    t.set_tags(parameters, merged);
    let annotation = serde_json::to_string(&diff.new_last_applied)?;
    parameters
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(LAST_APPLIED_TAGS_ANNOTATION.to_string(), annotation);

    Ok(outcome)
}

fn last_applied_tags(resource: &DynamicObject) -> Result<Tags> {
    let raw = resource
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_APPLIED_TAGS_ANNOTATION))
        .map(String::as_str)
        .unwrap_or_default();
    if raw.is_empty() {
        return Ok(Tags::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        Error::unmarshal(
            LAST_APPLIED_TAGS_ANNOTATION,
            format!("failed to unmarshal JSON from annotation: {e}"),
        )
    })
}

/// Tags stored as a string map at `pointer` in the object's data
pub fn tags_at(resource: &DynamicObject, pointer: &str) -> Tags {
    resource
        .data
        .pointer(pointer)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Write `tags` to `spec.tags`, removing the field when empty
pub fn set_spec_tags(resource: &mut DynamicObject, tags: Tags) {
    if !resource.data.is_object() {
        resource.data = Value::Object(Default::default());
    }
    let Some(root) = resource.data.as_object_mut() else {
        return;
    };
    let spec = root
        .entry("spec")
        .or_insert_with(|| Value::Object(Default::default()));
    let Some(spec) = spec.as_object_mut() else {
        return;
    };
    if tags.is_empty() {
        spec.remove("tags");
    } else {
        spec.insert(
            "tags".to_string(),
            Value::Object(tags.into_iter().map(|(k, v)| (k, Value::String(v))).collect()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ApiResource;
    use serde_json::json;

    struct GroupTags {
        desired: Tags,
        additional: Tags,
    }

    impl GroupTags {
        fn new(desired: &[(&str, &str)], additional: &[(&str, &str)]) -> Self {
            Self {
                desired: tags(desired),
                additional: tags(additional),
            }
        }
    }

    impl TagsGetterSetter for GroupTags {
        fn desired_tags(&self) -> Tags {
            self.desired.clone()
        }

        fn additional_tags(&self) -> Tags {
            self.additional.clone()
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn group(data: Value, last_applied: Option<&str>) -> DynamicObject {
        let ar = ApiResource {
            group: "resources.azure.com".into(),
            version: "v1api20200601".into(),
            api_version: "resources.azure.com/v1api20200601".into(),
            kind: "ResourceGroup".into(),
            plural: "resourcegroups".into(),
        };
        let mut obj = DynamicObject::new("rg1", &ar).within("default").data(data);
        if let Some(value) = last_applied {
            obj.metadata.annotations = Some(
                [(LAST_APPLIED_TAGS_ANNOTATION.to_string(), value.to_string())]
                    .into_iter()
                    .collect(),
            );
        }
        obj
    }

    fn last_applied(params: &DynamicObject) -> Tags {
        let annotation = &params.metadata.annotations.as_ref().unwrap()[LAST_APPLIED_TAGS_ANNOTATION];
        serde_json::from_str(annotation).unwrap()
    }

    /// Story: tags a user added in Azure survive while capz adds its own
    #[test]
    fn story_user_tags_survive_new_additional_tags() {
        let t = GroupTags::new(&[("env", "prod")], &[("team", "a")]);
        let existing = group(
            json!({"spec": {"tags": {"env": "prod"}}, "status": {"tags": {"env": "prod", "owner": "alice"}}}),
            Some(r#"{"env":"prod"}"#),
        );
        let mut params = existing.clone();

        let outcome = reconcile_tags(&t, Some(&existing), &mut params).unwrap();

        assert_eq!(outcome, TagsOutcome::Updated);
        assert_eq!(
            tags_at(&params, "/spec/tags"),
            tags(&[("env", "prod"), ("owner", "alice"), ("team", "a")])
        );
        assert_eq!(last_applied(&params), tags(&[("env", "prod"), ("team", "a")]));
    }

    /// Story: a tag capz applied and no longer wants is removed
    #[test]
    fn story_dropped_tag_is_removed() {
        let t = GroupTags::new(&[("env", "prod")], &[]);
        let existing = group(
            json!({"spec": {"tags": {"env": "prod"}}, "status": {"tags": {"env": "prod", "team": "a"}}}),
            Some(r#"{"env":"prod","team":"a"}"#),
        );
        let mut params = existing.clone();

        assert_eq!(
            reconcile_tags(&t, Some(&existing), &mut params).unwrap(),
            TagsOutcome::Updated
        );
        assert_eq!(tags_at(&params, "/spec/tags"), tags(&[("env", "prod")]));
    }

    /// Story: foreign tags already copied into the child's spec are still
    /// foreign, so a dropped capz tag next to them is removed and the
    /// foreign key never enters the last-applied annotation
    #[test]
    fn story_spec_tags_are_not_mistaken_for_wanted_tags() {
        let t = GroupTags::new(&[("env", "prod")], &[]);
        let existing = group(
            json!({
                "spec": {"tags": {"env": "prod", "stray": "x", "team": "a"}},
                "status": {"tags": {"env": "prod", "stray": "x", "team": "a"}},
            }),
            Some(r#"{"env":"prod","team":"a"}"#),
        );
        let mut params = existing.clone();

        assert_eq!(
            reconcile_tags(&t, Some(&existing), &mut params).unwrap(),
            TagsOutcome::Updated
        );
        assert_eq!(
            tags_at(&params, "/spec/tags"),
            tags(&[("env", "prod"), ("stray", "x")])
        );
        assert_eq!(last_applied(&params), tags(&[("env", "prod")]));
    }

    #[test]
    fn test_matching_tags_are_unchanged() {
        let t = GroupTags::new(&[], &[("env", "prod")]);
        let existing = group(
            json!({"spec": {"tags": {"env": "prod"}}, "status": {"tags": {"env": "prod"}}}),
            Some(r#"{"env":"prod"}"#),
        );
        let mut params = existing.clone();

        assert_eq!(
            reconcile_tags(&t, Some(&existing), &mut params).unwrap(),
            TagsOutcome::Unchanged
        );
        assert_eq!(params, existing);
    }

    #[test]
    fn test_new_resource_gets_wanted_tags() {
        let t = GroupTags::new(&[("owned", "yes")], &[("team", "a")]);
        let mut params = group(json!({"spec": {"location": "eastus"}}), None);

        assert_eq!(reconcile_tags(&t, None, &mut params).unwrap(), TagsOutcome::Updated);
        assert_eq!(
            tags_at(&params, "/spec/tags"),
            tags(&[("owned", "yes"), ("team", "a")])
        );
        assert_eq!(params.data["spec"]["location"], "eastus");
    }

    #[test]
    fn test_malformed_annotation_is_terminal() {
        let t = GroupTags::new(&[], &[]);
        let existing = group(json!({}), Some("{not json"));
        let mut params = existing.clone();

        let err = reconcile_tags(&t, Some(&existing), &mut params).unwrap_err();
        assert!(err.is_terminal());
    }
}
