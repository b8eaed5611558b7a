//! Azure tag helpers
//!
//! Tags are how capz marks Azure resources it owns. Every resource the
//! controller creates carries the cluster-owned tag; resources without it
//! are treated as bring-your-own and never mutated or deleted.

use std::collections::BTreeMap;

/// Azure tags as a plain string map
pub type Tags = BTreeMap<String, String>;

/// Prefix of the per-cluster ownership tag
pub const CLUSTER_TAG_PREFIX: &str = "sigs.k8s.io_cluster-api-provider-azure_cluster_";

/// Tag recording the role of a resource within the cluster
pub const ROLE_TAG_KEY: &str = "sigs.k8s.io_cluster-api-provider-azure_role";

/// Tag holding the resource's display name
pub const NAME_TAG_KEY: &str = "Name";

/// Role tag value for shared cluster infrastructure
pub const COMMON_ROLE: &str = "common";

/// Role tag value for the bastion host
pub const BASTION_ROLE: &str = "Bastion";

/// Role tag value for worker nodes
pub const NODE_ROLE: &str = "node";

/// Role tag value for control plane nodes
pub const CONTROL_PLANE_ROLE: &str = "control-plane";

/// Lifecycle of a tagged resource relative to the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceLifecycle {
    /// Created by and deleted with the cluster
    Owned,
    /// Used by the cluster but managed elsewhere
    Shared,
}

impl ResourceLifecycle {
    /// Tag value for this lifecycle
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::Shared => "shared",
        }
    }
}

/// Ownership tag key for a cluster
pub fn cluster_tag_key(cluster_name: &str) -> String {
    format!("{CLUSTER_TAG_PREFIX}{cluster_name}")
}

/// Inputs for [`build_cluster_tags`]
#[derive(Clone, Debug)]
pub struct BuildParams<'a> {
    /// Owning cluster
    pub cluster_name: &'a str,
    /// Owned or shared
    pub lifecycle: ResourceLifecycle,
    /// Value of the `Name` tag, if any
    pub name: Option<&'a str>,
    /// Value of the role tag, if any
    pub role: Option<&'a str>,
    /// User-declared tags
    pub additional: &'a Tags,
}

/// Build the tags capz writes on a resource
///
/// Additional tags come first so the ownership, role and name tags always
/// win over user input.
pub fn build_cluster_tags(params: BuildParams<'_>) -> Tags {
    let mut tags = params.additional.clone();
    tags.insert(
        cluster_tag_key(params.cluster_name),
        params.lifecycle.as_str().to_string(),
    );
    if let Some(role) = params.role {
        tags.insert(ROLE_TAG_KEY.to_string(), role.to_string());
    }
    if let Some(name) = params.name {
        tags.insert(NAME_TAG_KEY.to_string(), name.to_string());
    }
    tags
}

/// Whether the tags mark the resource as owned by the cluster
pub fn is_owned_by_cluster(tags: &Tags, cluster_name: &str) -> bool {
    tags.get(&cluster_tag_key(cluster_name))
        .is_some_and(|v| v == ResourceLifecycle::Owned.as_str())
}

/// Differences between last-applied, desired and current tags
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagsDiff {
    /// Whether anything needs to be written
    pub changed: bool,
    /// Tags to set (missing or with a different value)
    pub created_or_updated: Tags,
    /// Tags previously applied by capz that are no longer desired
    pub deleted: Tags,
    /// Value of the last-applied annotation once the write succeeds
    pub new_last_applied: Tags,
}

/// Compare desired tags against what capz last applied and what is present
///
/// Keys capz never applied are left alone, so tags written by users or
/// other controllers survive.
pub fn tags_changed(last_applied: &Tags, desired: &Tags, current: &Tags) -> TagsDiff {
    let mut diff = TagsDiff::default();

    for (key, value) in last_applied {
        if !desired.contains_key(key) {
            diff.changed = true;
            diff.deleted.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in desired {
        diff.new_last_applied.insert(key.clone(), value.clone());
        if current.get(key) != Some(value) {
            diff.changed = true;
            diff.created_or_updated.insert(key.clone(), value.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_build_cluster_tags_overrides_additional() {
        let additional = tags(&[("env", "prod"), (NAME_TAG_KEY, "user-name")]);
        let built = build_cluster_tags(BuildParams {
            cluster_name: "my-cluster",
            lifecycle: ResourceLifecycle::Owned,
            name: Some("my-vnet"),
            role: Some(COMMON_ROLE),
            additional: &additional,
        });

        assert_eq!(built.get("env").map(String::as_str), Some("prod"));
        assert_eq!(built.get(NAME_TAG_KEY).map(String::as_str), Some("my-vnet"));
        assert_eq!(built.get(ROLE_TAG_KEY).map(String::as_str), Some("common"));
        assert_eq!(
            built
                .get("sigs.k8s.io_cluster-api-provider-azure_cluster_my-cluster")
                .map(String::as_str),
            Some("owned")
        );
    }

    #[test]
    fn test_is_owned_by_cluster() {
        let owned = tags(&[(&cluster_tag_key("c1"), "owned")]);
        let shared = tags(&[(&cluster_tag_key("c1"), "shared")]);
        assert!(is_owned_by_cluster(&owned, "c1"));
        assert!(!is_owned_by_cluster(&owned, "c2"));
        assert!(!is_owned_by_cluster(&shared, "c1"));
        assert!(!is_owned_by_cluster(&Tags::new(), "c1"));
    }

    /// Story: a tag removed from the spec is deleted only if capz applied it
    #[test]
    fn story_removed_tags_are_only_deleted_when_capz_owned_them() {
        let last_applied = tags(&[("env", "prod"), ("legacy", "y")]);
        let desired = tags(&[("env", "prod"), ("team", "a")]);
        let current = tags(&[("env", "prod"), ("stray", "x")]);

        let diff = tags_changed(&last_applied, &desired, &current);

        assert!(diff.changed);
        assert_eq!(diff.deleted, tags(&[("legacy", "y")]));
        assert_eq!(diff.created_or_updated, tags(&[("team", "a")]));
        assert_eq!(diff.new_last_applied, desired);
    }

    #[test]
    fn test_no_change_when_everything_matches() {
        let t = tags(&[("env", "prod")]);
        let diff = tags_changed(&t, &t, &t);
        assert!(!diff.changed);
        assert!(diff.created_or_updated.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn test_value_change_is_an_update() {
        let diff = tags_changed(
            &tags(&[("env", "dev")]),
            &tags(&[("env", "prod")]),
            &tags(&[("env", "dev")]),
        );
        assert!(diff.changed);
        assert_eq!(diff.created_or_updated, tags(&[("env", "prod")]));
        assert!(diff.deleted.is_empty());
    }
}
