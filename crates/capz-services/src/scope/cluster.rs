//! Scope of an Azure cluster: the network and its supporting resources

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use parking_lot::RwLock;
use tracing::debug;

use capz_azure::credentials::CredentialKey;
use capz_azure::{
    ArmClient, ClientSecretCredential, CloudEnvironment, CredentialCache, HttpArmClient,
    TokenCredential,
};
use capz_common::config::TimeoutConfig;
use capz_common::crd::{AsyncStatus, AzureClusterSpec, Condition};
use capz_common::tags::{is_owned_by_cluster, Tags};
use capz_common::{Error, Result};
use capz_reconciler::AsoScope;

use super::{infrastructure_owner, ClusterInfo, ScopeState, StatusWriter};
use crate::bastionhosts::BastionSpec;
use crate::groups::aso::AsoGroupSpec;
use crate::groups::GroupSpec;
use crate::kubeconfig;
use crate::natgateways::NatGatewaySpec;
use crate::publicips::PublicIpSpec;
use crate::securitygroups::NsgSpec;
use crate::subnets::SubnetSpec;
use crate::virtualnetworks::VNetSpec;

/// Annotation holding, per security group, the rule names capz applied last
pub const LAST_APPLIED_SECURITY_RULES_ANNOTATION: &str =
    "sigs.k8s.io/azure-last-applied-security-rules";

/// Kind of the object a cluster scope reports on
const KIND: &str = "AzureCluster";

/// Service principal the cluster's identity resolves to
#[derive(Clone)]
pub struct ServicePrincipal {
    /// Entra ID tenant
    pub tenant_id: String,
    /// Application (client) ID
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

/// Inputs to [`ClusterScope::new`]
pub struct ClusterScopeParams {
    /// Cluster name
    pub name: String,
    /// Namespace of the cluster objects
    pub namespace: String,
    /// UID of the AzureCluster
    pub uid: String,
    /// Desired state
    pub spec: AzureClusterSpec,
    /// Persisted status
    pub status: AsyncStatus,
    /// Annotations of the AzureCluster
    pub annotations: BTreeMap<String, String>,
    /// Controller-wide timeouts, before per-cluster overrides
    pub timeouts: TimeoutConfig,
    /// Writes status and annotations back when the pass ends
    pub writer: Arc<dyn StatusWriter>,
}

#[derive(Clone, Debug)]
struct ObservedVnet {
    id: String,
    tags: Tags,
    cidrs: Vec<String>,
}

/// Scope of one AzureCluster for one pass
pub struct ClusterScope {
    state: ScopeState,
    spec: AzureClusterSpec,
    original_annotations: BTreeMap<String, String>,
    annotations: RwLock<BTreeMap<String, String>>,
    observed_vnet: RwLock<Option<ObservedVnet>>,
    writer: Arc<dyn StatusWriter>,
}

delegate_scope!(ClusterScope);

impl AsoScope for ClusterScope {
    fn aso_owner(&self) -> OwnerReference {
        self.state.owner().clone()
    }
}

impl ClusterScope {
    /// Scope for the cluster in `params`; rejects specs missing required fields
    pub fn new(params: ClusterScopeParams) -> Result<Self> {
        params.spec.validate()?;
        let cluster = ClusterInfo {
            name: params.name.clone(),
            namespace: params.namespace,
            subscription_id: params.spec.subscription_id.clone(),
            resource_group: params.spec.resource_group.clone(),
            location: params.spec.location.clone(),
            additional_tags: params.spec.additional_tags.clone(),
        };
        let timeouts = params.spec.timeouts(&params.timeouts);
        let owner = infrastructure_owner(KIND, &params.name, &params.uid);
        Ok(Self {
            state: ScopeState::new(cluster, timeouts, owner, params.status),
            spec: params.spec,
            original_annotations: params.annotations.clone(),
            annotations: RwLock::new(params.annotations),
            observed_vnet: RwLock::new(None),
            writer: params.writer,
        })
    }

    fn cluster(&self) -> &ClusterInfo {
        self.state.cluster()
    }

    /// Snapshot of the status
    pub fn status(&self) -> AsyncStatus {
        self.state.status()
    }

    /// Current value of a condition
    pub fn condition(&self, type_: &str) -> Option<Condition> {
        self.state.condition(type_)
    }

    /// ARM client signing requests as `principal`
    ///
    /// The credential comes from `cache`, keyed by the cluster's identity,
    /// so every pass for that identity shares one token cache. An identity
    /// without a namespace lives next to the cluster.
    pub fn arm_client(
        &self,
        cache: &CredentialCache,
        principal: &ServicePrincipal,
    ) -> Result<Arc<dyn ArmClient>> {
        let identity = self.spec.identity_ref.as_ref().ok_or_else(|| {
            Error::validation_for_field("spec.identityRef", "no identity to authenticate with")
        })?;
        let cloud = CloudEnvironment::from_name(self.spec.azure_environment.as_deref())?;
        let namespace = if identity.namespace.is_empty() {
            self.cluster().namespace.clone()
        } else {
            identity.namespace.clone()
        };
        let key = CredentialKey {
            namespace,
            name: identity.name.clone(),
            tenant_id: principal.tenant_id.clone(),
            client_id: principal.client_id.clone(),
        };
        let credential = cache.get_or_store(key, || {
            let credential: Arc<dyn TokenCredential> = Arc::new(ClientSecretCredential::new(
                cloud,
                &principal.tenant_id,
                &principal.client_id,
                &principal.client_secret,
            ));
            Ok(credential)
        })?;
        Ok(Arc::new(HttpArmClient::new(cloud, credential)?))
    }

    // =========================================================================
    // Network
    // =========================================================================

    /// Resource group of the virtual network
    pub fn vnet_resource_group(&self) -> String {
        self.spec
            .network_spec
            .vnet
            .resource_group
            .clone()
            .unwrap_or_else(|| self.spec.resource_group.clone())
    }

    /// Record the virtual network as ARM reported it
    pub fn observe_vnet(&self, id: String, tags: Tags, cidrs: Vec<String>) {
        *self.observed_vnet.write() = Some(ObservedVnet { id, tags, cidrs });
    }

    /// ID of the observed virtual network
    pub fn vnet_id(&self) -> Option<String> {
        self.observed_vnet.read().as_ref().map(|v| v.id.clone())
    }

    /// Address space of the observed virtual network
    pub fn vnet_cidrs(&self) -> Vec<String> {
        self.observed_vnet
            .read()
            .as_ref()
            .map(|v| v.cidrs.clone())
            .unwrap_or_default()
    }

    /// Whether capz owns the virtual network
    ///
    /// Once the network was observed its tags decide. Before that, a
    /// declared ID means the user brought the network.
    pub fn is_vnet_managed(&self) -> bool {
        let name = &self.cluster().name;
        if let Some(observed) = self.observed_vnet.read().as_ref() {
            return is_owned_by_cluster(&observed.tags, name);
        }
        let vnet = &self.spec.network_spec.vnet;
        is_owned_by_cluster(&vnet.tags, name) || vnet.id.is_none()
    }

    /// The cluster's resource group
    pub fn group_spec(&self) -> GroupSpec {
        let c = self.cluster();
        GroupSpec {
            name: c.resource_group.clone(),
            location: c.location.clone(),
            subscription_id: c.subscription_id.clone(),
            cluster_name: c.name.clone(),
            additional_tags: c.additional_tags.clone(),
        }
    }

    /// The cluster's resource group as an operator-managed child
    pub fn aso_group_spec(&self) -> AsoGroupSpec {
        let c = self.cluster();
        AsoGroupSpec {
            name: c.resource_group.clone(),
            namespace: c.namespace.clone(),
            location: c.location.clone(),
            cluster_name: c.name.clone(),
            additional_tags: c.additional_tags.clone(),
        }
    }

    /// The virtual network
    pub fn vnet_spec(&self) -> VNetSpec {
        let c = self.cluster();
        let vnet = &self.spec.network_spec.vnet;
        let mut additional_tags = c.additional_tags.clone();
        additional_tags.extend(vnet.tags.clone());
        VNetSpec {
            name: vnet.name.clone(),
            resource_group: self.vnet_resource_group(),
            subscription_id: c.subscription_id.clone(),
            location: c.location.clone(),
            cidr_blocks: vnet.cidr_blocks.clone(),
            cluster_name: c.name.clone(),
            additional_tags,
        }
    }

    fn declared_subnets(&self) -> impl Iterator<Item = &capz_common::crd::SubnetSpec> {
        let bastion = self
            .spec
            .bastion_spec
            .as_ref()
            .and_then(|b| b.azure_bastion.as_ref())
            .map(|b| &b.subnet);
        self.spec.network_spec.subnets.iter().chain(bastion)
    }

    /// Every subnet, the bastion subnet included
    pub fn subnet_specs(&self) -> Vec<SubnetSpec> {
        let c = self.cluster();
        let vnet_managed = self.is_vnet_managed();
        self.declared_subnets()
            .map(|s| SubnetSpec {
                name: s.name.clone(),
                vnet_name: self.spec.network_spec.vnet.name.clone(),
                resource_group: self.vnet_resource_group(),
                subscription_id: c.subscription_id.clone(),
                cidr_blocks: s.cidr_blocks.clone(),
                security_group: s.security_group.as_ref().map(|g| g.name.clone()),
                nat_gateway: s.nat_gateway.as_ref().map(|n| n.name.clone()),
                route_table: s.route_table.clone(),
                service_endpoints: s.service_endpoints.clone(),
                vnet_managed,
            })
            .collect()
    }

    /// NAT gateways of the subnets, one per gateway name
    pub fn nat_gateway_specs(&self) -> Vec<NatGatewaySpec> {
        let c = self.cluster();
        let vnet_managed = self.is_vnet_managed();
        let mut seen = BTreeSet::new();
        self.declared_subnets()
            .filter_map(|s| s.nat_gateway.as_ref())
            .filter(|n| seen.insert(n.name.clone()))
            .map(|n| NatGatewaySpec {
                name: n.name.clone(),
                resource_group: c.resource_group.clone(),
                subscription_id: c.subscription_id.clone(),
                location: c.location.clone(),
                public_ip_name: n.nat_gateway_ip.name.clone(),
                cluster_name: c.name.clone(),
                additional_tags: c.additional_tags.clone(),
                vnet_managed,
            })
            .collect()
    }

    /// Public IPs of the NAT gateways and the bastion host
    pub fn public_ip_specs(&self) -> Vec<PublicIpSpec> {
        let c = self.cluster();
        let nat_ips = self
            .declared_subnets()
            .filter_map(|s| s.nat_gateway.as_ref())
            .map(|n| &n.nat_gateway_ip);
        let bastion_ip = self
            .spec
            .bastion_spec
            .as_ref()
            .and_then(|b| b.azure_bastion.as_ref())
            .map(|b| &b.public_ip);

        let mut seen = BTreeSet::new();
        nat_ips
            .chain(bastion_ip)
            .filter(|ip| seen.insert(ip.name.clone()))
            .map(|ip| PublicIpSpec {
                name: ip.name.clone(),
                resource_group: c.resource_group.clone(),
                subscription_id: c.subscription_id.clone(),
                location: c.location.clone(),
                dns_name: ip.dns_name.clone(),
                cluster_name: c.name.clone(),
                additional_tags: c.additional_tags.clone(),
            })
            .collect()
    }

    fn last_applied_security_rules(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        match self.annotation(LAST_APPLIED_SECURITY_RULES_ANNOTATION) {
            None => Ok(BTreeMap::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::unmarshal(LAST_APPLIED_SECURITY_RULES_ANNOTATION, e.to_string())
            }),
        }
    }

    /// Security groups of the subnets, with the rules capz applied last time
    pub fn nsg_specs(&self) -> Result<Vec<NsgSpec>> {
        let c = self.cluster();
        let last_applied = self.last_applied_security_rules()?;
        let mut seen = BTreeSet::new();
        Ok(self
            .declared_subnets()
            .filter_map(|s| s.security_group.as_ref())
            .filter(|g| seen.insert(g.name.clone()))
            .map(|g| {
                let mut additional_tags = c.additional_tags.clone();
                additional_tags.extend(g.tags.clone());
                NsgSpec {
                    name: g.name.clone(),
                    resource_group: self.vnet_resource_group(),
                    subscription_id: c.subscription_id.clone(),
                    location: c.location.clone(),
                    security_rules: g.security_rules.clone(),
                    last_applied_rules: last_applied.get(&g.name).cloned().unwrap_or_default(),
                    cluster_name: c.name.clone(),
                    additional_tags,
                }
            })
            .collect())
    }

    /// Remember the rule names applied to each security group
    pub fn set_last_applied_security_rules(
        &self,
        applied: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<()> {
        let raw = serde_json::to_string(applied).map_err(|e| {
            Error::serialization_for_kind(LAST_APPLIED_SECURITY_RULES_ANNOTATION, e.to_string())
        })?;
        self.set_annotation(LAST_APPLIED_SECURITY_RULES_ANNOTATION, raw);
        Ok(())
    }

    /// The bastion host, when one is declared
    pub fn bastion_spec(&self) -> Option<BastionSpec> {
        let c = self.cluster();
        let bastion = self.spec.bastion_spec.as_ref()?.azure_bastion.as_ref()?;
        Some(BastionSpec {
            name: bastion.name.clone(),
            resource_group: c.resource_group.clone(),
            subscription_id: c.subscription_id.clone(),
            location: c.location.clone(),
            vnet_name: self.spec.network_spec.vnet.name.clone(),
            vnet_resource_group: self.vnet_resource_group(),
            subnet_name: bastion.subnet.name.clone(),
            public_ip_name: bastion.public_ip.name.clone(),
            sku: bastion.sku.clone(),
            enable_tunneling: bastion.enable_tunneling,
            cluster_name: c.name.clone(),
            additional_tags: c.additional_tags.clone(),
        })
    }

    // =========================================================================
    // Annotations
    // =========================================================================

    /// Current value of an annotation
    pub fn annotation(&self, key: &str) -> Option<String> {
        self.annotations.read().get(key).cloned()
    }

    /// Set an annotation; written back on [`close`](Self::close)
    pub fn set_annotation(&self, key: &str, value: String) {
        self.annotations.write().insert(key.to_string(), value);
    }

    /// Whether the workload cluster's kubeconfig should be fetched again
    pub fn kubeconfig_refresh_needed(&self, now: DateTime<Utc>) -> bool {
        kubeconfig::is_refresh_needed(
            &self.annotations.read(),
            now,
            kubeconfig::DEFAULT_KUBECONFIG_MAX_AGE,
        )
    }

    /// Ask for a kubeconfig refresh on the next pass
    pub fn request_kubeconfig_refresh(&self) {
        kubeconfig::request_refresh(&mut self.annotations.write());
    }

    /// Record a kubeconfig refresh at `now`
    pub fn record_kubeconfig_refresh(&self, now: DateTime<Utc>) {
        kubeconfig::stamp_last_updated(&mut self.annotations.write(), now);
    }

    /// Persist status, and annotations if they changed
    pub async fn close(&self) -> Result<()> {
        self.state.persist(self.writer.as_ref()).await?;
        let annotations = self.annotations.read().clone();
        if annotations == self.original_annotations {
            return Ok(());
        }
        debug!(cluster = %self.cluster().name, "patching annotations");
        let owner = self.state.owner();
        self.writer
            .patch_annotations(owner, &self.cluster().namespace, &annotations)
            .await
            .map_err(|e| e.wrap(format!("failed to patch annotations of {}", owner.name)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scope::MockStatusWriter;
    use capz_common::crd::{
        AzureBastion, BastionSpec as BastionDecl, NatGatewaySpec as NatDecl, NetworkSpec,
        PublicIpSpec as IpDecl, SecurityGroupSpec, SubnetRole, SubnetSpec as SubnetDecl,
        VnetSpec,
    };
    use capz_common::tags::cluster_tag_key;
    use capz_common::KUBECONFIG_REFRESH_NEEDED_ANNOTATION;

    fn subnet(name: &str, role: SubnetRole) -> SubnetDecl {
        SubnetDecl {
            role,
            name: name.to_string(),
            cidr_blocks: vec!["10.0.0.0/24".to_string()],
            ..Default::default()
        }
    }

    pub(crate) fn cluster_spec() -> AzureClusterSpec {
        let mut node = subnet("node-subnet", SubnetRole::Node);
        node.security_group = Some(SecurityGroupSpec {
            name: "node-nsg".to_string(),
            ..Default::default()
        });
        node.nat_gateway = Some(NatDecl {
            name: "node-natgw".to_string(),
            nat_gateway_ip: IpDecl {
                name: "pip-node-natgw".to_string(),
                dns_name: None,
            },
        });
        AzureClusterSpec {
            subscription_id: "sub".to_string(),
            resource_group: "rg1".to_string(),
            location: "eastus".to_string(),
            network_spec: NetworkSpec {
                vnet: VnetSpec {
                    name: "vnet1".to_string(),
                    cidr_blocks: vec!["10.0.0.0/8".to_string()],
                    ..Default::default()
                },
                subnets: vec![subnet("cp-subnet", SubnetRole::ControlPlane), node],
            },
            ..Default::default()
        }
    }

    pub(crate) fn scope_with(
        spec: AzureClusterSpec,
        annotations: BTreeMap<String, String>,
        writer: MockStatusWriter,
    ) -> ClusterScope {
        ClusterScope::new(ClusterScopeParams {
            name: "my-cluster".to_string(),
            namespace: "default".to_string(),
            uid: "uid-1".to_string(),
            spec,
            status: AsyncStatus::default(),
            annotations,
            timeouts: TimeoutConfig::default(),
            writer: Arc::new(writer),
        })
        .unwrap()
    }

    fn scope() -> ClusterScope {
        scope_with(cluster_spec(), BTreeMap::new(), MockStatusWriter::new())
    }

    #[test]
    fn test_missing_subscription_is_rejected() {
        let mut spec = cluster_spec();
        spec.subscription_id.clear();
        let result = ClusterScope::new(ClusterScopeParams {
            name: "my-cluster".to_string(),
            namespace: "default".to_string(),
            uid: "uid-1".to_string(),
            spec,
            status: AsyncStatus::default(),
            annotations: BTreeMap::new(),
            timeouts: TimeoutConfig::default(),
            writer: Arc::new(MockStatusWriter::new()),
        });
        assert!(result.err().unwrap().is_terminal());
    }

    #[test]
    fn test_network_specs_follow_declared_subnets() {
        let scope = scope();

        let subnets = scope.subnet_specs();
        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[1].security_group.as_deref(), Some("node-nsg"));
        assert!(subnets.iter().all(|s| s.vnet_managed && s.resource_group == "rg1"));

        assert_eq!(scope.nat_gateway_specs()[0].public_ip_name, "pip-node-natgw");
        assert_eq!(scope.public_ip_specs().len(), 1);
        assert!(scope.bastion_spec().is_none());
    }

    #[test]
    fn test_bastion_adds_subnet_and_public_ip() {
        let mut spec = cluster_spec();
        spec.bastion_spec = Some(BastionDecl {
            azure_bastion: Some(AzureBastion {
                name: "my-cluster-bastion".to_string(),
                subnet: subnet("AzureBastionSubnet", SubnetRole::Bastion),
                public_ip: IpDecl {
                    name: "pip-bastion".to_string(),
                    dns_name: None,
                },
                sku: "Basic".to_string(),
                enable_tunneling: false,
            }),
        });
        let scope = scope_with(spec, BTreeMap::new(), MockStatusWriter::new());

        assert_eq!(scope.subnet_specs().len(), 3);
        let ips: Vec<_> = scope.public_ip_specs().into_iter().map(|ip| ip.name).collect();
        assert_eq!(ips, ["pip-node-natgw", "pip-bastion"]);
        assert_eq!(scope.bastion_spec().unwrap().subnet_name, "AzureBastionSubnet");
    }

    #[test]
    fn test_declared_vnet_id_means_user_owned_until_observed() {
        let mut spec = cluster_spec();
        spec.network_spec.vnet.id = Some("/subscriptions/sub/vnet1".to_string());
        spec.network_spec.vnet.resource_group = Some("network-rg".to_string());
        let scope = scope_with(spec, BTreeMap::new(), MockStatusWriter::new());
        assert!(!scope.is_vnet_managed());
        assert_eq!(scope.vnet_resource_group(), "network-rg");

        let owned = Tags::from([(cluster_tag_key("my-cluster"), "owned".to_string())]);
        scope.observe_vnet("id".to_string(), owned, vec!["10.0.0.0/8".to_string()]);
        assert!(scope.is_vnet_managed());
        assert_eq!(scope.vnet_cidrs(), ["10.0.0.0/8"]);
    }

    #[test]
    fn test_last_applied_rules_round_trip_through_annotation() {
        let scope = scope();
        assert!(scope.nsg_specs().unwrap()[0].last_applied_rules.is_empty());

        let applied = BTreeMap::from([(
            "node-nsg".to_string(),
            BTreeSet::from(["allow_ssh".to_string()]),
        )]);
        scope.set_last_applied_security_rules(&applied).unwrap();

        assert!(scope.nsg_specs().unwrap()[0]
            .last_applied_rules
            .contains("allow_ssh"));
    }

    #[test]
    fn test_malformed_last_applied_rules_are_terminal() {
        let annotations = BTreeMap::from([(
            LAST_APPLIED_SECURITY_RULES_ANNOTATION.to_string(),
            "not json".to_string(),
        )]);
        let scope = scope_with(cluster_spec(), annotations, MockStatusWriter::new());
        assert!(scope.nsg_specs().unwrap_err().is_terminal());
    }

    #[tokio::test]
    async fn test_close_patches_annotations_only_when_changed() {
        let mut writer = MockStatusWriter::new();
        writer.expect_patch_status().times(2).returning(|_, _, _| Ok(()));
        writer
            .expect_patch_annotations()
            .withf(|_, _, annotations| {
                annotations.get(KUBECONFIG_REFRESH_NEEDED_ANNOTATION).map(String::as_str)
                    == Some("true")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let scope = scope_with(cluster_spec(), BTreeMap::new(), writer);

        scope.close().await.unwrap();
        scope.request_kubeconfig_refresh();
        assert!(scope.kubeconfig_refresh_needed(Utc::now()));
        scope.close().await.unwrap();
    }

    fn principal(client_id: &str) -> ServicePrincipal {
        ServicePrincipal {
            tenant_id: "tenant".to_string(),
            client_id: client_id.to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn identified(name: &str, namespace: &str) -> ClusterScope {
        let mut spec = cluster_spec();
        spec.identity_ref = Some(capz_common::crd::IdentityRef {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
        scope_with(spec, BTreeMap::new(), MockStatusWriter::new())
    }

    /// Story: clusters sharing an identity share one cached credential
    #[test]
    fn story_clients_reuse_cached_credential_per_identity() {
        let cache = CredentialCache::new();

        identified("team-a", "").arm_client(&cache, &principal("app")).unwrap();
        identified("team-a", "default").arm_client(&cache, &principal("app")).unwrap();
        assert_eq!(cache.len(), 1);

        identified("team-b", "").arm_client(&cache, &principal("app")).unwrap();
        identified("team-a", "").arm_client(&cache, &principal("other-app")).unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_client_without_identity_is_rejected() {
        let cache = CredentialCache::new();
        let err = scope().arm_client(&cache, &principal("app")).err().unwrap();
        assert!(err.is_terminal());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unknown_cloud_is_rejected() {
        let cache = CredentialCache::new();
        let mut spec = cluster_spec();
        spec.identity_ref = Some(capz_common::crd::IdentityRef {
            name: "team-a".to_string(),
            namespace: String::new(),
        });
        spec.azure_environment = Some("MarsCloud".to_string());
        let scope = scope_with(spec, BTreeMap::new(), MockStatusWriter::new());

        assert!(scope.arm_client(&cache, &principal("app")).is_err());
        assert!(cache.is_empty());
    }
}
