//! Discovery of the ali resources owned by a cluster, and their deleters
//!
//! Taggable kinds are listed by the cluster tag; RAM roles and the key pair
//! are found by name. Children without tags (rules, listeners, whitelists,
//! SNAT entries) are listed under their discovered parents.
//!
//! Blocking follows the order groups go first, then listeners and
//! whitelists, the load balancer, security groups and finally the network.

use crate::cloud::{AliApis, AliCloud, TAGS};
use crate::records::*;
use async_trait::async_trait;
use kforge_cloud::{
    CloudResource, Deleter, ListFilter, Resource, ResourceApi, ResourceMap, Result, insert_resource,
    resource_key,
};
use kforge_core::{Cluster, InstanceGroupRole, naming};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

type ApiOf<R> = fn(&AliApis) -> &Arc<dyn ResourceApi<R>>;

/// Deletes by id through one adapter
struct ApiDeleter<R: CloudResource> {
    api: ApiOf<R>,
}

impl<R: CloudResource> fmt::Debug for ApiDeleter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiDeleter<{}>", R::KIND)
    }
}

#[async_trait]
impl<R: CloudResource> Deleter<AliCloud> for ApiDeleter<R> {
    async fn delete(&self, cloud: &AliCloud, resource: &Resource<AliCloud>) -> Result<()> {
        let api = (self.api)(cloud.apis());
        match api.delete(cloud.scope(), &resource.id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

fn deleter<R: CloudResource>(api: ApiOf<R>) -> Arc<dyn Deleter<AliCloud>> {
    Arc::new(ApiDeleter { api })
}

/// Removes the group's instances and configurations, then the group
#[derive(Debug)]
struct ScalingGroupDeleter;

#[async_trait]
impl Deleter<AliCloud> for ScalingGroupDeleter {
    async fn delete(&self, cloud: &AliCloud, resource: &Resource<AliCloud>) -> Result<()> {
        let apis = cloud.apis();
        let scope = cloud.scope();
        let children = ListFilter::by_parent(&resource.id);

        for instance in apis.instances.list(scope, &children).await? {
            if let Some(id) = instance.id.as_deref() {
                apis.instances.delete(scope, id).await?;
            }
        }
        for config in apis.scaling_configurations.list(scope, &children).await? {
            if let Some(id) = config.id.as_deref() {
                debug!(configuration = %config.name, "Deleting scaling configuration");
                apis.scaling_configurations.delete(scope, id).await?;
            }
        }
        apis.scaling_groups.delete(scope, &resource.id).await
    }
}

/// Detaches and deletes the role's policies, then the role
#[derive(Debug)]
struct RamRoleDeleter;

#[async_trait]
impl Deleter<AliCloud> for RamRoleDeleter {
    async fn delete(&self, cloud: &AliCloud, resource: &Resource<AliCloud>) -> Result<()> {
        let apis = cloud.apis();
        let scope = cloud.scope();
        for policy in apis
            .ram_policies
            .list(scope, &ListFilter::by_parent(&resource.id))
            .await?
        {
            if let Some(id) = policy.id.as_deref() {
                debug!(policy = %policy.name, role = %resource.name, "Detaching RAM policy");
                apis.ram_policies.delete(scope, id).await?;
            }
        }
        apis.ram_roles.delete(scope, &resource.id).await
    }
}

/// Unbinds the gateway's addresses, then deletes the gateway
#[derive(Debug)]
struct NatGatewayDeleter;

#[async_trait]
impl Deleter<AliCloud> for NatGatewayDeleter {
    async fn delete(&self, cloud: &AliCloud, resource: &Resource<AliCloud>) -> Result<()> {
        let apis = cloud.apis();
        let scope = cloud.scope();
        for mut eip in apis.eips.list(scope, &ListFilter::all()).await? {
            if eip.instance_id.as_deref() == Some(resource.id.as_str()) {
                debug!(eip = ?eip.id, gateway = %resource.id, "Unbinding EIP from NAT gateway");
                eip.instance_id = None;
                apis.eips.create_or_update(scope, eip).await?;
            }
        }
        match apis.nat_gateways.delete(scope, &resource.id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Releases the address, unbinding it first if still bound
#[derive(Debug)]
struct EipDeleter;

#[async_trait]
impl Deleter<AliCloud> for EipDeleter {
    async fn delete(&self, cloud: &AliCloud, resource: &Resource<AliCloud>) -> Result<()> {
        let apis = cloud.apis();
        let scope = cloud.scope();
        let current = apis
            .eips
            .list(scope, &ListFilter::all())
            .await?
            .into_iter()
            .find(|e| e.id.as_deref() == Some(resource.id.as_str()));
        let Some(mut eip) = current else {
            return Ok(());
        };
        if eip.instance_id.is_some() {
            debug!(eip = %resource.id, "Unbinding EIP");
            eip.instance_id = None;
            apis.eips.create_or_update(scope, eip).await?;
        }
        apis.eips.delete(scope, &resource.id).await
    }
}

fn key<R: CloudResource>(record: &R) -> Option<String> {
    record.id().map(|id| resource_key(R::KIND, id))
}

/// Resource for a listed record; records without an id are skipped
fn resource<R: CloudResource>(
    record: &R,
    deleter: Arc<dyn Deleter<AliCloud>>,
) -> Option<Resource<AliCloud>> {
    let id = record.id()?;
    Some(Resource::new(R::KIND, id, record.name(), deleter))
}

/// Every resource the cluster owns, with blocking edges set
pub async fn list_resources(cloud: &AliCloud, cluster: &Cluster) -> Result<ResourceMap<AliCloud>> {
    let apis = cloud.apis();
    let scope = cloud.scope();
    let name = cluster.name.as_str();
    let owned = ListFilter::by_tags(TAGS.cluster_tags(name));
    let mut map = ResourceMap::new();

    let shared_vpc = cluster
        .spec
        .networking
        .network_id
        .clone()
        .filter(|_| cluster.shared_vpc());
    let shared_subnets: Vec<&str> = cluster
        .spec
        .networking
        .subnets
        .iter()
        .filter_map(|s| s.id.as_deref())
        .collect();

    // Scaling groups block almost everything else
    let groups = apis.scaling_groups.list(scope, &owned).await?;
    let group_keys: Vec<String> = groups.iter().filter_map(key).collect();

    let mut vpcs = apis.vpcs.list(scope, &owned).await?;
    if let Some(id) = &shared_vpc {
        if !vpcs.iter().any(|v| v.id.as_deref() == Some(id.as_str())) {
            vpcs.extend(
                apis.vpcs
                    .list(scope, &ListFilter::all())
                    .await?
                    .into_iter()
                    .filter(|v| v.id.as_deref() == Some(id.as_str())),
            );
        }
    }
    for vpc in &vpcs {
        if let Some(r) = resource(vpc, deleter::<VpcRecord>(|a| &a.vpcs)) {
            let shared = shared_vpc.as_deref() == vpc.id.as_deref();
            insert_resource(&mut map, r.shared(shared));
        }
    }

    let mut vswitch_keys: Vec<(String, String)> = Vec::new();
    for vswitch in apis.vswitches.list(scope, &owned).await? {
        let Some(mut r) = resource(&vswitch, deleter::<VSwitchRecord>(|a| &a.vswitches)) else {
            continue;
        };
        let shared = shared_subnets.contains(&r.id.as_str());
        r = r
            .blocks(resource_key(VpcRecord::KIND, &vswitch.vpc_id))
            .shared(shared);
        for group in &groups {
            if group.vswitch_ids.contains(&r.id) {
                if let Some(k) = key(group) {
                    r = r.blocked_by(k);
                }
            }
        }
        vswitch_keys.push((vswitch.vpc_id.clone(), r.key()));
        insert_resource(&mut map, r);
    }

    let nat_gateways = apis.nat_gateways.list(scope, &owned).await?;
    if nat_gateways.len() > 1 {
        warn!(
            cluster = %name,
            count = nat_gateways.len(),
            "Found more than one NAT gateway for the cluster, deleting all of them"
        );
    }
    let mut snat_entries = Vec::new();
    for nat in &nat_gateways {
        let Some(r) = resource(nat, Arc::new(NatGatewayDeleter)) else {
            continue;
        };
        insert_resource(&mut map, r.blocks(resource_key(VpcRecord::KIND, &nat.vpc_id)));

        for entry in apis
            .snat_entries
            .list(scope, &ListFilter::by_parent(&r_id(nat)))
            .await?
        {
            let Some(r) = resource(&entry, deleter::<SnatEntryRecord>(|a| &a.snat_entries)) else {
                continue;
            };
            insert_resource(
                &mut map,
                r.blocks(resource_key(NatGatewayRecord::KIND, &entry.nat_gateway_id))
                    .blocks(resource_key(VSwitchRecord::KIND, &entry.vswitch_id)),
            );
            snat_entries.push(entry);
        }
    }

    let eips = apis.eips.list(scope, &owned).await?;
    for eip in &eips {
        let Some(mut r) = resource(eip, Arc::new(EipDeleter)) else {
            continue;
        };
        if let Some(nat_id) = &eip.instance_id {
            r = r.blocked_by(resource_key(NatGatewayRecord::KIND, nat_id));
        }
        // SNAT entries using the address go first
        for entry in &snat_entries {
            if eip.ip_address.as_ref() == Some(&entry.snat_ip) {
                r.blocked.extend(key(entry));
            }
        }
        insert_resource(&mut map, r);
    }

    let security_groups = apis.security_groups.list(scope, &owned).await?;
    let load_balancers = apis.load_balancers.list(scope, &owned).await?;
    for lb in &load_balancers {
        let Some(mut r) = resource(lb, deleter::<LoadBalancerRecord>(|a| &a.load_balancers)) else {
            continue;
        };
        for sg in &security_groups {
            if let Some(k) = key(sg) {
                r = r.blocks(k);
            }
        }
        let lb_key = r.key();
        let children = ListFilter::by_parent(&r.id);
        let mut child_resources = Vec::new();
        for listener in apis.listeners.list(scope, &children).await? {
            child_resources.extend(resource(&listener, deleter::<ListenerRecord>(|a| &a.listeners)));
        }
        for white_list in apis.white_lists.list(scope, &children).await? {
            child_resources.extend(resource(&white_list, deleter::<WhiteListRecord>(|a| &a.white_lists)));
        }
        for mut child in child_resources {
            child = child.blocks(lb_key.clone());
            for k in &group_keys {
                child = child.blocked_by(k.clone());
            }
            insert_resource(&mut map, child);
        }
        for group in &groups {
            if group.load_balancer_ids.contains(&r.id) {
                if let Some(k) = key(group) {
                    r = r.blocked_by(k);
                }
            }
        }
        insert_resource(&mut map, r);
    }

    let configurations: Vec<ScalingConfigurationRecord> = {
        let mut all = Vec::new();
        for group in &groups {
            if let Some(id) = &group.id {
                all.extend(
                    apis.scaling_configurations
                        .list(scope, &ListFilter::by_parent(id))
                        .await?,
                );
            }
        }
        all
    };
    let group_of = |config: &ScalingConfigurationRecord| {
        resource_key(ScalingGroupRecord::KIND, &config.scaling_group_id)
    };

    for sg in &security_groups {
        let Some(mut r) = resource(sg, deleter::<SecurityGroupRecord>(|a| &a.security_groups))
        else {
            continue;
        };
        r = r.blocks(resource_key(VpcRecord::KIND, &sg.vpc_id));
        // The network goes last
        for (vpc_id, k) in &vswitch_keys {
            if *vpc_id == sg.vpc_id {
                r = r.blocks(k.clone());
            }
        }
        for config in &configurations {
            if config.security_group_id.as_deref() == sg.id.as_deref() {
                r.blocked.push(group_of(config));
            }
        }
        let sg_key = r.key();
        insert_resource(&mut map, r);

        for rule in apis
            .security_group_rules
            .list(scope, &ListFilter::by_parent(&r_id(sg)))
            .await?
        {
            let Some(mut rule_r) = resource(
                &rule,
                deleter::<SecurityGroupRuleRecord>(|a| &a.security_group_rules),
            ) else {
                continue;
            };
            rule_r = rule_r.blocks(sg_key.clone());
            if let Some(source) = &rule.source_group_id {
                rule_r = rule_r.blocks(resource_key(SecurityGroupRecord::KIND, source));
            }
            // Revoked only once no scaling group launches into the group
            for config in &configurations {
                if config.security_group_id.as_deref() == sg.id.as_deref() {
                    rule_r = rule_r.blocked_by(group_of(config));
                }
            }
            insert_resource(&mut map, rule_r);
        }
    }

    for role in InstanceGroupRole::ALL {
        let role_name = naming::identity_role(role, name);
        for record in apis
            .ram_roles
            .list(scope, &ListFilter::by_name(&role_name))
            .await?
        {
            let Some(mut r) = resource(&record, Arc::new(RamRoleDeleter)) else {
                continue;
            };
            for config in &configurations {
                if config.ram_role_id.as_deref() == record.id.as_deref() {
                    r.blocked.push(group_of(config));
                }
            }
            insert_resource(&mut map, r);
        }
    }

    for pair in apis
        .key_pairs
        .list(scope, &ListFilter::by_name(naming::ssh_key(name)))
        .await?
    {
        let Some(mut r) = resource(&pair, deleter::<KeyPairRecord>(|a| &a.key_pairs)) else {
            continue;
        };
        for config in &configurations {
            if config.key_pair_id.as_deref() == pair.id.as_deref() {
                r.blocked.push(group_of(config));
            }
        }
        insert_resource(&mut map, r);
    }

    for disk in apis.disks.list(scope, &owned).await? {
        let Some(mut r) = resource(&disk, deleter::<DiskRecord>(|a| &a.disks)) else {
            continue;
        };
        for k in &group_keys {
            r = r.blocked_by(k.clone());
        }
        insert_resource(&mut map, r);
    }

    for group in &groups {
        if let Some(r) = resource(group, Arc::new(ScalingGroupDeleter)) {
            insert_resource(&mut map, r);
        }
    }

    info!(cluster = %name, resources = map.len(), "Discovered ali resources");
    Ok(map)
}

fn r_id<R: CloudResource>(record: &R) -> String {
    record.id().unwrap_or_default().to_string()
}
