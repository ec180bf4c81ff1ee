//! Discovery of the azure resources owned by a cluster, and their deleters
//!
//! Everything lives in the cluster's resource group, which goes last.
//! Subnets and role assignments carry no tags: subnets are listed under the
//! discovered networks, assignments by the principals of the discovered
//! scale sets. Machines go away with their scale set.

use crate::cloud::{AzureApis, AzureCloud, TAGS};
use crate::records::*;
use async_trait::async_trait;
use kforge_cloud::{
    CloudResource, Deleter, ListFilter, Resource, ResourceApi, ResourceMap, Result, Scope,
    insert_resource, resource_key,
};
use kforge_core::Cluster;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

type ApiOf<R> = fn(&AzureApis) -> &Arc<dyn ResourceApi<R>>;

/// Deletes by id through one adapter, in a fixed scope
struct ApiDeleter<R: CloudResource> {
    api: ApiOf<R>,
    scope: Scope,
}

impl<R: CloudResource> fmt::Debug for ApiDeleter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiDeleter<{}>({})", R::KIND, self.scope.name())
    }
}

#[async_trait]
impl<R: CloudResource> Deleter<AzureCloud> for ApiDeleter<R> {
    async fn delete(&self, cloud: &AzureCloud, resource: &Resource<AzureCloud>) -> Result<()> {
        let api = (self.api)(cloud.apis());
        match api.delete(&self.scope, &resource.id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

fn deleter<R: CloudResource>(api: ApiOf<R>, scope: &Scope) -> Arc<dyn Deleter<AzureCloud>> {
    Arc::new(ApiDeleter {
        api,
        scope: scope.clone(),
    })
}

/// Deletes the set's machines, then the set
#[derive(Debug)]
struct ScaleSetDeleter {
    scope: Scope,
}

#[async_trait]
impl Deleter<AzureCloud> for ScaleSetDeleter {
    async fn delete(&self, cloud: &AzureCloud, resource: &Resource<AzureCloud>) -> Result<()> {
        let apis = cloud.apis();
        for vm in apis
            .vms
            .list(&self.scope, &ListFilter::by_parent(&resource.id))
            .await?
        {
            if let Some(id) = vm.id.as_deref() {
                debug!(vm = %vm.computer_name, scale_set = %resource.name, "Deleting VM");
                match apis.vms.delete(&self.scope, id).await {
                    Err(e) if !e.is_not_found() => return Err(e),
                    _ => {}
                }
            }
        }
        match apis.scale_sets.delete(&self.scope, &resource.id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

fn key<R: CloudResource>(record: &R) -> Option<String> {
    record.id().map(|id| resource_key(R::KIND, id))
}

/// Resource for a listed record; records without an id are skipped
fn resource<R: CloudResource>(
    record: &R,
    deleter: Arc<dyn Deleter<AzureCloud>>,
) -> Option<Resource<AzureCloud>> {
    let id = record.id()?;
    Some(Resource::new(R::KIND, id, record.name(), deleter))
}

/// Every resource the cluster owns, with blocking edges set
pub async fn list_resources(
    cloud: &AzureCloud,
    cluster: &Cluster,
) -> Result<ResourceMap<AzureCloud>> {
    let apis = cloud.apis();
    let name = cluster.name.as_str();
    let group_name = cluster.resource_group_name();
    let scope = cloud.group_scope(&group_name);
    let owned = ListFilter::by_tags(TAGS.cluster_tags(name));
    let mut map = ResourceMap::new();

    let shared_group = cluster.is_shared_resource_group();
    let mut group_key = None;
    for group in apis
        .resource_groups
        .list(&cloud.subscription_scope(), &ListFilter::by_name(&group_name))
        .await?
    {
        if !shared_group && !TAGS.is_owned_by(&group.tags, name) {
            continue;
        }
        let deleter = deleter::<ResourceGroupRecord>(|a| &a.resource_groups, &cloud.subscription_scope());
        if let Some(r) = resource(&group, deleter) {
            group_key = Some(r.key());
            insert_resource(&mut map, r.shared(shared_group));
        }
    }
    // Everything inside blocks the group
    let inside = |r: Resource<AzureCloud>| match &group_key {
        Some(k) => r.blocks(k.clone()),
        None => r,
    };

    let mut networks = apis.virtual_networks.list(&scope, &owned).await?;
    let shared_network = cluster
        .spec
        .networking
        .network_id
        .clone()
        .filter(|_| cluster.shared_vpc());
    if let Some(network) = &shared_network {
        networks.retain(|n| &n.name != network);
        networks.extend(
            apis.virtual_networks
                .list(&scope, &ListFilter::by_name(network))
                .await?,
        );
    }
    let mut subnets = Vec::new();
    for network in &networks {
        let shared = shared_network.as_deref() == Some(network.name.as_str());
        if let Some(r) = resource(network, deleter::<VirtualNetworkRecord>(|a| &a.virtual_networks, &scope)) {
            insert_resource(&mut map, inside(r).shared(shared));
        }
        let Some(network_id) = network.id.as_deref() else {
            continue;
        };
        for subnet in apis
            .subnets
            .list(&scope, &ListFilter::by_parent(network_id))
            .await?
        {
            subnets.push((subnet, shared));
        }
    }

    let shared_subnets: Vec<&str> = cluster
        .spec
        .networking
        .subnets
        .iter()
        .filter(|s| s.id.as_deref().is_some_and(|id| !id.is_empty()))
        .map(|s| s.name.as_str())
        .collect();
    for (subnet, in_shared_network) in &subnets {
        let Some(mut r) = resource(subnet, deleter::<SubnetRecord>(|a| &a.subnets, &scope)) else {
            continue;
        };
        r = r.blocks(resource_key(VirtualNetworkRecord::KIND, &subnet.virtual_network_id));
        if let Some(nsg) = &subnet.network_security_group_id {
            r = r.blocks(resource_key(NetworkSecurityGroupRecord::KIND, nsg));
        }
        if let Some(table) = &subnet.route_table_id {
            r = r.blocks(resource_key(RouteTableRecord::KIND, table));
        }
        let shared = *in_shared_network || shared_subnets.contains(&subnet.name.as_str());
        insert_resource(&mut map, inside(r).shared(shared));
    }

    for nsg in apis.network_security_groups.list(&scope, &owned).await? {
        let deleter = deleter::<NetworkSecurityGroupRecord>(|a| &a.network_security_groups, &scope);
        if let Some(r) = resource(&nsg, deleter) {
            insert_resource(&mut map, inside(r));
        }
    }

    let shared_table = cluster.is_shared_route_table();
    let tables = if shared_table {
        apis.route_tables
            .list(&scope, &ListFilter::by_name(cluster.route_table_name()))
            .await?
    } else {
        apis.route_tables.list(&scope, &owned).await?
    };
    for table in &tables {
        if let Some(r) = resource(table, deleter::<RouteTableRecord>(|a| &a.route_tables, &scope)) {
            insert_resource(&mut map, inside(r).shared(shared_table));
        }
    }

    for ip in apis.public_ips.list(&scope, &owned).await? {
        if let Some(r) = resource(&ip, deleter::<PublicIpRecord>(|a| &a.public_ips, &scope)) {
            insert_resource(&mut map, inside(r));
        }
    }

    for lb in apis.load_balancers.list(&scope, &owned).await? {
        let Some(mut r) = resource(&lb, deleter::<LoadBalancerRecord>(|a| &a.load_balancers, &scope))
        else {
            continue;
        };
        if let Some(ip) = &lb.public_ip_id {
            r = r.blocks(resource_key(PublicIpRecord::KIND, ip));
        }
        if let Some(subnet) = &lb.subnet_id {
            r = r.blocks(resource_key(SubnetRecord::KIND, subnet));
        }
        insert_resource(&mut map, inside(r));
    }

    let scale_sets = apis.scale_sets.list(&scope, &owned).await?;
    let scale_set_keys: Vec<String> = scale_sets.iter().filter_map(key).collect();
    for vmss in &scale_sets {
        let deleter = Arc::new(ScaleSetDeleter {
            scope: scope.clone(),
        });
        let Some(mut r) = resource(vmss, deleter) else {
            continue;
        };
        r = r.blocks(resource_key(SubnetRecord::KIND, &vmss.subnet_id));
        if let Some(lb) = &vmss.load_balancer_id {
            r = r.blocks(resource_key(LoadBalancerRecord::KIND, lb));
        }
        insert_resource(&mut map, inside(r));
    }

    for assignment in apis
        .role_assignments
        .list(&scope, &ListFilter::all())
        .await?
    {
        let Some(vmss) = scale_sets
            .iter()
            .find(|s| s.principal_id.as_deref() == Some(assignment.principal_id.as_str()))
        else {
            continue;
        };
        let deleter = deleter::<RoleAssignmentRecord>(|a| &a.role_assignments, &scope);
        let Some(mut r) = resource(&assignment, deleter) else {
            continue;
        };
        if let Some(k) = key(vmss) {
            r = r.blocks(k);
        }
        insert_resource(&mut map, inside(r));
    }

    for disk in apis.disks.list(&scope, &owned).await? {
        let Some(mut r) = resource(&disk, deleter::<DiskRecord>(|a| &a.disks, &scope)) else {
            continue;
        };
        for k in &scale_set_keys {
            r = r.blocked_by(k.clone());
        }
        insert_resource(&mut map, inside(r));
    }

    info!(cluster = %name, resource_group = %group_name, resources = map.len(), "Discovered azure resources");
    Ok(map)
}
