use super::{ModelBuilder, ModelContext};
use crate::cloud::AzureCloud;
use crate::error::{AzureError, Result};
use crate::records::{RuleProtocol, SecurityRule};
use crate::tasks::{NetworkSecurityGroup, RouteTable, Subnet, VirtualNetwork};
use ipnet::IpNet;
use kforge_cloud::{CloudTask, Link, TaskGraph};
use kforge_core::{Cluster, naming, ports};

/// CIDRs split by address family
fn split_families(cidrs: &[String]) -> Result<(Vec<String>, Vec<String>)> {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for cidr in cidrs {
        match cidr.parse::<IpNet>() {
            Ok(IpNet::V4(_)) => v4.push(cidr.clone()),
            Ok(IpNet::V6(_)) => v6.push(cidr.clone()),
            Err(_) => return Err(AzureError::InvalidCidr(cidr.clone())),
        }
    }
    Ok((v4, v6))
}

/// An IPv4 rule at `priority` and an IPv6 rule right after it, each only
/// when the family has sources
fn allow_pair(
    rules: &mut Vec<SecurityRule>,
    name: &str,
    priority: u32,
    sources: &[String],
    port_range: String,
) -> Result<()> {
    let (v4, v6) = split_families(sources)?;
    for (suffix, offset, prefixes) in [("", 0, v4), ("_v6", 1, v6)] {
        if prefixes.is_empty() {
            continue;
        }
        rules.push(SecurityRule {
            name: format!("{name}{suffix}"),
            priority: priority + offset,
            protocol: RuleProtocol::Tcp,
            source_address_prefixes: prefixes,
            destination_port_range: port_range.clone(),
        });
    }
    Ok(())
}

/// Inbound rules of the cluster NSG: SSH at 100, the API at 200 and node
/// ports at 300
pub fn security_rules(cluster: &Cluster) -> Result<Vec<SecurityRule>> {
    let spec = &cluster.spec;
    let mut rules = Vec::new();
    allow_pair(&mut rules, "AllowSSH", 100, &spec.ssh_access, ports::SSH.to_string())?;
    allow_pair(
        &mut rules,
        "AllowKubernetesAPI",
        200,
        &spec.api.access,
        ports::API_FRONTEND.to_string(),
    )?;
    allow_pair(
        &mut rules,
        "AllowNodePort",
        300,
        &spec.node_port_access,
        spec.node_port_range.format_with('-'),
    )?;
    Ok(rules)
}

/// Virtual network, its NSG, subnets and the route table
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkBuilder;

impl ModelBuilder for NetworkBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AzureCloud>) -> Result<()> {
        let networking = &ctx.cluster.spec.networking;
        let shared_vpc = ctx.cluster.shared_vpc();
        let vnet_name = networking
            .network_id
            .clone()
            .filter(|_| shared_vpc)
            .unwrap_or_else(|| naming::network(ctx.cluster_name()));

        if ctx.supports(VirtualNetwork::KIND) {
            graph.add_task(VirtualNetwork {
                name: vnet_name.clone(),
                resource_group: ctx.resource_group_link(),
                cidr: (!networking.network_cidr.is_empty()).then(|| networking.network_cidr.clone()),
                tags: ctx.cluster_tags(),
                id: None,
                shared: shared_vpc,
                lifecycle: ctx.lifecycle,
            })?;
        }

        let with_nsg = ctx.supports(NetworkSecurityGroup::KIND);
        if with_nsg {
            graph.add_task(NetworkSecurityGroup {
                name: vnet_name.clone(),
                resource_group: ctx.resource_group_link(),
                rules: security_rules(ctx.cluster)?,
                tags: ctx.cluster_tags(),
                id: None,
                lifecycle: ctx.lifecycle,
            })?;
        }

        let route_table = ctx.cluster.route_table_name();
        let with_route_table = ctx.supports(RouteTable::KIND);
        if with_route_table {
            graph.add_task(RouteTable {
                name: route_table.clone(),
                resource_group: ctx.resource_group_link(),
                tags: ctx.cluster_tags(),
                id: None,
                shared: ctx.cluster.is_shared_route_table(),
                lifecycle: ctx.lifecycle,
            })?;
        }

        if !ctx.supports(Subnet::KIND) {
            return Ok(());
        }
        for subnet in &networking.subnets {
            let shared = shared_vpc || subnet.id.as_deref().is_some_and(|id| !id.is_empty());
            graph.add_task(Subnet {
                name: subnet.name.clone(),
                resource_group: ctx.resource_group_link(),
                virtual_network: Link::to::<VirtualNetwork>(&vnet_name),
                cidr: subnet.cidr.clone(),
                network_security_group: with_nsg
                    .then(|| Link::to::<NetworkSecurityGroup>(&vnet_name)),
                route_table: with_route_table.then(|| Link::to::<RouteTable>(&route_table)),
                id: None,
                shared,
                lifecycle: ctx.lifecycle,
            })?;
        }
        Ok(())
    }
}
