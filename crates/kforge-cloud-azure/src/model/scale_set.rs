use super::{ModelBuilder, ModelContext, UserDataSource};
use crate::cloud::AzureCloud;
use crate::error::{AzureError, Result};
use crate::tasks::{CONTRIBUTOR_ROLE_DEFINITION_ID, LoadBalancer, RoleAssignment, Subnet, VmScaleSet};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use kforge_cloud::{CloudTask, Link, TaskGraph, Tags};
use kforge_core::{InstanceGroup, InstanceGroupRole, SubnetType, naming, zones};

/// Admin account of the machines when the cluster names none
pub const DEFAULT_ADMIN_USER: &str = "admin-user";

/// A scale set and its role assignment per instance group
pub struct ScaleSetBuilder<'a> {
    pub user_data: &'a dyn UserDataSource,
}

impl ScaleSetBuilder<'_> {
    fn scale_set(&self, ctx: &ModelContext<'_>, group: &InstanceGroup, ssh_key: &str) -> Result<VmScaleSet> {
        let cluster = ctx.cluster_name();
        let subnet_name = group
            .subnets
            .first()
            .ok_or_else(|| AzureError::NoSubnet(group.name.clone()))?;
        let subnet = ctx
            .cluster
            .subnet(subnet_name)
            .ok_or_else(|| AzureError::UnknownSubnet {
                group: group.name.clone(),
                subnet: subnet_name.clone(),
            })?;

        let load_balancer = (group.role == InstanceGroupRole::ControlPlane
            && ctx.cluster.load_balancer_type().is_some()
            && ctx.supports(LoadBalancer::KIND))
        .then(|| Link::to::<LoadBalancer>(naming::azure_load_balancer(cluster)));

        let zones = group
            .zones
            .iter()
            .map(|z| zones::azure_zone_number(z))
            .collect::<kforge_core::Result<Vec<_>>>()?;

        let script = self.user_data.user_data(ctx.cluster, group)?;
        let admin_user = ctx
            .cluster
            .spec
            .azure
            .as_ref()
            .and_then(|a| a.admin_user.clone())
            .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string());

        Ok(VmScaleSet {
            name: naming::azure_scale_set(group, cluster),
            resource_group: ctx.resource_group_link(),
            sku: group.machine_type.clone(),
            capacity: group.min_size,
            subnet: Link::to::<Subnet>(&subnet.name),
            load_balancer,
            computer_name_prefix: group.name.clone(),
            admin_user,
            ssh_public_key: ssh_key.to_string(),
            user_data: (!script.is_empty()).then(|| BASE64.encode(script)),
            require_public_ip: group
                .associate_public_ip
                .unwrap_or(subnet.kind == SubnetType::Public),
            zones,
            tags: group_tags(ctx, group),
            id: None,
            principal_id: None,
            lifecycle: ctx.lifecycle,
        })
    }
}

/// Cloud labels, then the role and cluster tags on top
fn group_tags(ctx: &ModelContext<'_>, group: &InstanceGroup) -> Tags {
    let mut tags = group.cloud_labels.clone();
    tags.extend(ctx.role_tags(group.role));
    tags
}

impl ModelBuilder for ScaleSetBuilder<'_> {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AzureCloud>) -> Result<()> {
        if !ctx.supports(VmScaleSet::KIND) || ctx.groups.is_empty() {
            return Ok(());
        }
        let ssh_key = ctx
            .cluster
            .spec
            .ssh_public_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AzureError::MissingSshKey)?;
        let cluster = ctx.cluster_name();

        for group in ctx.groups {
            let scale_set = self.scale_set(ctx, group, ssh_key)?;
            let scale_set_name = scale_set.name.clone();
            graph.add_task(scale_set)?;

            if ctx.supports(RoleAssignment::KIND) {
                graph.add_task(RoleAssignment {
                    name: naming::role_assignment(group, cluster),
                    resource_group: ctx.resource_group_link(),
                    scale_set: Link::to::<VmScaleSet>(scale_set_name),
                    role_definition_id: CONTRIBUTOR_ROLE_DEFINITION_ID.to_string(),
                    id: None,
                    principal_id: None,
                    lifecycle: ctx.lifecycle,
                })?;
            }
        }
        Ok(())
    }
}
