use super::{ModelBuilder, ModelContext};
use crate::cloud::AzureCloud;
use crate::error::{AzureError, Result};
use crate::tasks::{DEFAULT_DISK_SKU, Disk};
use kforge_cloud::{CloudTask, TaskGraph};
use kforge_core::{InstanceGroupRole, MemberSpec, naming, zones};

/// GiB of an etcd volume without an explicit size
pub const DEFAULT_ETCD_VOLUME_SIZE: u32 = 20;

/// One managed disk per etcd member, pinned to the zone of its group
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeBuilder;

impl ModelBuilder for VolumeBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AzureCloud>) -> Result<()> {
        if !ctx.supports(Disk::KIND) {
            return Ok(());
        }
        let cluster = ctx.cluster_name();

        for etcd in &ctx.cluster.spec.etcd_clusters {
            let peers: Vec<&str> = etcd.members.iter().map(|m| m.name.as_str()).collect();
            for member in &etcd.members {
                let group = ctx
                    .groups
                    .iter()
                    .find(|g| g.name == member.instance_group)
                    .ok_or_else(|| AzureError::UnknownEtcdGroup {
                        etcd_cluster: etcd.name.clone(),
                        member: member.name.clone(),
                        group: member.instance_group.clone(),
                    })?;
                let zone = group.zones.first().cloned().or_else(|| {
                    group
                        .subnets
                        .first()
                        .and_then(|s| ctx.cluster.subnet(s))
                        .map(|s| s.zone.clone())
                });
                let zones = zone
                    .map(|z| zones::azure_zone_number(&z))
                    .transpose()?
                    .into_iter()
                    .collect();

                let mut tags = ctx.role_tags(InstanceGroupRole::ControlPlane);
                tags.insert(
                    ctx.tags.etcd_key(&etcd.name),
                    MemberSpec::new(&member.name, peers.iter().copied()).to_string(),
                );

                graph.add_task(Disk {
                    name: naming::azure_etcd_volume(&member.name, &etcd.name, cluster),
                    resource_group: ctx.resource_group_link(),
                    zones,
                    size_gb: member.volume_size.unwrap_or(DEFAULT_ETCD_VOLUME_SIZE),
                    sku: member
                        .volume_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DISK_SKU.to_string()),
                    tags,
                    id: None,
                    lifecycle: ctx.lifecycle,
                })?;
            }
        }
        Ok(())
    }
}
