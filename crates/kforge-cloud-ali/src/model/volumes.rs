use super::{ModelBuilder, ModelContext};
use crate::cloud::AliCloud;
use crate::error::{AliError, Result};
use crate::tasks::{DEFAULT_DISK_CATEGORY, Disk};
use kforge_cloud::{CloudTask, TaskGraph};
use kforge_core::{InstanceGroupRole, MemberSpec, naming};

/// GiB of an etcd volume without an explicit size
pub const DEFAULT_ETCD_VOLUME_SIZE: u32 = 20;

/// One data disk per etcd member, in the zone of the member's group
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeBuilder;

impl ModelBuilder for VolumeBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        if !ctx.supports(Disk::KIND) {
            return Ok(());
        }
        let cluster = ctx.cluster_name();

        for etcd in &ctx.cluster.spec.etcd_clusters {
            let peers: Vec<&str> = etcd.members.iter().map(|m| m.name.as_str()).collect();
            for member in &etcd.members {
                let unknown = || AliError::UnknownEtcdGroup {
                    etcd_cluster: etcd.name.clone(),
                    member: member.name.clone(),
                    group: member.instance_group.clone(),
                };
                let group = ctx
                    .groups
                    .iter()
                    .find(|g| g.name == member.instance_group)
                    .ok_or_else(unknown)?;
                let zone = group
                    .zones
                    .first()
                    .cloned()
                    .or_else(|| {
                        group
                            .subnets
                            .first()
                            .and_then(|s| ctx.cluster.subnet(s))
                            .map(|s| s.zone.clone())
                    })
                    .ok_or_else(unknown)?;

                let mut tags = ctx.role_tags(InstanceGroupRole::ControlPlane);
                tags.insert(
                    ctx.tags.etcd_key(&etcd.name),
                    MemberSpec::new(&member.name, peers.iter().copied()).to_string(),
                );

                graph.add_task(Disk {
                    name: naming::etcd_volume(&member.name, &etcd.name, cluster),
                    zone,
                    size_gb: member.volume_size.unwrap_or(DEFAULT_ETCD_VOLUME_SIZE),
                    category: member
                        .volume_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DISK_CATEGORY.to_string()),
                    tags,
                    id: None,
                    lifecycle: ctx.lifecycle,
                })?;
            }
        }
        Ok(())
    }
}
