use super::{ModelBuilder, ModelContext, UserDataSource};
use crate::cloud::AliCloud;
use crate::error::{AliError, Result};
use crate::tasks::{
    LaunchConfiguration, LoadBalancer, RamRole, ScalingGroup, SecurityGroup, SshKey, VSwitch,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use kforge_cloud::{CloudTask, Link, TaskGraph};
use kforge_core::{InstanceGroup, InstanceGroupRole, LoadBalancerType, naming};

/// A scaling group and its launch configuration per instance group
pub struct ScalingGroupBuilder<'a> {
    pub user_data: &'a dyn UserDataSource,
}

impl ScalingGroupBuilder<'_> {
    fn scaling_group(&self, ctx: &ModelContext<'_>, group: &InstanceGroup) -> Result<ScalingGroup> {
        let cluster = ctx.cluster_name();
        let vswitches = group
            .subnets
            .iter()
            .map(|subnet| match ctx.cluster.subnet(subnet) {
                Some(_) => Ok(Link::to::<VSwitch>(naming::subnet(subnet, cluster))),
                None => Err(AliError::UnknownSubnet {
                    group: group.name.clone(),
                    subnet: subnet.clone(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        let public_api = ctx.cluster.load_balancer_type() == Some(LoadBalancerType::Public);
        let load_balancers = if group.role == InstanceGroupRole::ControlPlane
            && public_api
            && ctx.supports(LoadBalancer::KIND)
        {
            vec![Link::to::<LoadBalancer>(naming::ali_load_balancer(cluster))]
        } else {
            Vec::new()
        };

        Ok(ScalingGroup {
            name: naming::scale_group(group, cluster),
            min_size: group.min_size,
            max_size: group.max_size,
            vswitches,
            load_balancers,
            tags: group_tags(ctx, group),
            id: None,
            active_configuration_id: None,
            state: Default::default(),
            lifecycle: ctx.lifecycle,
        })
    }

    fn launch_configuration(
        &self,
        ctx: &ModelContext<'_>,
        group: &InstanceGroup,
    ) -> Result<LaunchConfiguration> {
        let cluster = ctx.cluster_name();
        let script = self.user_data.user_data(ctx.cluster, group)?;

        Ok(LaunchConfiguration {
            name: naming::launch_configuration_prefix(group, cluster),
            scaling_group: Link::to::<ScalingGroup>(naming::scale_group(group, cluster)),
            image_id: group.image.clone(),
            instance_type: group.machine_type.clone(),
            system_disk_size: group.root_volume_size,
            system_disk_category: group.root_volume_type.clone(),
            ssh_key: ctx
                .has_ssh_key()
                .then(|| Link::to::<SshKey>(naming::ssh_key(cluster))),
            ram_role: ctx
                .supports(RamRole::KIND)
                .then(|| Link::to::<RamRole>(naming::identity_role(group.role, cluster))),
            security_group: ctx
                .supports(SecurityGroup::KIND)
                .then(|| Link::to::<SecurityGroup>(naming::security_group(group.role, cluster))),
            user_data: (!script.is_empty()).then(|| BASE64.encode(script)),
            tags: group_tags(ctx, group),
            id: None,
            configuration_name: None,
            lifecycle: ctx.lifecycle,
        })
    }
}

/// Cloud labels, then the role and cluster tags on top
fn group_tags(ctx: &ModelContext<'_>, group: &InstanceGroup) -> kforge_cloud::Tags {
    let mut tags = group.cloud_labels.clone();
    tags.extend(ctx.role_tags(group.role));
    tags
}

impl ModelBuilder for ScalingGroupBuilder<'_> {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        if !ctx.supports(ScalingGroup::KIND) {
            return Ok(());
        }
        for group in ctx.groups {
            graph.add_task(self.scaling_group(ctx, group)?)?;
            if ctx.supports(LaunchConfiguration::KIND) {
                graph.add_task(self.launch_configuration(ctx, group)?)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeupUserData, fixtures};
    use kforge_cloud::CloudError;
    use kforge_config::EngineConfig;

    fn build(
        cluster: &kforge_core::Cluster,
        groups: &[InstanceGroup],
    ) -> Result<TaskGraph<AliCloud>> {
        let (cloud, _memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let ctx = ModelContext::new(&cloud, cluster, groups);
        let mut graph = TaskGraph::new();
        ScalingGroupBuilder {
            user_data: &NodeupUserData,
        }
        .build(&ctx, &mut graph)?;
        Ok(graph)
    }

    #[test]
    fn test_masters_link_the_api_load_balancer() {
        let cluster = fixtures::cluster(Some(LoadBalancerType::Public));
        let graph = build(&cluster, &fixtures::groups()).unwrap();

        let master = graph
            .get::<ScalingGroup>("o-b.masters.demo.example.com")
            .unwrap();
        assert_eq!(master.load_balancers.len(), 1);
        assert_eq!(master.load_balancers[0].name(), "api.demo.example.com");
        let nodes = graph.get::<ScalingGroup>("nodes.demo.example.com").unwrap();
        assert!(nodes.load_balancers.is_empty());
        assert_eq!(nodes.tags.get("k8s.io/role/node").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_user_data_is_base64() {
        let cluster = fixtures::cluster(None);
        let graph = build(&cluster, &fixtures::groups()).unwrap();

        let config = graph
            .get::<LaunchConfiguration>("nodes.demo.example.com")
            .unwrap();
        let decoded = BASE64.decode(config.user_data.as_deref().unwrap()).unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("nodes"));
        assert!(config.ssh_key.is_none());
    }

    #[test]
    fn test_colliding_master_names_are_duplicates() {
        let cluster = fixtures::cluster(None);
        let groups = vec![
            fixtures::group("master-a-1b", InstanceGroupRole::ControlPlane, "cn-qingdao-b"),
            fixtures::group("master-b-1b", InstanceGroupRole::ControlPlane, "cn-qingdao-b"),
        ];

        let err = build(&cluster, &groups).err().unwrap();
        assert!(matches!(err, AliError::Cloud(CloudError::DuplicateTask(_))));
    }
}
