use super::{ModelBuilder, ModelContext};
use crate::cloud::AzureCloud;
use crate::error::{AzureError, Result};
use crate::tasks::{LoadBalancer, PublicIpAddress, Subnet};
use kforge_cloud::{CloudTask, Link, TaskGraph};
use kforge_core::{InstanceGroupRole, LoadBalancerType, naming};

/// API load balancer, public behind its own IP or internal on a subnet
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancerBuilder;

impl LoadBalancerBuilder {
    /// Subnet of the first control-plane group, else the first cluster subnet
    fn internal_subnet(ctx: &ModelContext<'_>) -> Result<String> {
        ctx.groups
            .iter()
            .filter(|g| g.role == InstanceGroupRole::ControlPlane)
            .find_map(|g| g.subnets.first())
            .or_else(|| ctx.cluster.spec.networking.subnets.first().map(|s| &s.name))
            .cloned()
            .ok_or(AzureError::NoLoadBalancerSubnet)
    }
}

impl ModelBuilder for LoadBalancerBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AzureCloud>) -> Result<()> {
        let Some(kind) = ctx.cluster.load_balancer_type() else {
            return Ok(());
        };
        if !ctx.supports(LoadBalancer::KIND) {
            return Ok(());
        }
        let cluster = ctx.cluster_name();

        let (public_ip, subnet) = match kind {
            LoadBalancerType::Public => {
                let ip_name = naming::azure_public_ip(cluster);
                graph.add_task(PublicIpAddress {
                    name: ip_name.clone(),
                    resource_group: ctx.resource_group_link(),
                    tags: ctx.cluster_tags(),
                    id: None,
                    address: None,
                    lifecycle: ctx.lifecycle,
                })?;
                (Some(Link::to::<PublicIpAddress>(ip_name)), None)
            }
            LoadBalancerType::Internal => {
                let subnet = Self::internal_subnet(ctx)?;
                (None, Some(Link::to::<Subnet>(subnet)))
            }
        };

        graph.add_task(LoadBalancer {
            name: naming::azure_load_balancer(cluster),
            resource_group: ctx.resource_group_link(),
            external: kind == LoadBalancerType::Public,
            public_ip,
            subnet,
            tags: ctx.cluster_tags(),
            id: None,
            frontend_ip: None,
            lifecycle: ctx.lifecycle,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;
    use kforge_config::EngineConfig;
    use kforge_core::{Cluster, InstanceGroup};

    fn build(cluster: &Cluster, groups: &[InstanceGroup]) -> Result<TaskGraph<AzureCloud>> {
        let (cloud, _memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        let ctx = ModelContext::new(&cloud, cluster, groups);
        let mut graph = TaskGraph::new();
        LoadBalancerBuilder.build(&ctx, &mut graph)?;
        Ok(graph)
    }

    #[test]
    fn test_public_lb_gets_an_ip() {
        let cluster = fixtures::cluster(Some(LoadBalancerType::Public));
        let graph = build(&cluster, &fixtures::groups()).unwrap();

        let lb = graph.get::<LoadBalancer>("api-demo-example-com").unwrap();
        assert!(lb.external);
        assert_eq!(lb.public_ip.as_ref().unwrap().name(), "api-demo-example-com");
        assert_eq!(graph.tasks_of::<PublicIpAddress>().len(), 1);
    }

    #[test]
    fn test_internal_lb_uses_master_subnet() {
        let cluster = fixtures::cluster(Some(LoadBalancerType::Internal));
        let graph = build(&cluster, &fixtures::groups()).unwrap();

        let lb = graph.get::<LoadBalancer>("api-demo-example-com").unwrap();
        assert!(!lb.external);
        assert_eq!(lb.subnet.as_ref().unwrap().name(), "westeurope-1");
        assert!(graph.tasks_of::<PublicIpAddress>().is_empty());
    }

    #[test]
    fn test_internal_lb_without_any_subnet() {
        let mut cluster = fixtures::cluster(Some(LoadBalancerType::Internal));
        cluster.spec.networking.subnets.clear();
        let err = build(&cluster, &[]).err().unwrap();
        assert!(matches!(err, AzureError::NoLoadBalancerSubnet));
    }

    #[test]
    fn test_no_lb_configured() {
        let graph = build(&fixtures::cluster(None), &fixtures::groups()).unwrap();
        assert!(graph.is_empty());
    }
}
