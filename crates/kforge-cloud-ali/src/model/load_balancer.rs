use super::{ModelBuilder, ModelContext};
use crate::cloud::AliCloud;
use crate::error::{AliError, Result};
use crate::records::{AddressType, IpProtocol};
use crate::tasks::{Listener, LoadBalancer, WhiteList};
use kforge_cloud::{CloudTask, Link, TaskGraph};
use kforge_core::{LoadBalancerType, naming, ports};

/// `api.<cluster>-443`
pub(crate) fn listener_name(cluster: &str) -> String {
    format!("{}-{}", naming::ali_load_balancer(cluster), ports::API_FRONTEND)
}

/// API load balancer; public only
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancerBuilder;

impl ModelBuilder for LoadBalancerBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        match ctx.cluster.load_balancer_type() {
            None => return Ok(()),
            Some(LoadBalancerType::Internal) => {
                return Err(AliError::InternalLoadBalancerUnsupported);
            }
            Some(LoadBalancerType::Public) => {}
        }
        if !ctx.supports(LoadBalancer::KIND) {
            return Ok(());
        }

        let cluster = ctx.cluster_name();
        let lb_name = naming::ali_load_balancer(cluster);
        let listener = listener_name(cluster);

        graph.add_task(LoadBalancer {
            name: lb_name.clone(),
            address_type: AddressType::Internet,
            tags: ctx.cluster_tags(),
            id: None,
            address: None,
            lifecycle: ctx.lifecycle,
        })?;

        if ctx.supports(Listener::KIND) {
            graph.add_task(Listener {
                name: listener.clone(),
                load_balancer: Link::to::<LoadBalancer>(&lb_name),
                frontend_port: ports::API_FRONTEND,
                backend_port: ports::API_BACKEND,
                protocol: IpProtocol::Tcp,
                id: None,
                lifecycle: ctx.lifecycle,
            })?;
        }

        if ctx.supports(WhiteList::KIND) && ctx.supports(Listener::KIND) {
            graph.add_task(WhiteList {
                name: listener.clone(),
                load_balancer: Link::to::<LoadBalancer>(&lb_name),
                listener_port: ports::API_FRONTEND,
                source_items: ctx.cluster.spec.api.access.clone(),
                listener: Link::to::<Listener>(&listener),
                id: None,
                lifecycle: ctx.lifecycle,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;
    use kforge_config::EngineConfig;

    #[test]
    fn test_internal_adds_nothing() {
        let (cloud, _memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let cluster = fixtures::cluster(Some(LoadBalancerType::Internal));
        let groups = fixtures::groups();
        let ctx = ModelContext::new(&cloud, &cluster, &groups);
        let mut graph = TaskGraph::new();

        let err = LoadBalancerBuilder.build(&ctx, &mut graph).unwrap_err();
        assert_eq!(
            err.to_string(),
            "internal LoadBalancers are not yet supported by kops on ALI"
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn test_whitelist_follows_api_access() {
        let (cloud, _memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let mut cluster = fixtures::cluster(Some(LoadBalancerType::Public));
        cluster.spec.api.access = vec!["10.0.0.0/8".into(), "192.168.0.0/16".into()];
        let groups = fixtures::groups();
        let ctx = ModelContext::new(&cloud, &cluster, &groups);
        let mut graph = TaskGraph::new();
        LoadBalancerBuilder.build(&ctx, &mut graph).unwrap();

        let white_list = graph
            .get::<WhiteList>("api.demo.example.com-443")
            .unwrap();
        assert_eq!(white_list.source_items.len(), 2);
        assert_eq!(white_list.listener_port, 443);
    }
}
