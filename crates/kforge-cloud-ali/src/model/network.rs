use super::{ModelBuilder, ModelContext};
use crate::cloud::AliCloud;
use crate::error::Result;
use crate::tasks::{DEFAULT_EIP_BANDWIDTH, Eip, NatGateway, SnatEntry, VSwitch, Vpc};
use kforge_cloud::{CloudTask, Link, TaskGraph};
use kforge_core::{SubnetType, naming};

/// VPC, vswitches and the NAT path of private subnets
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkBuilder;

impl ModelBuilder for NetworkBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        let cluster = ctx.cluster_name();
        let networking = &ctx.cluster.spec.networking;
        let shared_vpc = ctx.cluster.shared_vpc();
        let vpc_name = naming::network(cluster);

        if ctx.supports(Vpc::KIND) {
            graph.add_task(Vpc {
                name: vpc_name.clone(),
                cidr: (!networking.network_cidr.is_empty()).then(|| networking.network_cidr.clone()),
                tags: ctx.cluster_tags(),
                id: networking.network_id.clone().filter(|_| shared_vpc),
                shared: shared_vpc,
                lifecycle: ctx.lifecycle,
            })?;
        }

        if ctx.supports(VSwitch::KIND) {
            for subnet in &networking.subnets {
                let shared = subnet.id.as_deref().is_some_and(|id| !id.is_empty());
                graph.add_task(VSwitch {
                    name: naming::subnet(&subnet.name, cluster),
                    vpc: Link::to::<Vpc>(&vpc_name),
                    zone: subnet.zone.clone(),
                    cidr: subnet.cidr.clone(),
                    tags: ctx.cluster_tags(),
                    id: subnet.id.clone().filter(|_| shared),
                    shared,
                    lifecycle: ctx.lifecycle,
                })?;
            }
        }

        let private: Vec<_> = networking
            .subnets
            .iter()
            .filter(|s| s.kind == SubnetType::Private)
            .collect();
        if private.is_empty() || !ctx.supports(NatGateway::KIND) {
            return Ok(());
        }

        let nat_name = naming::nat_gateway(cluster);
        graph.add_task(NatGateway {
            name: nat_name.clone(),
            vpc: Link::to::<Vpc>(&vpc_name),
            tags: ctx.cluster_tags(),
            id: None,
            lifecycle: ctx.lifecycle,
        })?;

        if !ctx.supports(Eip::KIND) {
            return Ok(());
        }
        let eip_name = naming::eip(cluster);
        graph.add_task(Eip {
            name: eip_name.clone(),
            bandwidth: Some(DEFAULT_EIP_BANDWIDTH),
            nat_gateway: Some(Link::to::<NatGateway>(&nat_name)),
            tags: ctx.cluster_tags(),
            id: None,
            ip_address: None,
            lifecycle: ctx.lifecycle,
        })?;

        if !ctx.supports(SnatEntry::KIND) {
            return Ok(());
        }
        for subnet in private {
            graph.add_task(SnatEntry {
                name: naming::snat_entry(&subnet.name, cluster),
                nat_gateway: Link::to::<NatGateway>(&nat_name),
                vswitch: Link::to::<VSwitch>(naming::subnet(&subnet.name, cluster)),
                eip: Link::to::<Eip>(&eip_name),
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
    use crate::model::fixtures::{self, CLUSTER};
    use kforge_config::EngineConfig;

    fn build(cloud: &AliCloud, cluster: &kforge_core::Cluster) -> TaskGraph<AliCloud> {
        let groups = fixtures::groups();
        let ctx = ModelContext::new(cloud, cluster, &groups);
        let mut graph = TaskGraph::new();
        NetworkBuilder.build(&ctx, &mut graph).unwrap();
        graph
    }

    #[test]
    fn test_private_subnet_gets_nat_path() {
        let (cloud, _memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let graph = build(&cloud, &fixtures::cluster(None));

        assert_eq!(graph.tasks_of::<VSwitch>().len(), 2);
        assert_eq!(graph.tasks_of::<NatGateway>().len(), 1);
        assert_eq!(graph.tasks_of::<Eip>().len(), 1);
        let snat = graph.tasks_of::<SnatEntry>();
        assert_eq!(snat.len(), 1);
        assert_eq!(snat[0].name, format!("private-cn-qingdao-b.{CLUSTER}"));
    }

    #[test]
    fn test_shared_vpc_is_marked_shared() {
        let (cloud, _memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let mut cluster = fixtures::cluster(None);
        cluster.spec.networking.network_id = Some("vnet-xyz".into());
        let graph = build(&cloud, &cluster);

        let vpc = graph.get::<Vpc>(CLUSTER).unwrap();
        assert!(vpc.shared);
        assert_eq!(vpc.id.as_deref(), Some("vnet-xyz"));
    }

    #[test]
    fn test_missing_snat_capability_emits_no_entries() {
        let (cloud, _memory) = AliCloud::in_memory("cn-qingdao", &EngineConfig::default());
        let capabilities = cloud.capabilities().clone().without(SnatEntry::KIND);
        let cloud = cloud.with_capabilities(capabilities);
        let graph = build(&cloud, &fixtures::cluster(None));

        assert!(graph.tasks_of::<SnatEntry>().is_empty());
        assert_eq!(graph.tasks_of::<NatGateway>().len(), 1);
    }
}
