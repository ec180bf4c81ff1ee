use super::{ModelBuilder, ModelContext};
use crate::cloud::AliCloud;
use crate::error::Result;
use crate::records::IpProtocol;
use crate::tasks::{ALL_PORTS, SecurityGroup, SecurityGroupRule, Vpc};
use kforge_cloud::{CloudTask, Link, TaskGraph};
use kforge_core::{InstanceGroupRole, naming, ports};

fn group_link(role: InstanceGroupRole, cluster: &str) -> Link {
    Link::to::<SecurityGroup>(naming::security_group(role, cluster))
}

fn cidr_rule(
    ctx: &ModelContext<'_>,
    name: String,
    target: InstanceGroupRole,
    protocol: IpProtocol,
    port_range: String,
    cidr: &str,
) -> SecurityGroupRule {
    SecurityGroupRule {
        name,
        security_group: group_link(target, ctx.cluster_name()),
        protocol,
        port_range,
        source_cidr: Some(cidr.to_string()),
        source_group: None,
        id: None,
        lifecycle: ctx.lifecycle,
    }
}

fn group_rule(
    ctx: &ModelContext<'_>,
    name: String,
    target: InstanceGroupRole,
    source: InstanceGroupRole,
    port_range: String,
) -> SecurityGroupRule {
    let protocol = if port_range == ALL_PORTS {
        IpProtocol::All
    } else {
        IpProtocol::Tcp
    };
    SecurityGroupRule {
        name,
        security_group: group_link(target, ctx.cluster_name()),
        protocol,
        port_range,
        source_cidr: None,
        source_group: Some(group_link(source, ctx.cluster_name())),
        id: None,
        lifecycle: ctx.lifecycle,
    }
}

/// One security group per role and the intra-cluster permissions
#[derive(Debug, Clone, Copy, Default)]
pub struct FirewallBuilder;

impl ModelBuilder for FirewallBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        if !ctx.supports(SecurityGroup::KIND) {
            return Ok(());
        }
        let cluster = ctx.cluster_name();
        let roles = ctx.roles();

        for &role in &roles {
            graph.add_task(SecurityGroup {
                name: naming::security_group(role, cluster),
                vpc: Link::to::<Vpc>(naming::network(cluster)),
                tags: ctx.role_tags(role),
                id: None,
                lifecycle: ctx.lifecycle,
            })?;
        }

        if !ctx.supports(SecurityGroupRule::KIND) {
            return Ok(());
        }

        use InstanceGroupRole::{Bastion, ControlPlane, Node};
        let mut rules = vec![
            // Members of one role talk freely among themselves
            group_rule(
                ctx,
                naming::security_group_rule("all-self", ControlPlane, ""),
                ControlPlane,
                ControlPlane,
                ALL_PORTS.to_string(),
            ),
            group_rule(
                ctx,
                naming::security_group_rule("all-self", Node, ""),
                Node,
                Node,
                ALL_PORTS.to_string(),
            ),
            group_rule(
                ctx,
                naming::security_group_rule("all-from-masters", Node, ""),
                Node,
                ControlPlane,
                ALL_PORTS.to_string(),
            ),
            group_rule(
                ctx,
                naming::security_group_rule("all-from-nodes", ControlPlane, ""),
                ControlPlane,
                Node,
                ALL_PORTS.to_string(),
            ),
        ];
        if roles.contains(&Bastion) {
            for target in [ControlPlane, Node] {
                rules.push(group_rule(
                    ctx,
                    naming::security_group_rule("ssh-from-bastions", target, ""),
                    target,
                    Bastion,
                    SecurityGroupRule::port(ports::SSH),
                ));
            }
        }
        for rule in rules {
            graph.add_task(rule)?;
        }
        Ok(())
    }
}

/// SSH, API and NodePort access from outside the cluster
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalAccessBuilder;

impl ModelBuilder for ExternalAccessBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        if !ctx.supports(SecurityGroupRule::KIND) {
            return Ok(());
        }
        let spec = &ctx.cluster.spec;
        use InstanceGroupRole::{Bastion, ControlPlane, Node};

        let ssh_targets: &[InstanceGroupRole] = if ctx.uses_bastion() {
            &[Bastion]
        } else {
            &[ControlPlane, Node]
        };
        for cidr in &spec.ssh_access {
            for &target in ssh_targets {
                graph.add_task(cidr_rule(
                    ctx,
                    naming::security_group_rule("ssh-external", target, cidr),
                    target,
                    IpProtocol::Tcp,
                    SecurityGroupRule::port(ports::SSH),
                    cidr,
                ))?;
            }
        }

        if spec.api.load_balancer.is_none() {
            for cidr in &spec.api.access {
                graph.add_task(cidr_rule(
                    ctx,
                    naming::security_group_rule("https-api", ControlPlane, cidr),
                    ControlPlane,
                    IpProtocol::Tcp,
                    SecurityGroupRule::port(ports::API_BACKEND),
                    cidr,
                ))?;
            }
        }

        let node_ports = spec.node_port_range.format_with('/');
        for cidr in &spec.node_port_access {
            for (prefix, protocol) in [
                ("nodeport-tcp", IpProtocol::Tcp),
                ("nodeport-udp", IpProtocol::Udp),
            ] {
                graph.add_task(cidr_rule(
                    ctx,
                    naming::security_group_rule(prefix, Node, cidr),
                    Node,
                    protocol,
                    node_ports.clone(),
                    cidr,
                ))?;
            }
        }
        Ok(())
    }
}
