//! Configuration checks run before any cloud call

use crate::error::{CoreError, Result};
use crate::model::{Cluster, InstanceGroup};
use crate::ports;
use ipnet::IpNet;
use std::collections::HashSet;
use tracing::debug;

/// Checks a DNS-like name: dot-separated labels of lowercase alphanumerics
/// and dashes, no label starting or ending with a dash.
pub fn validate_dns_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::RequiredField(field.to_string()));
    }
    if name.len() > 253 {
        return Err(CoreError::invalid(field, "name is longer than 253 characters"));
    }
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(CoreError::invalid(field, format!("invalid label in {name:?}")));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(CoreError::invalid(
                field,
                format!("label {label:?} starts or ends with '-'"),
            ));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(CoreError::invalid(
                field,
                format!("label {label:?} contains invalid characters"),
            ));
        }
    }
    Ok(())
}

pub fn parse_cidr(field: &str, cidr: &str) -> Result<IpNet> {
    cidr.parse::<IpNet>()
        .map_err(|e| CoreError::invalid(field, format!("{cidr:?}: {e}")))
}

fn validate_cidrs(field: &str, cidrs: &[String]) -> Result<()> {
    for cidr in cidrs {
        parse_cidr(field, cidr)?;
    }
    Ok(())
}

pub fn validate_cluster(cluster: &Cluster) -> Result<()> {
    validate_dns_name("name", &cluster.name)?;
    let spec = &cluster.spec;

    if spec.networking.network_cidr.is_empty() {
        return Err(CoreError::RequiredField("spec.networking.networkCidr".into()));
    }
    let network = parse_cidr("spec.networking.networkCidr", &spec.networking.network_cidr)?;

    let mut names = HashSet::new();
    for (i, subnet) in spec.networking.subnets.iter().enumerate() {
        let field = format!("spec.networking.subnets[{i}]");
        if subnet.name.is_empty() {
            return Err(CoreError::RequiredField(format!("{field}.name")));
        }
        if !names.insert(subnet.name.as_str()) {
            return Err(CoreError::invalid(
                &field,
                format!("duplicate subnet name {:?}", subnet.name),
            ));
        }
        if subnet.zone.is_empty() {
            return Err(CoreError::RequiredField(format!("{field}.zone")));
        }
        let cidr = parse_cidr(&format!("{field}.cidr"), &subnet.cidr)?;
        if !network.contains(&cidr) {
            return Err(CoreError::invalid(
                format!("{field}.cidr"),
                format!("{} is not inside {}", cidr, network),
            ));
        }
    }

    validate_cidrs("spec.api.access", &spec.api.access)?;
    validate_cidrs("spec.sshAccess", &spec.ssh_access)?;
    validate_cidrs("spec.nodePortAccess", &spec.node_port_access)?;

    let range = spec.node_port_range;
    if range.size == 0 {
        return Err(CoreError::invalid("spec.nodePortRange.size", "must be positive"));
    }
    if range.last() > u16::MAX as u32 {
        return Err(CoreError::invalid(
            "spec.nodePortRange",
            format!("range ends past {}", u16::MAX),
        ));
    }
    if ports::overlaps_reserved(range.base as u32, range.last()) {
        return Err(CoreError::invalid(
            "spec.nodePortRange",
            format!("{} overlaps reserved control-plane ports", range.format_with('-')),
        ));
    }

    for (i, etcd) in spec.etcd_clusters.iter().enumerate() {
        let field = format!("spec.etcdClusters[{i}]");
        if etcd.name.is_empty() {
            return Err(CoreError::RequiredField(format!("{field}.name")));
        }
        if etcd.members.is_empty() {
            return Err(CoreError::invalid(
                &field,
                format!("etcd cluster {:?} has no members", etcd.name),
            ));
        }
        let mut members = HashSet::new();
        for member in &etcd.members {
            if !members.insert(member.name.as_str()) {
                return Err(CoreError::invalid(
                    &field,
                    format!("duplicate etcd member {:?}", member.name),
                ));
            }
            if member.instance_group.is_empty() {
                return Err(CoreError::RequiredField(format!("{field}.members.instanceGroup")));
            }
        }
    }

    Ok(())
}

pub fn validate_instance_group(cluster: &Cluster, group: &InstanceGroup) -> Result<()> {
    let field = format!("instanceGroup {}", group.name);
    if group.name.is_empty() {
        return Err(CoreError::RequiredField("instanceGroup.name".into()));
    }
    if group.min_size > group.max_size {
        return Err(CoreError::invalid(
            &field,
            format!("minSize {} is greater than maxSize {}", group.min_size, group.max_size),
        ));
    }
    if group.subnets.is_empty() {
        return Err(CoreError::RequiredField(format!("{field}.subnets")));
    }
    for subnet in &group.subnets {
        if cluster.subnet(subnet).is_none() {
            return Err(CoreError::invalid(
                &field,
                format!("subnet {subnet:?} is not defined in the cluster"),
            ));
        }
    }
    Ok(())
}

/// Validates the cluster and every instance group, including that etcd
/// members point at existing groups
pub fn validate(cluster: &Cluster, groups: &[InstanceGroup]) -> Result<()> {
    debug!(cluster = %cluster.name, groups = groups.len(), "Validating cluster");
    validate_cluster(cluster)?;

    let mut names = HashSet::new();
    for group in groups {
        if !names.insert(group.name.as_str()) {
            return Err(CoreError::invalid(
                "instanceGroups",
                format!("duplicate instance group {:?}", group.name),
            ));
        }
        validate_instance_group(cluster, group)?;
    }

    for etcd in &cluster.spec.etcd_clusters {
        for member in &etcd.members {
            if !names.contains(member.instance_group.as_str()) {
                return Err(CoreError::invalid(
                    format!("etcdCluster {}", etcd.name),
                    format!(
                        "member {:?} references unknown instance group {:?}",
                        member.name, member.instance_group
                    ),
                ));
            }
        }
    }
    Ok(())
}
