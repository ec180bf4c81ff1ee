//! Ali tasks, one per resource kind

mod disk;
mod firewall;
mod identity;
mod load_balancer;
mod network;
mod scaling;
mod ssh_key;

pub use disk::{DEFAULT_DISK_CATEGORY, Disk};
pub use firewall::{ALL_PORTS, SecurityGroup, SecurityGroupRule};
pub use identity::{RamPolicy, RamRole};
pub use load_balancer::{LoadBalancer, Listener, WhiteList};
pub use network::{DEFAULT_EIP_BANDWIDTH, Eip, NatGateway, SnatEntry, VSwitch, Vpc};
pub use scaling::{LaunchConfiguration, RETAINED_CONFIGURATIONS, ScalingGroup};
pub use ssh_key::SshKey;

use crate::cloud::{AliCloud, TAGS};
use kforge_cloud::{
    Changes, CloudResource, Context, ListFilter, ResourceApi, Result, Scope, TagDelta, Tags,
};

pub(crate) async fn find_by_id<R: CloudResource>(
    api: &dyn ResourceApi<R>,
    scope: &Scope,
    id: &str,
) -> Result<Option<R>> {
    Ok(api
        .list(scope, &ListFilter::all())
        .await?
        .into_iter()
        .find(|r| r.id() == Some(id)))
}

/// Refuses a record carrying another cluster's tag
pub(crate) fn check_owner<R: CloudResource>(ctx: &Context<AliCloud>, record: &R) -> Result<()> {
    match record.tags() {
        Some(tags) => TAGS.ensure_owned(R::KIND, record.name(), tags, &ctx.cluster_name),
        None => Ok(()),
    }
}

/// Writes `record`, through the tag operations alone when only tags differ
pub(crate) async fn apply<R: CloudResource>(
    api: &dyn ResourceApi<R>,
    scope: &Scope,
    record: R,
    actual_tags: Option<&Tags>,
    changes: &Changes,
) -> Result<R> {
    let tags_only = changes.len() == 1 && changes.contains("tags");
    if tags_only && api.supports_tags() {
        if let (Some(actual_tags), Some(id)) = (actual_tags, record.id().map(str::to_string)) {
            let desired = record.tags().cloned().unwrap_or_default();
            TagDelta::between(&desired, actual_tags, TAGS.cluster_key)
                .apply(api, scope, &id)
                .await?;
            return Ok(record);
        }
    }
    api.create_or_update(scope, record).await
}
