//! Azure tasks, one per resource kind
//!
//! Every task but [`ResourceGroup`] links to its resource group; the link's
//! name selects the scope the task reads and writes.

mod disk;
mod load_balancer;
mod network;
mod resource_group;
mod role_assignment;
mod scale_set;

pub use disk::{DEFAULT_DISK_SKU, Disk};
pub use load_balancer::{LoadBalancer, PublicIpAddress};
pub use network::{NetworkSecurityGroup, RouteTable, Subnet, VirtualNetwork};
pub use resource_group::ResourceGroup;
pub use role_assignment::{CONTRIBUTOR_ROLE_DEFINITION_ID, RoleAssignment};
pub use scale_set::VmScaleSet;

use crate::cloud::{AzureCloud, TAGS};
use kforge_cloud::{CloudResource, Context, Link, ListFilter, ResourceApi, Result, Scope};

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
pub(crate) fn check_owner<R: CloudResource>(ctx: &Context<AzureCloud>, record: &R) -> Result<()> {
    match record.tags() {
        Some(tags) => TAGS.ensure_owned(R::KIND, record.name(), tags, &ctx.cluster_name),
        None => Ok(()),
    }
}

/// Scope of the resource group behind `link`
pub(crate) fn scope_of(ctx: &Context<AzureCloud>, resource_group: &Link) -> Scope {
    ctx.cloud().group_scope(resource_group.name())
}
