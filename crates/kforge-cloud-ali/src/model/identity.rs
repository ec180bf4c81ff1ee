use super::{ModelBuilder, ModelContext, PolicySource};
use crate::cloud::AliCloud;
use crate::error::{AliError, Result};
use crate::model::sources::ECS_ASSUME_ROLE_POLICY;
use crate::tasks::{RamPolicy, RamRole, SshKey};
use kforge_cloud::{CloudTask, Link, TaskGraph};
use kforge_core::{InstanceGroupRole, naming};

/// A RAM role per role, with its policy document
pub struct IdentityBuilder<'a> {
    pub policies: &'a dyn PolicySource,
}

impl ModelBuilder for IdentityBuilder<'_> {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        if !ctx.supports(RamRole::KIND) {
            return Ok(());
        }
        let cluster = ctx.cluster_name();

        for role in ctx.roles() {
            let role_name = naming::identity_role(role, cluster);
            graph.add_task(RamRole {
                name: role_name.clone(),
                assume_role_policy: ECS_ASSUME_ROLE_POLICY.to_string(),
                id: None,
                lifecycle: ctx.lifecycle,
            })?;

            if !ctx.supports(RamPolicy::KIND) {
                continue;
            }
            let document = match self.policies.policy_document(ctx.cluster, role)? {
                Some(document) => document,
                None if role == InstanceGroupRole::Bastion => continue,
                None => return Err(AliError::MissingPolicy(role_name)),
            };
            graph.add_task(RamPolicy {
                name: naming::identity_policy(role, cluster),
                role: Link::to::<RamRole>(&role_name),
                document,
                id: None,
                lifecycle: ctx.lifecycle,
            })?;
        }
        Ok(())
    }
}

/// The cluster key pair, when a public key is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct SshKeyBuilder;

impl ModelBuilder for SshKeyBuilder {
    fn build(&self, ctx: &ModelContext<'_>, graph: &mut TaskGraph<AliCloud>) -> Result<()> {
        if !ctx.has_ssh_key() {
            return Ok(());
        }
        graph.add_task(SshKey {
            name: naming::ssh_key(ctx.cluster_name()),
            public_key: ctx.cluster.spec.ssh_public_key.clone(),
            id: None,
            lifecycle: ctx.lifecycle,
        })?;
        Ok(())
    }
}
