use super::{apply, check_owner};
use crate::cloud::AliCloud;
use crate::records::{IpProtocol, SecurityGroupRecord, SecurityGroupRuleRecord};
use crate::tasks::Vpc;
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;

/// Per-role security group
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    pub name: String,
    pub vpc: Link,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for SecurityGroup {
    type Cloud = AliCloud;
    const KIND: &'static str = "SecurityGroup";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.vpc]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.vpc]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let Some(vpc_id) = self.vpc.id() else {
            return Ok(None);
        };
        let cloud = ctx.cloud();
        let filter = ListFilter::by_name(&self.name).with_parent(vpc_id);
        let Some(record) =
            find_unique(cloud.apis().security_groups.as_ref(), cloud.scope(), &filter).await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(SecurityGroup {
            name: self.name.clone(),
            vpc: Link::observed::<Vpc>(record.vpc_id),
            tags: record.tags,
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["vpc"])?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AliCloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let record = SecurityGroupRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            vpc_id: self.vpc.require_id(&self.key())?.to_string(),
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().security_groups.as_ref(),
            cloud.scope(),
            record,
            actual.map(|a| &a.tags),
            changes,
        )
        .await?;
        self.id = stored.id;
        Ok(())
    }
}

/// Ingress permission; either a CIDR or another group is the source.
///
/// Permissions cannot be edited in place, so every field is immutable and
/// a changed permission gets a new name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRule {
    pub name: String,
    pub security_group: Link,
    pub protocol: IpProtocol,
    pub port_range: String,
    pub source_cidr: Option<String>,
    pub source_group: Option<Link>,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

/// `-1/-1`
pub const ALL_PORTS: &str = "-1/-1";

impl SecurityGroupRule {
    pub fn port(port: u16) -> String {
        format!("{port}/{port}")
    }
}

#[async_trait]
impl CloudTask for SecurityGroupRule {
    type Cloud = AliCloud;
    const KIND: &'static str = "SecurityGroupRule";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        let mut links = vec![&self.security_group];
        links.extend(self.source_group.iter());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        let mut links = vec![&mut self.security_group];
        links.extend(self.source_group.iter_mut());
        links
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let Some(group_id) = self.security_group.id() else {
            return Ok(None);
        };
        let cloud = ctx.cloud();
        let filter = ListFilter::by_name(&self.name).with_parent(group_id);
        let Some(record) =
            find_unique(cloud.apis().security_group_rules.as_ref(), cloud.scope(), &filter)
                .await?
        else {
            return Ok(None);
        };
        Ok(Some(SecurityGroupRule {
            name: self.name.clone(),
            security_group: Link::observed::<SecurityGroup>(record.security_group_id),
            protocol: record.protocol,
            port_range: record.port_range,
            source_cidr: record.source_cidr,
            source_group: record.source_group_id.map(Link::observed::<SecurityGroup>),
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(
                expected.key(),
                &[
                    "securityGroup",
                    "protocol",
                    "portRange",
                    "sourceCidr",
                    "sourceGroup",
                ],
            )?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AliCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let key = self.key();
        let source_group_id = match &self.source_group {
            Some(link) => Some(link.require_id(&key)?.to_string()),
            None => None,
        };
        let record = SecurityGroupRuleRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            security_group_id: self.security_group.require_id(&key)?.to_string(),
            protocol: self.protocol,
            port_range: self.port_range.clone(),
            source_cidr: self.source_cidr.clone(),
            source_group_id,
        };
        let stored = cloud
            .apis()
            .security_group_rules
            .create_or_update(cloud.scope(), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}
