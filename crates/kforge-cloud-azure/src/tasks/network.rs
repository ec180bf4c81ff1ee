use super::{check_owner, scope_of};
use crate::cloud::AzureCloud;
use crate::records::{
    NetworkSecurityGroupRecord, RouteTableRecord, SecurityRule, SubnetRecord, VirtualNetworkRecord,
};
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudError, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetwork {
    pub name: String,
    pub resource_group: Link,
    pub cidr: Option<String>,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for VirtualNetwork {
    type Cloud = AzureCloud;
    const KIND: &'static str = "VirtualNetwork";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.resource_group]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.resource_group]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let scope = scope_of(ctx, &self.resource_group);
        let Some(record) = find_unique(
            ctx.cloud().apis().virtual_networks.as_ref(),
            &scope,
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        if !self.shared {
            check_owner(ctx, &record)?;
        }
        Ok(Some(VirtualNetwork {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            cidr: Some(record.cidr),
            tags: record.tags,
            id: record.id,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.reject_immutable(expected.key(), &["cidr"]),
            None if expected.cidr.is_none() => Err(CloudError::required(expected.key(), "cidr")),
            None => Ok(()),
        }
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let cidr = self
            .cidr
            .clone()
            .or_else(|| actual.and_then(|a| a.cidr.clone()))
            .ok_or_else(|| CloudError::required(self.key(), "cidr"))?;
        let record = VirtualNetworkRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            cidr,
            tags: self.tags.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .virtual_networks
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub name: String,
    pub resource_group: Link,
    pub virtual_network: Link,
    pub cidr: String,
    pub network_security_group: Option<Link>,
    pub route_table: Option<Link>,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for Subnet {
    type Cloud = AzureCloud;
    const KIND: &'static str = "Subnet";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn links(&self) -> Vec<&Link> {
        let mut links = vec![&self.resource_group, &self.virtual_network];
        links.extend(self.network_security_group.iter());
        links.extend(self.route_table.iter());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        let mut links = vec![&mut self.resource_group, &mut self.virtual_network];
        links.extend(self.network_security_group.iter_mut());
        links.extend(self.route_table.iter_mut());
        links
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(vnet_id) = self.virtual_network.id() else {
            return Ok(None);
        };
        let filter = ListFilter::by_name(&self.name).with_parent(vnet_id);
        let Some(record) = find_unique(
            ctx.cloud().apis().subnets.as_ref(),
            &scope_of(ctx, &self.resource_group),
            &filter,
        )
        .await?
        else {
            return Ok(None);
        };
        Ok(Some(Subnet {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            virtual_network: Link::observed::<VirtualNetwork>(record.virtual_network_id),
            cidr: record.cidr,
            network_security_group: record
                .network_security_group_id
                .map(Link::observed::<NetworkSecurityGroup>),
            route_table: record.route_table_id.map(Link::observed::<RouteTable>),
            id: record.id,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["virtualNetwork", "cidr"])?;
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let key = self.key();
        let optional_id = |link: &Option<Link>| -> Result<Option<String>> {
            link.as_ref()
                .map(|l| l.require_id(&key).map(str::to_string))
                .transpose()
        };
        let record = SubnetRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            virtual_network_id: self.virtual_network.require_id(&key)?.to_string(),
            cidr: self.cidr.clone(),
            network_security_group_id: optional_id(&self.network_security_group)?,
            route_table_id: optional_id(&self.route_table)?,
        };
        let stored = ctx
            .cloud()
            .apis()
            .subnets
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTable {
    pub name: String,
    pub resource_group: Link,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for RouteTable {
    type Cloud = AzureCloud;
    const KIND: &'static str = "RouteTable";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.resource_group]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.resource_group]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(record) = find_unique(
            ctx.cloud().apis().route_tables.as_ref(),
            &scope_of(ctx, &self.resource_group),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        if !self.shared {
            check_owner(ctx, &record)?;
        }
        Ok(Some(RouteTable {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            tags: record.tags,
            id: record.id,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(_actual: Option<&Self>, _expected: &Self, _changes: &Changes) -> Result<()> {
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let record = RouteTableRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .route_tables
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}

/// Inbound rules of the cluster subnets; the whole rule set is written at
/// once
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroup {
    pub name: String,
    pub resource_group: Link,
    pub rules: Vec<SecurityRule>,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for NetworkSecurityGroup {
    type Cloud = AzureCloud;
    const KIND: &'static str = "NetworkSecurityGroup";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.resource_group]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.resource_group]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(record) = find_unique(
            ctx.cloud().apis().network_security_groups.as_ref(),
            &scope_of(ctx, &self.resource_group),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(NetworkSecurityGroup {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            rules: record.rules,
            tags: record.tags,
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(_actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        let mut priorities = HashSet::new();
        for rule in &expected.rules {
            if !priorities.insert(rule.priority) {
                return Err(CloudError::InvalidConfig(format!(
                    "{}: priority {} used by more than one rule",
                    expected.key(),
                    rule.priority
                )));
            }
        }
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AzureCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let record = NetworkSecurityGroupRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            rules: self.rules.clone(),
            tags: self.tags.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .network_security_groups
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}
