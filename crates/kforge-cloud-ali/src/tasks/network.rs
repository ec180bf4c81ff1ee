use super::{apply, check_owner, find_by_id};
use crate::cloud::AliCloud;
use crate::records::{EipRecord, NatGatewayRecord, SnatEntryRecord, VSwitchRecord, VpcRecord};
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudError, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;
use tracing::debug;

/// Mbps of a newly allocated EIP
pub const DEFAULT_EIP_BANDWIDTH: u32 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vpc {
    pub name: String,
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
impl CloudTask for Vpc {
    type Cloud = AliCloud;
    const KIND: &'static str = "Vpc";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let api = cloud.apis().vpcs.as_ref();
        let record = match &self.id {
            Some(id) => find_by_id(api, cloud.scope(), id).await?,
            None => find_unique(api, cloud.scope(), &ListFilter::by_name(&self.name)).await?,
        };
        let Some(record) = record else {
            return Ok(None);
        };
        if !self.shared {
            check_owner(ctx, &record)?;
        }
        Ok(Some(Vpc {
            name: self.name.clone(),
            cidr: Some(record.cidr_block),
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
        ctx: &Context<AliCloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let cidr = self
            .cidr
            .clone()
            .or_else(|| actual.and_then(|a| a.cidr.clone()))
            .ok_or_else(|| CloudError::required(self.key(), "cidr"))?;
        let record = VpcRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            cidr_block: cidr,
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().vpcs.as_ref(),
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

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VSwitch {
    pub name: String,
    pub vpc: Link,
    pub zone: String,
    pub cidr: String,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub shared: bool,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for VSwitch {
    type Cloud = AliCloud;
    const KIND: &'static str = "VSwitch";

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
        let cloud = ctx.cloud();
        let api = cloud.apis().vswitches.as_ref();
        let record = match (&self.id, self.vpc.id()) {
            (Some(id), _) => find_by_id(api, cloud.scope(), id).await?,
            (None, Some(vpc_id)) => {
                let filter = ListFilter::by_name(&self.name).with_parent(vpc_id);
                find_unique(api, cloud.scope(), &filter).await?
            }
            (None, None) => return Ok(None),
        };
        let Some(record) = record else {
            return Ok(None);
        };
        if !self.shared {
            check_owner(ctx, &record)?;
        }
        Ok(Some(VSwitch {
            name: self.name.clone(),
            vpc: Link::observed::<Vpc>(record.vpc_id),
            zone: record.zone_id,
            cidr: record.cidr_block,
            tags: record.tags,
            id: record.id,
            shared: self.shared,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["vpc", "zone", "cidr"])?;
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
        let record = VSwitchRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            vpc_id: self.vpc.require_id(&self.key())?.to_string(),
            zone_id: self.zone.clone(),
            cidr_block: self.cidr.clone(),
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().vswitches.as_ref(),
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

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NatGateway {
    pub name: String,
    pub vpc: Link,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for NatGateway {
    type Cloud = AliCloud;
    const KIND: &'static str = "NatGateway";

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
            find_unique(cloud.apis().nat_gateways.as_ref(), cloud.scope(), &filter).await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(NatGateway {
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
        let record = NatGatewayRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            vpc_id: self.vpc.require_id(&self.key())?.to_string(),
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().nat_gateways.as_ref(),
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

/// Elastic IP bound to the cluster NAT gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip {
    pub name: String,
    pub bandwidth: Option<u32>,
    pub nat_gateway: Option<Link>,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub ip_address: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for Eip {
    type Cloud = AliCloud;
    const KIND: &'static str = "Eip";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        self.nat_gateway.iter().collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.nat_gateway.iter_mut().collect()
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
        self.ip_address = actual.ip_address.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let Some(record) = find_unique(
            cloud.apis().eips.as_ref(),
            cloud.scope(),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(Eip {
            name: self.name.clone(),
            bandwidth: Some(record.bandwidth),
            nat_gateway: record.instance_id.map(Link::observed::<NatGateway>),
            tags: record.tags,
            id: record.id,
            ip_address: record.ip_address,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(_actual: Option<&Self>, _expected: &Self, _changes: &Changes) -> Result<()> {
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &Context<AliCloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let key = self.key();
        let instance_id = match &self.nat_gateway {
            Some(link) => Some(link.require_id(&key)?.to_string()),
            None => None,
        };
        let record = EipRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            ip_address: self.ip_address.clone(),
            bandwidth: self
                .bandwidth
                .or_else(|| actual.and_then(|a| a.bandwidth))
                .unwrap_or(DEFAULT_EIP_BANDWIDTH),
            instance_id,
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().eips.as_ref(),
            cloud.scope(),
            record,
            actual.map(|a| &a.tags),
            changes,
        )
        .await?;
        self.id = stored.id;
        self.ip_address = stored.ip_address;
        Ok(())
    }
}

/// Source NAT of one private vswitch through the cluster EIP
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnatEntry {
    pub name: String,
    pub nat_gateway: Link,
    pub vswitch: Link,
    pub eip: Link,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for SnatEntry {
    type Cloud = AliCloud;
    const KIND: &'static str = "SnatEntry";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.nat_gateway, &self.vswitch, &self.eip]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.nat_gateway, &mut self.vswitch, &mut self.eip]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let Some(nat_gateway_id) = self.nat_gateway.id() else {
            return Ok(None);
        };
        let cloud = ctx.cloud();
        let filter = ListFilter::by_name(&self.name).with_parent(nat_gateway_id);
        let Some(record) =
            find_unique(cloud.apis().snat_entries.as_ref(), cloud.scope(), &filter).await?
        else {
            return Ok(None);
        };

        // The entry knows the address only; map it back to the EIP
        let eips = cloud
            .apis()
            .eips
            .list(cloud.scope(), &ListFilter::all())
            .await?;
        let eip = match eips
            .into_iter()
            .find(|e| e.ip_address.as_deref() == Some(record.snat_ip.as_str()))
            .and_then(|e| e.id)
        {
            Some(id) => Link::observed::<Eip>(id),
            None => {
                debug!(entry = %self.name, ip = %record.snat_ip, "SNAT address has no known EIP");
                Link::observed::<Eip>(record.snat_ip.clone())
            }
        };

        Ok(Some(SnatEntry {
            name: self.name.clone(),
            nat_gateway: Link::observed::<NatGateway>(record.nat_gateway_id),
            vswitch: Link::observed::<VSwitch>(record.vswitch_id),
            eip,
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["natGateway", "vswitch"])?;
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
        let eip_id = self.eip.require_id(&key)?;
        let snat_ip = find_by_id(cloud.apis().eips.as_ref(), cloud.scope(), eip_id)
            .await?
            .and_then(|e| e.ip_address)
            .ok_or_else(|| CloudError::required(&key, format!("address of {}", self.eip.key())))?;

        let record = SnatEntryRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            nat_gateway_id: self.nat_gateway.require_id(&key)?.to_string(),
            vswitch_id: self.vswitch.require_id(&key)?.to_string(),
            snat_ip,
        };
        let stored = cloud
            .apis()
            .snat_entries
            .create_or_update(cloud.scope(), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::TAGS;
    use crate::memory::AliMemory;
    use kforge_cloud::{Scope, Task, TaskOutcome};
    use kforge_config::EngineConfig;
    use std::sync::Arc;

    fn context() -> (Context<AliCloud>, AliMemory) {
        let (cloud, memory) = AliCloud::in_memory("cn-hangzhou", &EngineConfig::default());
        (Context::new(Arc::new(cloud), "demo.example.com"), memory)
    }

    fn vpc(cidr: &str) -> Vpc {
        Vpc {
            name: "demo.example.com".into(),
            cidr: Some(cidr.into()),
            tags: TAGS.cluster_tags("demo.example.com"),
            id: None,
            shared: false,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_vpc_create_then_up_to_date() {
        let (ctx, memory) = context();
        let mut task = vpc("10.0.0.0/16");
        assert_eq!(task.run(&ctx).await.unwrap(), TaskOutcome::Created);
        assert_eq!(memory.vpcs.len(), 1);

        let mut again = vpc("10.0.0.0/16");
        assert_eq!(again.run(&ctx).await.unwrap(), TaskOutcome::UpToDate);
        assert_eq!(again.id, task.id);
    }

    #[tokio::test]
    async fn test_vpc_cidr_cannot_change() {
        let (ctx, memory) = context();
        vpc("10.0.0.0/16").run(&ctx).await.unwrap();
        memory.log.clear();

        let err = vpc("172.20.0.0/16").run(&ctx).await.unwrap_err();
        assert!(matches!(err, CloudError::CannotChangeField { ref field, .. } if field == "cidr"));
        assert!(memory.log.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_vpc_of_other_cluster_is_a_conflict() {
        let (ctx, memory) = context();
        memory.vpcs.insert(
            &Scope::region("cn-hangzhou"),
            VpcRecord {
                id: None,
                name: "demo.example.com".into(),
                cidr_block: "10.0.0.0/16".into(),
                tags: TAGS.cluster_tags("other.example.com"),
            },
        );
        let err = vpc("10.0.0.0/16").run(&ctx).await.unwrap_err();
        assert!(matches!(err, CloudError::OwnershipConflict { .. }));
    }

    #[tokio::test]
    async fn test_vpc_tag_drift_uses_tag_operations() {
        let (ctx, memory) = context();
        vpc("10.0.0.0/16").run(&ctx).await.unwrap();
        let id = memory.vpcs.records()[0].id.clone().unwrap();
        memory.vpcs.update(&id, |r| {
            r.tags.insert("stale".into(), "1".into());
        });
        memory.log.clear();

        let outcome = vpc("10.0.0.0/16").run(&ctx).await.unwrap();
        assert_eq!(
            outcome,
            TaskOutcome::Updated {
                fields: vec!["tags".into()]
            }
        );
        let ops: Vec<_> = memory.log.mutations().into_iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![kforge_cloud::Operation::RemoveTags]);
        assert!(!memory.vpcs.get(&id).unwrap().tags.contains_key("stale"));
    }
}
