use super::{check_owner, find_by_id, scope_of};
use crate::cloud::AzureCloud;
use crate::records::{LoadBalancerRecord, PublicIpRecord};
use crate::tasks::Subnet;
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudError, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddress {
    pub name: String,
    pub resource_group: Link,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    /// Assigned by the cloud
    #[serde(skip)]
    pub address: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for PublicIpAddress {
    type Cloud = AzureCloud;
    const KIND: &'static str = "PublicIPAddress";

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
        self.address = actual.address.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(record) = find_unique(
            ctx.cloud().apis().public_ips.as_ref(),
            &scope_of(ctx, &self.resource_group),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(PublicIpAddress {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            tags: record.tags,
            id: record.id,
            address: record.address,
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
        let record = PublicIpRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            tags: self.tags.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .public_ips
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        self.address = stored.address;
        Ok(())
    }
}

/// API load balancer: external on a public IP, or internal on a subnet
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub name: String,
    pub resource_group: Link,
    pub external: bool,
    pub public_ip: Option<Link>,
    pub subnet: Option<Link>,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub frontend_ip: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl LoadBalancer {
    /// Front-end address once the balancer exists
    pub async fn frontend_address(&self, ctx: &Context<AzureCloud>) -> Result<Option<String>> {
        let Some(id) = self.id.as_deref() else {
            return Ok(None);
        };
        let record = find_by_id(
            ctx.cloud().apis().load_balancers.as_ref(),
            &scope_of(ctx, &self.resource_group),
            id,
        )
        .await?;
        Ok(record.and_then(|r| r.frontend_ip))
    }
}

#[async_trait]
impl CloudTask for LoadBalancer {
    type Cloud = AzureCloud;
    const KIND: &'static str = "LoadBalancer";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        let mut links = vec![&self.resource_group];
        links.extend(self.public_ip.iter());
        links.extend(self.subnet.iter());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        let mut links = vec![&mut self.resource_group];
        links.extend(self.public_ip.iter_mut());
        links.extend(self.subnet.iter_mut());
        links
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
        self.frontend_ip = actual.frontend_ip.clone();
    }

    async fn find(&self, ctx: &Context<AzureCloud>) -> Result<Option<Self>> {
        let Some(record) = find_unique(
            ctx.cloud().apis().load_balancers.as_ref(),
            &scope_of(ctx, &self.resource_group),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(LoadBalancer {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            external: record.external,
            public_ip: record.public_ip_id.map(Link::observed::<PublicIpAddress>),
            subnet: record.subnet_id.map(Link::observed::<Subnet>),
            tags: record.tags,
            id: record.id,
            frontend_ip: record.frontend_ip,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        let key = expected.key();
        if expected.external && expected.public_ip.is_none() {
            return Err(CloudError::required(&key, "publicIp"));
        }
        if !expected.external && expected.subnet.is_none() {
            return Err(CloudError::required(&key, "subnet"));
        }
        if actual.is_some() {
            changes.reject_immutable(key, &["external"])?;
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
        let record = LoadBalancerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            external: self.external,
            public_ip_id: optional_id(&self.public_ip)?,
            subnet_id: optional_id(&self.subnet)?,
            frontend_ip: self.frontend_ip.clone(),
            tags: self.tags.clone(),
        };
        let stored = ctx
            .cloud()
            .apis()
            .load_balancers
            .create_or_update(&scope_of(ctx, &self.resource_group), record)
            .await?;
        self.id = stored.id;
        self.frontend_ip = stored.frontend_ip;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::TAGS;
    use crate::memory::AzureMemory;
    use crate::tasks::ResourceGroup;
    use kforge_cloud::{Task, TaskOutcome};
    use kforge_config::EngineConfig;
    use std::sync::Arc;

    const CLUSTER: &str = "demo.example.com";

    fn context() -> (Context<AzureCloud>, AzureMemory) {
        let (cloud, memory) = AzureCloud::in_memory("westeurope", &EngineConfig::default());
        (Context::new(Arc::new(cloud), CLUSTER), memory)
    }

    fn rg() -> Link {
        Link::existing::<ResourceGroup>(CLUSTER, "rg-1")
    }

    fn public_lb(ip: Link) -> LoadBalancer {
        LoadBalancer {
            name: "api-demo-example-com".into(),
            resource_group: rg(),
            external: true,
            public_ip: Some(ip),
            subnet: None,
            tags: TAGS.cluster_tags(CLUSTER),
            id: None,
            frontend_ip: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_public_lb_gets_frontend_address() {
        let (ctx, memory) = context();
        let mut ip = PublicIpAddress {
            name: "api-demo-example-com".into(),
            resource_group: rg(),
            tags: TAGS.cluster_tags(CLUSTER),
            id: None,
            address: None,
            lifecycle: Lifecycle::Sync,
        };
        assert_eq!(ip.run(&ctx).await.unwrap(), TaskOutcome::Created);
        assert!(ip.address.as_deref().unwrap().starts_with("20.50."));

        let ip_link = Link::existing::<PublicIpAddress>(&ip.name, ip.id.clone().unwrap());
        let mut lb = public_lb(ip_link.clone());
        assert_eq!(lb.run(&ctx).await.unwrap(), TaskOutcome::Created);
        assert!(lb.frontend_ip.as_deref().unwrap().starts_with("20.51."));
        assert_eq!(
            lb.frontend_address(&ctx).await.unwrap(),
            lb.frontend_ip.clone()
        );

        memory.log.clear();
        assert_eq!(public_lb(ip_link).run(&ctx).await.unwrap(), TaskOutcome::UpToDate);
        assert!(memory.log.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_internal_lb_needs_subnet() {
        let (ctx, memory) = context();
        let mut lb = public_lb(Link::to::<PublicIpAddress>("unused"));
        lb.external = false;
        lb.public_ip = None;
        let err = lb.run(&ctx).await.unwrap_err();
        assert!(matches!(err, CloudError::RequiredField { ref field, .. } if field == "subnet"));
        assert!(memory.load_balancers.is_empty());
    }
}
