use super::{apply, check_owner};
use crate::cloud::AliCloud;
use crate::records::{AddressType, IpProtocol, ListenerRecord, LoadBalancerRecord, WhiteListRecord};
use async_trait::async_trait;
use kforge_cloud::{
    Changes, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags, find_unique,
};
use serde::Serialize;

/// API load balancer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub name: String,
    pub address_type: AddressType,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub address: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for LoadBalancer {
    type Cloud = AliCloud;
    const KIND: &'static str = "LoadBalancer";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
        self.address = actual.address.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let Some(record) = find_unique(
            cloud.apis().load_balancers.as_ref(),
            cloud.scope(),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(LoadBalancer {
            name: self.name.clone(),
            address_type: record.address_type,
            tags: record.tags,
            id: record.id,
            address: record.address,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["addressType"])?;
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
        let record = LoadBalancerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            address_type: self.address_type,
            address: self.address.clone(),
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().load_balancers.as_ref(),
            cloud.scope(),
            record,
            actual.map(|a| &a.tags),
            changes,
        )
        .await?;
        self.id = stored.id;
        self.address = stored.address;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    pub load_balancer: Link,
    pub frontend_port: u16,
    pub backend_port: u16,
    pub protocol: IpProtocol,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for Listener {
    type Cloud = AliCloud;
    const KIND: &'static str = "Listener";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.load_balancer]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.load_balancer]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let Some(lb_id) = self.load_balancer.id() else {
            return Ok(None);
        };
        let cloud = ctx.cloud();
        let filter = ListFilter::by_name(&self.name).with_parent(lb_id);
        let Some(record) =
            find_unique(cloud.apis().listeners.as_ref(), cloud.scope(), &filter).await?
        else {
            return Ok(None);
        };
        Ok(Some(Listener {
            name: self.name.clone(),
            load_balancer: Link::observed::<LoadBalancer>(record.load_balancer_id),
            frontend_port: record.frontend_port,
            backend_port: record.backend_port,
            protocol: record.protocol,
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(
                expected.key(),
                &["loadBalancer", "frontendPort", "protocol"],
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
        let record = ListenerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            load_balancer_id: self.load_balancer.require_id(&self.key())?.to_string(),
            frontend_port: self.frontend_port,
            backend_port: self.backend_port,
            protocol: self.protocol,
        };
        let stored = cloud
            .apis()
            .listeners
            .create_or_update(cloud.scope(), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}

/// Access-control list of the API listener
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteList {
    pub name: String,
    pub load_balancer: Link,
    pub listener_port: u16,
    pub source_items: Vec<String>,

    /// Ordering only; the list is keyed by port
    #[serde(skip)]
    pub listener: Link,
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for WhiteList {
    type Cloud = AliCloud;
    const KIND: &'static str = "WhiteList";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        vec![&self.load_balancer, &self.listener]
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        vec![&mut self.load_balancer, &mut self.listener]
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let Some(lb_id) = self.load_balancer.id() else {
            return Ok(None);
        };
        let cloud = ctx.cloud();
        let filter = ListFilter::by_name(&self.name).with_parent(lb_id);
        let Some(record) =
            find_unique(cloud.apis().white_lists.as_ref(), cloud.scope(), &filter).await?
        else {
            return Ok(None);
        };
        Ok(Some(WhiteList {
            name: self.name.clone(),
            load_balancer: Link::observed::<LoadBalancer>(record.load_balancer_id),
            listener_port: record.listener_port,
            source_items: record.source_items,
            listener: self.listener.clone(),
            id: record.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        if actual.is_some() {
            changes.reject_immutable(expected.key(), &["loadBalancer", "listenerPort"])?;
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
        let record = WhiteListRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            load_balancer_id: self.load_balancer.require_id(&self.key())?.to_string(),
            listener_port: self.listener_port,
            source_items: self.source_items.clone(),
        };
        let stored = cloud
            .apis()
            .white_lists
            .create_or_update(cloud.scope(), record)
            .await?;
        self.id = stored.id;
        Ok(())
    }
}
