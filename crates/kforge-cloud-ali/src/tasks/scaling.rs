use super::{apply, check_owner, find_by_id};
use crate::cloud::AliCloud;
use crate::records::{GroupState, ScalingConfigurationRecord, ScalingGroupRecord};
use crate::tasks::{LoadBalancer, RamRole, SecurityGroup, SshKey, VSwitch};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kforge_cloud::{
    Changes, CloudError, CloudTask, Context, Lifecycle, Link, ListFilter, Result, Tags,
    find_unique, poll_until,
};
use serde::Serialize;
use tracing::{debug, info};

/// Scaling configurations kept per group, newest first
pub const RETAINED_CONFIGURATIONS: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingGroup {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub vswitches: Vec<Link>,
    pub load_balancers: Vec<Link>,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub active_configuration_id: Option<String>,
    #[serde(skip)]
    pub state: GroupState,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for ScalingGroup {
    type Cloud = AliCloud;
    const KIND: &'static str = "ScalingGroup";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        self.vswitches.iter().chain(&self.load_balancers).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        self.vswitches
            .iter_mut()
            .chain(self.load_balancers.iter_mut())
            .collect()
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
        self.active_configuration_id = actual.active_configuration_id.clone();
        self.state = actual.state;
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let Some(record) = find_unique(
            cloud.apis().scaling_groups.as_ref(),
            cloud.scope(),
            &ListFilter::by_name(&self.name),
        )
        .await?
        else {
            return Ok(None);
        };
        check_owner(ctx, &record)?;
        Ok(Some(ScalingGroup {
            name: self.name.clone(),
            min_size: record.min_size,
            max_size: record.max_size,
            vswitches: record
                .vswitch_ids
                .into_iter()
                .map(Link::observed::<VSwitch>)
                .collect(),
            load_balancers: record
                .load_balancer_ids
                .into_iter()
                .map(Link::observed::<LoadBalancer>)
                .collect(),
            tags: record.tags,
            id: record.id,
            active_configuration_id: record.active_configuration_id,
            state: record.state,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(_actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if expected.min_size > expected.max_size {
            return Err(CloudError::InvalidConfig(format!(
                "{}: minSize {} exceeds maxSize {}",
                expected.key(),
                expected.min_size,
                expected.max_size
            )));
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
        let key = self.key();
        let vswitch_ids = self
            .vswitches
            .iter()
            .map(|l| l.require_id(&key).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        let load_balancer_ids = self
            .load_balancers
            .iter()
            .map(|l| l.require_id(&key).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;

        let record = ScalingGroupRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            min_size: self.min_size,
            max_size: self.max_size,
            vswitch_ids,
            load_balancer_ids,
            active_configuration_id: self.active_configuration_id.clone(),
            state: self.state,
            tags: self.tags.clone(),
        };
        let stored = apply(
            cloud.apis().scaling_groups.as_ref(),
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

/// Launch template of a scaling group.
///
/// Configurations are immutable on the cloud side: every change creates a
/// new one named `<name>-<yyyymmddThhmmss>`, activates it on the group and
/// prunes all but the newest few.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfiguration {
    /// Prefix of the generated configuration names
    pub name: String,
    pub scaling_group: Link,
    pub image_id: String,
    pub instance_type: String,
    pub system_disk_size: Option<u32>,
    pub system_disk_category: Option<String>,
    pub ssh_key: Option<Link>,
    pub ram_role: Option<Link>,
    pub security_group: Option<Link>,
    /// Base64
    pub user_data: Option<String>,
    pub tags: Tags,

    #[serde(skip)]
    pub id: Option<String>,
    /// Generated name of the configuration in use
    #[serde(skip)]
    pub configuration_name: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl LaunchConfiguration {
    fn version_prefix(&self) -> String {
        format!("{}-", self.name)
    }

    /// Configurations of this task's group, newest first
    async fn versions(
        &self,
        ctx: &Context<AliCloud>,
        group_id: &str,
    ) -> Result<Vec<ScalingConfigurationRecord>> {
        let cloud = ctx.cloud();
        let prefix = self.version_prefix();
        let mut versions: Vec<_> = cloud
            .apis()
            .scaling_configurations
            .list(cloud.scope(), &ListFilter::by_parent(group_id))
            .await?
            .into_iter()
            .filter(|c| c.name.starts_with(&prefix))
            .collect();
        versions.sort_by(|a, b| {
            b.creation_time
                .cmp(&a.creation_time)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(versions)
    }

    /// Configurations beyond the newest [`RETAINED_CONFIGURATIONS`]
    pub async fn find_deletions(
        &self,
        ctx: &Context<AliCloud>,
    ) -> Result<Vec<ScalingConfigurationRecord>> {
        let Some(group_id) = self.scaling_group.id() else {
            return Ok(Vec::new());
        };
        let mut versions = self.versions(ctx, group_id).await?;
        let keep = versions.len().min(RETAINED_CONFIGURATIONS);
        Ok(versions.split_off(keep))
    }

    async fn prune(&self, ctx: &Context<AliCloud>) -> Result<()> {
        let cloud = ctx.cloud();
        for old in self.find_deletions(ctx).await? {
            let Some(id) = old.id.as_deref() else {
                continue;
            };
            if Some(id) == self.id.as_deref() {
                continue;
            }
            debug!(configuration = %old.name, "Deleting old scaling configuration");
            cloud
                .apis()
                .scaling_configurations
                .delete(cloud.scope(), id)
                .await?;
        }
        Ok(())
    }

    /// Points the group at `configuration_id` and waits for it to be Active
    async fn activate(
        &self,
        ctx: &Context<AliCloud>,
        group_id: &str,
        configuration_id: &str,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let api = cloud.apis().scaling_groups.as_ref();
        let mut group = find_by_id(api, cloud.scope(), group_id)
            .await?
            .ok_or_else(|| CloudError::NotFound {
                kind: ScalingGroup::KIND.to_string(),
                name: group_id.to_string(),
            })?;

        if group.state == GroupState::Active {
            group.state = GroupState::Inactive;
            group = api.create_or_update(cloud.scope(), group).await?;
        }
        group.active_configuration_id = Some(configuration_id.to_string());
        group.state = GroupState::Active;
        api.create_or_update(cloud.scope(), group).await?;

        let what = format!("scaling group {group_id} to become Active");
        let scope = cloud.scope();
        poll_until(&what, cloud.poll(), &ctx.cancel, || async move {
            Ok(find_by_id(api, scope, group_id)
                .await?
                .filter(|g| g.state == GroupState::Active))
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CloudTask for LaunchConfiguration {
    type Cloud = AliCloud;
    const KIND: &'static str = "LaunchConfiguration";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn links(&self) -> Vec<&Link> {
        let mut links = vec![&self.scaling_group];
        links.extend(self.ssh_key.iter());
        links.extend(self.ram_role.iter());
        links.extend(self.security_group.iter());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        let mut links = vec![&mut self.scaling_group];
        links.extend(self.ssh_key.iter_mut());
        links.extend(self.ram_role.iter_mut());
        links.extend(self.security_group.iter_mut());
        links
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn adopt(&mut self, actual: &Self) {
        self.id = actual.id.clone();
        self.configuration_name = actual.configuration_name.clone();
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let Some(group_id) = self.scaling_group.id() else {
            return Ok(None);
        };
        let Some(newest) = self.versions(ctx, group_id).await?.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(LaunchConfiguration {
            name: self.name.clone(),
            scaling_group: Link::observed::<ScalingGroup>(newest.scaling_group_id),
            image_id: newest.image_id,
            instance_type: newest.instance_type,
            system_disk_size: newest.system_disk_size,
            system_disk_category: newest.system_disk_category,
            ssh_key: newest.key_pair_id.map(Link::observed::<SshKey>),
            ram_role: newest.ram_role_id.map(Link::observed::<RamRole>),
            security_group: newest.security_group_id.map(Link::observed::<SecurityGroup>),
            user_data: newest.user_data,
            tags: newest.tags,
            id: newest.id,
            configuration_name: Some(newest.name),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(_actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        let key = expected.key();
        if expected.name.is_empty() {
            return Err(CloudError::required(&key, "name"));
        }
        if expected.image_id.is_empty() {
            return Err(CloudError::required(&key, "imageId"));
        }
        if expected.instance_type.is_empty() {
            return Err(CloudError::required(&key, "instanceType"));
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
        let group_id = self.scaling_group.require_id(&key)?.to_string();
        let optional_id = |link: &Option<Link>| -> Result<Option<String>> {
            link.as_ref()
                .map(|l| l.require_id(&key).map(str::to_string))
                .transpose()
        };

        let now = Utc::now();
        let record = ScalingConfigurationRecord {
            id: None,
            name: format!("{}{}", self.version_prefix(), now.format("%Y%m%dT%H%M%S")),
            scaling_group_id: group_id.clone(),
            image_id: self.image_id.clone(),
            instance_type: self.instance_type.clone(),
            system_disk_size: self.system_disk_size,
            system_disk_category: self.system_disk_category.clone(),
            key_pair_id: optional_id(&self.ssh_key)?,
            ram_role_id: optional_id(&self.ram_role)?,
            security_group_id: optional_id(&self.security_group)?,
            user_data: self.user_data.clone(),
            tags: self.tags.clone(),
            creation_time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let created = cloud
            .apis()
            .scaling_configurations
            .create_or_update(cloud.scope(), record)
            .await?;
        let configuration_id = created
            .id
            .clone()
            .ok_or_else(|| CloudError::required(&key, "id of the new configuration"))?;
        info!(configuration = %created.name, group = %group_id, "Created scaling configuration");

        self.activate(ctx, &group_id, &configuration_id).await?;
        self.id = Some(configuration_id);
        self.configuration_name = Some(created.name);
        self.prune(ctx).await
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

    const CLUSTER: &str = "demo.example.com";

    fn context() -> (Context<AliCloud>, AliMemory) {
        let (cloud, memory) = AliCloud::in_memory("cn-hangzhou", &EngineConfig::default());
        (Context::new(Arc::new(cloud), CLUSTER), memory)
    }

    fn seed_group(memory: &AliMemory) -> String {
        let group = memory.scaling_groups.insert(
            &Scope::region("cn-hangzhou"),
            ScalingGroupRecord {
                id: None,
                name: format!("nodes.{CLUSTER}"),
                min_size: 1,
                max_size: 3,
                vswitch_ids: vec![],
                load_balancer_ids: vec![],
                active_configuration_id: None,
                state: GroupState::Inactive,
                tags: TAGS.cluster_tags(CLUSTER),
            },
        );
        group.id.unwrap()
    }

    fn seed_version(memory: &AliMemory, group_id: &str, stamp: &str) {
        memory.scaling_configurations.insert(
            &Scope::region("cn-hangzhou"),
            ScalingConfigurationRecord {
                id: None,
                name: format!("nodes.{CLUSTER}-{stamp}"),
                scaling_group_id: group_id.to_string(),
                image_id: "old-image".into(),
                instance_type: "ecs.n2.medium".into(),
                system_disk_size: None,
                system_disk_category: None,
                key_pair_id: None,
                ram_role_id: None,
                security_group_id: None,
                user_data: None,
                tags: Tags::new(),
                creation_time: format!("2020-01-0{}T00:00:00Z", &stamp[7..8]),
            },
        );
    }

    fn task(group_id: &str, image: &str) -> LaunchConfiguration {
        LaunchConfiguration {
            name: format!("nodes.{CLUSTER}"),
            scaling_group: Link::existing::<ScalingGroup>(format!("nodes.{CLUSTER}"), group_id),
            image_id: image.into(),
            instance_type: "ecs.n2.medium".into(),
            system_disk_size: None,
            system_disk_category: None,
            ssh_key: None,
            ram_role: None,
            security_group: None,
            user_data: None,
            tags: Tags::new(),
            id: None,
            configuration_name: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn test_find_is_none_without_group_id() {
        let (ctx, _memory) = context();
        let mut unresolved = task("asg-1", "img");
        unresolved.scaling_group = Link::to::<ScalingGroup>("nodes");
        assert!(unresolved.find(&ctx).await.unwrap().is_none());
    }

    #[test]
    fn test_image_is_required() {
        let expected = task("asg-1", "");
        let err =
            LaunchConfiguration::check_changes(None, &expected, &Changes::default()).unwrap_err();
        assert!(matches!(err, CloudError::RequiredField { ref field, .. } if field == "imageId"));
    }

    #[tokio::test]
    async fn test_render_activates_group_and_prunes() {
        let (ctx, memory) = context();
        let group_id = seed_group(&memory);
        for stamp in ["20200101T000000", "20200102T000000", "20200103T000000", "20200104T000000"] {
            seed_version(&memory, &group_id, stamp);
        }

        let mut desired = task(&group_id, "new-image");
        let outcome = desired.run(&ctx).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Updated { ref fields } if fields.contains(&"imageId".to_string())));

        let group = memory.scaling_groups.get(&group_id).unwrap();
        assert_eq!(group.state, GroupState::Active);
        assert_eq!(group.active_configuration_id, desired.id);

        let remaining = memory.scaling_configurations.records();
        assert_eq!(remaining.len(), RETAINED_CONFIGURATIONS);
        assert!(remaining.iter().any(|c| c.image_id == "new-image"));
        assert!(!remaining.iter().any(|c| c.name.ends_with("20200101T000000")));
        assert!(!remaining.iter().any(|c| c.name.ends_with("20200102T000000")));
    }

    #[tokio::test]
    async fn test_unchanged_configuration_is_up_to_date() {
        let (ctx, memory) = context();
        let group_id = seed_group(&memory);
        task(&group_id, "img").run(&ctx).await.unwrap();
        memory.log.clear();

        let outcome = task(&group_id, "img").run(&ctx).await.unwrap();
        assert_eq!(outcome, TaskOutcome::UpToDate);
        assert!(memory.log.mutations().is_empty());
    }
}
