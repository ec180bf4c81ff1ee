use crate::cloud::AliCloud;
use crate::records::KeyPairRecord;
use async_trait::async_trait;
use kforge_cloud::{Changes, CloudTask, Context, Lifecycle, ListFilter, Result, find_unique};
use serde::Serialize;
use tracing::info;

/// Imported key pair; without a public key an existing pair is only looked up
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    pub name: String,
    pub public_key: Option<String>,

    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl CloudTask for SshKey {
    type Cloud = AliCloud;
    const KIND: &'static str = "SshKey";

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
        if self.public_key.is_none() {
            self.public_key = actual.public_key.clone();
        }
    }

    async fn find(&self, ctx: &Context<AliCloud>) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let record = find_unique(
            cloud.apis().key_pairs.as_ref(),
            cloud.scope(),
            &ListFilter::by_name(&self.name),
        )
        .await?;
        Ok(record.map(|r| SshKey {
            name: self.name.clone(),
            // Reads back as given so a lookup-only task never diffs
            public_key: self.public_key.as_ref().map(|_| r.public_key),
            id: r.id,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.reject_immutable(expected.key(), &["publicKey"]),
            None if expected.public_key.is_none() => Err(kforge_cloud::CloudError::required(
                expected.key(),
                "publicKey",
            )),
            None => Ok(()),
        }
    }

    async fn render(
        &mut self,
        ctx: &Context<AliCloud>,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let record = KeyPairRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            public_key: self.public_key.clone().unwrap_or_default(),
        };
        let stored = cloud
            .apis()
            .key_pairs
            .create_or_update(cloud.scope(), record)
            .await?;
        info!(key_pair = %self.name, "Imported SSH key pair");
        self.id = stored.id;
        Ok(())
    }
}
