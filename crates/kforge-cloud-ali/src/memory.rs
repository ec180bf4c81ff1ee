//! In-memory ali backend
//!
//! Built on [`MemoryStore`], with the cloud-side rules tests rely on: EIP
//! and load-balancer addresses are assigned on creation, and a resource
//! with dependents cannot be deleted.

use crate::cloud::{AliApis, AliCloud};
use crate::records::*;
use async_trait::async_trait;
use kforge_cloud::{
    CallLog, CloudResource, ListFilter, MemoryStore, ResourceApi, Result, Scope, Tags,
};
use kforge_config::EngineConfig;
use std::sync::{Arc, Weak};

/// Fills cloud-assigned fields of a freshly stored record
struct Assigning<R: CloudResource> {
    store: Arc<MemoryStore<R>>,
    assign: fn(&mut R, &str),
}

#[async_trait]
impl<R: CloudResource> ResourceApi<R> for Assigning<R> {
    async fn list(&self, scope: &Scope, filter: &ListFilter) -> Result<Vec<R>> {
        self.store.list(scope, filter).await
    }

    async fn create_or_update(&self, scope: &Scope, desired: R) -> Result<R> {
        let mut record = self.store.create_or_update(scope, desired).await?;
        if let Some(id) = record.id().map(str::to_string) {
            (self.assign)(&mut record, &id);
            let assign = self.assign;
            self.store.update(&id, |stored| assign(stored, &id));
        }
        Ok(record)
    }

    async fn delete(&self, scope: &Scope, id: &str) -> Result<()> {
        self.store.delete(scope, id).await
    }

    fn supports_tags(&self) -> bool {
        self.store.supports_tags()
    }

    async fn get_tags(&self, scope: &Scope, id: &str) -> Result<Tags> {
        self.store.get_tags(scope, id).await
    }

    async fn add_tags(&self, scope: &Scope, id: &str, tags: &Tags) -> Result<()> {
        self.store.add_tags(scope, id, tags).await
    }

    async fn remove_tags(&self, scope: &Scope, id: &str, keys: &[String]) -> Result<()> {
        self.store.remove_tags(scope, id, keys).await
    }
}

/// `eip-7` → 7
fn serial(id: &str) -> u32 {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn assign_eip_address(eip: &mut EipRecord, id: &str) {
    if eip.ip_address.is_none() {
        let n = serial(id);
        eip.ip_address = Some(format!("47.96.{}.{}", n / 256, n % 256));
    }
}

fn assign_lb_address(lb: &mut LoadBalancerRecord, id: &str) {
    if lb.address.is_none() {
        let n = serial(id);
        lb.address = Some(match lb.address_type {
            AddressType::Internet => format!("47.97.{}.{}", n / 256, n % 256),
            AddressType::Intranet => format!("172.16.{}.{}", n / 256, n % 256),
        });
    }
}

fn count_reason(count: usize, what: &str) -> Option<String> {
    (count > 0).then(|| format!("{count} {what}"))
}

/// Typed stores of one in-memory ali account
#[derive(Clone)]
pub struct AliMemory {
    pub log: CallLog,
    pub vpcs: Arc<MemoryStore<VpcRecord>>,
    pub vswitches: Arc<MemoryStore<VSwitchRecord>>,
    pub nat_gateways: Arc<MemoryStore<NatGatewayRecord>>,
    pub eips: Arc<MemoryStore<EipRecord>>,
    pub snat_entries: Arc<MemoryStore<SnatEntryRecord>>,
    pub security_groups: Arc<MemoryStore<SecurityGroupRecord>>,
    pub security_group_rules: Arc<MemoryStore<SecurityGroupRuleRecord>>,
    pub load_balancers: Arc<MemoryStore<LoadBalancerRecord>>,
    pub listeners: Arc<MemoryStore<ListenerRecord>>,
    pub white_lists: Arc<MemoryStore<WhiteListRecord>>,
    pub scaling_groups: Arc<MemoryStore<ScalingGroupRecord>>,
    pub scaling_configurations: Arc<MemoryStore<ScalingConfigurationRecord>>,
    pub key_pairs: Arc<MemoryStore<KeyPairRecord>>,
    pub ram_roles: Arc<MemoryStore<RamRoleRecord>>,
    pub ram_policies: Arc<MemoryStore<RamPolicyRecord>>,
    pub disks: Arc<MemoryStore<DiskRecord>>,
    pub instances: Arc<MemoryStore<InstanceRecord>>,
}

impl AliMemory {
    pub fn new() -> Self {
        let log = CallLog::new();
        let memory = Self {
            vpcs: Arc::new(MemoryStore::new("vpc", log.clone()).with_tag_api()),
            vswitches: Arc::new(MemoryStore::new("vsw", log.clone()).with_tag_api()),
            nat_gateways: Arc::new(MemoryStore::new("ngw", log.clone()).with_tag_api()),
            eips: Arc::new(MemoryStore::new("eip", log.clone()).with_tag_api()),
            snat_entries: Arc::new(MemoryStore::new("snat", log.clone())),
            security_groups: Arc::new(MemoryStore::new("sg", log.clone()).with_tag_api()),
            security_group_rules: Arc::new(MemoryStore::new("sgr", log.clone())),
            load_balancers: Arc::new(MemoryStore::new("lb", log.clone()).with_tag_api()),
            listeners: Arc::new(MemoryStore::new("lsn", log.clone())),
            white_lists: Arc::new(MemoryStore::new("acl", log.clone())),
            scaling_groups: Arc::new(MemoryStore::new("asg", log.clone()).with_tag_api()),
            scaling_configurations: Arc::new(MemoryStore::new("asc", log.clone())),
            key_pairs: Arc::new(MemoryStore::new("kp", log.clone())),
            ram_roles: Arc::new(MemoryStore::new("role", log.clone())),
            ram_policies: Arc::new(MemoryStore::new("policy", log.clone())),
            disks: Arc::new(MemoryStore::new("d", log.clone()).with_tag_api()),
            instances: Arc::new(MemoryStore::new("i", log.clone())),
            log,
        };
        memory.install_guards();
        memory
    }

    fn install_guards(&self) {
        let (vswitches, nat_gateways, groups) = (
            self.vswitches.clone(),
            self.nat_gateways.clone(),
            self.security_groups.clone(),
        );
        self.vpcs.set_delete_guard(Arc::new(move |id: &str| {
            let count = vswitches.records().iter().filter(|r| r.vpc_id == id).count()
                + nat_gateways.records().iter().filter(|r| r.vpc_id == id).count()
                + groups.records().iter().filter(|r| r.vpc_id == id).count();
            count_reason(count, "vswitches, gateways or security groups")
        }));

        let (scaling_groups, snat_entries) =
            (self.scaling_groups.clone(), self.snat_entries.clone());
        self.vswitches.set_delete_guard(Arc::new(move |id: &str| {
            let count = scaling_groups
                .records()
                .iter()
                .filter(|r| r.vswitch_ids.iter().any(|v| v == id))
                .count()
                + snat_entries.records().iter().filter(|r| r.vswitch_id == id).count();
            count_reason(count, "scaling groups or SNAT entries")
        }));

        let (snat_entries, eips) = (self.snat_entries.clone(), self.eips.clone());
        self.nat_gateways.set_delete_guard(Arc::new(move |id: &str| {
            let count = snat_entries
                .records()
                .iter()
                .filter(|r| r.nat_gateway_id == id)
                .count()
                + eips
                    .records()
                    .iter()
                    .filter(|r| r.instance_id.as_deref() == Some(id))
                    .count();
            count_reason(count, "SNAT entries or bound EIPs")
        }));

        let eips: Weak<MemoryStore<EipRecord>> = Arc::downgrade(&self.eips);
        self.eips.set_delete_guard(Arc::new(move |id: &str| {
            let eip = eips.upgrade()?.get(id)?;
            eip.instance_id
                .map(|instance| format!("still bound to {instance}"))
        }));

        let (rules, configurations) = (
            self.security_group_rules.clone(),
            self.scaling_configurations.clone(),
        );
        self.security_groups.set_delete_guard(Arc::new(move |id: &str| {
            let count = rules
                .records()
                .iter()
                .filter(|r| r.security_group_id == id || r.source_group_id.as_deref() == Some(id))
                .count()
                + configurations
                    .records()
                    .iter()
                    .filter(|r| r.security_group_id.as_deref() == Some(id))
                    .count();
            count_reason(count, "rules or scaling configurations")
        }));

        let (listeners, white_lists, scaling_groups) = (
            self.listeners.clone(),
            self.white_lists.clone(),
            self.scaling_groups.clone(),
        );
        self.load_balancers.set_delete_guard(Arc::new(move |id: &str| {
            let count = listeners
                .records()
                .iter()
                .filter(|r| r.load_balancer_id == id)
                .count()
                + white_lists
                    .records()
                    .iter()
                    .filter(|r| r.load_balancer_id == id)
                    .count()
                + scaling_groups
                    .records()
                    .iter()
                    .filter(|r| r.load_balancer_ids.iter().any(|l| l == id))
                    .count();
            count_reason(count, "listeners, white lists or scaling groups")
        }));

        let configurations = self.scaling_configurations.clone();
        self.scaling_groups.set_delete_guard(Arc::new(move |id: &str| {
            let count = configurations
                .records()
                .iter()
                .filter(|r| r.scaling_group_id == id)
                .count();
            count_reason(count, "scaling configurations")
        }));

        let policies = self.ram_policies.clone();
        self.ram_roles.set_delete_guard(Arc::new(move |id: &str| {
            let count = policies.records().iter().filter(|r| r.role_id == id).count();
            count_reason(count, "attached policies")
        }));
    }

    /// Adapters over these stores
    pub fn apis(&self) -> AliApis {
        AliApis {
            vpcs: self.vpcs.clone(),
            vswitches: self.vswitches.clone(),
            nat_gateways: self.nat_gateways.clone(),
            eips: Arc::new(Assigning {
                store: self.eips.clone(),
                assign: assign_eip_address,
            }),
            snat_entries: self.snat_entries.clone(),
            security_groups: self.security_groups.clone(),
            security_group_rules: self.security_group_rules.clone(),
            load_balancers: Arc::new(Assigning {
                store: self.load_balancers.clone(),
                assign: assign_lb_address,
            }),
            listeners: self.listeners.clone(),
            white_lists: self.white_lists.clone(),
            scaling_groups: self.scaling_groups.clone(),
            scaling_configurations: self.scaling_configurations.clone(),
            key_pairs: self.key_pairs.clone(),
            ram_roles: self.ram_roles.clone(),
            ram_policies: self.ram_policies.clone(),
            disks: self.disks.clone(),
            instances: self.instances.clone(),
        }
    }

    /// Starts an instance in a scaling group, as the group itself would
    pub fn launch_instance(
        &self,
        scope: &Scope,
        scaling_group_id: &str,
        zone_id: &str,
        private_ip: &str,
    ) -> InstanceRecord {
        let name = format!("{}-{}", scaling_group_id, self.instances.len() + 1);
        self.instances.insert(
            scope,
            InstanceRecord {
                id: None,
                name,
                scaling_group_id: scaling_group_id.to_string(),
                zone_id: zone_id.to_string(),
                private_ip: Some(private_ip.to_string()),
            },
        )
    }

    /// Number of records across every store
    pub fn total(&self) -> usize {
        self.vpcs.len()
            + self.vswitches.len()
            + self.nat_gateways.len()
            + self.eips.len()
            + self.snat_entries.len()
            + self.security_groups.len()
            + self.security_group_rules.len()
            + self.load_balancers.len()
            + self.listeners.len()
            + self.white_lists.len()
            + self.scaling_groups.len()
            + self.scaling_configurations.len()
            + self.key_pairs.len()
            + self.ram_roles.len()
            + self.ram_policies.len()
            + self.disks.len()
    }
}

impl Default for AliMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl AliCloud {
    /// A cloud backed by fresh in-memory stores
    pub fn in_memory(region: impl Into<String>, config: &EngineConfig) -> (Self, AliMemory) {
        let memory = AliMemory::new();
        (Self::new(region, memory.apis(), config), memory)
    }
}
