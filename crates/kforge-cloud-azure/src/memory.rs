//! In-memory azure backend
//!
//! Public IP and load-balancer addresses are assigned on creation, scale
//! sets get an identity and finish provisioning at once, and a resource
//! with dependents cannot be deleted. A resource group cannot be deleted
//! while anything is left inside it.

use crate::authenticator::VmResourceId;
use crate::cloud::{AzureApis, AzureCloud};
use crate::records::*;
use async_trait::async_trait;
use kforge_cloud::{CallLog, CloudResource, ListFilter, MemoryStore, ResourceApi, Result, Scope};
use kforge_config::EngineConfig;
use std::sync::{Arc, Weak};

/// Subscription of every in-memory cloud
pub const MEMORY_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

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
}

/// `pip-7` → 7
fn serial(id: &str) -> u32 {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn assign_public_address(ip: &mut PublicIpRecord, id: &str) {
    if ip.address.is_none() {
        let n = serial(id);
        ip.address = Some(format!("20.50.{}.{}", n / 256, n % 256));
    }
}

fn assign_frontend(lb: &mut LoadBalancerRecord, id: &str) {
    if lb.frontend_ip.is_none() {
        let n = serial(id);
        lb.frontend_ip = Some(if lb.external {
            format!("20.51.{}.{}", n / 256, n % 256)
        } else {
            format!("10.250.{}.{}", n / 256, n % 256)
        });
    }
}

fn assign_identity(vmss: &mut VmScaleSetRecord, id: &str) {
    if vmss.principal_id.is_none() {
        vmss.principal_id = Some(format!("principal-{}", serial(id)));
    }
    vmss.provisioning_state = ProvisioningState::Succeeded;
}

fn counter<R: CloudResource>(
    store: &Arc<MemoryStore<R>>,
) -> Arc<dyn Fn(&str) -> usize + Send + Sync> {
    let store = store.clone();
    Arc::new(move |group: &str| store.count_in(group))
}

fn count_reason(count: usize, what: &str) -> Option<String> {
    (count > 0).then(|| format!("{count} {what}"))
}

/// Typed stores of one in-memory azure subscription
#[derive(Clone)]
pub struct AzureMemory {
    pub log: CallLog,
    pub resource_groups: Arc<MemoryStore<ResourceGroupRecord>>,
    pub virtual_networks: Arc<MemoryStore<VirtualNetworkRecord>>,
    pub subnets: Arc<MemoryStore<SubnetRecord>>,
    pub route_tables: Arc<MemoryStore<RouteTableRecord>>,
    pub network_security_groups: Arc<MemoryStore<NetworkSecurityGroupRecord>>,
    pub public_ips: Arc<MemoryStore<PublicIpRecord>>,
    pub load_balancers: Arc<MemoryStore<LoadBalancerRecord>>,
    pub scale_sets: Arc<MemoryStore<VmScaleSetRecord>>,
    pub vms: Arc<MemoryStore<VmRecord>>,
    pub disks: Arc<MemoryStore<DiskRecord>>,
    pub role_assignments: Arc<MemoryStore<RoleAssignmentRecord>>,
}

impl AzureMemory {
    pub fn new() -> Self {
        let log = CallLog::new();
        let memory = Self {
            resource_groups: Arc::new(MemoryStore::new("rg", log.clone())),
            virtual_networks: Arc::new(MemoryStore::new("vnet", log.clone())),
            subnets: Arc::new(MemoryStore::new("snet", log.clone())),
            route_tables: Arc::new(MemoryStore::new("rt", log.clone())),
            network_security_groups: Arc::new(MemoryStore::new("nsg", log.clone())),
            public_ips: Arc::new(MemoryStore::new("pip", log.clone())),
            load_balancers: Arc::new(MemoryStore::new("lb", log.clone())),
            scale_sets: Arc::new(MemoryStore::new("vmss", log.clone())),
            vms: Arc::new(MemoryStore::new("vm", log.clone())),
            disks: Arc::new(MemoryStore::new("disk", log.clone())),
            role_assignments: Arc::new(MemoryStore::new("ra", log.clone())),
            log,
        };
        memory.install_guards();
        memory
    }

    /// Records held inside the resource group of this name
    fn contents(&self) -> impl Fn(&str) -> usize + Send + Sync + 'static {
        let counters: Vec<Arc<dyn Fn(&str) -> usize + Send + Sync>> = vec![
            counter(&self.virtual_networks),
            counter(&self.subnets),
            counter(&self.route_tables),
            counter(&self.network_security_groups),
            counter(&self.public_ips),
            counter(&self.load_balancers),
            counter(&self.scale_sets),
            counter(&self.vms),
            counter(&self.disks),
            counter(&self.role_assignments),
        ];
        move |group: &str| counters.iter().map(|count| count(group)).sum()
    }

    fn install_guards(&self) {
        let subnets = self.subnets.clone();
        self.virtual_networks.set_delete_guard(Arc::new(move |id: &str| {
            let count = subnets
                .records()
                .iter()
                .filter(|r| r.virtual_network_id == id)
                .count();
            count_reason(count, "subnets")
        }));

        let (scale_sets, load_balancers) = (self.scale_sets.clone(), self.load_balancers.clone());
        self.subnets.set_delete_guard(Arc::new(move |id: &str| {
            let count = scale_sets.records().iter().filter(|r| r.subnet_id == id).count()
                + load_balancers
                    .records()
                    .iter()
                    .filter(|r| r.subnet_id.as_deref() == Some(id))
                    .count();
            count_reason(count, "scale sets or load balancers")
        }));

        let subnets = self.subnets.clone();
        self.network_security_groups
            .set_delete_guard(Arc::new(move |id: &str| {
                let count = subnets
                    .records()
                    .iter()
                    .filter(|r| r.network_security_group_id.as_deref() == Some(id))
                    .count();
                count_reason(count, "associated subnets")
            }));

        let subnets = self.subnets.clone();
        self.route_tables.set_delete_guard(Arc::new(move |id: &str| {
            let count = subnets
                .records()
                .iter()
                .filter(|r| r.route_table_id.as_deref() == Some(id))
                .count();
            count_reason(count, "associated subnets")
        }));

        let scale_sets = self.scale_sets.clone();
        self.load_balancers.set_delete_guard(Arc::new(move |id: &str| {
            let count = scale_sets
                .records()
                .iter()
                .filter(|r| r.load_balancer_id.as_deref() == Some(id))
                .count();
            count_reason(count, "scale sets in the backend pool")
        }));

        let load_balancers = self.load_balancers.clone();
        self.public_ips.set_delete_guard(Arc::new(move |id: &str| {
            let count = load_balancers
                .records()
                .iter()
                .filter(|r| r.public_ip_id.as_deref() == Some(id))
                .count();
            count_reason(count, "load balancer front ends")
        }));

        let vms = self.vms.clone();
        self.scale_sets.set_delete_guard(Arc::new(move |id: &str| {
            let count = vms.records().iter().filter(|r| r.scale_set_id == id).count();
            count_reason(count, "virtual machines")
        }));

        let vms = self.vms.clone();
        self.disks.set_delete_guard(Arc::new(move |id: &str| {
            let count = vms
                .records()
                .iter()
                .filter(|r| r.data_disk_ids.iter().any(|d| d == id))
                .count();
            count_reason(count, "attached virtual machines")
        }));

        let groups: Weak<MemoryStore<ResourceGroupRecord>> = Arc::downgrade(&self.resource_groups);
        let contents = self.contents();
        self.resource_groups.set_delete_guard(Arc::new(move |id: &str| {
            let group = groups.upgrade()?.get(id)?;
            count_reason(contents(&group.name), "resources inside")
        }));
    }

    /// Adapters over these stores
    pub fn apis(&self) -> AzureApis {
        AzureApis {
            resource_groups: self.resource_groups.clone(),
            virtual_networks: self.virtual_networks.clone(),
            subnets: self.subnets.clone(),
            route_tables: self.route_tables.clone(),
            network_security_groups: self.network_security_groups.clone(),
            public_ips: Arc::new(Assigning {
                store: self.public_ips.clone(),
                assign: assign_public_address,
            }),
            load_balancers: Arc::new(Assigning {
                store: self.load_balancers.clone(),
                assign: assign_frontend,
            }),
            scale_sets: Arc::new(Assigning {
                store: self.scale_sets.clone(),
                assign: assign_identity,
            }),
            vms: self.vms.clone(),
            disks: self.disks.clone(),
            role_assignments: self.role_assignments.clone(),
        }
    }

    /// Starts the next machine of a scale set, as the scale set itself
    /// would. The machine id is its full resource id.
    pub fn launch_vm(&self, scope: &Scope, scale_set: &VmScaleSetRecord, private_ip: &str) -> VmRecord {
        let scale_set_id = scale_set.id.clone().unwrap_or_default();
        let index = self
            .vms
            .records()
            .iter()
            .filter(|vm| vm.scale_set_id == scale_set_id)
            .count();
        let serial = self.vms.len() + 1;
        let resource_id = VmResourceId {
            subscription_id: MEMORY_SUBSCRIPTION_ID.to_string(),
            resource_group: scope.name().to_string(),
            scale_set: scale_set.name.clone(),
            instance_id: index.to_string(),
        };
        self.vms.insert(
            scope,
            VmRecord {
                id: Some(resource_id.to_string()),
                name: index.to_string(),
                scale_set_id,
                vm_id: format!("{serial:08x}-0000-4000-8000-{serial:012x}"),
                computer_name: format!("{}{index:06}", scale_set.computer_name_prefix),
                private_ip: Some(private_ip.to_string()),
                data_disk_ids: Vec::new(),
            },
        )
    }

    /// Number of records across every store but the machines, which
    /// belong to their scale set
    pub fn total(&self) -> usize {
        self.resource_groups.len()
            + self.virtual_networks.len()
            + self.subnets.len()
            + self.route_tables.len()
            + self.network_security_groups.len()
            + self.public_ips.len()
            + self.load_balancers.len()
            + self.scale_sets.len()
            + self.disks.len()
            + self.role_assignments.len()
    }
}

impl Default for AzureMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureCloud {
    /// A cloud backed by fresh in-memory stores
    pub fn in_memory(location: impl Into<String>, config: &EngineConfig) -> (Self, AzureMemory) {
        let memory = AzureMemory::new();
        let cloud = Self::new(MEMORY_SUBSCRIPTION_ID, location, memory.apis(), config);
        (cloud, memory)
    }
}
