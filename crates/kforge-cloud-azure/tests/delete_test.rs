mod common;

use common::{GROUPS, INTERNAL_LB, LOCATION, PUBLIC_LB, TestProject, cluster_yaml};
use kforge_cloud::{Scope, Tags};
use kforge_cloud_azure::list_resources;
use kforge_cloud_azure::records::ResourceGroupRecord;

fn position(deletes: &[String], kind: &str, last: bool) -> usize {
    let prefix = format!("{kind}:");
    let found = if last {
        deletes.iter().rposition(|d| d.starts_with(&prefix))
    } else {
        deletes.iter().position(|d| d.starts_with(&prefix))
    };
    found.unwrap_or_else(|| panic!("no {kind} deleted in {deletes:?}"))
}

fn launch_nodes(project: &TestProject, group: &str) {
    let scope = Scope::resource_group(group, LOCATION);
    for vmss in project.memory.scale_sets.records() {
        project.memory.launch_vm(&scope, &vmss, "10.0.1.10");
    }
}

#[tokio::test]
async fn test_delete_order_with_public_load_balancer() {
    let project = TestProject::new();
    project.write_cluster(&cluster_yaml("demo.example.com", PUBLIC_LB, ""));
    project.write_groups(GROUPS);
    let (cluster, groups) = project.load();
    assert!(project.reconcile(&cluster, &groups).await.is_success());
    launch_nodes(&project, "demo.example.com");
    project.memory.log.clear();

    let report = project.delete(&cluster).await;

    let deletes = project.memory.log.deletes();
    let last_assignment = position(&deletes, "RoleAssignment", true);
    let first_scale_set = position(&deletes, "VMScaleSet", false);
    let last_scale_set = position(&deletes, "VMScaleSet", true);
    let load_balancer = position(&deletes, "LoadBalancer", false);

    assert!(last_assignment < first_scale_set);
    assert!(position(&deletes, "VMScaleSetVM", true) < first_scale_set);
    assert!(last_scale_set < load_balancer);
    assert!(last_scale_set < position(&deletes, "Disk", false));
    assert!(load_balancer < position(&deletes, "PublicIPAddress", false));
    assert!(last_scale_set < position(&deletes, "Subnet", false));
    assert!(position(&deletes, "Subnet", true) < position(&deletes, "VirtualNetwork", false));
    assert!(position(&deletes, "Subnet", true) < position(&deletes, "NetworkSecurityGroup", false));
    assert!(position(&deletes, "Subnet", true) < position(&deletes, "RouteTable", false));
    assert_eq!(position(&deletes, "ResourceGroup", false), deletes.len() - 1);

    assert!(report.skipped_shared.is_empty());
    assert_eq!(project.memory.total(), 0, "left behind after {deletes:?}");
    assert!(project.memory.vms.is_empty());
}

#[tokio::test]
async fn test_internal_load_balancer_goes_before_its_subnet() {
    let project = TestProject::new();
    project.write_cluster(&cluster_yaml("demo.example.com", INTERNAL_LB, ""));
    project.write_groups(GROUPS);
    let (cluster, groups) = project.load();
    assert!(project.reconcile(&cluster, &groups).await.is_success());
    project.memory.log.clear();

    project.delete(&cluster).await;

    let deletes = project.memory.log.deletes();
    assert!(position(&deletes, "LoadBalancer", false) < position(&deletes, "Subnet", false));
    assert_eq!(project.memory.total(), 0, "left behind after {deletes:?}");
}

#[tokio::test]
async fn test_delete_leaves_other_cluster_alone() {
    let project = TestProject::new();
    project.write_groups(GROUPS);

    project.write_cluster(&cluster_yaml("beta.example.com", PUBLIC_LB, ""));
    let (beta, beta_groups) = project.load();
    project.reconcile(&beta, &beta_groups).await;
    let beta_total = project.memory.total();

    project.write_cluster(&cluster_yaml("alpha.example.com", PUBLIC_LB, ""));
    let (alpha, alpha_groups) = project.load();
    project.reconcile(&alpha, &alpha_groups).await;

    let discovered = list_resources(&project.cloud, &alpha).await.unwrap();
    assert!(
        discovered
            .values()
            .all(|r| !r.name.contains("beta.example.com") && !r.name.contains("beta-example-com"))
    );

    project.delete(&alpha).await;
    assert_eq!(project.memory.total(), beta_total);

    project.memory.log.clear();
    let report = project.reconcile(&beta, &beta_groups).await;
    assert!(report.is_success(), "{:?}", report.errors());
    assert!(project.memory.log.mutations().is_empty());
}

#[tokio::test]
async fn test_shared_group_survives_delete() {
    let project = TestProject::new();
    project.write_cluster(&cluster_yaml(
        "demo.example.com",
        PUBLIC_LB,
        "  azure:\n    resourceGroupName: corp-rg",
    ));
    project.write_groups(GROUPS);
    let (cluster, groups) = project.load();
    let group = project.memory.resource_groups.insert(
        &Scope::region(LOCATION),
        ResourceGroupRecord {
            id: None,
            name: "corp-rg".into(),
            location: LOCATION.into(),
            tags: Tags::new(),
        },
    );
    let report = project.reconcile(&cluster, &groups).await;
    assert!(report.is_success(), "{:?}", report.errors());

    let deleted = project.delete(&cluster).await;

    let group_key = kforge_cloud::resource_key("ResourceGroup", group.id.as_deref().unwrap());
    assert_eq!(deleted.skipped_shared, vec![group_key]);
    assert_eq!(project.memory.resource_groups.records(), vec![group]);
    assert_eq!(project.memory.total(), 1);
}
