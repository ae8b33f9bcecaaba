//! Integration tests for load balancer convergence and teardown.
//!
//! All tests run against the in-memory provider with a paused clock, so poll
//! intervals elapse instantly.

mod common;

use std::time::Duration;

use common::*;
use lbtags::model::{ResourceKind, ResourceSpec};
use lbtags::provider::memory::MutationKind;
use lbtags::{Error, ProviderError, ReconcileLoop, ResourceHandle};

fn kinds(provider: &lbtags::MemoryProvider) -> Vec<(MutationKind, ResourceKind)> {
    provider
        .mutations()
        .iter()
        .map(|m| (m.kind, m.handle.kind))
        .collect()
}

/// Test: first pass creates every resource in dependency order.
#[tokio::test(start_paused = true)]
async fn test_fresh_create() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let web2 = instance(ZONE_B, "web-2", &["web"]);
    let db1 = instance(ZONE_A, "db-1", &["db"]);
    let provider = provider_with(&[&web1, &web2, &db1]);
    let lb = controller(&provider);

    let report = lb.converge(&config(tag_selector(&["web"]))).await.unwrap();

    assert_eq!(report.desired, members(&[&web1, &web2]));
    assert_eq!(pool_members(&provider), members(&[&web1, &web2]));
    assert_eq!(
        kinds(&provider),
        vec![
            (MutationKind::Create, ResourceKind::TargetPool),
            (MutationKind::Create, ResourceKind::Address),
            (MutationKind::Create, ResourceKind::Firewall),
            (MutationKind::Create, ResourceKind::ForwardingRule),
        ]
    );
    assert_eq!(report.created.len(), 4);

    let firewall = stored_spec(&provider, &ResourceHandle::firewall("lb"));
    assert_eq!(
        firewall,
        ResourceSpec::Firewall {
            network: "default".to_string(),
            ports: vec![443],
            target_tags: vec!["web".to_string()],
        }
    );

    let target = provider.resource(&pool()).unwrap().self_link;
    let rule = stored_spec(&provider, &ResourceHandle::forwarding_rule(REGION, "lb"));
    assert_eq!(
        rule,
        ResourceSpec::ForwardingRule {
            ip_address: report.address.clone(),
            target,
            port_range: "443-443".to_string(),
        }
    );
}

/// Test: a second pass over unchanged state issues no mutations.
#[tokio::test(start_paused = true)]
async fn test_second_pass_is_noop() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    let lb = controller(&provider);
    let config = config(tag_selector(&["web"]));

    let first = lb.converge(&config).await.unwrap();
    assert!(!first.is_noop());
    provider.clear_mutations();

    let second = lb.converge(&config).await.unwrap();
    assert!(second.is_noop());
    assert!(provider.mutations().is_empty());
    assert_eq!(second.address, first.address);
}

/// Test: {A, B} -> {B, C} adds C and removes A, each polled to completion.
#[tokio::test(start_paused = true)]
async fn test_membership_swap() {
    let a = instance(ZONE_A, "a", &["web"]);
    let b = instance(ZONE_A, "b", &["web"]);
    let c = instance(ZONE_B, "c", &["web"]);
    let provider = provider_with(&[&a, &b]);
    let lb = controller(&provider);
    let config = config(tag_selector(&["web"]));

    lb.converge(&config).await.unwrap();
    assert_eq!(pool_members(&provider), members(&[&a, &b]));

    provider.remove_instance(&a.instance);
    provider.add_instance(c.clone());
    provider.clear_mutations();
    provider.set_polls_until_done(2);

    let report = lb.converge(&config).await.unwrap();

    let mutations = provider.mutations();
    assert_eq!(mutations.len(), 2);
    assert_eq!(mutations[0].kind, MutationKind::AddMembers);
    assert_eq!(mutations[0].instances, vec![c.instance.clone()]);
    assert_eq!(mutations[1].kind, MutationKind::RemoveMembers);
    assert_eq!(mutations[1].instances, vec![a.instance.clone()]);
    assert_eq!(provider.poll_count(), 4);

    assert_eq!(report.memberships[0].added, members(&[&c]));
    assert_eq!(report.memberships[0].removed, members(&[&a]));
    assert_eq!(pool_members(&provider), members(&[&b, &c]));
}

/// Test: when nothing matches any more, the pool is emptied, not deleted.
#[tokio::test(start_paused = true)]
async fn test_no_match_empties_pool() {
    let a = instance(ZONE_A, "a", &["web"]);
    let b = instance(ZONE_B, "b", &["web"]);
    let provider = provider_with(&[&a, &b]);
    let lb = controller(&provider);
    let config = config(tag_selector(&["web"]));

    lb.converge(&config).await.unwrap();
    provider.remove_instance(&a.instance);
    provider.remove_instance(&b.instance);
    provider.clear_mutations();

    let report = lb.converge(&config).await.unwrap();

    assert!(report.desired.is_empty());
    assert!(pool_members(&provider).is_empty());
    assert_eq!(
        kinds(&provider),
        vec![(MutationKind::RemoveMembers, ResourceKind::TargetPool)]
    );
}

/// Test: only instances whose tag set equals the selector are picked.
#[tokio::test(start_paused = true)]
async fn test_exact_tag_match() {
    let web = instance(ZONE_A, "web-only", &["web"]);
    let both = instance(ZONE_A, "web-and-db", &["web", "db"]);
    let db = instance(ZONE_B, "db-only", &["db"]);
    let provider = provider_with(&[&web, &both, &db]);
    let lb = controller(&provider);

    let report = lb.converge(&config(tag_selector(&["web"]))).await.unwrap();
    assert_eq!(report.desired, members(&[&web]));

    let report = lb
        .converge(&config(tag_selector(&["db", "web"])))
        .await
        .unwrap();
    assert_eq!(report.desired, members(&[&both]));
    assert_eq!(pool_members(&provider), members(&[&both]));
}

/// Test: label selectors compare only the selected keys and leave the
/// firewall rule untargeted.
#[tokio::test(start_paused = true)]
async fn test_label_selector() {
    let prod = labeled(ZONE_A, "api-1", &[("app", "api"), ("env", "prod")]);
    let staging = labeled(ZONE_B, "api-2", &[("app", "api"), ("env", "staging")]);
    let provider = provider_with(&[&prod, &staging]);
    let lb = controller(&provider);

    let report = lb
        .converge(&config(label_selector(&["env=prod"])))
        .await
        .unwrap();

    assert_eq!(report.desired, members(&[&prod]));
    match stored_spec(&provider, &ResourceHandle::firewall("lb")) {
        ResourceSpec::Firewall { target_tags, .. } => assert!(target_tags.is_empty()),
        other => panic!("unexpected spec {:?}", other),
    }
}

/// Test: losing the pool creation race to another writer is not an error.
#[tokio::test(start_paused = true)]
async fn test_create_race_is_tolerated() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    provider.race_create(&pool());
    let lb = controller(&provider);

    let report = lb.converge(&config(tag_selector(&["web"]))).await.unwrap();

    assert!(!report.created.contains(&pool()));
    assert!(!report.memberships[0].created);
    assert_eq!(pool_members(&provider), members(&[&web1]));
}

/// Test: a firewall rule that drifted is updated in place.
#[tokio::test(start_paused = true)]
async fn test_firewall_drift_is_corrected() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    let lb = controller(&provider);
    let config = config(tag_selector(&["web"]));
    lb.converge(&config).await.unwrap();

    let firewall = ResourceHandle::firewall("lb");
    provider.insert_resource(
        &firewall,
        ResourceSpec::Firewall {
            network: "default".to_string(),
            ports: vec![22],
            target_tags: vec!["web".to_string()],
        },
        Default::default(),
    );
    provider.clear_mutations();

    let report = lb.converge(&config).await.unwrap();

    assert_eq!(report.updated, vec![firewall.clone()]);
    assert_eq!(
        kinds(&provider),
        vec![(MutationKind::Update, ResourceKind::Firewall)]
    );
    match stored_spec(&provider, &firewall) {
        ResourceSpec::Firewall { ports, .. } => assert_eq!(ports, vec![443]),
        other => panic!("unexpected spec {:?}", other),
    }
}

/// Test: a failed operation aborts the pass and the next pass heals.
#[tokio::test(start_paused = true)]
async fn test_failed_operation_aborts_pass() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    provider.set_polls_until_done(1);
    provider.fail_next_operation("QUOTA_EXCEEDED");
    let lb = controller(&provider);
    let config = config(tag_selector(&["web"]));

    let err = lb.converge(&config).await.unwrap_err();
    match err {
        Error::OperationFailed {
            message, status, ..
        } => {
            assert_eq!(message, "QUOTA_EXCEEDED");
            assert_eq!(status, Some(400));
        }
        other => panic!("unexpected error {:?}", other),
    }
    // Nothing after the failed step was attempted.
    assert_eq!(provider.mutations().len(), 1);
    assert!(provider.handles().is_empty());

    let report = lb.converge(&config).await.unwrap();
    assert_eq!(report.created.len(), 4);
    assert_eq!(pool_members(&provider), members(&[&web1]));
}

/// Test: an unexpected get error aborts the pass without touching later steps.
#[tokio::test(start_paused = true)]
async fn test_get_error_aborts_pass() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    let address = ResourceHandle::address(REGION, "lb");
    provider.fail_get(
        &address,
        ProviderError::Api {
            status: 503,
            message: "backend unavailable".to_string(),
        },
    );
    let lb = controller(&provider);

    let err = lb
        .converge(&config(tag_selector(&["web"])))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Provider(ProviderError::Api { status: 503, .. })
    ));
    assert_eq!(
        kinds(&provider),
        vec![(MutationKind::Create, ResourceKind::TargetPool)]
    );
}

/// Test: transient poll failures are retried until the operation completes.
#[tokio::test(start_paused = true)]
async fn test_transient_poll_failures() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    provider.set_polls_until_done(1);
    provider.fail_polls(2);
    let lb = controller(&provider);

    lb.converge(&config(tag_selector(&["web"]))).await.unwrap();

    // 4 creates, one successful poll each, plus the 2 failed polls.
    assert_eq!(provider.poll_count(), 6);
}

/// Test: per-zone instance groups hold the matching instances of their zone.
#[tokio::test(start_paused = true)]
async fn test_instance_groups_per_zone() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let web2 = instance(ZONE_B, "web-2", &["web"]);
    let provider = provider_with(&[&web1, &web2]);
    let lb = controller(&provider);
    let mut config = config(tag_selector(&["web"]));
    config.instance_groups = true;

    let report = lb.converge(&config).await.unwrap();

    let group_a = ResourceHandle::instance_group(ZONE_A, "lb");
    let group_b = ResourceHandle::instance_group(ZONE_B, "lb");
    assert_eq!(provider.resource(&group_a).unwrap().members, members(&[&web1]));
    assert_eq!(provider.resource(&group_b).unwrap().members, members(&[&web2]));
    assert_eq!(report.memberships.len(), 3);

    provider.clear_mutations();
    assert!(lb.converge(&config).await.unwrap().is_noop());
    assert!(provider.mutations().is_empty());
}

/// Test: without configured zones every zone of the region is searched.
#[tokio::test(start_paused = true)]
async fn test_zones_discovered_from_region() {
    let web_f = instance("us-central1-f", "web-f", &["web"]);
    let web_a = instance(ZONE_A, "web-a", &["web"]);
    let elsewhere = instance("europe-west1-b", "web-eu", &["web"]);
    let provider = provider_with(&[&web_f, &web_a, &elsewhere]);
    let lb = controller(&provider);
    let mut config = config(tag_selector(&["web"]));
    config.zones.clear();
    config.instance_groups = true;

    let report = lb.converge(&config).await.unwrap();

    assert_eq!(report.desired, members(&[&web_a, &web_f]));
    let group_f = ResourceHandle::instance_group("us-central1-f", "lb");
    assert_eq!(provider.resource(&group_f).unwrap().members, members(&[&web_f]));
    assert!(
        provider
            .resource(&ResourceHandle::instance_group("europe-west1-b", "lb"))
            .is_none()
    );

    let teardown = lb.teardown(&config).await.unwrap();
    assert!(teardown.deleted.contains(&group_f));
}

/// Test: one health check per port when enabled.
#[tokio::test(start_paused = true)]
async fn test_health_checks_per_port() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    let lb = controller(&provider);
    let mut config = config(tag_selector(&["web"]));
    config.ports = vec![80, 443];
    config.health_check = true;

    let report = lb.converge(&config).await.unwrap();

    for port in [80u16, 443] {
        let check = ResourceHandle::health_check(&format!("lb-{}", port));
        assert_eq!(
            stored_spec(&provider, &check),
            ResourceSpec::HealthCheck {
                port,
                request_path: "/".to_string(),
            }
        );
    }
    match stored_spec(&provider, &ResourceHandle::forwarding_rule(REGION, "lb")) {
        ResourceSpec::ForwardingRule { port_range, .. } => assert_eq!(port_range, "80-443"),
        other => panic!("unexpected spec {:?}", other),
    }
    assert_eq!(report.created.len(), 6);
}

/// Test: teardown deletes in reverse dependency order and keeps the address.
#[tokio::test(start_paused = true)]
async fn test_teardown_keeps_address() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    let lb = controller(&provider);
    let mut config = config(tag_selector(&["web"]));
    config.instance_groups = true;
    config.health_check = true;
    lb.converge(&config).await.unwrap();

    let report = lb.teardown(&config).await.unwrap();

    let order: Vec<ResourceKind> = report.deleted.iter().map(|h| h.kind).collect();
    assert_eq!(
        order,
        vec![
            ResourceKind::ForwardingRule,
            ResourceKind::TargetPool,
            ResourceKind::InstanceGroup,
            ResourceKind::InstanceGroup,
            ResourceKind::Firewall,
            ResourceKind::HealthCheck,
        ]
    );
    assert_eq!(provider.handles(), vec![ResourceHandle::address(REGION, "lb")]);

    // Already gone: nothing to delete, no error.
    let again = lb.teardown(&config).await.unwrap();
    assert!(again.deleted.is_empty());
}

/// Test: forced teardown also releases the address.
#[tokio::test(start_paused = true)]
async fn test_forced_teardown_releases_address() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    let lb = controller(&provider);
    let mut config = config(tag_selector(&["web"]));
    lb.converge(&config).await.unwrap();

    config.release_address = true;
    let report = lb.teardown(&config).await.unwrap();

    assert_eq!(
        report.deleted.last(),
        Some(&ResourceHandle::address(REGION, "lb"))
    );
    assert!(provider.handles().is_empty());
}

/// Test: the loop keeps passing over the controller after a failed pass.
#[tokio::test(start_paused = true)]
async fn test_loop_recovers_after_failure() {
    let web1 = instance(ZONE_A, "web-1", &["web"]);
    let provider = provider_with(&[&web1]);
    provider.fail_get(
        &pool(),
        ProviderError::Transport("connection refused".to_string()),
    );
    let lb = controller(&provider);
    let config = config(tag_selector(&["web"]));

    let summary = ReconcileLoop::new(Duration::from_secs(120))
        .run(&lb, &config, tokio::time::sleep(Duration::from_secs(250)))
        .await;

    assert_eq!(summary.passes, 3);
    assert_eq!(summary.failures, 1);
    assert_eq!(pool_members(&provider), members(&[&web1]));
}
