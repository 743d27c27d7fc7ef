//! Integration tests for the installer.
//!
//! These tests drive the installer state machine through the in-memory
//! package manager, with short real durations for readiness waits.

use std::sync::Arc;
use std::time::Duration;

use eksaddon_installer::{
    InstallAction, InstallState, Installer, InstallerDescriptor, InstallerError,
    MockPackageManager, PackageCoordinates, RemoveOutcome,
};
use eksaddon_templates::{RenderContext, RenderedDocument, TemplateRenderer, TemplateSource};
use tokio_util::sync::CancellationToken;

const VALUES: &str = "settings:\n  clusterName: {{ cluster_name }}\nreplicas: {{ replicas }}\n";

fn descriptor() -> InstallerDescriptor {
    InstallerDescriptor::new(
        "oci://public.ecr.aws/karpenter/karpenter",
        "karpenter",
        "karpenter",
        TemplateSource::yaml("karpenter-values", VALUES),
    )
    .with_timeout(Duration::from_millis(200))
    .with_poll_interval(Duration::from_millis(5))
}

fn render(descriptor: &InstallerDescriptor, replicas: u32) -> RenderedDocument {
    let ctx = RenderContext::new("aws", "us-east-1", "111111111111", "demo").with_replicas(replicas);
    TemplateRenderer::new()
        .render(&descriptor.values_template, &ctx)
        .unwrap()
}

fn coordinates(descriptor: &InstallerDescriptor, version: &str) -> PackageCoordinates {
    descriptor.coordinates("karpenter", version)
}

#[tokio::test]
async fn test_fresh_install_waits_until_ready() {
    let packages = MockPackageManager::new().ready_after(2);
    let descriptor = descriptor();
    let values = render(&descriptor, 1);
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages.clone()));

    let report = installer
        .apply(&values, &coords, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.action, InstallAction::Install);
    assert_eq!(report.state, InstallState::Ready);
    assert_eq!(report.chart, "karpenter-1.5.0");
    assert_eq!(packages.check_count(), 3);

    let installs = packages.get_method_calls("install_or_upgrade");
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].version.as_deref(), Some("1.5.0"));
    assert!(installs[0].values.as_deref().unwrap().contains("clusterName: demo"));
}

#[tokio::test]
async fn test_reapplying_identical_values_is_a_no_op() {
    let packages = MockPackageManager::new();
    let descriptor = descriptor();
    let values = render(&descriptor, 1);
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages.clone()));
    let cancel = CancellationToken::new();

    installer.apply(&values, &coords, &cancel).await.unwrap();
    let second = installer.apply(&values, &coords, &cancel).await.unwrap();

    assert_eq!(second.action, InstallAction::Unchanged);
    assert_eq!(second.state, InstallState::Ready);
    assert_eq!(packages.get_method_calls("install_or_upgrade").len(), 1);
}

#[tokio::test]
async fn test_changed_values_or_version_upgrade() {
    let packages = MockPackageManager::new();
    let descriptor = descriptor();
    let installer = Installer::new(descriptor.clone(), Arc::new(packages.clone()));
    let cancel = CancellationToken::new();

    installer
        .apply(&render(&descriptor, 1), &coordinates(&descriptor, "1.5.0"), &cancel)
        .await
        .unwrap();

    let more_replicas = installer
        .apply(&render(&descriptor, 2), &coordinates(&descriptor, "1.5.0"), &cancel)
        .await
        .unwrap();
    assert_eq!(more_replicas.action, InstallAction::Upgrade);

    let new_version = installer
        .apply(&render(&descriptor, 2), &coordinates(&descriptor, "1.6.0"), &cancel)
        .await
        .unwrap();
    assert_eq!(new_version.action, InstallAction::Upgrade);
    assert_eq!(packages.get_method_calls("install_or_upgrade").len(), 3);
}

#[tokio::test]
async fn test_install_failure_is_retryable_and_skips_wait() {
    let packages = MockPackageManager::new().simulate_install_failure("chart pull failed");
    let descriptor = descriptor();
    let values = render(&descriptor, 1);
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages.clone()));

    let err = installer
        .apply(&values, &coords, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, InstallerError::Install { .. }));
    assert!(err.is_retryable());
    assert!(!err.is_readiness_timeout());
    assert!(err.to_string().contains("partially applied"));
    assert_eq!(packages.check_count(), 0);
}

#[tokio::test]
async fn test_no_wait_stops_at_installed() {
    let packages = MockPackageManager::new().never_ready();
    let descriptor = descriptor().with_wait(false);
    let values = render(&descriptor, 1);
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages.clone()));

    let report = installer
        .apply(&values, &coords, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, InstallState::Installed);
    assert_eq!(packages.check_count(), 0);
}

#[tokio::test]
async fn test_readiness_deadline_is_a_distinct_error() {
    let packages = MockPackageManager::new().never_ready();
    let descriptor = descriptor().with_timeout(Duration::from_millis(40));
    let values = render(&descriptor, 1);
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages.clone()));

    let err = installer
        .apply(&values, &coords, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        InstallerError::ReadinessTimeout {
            release, cancelled, ..
        } => {
            assert_eq!(release, "karpenter");
            assert!(!cancelled);
        }
        other => panic!("expected readiness timeout, got {:?}", other),
    }
    assert!(packages.installed("karpenter", "karpenter").is_some());
}

#[tokio::test]
async fn test_cancellation_reports_readiness_timeout() {
    let packages = MockPackageManager::new().never_ready();
    let descriptor = descriptor().with_timeout(Duration::from_secs(30));
    let values = render(&descriptor, 1);
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = installer.apply(&values, &coords, &cancel).await.unwrap_err();
    assert!(err.is_readiness_timeout());
    assert!(matches!(
        err,
        InstallerError::ReadinessTimeout { cancelled: true, .. }
    ));
}

#[tokio::test]
async fn test_values_must_be_a_mapping() {
    let packages = MockPackageManager::new();
    let descriptor = descriptor();
    let values = TemplateRenderer::new()
        .render(
            &TemplateSource::yaml("list", "- {{ cluster_name }}\n"),
            &RenderContext::new("aws", "us-east-1", "111111111111", "demo"),
        )
        .unwrap();
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages.clone()));

    assert!(matches!(
        installer.apply(&values, &coords, &CancellationToken::new()).await,
        Err(InstallerError::InvalidValues { .. })
    ));
    assert!(!packages.was_called("install_or_upgrade"));
}

#[tokio::test]
async fn test_remove_tolerates_absent_release() {
    let packages = MockPackageManager::new();
    let descriptor = descriptor();
    let values = render(&descriptor, 1);
    let coords = coordinates(&descriptor, "1.5.0");
    let installer = Installer::new(descriptor, Arc::new(packages.clone()));

    assert_eq!(
        installer.remove("karpenter").await.unwrap(),
        RemoveOutcome::AlreadyAbsent
    );

    installer
        .apply(&values, &coords, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        installer.remove("karpenter").await.unwrap(),
        RemoveOutcome::Removed
    );
    assert!(packages.installed("karpenter", "karpenter").is_none());
}
