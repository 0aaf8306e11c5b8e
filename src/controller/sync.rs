//! State machine shared by the build and sign managers
//!
//! Nothing is remembered between calls. Every sync re-derives the state of a
//! (module, kernel) pair from the cluster: no resource yet, a stale resource
//! whose fingerprint no longer matches the template, or a current resource
//! whose phase is translated into a [`SyncResult`].

use std::collections::BTreeSet;

use kube::{Resource, ResourceExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::client::ResourceClient;
use super::labels::{ModuleKey, ResourceKey, HASH_ANNOTATION, TARGET_KERNEL_LABEL};
use super::locator::Locator;
use super::status::{Phase, SyncResult};
use crate::error::{Error, Result};

/// A Build- or Job-like object created by a manager
pub trait GeneratedResource: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    /// Current phase, or the raw value when it is not one we know.
    fn phase(&self) -> std::result::Result<Phase, String>;

    /// Human-readable reason for a Failed/Cancelled phase.
    fn failure_message(&self) -> String;
}

/// SHA-256 over the canonical JSON encoding of `value`.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn hash_annotation<K: Resource>(obj: &K) -> Option<&String> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(HASH_ANNOTATION))
}

/// Drive the generated resource for `key` one step toward `template`.
pub async fn sync_generated<K>(
    client: &dyn ResourceClient<K>,
    key: &ResourceKey,
    template: K,
) -> Result<SyncResult>
where
    K: GeneratedResource,
{
    let kind = K::kind(&()).to_string();
    let namespace = &key.module_namespace;

    let desired_hash = hash_annotation(&template).cloned().ok_or_else(|| {
        Error::InvariantViolation(format!("{kind} template carries no {HASH_ANNOTATION}"))
    })?;

    let existing = match Locator::new(client).find(key).await? {
        Some(existing) => existing,
        None => {
            info!(
                "Creating {} for module {}/{} kernel {}",
                kind, namespace, key.module_name, key.target_kernel
            );
            client.create(namespace, &template).await?;
            return Ok(SyncResult::created());
        }
    };

    let name = existing.name_any();
    let current_hash = hash_annotation(&existing).ok_or_else(|| {
        Error::InvariantViolation(format!(
            "{kind} {namespace}/{name} has no {HASH_ANNOTATION} annotation"
        ))
    })?;

    if *current_hash != desired_hash {
        info!(
            "{} {}/{} is out of date (hash {} != {}), deleting it",
            kind, namespace, name, current_hash, desired_hash
        );
        // The next sync recreates it; a failed delete is retried then.
        if let Err(e) = client.delete(namespace, &name).await {
            warn!("Failed to delete stale {} {}/{}: {}", kind, namespace, name, e);
        }
        return Ok(SyncResult::in_progress());
    }

    let phase = existing.phase().map_err(|phase| Error::UnknownPhase {
        kind: kind.clone(),
        name: name.clone(),
        phase,
    })?;
    debug!("{} {}/{} is in phase {:?}", kind, namespace, name, phase);

    match phase {
        Phase::Complete => Ok(SyncResult::completed()),
        Phase::New | Phase::Pending | Phase::Running => Ok(SyncResult::in_progress()),
        Phase::Failed | Phase::Cancelled => Err(Error::TerminalFailure {
            kind,
            name,
            message: existing.failure_message(),
        }),
    }
}

/// Delete the module's generated resources whose target kernel is no longer declared.
///
/// Returns the names of the deleted resources. Resources already gone count
/// as deleted by someone else and are skipped.
pub async fn collect_garbage<K>(
    client: &dyn ResourceClient<K>,
    key: &ModuleKey,
    declared_kernels: &BTreeSet<String>,
) -> Result<Vec<String>>
where
    K: GeneratedResource,
{
    let kind = K::kind(&()).to_string();
    let namespace = &key.module_namespace;
    let mut deleted = Vec::new();

    for obj in Locator::new(client).list_for_module(key).await? {
        let kernel = obj.labels().get(TARGET_KERNEL_LABEL).cloned();
        if matches!(&kernel, Some(k) if declared_kernels.contains(k)) {
            continue;
        }

        let name = obj.name_any();
        match client.delete(namespace, &name).await {
            Ok(()) => {
                info!(
                    "Deleted {} {}/{} for undeclared kernel {:?}",
                    kind, namespace, name, kernel
                );
                deleted.push(name);
            }
            Err(e) if e.is_not_found() => {
                debug!("{} {}/{} already gone", kind, namespace, name);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::status::SyncStatus;
    use crate::controller::testing::{build_with_phase, test_module, FakeClient};
    use crate::crd::Build;

    fn template(key: &ResourceKey, hash: &str) -> Build {
        let mut build = build_with_phase(key, "", "New");
        build.metadata.name = None;
        build.metadata.generate_name = Some("kmm-ci-build-".into());
        build.status = None;
        build
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(HASH_ANNOTATION.into(), hash.into());
        build
    }

    fn existing(key: &ResourceKey, name: &str, phase: &str, hash: &str) -> Build {
        let mut build = build_with_phase(key, name, phase);
        build
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(HASH_ANNOTATION.into(), hash.into());
        build
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = fingerprint(&serde_json::json!({"args": ["A=1"]})).unwrap();
        let b = fingerprint(&serde_json::json!({"args": ["A=1"]})).unwrap();
        let c = fingerprint(&serde_json::json!({"args": ["A=2"]})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_create_when_absent() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        let client = FakeClient::<Build>::default();

        let result = sync_generated::<Build>(&client, &key, template(&key, "h1")).await.unwrap();
        assert_eq!(result, SyncResult::created());
        assert_eq!(client.objects().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_resource_deleted_regardless_of_phase() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        for phase in ["Running", "Complete", "Failed", "Bogus"] {
            let client = FakeClient::<Build>::default();
            client.insert(existing(&key, "old", phase, "h-old"));

            let result = sync_generated::<Build>(&client, &key, template(&key, "h-new"))
                .await
                .unwrap();
            assert_eq!(result.status, SyncStatus::InProgress);
            assert!(result.requeue);
            assert!(client.objects().is_empty(), "phase {phase}");
            assert_eq!(client.deletes(), vec!["old".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_failed_stale_delete_still_reports_in_progress() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        let client = FakeClient::<Build>::default();
        client.insert(existing(&key, "old", "Running", "h-old"));
        client.fail_deletes();

        let result = sync_generated::<Build>(&client, &key, template(&key, "h-new"))
            .await
            .unwrap();
        assert_eq!(result, SyncResult::in_progress());
        assert_eq!(client.objects().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_hash_annotation_is_invariant_violation() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        let client = FakeClient::<Build>::default();
        client.insert(build_with_phase(&key, "unhashed", "Running"));

        let err = sync_generated::<Build>(&client, &key, template(&key, "h1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(client.deletes().is_empty());
        assert!(client.creates().is_empty());
    }

    #[tokio::test]
    async fn test_phase_translation() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        for (phase, expected) in [
            ("New", SyncResult::in_progress()),
            ("Pending", SyncResult::in_progress()),
            ("Running", SyncResult::in_progress()),
            ("Complete", SyncResult::completed()),
        ] {
            let client = FakeClient::<Build>::default();
            client.insert(existing(&key, "b", phase, "h1"));
            let result = sync_generated::<Build>(&client, &key, template(&key, "h1"))
                .await
                .unwrap();
            assert_eq!(result, expected, "phase {phase}");
        }
    }

    #[tokio::test]
    async fn test_failed_and_cancelled_are_terminal() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        for phase in ["Failed", "Cancelled"] {
            let client = FakeClient::<Build>::default();
            client.insert(existing(&key, "b", phase, "h1"));
            let err = sync_generated::<Build>(&client, &key, template(&key, "h1"))
                .await
                .unwrap_err();
            assert_eq!(err.sync_status(), Some(SyncStatus::Failed), "phase {phase}");
        }
    }

    #[tokio::test]
    async fn test_unknown_phase_names_value() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        let client = FakeClient::<Build>::default();
        client.insert(existing(&key, "b", "Exploded", "h1"));

        let err = sync_generated::<Build>(&client, &key, template(&key, "h1"))
            .await
            .unwrap_err();
        match err {
            Error::UnknownPhase { phase, name, .. } => {
                assert_eq!(phase, "Exploded");
                assert_eq!(name, "b");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_error_propagates_without_mutation() {
        let key = ResourceKey::new(&test_module(), "5.14.0");
        let client = FakeClient::<Build>::default();
        client.fail_lists();

        let err = sync_generated::<Build>(&client, &key, template(&key, "h1"))
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(client.creates().is_empty());
    }

    #[tokio::test]
    async fn test_collect_garbage_deletes_undeclared_kernels() {
        let module = test_module();
        let client = FakeClient::<Build>::default();
        client.insert(existing(&ResourceKey::new(&module, "5.14.0"), "keep", "Complete", "h"));
        client.insert(existing(&ResourceKey::new(&module, "4.18.0"), "drop", "Complete", "h"));

        let declared = BTreeSet::from(["5.14.0".to_string()]);
        let key = ModuleKey::new(&module);
        let deleted = collect_garbage::<Build>(&client, &key, &declared).await.unwrap();

        assert_eq!(deleted, vec!["drop".to_string()]);
        assert_eq!(client.objects().len(), 1);

        // Idempotent
        let deleted = collect_garbage::<Build>(&client, &key, &declared).await.unwrap();
        assert!(deleted.is_empty());
    }

    #[tokio::test]
    async fn test_collect_garbage_skips_resources_already_gone() {
        let module = test_module();
        let client = FakeClient::<Build>::default();
        client.insert(existing(&ResourceKey::new(&module, "4.18.0"), "gone", "Complete", "h"));
        client.gone_on_delete();

        let key = ModuleKey::new(&module);
        let deleted = collect_garbage::<Build>(&client, &key, &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(deleted, Vec::<String>::new());
        assert!(client.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_collect_garbage_propagates_other_delete_errors() {
        let module = test_module();
        let client = FakeClient::<Build>::default();
        client.insert(existing(&ResourceKey::new(&module, "4.18.0"), "drop", "Complete", "h"));
        client.fail_deletes();

        let key = ModuleKey::new(&module);
        let err = collect_garbage::<Build>(&client, &key, &BTreeSet::new())
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(client.objects().len(), 1);
    }
}
