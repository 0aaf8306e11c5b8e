//! In-memory stand-ins for the cluster and registry, shared by controller tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use super::client::ResourceClient;
use super::labels::ResourceKey;
use crate::crd::openshift::BuildStatus;
use crate::crd::{
    Build, BuildArg, KernelMapping, Module, ModuleBuildSpec, ModuleSignSpec, ModuleSpec,
    RegistryTlsOptions, SecretRef,
};
use crate::error::{Error, Result};
use crate::kernel;
use crate::registry::{AuthGetterFactory, ImageRegistry, NoAuth, RegistryAuthGetter};

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("fake {reason}"),
        reason: reason.to_string(),
        code,
    }))
}

pub fn test_module() -> Module {
    let mut module = Module::new("kmm-ci", ModuleSpec::default());
    module.metadata = ObjectMeta {
        name: Some("kmm-ci".to_string()),
        namespace: Some("drivers".to_string()),
        uid: Some("1b2c3d4e-0000-0000-0000-000000000001".to_string()),
        ..Default::default()
    };
    module
}

/// `test_module` with a module-level build step.
pub fn build_module() -> Module {
    let mut module = test_module();
    let container = &mut module.spec.module_loader.container;
    container.modprobe.module_name = "kmm_ci_a".to_string();
    container.container_image = Some("quay.io/acme/kmm-ci:${KERNEL_FULL_VERSION}".to_string());
    container.build = Some(ModuleBuildSpec {
        dockerfile: "FROM registry.access.redhat.com/ubi9\nRUN make\n".to_string(),
        build_args: vec![BuildArg::new("DRIVER_VERSION", "1.2.3")],
        secrets: vec![SecretRef::new("build-token")],
    });
    module
}

/// `build_module` with a module-level sign step as well.
pub fn build_and_sign_module() -> Module {
    let mut module = build_module();
    module.spec.module_loader.container.sign = Some(ModuleSignSpec {
        key_secret: SecretRef::new("signing-key"),
        cert_secret: SecretRef::new("signing-cert"),
        files_to_sign: vec!["/opt/lib/modules/kmm_ci_a.ko".to_string()],
        ..Default::default()
    });
    module
}

/// The catch-all mapping of `module`, resolved for `kernel`.
pub fn resolved_mapping(module: &Module, kernel: &str) -> KernelMapping {
    let mapping = KernelMapping {
        regexp: Some("^.+$".to_string()),
        ..Default::default()
    };
    kernel::resolve_mapping(module, &mapping, kernel).unwrap()
}

/// A Build carrying the key's labels, in the given phase.
pub fn build_with_phase(key: &ResourceKey, name: &str, phase: &str) -> Build {
    let mut build = Build::new(name, Default::default());
    build.metadata.namespace = Some(key.module_namespace.clone());
    build.metadata.labels = Some(key.resource_labels());
    build.status = Some(BuildStatus {
        phase: phase.to_string(),
        ..Default::default()
    });
    build
}

struct FakeState<K> {
    objects: Vec<K>,
    creates: Vec<String>,
    deletes: Vec<String>,
    fail_lists: bool,
    fail_deletes: bool,
    gone_on_delete: bool,
    next_id: u32,
}

/// Namespaced object store with equality label selectors
pub struct FakeClient<K> {
    state: Mutex<FakeState<K>>,
}

impl<K> Default for FakeClient<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                objects: Vec::new(),
                creates: Vec::new(),
                deletes: Vec::new(),
                fail_lists: false,
                fail_deletes: false,
                gone_on_delete: false,
                next_id: 0,
            }),
        }
    }
}

impl<K: Resource + Clone> FakeClient<K> {
    pub fn insert(&self, obj: K) {
        self.state.lock().unwrap().objects.push(obj);
    }

    pub fn objects(&self) -> Vec<K> {
        self.state.lock().unwrap().objects.clone()
    }

    /// Names of created objects, in order
    pub fn creates(&self) -> Vec<String> {
        self.state.lock().unwrap().creates.clone()
    }

    /// Names of deleted objects, in order
    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn fail_lists(&self) {
        self.state.lock().unwrap().fail_lists = true;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    /// Answer deletes with 404 as if someone else removed the object
    /// between list and delete. Listing still returns it.
    pub fn gone_on_delete(&self) {
        self.state.lock().unwrap().gone_on_delete = true;
    }

    /// Apply `f` to every stored object.
    pub fn update_all(&self, f: impl Fn(&mut K)) {
        for obj in self.state.lock().unwrap().objects.iter_mut() {
            f(obj);
        }
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|req| match req.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(req),
        })
}

#[async_trait]
impl<K> ResourceClient<K> for FakeClient<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>> {
        let state = self.state.lock().unwrap();
        if state.fail_lists {
            return Err(api_error(500, "InternalError"));
        }
        Ok(state
            .objects
            .iter()
            .filter(|o| o.namespace().as_deref() == Some(namespace))
            .filter(|o| matches_selector(o.labels(), label_selector))
            .cloned()
            .collect())
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let mut obj = obj.clone();
        if obj.meta().name.is_none() {
            let prefix = obj.meta().generate_name.clone().unwrap_or_default();
            obj.meta_mut().name = Some(format!("{prefix}{:05}", state.next_id));
            state.next_id += 1;
        }
        obj.meta_mut().namespace = Some(namespace.to_string());
        state.creates.push(obj.name_any());
        state.objects.push(obj.clone());
        Ok(obj)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(api_error(500, "InternalError"));
        }
        if state.gone_on_delete {
            return Err(api_error(404, "NotFound"));
        }
        let pos = state
            .objects
            .iter()
            .position(|o| o.name_any() == name && o.namespace().as_deref() == Some(namespace))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        state.objects.remove(pos);
        state.deletes.push(name.to_string());
        Ok(())
    }
}

/// Existence oracle with a fixed answer
pub struct FakeRegistry {
    exists: Option<bool>,
    checked: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn answering(exists: bool) -> Self {
        Self {
            exists: Some(exists),
            checked: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            exists: None,
            checked: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn image_exists(
        &self,
        image: &str,
        _tls: &RegistryTlsOptions,
        _auth: &dyn RegistryAuthGetter,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.checked.lock().unwrap().push(image.to_string());
        self.exists
            .ok_or_else(|| Error::RegistryError("registry unavailable".to_string()))
    }
}

pub struct AnonymousAuth;

impl AuthGetterFactory for AnonymousAuth {
    fn for_module(&self, _module: &Module) -> Box<dyn RegistryAuthGetter> {
        Box::new(NoAuth)
    }
}
