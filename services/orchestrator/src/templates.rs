//! Manifest template store.
//!
//! Each application ships one multi-document YAML file holding exactly one
//! `kind: Deployment` and one `kind: Service` document, laid out as
//! `{root}/{app}/{app}.yaml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fleet_naming::AppKind;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::manifest::{Deployment, Service};

/// Template loading errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template for {app}: {source}")]
    Parse {
        app: AppKind,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("template for {app} has no {kind} document")]
    MissingDocument { app: AppKind, kind: &'static str },

    #[error("no template registered for {app}")]
    Unregistered { app: AppKind },
}

/// The deployment/service pair of one application.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateManifests {
    pub deployment: Deployment,
    pub service: Service,
}

/// Source of per-application manifest templates.
pub trait TemplateStore: Send + Sync {
    fn load(&self, app: AppKind) -> Result<TemplateManifests, TemplateError>;
}

/// Split a multi-document YAML string into its deployment and service.
///
/// The first document of each kind wins; documents of other kinds are ignored.
pub fn parse_manifests(app: AppKind, text: &str) -> Result<TemplateManifests, TemplateError> {
    let parse_err = |source| TemplateError::Parse { app, source };

    let mut deployment = None;
    let mut service = None;

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document).map_err(parse_err)?;
        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_owned);
        match kind.as_deref() {
            Some("Deployment") if deployment.is_none() => {
                deployment = Some(serde_yaml::from_value(value).map_err(parse_err)?);
            }
            Some("Service") if service.is_none() => {
                service = Some(serde_yaml::from_value(value).map_err(parse_err)?);
            }
            _ => {}
        }
    }

    Ok(TemplateManifests {
        deployment: deployment.ok_or(TemplateError::MissingDocument {
            app,
            kind: "Deployment",
        })?,
        service: service.ok_or(TemplateError::MissingDocument {
            app,
            kind: "Service",
        })?,
    })
}

/// Templates read from disk on every load.
#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the template file for `app`.
    pub fn path_for(&self, app: AppKind) -> PathBuf {
        let name = app.prefix();
        self.root.join(&name).join(format!("{name}.yaml"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateStore for FsTemplateStore {
    fn load(&self, app: AppKind) -> Result<TemplateManifests, TemplateError> {
        let path = self.path_for(app);
        debug!(app = %app, path = %path.display(), "Loading template");
        let text = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;
        parse_manifests(app, &text)
    }
}

/// Templates held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateStore {
    templates: HashMap<AppKind, TemplateManifests>,
}

impl StaticTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_template(mut self, app: AppKind, manifests: TemplateManifests) -> Self {
        self.templates.insert(app, manifests);
        self
    }

    /// Parse and register a YAML template.
    pub fn with_yaml(self, app: AppKind, yaml: &str) -> Result<Self, TemplateError> {
        let manifests = parse_manifests(app, yaml)?;
        Ok(self.with_template(app, manifests))
    }
}

impl TemplateStore for StaticTemplateStore {
    fn load(&self, app: AppKind) -> Result<TemplateManifests, TemplateError> {
        self.templates
            .get(&app)
            .cloned()
            .ok_or(TemplateError::Unregistered { app })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KM_YAML: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: km-config
data:
  key: value
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: km
  labels:
    app: km
spec:
  replicas: 1
  selector:
    matchLabels:
      app: km
  template:
    metadata:
      labels:
        app: km
    spec:
      containers:
        - name: km
          image: enigma/km_sw:develop
          env:
            - name: SGX_MODE
              value: SW
---
apiVersion: v1
kind: Service
metadata:
  name: km-service
spec:
  type: LoadBalancer
  selector:
    app: km
  ports:
    - port: 3040
"#;

    #[test]
    fn test_parse_manifests_picks_by_kind() {
        let manifests = parse_manifests(AppKind::Km, KM_YAML).unwrap();

        assert_eq!(manifests.deployment.metadata.name, "km");
        assert_eq!(
            manifests.deployment.primary_container().unwrap().image,
            "enigma/km_sw:develop"
        );
        assert_eq!(manifests.service.metadata.name, "km-service");
        assert_eq!(manifests.service.spec.selector["app"], "km");
        assert_eq!(manifests.service.spec.extra["type"], "LoadBalancer");
    }

    #[test]
    fn test_parse_manifests_missing_service() {
        let yaml = KM_YAML.split("---\napiVersion: v1\nkind: Service").next().unwrap();
        let err = parse_manifests(AppKind::Km, yaml).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::MissingDocument { kind: "Service", .. }
        ));
    }

    #[test]
    fn test_fs_store_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("km")).unwrap();
        std::fs::write(dir.path().join("km").join("km.yaml"), KM_YAML).unwrap();

        let store = FsTemplateStore::new(dir.path());
        assert_eq!(store.path_for(AppKind::Km), dir.path().join("km/km.yaml"));

        let manifests = store.load(AppKind::Km).unwrap();
        assert_eq!(manifests.deployment.metadata.name, "km");

        let err = store.load(AppKind::Worker).unwrap_err();
        assert!(matches!(err, TemplateError::Io { .. }));
    }

    #[test]
    fn test_static_store_unregistered_app() {
        let store = StaticTemplateStore::new().with_yaml(AppKind::Km, KM_YAML).unwrap();
        assert!(store.load(AppKind::Km).is_ok());

        let err = store.load(AppKind::Contract).unwrap_err();
        assert!(matches!(err, TemplateError::Unregistered { app: AppKind::Contract }));
    }
}
