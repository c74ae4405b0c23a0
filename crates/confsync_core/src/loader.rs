//! Template resource discovery under a configuration directory.
//!
//! ```text
//! <confdir>/conf.d/*.toml      one resource per file
//! <confdir>/templates/<src>    template text referenced by `src`
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{ResourceConfig, SyncOptions};
use crate::error::{ConfigError, ConfigResult};
use crate::resource::TemplateResource;
use crate::store::StoreClient;

/// Loads every template resource under a configuration directory.
pub struct ResourceLoader {
    confdir: PathBuf,
}

impl ResourceLoader {
    pub fn new(confdir: impl Into<PathBuf>) -> Self {
        Self {
            confdir: confdir.into(),
        }
    }

    pub fn resource_dir(&self) -> PathBuf {
        self.confdir.join("conf.d")
    }

    pub fn template_dir(&self) -> PathBuf {
        self.confdir.join("templates")
    }

    /// Resource files in name order.
    pub fn resource_files(&self) -> ConfigResult<Vec<PathBuf>> {
        let dir = self.resource_dir();
        if !dir.is_dir() {
            return Err(ConfigError::NoResources(dir));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| ConfigError::Read {
                path: dir.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    /// Parse every resource and read its template.
    ///
    /// Any broken resource fails the whole load.
    pub fn load_all(
        &self,
        client: Arc<dyn StoreClient>,
        options: &SyncOptions,
    ) -> ConfigResult<Vec<TemplateResource>> {
        let files = self.resource_files()?;
        if files.is_empty() {
            return Err(ConfigError::NoResources(self.resource_dir()));
        }

        let mut resources = Vec::with_capacity(files.len());
        for path in files {
            let resource = self.load_resource(&path, client.clone(), options)?;
            info!(
                "Loaded template resource {} -> {:?}",
                resource.name(),
                resource.dest()
            );
            resources.push(resource);
        }
        Ok(resources)
    }

    /// Load a single resource file.
    pub fn load_resource(
        &self,
        path: &Path,
        client: Arc<dyn StoreClient>,
        options: &SyncOptions,
    ) -> ConfigResult<TemplateResource> {
        debug!("Loading template resource from {:?}", path);
        let config = ResourceConfig::from_file(path)?;
        let template_path = self.template_dir().join(&config.src);
        let template = fs::read_to_string(&template_path).map_err(|source| ConfigError::Read {
            path: template_path.clone(),
            source,
        })?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.src.clone());
        TemplateResource::new(name, config, template, client, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStoreClient;
    use tempfile::tempdir;

    fn client() -> Arc<dyn StoreClient> {
        Arc::new(MockStoreClient::new())
    }

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_loads_resources_in_name_order() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(&root.join("templates/app.tmpl"), "{{ getv('/port') }}");
        write(
            &root.join("conf.d/b-app.toml"),
            "[template]\nsrc = \"app.tmpl\"\ndest = \"/tmp/b.conf\"\nkeys = [\"/port\"]\nprefix = \"/b\"\n",
        );
        write(
            &root.join("conf.d/a-app.toml"),
            "[template]\nsrc = \"app.tmpl\"\ndest = \"/tmp/a.conf\"\nkeys = [\"/port\"]\n",
        );
        write(&root.join("conf.d/README"), "not a resource");

        let loader = ResourceLoader::new(root);
        let resources = loader
            .load_all(client(), &SyncOptions::default().with_prefix("/prod"))
            .unwrap();

        let names: Vec<_> = resources.iter().map(|r| r.name()).collect();
        assert_eq!(names, ["a-app", "b-app"]);
        assert_eq!(resources[0].keys(), ["/prod/port".to_string()]);
        assert_eq!(resources[1].prefix(), "/prod/b");
    }

    #[test]
    fn test_missing_template_is_fatal() {
        let temp = tempdir().unwrap();
        write(
            &temp.path().join("conf.d/app.toml"),
            "[template]\nsrc = \"missing.tmpl\"\ndest = \"/tmp/app.conf\"\n",
        );

        let err = ResourceLoader::new(temp.path())
            .load_all(client(), &SyncOptions::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { ref path, .. } if path.ends_with("missing.tmpl")));
    }

    #[test]
    fn test_empty_conf_dir_is_fatal() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("conf.d")).unwrap();

        let err = ResourceLoader::new(temp.path())
            .load_all(client(), &SyncOptions::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoResources(_)));
    }
}
