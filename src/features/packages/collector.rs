use log::{debug, info, warn};

use crate::features::packages::models::Package;
use crate::features::packages::sources::{default_sources, FileStamp, PackageSource};
use crate::shared::error::CollectionError;
use crate::shared::record::{Collection, RawRecord};
use crate::shared::traits::{CollectContext, DataCollector, Validatable};

const DATASET: &str = "packages";

/// Identifies one observed state of the package databases.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    dataset: &'static str,
    signature: Vec<FileStamp>,
}

struct CachedState {
    key: CacheKey,
    record: RawRecord,
}

/// Lists installed packages, rescanning only when a database changes.
pub struct PackagesCollector {
    sources: Vec<Box<dyn PackageSource>>,
    cache: Option<CachedState>,
    scans: u64,
}

impl PackagesCollector {
    pub fn new() -> Self {
        Self::with_sources(default_sources())
    }

    pub fn with_sources(sources: Vec<Box<dyn PackageSource>>) -> Self {
        Self {
            sources,
            cache: None,
            scans: 0,
        }
    }

    /// How many times the databases were actually read.
    pub fn scans(&self) -> u64 {
        self.scans
    }

    fn current_key(&self) -> CacheKey {
        CacheKey {
            dataset: DATASET,
            signature: self.sources.iter().flat_map(|s| s.signature()).collect(),
        }
    }

    fn scan(&mut self, ctx: &CollectContext) -> Result<Vec<Package>, CollectionError> {
        let mut packages = Vec::new();
        for source in &self.sources {
            ctx.checkpoint()?;
            let found = source.list(ctx)?;
            debug!("{} reported {} packages", source.name(), found.len());
            packages.extend(found);
        }
        packages.retain(|p| {
            let valid = p.is_valid();
            if !valid {
                warn!("Skipping invalid package entry {:?}", p.name);
            }
            valid
        });
        packages.sort_by(|a, b| (&a.name, &a.version, &a.source).cmp(&(&b.name, &b.version, &b.source)));
        self.scans += 1;
        Ok(packages)
    }
}

impl DataCollector for PackagesCollector {
    fn collect(&mut self, ctx: &CollectContext) -> Result<Collection, CollectionError> {
        let key = self.current_key();
        if let Some(cached) = self.cache.as_ref().filter(|c| c.key == key) {
            debug!("Package databases unchanged, reusing previous result");
            return Ok(Collection::single(cached.record.clone()));
        }

        let packages = self.scan(ctx)?;
        info!("Collected information for {} packages", packages.len());
        let record = RawRecord::new().with(
            "package",
            packages.iter().map(Package::to_record).collect::<Vec<_>>(),
        );
        self.cache = Some(CachedState {
            key,
            record: record.clone(),
        });
        Ok(Collection::single(record))
    }
}

impl Default for PackagesCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::packages::sources::DpkgSource;
    use crate::shared::record::FieldValue;
    use std::fs;
    use std::time::Duration;

    const STATUS: &str = "\
Package: zsh
Status: install ok installed
Version: 5.9
Architecture: amd64

Package: bash
Status: install ok installed
Version: 5.1
Architecture: amd64
";

    fn ctx() -> CollectContext {
        CollectContext::with_timeout(Duration::from_secs(5))
    }

    fn package_names(collection: &Collection) -> Vec<String> {
        match collection.records[0].get("package") {
            Some(FieldValue::List(items)) => items
                .iter()
                .map(|item| match item {
                    FieldValue::Map(r) => match r.get("name") {
                        Some(FieldValue::Str(name)) => name.clone(),
                        other => panic!("bad name {other:?}"),
                    },
                    other => panic!("bad package {other:?}"),
                })
                .collect(),
            other => panic!("bad package list {other:?}"),
        }
    }

    #[test]
    fn unchanged_database_returns_identical_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        fs::write(&path, STATUS).unwrap();
        let mut collector = PackagesCollector::with_sources(vec![Box::new(DpkgSource::new(&path))]);

        let first = collector.collect(&ctx()).unwrap();
        let second = collector.collect(&ctx()).unwrap();
        assert_eq!(first, second);
        assert_eq!(collector.scans(), 1);
        assert_eq!(package_names(&first), vec!["bash", "zsh"]);
    }

    #[test]
    fn changed_database_triggers_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        fs::write(&path, STATUS).unwrap();
        let mut collector = PackagesCollector::with_sources(vec![Box::new(DpkgSource::new(&path))]);
        collector.collect(&ctx()).unwrap();

        fs::write(
            &path,
            format!("{STATUS}\nPackage: curl\nStatus: install ok installed\nVersion: 8.5\n"),
        )
        .unwrap();
        let collection = collector.collect(&ctx()).unwrap();
        assert_eq!(collector.scans(), 2);
        assert_eq!(package_names(&collection), vec!["bash", "curl", "zsh"]);
    }

    #[test]
    fn no_package_manager_is_an_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector =
            PackagesCollector::with_sources(vec![Box::new(DpkgSource::new(dir.path().join("none")))]);
        let collection = collector.collect(&ctx()).unwrap();
        assert_eq!(collection.records.len(), 1);
        assert_eq!(
            collection.records[0].get("package"),
            Some(&FieldValue::List(Vec::new()))
        );
    }

    #[test]
    fn expired_deadline_fails_instead_of_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        fs::write(&path, STATUS).unwrap();
        let mut collector = PackagesCollector::with_sources(vec![Box::new(DpkgSource::new(&path))]);
        let expired = CollectContext::with_timeout(Duration::ZERO);
        assert!(matches!(collector.collect(&expired), Err(CollectionError::Timeout)));
        assert!(collector.collect(&ctx()).is_ok());
    }
}
