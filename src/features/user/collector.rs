use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, info};
use uuid::Uuid;

use crate::features::user::models::{parse_passwd, User};
use crate::shared::config::UserSettings;
use crate::shared::error::CollectionError;
use crate::shared::record::{Collection, RawRecord};
use crate::shared::traits::{CollectContext, DataCollector};

const ACTION_EXISTS: &str = "existing_user";
const ACTION_ADDED: &str = "user_added";
const ACTION_REMOVED: &str = "user_removed";
const ACTION_CHANGED: &str = "user_changed";

#[derive(Debug, Default, PartialEq)]
pub struct UserDiff {
    pub added: Vec<User>,
    pub removed: Vec<User>,
    pub changed: Vec<User>,
}

impl UserDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Reports local accounts: a full state snapshot periodically, and the
/// differences against the previous observation in between.
pub struct UserCollector {
    passwd_path: PathBuf,
    state_period: Duration,
    last_state: Option<Instant>,
    known: HashMap<String, User>,
}

impl UserCollector {
    pub fn new(settings: &UserSettings) -> Self {
        Self {
            passwd_path: settings.passwd_path.clone(),
            state_period: settings.state_period,
            last_state: None,
            known: HashMap::new(),
        }
    }

    fn read_users(&self) -> Result<Vec<User>, CollectionError> {
        let content = fs::read_to_string(&self.passwd_path)?;
        Ok(parse_passwd(&content))
    }

    fn needs_state(&self) -> bool {
        self.known.is_empty()
            || self
                .last_state
                .map_or(true, |at| at.elapsed() >= self.state_period)
    }

    /// Replaces the cache with `users` and returns what differs from before.
    /// A uid that both disappeared and appeared is reported as changed.
    fn diff_and_update(&mut self, users: &[User]) -> UserDiff {
        let current = fingerprints(users);

        let mut appeared: Vec<User> = current
            .iter()
            .filter(|(fp, _)| !self.known.contains_key(*fp))
            .map(|(_, u)| u.clone())
            .collect();
        let mut missing: BTreeMap<u32, User> = self
            .known
            .iter()
            .filter(|(fp, _)| !current.contains_key(*fp))
            .map(|(_, u)| (u.uid, u.clone()))
            .collect();
        appeared.sort_by_key(|u| u.uid);

        let mut diff = UserDiff::default();
        for user in appeared {
            if missing.remove(&user.uid).is_some() {
                diff.changed.push(user);
            } else {
                diff.added.push(user);
            }
        }
        diff.removed = missing.into_values().collect();

        self.known = current;
        diff
    }

    fn event(user: &User, event_type: &str, action: &str) -> RawRecord {
        user.to_record()
            .with_root("event.type", event_type)
            .with_root("event.action", action)
    }
}

fn fingerprints(users: &[User]) -> HashMap<String, User> {
    users
        .iter()
        .map(|u| (u.fingerprint(), u.clone()))
        .collect()
}

impl DataCollector for UserCollector {
    fn collect(&mut self, ctx: &CollectContext) -> Result<Collection, CollectionError> {
        let users = self.read_users()?;
        ctx.checkpoint()?;
        debug!("Found {} users", users.len());

        // A state tick reports every account and resets the cache, so
        // changes since the previous tick are folded into the snapshot.
        if self.needs_state() {
            let state_id = Uuid::new_v4().to_string();
            let records = users
                .iter()
                .map(|user| {
                    Self::event(user, "state", ACTION_EXISTS).with_root("event.id", state_id.clone())
                })
                .collect();
            self.known = fingerprints(&users);
            self.last_state = Some(Instant::now());
            info!("Reporting state of {} users", users.len());
            return Ok(Collection::new(records));
        }

        let mut records = Vec::new();
        let diff = self.diff_and_update(&users);
        if !diff.is_empty() {
            info!(
                "User changes: {} added, {} removed, {} changed",
                diff.added.len(),
                diff.removed.len(),
                diff.changed.len()
            );
        }
        records.extend(diff.added.iter().map(|u| Self::event(u, "event", ACTION_ADDED)));
        records.extend(diff.removed.iter().map(|u| Self::event(u, "event", ACTION_REMOVED)));
        records.extend(diff.changed.iter().map(|u| Self::event(u, "event", ACTION_CHANGED)));

        Ok(Collection::new(records))
    }

    fn validate(&self) -> Result<(), CollectionError> {
        if self.state_period.is_zero() {
            return Err(CollectionError::Parse(
                "user state period must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn health_check(&self) -> bool {
        self.passwd_path.is_file()
    }
}

impl Default for UserCollector {
    fn default() -> Self {
        Self::new(&UserSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::record::FieldValue;

    const INITIAL: &str = "\
root:x:0:0:root:/root:/bin/bash
alice:x:1000:1000:Alice:/home/alice:/bin/bash
bob:x:1001:1001:Bob:/home/bob:/bin/bash
";

    fn ctx() -> CollectContext {
        CollectContext::with_timeout(Duration::from_secs(5))
    }

    fn collector(path: PathBuf, period: Duration) -> UserCollector {
        UserCollector::new(&UserSettings {
            passwd_path: path,
            state_period: period,
        })
    }

    fn root_str<'a>(record: &'a RawRecord, key: &str) -> &'a str {
        match record.root_get(key) {
            Some(FieldValue::Str(s)) => s,
            other => panic!("missing root field {key}: {other:?}"),
        }
    }

    fn actions(collection: &Collection) -> Vec<(String, String)> {
        collection
            .records
            .iter()
            .map(|r| {
                let name = match r.get("name") {
                    Some(FieldValue::Str(s)) => s.clone(),
                    other => panic!("bad name {other:?}"),
                };
                (root_str(r, "event.action").to_string(), name)
            })
            .collect()
    }

    #[test]
    fn first_collection_reports_state_with_shared_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, INITIAL).unwrap();
        let mut collector = collector(path, Duration::from_secs(3600));

        let collection = collector.collect(&ctx()).unwrap();
        assert_eq!(collection.records.len(), 3);
        let ids: Vec<_> = collection
            .records
            .iter()
            .map(|r| root_str(r, "event.id"))
            .collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert!(collection
            .records
            .iter()
            .all(|r| root_str(r, "event.type") == "state"
                && root_str(r, "event.action") == ACTION_EXISTS));
    }

    #[test]
    fn unchanged_passwd_reports_nothing_between_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, INITIAL).unwrap();
        let mut collector = collector(path, Duration::from_secs(3600));

        collector.collect(&ctx()).unwrap();
        assert!(collector.collect(&ctx()).unwrap().records.is_empty());
    }

    #[test]
    fn reports_added_removed_and_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, INITIAL).unwrap();
        let mut collector = collector(path.clone(), Duration::from_secs(3600));
        collector.collect(&ctx()).unwrap();

        fs::write(
            &path,
            "\
root:x:0:0:root:/root:/bin/bash
alice:x:1000:1000:Alice:/home/alice:/bin/zsh
carol:x:1002:1002:Carol:/home/carol:/bin/bash
",
        )
        .unwrap();
        let collection = collector.collect(&ctx()).unwrap();
        assert_eq!(
            actions(&collection),
            vec![
                (ACTION_ADDED.to_string(), "carol".to_string()),
                (ACTION_REMOVED.to_string(), "bob".to_string()),
                (ACTION_CHANGED.to_string(), "alice".to_string()),
            ]
        );
        assert!(collection
            .records
            .iter()
            .all(|r| root_str(r, "event.type") == "event" && r.root_get("event.id").is_none()));
    }

    #[test]
    fn gecos_only_edit_is_not_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, INITIAL).unwrap();
        let mut collector = collector(path.clone(), Duration::from_secs(3600));
        collector.collect(&ctx()).unwrap();

        fs::write(&path, INITIAL.replace("Bob", "Robert")).unwrap();
        assert!(collector.collect(&ctx()).unwrap().records.is_empty());
    }

    #[test]
    fn state_is_repeated_after_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, INITIAL).unwrap();
        let mut collector = collector(path, Duration::from_millis(10));

        let first = collector.collect(&ctx()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let second = collector.collect(&ctx()).unwrap();
        assert_eq!(second.records.len(), 3);
        assert_ne!(
            root_str(&first.records[0], "event.id"),
            root_str(&second.records[0], "event.id")
        );
    }

    #[test]
    fn refresh_tick_reports_only_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, INITIAL).unwrap();
        let mut collector = collector(path.clone(), Duration::from_millis(10));
        collector.collect(&ctx()).unwrap();

        fs::write(
            &path,
            "\
root:x:0:0:root:/root:/bin/bash
alice:x:1000:1000:Alice:/home/alice:/bin/zsh
carol:x:1002:1002:Carol:/home/carol:/bin/bash
",
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let collection = collector.collect(&ctx()).unwrap();
        assert_eq!(collection.records.len(), 3);
        assert!(collection
            .records
            .iter()
            .all(|r| root_str(r, "event.action") == ACTION_EXISTS));

        // The snapshot already covered the edit, so nothing follows it.
        let mut quiet = collector;
        quiet.state_period = Duration::from_secs(3600);
        assert!(quiet.collect(&ctx()).unwrap().records.is_empty());
    }

    #[test]
    fn missing_passwd_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = collector(dir.path().join("absent"), Duration::from_secs(60));
        assert!(matches!(collector.collect(&ctx()), Err(CollectionError::Io(_))));
        assert!(!collector.health_check());
    }
}
