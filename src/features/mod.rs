pub mod host;
pub mod login;
pub mod packages;
pub mod processes;
pub mod user;

use std::time::Duration;

use crate::shared::config::{AgentConfig, LoginSettings, UserSettings};
use crate::shared::error::{CollectionError, RegistryError};
use crate::shared::registry::{CollectorDescriptor, CollectorRegistry};
use crate::shared::traits::DataCollector;

use host::HostCollector;
use login::LoginCollector;
use packages::PackagesCollector;
use processes::ProcessesCollector;
use user::UserCollector;

/// Settings the built-in collectors are constructed with.
#[derive(Debug, Clone, Default)]
pub struct BuiltinOptions {
    pub user: UserSettings,
    pub login: LoginSettings,
}

impl From<&AgentConfig> for BuiltinOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            user: config.user.clone(),
            login: config.login.clone(),
        }
    }
}

fn checked<C: DataCollector>(collector: C) -> Result<Box<dyn DataCollector>, CollectionError> {
    collector.validate()?;
    Ok(Box::new(collector))
}

/// Registers the host, packages, processes, user and login datasets.
pub fn register_builtin(registry: &mut CollectorRegistry, options: &BuiltinOptions) -> Result<(), RegistryError> {
    registry.register(
        CollectorDescriptor::new("host", Duration::from_secs(60 * 60)).experimental(),
        || checked(HostCollector::new()),
    )?;
    registry.register(
        CollectorDescriptor::new("packages", Duration::from_secs(15 * 60)).experimental(),
        || checked(PackagesCollector::new()),
    )?;
    registry.register(
        CollectorDescriptor::new("processes", Duration::from_secs(10))
            .privileged()
            .experimental(),
        || checked(ProcessesCollector::new()),
    )?;

    let user = options.user.clone();
    registry.register(
        CollectorDescriptor::new("user", Duration::from_secs(10)).experimental(),
        move || checked(UserCollector::new(&user)),
    )?;

    let login = options.login.clone();
    let passwd = options.user.passwd_path.clone();
    registry.register(
        CollectorDescriptor::new("login", Duration::from_secs(10)).experimental(),
        move || checked(LoginCollector::new(&login, passwd.clone())?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_datasets_are_registered_with_defaults() {
        let registry = CollectorRegistry::with_defaults().unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["host", "packages", "processes", "user", "login"]);

        let host = registry.descriptor("host").unwrap();
        assert_eq!(host.interval, Duration::from_secs(3600));
        assert!(host.experimental);
        assert!(registry.descriptor("processes").unwrap().privilege_required);
        assert_eq!(
            registry.descriptor("packages").unwrap().interval,
            Duration::from_secs(900)
        );
    }

    #[test]
    fn builtin_collectors_resolve() {
        let registry = CollectorRegistry::with_defaults().unwrap();
        for name in ["host", "packages", "processes", "user", "login"] {
            assert!(registry.resolve(name).is_ok(), "{name} did not resolve");
        }
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = CollectorRegistry::with_defaults().unwrap();
        assert!(matches!(
            register_builtin(&mut registry, &BuiltinOptions::default()),
            Err(RegistryError::DuplicateDataset(name)) if name == "host"
        ));
    }
}
