use std::path::Path;

use chrono::{DateTime, Local, Utc};
use log::debug;
use sysinfo::{Networks, System};

use crate::features::host::models::{os_family, HostInformation, NetworkInterface, OsInformation};
use crate::shared::error::CollectionError;
use crate::shared::record::Collection;
use crate::shared::traits::{CollectContext, DataCollector, Validatable};

pub struct HostCollector {
    networks: Networks,
}

impl HostCollector {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn collect_os_info(&self) -> OsInformation {
        let platform = System::distribution_id();
        OsInformation {
            name: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            family: os_family(&platform).to_string(),
            platform,
            version: System::os_version().unwrap_or_default(),
            kernel: System::kernel_version().unwrap_or_default(),
        }
    }

    pub fn collect_interfaces(&mut self) -> Vec<NetworkInterface> {
        self.networks.refresh(true);
        let mut interfaces: Vec<_> = self
            .networks
            .iter()
            .map(|(name, data)| NetworkInterface {
                name: name.to_string(),
                mac: data.mac_address().to_string(),
                ip: data
                    .ip_networks()
                    .iter()
                    .map(|net| format!("{}/{}", net.addr, net.prefix))
                    .collect(),
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} network interfaces", interfaces.len());
        interfaces
    }

    fn collect_host(&mut self, ctx: &CollectContext) -> Result<HostInformation, CollectionError> {
        let os = self.collect_os_info();
        ctx.checkpoint()?;
        let interfaces = self.collect_interfaces();
        ctx.checkpoint()?;

        let boot_time = DateTime::<Utc>::from_timestamp(System::boot_time() as i64, 0)
            .ok_or_else(|| CollectionError::SystemApi("Invalid boot time".to_string()))?;

        let info = HostInformation {
            hostname: System::host_name().unwrap_or_else(whoami::hostname),
            uptime: System::uptime(),
            boot_time,
            architecture: std::env::consts::ARCH.to_string(),
            timezone_offset_sec: Local::now().offset().local_minus_utc(),
            containerized: containerized(),
            os,
            interfaces,
        };
        info.validate().map_err(CollectionError::Parse)?;
        Ok(info)
    }
}

/// Best-effort container detection; `None` off Linux.
fn containerized() -> Option<bool> {
    if !cfg!(target_os = "linux") {
        return None;
    }
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        return Some(true);
    }
    let cgroup = std::fs::read_to_string("/proc/1/cgroup").ok()?;
    Some(
        ["docker", "kubepods", "containerd", "lxc"]
            .iter()
            .any(|marker| cgroup.contains(marker)),
    )
}

impl DataCollector for HostCollector {
    fn collect(&mut self, ctx: &CollectContext) -> Result<Collection, CollectionError> {
        let info = self.collect_host(ctx)?;
        debug!("Collected host information for {}", info.hostname);
        Ok(Collection::single(info.to_record()))
    }

    fn validate(&self) -> Result<(), CollectionError> {
        if System::name().is_none() && std::env::consts::OS.is_empty() {
            return Err(CollectionError::SystemApi("No OS information available".to_string()));
        }
        Ok(())
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::record::FieldValue;
    use std::time::Duration;

    #[test]
    fn collects_one_record_with_os_name() {
        let mut collector = HostCollector::new();
        let ctx = CollectContext::with_timeout(Duration::from_secs(10));
        let collection = collector.collect(&ctx).unwrap();

        assert_eq!(collection.records.len(), 1);
        assert!(!collection.degraded);
        let record = &collection.records[0];
        match record.get("os.name") {
            Some(FieldValue::Str(name)) => assert!(!name.is_empty()),
            other => panic!("unexpected os.name {other:?}"),
        }
        assert!(matches!(record.get("uptime"), Some(FieldValue::UInt(_))));
        assert!(matches!(record.get("network.interfaces"), Some(FieldValue::List(_))));
    }

    #[test]
    fn expired_deadline_times_out() {
        let mut collector = HostCollector::new();
        let ctx = CollectContext::with_timeout(Duration::ZERO);
        assert!(matches!(collector.collect(&ctx), Err(CollectionError::Timeout)));
    }

    #[test]
    fn health_check_passes() {
        assert!(HostCollector::new().health_check());
    }
}
