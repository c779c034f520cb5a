use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::record::RawRecord;
use crate::shared::traits::Validatable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsInformation {
    pub name: String,
    pub family: String,
    pub platform: String,
    pub version: String,
    pub kernel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: String,
    pub ip: Vec<String>,
}

impl NetworkInterface {
    fn to_record(&self) -> RawRecord {
        RawRecord::new()
            .with("name", self.name.clone())
            .with("mac", self.mac.clone())
            .with("ip", self.ip.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInformation {
    pub hostname: String,
    pub uptime: u64,
    pub boot_time: DateTime<Utc>,
    pub architecture: String,
    pub timezone_offset_sec: i32,
    pub containerized: Option<bool>,
    pub os: OsInformation,
    pub interfaces: Vec<NetworkInterface>,
}

impl HostInformation {
    pub fn to_record(&self) -> RawRecord {
        RawRecord::new()
            .with("hostname", self.hostname.clone())
            .with("uptime", self.uptime)
            .with("boottime", self.boot_time)
            .with("architecture", self.architecture.clone())
            .with("timezone.offset.sec", self.timezone_offset_sec)
            .with_opt("containerized", self.containerized)
            .with("os.name", self.os.name.clone())
            .with("os.family", self.os.family.clone())
            .with("os.platform", self.os.platform.clone())
            .with("os.version", self.os.version.clone())
            .with("os.kernel", self.os.kernel.clone())
            .with(
                "network.interfaces",
                self.interfaces.iter().map(NetworkInterface::to_record).collect::<Vec<_>>(),
            )
    }
}

impl Validatable for HostInformation {
    fn validate(&self) -> Result<(), String> {
        if self.os.name.is_empty() {
            return Err("OS name cannot be empty".to_string());
        }
        if self.hostname.is_empty() {
            return Err("Hostname cannot be empty".to_string());
        }
        if self.architecture.is_empty() {
            return Err("Architecture cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Maps a distribution id onto the family it belongs to.
pub fn os_family(platform: &str) -> &'static str {
    match platform {
        "debian" | "ubuntu" | "linuxmint" | "raspbian" | "kali" => "debian",
        "rhel" | "centos" | "fedora" | "amzn" | "rocky" | "almalinux" | "ol" | "scientific" => "redhat",
        "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => "suse",
        "alpine" => "alpine",
        "arch" | "manjaro" => "arch",
        "macos" | "darwin" => "darwin",
        "windows" => "windows",
        _ => "unknown",
    }
}
