use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::shared::record::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginRecordType {
    UserLogin,
    UserLogout,
    Boot,
    Shutdown,
}

impl LoginRecordType {
    pub fn action(&self) -> &'static str {
        match self {
            LoginRecordType::UserLogin => "user_login",
            LoginRecordType::UserLogout => "user_logout",
            LoginRecordType::Boot => "boot",
            LoginRecordType::Shutdown => "shutdown",
        }
    }
}

/// A login-related occurrence read from a wtmp file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginRecord {
    pub kind: LoginRecordType,
    pub timestamp: DateTime<Utc>,
    pub tty: Option<String>,
    pub username: Option<String>,
    pub uid: Option<u32>,
    pub pid: Option<i32>,
    pub ip: Option<IpAddr>,
    pub hostname: Option<String>,
    /// File the record was read from.
    pub origin: String,
}

impl LoginRecord {
    pub fn new(kind: LoginRecordType, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            tty: None,
            username: None,
            uid: None,
            pid: None,
            ip: None,
            hostname: None,
            origin: String::new(),
        }
    }

    pub fn to_record(&self) -> RawRecord {
        RawRecord::new()
            .with("type", self.kind.action())
            .with("timestamp", self.timestamp)
            .with_opt("tty", self.tty.clone())
            .with_opt("user.name", self.username.clone())
            .with_opt("user.id", self.uid)
            .with_opt("pid", self.pid)
            .with_opt("ip", self.ip.map(|ip| ip.to_string()))
            .with_opt("hostname", self.hostname.clone())
            .with("origin", self.origin.clone())
            .with_root("event.type", "event")
            .with_root("event.action", self.kind.action())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::record::FieldValue;

    #[test]
    fn login_record_carries_action_and_optionals() {
        let mut record = LoginRecord::new(LoginRecordType::UserLogin, Utc::now());
        record.username = Some("alice".into());
        record.uid = Some(1000);
        record.ip = Some("192.168.1.20".parse().unwrap());
        record.origin = "/var/log/wtmp".into();

        let raw = record.to_record();
        assert_eq!(raw.root_get("event.action"), Some(&FieldValue::Str("user_login".into())));
        assert_eq!(raw.get("user.id"), Some(&FieldValue::UInt(1000)));
        assert_eq!(raw.get("ip"), Some(&FieldValue::Str("192.168.1.20".into())));
        assert!(raw.get("tty").is_none());
    }
}
