use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::record::RawRecord;
use crate::shared::traits::Validatable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInformation {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub exe: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
}

impl ProcessInformation {
    pub fn to_record(&self) -> RawRecord {
        RawRecord::new()
            .with("pid", self.pid)
            .with_opt("ppid", self.ppid)
            .with("name", self.name.clone())
            .with_opt("exe", self.exe.clone())
            .with("args", self.args.clone())
            .with_opt("cwd", self.cwd.clone())
            .with_opt("start", self.start)
            .with_opt("user.id", self.user_id.clone())
    }
}

impl Validatable for ProcessInformation {
    fn validate(&self) -> Result<(), String> {
        #[cfg(not(target_os = "windows"))]
        if self.pid == 0 {
            return Err("Process ID cannot be zero".to_string());
        }
        if self.name.is_empty() {
            return Err(format!("Process {} has an empty name", self.pid));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ProcessInformationBuilder {
    pid: Option<u32>,
    ppid: Option<u32>,
    name: Option<String>,
    exe: Option<String>,
    args: Vec<String>,
    cwd: Option<String>,
    start: Option<DateTime<Utc>>,
    user_id: Option<String>,
}

impl ProcessInformationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn ppid(mut self, ppid: Option<u32>) -> Self {
        self.ppid = ppid;
        self
    }

    pub fn name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn exe(mut self, exe: Option<String>) -> Self {
        self.exe = exe;
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Start time in seconds since the epoch; zero means unknown.
    pub fn start_secs(mut self, secs: u64) -> Self {
        self.start = Some(secs)
            .filter(|s| *s > 0)
            .and_then(|s| DateTime::<Utc>::from_timestamp(s as i64, 0));
        self
    }

    pub fn user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn build(self) -> Result<ProcessInformation, String> {
        let process = ProcessInformation {
            pid: self.pid.ok_or("pid is required")?,
            ppid: self.ppid,
            name: self.name.ok_or("name is required")?,
            exe: self.exe,
            args: self.args,
            cwd: self.cwd,
            start: self.start,
            user_id: self.user_id,
        };

        process.validate()?;
        Ok(process)
    }
}
