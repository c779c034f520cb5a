use log::{debug, info, warn};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::features::processes::models::{ProcessInformation, ProcessInformationBuilder};
use crate::shared::error::CollectionError;
use crate::shared::record::{Collection, RawRecord};
use crate::shared::traits::{CollectContext, DataCollector};

/// Enumerates running processes.
///
/// Without elevated privilege the collector still reports what it can see
/// and marks the collection as degraded.
pub struct ProcessesCollector {
    sys: System,
    own_pid: Option<Pid>,
    privileged: Option<bool>,
}

impl ProcessesCollector {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            own_pid: sysinfo::get_current_pid().ok(),
            privileged: None,
        }
    }

    /// Overrides privilege detection.
    pub fn assume_privileged(mut self, privileged: bool) -> Self {
        self.privileged = Some(privileged);
        self
    }

    fn is_privileged(&self) -> bool {
        if let Some(privileged) = self.privileged {
            return privileged;
        }
        if cfg!(target_os = "windows") {
            return true;
        }
        self.own_pid
            .and_then(|pid| self.sys.process(pid))
            .and_then(|p| p.effective_user_id().or_else(|| p.user_id()))
            .is_some_and(|uid| uid.to_string() == "0")
    }

    fn describe(pid: &Pid, process: &Process) -> Result<ProcessInformation, String> {
        let name = process.name().to_string_lossy().into_owned();
        let name = if name.is_empty() {
            format!("[{}]", pid.as_u32())
        } else {
            name
        };
        ProcessInformationBuilder::new()
            .pid(pid.as_u32())
            .ppid(process.parent().map(|p| p.as_u32()))
            .name(name)
            .exe(process.exe().map(|p| p.to_string_lossy().into_owned()))
            .args(
                process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
            )
            .cwd(process.cwd().map(|p| p.to_string_lossy().into_owned()))
            .start_secs(process.start_time())
            .user_id(process.user_id().map(|uid| uid.to_string()))
            .build()
    }

    /// Fallback entry for our own process when enumeration missed it.
    fn own_process(pid: Pid) -> Result<ProcessInformation, String> {
        let exe = std::env::current_exe().ok();
        let name = exe
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        ProcessInformationBuilder::new()
            .pid(pid.as_u32())
            .name(name)
            .exe(exe.map(|p| p.to_string_lossy().into_owned()))
            .args(std::env::args().collect())
            .build()
    }

    fn collect_processes(&mut self, ctx: &CollectContext) -> Result<Vec<ProcessInformation>, CollectionError> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        ctx.checkpoint()?;

        let mut processes = Vec::with_capacity(self.sys.processes().len());
        for (pid, process) in self.sys.processes() {
            match Self::describe(pid, process) {
                Ok(info) => processes.push(info),
                Err(e) => warn!("Skipping process {}: {}", pid, e),
            }
        }
        ctx.checkpoint()?;

        if let Some(own) = self.own_pid {
            if !processes.iter().any(|p| p.pid == own.as_u32()) {
                processes.push(Self::own_process(own).map_err(CollectionError::Parse)?);
            }
        }
        processes.sort_by_key(|p| p.pid);
        Ok(processes)
    }
}

impl DataCollector for ProcessesCollector {
    fn collect(&mut self, ctx: &CollectContext) -> Result<Collection, CollectionError> {
        let processes = self.collect_processes(ctx)?;
        let degraded = !self.is_privileged();
        if degraded {
            debug!("Not running with elevated privilege, process visibility is reduced");
        }
        info!("Collected information for {} processes", processes.len());

        let record = RawRecord::new().with(
            "process",
            processes.iter().map(ProcessInformation::to_record).collect::<Vec<_>>(),
        );
        Ok(Collection::single(record).degraded(degraded))
    }

    fn validate(&self) -> Result<(), CollectionError> {
        if self.own_pid.is_none() {
            return Err(CollectionError::Unsupported(
                "process enumeration".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ProcessesCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::record::FieldValue;
    use std::time::Duration;

    fn pids(collection: &Collection) -> Vec<u64> {
        match collection.records[0].get("process") {
            Some(FieldValue::List(items)) => items
                .iter()
                .filter_map(|item| match item {
                    FieldValue::Map(r) => match r.get("pid") {
                        Some(FieldValue::UInt(pid)) => Some(*pid),
                        _ => None,
                    },
                    _ => None,
                })
                .collect(),
            other => panic!("unexpected process list {other:?}"),
        }
    }

    #[test]
    fn includes_own_process() {
        let mut collector = ProcessesCollector::new();
        let collection = collector
            .collect(&CollectContext::with_timeout(Duration::from_secs(10)))
            .unwrap();
        assert_eq!(collection.records.len(), 1);
        assert!(pids(&collection).contains(&(std::process::id() as u64)));
    }

    #[test]
    fn unprivileged_collection_is_degraded_not_failed() {
        let mut collector = ProcessesCollector::new().assume_privileged(false);
        let collection = collector
            .collect(&CollectContext::with_timeout(Duration::from_secs(10)))
            .unwrap();
        assert!(collection.degraded);
        assert!(pids(&collection).contains(&(std::process::id() as u64)));
    }

    #[test]
    fn privileged_collection_is_not_degraded() {
        let mut collector = ProcessesCollector::new().assume_privileged(true);
        let collection = collector
            .collect(&CollectContext::with_timeout(Duration::from_secs(10)))
            .unwrap();
        assert!(!collection.degraded);
    }

    #[test]
    fn pids_are_sorted() {
        let mut collector = ProcessesCollector::new();
        let collection = collector
            .collect(&CollectContext::with_timeout(Duration::from_secs(10)))
            .unwrap();
        let pids = pids(&collection);
        assert!(pids.windows(2).all(|w| w[0] < w[1]));
    }
}
