use std::collections::{HashMap, HashSet};
use std::fs::{self, File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use regex::Regex;

use crate::features::login::models::{LoginRecord, LoginRecordType};
use crate::features::login::utmp::{decode_all, Utmp, UtmpType, RECORD_SIZE};
use crate::features::user::models::{parse_passwd, uid_of, User};
use crate::shared::config::LoginSettings;
use crate::shared::error::CollectionError;
use crate::shared::record::Collection;
use crate::shared::traits::{CollectContext, DataCollector};

#[cfg(unix)]
fn file_id(_path: &Path, meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_id(path: &Path, _meta: &Metadata) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

const COMPRESSED: [&str; 4] = [".gz", ".xz", ".bz2", ".zst"];

/// Wtmp files matching a pattern whose wildcards sit in the file name.
struct WtmpFiles {
    dir: PathBuf,
    name: Regex,
}

impl WtmpFiles {
    fn new(pattern: &Path) -> Result<Self, CollectionError> {
        let file_name = pattern
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                CollectionError::Unsupported(format!("invalid wtmp file pattern {}", pattern.display()))
            })?;
        let dir = match pattern.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut expr = String::from("^");
        for c in file_name.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        let name = Regex::new(&expr).map_err(|e| CollectionError::Parse(e.to_string()))?;
        Ok(Self { dir, name })
    }

    /// Matching files, oldest first: numbered rotations from the highest
    /// number down, then other rotations by name, then the live file.
    fn list(&self) -> Result<Vec<PathBuf>, CollectionError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.name.is_match(&name) {
                continue;
            }
            if COMPRESSED.iter().any(|ext| name.ends_with(ext)) {
                debug!("Skipping compressed file {}", entry.path().display());
                continue;
            }
            files.push((rotation(&name), name.len(), entry.path()));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then_with(|| a.2.cmp(&b.2)));
        Ok(files.into_iter().map(|(_, _, path)| path).collect())
    }
}

/// Numeric suffix of a rotated file (`wtmp.3` is 3), 0 otherwise.
fn rotation(name: &str) -> u32 {
    name.rsplit_once('.')
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(0)
}

/// Reports logins, logouts, boots and shutdowns recorded in wtmp files.
///
/// Files are tracked by inode so a rotated file keeps its read position;
/// each invocation only decodes records appended since the previous one.
pub struct LoginCollector {
    files: WtmpFiles,
    passwd_path: PathBuf,
    /// Bytes already consumed, per file identity.
    offsets: HashMap<u64, u64>,
    /// Open sessions by TTY, used to enrich logout records.
    sessions: HashMap<String, LoginRecord>,
}

impl LoginCollector {
    pub fn new(settings: &LoginSettings, passwd_path: impl Into<PathBuf>) -> Result<Self, CollectionError> {
        Ok(Self {
            files: WtmpFiles::new(&settings.wtmp_file_pattern)?,
            passwd_path: passwd_path.into(),
            offsets: HashMap::new(),
            sessions: HashMap::new(),
        })
    }

    fn read_appended(&mut self, path: &Path, meta: &Metadata) -> Result<Vec<Utmp>, CollectionError> {
        let id = file_id(path, meta);
        let size = meta.len();
        let mut start = self.offsets.get(&id).copied().unwrap_or(0);
        if size < start {
            warn!(
                "File {} (inode {}) is smaller than before, reading whole file",
                path.display(),
                id
            );
            start = 0;
        }
        if size == start {
            return Ok(Vec::new());
        }
        debug!(
            "Reading file {} (inode={}, from={}, size={})",
            path.display(),
            id,
            start,
            size
        );

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::with_capacity((size - start) as usize);
        file.read_to_end(&mut bytes)?;

        let complete = bytes.len() - bytes.len() % RECORD_SIZE;
        self.offsets.insert(id, start + complete as u64);
        decode_all(&bytes[..complete])
    }

    fn process(&mut self, utmp: Utmp, users: &mut Option<Vec<User>>) -> Option<LoginRecord> {
        let tty = Some(utmp.line.clone()).filter(|line| line != "~" && !line.is_empty());
        let mut record = match utmp.kind {
            UtmpType::RunLevel => {
                let runlevel = utmp.runlevel();
                if utmp.user == "shutdown" || matches!(runlevel, Some('0') | Some('6')) {
                    self.sessions.clear();
                    LoginRecord::new(LoginRecordType::Shutdown, utmp.time)
                } else {
                    return None;
                }
            }
            UtmpType::BootTime if utmp.line == "~" && utmp.user == "reboot" => {
                self.sessions.clear();
                LoginRecord::new(LoginRecordType::Boot, utmp.time)
            }
            UtmpType::UserProcess => {
                let mut record = LoginRecord::new(LoginRecordType::UserLogin, utmp.time);
                let users = users.get_or_insert_with(|| self.load_users());
                record.uid = uid_of(users, &utmp.user);
                record.username = Some(utmp.user.clone()).filter(|u| !u.is_empty());
                record.pid = Some(utmp.pid);
                record.ip = utmp.ip();
                record.hostname = Some(utmp.host.clone()).filter(|h| !h.is_empty());
                record.tty = tty.clone();
                if let Some(tty) = &tty {
                    self.sessions.insert(tty.clone(), record.clone());
                }
                record
            }
            UtmpType::DeadProcess => {
                let session = tty.as_ref().and_then(|t| self.sessions.remove(t))?;
                LoginRecord {
                    kind: LoginRecordType::UserLogout,
                    timestamp: utmp.time,
                    ..session
                }
            }
            _ => return None,
        };
        record.tty = tty;
        Some(record)
    }

    fn load_users(&self) -> Vec<User> {
        match fs::read_to_string(&self.passwd_path) {
            Ok(content) => parse_passwd(&content),
            Err(e) => {
                debug!("Cannot resolve login uids from {}: {}", self.passwd_path.display(), e);
                Vec::new()
            }
        }
    }
}

impl DataCollector for LoginCollector {
    fn collect(&mut self, ctx: &CollectContext) -> Result<Collection, CollectionError> {
        let mut seen = HashSet::new();
        let mut users = None;
        let mut records = Vec::new();

        for path in self.files.list()? {
            ctx.checkpoint()?;
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                // Rotated away since the directory was listed.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            seen.insert(file_id(&path, &meta));

            let origin = path.display().to_string();
            for utmp in self.read_appended(&path, &meta)? {
                if let Some(mut record) = self.process(utmp, &mut users) {
                    record.origin = origin.clone();
                    records.push(record);
                }
            }
        }
        self.offsets.retain(|id, _| seen.contains(id));

        if !records.is_empty() {
            info!("Collected {} login records", records.len());
        }
        Ok(Collection::new(
            records.iter().map(LoginRecord::to_record).collect(),
        ))
    }

    fn health_check(&self) -> bool {
        self.files.dir.is_dir()
    }
}
