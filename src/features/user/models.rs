use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::shared::record::RawRecord;
use crate::shared::traits::Validatable;

/// One account entry, fields as in `getpwent(3)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub passwd: String,
    pub uid: u32,
    pub gid: u32,
    pub user_information: String,
    pub dir: String,
    pub shell: String,
}

impl User {
    /// SHA-256 over every field except the GECOS information.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.name.as_str(),
            self.passwd.as_str(),
            &self.uid.to_string(),
            &self.gid.to_string(),
            self.dir.as_str(),
            self.shell.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn to_record(&self) -> RawRecord {
        RawRecord::new()
            .with("name", self.name.clone())
            .with("passwd", self.passwd.clone())
            .with("uid", self.uid)
            .with("gid", self.gid)
            .with("dir", self.dir.clone())
            .with("shell", self.shell.clone())
            .with_opt(
                "user_information",
                Some(self.user_information.clone()).filter(|info| !info.is_empty()),
            )
    }
}

impl Validatable for User {
    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err(format!("User with uid {} has no name", self.uid));
        }
        Ok(())
    }
}

/// Parses passwd(5) content. Comments, blank lines and malformed entries are skipped.
pub fn parse_passwd(content: &str) -> Vec<User> {
    let mut users = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Some(user) if user.is_valid() => users.push(user),
            _ => warn!("Skipping malformed passwd entry on line {}", lineno + 1),
        }
    }
    users
}

fn parse_line(line: &str) -> Option<User> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != 7 {
        return None;
    }
    Some(User {
        name: parts[0].to_string(),
        passwd: parts[1].to_string(),
        uid: parts[2].parse().ok()?,
        gid: parts[3].parse().ok()?,
        user_information: parts[4].to_string(),
        dir: parts[5].to_string(),
        shell: parts[6].to_string(),
    })
}

/// Looks up a uid by account name in already parsed entries.
pub fn uid_of(users: &[User], name: &str) -> Option<u32> {
    users.iter().find(|u| u.name == name).map(|u| u.uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::record::FieldValue;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
# system accounts
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin

broken:x:notanumber:1::/:/bin/sh
alice:x:1000:1000:Alice,,,:/home/alice:/bin/zsh
";

    #[test]
    fn parses_entries_and_skips_noise() {
        let users = parse_passwd(PASSWD);
        let names: Vec<_> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["root", "daemon", "alice"]);
        assert_eq!(users[2].uid, 1000);
        assert_eq!(users[2].user_information, "Alice,,,");
        assert_eq!(users[2].shell, "/bin/zsh");
    }

    #[test]
    fn fingerprint_ignores_gecos() {
        let users = parse_passwd(PASSWD);
        let mut alice = users[2].clone();
        let original = alice.fingerprint();

        alice.user_information = "Alice Liddell".into();
        assert_eq!(alice.fingerprint(), original);

        alice.shell = "/bin/bash".into();
        assert_ne!(alice.fingerprint(), original);
    }

    #[test]
    fn empty_gecos_is_omitted_from_record() {
        let users = parse_passwd("svc:x:998:998::/var/lib/svc:/sbin/nologin\n");
        let record = users[0].to_record();
        assert!(record.get("user_information").is_none());
        assert_eq!(record.get("uid"), Some(&FieldValue::UInt(998)));
    }

    #[test]
    fn uid_lookup_by_name() {
        let users = parse_passwd(PASSWD);
        assert_eq!(uid_of(&users, "alice"), Some(1000));
        assert_eq!(uid_of(&users, "mallory"), None);
    }
}
