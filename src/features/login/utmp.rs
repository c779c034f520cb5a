//! Decoding of glibc `struct utmp` records as found in `/var/log/wtmp`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};

use crate::shared::error::CollectionError;

pub const RECORD_SIZE: usize = 384;

const LINE: (usize, usize) = (8, 32);
const USER: (usize, usize) = (44, 32);
const HOST: (usize, usize) = (76, 256);
const TV_SEC: usize = 340;
const TV_USEC: usize = 344;
const ADDR_V6: usize = 348;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtmpType {
    RunLevel,
    BootTime,
    UserProcess,
    DeadProcess,
    Other(i16),
}

impl From<i16> for UtmpType {
    fn from(value: i16) -> Self {
        match value {
            1 => UtmpType::RunLevel,
            2 => UtmpType::BootTime,
            7 => UtmpType::UserProcess,
            8 => UtmpType::DeadProcess,
            other => UtmpType::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utmp {
    pub kind: UtmpType,
    pub pid: i32,
    pub line: String,
    pub user: String,
    pub host: String,
    pub time: DateTime<Utc>,
    pub addr_v6: [u8; 16],
}

fn i16_at(buf: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([buf[at], buf[at + 1]])
}

fn i32_at(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// NUL-terminated, fixed-width C string.
fn c_str(buf: &[u8], (at, len): (usize, usize)) -> String {
    let field = &buf[at..at + len];
    let end = field.iter().position(|b| *b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

impl Utmp {
    pub fn decode(buf: &[u8]) -> Result<Self, CollectionError> {
        if buf.len() < RECORD_SIZE {
            return Err(CollectionError::Parse(format!(
                "utmp record is {} bytes, expected {}",
                buf.len(),
                RECORD_SIZE
            )));
        }
        let secs = i32_at(buf, TV_SEC) as i64;
        let micros = i32_at(buf, TV_USEC).clamp(0, 999_999) as u32;
        let time = DateTime::<Utc>::from_timestamp(secs, micros * 1000)
            .ok_or_else(|| CollectionError::Parse(format!("invalid utmp timestamp {}", secs)))?;
        let mut addr_v6 = [0u8; 16];
        addr_v6.copy_from_slice(&buf[ADDR_V6..ADDR_V6 + 16]);

        Ok(Self {
            kind: UtmpType::from(i16_at(buf, 0)),
            pid: i32_at(buf, 4),
            line: c_str(buf, LINE),
            user: c_str(buf, USER),
            host: c_str(buf, HOST),
            time,
            addr_v6,
        })
    }

    /// Remote address. IPv6 when any of the last three words is set,
    /// IPv4 from the first word otherwise, `None` when nothing was recorded.
    pub fn ip(&self) -> Option<IpAddr> {
        let a = &self.addr_v6;
        if a[4..].iter().any(|b| *b != 0) {
            Some(IpAddr::V6(Ipv6Addr::from(*a)))
        } else if a[..4].iter().any(|b| *b != 0) {
            Some(IpAddr::V4(Ipv4Addr::new(a[0], a[1], a[2], a[3])))
        } else {
            None
        }
    }

    /// For run-level records the level is stored as an ASCII digit in the pid.
    pub fn runlevel(&self) -> Option<char> {
        u8::try_from(self.pid).ok().map(char::from)
    }
}

/// Decodes every complete record in `bytes`; a trailing partial record is ignored.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Utmp>, CollectionError> {
    bytes.chunks_exact(RECORD_SIZE).map(Utmp::decode).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    fn put_str(buf: &mut [u8], (at, len): (usize, usize), value: &str) {
        let bytes = value.as_bytes();
        let n = bytes.len().min(len);
        buf[at..at + n].copy_from_slice(&bytes[..n]);
    }

    pub fn encode(kind: i16, pid: i32, line: &str, user: &str, host: &str, secs: i32, addr: [u8; 16]) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_SIZE];
        buf[0..2].copy_from_slice(&kind.to_le_bytes());
        buf[4..8].copy_from_slice(&pid.to_le_bytes());
        put_str(&mut buf, LINE, line);
        put_str(&mut buf, USER, user);
        put_str(&mut buf, HOST, host);
        buf[TV_SEC..TV_SEC + 4].copy_from_slice(&secs.to_le_bytes());
        buf[ADDR_V6..ADDR_V6 + 16].copy_from_slice(&addr);
        buf
    }

    pub fn ipv4(a: u8, b: u8, c: u8, d: u8) -> [u8; 16] {
        let mut addr = [0u8; 16];
        addr[..4].copy_from_slice(&[a, b, c, d]);
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{encode, ipv4};
    use super::*;

    #[test]
    fn decodes_user_process() {
        let buf = encode(7, 4242, "pts/0", "alice", "10.0.0.5", 1_700_000_000, ipv4(10, 0, 0, 5));
        let utmp = Utmp::decode(&buf).unwrap();
        assert_eq!(utmp.kind, UtmpType::UserProcess);
        assert_eq!(utmp.pid, 4242);
        assert_eq!(utmp.line, "pts/0");
        assert_eq!(utmp.user, "alice");
        assert_eq!(utmp.host, "10.0.0.5");
        assert_eq!(utmp.time.timestamp(), 1_700_000_000);
        assert_eq!(utmp.ip(), Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn ipv6_when_upper_words_set() {
        let v6: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let buf = encode(7, 1, "pts/1", "bob", "", 0, v6.octets());
        assert_eq!(Utmp::decode(&buf).unwrap().ip(), Some(IpAddr::V6(v6)));
    }

    #[test]
    fn zero_address_is_none() {
        let buf = encode(7, 1, "tty1", "root", "", 0, [0; 16]);
        assert_eq!(Utmp::decode(&buf).unwrap().ip(), None);
    }

    #[test]
    fn runlevel_is_ascii_digit_in_pid() {
        let buf = encode(1, b'6' as i32, "~", "shutdown", "", 0, [0; 16]);
        let utmp = Utmp::decode(&buf).unwrap();
        assert_eq!(utmp.kind, UtmpType::RunLevel);
        assert_eq!(utmp.runlevel(), Some('6'));
    }

    #[test]
    fn partial_trailing_record_is_ignored() {
        let mut bytes = encode(2, 0, "~", "reboot", "", 10, [0; 16]);
        bytes.extend_from_slice(&[0u8; 100]);
        assert_eq!(decode_all(&bytes).unwrap().len(), 1);
    }

    #[test]
    fn short_buffer_is_a_parse_error() {
        assert!(matches!(Utmp::decode(&[0u8; 10]), Err(CollectionError::Parse(_))));
    }
}
