//! Binary identity file.
//!
//! ```text
//! "ZIDF" | version u32 | own ZID (12) | count u32 | count x record
//! record: peer ZID (12) | flags u8 | rs1 (32) | rs2 (32) | last_used u64
//! ```
//! Integers are big-endian. Writes go to a sibling temp file that is then
//! renamed over the previous file.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::identity::{
    ZID_LEN, Zid,
    identity_error::IdentityError,
    zid_record::{RECORD_LEN, ZidRecord},
};

const MAGIC: &[u8; 4] = b"ZIDF";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + ZID_LEN + 4;

pub struct ZidStore {
    path: Option<PathBuf>,
    inner: Mutex<ZidFile>,
}

struct ZidFile {
    own_zid: Zid,
    records: HashMap<Zid, ZidRecord>,
}

impl ZidStore {
    /// Opens `path`, creating it with a fresh random ZID if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            let bytes = fs::read(&path).map_err(|source| IdentityError::Io {
                path: path.clone(),
                source,
            })?;
            parse(&path, &bytes)?
        } else {
            let file = ZidFile {
                own_zid: random_zid(),
                records: HashMap::new(),
            };
            write_atomically(&path, &serialize(&file))?;
            file
        };
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(file),
        })
    }

    /// A store that lives only as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(ZidFile {
                own_zid: random_zid(),
                records: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn own_zid(&self) -> Zid {
        self.lock().own_zid
    }

    #[must_use]
    pub fn record(&self, peer: &Zid) -> Option<ZidRecord> {
        self.lock().records.get(peer).cloned()
    }

    /// Inserts or replaces the record and persists the whole file.
    pub fn save_record(&self, record: ZidRecord) -> Result<(), IdentityError> {
        let mut file = self.lock();
        file.records.insert(record.peer_zid, record);
        match &self.path {
            Some(path) => write_atomically(path, &serialize(&file)),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, ZidFile> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn random_zid() -> Zid {
    let mut zid = [0u8; ZID_LEN];
    OsRng.fill_bytes(&mut zid);
    zid
}

fn serialize(file: &ZidFile) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + file.records.len() * RECORD_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&file.own_zid);
    out.extend_from_slice(&(file.records.len() as u32).to_be_bytes());
    for record in file.records.values() {
        record.encode(&mut out);
    }
    out
}

fn parse(path: &Path, bytes: &[u8]) -> Result<ZidFile, IdentityError> {
    let corrupt = |reason| IdentityError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    if bytes.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if &bytes[..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = BigEndian::read_u32(&bytes[4..8]);
    if version != VERSION {
        return Err(IdentityError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }
    let mut own_zid = [0u8; ZID_LEN];
    own_zid.copy_from_slice(&bytes[8..8 + ZID_LEN]);
    let count = BigEndian::read_u32(&bytes[8 + ZID_LEN..HEADER_LEN]) as usize;

    let body = &bytes[HEADER_LEN..];
    if body.len() != count * RECORD_LEN {
        return Err(corrupt("record count does not match file size"));
    }
    let mut records = HashMap::with_capacity(count);
    for chunk in body.chunks_exact(RECORD_LEN) {
        let record = ZidRecord::decode(chunk).ok_or_else(|| corrupt("bad record"))?;
        records.insert(record.peer_zid, record);
    }
    Ok(ZidFile { own_zid, records })
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), IdentityError> {
    let io_err = |source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut f = options.open(&tmp).map_err(io_err)?;
    f.write_all(bytes).map_err(io_err)?;
    f.sync_all().map_err(io_err)?;
    drop(f);
    fs::rename(&tmp, path).map_err(io_err)
}
