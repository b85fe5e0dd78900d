// src/history/fs.rs — Filesystem-backed config history
//
// Layout under the root:
//   objects/<first 2 hex>/<remaining hex>.json   one immutable revision each
//   refs/<branch>                                 tip revision id
// Object and ref writes go through a temp file + rename.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{ConfigHistory, Revision};
use crate::infra::errors::{Result, VidloopError};

const MIN_PREFIX_LEN: usize = 4;

pub struct FsConfigHistory {
    objects_dir: PathBuf,
    refs_dir: PathBuf,
    /// Serializes read-modify-write of refs within this process.
    ref_lock: Mutex<()>,
}

impl FsConfigHistory {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let objects_dir = root.as_ref().join("objects");
        let refs_dir = root.as_ref().join("refs");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&refs_dir)?;
        Ok(Self {
            objects_dir,
            refs_dir,
            ref_lock: Mutex::new(()),
        })
    }

    fn object_path(&self, id: &str) -> PathBuf {
        self.objects_dir.join(&id[..2]).join(format!("{}.json", &id[2..]))
    }

    fn ref_path(&self, branch: &str) -> Result<PathBuf> {
        validate_branch(branch)?;
        Ok(self.refs_dir.join(branch))
    }

    /// Expand an id prefix to the full id by scanning its shard.
    fn resolve(&self, id: &str) -> Result<String> {
        if id.len() < MIN_PREFIX_LEN || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VidloopError::History(format!("invalid revision id '{id}'")));
        }
        let id = id.to_ascii_lowercase();
        if id.len() == 64 {
            return Ok(id);
        }
        let shard = self.objects_dir.join(&id[..2]);
        let rest = &id[2..];
        let mut matches = Vec::new();
        if let Ok(entries) = fs::read_dir(&shard) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(stem) = name.strip_suffix(".json") {
                    if stem.starts_with(rest) {
                        matches.push(format!("{}{}", &id[..2], stem));
                    }
                }
            }
        }
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(VidloopError::History(format!("revision '{id}' not found"))),
            n => Err(VidloopError::History(format!("revision prefix '{id}' is ambiguous ({n} matches)"))),
        }
    }
}

/// Branch names become paths under refs/, so keep them tame.
fn validate_branch(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && name
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));
    if ok {
        Ok(())
    } else {
        Err(VidloopError::History(format!("invalid branch name '{name}'")))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| VidloopError::History(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
    let mut f = fs::File::create(&tmp)?;
    f.write_all(data)?;
    f.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl ConfigHistory for FsConfigHistory {
    fn branch(&self, name: &str) -> Result<()> {
        let path = self.ref_path(name)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    fn commit(&self, branch: &str, message: &str, changes: &BTreeMap<String, Value>) -> Result<String> {
        let ref_path = self.ref_path(branch)?;
        let _guard = self
            .ref_lock
            .lock()
            .map_err(|_| VidloopError::History("ref lock poisoned".into()))?;

        let parent = self.head(branch)?;
        let rev = Revision::new(parent, branch, message, changes.clone())?;

        let obj = self.object_path(&rev.id);
        if !obj.exists() {
            write_atomic(&obj, &serde_json::to_vec_pretty(&rev)?)?;
        }
        write_atomic(&ref_path, rev.id.as_bytes())?;

        tracing::debug!(branch, revision = rev.short_id(), "committed config revision");
        Ok(rev.id)
    }

    fn get(&self, id: &str) -> Result<Revision> {
        let id = self.resolve(id)?;
        let path = self.object_path(&id);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VidloopError::History(format!("revision '{id}' not found"))
            } else {
                VidloopError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn head(&self, branch: &str) -> Result<Option<String>> {
        let path = self.ref_path(branch)?;
        match fs::read_to_string(&path) {
            Ok(s) => {
                let id = s.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
