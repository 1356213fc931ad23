//! Exclusive file claims
//!
//! A [`ClaimSet`] hands each discovered file to exactly one caller. Claims
//! are taken in file-name order.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// State of one discovered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileClaim {
    pub path: PathBuf,
    pub started: bool,
    pub done: bool,
}

impl FileClaim {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started: false,
            done: false,
        }
    }
}

/// A file handed out by [`ClaimSet::claim`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedFile {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub started: usize,
    pub done: usize,
}

#[derive(Debug, Default)]
pub struct ClaimSet {
    files: Mutex<BTreeMap<String, FileClaim>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, FileClaim>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `path` under `name`, returning the claim it replaced, if any.
    pub fn insert(&self, name: impl Into<String>, path: impl Into<PathBuf>) -> Option<FileClaim> {
        self.lock().insert(name.into(), FileClaim::new(path))
    }

    /// Mark the first unstarted file as started and return it.
    ///
    /// `None` once every file has been claimed.
    pub fn claim(&self) -> Option<ClaimedFile> {
        let mut files = self.lock();
        files
            .iter_mut()
            .find(|(_, claim)| !claim.started)
            .map(|(name, claim)| {
                claim.started = true;
                ClaimedFile {
                    name: name.clone(),
                    path: claim.path.clone(),
                }
            })
    }

    /// Mark a claimed file as fully produced. Returns false for unknown or
    /// unclaimed names.
    pub fn complete(&self, name: &str) -> bool {
        match self.lock().get_mut(name) {
            Some(claim) if claim.started => {
                claim.done = true;
                true
            }
            _ => false,
        }
    }

    /// Hand a claimed but unfinished file back so the next [`claim`](Self::claim)
    /// can take it again. Returns false for unknown, unclaimed or done files.
    pub fn release(&self, name: &str) -> bool {
        match self.lock().get_mut(name) {
            Some(claim) if claim.started && !claim.done => {
                claim.started = false;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<FileClaim> {
        self.lock().get(name).cloned()
    }

    pub fn progress(&self) -> Progress {
        let files = self.lock();
        Progress {
            total: files.len(),
            started: files.values().filter(|c| c.started).count(),
            done: files.values().filter(|c| c.done).count(),
        }
    }

    /// Every file has been produced successfully
    pub fn is_finished(&self) -> bool {
        self.lock().values().all(|c| c.done)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<N: Into<String>, P: Into<PathBuf>> FromIterator<(N, P)> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = (N, P)>>(iter: I) -> Self {
        let set = ClaimSet::new();
        for (name, path) in iter {
            set.insert(name, path);
        }
        set
    }
}
