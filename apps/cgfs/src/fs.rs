// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Project live cgroup manager state through the FUSE surface.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Directory, attribute, and control-file projection, plus the FUSE glue.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use cgm_client::{CgroupManager, RpcError};
use thiserror::Error;

use crate::access::{self, AccessDecision, CallerIdentity, Mode, MEMBERSHIP_KEY};
use crate::resolve::{self, join_cgroup, CGROUP_ROOT};
use crate::state::ControllerSet;

const ROOT_INODE: u64 = 1;
const TTL: Duration = Duration::from_secs(1);

/// Keys whose writes assign processes instead of storing a value.
const MEMBERSHIP_KEYS: [&str; 2] = [MEMBERSHIP_KEY, "cgroup.procs"];

/// Request-scoped failures, mapped to an errno at the FUSE boundary.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not name a live controller, cgroup, or key.
    #[error("no such entry")]
    NotFound,
    /// The path or payload is malformed.
    #[error("invalid argument")]
    Invalid,
    /// Access control refused the request.
    #[error("access denied")]
    Denied,
    /// Ownership rules refuse the mutation.
    #[error("operation not permitted")]
    NotPermitted,
    /// A file operation targeted a directory.
    #[error("target is a directory")]
    IsDirectory,
    /// A directory operation targeted a control file.
    #[error("target is not a directory")]
    NotDirectory,
    /// The supplied file handle is unknown.
    #[error("stale file handle")]
    BadHandle,
    /// The manager could not be reached or failed the call.
    #[error(transparent)]
    Manager(#[from] RpcError),
}

impl FsError {
    /// Errno presented to the calling process.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Invalid => libc::EINVAL,
            FsError::Denied => libc::EACCES,
            FsError::NotPermitted => libc::EPERM,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::BadHandle => libc::EBADF,
            FsError::Manager(_) => libc::EIO,
        }
    }
}

/// Kind of a projected entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Synthetic or cgroup-backed directory.
    Directory,
    /// Control file.
    File,
}

/// POSIX-shaped attributes of one projected entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryAttr {
    /// Directory or file.
    pub kind: EntryKind,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Permission bits.
    pub mode: u32,
}

impl EntryAttr {
    fn synthetic_dir() -> Self {
        Self {
            kind: EntryKind::Directory,
            uid: 0,
            gid: 0,
            mode: 0o755,
        }
    }
}

/// One name within a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name.
    pub name: String,
    /// Whether the entry projects as a directory.
    pub is_dir: bool,
}

/// Classification of a trailing path segment against live manager state.
///
/// A segment can match a child cgroup and a control key at the same time;
/// such names project with child-cgroup precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// The segment names an existing child cgroup.
    ChildCgroup,
    /// The segment names a listed control key.
    ControlFile,
    /// The segment matches both a child cgroup and a control key.
    Ambiguous,
}

/// Control-file coordinates held by an open handle.
///
/// Only the coordinates are retained. Contents, permissions, and the file's
/// continued existence are re-fetched on every read and write against the
/// handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    /// Controller name.
    pub controller: String,
    /// Cgroup path the key lives in.
    pub cgroup: String,
    /// Control key name.
    pub key: String,
}

/// Projection of manager state into POSIX shapes.
///
/// Every method is one self-contained transaction: it fetches whatever
/// manager state it needs inside the call and never reuses results across
/// calls, so decisions always reflect current ownership and membership.
pub struct Projector<M: CgroupManager> {
    manager: M,
    controllers: ControllerSet,
}

impl<M: CgroupManager> Projector<M> {
    /// Build a projector over `manager` serving `controllers`.
    #[must_use]
    pub fn new(manager: M, controllers: ControllerSet) -> Self {
        Self {
            manager,
            controllers,
        }
    }

    /// Controllers served at the top level.
    #[must_use]
    pub fn controllers(&self) -> &ControllerSet {
        &self.controllers
    }

    fn require(
        &self,
        caller: &CallerIdentity,
        controller: &str,
        cgroup: &str,
        file: Option<&str>,
        requested: Mode,
    ) -> Result<(), FsError> {
        match access::may_access(&self.manager, caller, controller, cgroup, file, requested)? {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny => Err(FsError::Denied),
        }
    }

    fn classify_leaf(
        &self,
        controller: &str,
        parent: &str,
        leaf: &str,
    ) -> Result<Option<LeafKind>, FsError> {
        let children = self.manager.list_children(controller, parent)?;
        let is_child = children.iter().any(|child| child == leaf);
        let keys = self.manager.list_keys(controller, parent)?;
        let is_key = keys.iter().any(|key| key.name == leaf);
        Ok(match (is_child, is_key) {
            (true, true) => Some(LeafKind::Ambiguous),
            (true, false) => Some(LeafKind::ChildCgroup),
            (false, true) => Some(LeafKind::ControlFile),
            (false, false) => None,
        })
    }

    fn key_owner_ids(
        &self,
        controller: &str,
        cgroup: &str,
        key: &str,
    ) -> Result<(u32, u32), FsError> {
        let keys = self.manager.list_keys(controller, cgroup)?;
        keys.iter()
            .find(|entry| entry.name == key)
            .map(|entry| (entry.uid, entry.gid))
            .ok_or(FsError::NotFound)
    }

    /// Attributes for `path`, classified and gated against current state.
    pub fn stat_path(&self, caller: &CallerIdentity, path: &str) -> Result<EntryAttr, FsError> {
        if path == "/" || path == CGROUP_ROOT {
            return Ok(EntryAttr::synthetic_dir());
        }
        let parsed = resolve::resolve(path, &self.controllers).ok_or(FsError::NotFound)?;
        let controller = parsed.controller.as_deref().ok_or(FsError::NotFound)?;
        match (parsed.cgroup.as_deref(), parsed.key.as_deref()) {
            (None, None) => Ok(EntryAttr::synthetic_dir()),
            (Some(parent), Some(leaf)) => self.stat_leaf(caller, controller, parent, leaf),
            _ => Err(FsError::NotFound),
        }
    }

    fn stat_leaf(
        &self,
        caller: &CallerIdentity,
        controller: &str,
        parent: &str,
        leaf: &str,
    ) -> Result<EntryAttr, FsError> {
        let target = join_cgroup(parent, leaf);
        match self.classify_leaf(controller, parent, leaf)? {
            Some(LeafKind::ChildCgroup) | Some(LeafKind::Ambiguous) => {
                self.require(caller, controller, &target, None, Mode::Read)?;
                let (uid, gid) = self
                    .key_owner_ids(controller, &target, MEMBERSHIP_KEY)
                    .unwrap_or((0, 0));
                Ok(EntryAttr {
                    kind: EntryKind::Directory,
                    uid,
                    gid,
                    mode: 0o755,
                })
            }
            Some(LeafKind::ControlFile) => {
                self.require(caller, controller, parent, Some(leaf), Mode::Read)?;
                let keys = self.manager.list_keys(controller, parent)?;
                let key = keys
                    .iter()
                    .find(|key| key.name == leaf)
                    .ok_or(FsError::NotFound)?;
                Ok(EntryAttr {
                    kind: EntryKind::File,
                    uid: key.uid,
                    gid: key.gid,
                    mode: key.mode & 0o7777,
                })
            }
            None => Err(FsError::NotFound),
        }
    }

    /// Directory entries for `path`, fetched fresh on every call.
    ///
    /// Child cgroups and control keys are merged into one listing; a name
    /// claimed by both sides appears once, as a directory.
    pub fn list_dir(
        &self,
        caller: &CallerIdentity,
        path: &str,
    ) -> Result<Vec<DirEntry>, FsError> {
        if path == "/" {
            return Ok(vec![DirEntry {
                name: "cgroup".to_owned(),
                is_dir: true,
            }]);
        }
        if path == CGROUP_ROOT {
            return Ok(self
                .controllers
                .iter()
                .map(|name| DirEntry {
                    name: name.to_owned(),
                    is_dir: true,
                })
                .collect());
        }

        let parsed = resolve::resolve(path, &self.controllers).ok_or(FsError::Invalid)?;
        let controller = parsed.controller.as_deref().ok_or(FsError::Invalid)?;
        let target = match (parsed.cgroup.as_deref(), parsed.key.as_deref()) {
            (None, None) => "/".to_owned(),
            (Some(parent), Some(leaf)) => {
                match self.classify_leaf(controller, parent, leaf)? {
                    Some(LeafKind::ChildCgroup) | Some(LeafKind::Ambiguous) => {}
                    Some(LeafKind::ControlFile) => return Err(FsError::NotDirectory),
                    None => return Err(FsError::NotFound),
                }
                join_cgroup(parent, leaf)
            }
            _ => return Err(FsError::Invalid),
        };

        self.require(caller, controller, &target, None, Mode::Read)?;
        let children = self.manager.list_children(controller, &target)?;
        let keys = self.manager.list_keys(controller, &target)?;
        let mut entries: Vec<DirEntry> = children
            .into_iter()
            .map(|name| DirEntry { name, is_dir: true })
            .collect();
        for key in keys {
            if entries.iter().any(|entry| entry.name == key.name) {
                continue;
            }
            entries.push(DirEntry {
                name: key.name,
                is_dir: false,
            });
        }
        Ok(entries)
    }

    /// Validate an open of `path` for `modes` and resolve its coordinates.
    pub fn open_file(
        &self,
        caller: &CallerIdentity,
        path: &str,
        modes: &[Mode],
    ) -> Result<FileTarget, FsError> {
        let parsed = resolve::resolve(path, &self.controllers).ok_or(FsError::NotFound)?;
        let (Some(controller), Some(parent), Some(leaf)) = (
            parsed.controller.as_deref(),
            parsed.cgroup.as_deref(),
            parsed.key.as_deref(),
        ) else {
            return Err(FsError::IsDirectory);
        };
        match self.classify_leaf(controller, parent, leaf)? {
            Some(LeafKind::ControlFile) => {}
            Some(LeafKind::ChildCgroup) | Some(LeafKind::Ambiguous) => {
                return Err(FsError::IsDirectory);
            }
            None => return Err(FsError::NotFound),
        }
        for mode in modes {
            self.require(caller, controller, parent, Some(leaf), *mode)?;
        }
        Ok(FileTarget {
            controller: controller.to_owned(),
            cgroup: parent.to_owned(),
            key: leaf.to_owned(),
        })
    }

    /// Read the current value of the handle's key; access re-checked now.
    pub fn read_value(
        &self,
        caller: &CallerIdentity,
        target: &FileTarget,
    ) -> Result<Vec<u8>, FsError> {
        self.require(
            caller,
            &target.controller,
            &target.cgroup,
            Some(&target.key),
            Mode::Read,
        )?;
        let value = self
            .manager
            .get_value(&target.controller, &target.cgroup, &target.key)?;
        let mut data = value.into_bytes();
        if !data.is_empty() && data.last() != Some(&b'\n') {
            data.push(b'\n');
        }
        Ok(data)
    }

    /// Apply a write to the handle's key; access re-checked now.
    ///
    /// Membership keys treat the payload as whitespace-separated pids and
    /// move each into the cgroup; only positive pids are accepted. Any
    /// other key receives the payload, less one trailing newline, as its
    /// new value. Payloads must be valid UTF-8.
    pub fn write_value(
        &self,
        caller: &CallerIdentity,
        target: &FileTarget,
        data: &[u8],
    ) -> Result<usize, FsError> {
        self.require(
            caller,
            &target.controller,
            &target.cgroup,
            Some(&target.key),
            Mode::Write,
        )?;
        let text = std::str::from_utf8(data).map_err(|_| FsError::Invalid)?;
        if MEMBERSHIP_KEYS.contains(&target.key.as_str()) {
            for token in text.split_ascii_whitespace() {
                let pid: i32 = token.parse().map_err(|_| FsError::Invalid)?;
                // Pid 0 names the process that performs the eventual kernel
                // write, which is the manager, not the caller.
                if pid <= 0 {
                    return Err(FsError::Invalid);
                }
                self.manager
                    .move_pid(&target.controller, &target.cgroup, pid)?;
            }
        } else {
            let value = text.strip_suffix('\n').unwrap_or(text);
            self.manager
                .set_value(&target.controller, &target.cgroup, &target.key, value)?;
        }
        Ok(data.len())
    }

    /// Resolve `path` as a directory target: controller plus cgroup path.
    /// The mount root and the cgroup prefix have no manager-side directory
    /// and cannot be mutated.
    fn dir_target(&self, path: &str) -> Result<(String, String), FsError> {
        if path == "/" || path == CGROUP_ROOT {
            return Err(FsError::NotPermitted);
        }
        let parsed = resolve::resolve(path, &self.controllers).ok_or(FsError::NotFound)?;
        let controller = parsed.controller.ok_or(FsError::NotFound)?;
        let cgroup = match (parsed.cgroup, parsed.key) {
            (None, None) => "/".to_owned(),
            (Some(parent), Some(leaf)) => join_cgroup(&parent, &leaf),
            _ => return Err(FsError::Invalid),
        };
        Ok((controller, cgroup))
    }

    /// Create the child cgroup `name` under `parent_path`, owned by the
    /// caller.
    pub fn make_dir(
        &self,
        caller: &CallerIdentity,
        parent_path: &str,
        name: &str,
    ) -> Result<EntryAttr, FsError> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::Invalid);
        }
        let (controller, parent) = self.dir_target(parent_path)?;
        self.require(caller, &controller, &parent, None, Mode::Write)?;
        let target = join_cgroup(&parent, name);
        self.manager
            .create(&controller, &target, caller.uid, caller.gid)?;
        Ok(EntryAttr {
            kind: EntryKind::Directory,
            uid: caller.uid,
            gid: caller.gid,
            mode: 0o755,
        })
    }

    /// Remove the child cgroup `name` under `parent_path`, descendants
    /// included.
    pub fn remove_dir(
        &self,
        caller: &CallerIdentity,
        parent_path: &str,
        name: &str,
    ) -> Result<(), FsError> {
        let (controller, parent) = self.dir_target(parent_path)?;
        match self.classify_leaf(&controller, &parent, name)? {
            Some(LeafKind::ChildCgroup) | Some(LeafKind::Ambiguous) => {}
            Some(LeafKind::ControlFile) => return Err(FsError::NotDirectory),
            None => return Err(FsError::NotFound),
        }
        self.require(caller, &controller, &parent, None, Mode::Write)?;
        self.manager.remove(&controller, &join_cgroup(&parent, name))?;
        Ok(())
    }

    /// Change the permission bits of the entry at `path`. Only an owner may
    /// do so; synthetic directories keep their fixed modes.
    pub fn set_mode(
        &self,
        caller: &CallerIdentity,
        path: &str,
        mode: u32,
    ) -> Result<(), FsError> {
        let (controller, parent, leaf) = self.mutable_leaf(path)?;
        let target = join_cgroup(&parent, &leaf);
        let owner_uid = match self.classify_leaf(&controller, &parent, &leaf)? {
            Some(LeafKind::ChildCgroup) | Some(LeafKind::Ambiguous) => {
                self.key_owner_ids(&controller, &target, MEMBERSHIP_KEY)?.0
            }
            Some(LeafKind::ControlFile) => self.key_owner_ids(&controller, &parent, &leaf)?.0,
            None => return Err(FsError::NotFound),
        };
        if !access::is_privileged_over(caller.uid, owner_uid) {
            return Err(FsError::NotPermitted);
        }
        self.manager.chmod(&controller, &target, mode & 0o7777)?;
        Ok(())
    }

    /// Change the ownership of the child cgroup at `path`. Only an owner
    /// may do so, and only directories carry ownership the manager will
    /// reassign.
    pub fn set_owner(
        &self,
        caller: &CallerIdentity,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), FsError> {
        let (controller, parent, leaf) = self.mutable_leaf(path)?;
        let target = join_cgroup(&parent, &leaf);
        match self.classify_leaf(&controller, &parent, &leaf)? {
            Some(LeafKind::ChildCgroup) | Some(LeafKind::Ambiguous) => {}
            Some(LeafKind::ControlFile) => return Err(FsError::NotPermitted),
            None => return Err(FsError::NotFound),
        }
        let (current_uid, current_gid) =
            self.key_owner_ids(&controller, &target, MEMBERSHIP_KEY)?;
        if !access::is_privileged_over(caller.uid, current_uid) {
            return Err(FsError::NotPermitted);
        }
        self.manager.chown(
            &controller,
            &target,
            uid.unwrap_or(current_uid),
            gid.unwrap_or(current_gid),
        )?;
        Ok(())
    }

    /// Accept zero-length truncation of a writable control file. Control
    /// files have no stored size, so any other length is invalid.
    pub fn truncate(
        &self,
        caller: &CallerIdentity,
        path: &str,
        size: u64,
    ) -> Result<(), FsError> {
        if size != 0 {
            return Err(FsError::Invalid);
        }
        self.open_file(caller, path, &[Mode::Write]).map(|_| ())
    }

    fn mutable_leaf(&self, path: &str) -> Result<(String, String, String), FsError> {
        if path == "/" || path == CGROUP_ROOT {
            return Err(FsError::NotPermitted);
        }
        let parsed = resolve::resolve(path, &self.controllers).ok_or(FsError::NotFound)?;
        match (parsed.controller, parsed.cgroup, parsed.key) {
            (Some(controller), Some(parent), Some(leaf)) => Ok((controller, parent, leaf)),
            (Some(_), None, None) => Err(FsError::NotPermitted),
            _ => Err(FsError::NotFound),
        }
    }
}

#[derive(Debug, Default)]
struct InodeTable {
    by_inode: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next_inode: u64,
}

impl InodeTable {
    fn new() -> Self {
        Self {
            by_inode: HashMap::new(),
            by_path: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        }
    }

    fn insert(&mut self, path: &str) -> u64 {
        if let Some(existing) = self.by_path.get(path) {
            return *existing;
        }
        let inode = if path == "/" { ROOT_INODE } else { self.next_inode };
        if inode == self.next_inode {
            self.next_inode = self.next_inode.saturating_add(1);
        }
        self.by_inode.insert(inode, path.to_owned());
        self.by_path.insert(path.to_owned(), inode);
        inode
    }

    fn path_for(&self, inode: u64) -> Option<&String> {
        self.by_inode.get(&inode)
    }

    fn remove(&mut self, path: &str) {
        if let Some(inode) = self.by_path.remove(path) {
            self.by_inode.remove(&inode);
        }
    }
}

fn child_path(parent_path: &str, name: &str) -> String {
    if parent_path == "/" {
        format!("/{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}

/// FUSE adapter wiring the projector to the kernel callback surface.
///
/// The inode table and the handle map are the only state held here, and
/// both hold framework bookkeeping, never manager data.
pub struct CgroupFs<M: CgroupManager> {
    projector: Projector<M>,
    inodes: Mutex<InodeTable>,
    handles: Mutex<HashMap<u64, FileTarget>>,
    next_handle: AtomicU64,
}

impl<M: CgroupManager> CgroupFs<M> {
    /// Build the filesystem over `manager` and the discovered controllers.
    #[must_use]
    pub fn new(manager: M, controllers: ControllerSet) -> Self {
        let mut inodes = InodeTable::new();
        inodes.insert("/");
        Self {
            projector: Projector::new(manager, controllers),
            inodes: Mutex::new(inodes),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn caller(req: &fuser::Request<'_>) -> CallerIdentity {
        CallerIdentity {
            pid: req.pid() as i32,
            uid: req.uid(),
            gid: req.gid(),
        }
    }

    fn resolve_inode_path(&self, inode: u64) -> Option<String> {
        let inodes = self.inodes.lock().expect("inode lock");
        inodes.path_for(inode).cloned()
    }

    fn attr_for(inode: u64, attr: &EntryAttr) -> fuser::FileAttr {
        let now = SystemTime::now();
        fuser::FileAttr {
            ino: inode,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: match attr.kind {
                EntryKind::Directory => fuser::FileType::Directory,
                EntryKind::File => fuser::FileType::RegularFile,
            },
            perm: (attr.mode & 0o7777) as u16,
            nlink: 1,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            flags: 0,
            blksize: 512,
        }
    }
}

impl<M: CgroupManager> fuser::Filesystem for CgroupFs<M> {
    fn lookup(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let parent_path = match self.resolve_inode_path(parent) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let name = name.to_string_lossy();
        let path = child_path(&parent_path, &name);
        let caller = Self::caller(req);
        match self.projector.stat_path(&caller, &path) {
            Ok(attr) => {
                let inode = {
                    let mut inodes = self.inodes.lock().expect("inode lock");
                    inodes.insert(&path)
                };
                reply.entry(&TTL, &Self::attr_for(inode, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(
        &mut self,
        req: &fuser::Request<'_>,
        inode: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let caller = Self::caller(req);
        match self.projector.stat_path(&caller, &path) {
            Ok(attr) => reply.attr(&TTL, &Self::attr_for(inode, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &mut self,
        req: &fuser::Request<'_>,
        inode: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let caller = Self::caller(req);
        if let Some(mode) = mode {
            if let Err(err) = self.projector.set_mode(&caller, &path, mode) {
                reply.error(err.errno());
                return;
            }
        }
        if uid.is_some() || gid.is_some() {
            if let Err(err) = self.projector.set_owner(&caller, &path, uid, gid) {
                reply.error(err.errno());
                return;
            }
        }
        if let Some(size) = size {
            if let Err(err) = self.projector.truncate(&caller, &path, size) {
                reply.error(err.errno());
                return;
            }
        }
        match self.projector.stat_path(&caller, &path) {
            Ok(attr) => reply.attr(&TTL, &Self::attr_for(inode, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        req: &fuser::Request<'_>,
        inode: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let caller = Self::caller(req);
        let entries = match self.projector.list_dir(&caller, &path) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };
        let mut listing = Vec::with_capacity(entries.len().saturating_add(2));
        listing.push((inode, fuser::FileType::Directory, ".".to_owned()));
        listing.push((ROOT_INODE, fuser::FileType::Directory, "..".to_owned()));
        for entry in entries {
            let entry_path = child_path(&path, &entry.name);
            let entry_inode = {
                let mut inodes = self.inodes.lock().expect("inode lock");
                inodes.insert(&entry_path)
            };
            let file_type = if entry.is_dir {
                fuser::FileType::Directory
            } else {
                fuser::FileType::RegularFile
            };
            listing.push((entry_inode, file_type, entry.name));
        }
        let start = offset.max(0) as usize;
        for (idx, (entry_inode, file_type, name)) in
            listing.into_iter().enumerate().skip(start)
        {
            if reply.add(entry_inode, (idx + 1) as i64, file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn opendir(
        &mut self,
        _req: &fuser::Request<'_>,
        _inode: u64,
        _flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        reply.opened(0, 0);
    }

    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _inode: u64,
        _fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    fn open(
        &mut self,
        req: &fuser::Request<'_>,
        inode: u64,
        flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        let path = match self.resolve_inode_path(inode) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let accmode = flags & libc::O_ACCMODE;
        let modes: &[Mode] = if accmode == libc::O_RDONLY {
            &[Mode::Read]
        } else if accmode == libc::O_WRONLY {
            &[Mode::Write]
        } else {
            &[Mode::Read, Mode::Write]
        };
        let caller = Self::caller(req);
        match self.projector.open_file(&caller, &path, modes) {
            Ok(target) => {
                let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
                self.handles
                    .lock()
                    .expect("handle lock")
                    .insert(handle, target);
                // Direct IO keeps reads out of the page cache; values change
                // under the kernel's feet.
                reply.opened(handle, fuser::consts::FOPEN_DIRECT_IO);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        req: &fuser::Request<'_>,
        _inode: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let target = {
            let handles = self.handles.lock().expect("handle lock");
            handles.get(&fh).cloned()
        };
        let Some(target) = target else {
            reply.error(FsError::BadHandle.errno());
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let caller = Self::caller(req);
        match self.projector.read_value(&caller, &target) {
            Ok(data) => {
                let offset = offset as usize;
                if offset >= data.len() {
                    reply.data(&[]);
                    return;
                }
                let end = offset.saturating_add(size as usize).min(data.len());
                reply.data(&data[offset..end]);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn write(
        &mut self,
        req: &fuser::Request<'_>,
        _inode: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let target = {
            let handles = self.handles.lock().expect("handle lock");
            handles.get(&fh).cloned()
        };
        let Some(target) = target else {
            reply.error(FsError::BadHandle.errno());
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let caller = Self::caller(req);
        match self.projector.write_value(&caller, &target, data) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _inode: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let removed = {
            let mut handles = self.handles.lock().expect("handle lock");
            handles.remove(&fh)
        };
        if removed.is_none() {
            reply.error(FsError::BadHandle.errno());
            return;
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        let parent_path = match self.resolve_inode_path(parent) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let name = name.to_string_lossy();
        let caller = Self::caller(req);
        match self.projector.make_dir(&caller, &parent_path, &name) {
            Ok(attr) => {
                let path = child_path(&parent_path, &name);
                let inode = {
                    let mut inodes = self.inodes.lock().expect("inode lock");
                    inodes.insert(&path)
                };
                reply.entry(&TTL, &Self::attr_for(inode, &attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rmdir(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let parent_path = match self.resolve_inode_path(parent) {
            Some(path) => path,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let name = name.to_string_lossy();
        let caller = Self::caller(req);
        match self.projector.remove_dir(&caller, &parent_path, &name) {
            Ok(()) => {
                let path = child_path(&parent_path, &name);
                self.inodes.lock().expect("inode lock").remove(&path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }
}

/// Map `-o` style option strings onto typed FUSE mount options. Unknown
/// options pass through verbatim.
#[must_use]
pub fn parse_mount_options(raw: &[String]) -> Vec<fuser::MountOption> {
    let mut options = Vec::new();
    for group in raw {
        for option in group.split(',') {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            options.push(match option {
                "allow_other" => fuser::MountOption::AllowOther,
                "allow_root" => fuser::MountOption::AllowRoot,
                "auto_unmount" => fuser::MountOption::AutoUnmount,
                "default_permissions" => fuser::MountOption::DefaultPermissions,
                "ro" => fuser::MountOption::RO,
                "rw" => fuser::MountOption::RW,
                "exec" => fuser::MountOption::Exec,
                "noexec" => fuser::MountOption::NoExec,
                "suid" => fuser::MountOption::Suid,
                "nosuid" => fuser::MountOption::NoSuid,
                "dev" => fuser::MountOption::Dev,
                "nodev" => fuser::MountOption::NoDev,
                "atime" => fuser::MountOption::Atime,
                "noatime" => fuser::MountOption::NoAtime,
                "dirsync" => fuser::MountOption::DirSync,
                "sync" => fuser::MountOption::Sync,
                "async" => fuser::MountOption::Async,
                other => fuser::MountOption::CUSTOM(other.to_owned()),
            });
        }
    }
    options
}

/// Mount `filesystem` at `mountpoint` and serve until unmounted.
pub fn mount<M: CgroupManager>(
    filesystem: CgroupFs<M>,
    mountpoint: &Path,
    raw_options: &[String],
) -> anyhow::Result<()> {
    let mut options = vec![
        fuser::MountOption::FSName("cgfs".to_owned()),
        fuser::MountOption::AutoUnmount,
    ];
    options.extend(parse_mount_options(raw_options));
    fuser::mount2(filesystem, mountpoint, &options)
        .with_context(|| format!("mount {}", mountpoint.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_table_reserves_the_root() {
        let mut table = InodeTable::new();
        assert_eq!(table.insert("/"), ROOT_INODE);
        assert_eq!(table.insert("/"), ROOT_INODE);
    }

    #[test]
    fn inode_table_reuses_known_paths() {
        let mut table = InodeTable::new();
        table.insert("/");
        let first = table.insert("/cgroup/freezer");
        let second = table.insert("/cgroup/freezer");
        assert_eq!(first, second);
        assert_eq!(table.path_for(first).map(String::as_str), Some("/cgroup/freezer"));
    }

    #[test]
    fn inode_table_forgets_removed_paths() {
        let mut table = InodeTable::new();
        table.insert("/");
        let inode = table.insert("/cgroup/freezer/jobs");
        table.remove("/cgroup/freezer/jobs");
        assert_eq!(table.path_for(inode), None);
        let reissued = table.insert("/cgroup/freezer/jobs");
        assert_ne!(reissued, inode);
    }

    #[test]
    fn error_to_errno_mapping_is_stable() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::Invalid.errno(), libc::EINVAL);
        assert_eq!(FsError::Denied.errno(), libc::EACCES);
        assert_eq!(FsError::NotPermitted.errno(), libc::EPERM);
        assert_eq!(FsError::IsDirectory.errno(), libc::EISDIR);
        assert_eq!(FsError::NotDirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::BadHandle.errno(), libc::EBADF);
        let manager = FsError::Manager(RpcError::CallFailed {
            method: "list_keys",
            message: "manager unavailable".to_owned(),
        });
        assert_eq!(manager.errno(), libc::EIO);
    }

    #[test]
    fn mount_options_map_known_names() {
        let raw = vec!["allow_other,ro".to_owned(), "nonempty".to_owned()];
        let options = parse_mount_options(&raw);
        assert_eq!(
            options,
            vec![
                fuser::MountOption::AllowOther,
                fuser::MountOption::RO,
                fuser::MountOption::CUSTOM("nonempty".to_owned()),
            ]
        );
    }

    #[test]
    fn mount_options_skip_empty_fragments() {
        let raw = vec![",allow_other,,".to_owned()];
        let options = parse_mount_options(&raw);
        assert_eq!(options, vec![fuser::MountOption::AllowOther]);
    }

    #[test]
    fn child_paths_join_without_doubled_slashes() {
        assert_eq!(child_path("/", "cgroup"), "/cgroup");
        assert_eq!(child_path("/cgroup", "freezer"), "/cgroup/freezer");
        assert_eq!(child_path("/cgroup/freezer", "jobs"), "/cgroup/freezer/jobs");
    }
}
