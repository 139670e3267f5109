//! Content nodes: one entry of a device's tree, plus resolution and mutation on top of it.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use super::kind::ContentKind;
use super::path;
use crate::backend::{EntryStream, ObjectId, RawEntry, SessionHandle, SpaceInfo};
use crate::error::AccessError;
use crate::transfer::ProgressFn;

/// Serializable snapshot of a node's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInfo {
    pub name: String,
    pub full_path: String,
    pub kind: ContentKind,
    /// Byte size for files, -1 otherwise.
    pub size: i64,
    pub modified: Option<DateTime<Utc>>,
}

/// One entry in a device's content tree.
///
/// `full_path` is always the parent's full path, `/`, and `name`. Nodes share the device's
/// session, so they stop working once the device is closed.
#[derive(Clone)]
pub struct ContentNode {
    name: String,
    full_path: String,
    kind: ContentKind,
    size: i64,
    modified: Option<DateTime<Utc>>,
    id: ObjectId,
    handle: Arc<SessionHandle>,
    removed: bool,
}

impl ContentNode {
    pub(crate) fn device_root(handle: Arc<SessionHandle>) -> Self {
        let name = handle.identity().composite_name.clone();
        let id = handle.root_id().clone();
        Self {
            full_path: name.clone(),
            name,
            kind: ContentKind::DeviceRoot,
            size: -1,
            modified: None,
            id,
            handle,
            removed: false,
        }
    }

    fn from_raw(parent_path: &str, raw: RawEntry, handle: Arc<SessionHandle>) -> Self {
        let is_file = raw.kind == ContentKind::File;
        let size = match raw.size {
            Some(size) if is_file => i64::try_from(size).unwrap_or(i64::MAX),
            _ => -1,
        };
        Self {
            full_path: path::join(parent_path, &raw.name),
            name: raw.name,
            kind: raw.kind,
            size,
            modified: if is_file { raw.modified } else { None },
            id: raw.id,
            handle,
            removed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Byte size for files, -1 for everything else.
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Last modification time. Only files carry one.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn info(&self) -> ContentInfo {
        ContentInfo {
            name: self.name.clone(),
            full_path: self.full_path.clone(),
            kind: self.kind,
            size: self.size,
            modified: self.modified,
        }
    }

    fn ensure_live(&self) -> Result<(), AccessError> {
        if self.removed {
            return Err(AccessError::backend(format!("{} has been removed", self.full_path)));
        }
        Ok(())
    }

    fn ensure_accepts_content(&self, name: &str) -> Result<(), AccessError> {
        self.ensure_live()?;
        if !self.kind.accepts_content() {
            return Err(AccessError::backend(format!(
                "cannot add {name} to {}: not a storage or directory",
                self.full_path
            )));
        }
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(AccessError::backend(format!("invalid entry name '{name}'")));
        }
        Ok(())
    }

    /// Lazily lists the direct children.
    ///
    /// The device root yields its storages sorted by name; files and undefined entries yield
    /// nothing. A listing failure shows up as a final `Err` item.
    pub fn get_children(&self) -> Result<Children, AccessError> {
        self.ensure_live()?;
        let session = self.handle.session()?;

        let entries: EntryStream = match self.kind {
            ContentKind::DeviceRoot => {
                let mut storages = session.list_storages().map_err(|e| e.context("list storages"))?;
                storages.sort_by(|a, b| a.name.cmp(&b.name));
                Box::new(storages.into_iter().map(Ok::<_, AccessError>))
            }
            ContentKind::Storage | ContentKind::Directory => session
                .list_children(&self.id)
                .map_err(|e| e.context(&format!("list {}", self.full_path)))?,
            ContentKind::File | ContentKind::Undefined => Box::new(std::iter::empty()),
        };

        Ok(Children {
            parent_path: self.full_path.clone(),
            handle: Arc::clone(&self.handle),
            entries: Some(entries),
        })
    }

    /// First direct child whose name matches exactly (case-sensitive).
    pub fn get_child(&self, name: &str) -> Result<Option<ContentNode>, AccessError> {
        for child in self.get_children()? {
            let child = child?;
            if child.name == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Resolves a path against this node.
    ///
    /// A path starting with the device's composite name resolves from the device root. A path
    /// starting with this node's own name has that segment dropped. Everything else is relative.
    /// Any missing segment makes the whole result `None`.
    pub fn get_path(&self, path: &str) -> Result<Option<ContentNode>, AccessError> {
        self.ensure_live()?;
        let mut segments = path::segments(path);

        if self.kind != ContentKind::DeviceRoot
            && path::strip_leading(&mut segments, &self.handle.identity().composite_name)
        {
            return Self::device_root(Arc::clone(&self.handle)).resolve(segments);
        }

        path::strip_leading(&mut segments, &self.name);
        self.resolve(segments)
    }

    fn resolve(&self, segments: Vec<String>) -> Result<Option<ContentNode>, AccessError> {
        let mut current = self.clone();
        for segment in segments {
            match current.get_child(&segment)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Creates a subdirectory and returns its node.
    pub fn create_content(&self, name: &str) -> Result<ContentNode, AccessError> {
        self.ensure_accepts_content(name)?;
        let child_path = path::join(&self.full_path, name);

        if self.get_child(name)?.is_some() {
            return Err(AccessError::already_exists(child_path));
        }

        self.handle
            .session()?
            .create_directory(&self.id, name)
            .map_err(|e| e.context(&format!("create {child_path}")))?;
        info!("Created directory {}", child_path);

        self.get_child(name)?
            .ok_or_else(|| AccessError::backend(format!("created {child_path} but cannot find it")))
    }

    /// Uploads a local file as a child named `name`, replacing an existing file of that name.
    pub fn upload_file(&self, name: &str, local_source: impl AsRef<Path>) -> Result<u64, AccessError> {
        let local_source = local_source.as_ref();
        let mut file = File::open(local_source)
            .map_err(|e| AccessError::backend(format!("cannot open {}: {}", local_source.display(), e)))?;
        let size = file.metadata()?.len();
        self.upload_stream(name, &mut file, size, None)
    }

    /// Uploads `size` bytes from `source` as a child named `name`.
    ///
    /// An existing file of that name is replaced; an existing directory is `AlreadyExists`.
    /// A failed upload may leave a partial file behind.
    pub fn upload_stream(
        &self,
        name: &str,
        source: &mut dyn Read,
        size: u64,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError> {
        self.ensure_accepts_content(name)?;
        let child_path = path::join(&self.full_path, name);

        if let Some(mut existing) = self.get_child(name)? {
            if existing.kind != ContentKind::File {
                return Err(AccessError::already_exists(child_path));
            }
            debug!("Replacing existing file {}", child_path);
            existing.remove()?;
        }

        let written = self
            .handle
            .session()?
            .upload(&self.id, name, source, size, progress)
            .map_err(|e| e.context(&format!("upload {child_path}")))?;
        info!("Uploaded {} bytes to {}", written, child_path);
        Ok(written)
    }

    /// Downloads this file to a local path, overwriting it.
    pub fn download_file(&self, local_destination: impl AsRef<Path>) -> Result<u64, AccessError> {
        self.ensure_file()?;
        let local_destination = local_destination.as_ref();
        let file = File::create(local_destination)
            .map_err(|e| AccessError::backend(format!("cannot create {}: {}", local_destination.display(), e)))?;
        let mut writer = BufWriter::new(file);
        let read = self.download_stream(&mut writer, None)?;
        writer.flush()?;
        Ok(read)
    }

    /// Streams this file's bytes into `sink`.
    pub fn download_stream(&self, sink: &mut dyn Write, progress: Option<ProgressFn<'_>>) -> Result<u64, AccessError> {
        self.ensure_file()?;
        let read = self
            .handle
            .session()?
            .download(&self.id, self.size.max(0) as u64, sink, progress)
            .map_err(|e| e.context(&format!("download {}", self.full_path)))?;
        debug!("Downloaded {} bytes from {}", read, self.full_path);
        Ok(read)
    }

    fn ensure_file(&self) -> Result<(), AccessError> {
        self.ensure_live()?;
        if self.kind != ContentKind::File {
            return Err(AccessError::backend(format!("{} is not a file", self.full_path)));
        }
        Ok(())
    }

    /// Deletes this entry and, for directories and storages, everything below it.
    ///
    /// A storage cannot be deleted itself, so removing one empties it and leaves the node usable.
    /// Removing something already gone is a no-op. Any other removed node only answers its
    /// accessors afterwards; other operations fail.
    pub fn remove(&mut self) -> Result<(), AccessError> {
        if self.removed {
            return Ok(());
        }
        match self.kind {
            ContentKind::DeviceRoot => {
                return Err(AccessError::backend(format!("cannot remove device root {}", self.full_path)));
            }
            ContentKind::Storage => return self.clear_storage(),
            _ => {}
        }

        self.handle
            .session()?
            .remove(&self.id)
            .map_err(|e| e.context(&format!("remove {}", self.full_path)))?;
        self.removed = true;
        info!("Removed {}", self.full_path);
        Ok(())
    }

    fn clear_storage(&self) -> Result<(), AccessError> {
        // Collect first: a listing must be drained before the next call on the session.
        let children = self.get_children()?.collect::<Result<Vec<_>, _>>()?;
        let count = children.len();
        for mut child in children {
            child.remove()?;
        }
        info!("Emptied storage {} ({} top-level entries)", self.full_path, count);
        Ok(())
    }

    /// Total byte size of this file, or of all files below this container.
    pub fn total_size(&self) -> Result<u64, AccessError> {
        if self.kind == ContentKind::File {
            return Ok(self.size.max(0) as u64);
        }

        let mut total = 0u64;
        let mut pending = vec![self.clone()];
        while let Some(node) = pending.pop() {
            for child in node.get_children()? {
                let child = child?;
                match child.kind {
                    ContentKind::File => total += child.size.max(0) as u64,
                    ContentKind::Storage | ContentKind::Directory => pending.push(child),
                    _ => {}
                }
            }
        }
        Ok(total)
    }

    /// Capacity and free space, for storage nodes only.
    pub fn space_info(&self) -> Result<Option<SpaceInfo>, AccessError> {
        self.ensure_live()?;
        if self.kind != ContentKind::Storage {
            return Ok(None);
        }
        self.handle.session()?.space_info(&self.id)
    }
}

impl std::fmt::Display for ContentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind.code())
    }
}

impl std::fmt::Debug for ContentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentNode")
            .field("full_path", &self.full_path)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("removed", &self.removed)
            .finish()
    }
}

/// Lazy sequence of a node's children.
///
/// Ends with `None` when the listing is exhausted, or after yielding a single `Err` if the
/// backend failed part-way. Nothing is yielded after an error.
pub struct Children {
    parent_path: String,
    handle: Arc<SessionHandle>,
    entries: Option<EntryStream>,
}

impl Iterator for Children {
    type Item = Result<ContentNode, AccessError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;
        match entries.next() {
            Some(Ok(raw)) => Some(Ok(ContentNode::from_raw(&self.parent_path, raw, Arc::clone(&self.handle)))),
            Some(Err(e)) => {
                self.entries = None;
                Some(Err(e.context(&format!("list {}", self.parent_path))))
            }
            None => {
                self.entries = None;
                None
            }
        }
    }
}

impl std::iter::FusedIterator for Children {}
