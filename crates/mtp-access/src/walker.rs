//! Breadth-first traversal of a device's content tree.
//!
//! [`walk`] yields one [`WalkEntry`] per expanded container: its path, the storages and
//! directories below it, and the files below it, each sorted by full path. Directories are
//! expanded in the order they were yielded. The walk is lazy; nothing is listed until the
//! iterator is pulled.
//!
//! Two optional callbacks steer it:
//!
//! - `on_visit` sees every child as it is listed. Returning `false` cancels the walk at once;
//!   the level being listed is discarded and [`Walk::is_cancelled`] turns true.
//! - `on_error` sees every listing failure. `true` skips that container and carries on,
//!   `false` cancels. Without it, the failure is yielded as an `Err` and the walk ends.

use log::{debug, info};
use std::collections::VecDeque;

use crate::content::{ContentKind, ContentNode};
use crate::device::Device;
use crate::error::AccessError;

type VisitFn<'a> = Box<dyn FnMut(&ContentNode) -> bool + 'a>;
type ErrorFn<'a> = Box<dyn FnMut(&AccessError) -> bool + 'a>;

/// One expanded container.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Full path of the expanded node.
    pub path: String,
    /// Storage and directory children, sorted by full path.
    pub directories: Vec<ContentNode>,
    /// File children, sorted by full path.
    pub files: Vec<ContentNode>,
}

impl WalkEntry {
    /// Number of children listed in this entry.
    pub fn len(&self) -> usize {
        self.directories.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }
}

/// Starts a walk at `root_path` (composite- or storage-rooted). A path that does not resolve
/// gives an empty walk.
pub fn walk<'a>(device: &Device, root_path: &str) -> Walk<'a> {
    Walk {
        start: Some((device.root(), root_path.to_string())),
        queue: VecDeque::new(),
        on_visit: None,
        on_error: None,
        cancelled: false,
        finished: false,
    }
}

/// Lazy iterator returned by [`walk`].
pub struct Walk<'a> {
    /// Device root and the path still to resolve. Taken on the first pull.
    start: Option<(ContentNode, String)>,
    queue: VecDeque<ContentNode>,
    on_visit: Option<VisitFn<'a>>,
    on_error: Option<ErrorFn<'a>>,
    cancelled: bool,
    finished: bool,
}

/// What to do after a failure.
enum Recovery {
    /// Skip the failed node and keep walking.
    Skip,
    /// Stop, yielding this item (if any) last.
    Stop(Option<Result<WalkEntry, AccessError>>),
}

impl<'a> Walk<'a> {
    pub fn on_visit(mut self, callback: impl FnMut(&ContentNode) -> bool + 'a) -> Self {
        self.on_visit = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnMut(&AccessError) -> bool + 'a) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// True once a callback stopped the walk.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.finished = true;
        self.queue.clear();
        info!("Walk cancelled");
    }

    fn recover(&mut self, error: AccessError) -> Recovery {
        match self.on_error.as_mut() {
            Some(callback) => {
                if callback(&error) {
                    debug!("Walk skipping a node after: {}", error);
                    Recovery::Skip
                } else {
                    self.cancel();
                    Recovery::Stop(None)
                }
            }
            None => {
                self.finished = true;
                self.queue.clear();
                Recovery::Stop(Some(Err(error)))
            }
        }
    }

    /// Lists `node` into an entry. `Ok(None)` means `on_visit` cancelled.
    fn expand(&mut self, node: &ContentNode) -> Result<Option<WalkEntry>, AccessError> {
        let mut directories = Vec::new();
        let mut files = Vec::new();

        for child in node.get_children()? {
            let child = child?;
            if let Some(callback) = self.on_visit.as_mut() {
                if !callback(&child) {
                    return Ok(None);
                }
            }
            match child.kind() {
                ContentKind::Storage | ContentKind::Directory => directories.push(child),
                ContentKind::File => files.push(child),
                ContentKind::Undefined | ContentKind::DeviceRoot => {
                    debug!("Walk ignoring {} of undefined kind", child.full_path());
                }
            }
        }

        directories.sort_by(|a, b| a.full_path().cmp(b.full_path()));
        files.sort_by(|a, b| a.full_path().cmp(b.full_path()));
        Ok(Some(WalkEntry {
            path: node.full_path().to_string(),
            directories,
            files,
        }))
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<WalkEntry, AccessError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((root, path)) = self.start.take() {
            match root.get_path(&path) {
                Ok(Some(node)) => self.queue.push_back(node),
                Ok(None) => {
                    debug!("Walk root {} not found", path);
                    self.finished = true;
                }
                Err(e) => {
                    if let Recovery::Stop(item) = self.recover(e) {
                        return item;
                    }
                }
            }
        }

        loop {
            if self.finished {
                return None;
            }
            let Some(node) = self.queue.pop_front() else {
                self.finished = true;
                return None;
            };

            match self.expand(&node) {
                Ok(Some(entry)) => {
                    self.queue.extend(entry.directories.iter().cloned());
                    return Some(Ok(entry));
                }
                Ok(None) => {
                    self.cancel();
                    return None;
                }
                Err(e) => match self.recover(e) {
                    Recovery::Skip => continue,
                    Recovery::Stop(item) => return item,
                },
            }
        }
    }
}

impl std::iter::FusedIterator for Walk<'_> {}
