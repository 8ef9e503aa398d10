//! Reference-counted file and inode handles.
//!
//! The file system proper lives outside this kernel; the process core
//! only needs the sharing semantics at its boundary: fork duplicates
//! every open file and takes another reference on the working
//! directory, exit releases them. Duplication is `Clone` and release is
//! `Drop`, so the lifecycle code cannot leak or double-free a
//! reference.

use crate::lazy::SyncLazy;
use alloc::sync::Arc;

#[derive(Clone, Debug)]
pub struct File {
    pub inner: Arc<VFile>,
}

#[derive(Debug)]
pub struct VFile {
    pub readable: bool,
    pub writable: bool,
}

/// An in-core inode reference. Dropping the last clone releases the
/// inode.
#[derive(Clone, Debug)]
pub struct Inode {
    pub inner: Arc<IData>,
}

#[derive(Debug)]
pub struct IData {
    pub inum: u32,
}

const ROOTINO: u32 = 1;

static ROOT: SyncLazy<Inode> = SyncLazy::new(|| Inode {
    inner: Arc::new(IData { inum: ROOTINO }),
});

impl Inode {
    /// The "/" inode, handed to the first process as its working
    /// directory and inherited from there by everyone else.
    pub fn root() -> Inode {
        ROOT.clone()
    }
}

/// Force the root inode into existence. Runs from process context on
/// the first return through fork_ret, where a fuller file system would
/// read its superblock.
pub fn init() {
    SyncLazy::force(&ROOT);
}
