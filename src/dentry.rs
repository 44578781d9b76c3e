use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use parking_lot::RwLock;

use crate::errno::Errno;
use crate::inode::Inode;

/// A cached directory-entry node naming an inode within a parent directory.
///
/// Dentries form a tree per mount: parents own their children (`Arc`) and
/// children point back with a `Weak` link, so dropping a subtree tears it
/// down post-order. A dentry holds one reference on its inode for its entire
/// lifetime. Creation does not attach; callers link nodes explicitly with
/// [`Dentry::add_child`], which keeps half-initialized nodes unpublished.
#[derive(Debug)]
pub struct Dentry {
    inode: Arc<Inode>,
    /// `None` for a mount root, whose name is `"/"`.
    name_and_parent: RwLock<Option<(String, Weak<Dentry>)>>,
    children: Mutex<Vec<Arc<Dentry>>>,
}

impl Dentry {
    /// Creates the root dentry of a mount.
    pub(crate) fn new_root(inode: Arc<Inode>) -> Arc<Dentry> {
        Arc::new(Dentry {
            inode,
            name_and_parent: RwLock::new(None),
            children: Mutex::new(Vec::new()),
        })
    }

    /// Creates a detached dentry. The caller attaches it where it belongs.
    pub(crate) fn new(name: &str, inode: Arc<Inode>) -> Arc<Dentry> {
        Arc::new(Dentry {
            inode,
            name_and_parent: RwLock::new(Some((name.to_string(), Weak::new()))),
            children: Mutex::new(Vec::new()),
        })
    }

    /// Component name; `"/"` for a mount root.
    pub fn name(&self) -> String {
        match self.name_and_parent.read().as_ref() {
            Some((name, _)) => name.clone(),
            None => String::from("/"),
        }
    }

    /// Parent dentry, or `None` for a mount root or a detached node.
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.name_and_parent
            .read()
            .as_ref()
            .and_then(|(_, parent)| parent.upgrade())
    }

    /// The inode this dentry names.
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// Inserts `child` at the head of this dentry's child list.
    pub(crate) fn add_child(self: &Arc<Self>, child: &Arc<Dentry>) {
        let mut children = self.children.lock();
        {
            let mut slot = child.name_and_parent.write();
            if let Some((_, parent)) = slot.as_mut() {
                *parent = Arc::downgrade(self);
            }
        }
        children.insert(0, child.clone());
    }

    /// Splices `child` out of the child list by identity.
    ///
    /// Detaches the child but does not free it; it lives until its last
    /// reference drops.
    pub(crate) fn remove_child(&self, child: &Arc<Dentry>) -> bool {
        let mut children = self.children.lock();
        let Some(pos) = children.iter().position(|c| Arc::ptr_eq(c, child)) else {
            return false;
        };
        children.remove(pos);
        let mut slot = child.name_and_parent.write();
        if let Some((_, parent)) = slot.as_mut() {
            *parent = Weak::new();
        }
        true
    }

    /// Looks up a child by name under this dentry's lock.
    pub fn find_child(&self, name: &str) -> Option<Arc<Dentry>> {
        let children = self.children.lock();
        children.iter().find(|c| c.name() == name).cloned()
    }

    /// Finds a child by name, or atomically materializes one.
    ///
    /// The whole find-or-insert runs under this dentry's lock so that
    /// concurrent walks cannot create duplicate sibling names. Returns the
    /// child and whether it was freshly created.
    pub(crate) fn find_or_insert(
        self: &Arc<Self>,
        name: &str,
        make: impl FnOnce() -> Arc<Dentry>,
    ) -> (Arc<Dentry>, bool) {
        let mut children = self.children.lock();
        if let Some(existing) = children.iter().find(|c| c.name() == name) {
            return (existing.clone(), false);
        }
        let child = make();
        {
            let mut slot = child.name_and_parent.write();
            if let Some((_, parent)) = slot.as_mut() {
                *parent = Arc::downgrade(self);
            }
        }
        children.insert(0, child.clone());
        (child, true)
    }

    /// Snapshot of the current children, head first.
    pub fn children(&self) -> Vec<Arc<Dentry>> {
        self.children.lock().clone()
    }

    /// Removes this dentry from its parent, if attached.
    pub(crate) fn detach(self: &Arc<Self>) -> bool {
        match self.parent() {
            Some(parent) => parent.remove_child(self),
            None => false,
        }
    }

    /// Moves `child` under `new_parent` with a new name.
    ///
    /// Fails with `EEXIST` when the target name is already taken. The
    /// subtree below `child` moves with it.
    pub(crate) fn reattach(
        child: &Arc<Dentry>,
        new_name: &str,
        new_parent: &Arc<Dentry>,
    ) -> Result<(), Errno> {
        if new_parent
            .children
            .lock()
            .iter()
            .any(|c| c.name() == new_name)
        {
            return Err(Errno::EEXIST);
        }
        child.detach();
        {
            let mut slot = child.name_and_parent.write();
            *slot = Some((new_name.to_string(), Weak::new()));
        }
        new_parent.add_child(child);
        Ok(())
    }
}

/// Destroys the tree rooted at `root`, children before parents.
///
/// Clears every child list post-order so that stragglers holding a node
/// reference see an emptied subtree rather than a stale one.
pub(crate) fn destroy_tree(root: &Arc<Dentry>) {
    let children = std::mem::take(&mut *root.children.lock());
    for child in &children {
        destroy_tree(child);
        let mut slot = child.name_and_parent.write();
        if let Some((_, parent)) = slot.as_mut() {
            *parent = Weak::new();
        }
    }
}
