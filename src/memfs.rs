//! Ephemeral in-memory resource tree.
//!
//! Mostly useful for testing and as an example of a resource backend.
//! Files and collections live in one arena keyed by node id, locks go to
//! a [`DavLockManager`], and authentication is delegated to an optional
//! [`SecurityManager`]. Without one, everybody may do everything.
//!
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::future::{self, FutureExt};
use parking_lot::Mutex;
use uuid::Uuid;
use xmltree::Element;

use crate::auth::{Auth, AuthTag, DigestResponse, SecurityManager};
use crate::context::{self, DavRequest};
use crate::errors::DavError;
use crate::ls::{DavLockManager, LockInfo, LockResult, LockTimeout, LockToken, MemLs};
use crate::props::PropName;
use crate::resource::{ByteRange, Caps, DavFuture, DavResource, ResourceFactory};
use crate::util::DavMethod;
use crate::DavResult;

const ROOT: u64 = 0;

/// Ephemeral in-memory resource tree.
pub struct MemFs {
    inner: Arc<MemFsInner>,
}

struct MemFsInner {
    tree: Mutex<Tree>,
    ls: Arc<dyn DavLockManager>,
    security: Option<Arc<dyn SecurityManager>>,
    instance: String,
}

#[derive(Debug)]
enum NodeKind {
    File {
        data: Bytes,
        content_type: Option<String>,
    },
    Dir,
    LockNull,
}

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<u64>,
    kind: NodeKind,
    children: BTreeMap<String, u64>,
    props: Vec<(PropName, Element)>,
    created: SystemTime,
    modified: SystemTime,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<u64, Node>,
    next_id: u64,
}

impl Node {
    fn new(name: &str, parent: Option<u64>, kind: NodeKind) -> Node {
        let now = SystemTime::now();
        Node {
            name: name.to_string(),
            parent,
            kind,
            children: BTreeMap::new(),
            props: Vec::new(),
            created: now,
            modified: now,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }
}

impl Tree {
    fn new() -> Tree {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, Node::new("", None, NodeKind::Dir));
        Tree { nodes, next_id: 1 }
    }

    fn get(&self, id: u64) -> DavResult<&Node> {
        self.nodes.get(&id).ok_or(DavError::NotFound)
    }

    fn get_mut(&mut self, id: u64) -> DavResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(DavError::NotFound)
    }

    fn insert(&mut self, parent: u64, name: &str, kind: NodeKind) -> DavResult<u64> {
        let id = self.next_id;
        let p = self.get_mut(parent)?;
        if !p.is_dir() {
            return Err(DavError::Conflict(format!("{} is not a collection", p.name)));
        }
        p.children.insert(name.to_string(), id);
        p.modified = SystemTime::now();
        self.nodes.insert(id, Node::new(name, Some(parent), kind));
        self.next_id += 1;
        Ok(id)
    }

    // unlink `id` from its parent and drop it and everything below it.
    // Returns the ids that were removed.
    fn remove(&mut self, id: u64) -> Vec<u64> {
        if let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent) {
            if let Some(name) = self.nodes.get(&id).map(|n| n.name.clone()) {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.remove(&name);
                    p.modified = SystemTime::now();
                }
            }
        }
        let mut removed = Vec::new();
        let mut todo = vec![id];
        while let Some(id) = todo.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                todo.extend(node.children.values().copied());
                removed.push(id);
            }
        }
        removed
    }

    fn is_ancestor(&self, ancestor: u64, mut id: u64) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.nodes.get(&id).and_then(|n| n.parent) {
                Some(p) => id = p,
                None => return false,
            }
        }
    }
}

impl MemFsInner {
    fn resource_id(&self, id: u64) -> String {
        format!("{}:{}", self.instance, id)
    }

    // a lock-null node whose lock is gone does not exist any more.
    fn is_live(&self, tree: &mut Tree, id: u64) -> bool {
        let lock_null = match tree.nodes.get(&id) {
            Some(n) => matches!(n.kind, NodeKind::LockNull),
            None => return false,
        };
        if lock_null && self.ls.current_lock(&self.resource_id(id)).is_none() {
            trace!("memfs: lock-null node {} expired", id);
            tree.remove(id);
            return false;
        }
        true
    }

    fn release_locks(&self, ids: &[u64]) {
        for id in ids {
            let rid = self.resource_id(*id);
            if let Some(token) = self.ls.current_lock(&rid) {
                if let Err(e) = self.ls.unlock(&token.token_id, &rid) {
                    warn!("memfs: cannot release lock on {}: {}", rid, e);
                }
            }
        }
    }

    // create `name` below `parent`, taking over a lock-null placeholder
    // of the same name.
    fn create(&self, parent: u64, name: &str, kind: NodeKind) -> DavResult<u64> {
        let mut tree = self.tree.lock();
        let existing = tree.get(parent)?.children.get(name).copied();
        if let Some(id) = existing {
            if !self.is_live(&mut tree, id) {
                return tree.insert(parent, name, kind);
            }
            let node = tree.get_mut(id)?;
            if !matches!(node.kind, NodeKind::LockNull) {
                return Err(DavError::Conflict(format!("{name} already exists")));
            }
            debug!("memfs: materializing lock-null {}", name);
            node.kind = kind;
            node.modified = SystemTime::now();
            drop(tree);
            self.release_locks(&[id]);
            return Ok(id);
        }
        tree.insert(parent, name, kind)
    }
}

impl MemFs {
    /// An empty tree with its own in-memory lock manager and no
    /// security.
    pub fn new() -> Arc<MemFs> {
        MemFs::with(MemLs::new(), None)
    }

    pub fn with(
        ls: Arc<dyn DavLockManager>,
        security: Option<Arc<dyn SecurityManager>>,
    ) -> Arc<MemFs> {
        Arc::new(MemFs {
            inner: Arc::new(MemFsInner {
                tree: Mutex::new(Tree::new()),
                ls,
                security,
                instance: Uuid::new_v4().to_string(),
            }),
        })
    }

    fn resource(&self, id: u64) -> Box<dyn DavResource> {
        Box::new(MemResource {
            fs: self.inner.clone(),
            id,
        })
    }
}

impl fmt::Debug for MemFs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemFs")
            .field("instance", &self.inner.instance)
            .finish()
    }
}

impl ResourceFactory for MemFs {
    fn resolve<'a>(
        &'a self,
        _host: &'a str,
        path: &'a str,
    ) -> DavFuture<'a, Option<Box<dyn DavResource>>> {
        let found = {
            let mut tree = self.inner.tree.lock();
            let mut id = ROOT;
            let mut found = true;
            for seg in path.split('/').filter(|s| !s.is_empty()) {
                match tree.nodes.get(&id).and_then(|n| n.children.get(seg).copied()) {
                    Some(child) if self.inner.is_live(&mut tree, child) => id = child,
                    _ => {
                        found = false;
                        break;
                    }
                }
            }
            found.then_some(id)
        };
        future::ready(Ok(found.map(|id| self.resource(id)))).boxed()
    }
}

/// A node in a [`MemFs`].
#[derive(Clone)]
pub struct MemResource {
    fs: Arc<MemFsInner>,
    id: u64,
}

impl fmt::Debug for MemResource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemResource").field("id", &self.id).finish()
    }
}

fn ready<'a, T: Send + 'a>(r: DavResult<T>) -> DavFuture<'a, T> {
    future::ready(r).boxed()
}

impl MemResource {
    fn with_node<T>(&self, f: impl FnOnce(&Node) -> T) -> Option<T> {
        self.fs.tree.lock().nodes.get(&self.id).map(f)
    }

    fn rid(&self) -> String {
        self.fs.resource_id(self.id)
    }

    fn child_res(&self, id: u64) -> Box<dyn DavResource> {
        Box::new(MemResource {
            fs: self.fs.clone(),
            id,
        })
    }

    // the node id behind a resource of this same tree.
    fn id_of(&self, res: &dyn DavResource) -> Option<u64> {
        let uid = res.unique_id()?;
        let id = uid.strip_prefix(&self.fs.instance)?.strip_prefix(':')?;
        id.parse().ok()
    }

    fn host() -> String {
        context::current().map(|c| c.host.clone()).unwrap_or_default()
    }

    fn lock_new(
        &self,
        name: &str,
        timeout: LockTimeout,
        info: LockInfo,
    ) -> DavResult<Option<LockToken>> {
        let id = {
            let mut tree = self.fs.tree.lock();
            let existing = tree.get(self.id)?.children.get(name).copied();
            if let Some(id) = existing {
                if self.fs.is_live(&mut tree, id) {
                    return Err(DavError::Conflict(format!("{name} already exists")));
                }
            }
            tree.insert(self.id, name, NodeKind::LockNull)?
        };
        match self.fs.ls.lock(timeout, info, &self.fs.resource_id(id)) {
            Ok(token) => {
                debug!("memfs: lock-null {} created", name);
                Ok(Some(token))
            }
            Err(failure) => {
                self.fs.tree.lock().remove(id);
                Err(failure.into())
            }
        }
    }

    fn do_move(&self, dest: &dyn DavResource, name: &str) -> DavResult<()> {
        let dest_id = match self.id_of(dest) {
            Some(id) => id,
            None => return Err(DavError::Conflict("destination is elsewhere".to_string())),
        };
        let mut tree = self.fs.tree.lock();
        if self.id == ROOT || tree.is_ancestor(self.id, dest_id) {
            return Err(DavError::Conflict("cannot move into itself".to_string()));
        }
        let dest_node = tree.get(dest_id)?;
        if !dest_node.is_dir() {
            return Err(DavError::Conflict("destination is not a collection".to_string()));
        }
        if let Some(other) = dest_node.children.get(name).copied() {
            if self.fs.is_live(&mut tree, other) {
                return Err(DavError::PreconditionFailed);
            }
        }

        let (old_parent, old_name) = {
            let node = tree.get(self.id)?;
            (node.parent.unwrap_or(ROOT), node.name.clone())
        };
        let now = SystemTime::now();
        let p = tree.get_mut(old_parent)?;
        p.children.remove(&old_name);
        p.modified = now;
        let d = tree.get_mut(dest_id)?;
        d.children.insert(name.to_string(), self.id);
        d.modified = now;
        let node = tree.get_mut(self.id)?;
        node.name = name.to_string();
        node.parent = Some(dest_id);
        node.modified = now;
        debug!("memfs: moved {} to {}/{}", old_name, dest_id, name);
        Ok(())
    }
}

impl DavResource for MemResource {
    fn name(&self) -> String {
        self.with_node(|n| n.name.clone()).unwrap_or_default()
    }

    fn caps(&self) -> Caps {
        let root = self.id == ROOT;
        self.with_node(|n| match n.kind {
            NodeKind::File { .. } => {
                Caps::GETTABLE
                    | Caps::REPLACEABLE
                    | Caps::PARTIAL_UPDATE
                    | Caps::PROPFINDABLE
                    | Caps::LOCKABLE
                    | Caps::MOVABLE
                    | Caps::DELETABLE
                    | Caps::CUSTOM_PROPS
            }
            NodeKind::Dir if root => {
                Caps::COLLECTION
                    | Caps::PROPFINDABLE
                    | Caps::PUTABLE
                    | Caps::MAKE_COLLECTION
                    | Caps::LOCKING_COLLECTION
                    | Caps::LOCKABLE
                    | Caps::CUSTOM_PROPS
            }
            NodeKind::Dir => {
                Caps::COLLECTION
                    | Caps::PROPFINDABLE
                    | Caps::PUTABLE
                    | Caps::MAKE_COLLECTION
                    | Caps::LOCKING_COLLECTION
                    | Caps::LOCKABLE
                    | Caps::CUSTOM_PROPS
                    | Caps::MOVABLE
                    | Caps::DELETABLE
            }
            NodeKind::LockNull => {
                Caps::PUTABLE | Caps::PROPFINDABLE | Caps::LOCKABLE | Caps::LOCK_NULL
            }
        })
        .unwrap_or(Caps::empty())
    }

    fn unique_id(&self) -> Option<String> {
        Some(self.rid())
    }

    fn is_compatible(&self, method: DavMethod) -> bool {
        let lock_null = self
            .with_node(|n| matches!(n.kind, NodeKind::LockNull))
            .unwrap_or(false);
        if !lock_null {
            return true;
        }
        let allowed = DavMethod::PUT
            | DavMethod::MKCOL
            | DavMethod::OPTIONS
            | DavMethod::PROPFIND
            | DavMethod::LOCK
            | DavMethod::UNLOCK;
        allowed.contains(method)
    }

    fn realm(&self) -> String {
        match &self.fs.security {
            Some(s) => s.realm(&Self::host()),
            None => "memfs".to_string(),
        }
    }

    fn authenticate_basic(&self, user: &str, password: &str) -> Option<AuthTag> {
        match &self.fs.security {
            Some(s) => s.authenticate_basic(user, password),
            None => Some(Arc::new(user.to_string())),
        }
    }

    fn authenticate_digest(&self, digest: &DigestResponse) -> DavResult<Option<AuthTag>> {
        match &self.fs.security {
            Some(s) => s.authenticate_digest(digest),
            None => Ok(None),
        }
    }

    fn is_digest_allowed(&self) -> bool {
        self.fs
            .security
            .as_ref()
            .map(|s| s.is_digest_allowed())
            .unwrap_or(false)
    }

    fn authorise(&self, req: &DavRequest, method: DavMethod, auth: Option<&Auth>) -> bool {
        match &self.fs.security {
            Some(s) => s.authorise(req, method, auth, self),
            None => true,
        }
    }

    fn created(&self) -> Option<SystemTime> {
        self.with_node(|n| n.created)
    }

    fn modified(&self) -> Option<SystemTime> {
        self.with_node(|n| n.modified)
    }

    fn content_length(&self) -> Option<u64> {
        self.with_node(|n| match &n.kind {
            NodeKind::File { data, .. } => Some(data.len() as u64),
            _ => None,
        })
        .flatten()
    }

    fn content_type(&self) -> Option<String> {
        self.with_node(|n| match &n.kind {
            NodeKind::File { content_type, .. } => content_type.clone(),
            _ => None,
        })
        .flatten()
    }

    fn etag(&self) -> Option<String> {
        let (len, modified) = self.with_node(|n| match &n.kind {
            NodeKind::File { data, .. } => Some((data.len(), n.modified)),
            _ => None,
        })??;
        let micros = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        Some(format!("\"{:x}-{:x}-{:x}\"", self.id, len, micros))
    }

    fn get_content(&self) -> DavFuture<'_, Bytes> {
        let data = self.with_node(|n| match &n.kind {
            NodeKind::File { data, .. } => Ok(data.clone()),
            _ => Err(DavError::MethodNotAllowed),
        });
        ready(data.unwrap_or(Err(DavError::NotFound)))
    }

    fn replace_content(&self, new: Bytes) -> DavFuture<'_, ()> {
        let mut tree = self.fs.tree.lock();
        let r = tree.get_mut(self.id).and_then(|node| match &mut node.kind {
            NodeKind::File { data, .. } => {
                *data = new;
                node.modified = SystemTime::now();
                Ok(())
            }
            _ => Err(DavError::MethodNotAllowed),
        });
        ready(r)
    }

    fn replace_partial_content(&self, range: ByteRange, new: Bytes) -> DavFuture<'_, ()> {
        let mut tree = self.fs.tree.lock();
        let r = tree.get_mut(self.id).and_then(|node| match &mut node.kind {
            NodeKind::File { data, .. } => {
                *data = Bytes::from(range.splice(&data[..], &new)?);
                node.modified = SystemTime::now();
                Ok(())
            }
            _ => Err(DavError::MethodNotAllowed),
        });
        ready(r)
    }

    fn child<'a>(&'a self, name: &'a str) -> DavFuture<'a, Option<Box<dyn DavResource>>> {
        let mut tree = self.fs.tree.lock();
        let id = tree.nodes.get(&self.id).and_then(|n| n.children.get(name).copied());
        let found = id.filter(|id| self.fs.is_live(&mut tree, *id));
        ready(Ok(found.map(|id| self.child_res(id))))
    }

    fn children(&self) -> DavFuture<'_, Vec<Box<dyn DavResource>>> {
        let mut tree = self.fs.tree.lock();
        let ids: Vec<u64> = match tree.nodes.get(&self.id) {
            Some(n) => n.children.values().copied().collect(),
            None => return ready(Err(DavError::NotFound)),
        };
        let live: Vec<u64> = ids
            .into_iter()
            .filter(|id| self.fs.is_live(&mut tree, *id))
            .collect();
        ready(Ok(live.into_iter().map(|id| self.child_res(id)).collect()))
    }

    fn create_new<'a>(
        &'a self,
        name: &'a str,
        data: Bytes,
        content_type: Option<String>,
    ) -> DavFuture<'a, Box<dyn DavResource>> {
        let kind = NodeKind::File { data, content_type };
        let r = self.fs.create(self.id, name, kind).map(|id| self.child_res(id));
        ready(r)
    }

    fn create_collection<'a>(&'a self, name: &'a str) -> DavFuture<'a, Box<dyn DavResource>> {
        let r = self
            .fs
            .create(self.id, name, NodeKind::Dir)
            .map(|id| self.child_res(id));
        ready(r)
    }

    fn create_and_lock<'a>(
        &'a self,
        name: &'a str,
        timeout: LockTimeout,
        info: LockInfo,
    ) -> DavFuture<'a, Option<LockToken>> {
        ready(self.lock_new(name, timeout, info))
    }

    fn move_to<'a>(&'a self, dest: &'a dyn DavResource, name: &'a str) -> DavFuture<'a, ()> {
        ready(self.do_move(dest, name))
    }

    fn delete(&self) -> DavFuture<'_, ()> {
        if self.id == ROOT {
            return ready(Err(DavError::MethodNotAllowed));
        }
        let removed = self.fs.tree.lock().remove(self.id);
        if removed.is_empty() {
            return ready(Err(DavError::NotFound));
        }
        self.fs.release_locks(&removed);
        ready(Ok(()))
    }

    fn lock(&self, timeout: LockTimeout, info: LockInfo) -> DavResult<LockResult> {
        Ok(self.fs.ls.lock(timeout, info, &self.rid()))
    }

    fn refresh_lock(&self, token_id: &str) -> DavResult<LockResult> {
        Ok(self.fs.ls.refresh(token_id))
    }

    fn unlock(&self, token_id: &str) -> DavResult<()> {
        self.fs.ls.unlock(token_id, &self.rid())?;
        let mut tree = self.fs.tree.lock();
        let lock_null = tree
            .nodes
            .get(&self.id)
            .map(|n| matches!(n.kind, NodeKind::LockNull))
            .unwrap_or(false);
        if lock_null {
            debug!("memfs: unlocked lock-null {}, removing it", self.id);
            tree.remove(self.id);
        }
        Ok(())
    }

    fn current_lock(&self) -> Option<LockToken> {
        self.fs.ls.current_lock(&self.rid())
    }

    fn dead_props(&self) -> Vec<(PropName, Element)> {
        self.with_node(|n| n.props.clone()).unwrap_or_default()
    }

    fn set_dead_prop(&self, name: &PropName, value: Option<Element>) -> DavResult<()> {
        let mut tree = self.fs.tree.lock();
        let node = tree.get_mut(self.id)?;
        node.props.retain(|(n, _)| n != name);
        if let Some(v) = value {
            node.props.push((name.clone(), v));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ls::{LockDepth, LockScope, LockType};

    fn info() -> LockInfo {
        LockInfo {
            scope: LockScope::Exclusive,
            lock_type: LockType::Write,
            depth: LockDepth::Zero,
            owner: None,
            locked_by_user: Some("alice".to_string()),
        }
    }

    async fn get(fs: &MemFs, path: &str) -> Option<Box<dyn DavResource>> {
        fs.resolve("localhost", path).await.unwrap()
    }

    #[tokio::test]
    async fn create_and_resolve() {
        let fs = MemFs::new();
        let root = get(&fs, "/").await.unwrap();
        let dir = root.create_collection("a").await.unwrap();
        dir.create_new("b.txt", Bytes::from_static(b"hello"), None)
            .await
            .unwrap();

        let file = get(&fs, "/a/b.txt").await.unwrap();
        assert_eq!(file.name(), "b.txt");
        assert!(file.caps().contains(Caps::GETTABLE));
        assert_eq!(file.get_content().await.unwrap(), Bytes::from_static(b"hello"));
        assert!(get(&fs, "/a/c.txt").await.is_none());
        assert!(root.create_collection("a").await.is_err());
    }

    #[tokio::test]
    async fn lock_null_lifecycle() {
        let fs = MemFs::new();
        let root = get(&fs, "/").await.unwrap();
        let token = root
            .create_and_lock("new.txt", LockTimeout::Infinite, info())
            .await
            .unwrap()
            .unwrap();

        let placeholder = get(&fs, "/new.txt").await.unwrap();
        assert!(placeholder.caps().contains(Caps::LOCK_NULL));
        assert!(!placeholder.is_compatible(DavMethod::GET));
        assert!(placeholder.is_compatible(DavMethod::PUT));
        assert_eq!(root.children().await.unwrap().len(), 1);

        // unlocking before anything was written makes it go away.
        placeholder.unlock(&token.token_id).unwrap();
        assert!(get(&fs, "/new.txt").await.is_none());
        assert!(root.children().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_materializes_lock_null() {
        let fs = MemFs::new();
        let root = get(&fs, "/").await.unwrap();
        root.create_and_lock("f", LockTimeout::Infinite, info())
            .await
            .unwrap()
            .unwrap();
        root.create_new("f", Bytes::from_static(b"x"), None).await.unwrap();

        let file = get(&fs, "/f").await.unwrap();
        assert!(file.caps().contains(Caps::GETTABLE));
        assert!(file.current_lock().is_none());
    }

    #[tokio::test]
    async fn move_and_delete() {
        let fs = MemFs::new();
        let root = get(&fs, "/").await.unwrap();
        let a = root.create_collection("a").await.unwrap();
        let b = root.create_collection("b").await.unwrap();
        let f = a.create_new("f", Bytes::from_static(b"1"), None).await.unwrap();

        f.move_to(b.as_ref(), "g").await.unwrap();
        assert!(get(&fs, "/a/f").await.is_none());
        assert!(get(&fs, "/b/g").await.is_some());

        // a collection cannot go below itself.
        assert!(b.move_to(b.as_ref(), "x").await.is_err());

        let lock = b.lock(LockTimeout::Infinite, info()).unwrap().unwrap();
        b.delete().await.unwrap();
        assert!(get(&fs, "/b/g").await.is_none());
        assert!(fs.inner.ls.current_lock(&fs.inner.resource_id(2)).is_none());
        assert_ne!(lock.token_id, "");
        assert!(root.delete().await.is_err());
    }

    #[tokio::test]
    async fn dead_properties() {
        let fs = MemFs::new();
        let root = get(&fs, "/").await.unwrap();
        let name = PropName::new("urn:x", "color");
        let mut elem = Element::new("color");
        elem.namespace = Some("urn:x".to_string());
        root.set_dead_prop(&name, Some(elem)).unwrap();
        assert_eq!(root.dead_props().len(), 1);
        root.set_dead_prop(&name, None).unwrap();
        assert!(root.dead_props().is_empty());
    }
}
