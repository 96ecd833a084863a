use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Opaque, validated index into an [`Arena`]. Only the arena that issued a
/// handle can resolve it, and every handle it issues stays valid for the
/// lifetime of the project.
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Append-only storage that resolves string ids to handles once, at load
/// time. Rendering only ever sees handles.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    ids: Vec<String>,
    items: Vec<T>,
    by_id: HashMap<String, u32>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            items: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Insert under `id`. Returns `None` if the id is already taken.
    pub fn insert(&mut self, id: impl Into<String>, item: T) -> Option<Handle<T>> {
        let id = id.into();
        if self.by_id.contains_key(&id) {
            return None;
        }
        let index = self.items.len() as u32;
        self.by_id.insert(id.clone(), index);
        self.ids.push(id);
        self.items.push(item);
        Some(Handle::new(index))
    }

    pub fn resolve(&self, id: &str) -> Option<Handle<T>> {
        self.by_id.get(id).copied().map(Handle::new)
    }

    pub fn get(&self, handle: Handle<T>) -> &T {
        &self.items[handle.index()]
    }

    pub fn id(&self, handle: Handle<T>) -> &str {
        &self.ids[handle.index()]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Handle::new(i as u32), item))
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw container bytes for an embedded video clip.
#[derive(Debug, Clone)]
pub struct VideoAsset {
    pub data: Arc<[u8]>,
    /// Decoder configuration supplied by the caller; preferred over
    /// anything found in the container.
    pub param_set: Option<Arc<[u8]>>,
}

/// Font file bytes registered under a family name.
#[derive(Debug, Clone)]
pub struct FontAsset {
    pub family: String,
    pub data: Arc<[u8]>,
}

pub type AssetHandle = Handle<VideoAsset>;
