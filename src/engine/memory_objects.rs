use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;

use super::fsutil::unix_seconds;
use super::objects::{validate_object_name, ObjectBuckets, ObjectClient, ObjectMeta, ObjectPage};
use crate::{Error, Result};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
struct MemoryObject {
    data: Vec<u8>,
    last_modified: f64,
}

/// In-process bucket.
///
/// Clones share the same objects. Intended for tests and embedding.
#[derive(Clone)]
pub struct MemoryObjectClient {
    objects: Arc<RwLock<BTreeMap<String, MemoryObject>>>,
    page_size: usize,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limits listings to `page_size` objects per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of objects in the bucket.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All object names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }
}

impl Default for MemoryObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObjectClient")
            .field("object_count", &self.len())
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects.get(name).map(|obj| ObjectMeta {
            name: name.to_string(),
            size: obj.data.len() as u64,
            last_modified: obj.last_modified,
        }))
    }

    async fn get_object(&self, name: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(name)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| Error::ObjectNotFound(name.to_string()))
    }

    async fn put_object(&self, name: &str, data: Vec<u8>) -> Result<()> {
        validate_object_name(name)?;
        let object = MemoryObject {
            data,
            last_modified: unix_seconds(SystemTime::now()),
        };
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), object);
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner).remove(name);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let start = match continuation {
            Some(token) => Bound::Excluded(token),
            None => Bound::Included(prefix),
        };
        // Names sharing a prefix are contiguous in sorted order.
        let mut matching: Vec<ObjectMeta> = objects
            .range::<str, _>((start, Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(prefix))
            .take(self.page_size + 1)
            .map(|(name, obj)| ObjectMeta {
                name: name.clone(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            })
            .collect();

        let next_token = if matching.len() > self.page_size {
            matching.truncate(self.page_size);
            matching.last().map(|m| m.name.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects: matching,
            next_token,
        })
    }
}

/// Named in-process buckets, created on first use.
#[derive(Default)]
pub struct MemoryBuckets {
    buckets: Mutex<HashMap<String, MemoryObjectClient>>,
    page_size: Option<usize>,
}

impl MemoryBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            page_size: Some(page_size),
        }
    }
}

impl ObjectBuckets for MemoryBuckets {
    fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectClient>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let client = buckets.entry(name.to_string()).or_insert_with(|| {
            let client = MemoryObjectClient::new();
            match self.page_size {
                Some(n) => client.with_page_size(n),
                None => client,
            }
        });
        Ok(Arc::new(client.clone()))
    }
}
