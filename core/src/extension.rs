//! A static registry of named plugins.
//!
//! Every kind of extension has its own [ExtensionLoader], a table of constructors filled once
//! at startup through [ExtensionsBuilder]. The first resolution of a name builds the instance,
//! later resolutions hand out the same `Arc`.
//!
//! # Example
//!
//! ```rust
//! use kestrel_rpc_core::extension::ExtensionsBuilder;
//! use kestrel_rpc_core::codec::Compressor;
//! use std::sync::Arc;
//!
//! struct Identity;
//!
//! impl Compressor for Identity {
//!     fn compress(&self, buf: &[u8]) -> std::io::Result<Vec<u8>> {
//!         Ok(buf.to_vec())
//!     }
//!     fn decompress(&self, buf: &[u8]) -> std::io::Result<Vec<u8>> {
//!         Ok(buf.to_vec())
//!     }
//! }
//!
//! let mut builder = ExtensionsBuilder::new();
//! builder.compressor("identity", 0, || Arc::new(Identity));
//! let ext = builder.build();
//! let a = ext.compressor("identity").unwrap();
//! let b = ext.compressor_by_id(0).unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! assert!(ext.compressor("zstd").is_err());
//! ```

use crate::balance::LoadBalance;
use crate::codec::{Compressor, Serializer};
use crate::error::{ExtensionError, ExtensionKind};
use crate::registry::{ServiceDiscovery, ServiceRegistration};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

type Ctor<T> = Box<dyn Fn() -> Arc<T> + Send + Sync>;

pub struct ExtensionLoader<T: ?Sized + Send + Sync + 'static> {
    kind: ExtensionKind,
    ctors: FxHashMap<String, Ctor<T>>,
    /// wire id -> name, only for serializers and compressors
    ids: FxHashMap<u8, String>,
    cache: RwLock<FxHashMap<String, Arc<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionLoader<T> {
    pub fn new(kind: ExtensionKind) -> Self {
        Self { kind, ctors: FxHashMap::default(), ids: FxHashMap::default(), cache: RwLock::new(FxHashMap::default()) }
    }

    #[inline]
    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    /// Register a constructor, replacing an earlier one of the same name
    pub fn register<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.ctors.insert(name.to_string(), Box::new(ctor));
        self.cache.get_mut().remove(name);
    }

    pub fn register_with_id<F>(&mut self, name: &str, id: u8, ctor: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.ids.retain(|_, n| n != name);
        self.ids.insert(id, name.to_string());
        self.register(name, ctor);
    }

    /// Return the shared instance, building it on first use.
    pub fn resolve(&self, name: &str) -> Result<Arc<T>, ExtensionError> {
        if let Some(ext) = self.cache.read().get(name) {
            return Ok(ext.clone());
        }
        let Some(ctor) = self.ctors.get(name) else {
            return Err(ExtensionError::NotFound { kind: self.kind, name: name.to_string() });
        };
        let mut cache = self.cache.write();
        // Another thread may have won the race between the two locks
        let ext = cache.entry(name.to_string()).or_insert_with(|| {
            log::debug!("{} extension {:?} loaded", self.kind, name);
            ctor()
        });
        Ok(ext.clone())
    }

    pub fn resolve_id(&self, id: u8) -> Result<Arc<T>, ExtensionError> {
        self.resolve(self.name_of_id(id)?)
    }

    pub fn name_of_id(&self, id: u8) -> Result<&str, ExtensionError> {
        match self.ids.get(&id) {
            Some(name) => Ok(name.as_str()),
            None => Err(ExtensionError::UnknownId { kind: self.kind, id }),
        }
    }

    pub fn id_of(&self, name: &str) -> Result<u8, ExtensionError> {
        for (id, n) in self.ids.iter() {
            if n == name {
                return Ok(*id);
            }
        }
        Err(ExtensionError::NotFound { kind: self.kind, name: name.to_string() })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl<T: ?Sized + Send + Sync + 'static> fmt::Debug for ExtensionLoader<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExtensionLoader<{}>{:?}", self.kind, self.names())
    }
}

/// All the extension tables of a process, shared by clients and servers as `Arc<Extensions>`.
pub struct Extensions {
    serializers: ExtensionLoader<dyn Serializer>,
    compressors: ExtensionLoader<dyn Compressor>,
    balancers: ExtensionLoader<dyn LoadBalance>,
    discovery: ExtensionLoader<dyn ServiceDiscovery>,
    registration: ExtensionLoader<dyn ServiceRegistration>,
}

impl Extensions {
    #[inline]
    pub fn serializers(&self) -> &ExtensionLoader<dyn Serializer> {
        &self.serializers
    }

    #[inline]
    pub fn compressors(&self) -> &ExtensionLoader<dyn Compressor> {
        &self.compressors
    }

    #[inline]
    pub fn serializer(&self, name: &str) -> Result<Arc<dyn Serializer>, ExtensionError> {
        self.serializers.resolve(name)
    }

    #[inline]
    pub fn serializer_by_id(&self, id: u8) -> Result<Arc<dyn Serializer>, ExtensionError> {
        self.serializers.resolve_id(id)
    }

    #[inline]
    pub fn compressor(&self, name: &str) -> Result<Arc<dyn Compressor>, ExtensionError> {
        self.compressors.resolve(name)
    }

    #[inline]
    pub fn compressor_by_id(&self, id: u8) -> Result<Arc<dyn Compressor>, ExtensionError> {
        self.compressors.resolve_id(id)
    }

    #[inline]
    pub fn balancer(&self, name: &str) -> Result<Arc<dyn LoadBalance>, ExtensionError> {
        self.balancers.resolve(name)
    }

    #[inline]
    pub fn discovery(&self, name: &str) -> Result<Arc<dyn ServiceDiscovery>, ExtensionError> {
        self.discovery.resolve(name)
    }

    #[inline]
    pub fn registration(&self, name: &str) -> Result<Arc<dyn ServiceRegistration>, ExtensionError> {
        self.registration.resolve(name)
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("serializers", &self.serializers)
            .field("compressors", &self.compressors)
            .field("balancers", &self.balancers)
            .field("discovery", &self.discovery)
            .field("registration", &self.registration)
            .finish()
    }
}

/// Collects the constructors before the table is frozen into [Extensions]
pub struct ExtensionsBuilder {
    inner: Extensions,
}

impl ExtensionsBuilder {
    pub fn new() -> Self {
        Self {
            inner: Extensions {
                serializers: ExtensionLoader::new(ExtensionKind::Serializer),
                compressors: ExtensionLoader::new(ExtensionKind::Compressor),
                balancers: ExtensionLoader::new(ExtensionKind::LoadBalance),
                discovery: ExtensionLoader::new(ExtensionKind::ServiceDiscovery),
                registration: ExtensionLoader::new(ExtensionKind::ServiceRegistration),
            },
        }
    }

    pub fn serializer<F>(&mut self, name: &str, id: u8, ctor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Serializer> + Send + Sync + 'static,
    {
        self.inner.serializers.register_with_id(name, id, ctor);
        self
    }

    pub fn compressor<F>(&mut self, name: &str, id: u8, ctor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Compressor> + Send + Sync + 'static,
    {
        self.inner.compressors.register_with_id(name, id, ctor);
        self
    }

    pub fn balancer<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn LoadBalance> + Send + Sync + 'static,
    {
        self.inner.balancers.register(name, ctor);
        self
    }

    pub fn discovery<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn ServiceDiscovery> + Send + Sync + 'static,
    {
        self.inner.discovery.register(name, ctor);
        self
    }

    pub fn registration<F>(&mut self, name: &str, ctor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn ServiceRegistration> + Send + Sync + 'static,
    {
        self.inner.registration.register(name, ctor);
        self
    }

    pub fn build(self) -> Extensions {
        self.inner
    }
}

impl Default for ExtensionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
