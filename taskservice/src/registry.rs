//! Registry - name-keyed directory of servers

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::server::{DEFAULT_WORKERS_PER_CPU, MessageHandler, ScheduledJob, Server, ServerOptions, resolve_name};

/// Shared map behind a registry; servers hold a weak reference to it
pub(crate) type RegistryMap<P, R> = RwLock<HashMap<String, Server<P, R>>>;

/// A directory of servers addressed by name
///
/// The registry is a cheap-to-clone handle. Servers it creates remove their
/// own entry when they stop, so callers never deregister by hand.
pub struct Registry<P, R> {
    servers: Arc<RegistryMap<P, R>>,
    workers_per_cpu: usize,
}

impl<P, R> Clone for Registry<P, R> {
    fn clone(&self) -> Self {
        Self {
            servers: self.servers.clone(),
            workers_per_cpu: self.workers_per_cpu,
        }
    }
}

impl<P, R> Default for Registry<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> Registry<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        debug!("Registry::new: called");
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            workers_per_cpu: DEFAULT_WORKERS_PER_CPU,
        }
    }

    /// Create a registry whose servers are sized from configuration
    pub fn with_config(config: &DispatchConfig) -> Self {
        debug!(?config, "Registry::with_config: called");
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            workers_per_cpu: config.workers_per_cpu.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Server<P, R>>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Server<P, R>>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a server; an empty name gets a generated one
    ///
    /// The server is returned stopped. Fails with `DuplicateName` if the
    /// name is already registered.
    pub fn create<H>(
        &self,
        name: &str,
        handler: H,
        jobs: Vec<ScheduledJob>,
        options: ServerOptions,
    ) -> DispatchResult<Server<P, R>>
    where
        H: MessageHandler<P, R>,
    {
        self.insert(name, Some(Arc::new(handler)), jobs, options)
    }

    /// Create and register a server that only runs scheduled jobs
    pub fn create_without_handler(
        &self,
        name: &str,
        jobs: Vec<ScheduledJob>,
        options: ServerOptions,
    ) -> DispatchResult<Server<P, R>> {
        self.insert(name, None, jobs, options)
    }

    fn insert(
        &self,
        name: &str,
        handler: Option<Arc<dyn MessageHandler<P, R>>>,
        jobs: Vec<ScheduledJob>,
        options: ServerOptions,
    ) -> DispatchResult<Server<P, R>> {
        let name = resolve_name(name);
        debug!(%name, "Registry::create: called");

        // Check and insert under one write lock so concurrent creates of
        // the same name cannot both succeed
        let mut servers = self.write();
        if servers.contains_key(&name) {
            debug!(%name, "Registry::create: duplicate name, rejecting");
            return Err(DispatchError::DuplicateName { name });
        }

        let server = Server::build(
            name.clone(),
            handler,
            jobs,
            options,
            self.workers_per_cpu,
            Some(Arc::downgrade(&self.servers)),
        )?;
        servers.insert(name.clone(), server.clone());
        info!(%name, total = servers.len(), "Server registered");
        Ok(server)
    }

    /// Look up a server by name
    pub fn get(&self, name: &str) -> DispatchResult<Server<P, R>> {
        self.read().get(name).cloned().ok_or_else(|| DispatchError::NotFound {
            name: name.to_string(),
        })
    }

    /// Stop a server by name; it removes itself from the registry
    pub async fn stop(&self, name: &str) -> DispatchResult<()> {
        debug!(%name, "Registry::stop: called");
        let server = self.get(name)?;
        server.stop().await;
        Ok(())
    }

    pub async fn send_async(&self, name: &str, ctx: &Context, payload: P) -> DispatchResult<()> {
        let server = self.get(name)?;
        server.send_async(ctx, payload).await
    }

    pub async fn send_sync(&self, name: &str, ctx: &Context, payload: P) -> DispatchResult<R> {
        let server = self.get(name)?;
        server.send_sync(ctx, payload).await
    }

    /// Number of registered servers
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Names of registered servers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every registered server
    ///
    /// Servers that were never started are left registered, since stopping
    /// them is a no-op.
    pub async fn stop_all(&self) {
        let servers: Vec<_> = self.read().values().cloned().collect();
        debug!(count = servers.len(), "Registry::stop_all: called");
        for server in servers {
            server.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn echo(registry: &Registry<u32, u32>, name: &str) -> DispatchResult<Server<u32, u32>> {
        registry.create(
            name,
            |_ctx: Context, payload: u32, _worker: usize| async move { Ok::<_, eyre::Report>(payload + 1) },
            vec![],
            ServerOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_create_and_send_by_name() {
        let registry = Registry::new();
        let server = echo(&registry, "inc").unwrap();
        server.start().unwrap();

        let ctx = Context::background();
        registry.send_async("inc", &ctx, 1).await.unwrap();
        assert_eq!(registry.send_sync("inc", &ctx, 41).await.unwrap(), 42);
        assert_eq!(registry.count(), 1);

        registry.stop("inc").await.unwrap();
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_first_still_usable() {
        let registry = Registry::new();
        let first = echo(&registry, "dup").unwrap();
        first.start().unwrap();

        let err = echo(&registry, "dup").unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateName { ref name } if name == "dup"));

        assert_eq!(registry.send_sync("dup", &Context::background(), 1).await.unwrap(), 2);
        registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_unknown_name_not_found() {
        let registry: Registry<u32, u32> = Registry::new();
        let ctx = Context::background();
        assert!(matches!(registry.stop("ghost").await, Err(DispatchError::NotFound { .. })));
        assert!(matches!(
            registry.send_async("ghost", &ctx, 1).await,
            Err(DispatchError::NotFound { .. })
        ));
        assert!(matches!(
            registry.send_sync("ghost", &ctx, 1).await,
            Err(DispatchError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_deregisters_and_handle_reports_stopped() {
        let registry = Registry::new();
        let server = echo(&registry, "gone").unwrap();
        server.start().unwrap();
        server.stop().await;

        let ctx = Context::background();
        assert!(matches!(registry.get("gone"), Err(DispatchError::NotFound { .. })));
        assert!(matches!(
            registry.send_async("gone", &ctx, 1).await,
            Err(DispatchError::NotFound { .. })
        ));
        assert!(matches!(
            server.send_async(&ctx, 1).await,
            Err(DispatchError::Stopped { .. })
        ));
    }

    #[tokio::test]
    async fn test_name_reusable_after_stop() {
        let registry = Registry::new();
        let old = echo(&registry, "reuse").unwrap();
        old.start().unwrap();
        old.stop().await;

        let new = echo(&registry, "reuse").unwrap();
        new.start().unwrap();
        // Stopping the stale handle again must not evict the new entry
        old.stop().await;
        assert!(registry.get("reuse").unwrap().same_as(&new));
        new.stop().await;
    }

    #[tokio::test]
    async fn test_empty_name_generated() {
        let registry = Registry::new();
        let a = echo(&registry, "").unwrap();
        let b = echo(&registry, "").unwrap();
        assert_ne!(a.name(), b.name());
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.names().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_one_winner() {
        let registry = Registry::new();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { echo(&registry, "race").is_ok() }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_with_config_sizes_workers() {
        let config = DispatchConfig {
            workers_per_cpu: 1,
            ..Default::default()
        };
        let registry: Registry<u32, u32> = Registry::with_config(&config);
        let server = echo(&registry, "sized").unwrap();
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(server.worker_count(), cpus);

        server.start().unwrap();
        let reply = tokio::time::timeout(
            Duration::from_secs(1),
            registry.send_sync("sized", &Context::background(), 1),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply, 2);
        registry.stop_all().await;
    }
}
