//! # Core context: one registry, one dispatcher, one timeline manager.
//!
//! [`Core`] wires the three layers the way an embedding application would:
//! the registry is created and published first, the dispatcher discovers it,
//! and the timeline manager discovers both.
//!
//! ```text
//! Core::new(cfg)
//!   ├─► Registry::new          ─► publish (API, REGISTRY)
//!   ├─► Dispatcher::discover   ─► publish (API, DISPATCHER)
//!   └─► Timelines::discover    ─► publish (API, TIMELINE)
//!
//! Core::shutdown / drop
//!   └─► withdraw TIMELINE, DISPATCHER, REGISTRY (reverse order)
//! ```
//! The registry holds its own table, so withdrawing is what lets the layers be
//! freed.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::dispatch::{Dispatcher, Handler};
use crate::error::Result;
use crate::registry::{Id, Payload, Registry, Type};
use crate::timeline::Timelines;

use super::api;

/// Owner of the published registry, dispatcher and timeline manager.
pub struct Core {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    timelines: Arc<Timelines>,
    published: Mutex<Vec<(Type, Id, Payload)>>,
}

impl Core {
    /// Creates and publishes all three layers.
    pub fn new(cfg: Config) -> Result<Self> {
        let registry = Arc::new(Registry::new(&cfg));
        let mut published = Vec::with_capacity(3);

        let payload = api::publish(
            &registry,
            api::REGISTRY,
            api::REGISTRY_VERSION,
            Arc::clone(&registry),
        )?;
        published
            .push((api::REGISTRY, api::REGISTRY_VERSION, payload));

        let core = Self::assemble(registry, cfg, published)?;
        debug!("core published");
        Ok(core)
    }

    fn assemble(
        registry: Arc<Registry>,
        cfg: Config,
        mut published: Vec<(Type, Id, Payload)>,
    ) -> Result<Self> {
        let mut steps = || -> Result<(Arc<Dispatcher>, Arc<Timelines>)> {
            let dispatcher = Arc::new(Dispatcher::discover(&registry, cfg.clone())?);
            let payload = api::publish(
                &registry,
                api::DISPATCHER,
                api::DISPATCHER_VERSION,
                Arc::clone(&dispatcher),
            )?;
            published
                .push((api::DISPATCHER, api::DISPATCHER_VERSION, payload));

            let timelines = Arc::new(Timelines::discover(&registry, cfg.clone())?);
            let payload = api::publish(
                &registry,
                api::TIMELINE,
                api::TIMELINE_VERSION,
                Arc::clone(&timelines),
            )?;
            published
                .push((api::TIMELINE, api::TIMELINE_VERSION, payload));
            Ok((dispatcher, timelines))
        };

        match steps() {
            Ok((dispatcher, timelines)) => Ok(Self {
                registry,
                dispatcher,
                timelines,
                published: Mutex::new(published),
            }),
            Err(e) => {
                withdraw_all(&registry, &mut published);
                Err(e)
            }
        }
    }

    /// Starts a [`CoreBuilder`] for registering handlers up front.
    pub fn builder(cfg: Config) -> CoreBuilder {
        CoreBuilder::new(cfg)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn timelines(&self) -> &Arc<Timelines> {
        &self.timelines
    }

    /// Withdraws the published tables, newest first.
    ///
    /// Idempotent; also run on drop. Layers stay usable through handles the
    /// caller still holds, but can no longer be discovered.
    pub fn shutdown(&self) {
        let mut published = self.published.lock();
        if published.is_empty() {
            return;
        }
        withdraw_all(&self.registry, &mut published);
        debug!("core withdrawn");
    }
}

fn withdraw_all(registry: &Registry, published: &mut Vec<(Type, Id, Payload)>) {
    while let Some((ty, version, payload)) = published.pop() {
        if let Err(e) = api::withdraw(registry, ty, version, &payload) {
            warn!(
                api = ty.0,
                version = version.0,
                error = e.as_label(),
                "api table not withdrawn"
            );
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("registry", &self.registry)
            .field("timelines", &self.timelines)
            .finish()
    }
}

/// Builder for a [`Core`] with handlers registered before first use.
pub struct CoreBuilder {
    cfg: Config,
    handlers: Vec<(Type, Handler)>,
    #[cfg(feature = "logging")]
    logging: Option<crate::registry::Priority>,
}

impl CoreBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            handlers: Vec::new(),
            #[cfg(feature = "logging")]
            logging: None,
        }
    }

    /// Adds handlers, registered as one batch by [`CoreBuilder::build`].
    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = (Type, Handler)>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Installs a [`LogHandler`](crate::LogHandler) on every timeline event.
    ///
    /// Requires the `logging` feature flag.
    #[cfg(feature = "logging")]
    pub fn with_logging(mut self, priority: crate::registry::Priority) -> Self {
        self.logging = Some(priority);
        self
    }

    pub fn build(self) -> Result<Core> {
        let core = Core::new(self.cfg)?;
        core.dispatcher.register_handlers(&self.handlers)?;
        #[cfg(feature = "logging")]
        if let Some(priority) = self.logging {
            crate::handlers::LogHandler::install(&core.dispatcher, priority)?;
        }
        Ok(core)
    }
}
