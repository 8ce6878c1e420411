//! Authentication execution plan.
//!
//! Configurers register handlers, resolvers and metadata populators into a
//! [`PlanBuilder`]. [`AuthenticationExecutionPlan::build`] runs every configurer in
//! priority order and swaps the resulting [`AuthenticationPlan`] in atomically, so
//! a transaction always sees one complete plan.

use anyhow::{anyhow, bail, Result};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::credential::Credential;
use super::error::PlanBuildError;
use super::handler::{AuthenticationHandler, EchoingPrincipalResolver, PrincipalResolver};
use super::manager::{Authentication, AuthenticationTransaction};

/// Priority of configurers that do not override [`AuthenticationPlanConfigurer::priority`].
pub const DEFAULT_PRIORITY: i32 = 0;

/// Contributes handlers and populators to the plan.
pub trait AuthenticationPlanConfigurer: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn configure(&self, plan: &mut PlanBuilder) -> Result<()>;
}

/// Adds authentication-level attributes after a successful transaction.
pub trait AuthenticationMetaDataPopulator: Send + Sync {
    fn name(&self) -> &str;

    fn populate(&self, authentication: &mut Authentication, transaction: &AuthenticationTransaction);
}

/// Handler paired with the resolver that builds its principal.
#[derive(Clone)]
pub struct PlanEntry {
    pub handler: Arc<dyn AuthenticationHandler>,
    pub resolver: Arc<dyn PrincipalResolver>,
}

/// Mutable plan under construction.
pub struct PlanBuilder {
    entries: Vec<PlanEntry>,
    populators: Vec<Arc<dyn AuthenticationMetaDataPopulator>>,
    default_resolver: Arc<dyn PrincipalResolver>,
}

impl PlanBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            populators: Vec::new(),
            default_resolver: Arc::new(EchoingPrincipalResolver),
        }
    }

    /// Register a handler using the default resolver.
    pub fn register_handler(&mut self, handler: Arc<dyn AuthenticationHandler>) -> Result<()> {
        let resolver = Arc::clone(&self.default_resolver);
        self.register_handler_with_resolver(handler, resolver)
    }

    pub fn register_handler_with_resolver(
        &mut self,
        handler: Arc<dyn AuthenticationHandler>,
        resolver: Arc<dyn PrincipalResolver>,
    ) -> Result<()> {
        if self.entries.iter().any(|e| e.handler.name() == handler.name()) {
            bail!("Duplicate authentication handler name: {}", handler.name());
        }
        trace!(handler = handler.name(), resolver = resolver.name(), "Registered handler");
        self.entries.push(PlanEntry { handler, resolver });
        Ok(())
    }

    pub fn register_populator(&mut self, populator: Arc<dyn AuthenticationMetaDataPopulator>) {
        self.populators.push(populator);
    }

    fn finish(self, generation: u64) -> AuthenticationPlan {
        AuthenticationPlan {
            entries: self.entries,
            populators: self.populators,
            generation,
        }
    }
}

/// Immutable snapshot of the plan.
pub struct AuthenticationPlan {
    entries: Vec<PlanEntry>,
    populators: Vec<Arc<dyn AuthenticationMetaDataPopulator>>,
    generation: u64,
}

impl AuthenticationPlan {
    fn empty() -> Self {
        PlanBuilder::new().finish(0)
    }

    /// Entries whose handler supports the credential, in plan order.
    pub fn entries_for<'a>(&'a self, credential: &'a Credential) -> impl Iterator<Item = &'a PlanEntry> {
        self.entries
            .iter()
            .filter(move |e| e.handler.supports(credential))
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn populators(&self) -> &[Arc<dyn AuthenticationMetaDataPopulator>] {
        &self.populators
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.handler.name().to_string())
            .collect()
    }

    /// Number of successful builds before this one; 0 is the initial empty plan.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct RegisteredConfigurer {
    sequence: u64,
    configurer: Arc<dyn AuthenticationPlanConfigurer>,
}

/// Registry of configurers plus the active plan.
pub struct AuthenticationExecutionPlan {
    configurers: RwLock<Vec<RegisteredConfigurer>>,
    next_sequence: AtomicU64,
    generation: AtomicU64,
    active: ArcSwap<AuthenticationPlan>,
    /// Serializes concurrent builds.
    build_lock: Mutex<()>,
}

impl AuthenticationExecutionPlan {
    pub fn new() -> Self {
        Self {
            configurers: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            active: ArcSwap::from_pointee(AuthenticationPlan::empty()),
            build_lock: Mutex::new(()),
        }
    }

    /// Add a configurer. Takes effect on the next [`build`](Self::build).
    pub fn register(&self, configurer: Arc<dyn AuthenticationPlanConfigurer>) -> Result<()> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let mut configurers = self
            .configurers
            .write()
            .map_err(|_| anyhow!("Configurer registry lock poisoned"))?;
        debug!(configurer = configurer.name(), sequence, "Registered plan configurer");
        configurers.push(RegisteredConfigurer {
            sequence,
            configurer,
        });
        Ok(())
    }

    /// Build a fresh plan from all configurers and make it active.
    ///
    /// On failure the previously active plan is left untouched.
    pub fn build(&self) -> Result<Arc<AuthenticationPlan>, PlanBuildError> {
        let _guard = self.build_lock.lock().map_err(|_| PlanBuildError {
            configurer: "<plan>".to_string(),
            source: anyhow!("Plan build lock poisoned"),
        })?;

        let mut ordered: Vec<(i32, u64, Arc<dyn AuthenticationPlanConfigurer>)> = {
            let configurers = self.configurers.read().map_err(|_| PlanBuildError {
                configurer: "<plan>".to_string(),
                source: anyhow!("Configurer registry lock poisoned"),
            })?;
            configurers
                .iter()
                .map(|r| (r.configurer.priority(), r.sequence, Arc::clone(&r.configurer)))
                .collect()
        };
        ordered.sort_by_key(|(priority, sequence, _)| (*priority, *sequence));

        let mut builder = PlanBuilder::new();
        for (_, _, configurer) in &ordered {
            trace!(configurer = configurer.name(), "Configuring authentication execution plan");
            if let Err(source) = configurer.configure(&mut builder) {
                warn!(
                    configurer = configurer.name(),
                    error = %source,
                    "Authentication plan build failed, keeping previous plan"
                );
                return Err(PlanBuildError {
                    configurer: configurer.name().to_string(),
                    source,
                });
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let plan = Arc::new(builder.finish(generation));
        self.active.store(Arc::clone(&plan));

        info!(
            generation,
            handlers = ?plan.handler_names(),
            populators = plan.populators.len(),
            "Authentication execution plan built"
        );
        Ok(plan)
    }

    /// Rebuild after a configuration change.
    pub fn reload(&self) -> Result<Arc<AuthenticationPlan>, PlanBuildError> {
        self.build()
    }

    /// The currently active plan.
    pub fn active(&self) -> Arc<AuthenticationPlan> {
        self.active.load_full()
    }
}

impl Default for AuthenticationExecutionPlan {
    fn default() -> Self {
        Self::new()
    }
}
