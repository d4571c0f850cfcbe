//! Lifecycle events from the hosting environment.
//!
//! The accounting domain is managed like a loadable component: the host
//! delivers load/unload events, and everything else in the event
//! vocabulary is rejected as unsupported.

use std::fmt;
use std::sync::Arc;

use steal_common::{StealError, StealResult};

use crate::counter::StolenTickCounter;
use crate::runstate::RunstateSource;
use crate::sampler::SamplingLoop;

/// Lifecycle events a hosting environment may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEvent {
    /// Begin accounting: baseline every CPU and start the sampling loop.
    Load,
    /// Stop accounting: drain and join the sampling loop.
    Unload,
    /// Host asks whether unload would be safe. Not supported.
    Quiesce,
    /// Host is shutting down wholesale. Not supported.
    Shutdown,
}

impl fmt::Display for ModuleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Unload => write!(f, "unload"),
            Self::Quiesce => write!(f, "quiesce"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The single global accounting domain, driven by host lifecycle events.
///
/// Owns the sampling loop; constructed once at load and destroyed at
/// unload by the hosting environment.
pub struct AccountingModule<S: RunstateSource + 'static> {
    sampler: SamplingLoop<S>,
}

impl<S: RunstateSource + 'static> AccountingModule<S> {
    /// Wrap a configured sampling loop.
    #[must_use]
    pub fn new(sampler: SamplingLoop<S>) -> Self {
        Self { sampler }
    }

    /// Dispatch a host lifecycle event.
    ///
    /// `Load` failures mean the module must not be considered loaded;
    /// `Unload` failures (stop timeout) mean teardown must not proceed.
    pub fn handle_event(&mut self, event: ModuleEvent) -> StealResult<()> {
        match event {
            ModuleEvent::Load => self.sampler.start(),
            ModuleEvent::Unload => self.sampler.stop(),
            other => Err(StealError::Unsupported(other.to_string())),
        }
    }

    /// The underlying sampling loop.
    #[must_use]
    pub fn sampler(&self) -> &SamplingLoop<S> {
        &self.sampler
    }

    /// Handle to the published stolen-tick counter.
    #[must_use]
    pub fn counter(&self) -> Arc<StolenTickCounter> {
        self.sampler.counter()
    }
}
