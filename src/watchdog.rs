//! This module contains the type definitions necessary to support
//! cooperative cancellation of an analysis.
//!
//! # Cancellation Points
//!
//! The tracer polls its watchdog at every suspension point, which are all at
//! the oracle boundary. A cancelled analysis aborts with
//! [`crate::error::Error::Cancelled`] and produces no partial result; the
//! pure compute stages between suspension points always run to completion.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A dynamically dispatched [`Watchdog`] instance.
pub type DynWatchdog = Arc<dyn Watchdog>;

/// The interface to an object that can be polled to see if the tracer needs
/// to abort its analysis.
///
/// The interface is simple, but it can encapsulate arbitrary logic as far as
/// the tracer is concerned, allowing the client to implement complex stop
/// logic such as deadlines.
pub trait Watchdog
where
    Self: Debug + Send + Sync,
{
    /// Checks if the tracer should halt its analysis and return an error.
    #[must_use]
    fn should_stop(&self) -> bool;
}

/// An implementation of the [`Watchdog`] trait that does not place any
/// restrictions on the execution of the tracer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }
}

/// A watchdog that tells the tracer when to stop based on a flag in the
/// form of an atomic boolean.
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    /// The flag that should be set externally to stop the tracer.
    flag: Arc<AtomicBool>,
}

impl FlagWatchdog {
    /// Constructs a new `FlagWatchdog` wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    /// Gets a handle to the flag that stops the tracer.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    /// Wraps the watchdog into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
