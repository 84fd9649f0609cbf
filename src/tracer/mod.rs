//! This module contains the definition of the tracer itself.
//!
//! The tracer drives the analysis pipeline for one transaction:
//! simulation, pre/post diffing, key harvesting and slot resolution, and
//! final assembly. It enforces that only correct phase transitions can
//! occur through use of structs that implement the exact state required at
//! any given point, with the composite [`Tracer::trace`] method running all
//! phases in order.
//!
//! All suspension points sit at the oracle boundary, and each one polls the
//! watchdog first; a cancelled analysis aborts without a partial result.

pub mod state;

use std::{collections::BTreeMap, sync::Arc};

use alloy_json_abi::JsonAbi;
use tracing::{debug, info};

use crate::{
    assembler,
    assembler::StorageAccessTrace,
    cache::{CacheKey, LayoutCache},
    differ,
    error,
    error::{layout as layout_error, Error},
    keys,
    layout::LayoutIndex,
    oracle::{ExecutionOracle, LayoutSource, TransactionRequest},
    resolver::SlotResolver,
    value::Address,
    watchdog::DynWatchdog,
};

/// The configuration of an analysis.
#[derive(Clone, Debug)]
pub struct Config {
    /// The chain the analysed accounts live on, used for layout cache
    /// keying.
    pub chain_id: u64,

    /// The layout cache shared across analyses.
    pub cache: Arc<LayoutCache>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: 1,
            cache:    Arc::new(LayoutCache::default()),
        }
    }
}

/// Creates a new tracer for the provided transaction.
pub fn new(
    oracle: Arc<dyn ExecutionOracle>,
    source: Arc<dyn LayoutSource>,
    config: Config,
    watchdog: DynWatchdog,
    request: TransactionRequest,
) -> Tracer<state::HasTransaction> {
    let state = state::HasTransaction { request };
    Tracer {
        oracle,
        source,
        config,
        watchdog,
        state,
    }
}

/// The core of the storage access analysis, the `Tracer` is responsible for
/// turning one transaction into labeled per-account storage access traces.
pub struct Tracer<S: state::State> {
    /// The execution oracle used for simulation and snapshot queries.
    oracle: Arc<dyn ExecutionOracle>,

    /// The source of contract layout documents.
    source: Arc<dyn LayoutSource>,

    /// The analysis configuration.
    config: Config,

    /// The watchdog polled at every suspension point.
    watchdog: DynWatchdog,

    /// The internal state of the tracer.
    state: S,
}

/// Safe operations available in all states.
impl<S: state::State> Tracer<S> {
    /// Gets a reference to the current state of the tracer.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Gets a reference to the tracer's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Moves the tracer into `new_state`, carrying the handles over.
    fn into_state<NS: state::State>(self, new_state: NS) -> Tracer<NS> {
        Tracer {
            oracle:   self.oracle,
            source:   self.source,
            config:   self.config,
            watchdog: self.watchdog,
            state:    new_state,
        }
    }

    /// Polls the watchdog, aborting the analysis if it asks to stop.
    fn checkpoint(&self) -> error::Result<()> {
        if self.watchdog.should_stop() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Operations available on a newly-created tracer.
impl Tracer<state::HasTransaction> {
    /// Executes the analysis process from beginning to end, performing all
    /// the intermediate phases automatically.
    pub async fn trace(self) -> error::Result<Tracer<state::Assembled>> {
        let tracer = self.simulate().await?;
        let tracer = tracer.diff().await?;
        let tracer = tracer.resolve().await?;
        tracer.assemble()
    }

    /// Simulates (or replays) the transaction through the oracle.
    ///
    /// A reverted simulation surfaces as
    /// [`crate::error::oracle::Error::SimulationReverted`], which carries
    /// the partial access list gathered up to the revert.
    pub async fn simulate(self) -> error::Result<Tracer<state::SimulationComplete>> {
        self.checkpoint()?;
        let simulation = self
            .oracle
            .simulate(&self.state.request)
            .await
            .map_err(Error::from)?;
        debug!(
            accounts = simulation.access_list.len(),
            trace_steps = simulation.trace.len(),
            "simulation complete"
        );

        let request = self.state.request.clone();
        Ok(self.into_state(state::SimulationComplete { request, simulation }))
    }
}

/// Operations available on a tracer that has completed simulation.
impl Tracer<state::SimulationComplete> {
    /// Fetches and diffs the pre/post word of every slot in the access
    /// list, along with each account's intrinsic state.
    pub async fn diff(self) -> error::Result<Tracer<state::DiffComplete>> {
        let mut accounts = BTreeMap::new();

        for (account, slots) in &self.state.simulation.access_list {
            self.checkpoint()?;
            let mut diff = differ::diff_account(self.oracle.as_ref(), *account, slots)
                .await
                .map_err(Error::from)?;

            // The simulation may carry intrinsic snapshots already; they
            // take precedence over the point queries.
            if let Some(pre) = self.state.simulation.intrinsic_pre.get(account) {
                diff.intrinsic.pre = *pre;
            }
            if let Some(post) = self.state.simulation.intrinsic_post.get(account) {
                diff.intrinsic.post = *post;
            }

            accounts.insert(*account, diff);
        }

        let state::SimulationComplete { request, simulation } = self.state.clone();
        Ok(self.into_state(state::DiffComplete {
            request,
            simulation,
            accounts,
        }))
    }
}

/// Operations available on a tracer that has diffed the touched slots.
impl Tracer<state::DiffComplete> {
    /// Obtains layouts for the touched accounts, harvests the candidate
    /// keys, and resolves every observed slot.
    ///
    /// Missing or malformed layouts degrade the affected account to
    /// fallback labels and are recorded as warnings; they never abort the
    /// analysis of other accounts.
    pub async fn resolve(self) -> error::Result<Tracer<state::ResolutionComplete>> {
        let mut layouts: BTreeMap<Address, Option<Arc<LayoutIndex>>> = BTreeMap::new();
        let mut warnings = error::Errors::new();

        for (account, diff) in &self.state.accounts {
            self.checkpoint()?;
            let layout = self
                .obtain_layout(*account, diff.intrinsic.post.code_hash, &mut warnings)
                .await?;
            layouts.insert(*account, layout);
        }

        let abis: Vec<&JsonAbi> = layouts
            .values()
            .flatten()
            .filter_map(|layout| layout.abi())
            .chain(self.state.request.abi())
            .collect();
        let candidates = keys::harvest(&self.state.simulation, &self.state.request, &abis);
        debug!(candidates = candidates.len(), "candidate keys harvested");

        let mut matches = BTreeMap::new();
        for (account, diff) in &self.state.accounts {
            let Some(layout) = layouts.get(account).and_then(Option::as_ref) else {
                continue;
            };
            let resolver = SlotResolver::new(layout, &candidates, &diff.slots);
            let resolved: BTreeMap<_, _> = diff
                .slots
                .keys()
                .map(|slot| (*slot, resolver.resolve(*slot)))
                .collect();
            matches.insert(*account, resolved);
        }

        let accounts = self.state.accounts.clone();
        Ok(self.into_state(state::ResolutionComplete {
            accounts,
            layouts,
            matches,
            warnings,
        }))
    }

    /// Obtains the layout index for one account, preferring the cache and
    /// recording degradations in `warnings`.
    async fn obtain_layout(
        &self,
        account: Address,
        code_hash: crate::value::Word,
        warnings: &mut error::Errors,
    ) -> error::Result<Option<Arc<LayoutIndex>>> {
        let key = CacheKey {
            chain_id: self.config.chain_id,
            address: account,
            code_hash,
        };
        if let Some(cached) = self.config.cache.get(&key) {
            return Ok(Some(cached));
        }

        let document = self
            .source
            .layout_for(account)
            .await
            .map_err(Error::from)?;
        let Some(document) = document else {
            warnings.add_located(
                account,
                Error::from(layout_error::Error::Unavailable { address: account }),
            );
            return Ok(None);
        };

        match LayoutIndex::from_document(&document) {
            Ok(index) => {
                let published = self.config.cache.publish(key, Arc::new(index));
                Ok(Some(published))
            }
            Err(error) => {
                warnings.add_located(account, Error::from(error));
                Ok(None)
            }
        }
    }
}

/// Operations available on a tracer that has resolved every observed slot.
impl Tracer<state::ResolutionComplete> {
    /// Joins matches with diffed values and assembles the final traces.
    ///
    /// This phase is pure compute; it cannot be interrupted and does not
    /// suspend.
    pub fn assemble(self) -> error::Result<Tracer<state::Assembled>> {
        let empty = BTreeMap::new();
        let mut result = BTreeMap::new();
        let mut dropped_matches = 0;

        for (account, diff) in &self.state.accounts {
            let layout = self.state.layouts.get(account).and_then(Option::as_deref);
            let matches = self.state.matches.get(account).unwrap_or(&empty);
            let assembled = assembler::assemble(layout, diff, matches);
            dropped_matches += assembled.dropped_matches;
            result.insert(*account, assembled.trace);
        }

        info!(
            accounts = result.len(),
            dropped_matches, "storage access trace assembled"
        );

        let warnings = self.state.warnings.clone();
        Ok(self.into_state(state::Assembled {
            result,
            warnings,
            dropped_matches,
        }))
    }
}

/// Runs the whole analysis for one transaction and returns the assembled
/// trace per account.
///
/// This is the one-shot form of the pipeline, with no cancellation hook;
/// construct a [`Tracer`] through [`new`] to drive the phases (or cancel
/// them) individually.
pub async fn trace_storage_access(
    oracle: Arc<dyn ExecutionOracle>,
    source: Arc<dyn LayoutSource>,
    config: Config,
    request: TransactionRequest,
) -> error::Result<BTreeMap<Address, StorageAccessTrace>> {
    let tracer = new(
        oracle,
        source,
        config,
        crate::watchdog::LazyWatchdog.in_arc(),
        request,
    );
    Ok(tracer.trace().await?.into_result())
}

/// Operations available on a tracer that has assembled its result.
impl Tracer<state::Assembled> {
    /// Gets the assembled trace per account.
    pub fn result(&self) -> &BTreeMap<Address, StorageAccessTrace> {
        &self.state.result
    }

    /// Consumes the tracer, returning the assembled trace per account.
    #[must_use]
    pub fn into_result(self) -> BTreeMap<Address, StorageAccessTrace> {
        self.state.result
    }

    /// Gets the per-account degradations gathered during the analysis.
    pub fn warnings(&self) -> &error::Errors {
        &self.state.warnings
    }

    /// Gets how many matches were dropped during verification.
    #[must_use]
    pub fn dropped_matches(&self) -> usize {
        self.state.dropped_matches
    }
}
