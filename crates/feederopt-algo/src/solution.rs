//! Candidate solutions: one switch configuration per demand period.

use crate::power_flow::{FlowProvider, FlowResult};
use feederopt_core::{
    BridgePolicy, FeederError, FeederResult, LineId, Network, NetworkConfiguration, PeriodData,
    SwitchSettings,
};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Everything that stays fixed while solutions change.
pub struct ProblemContext {
    pub network: Arc<Network>,
    pub periods: Vec<PeriodData>,
    pub flow_provider: Arc<dyn FlowProvider>,
}

impl ProblemContext {
    pub fn new(
        network: Arc<Network>,
        periods: Vec<PeriodData>,
        flow_provider: Arc<dyn FlowProvider>,
    ) -> FeederResult<Self> {
        if periods.is_empty() {
            return Err(FeederError::Config("at least one period is required".into()));
        }
        for (index, data) in periods.iter().enumerate() {
            if data.period.index != index {
                return Err(FeederError::invalid(
                    format!("period '{}'", data.period.id),
                    format!("index {} at position {index}", data.period.index),
                ));
            }
        }
        Ok(Self {
            network,
            periods,
            flow_provider,
        })
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }
}

impl std::fmt::Debug for ProblemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemContext")
            .field("buses", &self.network.bus_count())
            .field("periods", &self.periods.len())
            .field("flow_provider", &self.flow_provider.name())
            .finish()
    }
}

/// Process-unique solution identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SolutionId(u64);

static NEXT_SOLUTION_ID: AtomicU64 = AtomicU64::new(0);

impl SolutionId {
    fn fresh() -> Self {
        SolutionId(NEXT_SOLUTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Constraint name -> verdict for one configuration.
type CheckCache = Arc<Mutex<HashMap<String, bool>>>;

#[derive(Debug, Clone)]
struct PeriodState {
    configuration: NetworkConfiguration,
    flow: OnceCell<Arc<FlowResult>>,
    checks: CheckCache,
}

impl PeriodState {
    fn new(configuration: NetworkConfiguration) -> Self {
        Self {
            configuration,
            flow: OnceCell::new(),
            checks: CheckCache::default(),
        }
    }

    /// Forget everything derived from the configuration.
    fn reset(&mut self) {
        self.flow = OnceCell::new();
        self.checks = CheckCache::default();
    }
}

/// One switch configuration per period, with lazily computed flows.
///
/// Flow caches are shared between clones through `Arc` and are replaced,
/// never mutated, when a configuration changes.
#[derive(Debug)]
pub struct Solution {
    id: SolutionId,
    context: Arc<ProblemContext>,
    periods: Vec<PeriodState>,
}

impl Clone for Solution {
    /// The copy is a different solution and gets a fresh id.
    fn clone(&self) -> Self {
        Self {
            id: SolutionId::fresh(),
            context: self.context.clone(),
            periods: self.periods.clone(),
        }
    }
}

impl Solution {
    /// A solution with its own settings in every period.
    pub fn new(context: Arc<ProblemContext>, settings: Vec<SwitchSettings>) -> FeederResult<Self> {
        if settings.len() != context.period_count() {
            return Err(FeederError::Config(format!(
                "{} switch settings given for {} periods",
                settings.len(),
                context.period_count()
            )));
        }
        let expected = context.network.switchable_lines().count();
        let periods = settings
            .into_iter()
            .map(|s| {
                if s.switch_count() != expected {
                    return Err(FeederError::InvalidConfiguration(
                        "switch settings belong to another network".into(),
                    ));
                }
                Ok(PeriodState::new(NetworkConfiguration::new(
                    context.network.clone(),
                    s,
                )))
            })
            .collect::<FeederResult<Vec<_>>>()?;
        Ok(Self {
            id: SolutionId::fresh(),
            context,
            periods,
        })
    }

    /// The same settings in every period.
    pub fn from_settings(
        context: Arc<ProblemContext>,
        settings: &SwitchSettings,
    ) -> FeederResult<Self> {
        let all = vec![settings.clone(); context.period_count()];
        Self::new(context, all)
    }

    /// Start from `settings` (all closed when `None`) and repair it into a
    /// radial configuration that supports flow, used in every period.
    pub fn radial_start(
        context: Arc<ProblemContext>,
        settings: Option<&SwitchSettings>,
        policy: &mut BridgePolicy,
    ) -> FeederResult<Self> {
        let settings = settings
            .cloned()
            .unwrap_or_else(|| SwitchSettings::all_closed(&context.network));
        let mut configuration = NetworkConfiguration::new(context.network.clone(), settings);
        configuration.make_radial_flow_possible(policy)?;
        Self::from_settings(context, configuration.settings())
    }

    pub fn id(&self) -> SolutionId {
        self.id
    }

    pub fn context(&self) -> &Arc<ProblemContext> {
        &self.context
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.context.network
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn configuration(&self, period: usize) -> &NetworkConfiguration {
        &self.periods[period].configuration
    }

    pub fn settings(&self, period: usize) -> &SwitchSettings {
        self.periods[period].configuration.settings()
    }

    /// Flow of `period`, computed on first use.
    pub fn flow(&self, period: usize) -> Arc<FlowResult> {
        let state = &self.periods[period];
        state
            .flow
            .get_or_init(|| {
                Arc::new(self.context.flow_provider.compute_flow(
                    &state.configuration,
                    &self.context.periods[period].demands,
                ))
            })
            .clone()
    }

    /// Flow of `period` if it has been computed.
    pub fn cached_flow(&self, period: usize) -> Option<&Arc<FlowResult>> {
        self.periods[period].flow.get()
    }

    /// True if every period is radial and connected.
    pub fn is_radial(&self) -> bool {
        self.periods
            .iter()
            .all(|p| p.configuration.is_radial() && p.configuration.is_connected())
    }

    pub fn set_switch(&mut self, period: usize, line: LineId, open: bool) {
        let state = &mut self.periods[period];
        if state.configuration.is_open(line) == open {
            return;
        }
        state.configuration.set_switch(line, open);
        state.reset();
    }

    /// Replace the configuration of `period`, dropping its flow.
    pub(crate) fn replace_configuration(
        &mut self,
        period: usize,
        configuration: NetworkConfiguration,
    ) {
        debug_assert!(Arc::ptr_eq(configuration.network(), &self.context.network));
        let state = &mut self.periods[period];
        state.configuration = configuration;
        state.reset();
    }

    /// Install a flow computed elsewhere for the current configuration.
    pub(crate) fn install_flow(&mut self, period: usize, flow: Arc<FlowResult>) {
        let state = &mut self.periods[period];
        state.reset();
        let _ = state.flow.set(flow);
    }

    /// Verdict of the constraint called `name` in `period`, running `check`
    /// only if the current configuration has not been checked yet.
    ///
    /// Clones share verdicts until either side changes the period.
    pub(crate) fn period_check(
        &self,
        period: usize,
        name: &str,
        check: impl FnOnce() -> bool,
    ) -> bool {
        let checks = &self.periods[period].checks;
        let known = checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied();
        if let Some(verdict) = known {
            return verdict;
        }
        let verdict = check();
        checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), verdict);
        verdict
    }

    /// Open/closed state by line name, one map per period.
    pub fn to_named_settings(&self) -> Vec<BTreeMap<String, bool>> {
        self.periods
            .iter()
            .map(|p| p.configuration.settings().to_named(&self.context.network))
            .collect()
    }

    pub fn all_settings(&self) -> Vec<SwitchSettings> {
        self.periods
            .iter()
            .map(|p| p.configuration.settings().clone())
            .collect()
    }
}
