use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::exception::{ExceptionRecord, ExceptionSet};
use super::guard::ScheduleGuard;
use super::model::FlowModel;
use super::output::{ProcessorOutputs, Transaction};
use super::reader::{MbufReader, ReadStatus};
use super::state::ProcessorState;
use crate::align::{AlignedSet, DataAligner};
use crate::config::{InputMode, ProcessorConfig};
use crate::core::{FlowContext, FlowFunc, FlowMessage, StreamInput};
use crate::error::{FlowError, FlowResult};
use crate::hal::QueueDriver;
use crate::observability::ProcessorMetrics;
use crate::queue::{open_channel, OutputPortTable};
use crate::registry::FuncRegistry;

/// Callback receiving exceptions raised by the function itself.
pub type ExceptionReporter = Arc<dyn Fn(&ExceptionRecord) + Send + Sync>;

/// Outcome of one state handler inside the schedule loop.
enum Step {
    Continue,
    Yield(bool),
}

struct ProcessorCore {
    state: ProcessorState,
    func: Option<Box<dyn FlowFunc>>,
    ctx: Option<FlowContext>,
    reader: MbufReader,
    inputs: Option<AlignedSet>,
    current: Option<Transaction>,
    /// Whether the running round consumed or produced anything
    progressed: bool,
}

/// Execution unit: feeds one flow function from its input queues and
/// republishes what it emits.
///
/// `schedule` is cooperative and never blocks on queues. Concurrent callers
/// are turned away by a [`ScheduleGuard`]; the call in progress then asks
/// to be scheduled again so their wake-up is not lost.
pub struct FlowFuncProcessor {
    name: String,
    config: ProcessorConfig,
    device_id: AtomicU32,
    guard: ScheduleGuard,
    suspend_requested: AtomicBool,
    recover_requested: AtomicBool,
    state: AtomicU8,
    /// Mirror of `core.current` readable while `schedule` holds the core
    current_transaction: Mutex<Option<Transaction>>,
    core: Mutex<ProcessorCore>,
    last_schedule: Mutex<Option<Instant>>,
    pending_exceptions: Mutex<BTreeMap<u64, ExceptionRecord>>,
    exception_set: Arc<ExceptionSet>,
    aligner: Option<Arc<DataAligner>>,
    outputs: Arc<ProcessorOutputs>,
    registry: Arc<FuncRegistry>,
    driver: Arc<dyn QueueDriver>,
    metrics: Arc<ProcessorMetrics>,
    reporter: Mutex<Option<ExceptionReporter>>,
    models: Mutex<HashMap<String, Arc<FlowModel>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FlowFuncProcessor {
    pub fn new(
        config: ProcessorConfig,
        driver: Arc<dyn QueueDriver>,
        registry: Arc<FuncRegistry>,
        ports: &OutputPortTable,
    ) -> Result<Self> {
        config.validate()?;
        if !registry.contains(&config.func_name) {
            bail!("processor {}: unknown function '{}'", config.name, config.func_name);
        }

        let channels = config.inputs
            .iter()
            .map(|binding| open_channel(*binding, driver.clone()))
            .collect::<Vec<_>>();
        let aligner = config.align
            .clone()
            .map(|align| Arc::new(DataAligner::new(channels.len(), align)));
        let reader = MbufReader::new(channels, aligner.clone());

        let metrics = Arc::new(ProcessorMetrics::new(config.name.clone()));
        let output_ports = config.outputs
            .iter()
            .map(|binding| ports.get_or_open(*binding))
            .collect();
        let outputs = Arc::new(ProcessorOutputs::new(
            config.name.clone(),
            output_ports,
            &config.usable_outputs(),
            metrics.clone(),
        ));

        Ok(Self {
            name: config.name.clone(),
            device_id: AtomicU32::new(config.device_id),
            config,
            guard: ScheduleGuard::new(),
            suspend_requested: AtomicBool::new(false),
            recover_requested: AtomicBool::new(false),
            state: AtomicU8::new(ProcessorState::Init.as_u8()),
            current_transaction: Mutex::new(None),
            core: Mutex::new(ProcessorCore {
                state: ProcessorState::Init,
                func: None,
                ctx: None,
                reader,
                inputs: None,
                current: None,
                progressed: false,
            }),
            last_schedule: Mutex::new(None),
            pending_exceptions: Mutex::new(BTreeMap::new()),
            exception_set: Arc::new(ExceptionSet::new()),
            aligner,
            outputs,
            registry,
            driver,
            metrics,
            reporter: Mutex::new(None),
            models: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn device_id(&self) -> u32 {
        self.device_id.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn metrics(&self) -> Arc<ProcessorMetrics> {
        self.metrics.clone()
    }

    pub fn aligner(&self) -> Option<&Arc<DataAligner>> {
        self.aligner.as_ref()
    }

    /// Transaction ids under exception. Nested models built for this
    /// processor share it so their waits abort on exception.
    pub fn exception_set(&self) -> Arc<ExceptionSet> {
        self.exception_set.clone()
    }

    pub fn set_exception_reporter(&self, reporter: ExceptionReporter) {
        *lock(&self.reporter) = Some(reporter);
    }

    /// Makes `model` reachable from the function through
    /// `FlowContext::run_model`. Takes effect at the next function init.
    pub fn attach_model(&self, name: impl Into<String>, model: Arc<FlowModel>) {
        lock(&self.models).insert(name.into(), model);
    }

    /// Binds the unit to its device and subscribes event-capable inputs.
    pub fn init(&self, device_id: u32) -> FlowResult<()> {
        let mut core = lock(&self.core);
        if core.state != ProcessorState::Init {
            warn!(processor = %self.name, state = core.state.name(), "init called twice");
            return Err(FlowError::ParamInvalid);
        }
        self.device_id.store(device_id, Ordering::SeqCst);
        core.reader.subscribe_all(device_id)?;
        self.transition(&mut core, ProcessorState::InitFunction);
        Ok(())
    }

    /// Resolves and initializes the function. `InitAgain` leaves the unit in
    /// `InitFunction` so the caller may retry.
    pub fn init_function(&self) -> FlowResult<()> {
        let mut core = lock(&self.core);
        if core.state != ProcessorState::InitFunction {
            return Err(FlowError::ParamInvalid);
        }
        self.init_function_locked(&mut core)
    }

    fn init_function_locked(&self, core: &mut ProcessorCore) -> FlowResult<()> {
        let mut func = match core.func.take() {
            Some(func) => func,
            None => self.registry.resolve(&self.config.func_name).map_err(|e| {
                error!(processor = %self.name, error = %e, "failed to resolve function");
                FlowError::ParamInvalid
            })?,
        };
        let mut ctx = FlowContext::new(
            self.name.clone(),
            self.config.params.clone(),
            self.driver.pool().clone(),
            self.outputs.clone(),
            self.config.input_mode,
            lock(&self.models).clone(),
        );

        match func.init(&mut ctx) {
            Ok(()) => {
                core.func = Some(func);
                core.ctx = Some(ctx);
                self.transition(core, ProcessorState::Ready);
                Ok(())
            }
            Err(FlowError::InitAgain) => {
                debug!(processor = %self.name, "function asked to be initialized again");
                core.func = Some(func);
                Err(FlowError::InitAgain)
            }
            Err(e) => {
                error!(processor = %self.name, error = %e, "function init failed");
                self.metrics.record_error();
                self.transition(core, ProcessorState::Error);
                Err(e)
            }
        }
    }

    /// Runs the state machine as far as it can go without blocking.
    /// Returns true when the caller should schedule again right away.
    pub fn schedule(&self, thread_id: u32) -> bool {
        let Some(token) = self.guard.try_enter() else {
            debug!(processor = %self.name, thread_id, "already scheduling, request queued");
            return false;
        };
        *lock(&self.last_schedule) = Some(Instant::now());
        self.metrics.record_schedule();

        let again = {
            let mut core = lock(&self.core);
            self.run(&mut core, thread_id)
        };
        let requested = token.finish();
        again || requested
    }

    fn run(&self, core: &mut ProcessorCore, thread_id: u32) -> bool {
        loop {
            if let Some(again) = self.apply_control(core) {
                return again;
            }
            let step = match core.state {
                ProcessorState::Init | ProcessorState::Suspended | ProcessorState::Error => {
                    return false;
                }
                ProcessorState::InitFunction => match self.init_function_locked(core) {
                    Ok(()) => Step::Continue,
                    Err(FlowError::InitAgain) => Step::Yield(true),
                    Err(_) => Step::Yield(false),
                },
                ProcessorState::Ready => {
                    core.progressed = false;
                    self.transition(core, ProcessorState::PreparingInput);
                    Step::Continue
                }
                ProcessorState::PreparingInput => self.prepare_input(core),
                ProcessorState::InvokingExceptionHandler => self.handle_exceptions(core),
                ProcessorState::Invoking => self.invoke(core, thread_id),
                ProcessorState::RepublishingOutput => self.republish(core),
                ProcessorState::ScheduleFinished => {
                    self.transition(core, ProcessorState::Ready);
                    Step::Yield(core.progressed)
                }
            };
            if let Step::Yield(again) = step {
                return again;
            }
        }
    }

    /// Applies pending suspend/recover requests. `Some` ends the call.
    fn apply_control(&self, core: &mut ProcessorCore) -> Option<bool> {
        let suspend = self.suspend_requested.load(Ordering::SeqCst);
        let recover = self.recover_requested.load(Ordering::SeqCst);
        if !suspend && !recover {
            return None;
        }

        if suspend && recover {
            self.suspend_requested.store(false, Ordering::SeqCst);
            self.recover_requested.store(false, Ordering::SeqCst);
            error!(processor = %self.name, "suspend and recover requested together");
            self.metrics.record_error();
            self.transition(core, ProcessorState::Error);
            return Some(false);
        }

        if suspend {
            self.suspend_requested.store(false, Ordering::SeqCst);
            self.suspend(core);
            return Some(false);
        }

        self.recover_requested.store(false, Ordering::SeqCst);
        self.recover(core)
    }

    fn suspend(&self, core: &mut ProcessorCore) {
        let mut released = core.inputs.take().map(|set| set.into_iter().flatten().count()).unwrap_or(0);
        match core.reader.discard_all() {
            Ok(count) => released += count,
            Err(e) => warn!(processor = %self.name, error = %e, "failed to discard some input"),
        }
        core.reader.reset_failure();
        core.current = None;
        *lock(&self.current_transaction) = None;
        self.metrics.record_dropped(released as u64);

        // a failed function is not trusted again; recover re-creates it
        if core.state == ProcessorState::Error {
            core.func = None;
            core.ctx = None;
        }
        info!(processor = %self.name, released, "suspended");
        self.transition(core, ProcessorState::Suspended);
    }

    fn recover(&self, core: &mut ProcessorCore) -> Option<bool> {
        if core.state != ProcessorState::Suspended {
            warn!(processor = %self.name, state = core.state.name(), "recover ignored, not suspended");
            return None;
        }

        let Some(func) = core.func.as_mut() else {
            info!(processor = %self.name, "recovering with a fresh function instance");
            self.transition(core, ProcessorState::InitFunction);
            return None;
        };
        if let Err(e) = func.reset_state() {
            error!(processor = %self.name, error = %e, "function failed to reset state");
            self.metrics.record_error();
            self.transition(core, ProcessorState::Error);
            return Some(false);
        }
        info!(processor = %self.name, "recovered");
        self.transition(core, ProcessorState::Ready);
        None
    }

    fn prepare_input(&self, core: &mut ProcessorCore) -> Step {
        if !lock(&self.pending_exceptions).is_empty() {
            self.transition(core, ProcessorState::InvokingExceptionHandler);
            return Step::Continue;
        }
        if core.reader.input_num() == 0 || self.config.input_mode == InputMode::Streaming {
            self.transition(core, ProcessorState::Invoking);
            return Step::Continue;
        }

        let mut received = None;
        match core.reader.read(|set| received = Some(set)) {
            Ok(ReadStatus::Ready) => {}
            Ok(ReadStatus::NotReady { index, needs_poll }) => {
                debug!(processor = %self.name, index, needs_poll, "input not ready");
                return Step::Yield(false);
            }
            Ok(ReadStatus::Partial) => return Step::Yield(true),
            Err(e) => return self.fail(core, "input read failed", e),
        }
        let Some(set) = received else {
            return Step::Yield(false);
        };

        let Some(first) = set.iter().flatten().next() else {
            return Step::Yield(true);
        };
        let transaction = Transaction {
            trans_id: first.transaction_id(),
            stream_label: first.stream_label(),
        };
        core.progressed = true;

        // the aligner filters excepted transactions on its own
        if self.aligner.is_none() && self.exception_set.contains(transaction.trans_id) {
            let dropped = set.into_iter().flatten().count();
            debug!(processor = %self.name, trans_id = transaction.trans_id, dropped, "dropping input of excepted transaction");
            self.metrics.record_dropped(dropped as u64);
            return Step::Continue;
        }

        self.metrics.record_aligned_set();
        core.inputs = Some(set);
        core.current = Some(transaction);
        *lock(&self.current_transaction) = Some(transaction);
        self.transition(core, ProcessorState::Invoking);
        Step::Continue
    }

    fn handle_exceptions(&self, core: &mut ProcessorCore) -> Step {
        let records: Vec<ExceptionRecord> = std::mem::take(&mut *lock(&self.pending_exceptions))
            .into_values()
            .collect();
        let pool = self.driver.pool();
        for record in &records {
            let transaction = Some(Transaction {
                trans_id: record.trans_id,
                stream_label: 0,
            });
            for index in self.outputs.usable_indices() {
                if let Err(e) = self.outputs.write_status(pool, index, record.code, transaction) {
                    return self.fail(core, "exception output failed", e);
                }
            }
            debug!(processor = %self.name, trans_id = record.trans_id, code = record.code, "exception propagated");
        }
        core.progressed = true;
        self.transition(core, ProcessorState::RepublishingOutput);
        Step::Continue
    }

    fn invoke(&self, core: &mut ProcessorCore, thread_id: u32) -> Step {
        let streaming = self.config.input_mode == InputMode::Streaming;
        let ProcessorCore { func, ctx, reader, inputs, current, .. } = &mut *core;
        let (Some(func), Some(ctx)) = (func.as_mut(), ctx.as_mut()) else {
            return self.fail(core, "no function instance", FlowError::ParamInvalid);
        };

        let start = self.metrics.start_invoke();
        let result = if streaming {
            ctx.begin_transaction(None);
            let mut stream = StreamInput::new(reader.channels());
            func.invoke_streaming(ctx, &mut stream)
        } else {
            ctx.begin_transaction(*current);
            match borrow_inputs(inputs.as_ref()) {
                Ok(messages) => func.invoke(ctx, messages),
                Err(e) => Err(e),
            }
        };
        self.metrics.finish_invoke(start);
        let raised = ctx.take_raised();
        ctx.begin_transaction(None);

        for record in raised {
            self.report_raised(record);
        }

        match result {
            Ok(()) => {
                core.progressed = true;
                self.finish_input(core);
                self.transition(core, ProcessorState::RepublishingOutput);
                Step::Continue
            }
            Err(FlowError::ProcPending) => {
                debug!(processor = %self.name, thread_id, "function pending, invoking again next time");
                Step::Yield(true)
            }
            Err(FlowError::QueueEmpty) if streaming => {
                self.finish_input(core);
                self.transition(core, ProcessorState::RepublishingOutput);
                Step::Continue
            }
            Err(e) if self.suspend_requested.load(Ordering::SeqCst) => {
                debug!(processor = %self.name, error = %e, "invoke failure superseded by suspend");
                Step::Continue
            }
            Err(e) => self.fail(core, "function invoke failed", e),
        }
    }

    fn finish_input(&self, core: &mut ProcessorCore) {
        core.inputs = None;
        core.current = None;
        *lock(&self.current_transaction) = None;
    }

    fn republish(&self, core: &mut ProcessorCore) -> Step {
        match self.outputs.flush_all() {
            Ok(true) => {
                self.transition(core, ProcessorState::ScheduleFinished);
                Step::Continue
            }
            Ok(false) => {
                debug!(processor = %self.name, "outputs still blocked, replay later");
                Step::Yield(false)
            }
            Err(e) => self.fail(core, "output replay failed", e),
        }
    }

    fn fail(&self, core: &mut ProcessorCore, what: &str, e: FlowError) -> Step {
        error!(processor = %self.name, state = core.state.name(), error = %e, "{}", what);
        self.metrics.record_error();
        self.transition(core, ProcessorState::Error);
        Step::Yield(false)
    }

    fn transition(&self, core: &mut ProcessorCore, target: ProcessorState) {
        if !core.state.can_transition_to(&target) {
            warn!(processor = %self.name, from = core.state.name(), to = target.name(), "unexpected state transition");
        }
        debug!(processor = %self.name, from = core.state.name(), to = target.name(), "state transition");
        core.state = target;
        self.state.store(target.as_u8(), Ordering::SeqCst);
    }

    fn report_raised(&self, record: ExceptionRecord) {
        warn!(processor = %self.name, trans_id = record.trans_id, code = record.code, "function raised exception");
        self.exclude_transaction(record.trans_id, record.code);
        if let Some(reporter) = lock(&self.reporter).clone() {
            reporter(&record);
        }
    }

    fn exclude_transaction(&self, trans_id: u64, code: i32) {
        if let Some(aligner) = &self.aligner {
            let released = aligner.add_exception_transaction_id(trans_id);
            self.metrics.record_dropped(released as u64);
        }
        self.exception_set.insert(trans_id, code);
    }

    /// Asks the unit to drop all unprocessed input and suspend at the next
    /// schedule call.
    pub fn set_clear_and_suspend(&self) {
        info!(processor = %self.name, "suspend requested");
        self.suspend_requested.store(true, Ordering::SeqCst);
    }

    /// Asks a suspended unit to resume at the next schedule call.
    pub fn set_clear_and_recover(&self) {
        info!(processor = %self.name, "recover requested");
        self.recover_requested.store(true, Ordering::SeqCst);
    }

    /// Stores an exception from the orchestration layer. Data of the
    /// transaction is dropped from now on and the next round emits the
    /// exception code on every usable output.
    pub fn record_exception_info(&self, record: ExceptionRecord) {
        info!(processor = %self.name, trans_id = record.trans_id, code = record.code, "exception recorded");
        self.exclude_transaction(record.trans_id, record.code);
        lock(&self.pending_exceptions).insert(record.trans_id, record);
    }

    pub fn delete_exception_info(&self, trans_id: u64) {
        if let Some(aligner) = &self.aligner {
            aligner.delete_exception_transaction_id(trans_id);
        }
        self.exception_set.remove(trans_id);
        lock(&self.pending_exceptions).remove(&trans_id);
        debug!(processor = %self.name, trans_id, "exception deleted");
    }

    pub fn pending_exception_count(&self) -> usize {
        lock(&self.pending_exceptions).len()
    }

    /// Emits a status message with `ret_code` on output `index` for the
    /// transaction in progress.
    pub fn write_status_output(&self, index: usize, ret_code: i32) -> FlowResult<()> {
        let current = *lock(&self.current_transaction);
        let transaction = current.filter(|current| current.trans_id != 0);
        self.outputs
            .write_status(self.driver.pool(), index, ret_code, transaction)
            .map(|_| ())
    }

    pub fn last_schedule(&self) -> Option<Instant> {
        *lock(&self.last_schedule)
    }

    /// True when the unit was scheduled before but not within `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.last_schedule()
            .map(|at| at.elapsed() > threshold)
            .unwrap_or(false)
    }

    pub fn replay_len(&self, index: usize) -> usize {
        self.outputs.replay_len(index)
    }

    pub fn input_num(&self) -> usize {
        self.config.inputs.len()
    }

    pub fn output_num(&self) -> usize {
        self.outputs.len()
    }
}

/// Fresh references to the held input set; the set itself is kept until
/// the invocation succeeds.
fn borrow_inputs(inputs: Option<&AlignedSet>) -> FlowResult<Vec<Option<FlowMessage>>> {
    let Some(set) = inputs else {
        return Ok(Vec::new());
    };
    set.iter()
        .map(|slot| {
            slot.as_ref()
                .map(|mbuf| FlowMessage::from_mbuf(mbuf.clone_ref()))
                .transpose()
        })
        .collect()
}
