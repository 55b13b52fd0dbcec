//! The JIT-time workhorse.
//!
//! [`CoverageProfiler`] reacts to two runtime notifications:
//!
//! - [`CoverageProfiler::module_load_finished`] records the module's assembly identities, plants
//!   the cuckoo helpers when the system library loads, and registers injected types.
//! - [`CoverageProfiler::jit_compilation_started`] decodes the method about to be compiled,
//!   inserts the probes for its coverage points and hands the new body back to the host.
//!
//! Both are fail-open. A failure anywhere leaves the method (or module) exactly as the runtime
//! supplied it and is reported through `log::warn!`; the application keeps running, only
//! without coverage for that method.

use std::sync::Arc;

use crate::{
    config::ProfilerConfig,
    coverage::{instrument, InstrumentationPoints, Instrumented},
    host::{CuckooMetadata, FunctionId, Host, MethodKey, ModuleId, PointSource, TypeInjector},
    il::{Method, MethodDecoder, MethodEncoder},
    injection::Registration,
    probe::{
        CuckooHelper, CuckooNest, DirectProbes, PointerWidth, ProbeMode, ProbeTargetProvider,
        TrampolineProbes,
    },
    registry::AssemblyRegistry,
    threshold::{VisitRecorder, VisitSink, VisitThreshold},
    Result,
};

/// Native entry points of the visit recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderAddresses {
    /// `visit(id)`, target of direct probes
    pub visit: u64,
    /// `visit_with_context(id, high, low)`, target of the critical cuckoo helper
    pub visit_with_context: u64,
    /// Pointer size of the process
    pub pointer_width: PointerWidth,
}

/// The outside world as seen by the profiler.
#[derive(Clone)]
pub struct Collaborators {
    /// Owner of method bodies
    pub host: Arc<dyn Host>,
    /// Supplier of coverage points
    pub points: Arc<dyn PointSource>,
    /// Injected type layer
    pub injector: Arc<dyn TypeInjector>,
    /// Metadata definitions for probes
    pub metadata: Arc<dyn CuckooMetadata>,
}

/// Why a method was compiled unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SkipReason {
    /// No sequence points were supplied
    NoPoints,
    /// The body already carries its probes
    AlreadyInstrumented,
}

/// What happened to a method about to be compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitOutcome {
    /// Probes were inserted and the new body installed
    Instrumented {
        /// Sequence probes inserted
        sequence_probes: usize,
        /// Branch edge probes inserted
        branch_probes: usize,
    },
    /// The method is a cuckoo helper and received its generated body
    HelperReplaced(CuckooHelper),
    /// The method was left alone
    Skipped(SkipReason),
    /// Instrumentation failed and the original body stays in place
    Failed,
}

/// Coverage instrumentation for one profiling session.
pub struct CoverageProfiler {
    config: ProfilerConfig,
    host: Arc<dyn Host>,
    points: Arc<dyn PointSource>,
    injector: Arc<dyn TypeInjector>,
    metadata: Arc<dyn CuckooMetadata>,
    probes: Box<dyn ProbeTargetProvider>,
    nest: CuckooNest,
    registry: AssemblyRegistry,
    threshold: Arc<VisitThreshold>,
    encoder: MethodEncoder,
}

impl CoverageProfiler {
    /// Set up a session; the probe mode is fixed from here on
    #[must_use]
    pub fn new(
        config: ProfilerConfig,
        collaborators: Collaborators,
        recorder: RecorderAddresses,
    ) -> Self {
        let probes: Box<dyn ProbeTargetProvider> = match config.probe_mode {
            ProbeMode::Direct => Box::new(DirectProbes::new(
                recorder.visit,
                recorder.pointer_width,
                Arc::clone(&collaborators.metadata),
            )),
            ProbeMode::Cuckoo => Box::new(TrampolineProbes::new(Arc::clone(
                &collaborators.injector,
            ))),
        };

        CoverageProfiler {
            threshold: Arc::new(VisitThreshold::new(config.threshold)),
            nest: CuckooNest::new(recorder.visit_with_context, recorder.pointer_width),
            config,
            host: collaborators.host,
            points: collaborators.points,
            injector: collaborators.injector,
            metadata: collaborators.metadata,
            probes,
            registry: AssemblyRegistry::new(),
            encoder: MethodEncoder::new(),
        }
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Visit counters shared with the runtime recorder
    #[must_use]
    pub fn threshold(&self) -> Arc<VisitThreshold> {
        Arc::clone(&self.threshold)
    }

    /// Runtime recorder over this session's counters, buffering unless safe mode is on
    pub fn recorder<S: VisitSink>(&self, sink: S) -> VisitRecorder<S> {
        VisitRecorder::new(self.threshold(), sink).with_safe_mode(self.config.safe_mode)
    }

    /// The cuckoo helper pair
    #[must_use]
    pub fn nest(&self) -> &CuckooNest {
        &self.nest
    }

    /// Assemblies seen so far
    #[must_use]
    pub fn registry(&self) -> &AssemblyRegistry {
        &self.registry
    }

    /// A module finished loading.
    ///
    /// Each step is attempted independently; failures are logged and do not stop the others.
    pub fn module_load_finished(&self, module: ModuleId) {
        if self.config.probe_mode == ProbeMode::Cuckoo {
            if let Err(error) = self.register_cuckoos(module) {
                log::warn!("module {module:#x}: {error}");
            }
        }

        if let Err(error) = self.registry.record_module(self.host.as_ref(), module) {
            log::warn!("module {module:#x}: recording assembly metadata failed: {error}");
        }

        if self.injector.register_type_in_module(module) == Registration::Registered {
            let injection = self.injector.inject_type_implementation_in_module(module);
            log::debug!("module {module:#x}: injected type implementation {injection}");
        }
    }

    fn register_cuckoos(&self, module: ModuleId) -> Result<()> {
        let assembly = self.host.module_assembly_name(module)?;
        if !CuckooNest::is_system_assembly(&assembly) {
            return Ok(());
        }

        self.nest.define(module, self.metadata.as_ref())?;
        Ok(())
    }

    /// A method is about to be compiled; instrument it if it has coverage points.
    ///
    /// Never fails: errors are logged and reported as [`JitOutcome::Failed`] with the original
    /// body left in place.
    pub fn jit_compilation_started(&self, function: FunctionId, key: MethodKey) -> JitOutcome {
        match self.compile(function, key) {
            Ok(outcome) => outcome,
            Err(error) => {
                log::warn!(
                    "method {} in module {:#x} left uninstrumented: {error}",
                    key.token,
                    key.module
                );
                JitOutcome::Failed
            }
        }
    }

    fn compile(&self, function: FunctionId, key: MethodKey) -> Result<JitOutcome> {
        if self.config.probe_mode == ProbeMode::Cuckoo {
            if let Some(helper) = self.nest.helper(key) {
                self.replace_helper(key, helper)?;
                return Ok(JitOutcome::HelperReplaced(helper));
            }
        }

        let points = self.points.points(key)?;
        if points.sequence_points.is_empty() {
            log::debug!("method {} has no sequence points", key.token);
            return Ok(JitOutcome::Skipped(SkipReason::NoPoints));
        }

        let body = self.host.method_body(key)?;
        let mut method = MethodDecoder::decode(&body)?;
        if self.config.diagnostics {
            self.dump_points(key, &points);
            log::trace!("{} before instrumentation:\n{method}", key.token);
        }

        let dispatch = self.probes.dispatch_for(key.module)?;
        let (sequence_probes, branch_probes) = match instrument(&mut method, &points, &dispatch)? {
            Instrumented::Applied {
                sequence_probes,
                branch_probes,
            } => (sequence_probes, branch_probes),
            Instrumented::AlreadyInstrumented => {
                log::debug!("method {} already instrumented", key.token);
                return Ok(JitOutcome::Skipped(SkipReason::AlreadyInstrumented));
            }
            Instrumented::NoSequencePoints => return Ok(JitOutcome::Skipped(SkipReason::NoPoints)),
        };

        self.install(key, &mut method)?;
        if self.config.diagnostics {
            log::trace!("{} after instrumentation:\n{method}", key.token);
        }

        // The body is live from here on; a rejected map only degrades debugging
        if let Err(error) = self
            .host
            .set_instrumented_offset_map(function, &method.offset_map())
        {
            log::warn!("method {}: offset map rejected: {error}", key.token);
        }

        if self.threshold.threshold() != 0 {
            if let Some(id) = points.max_sequence_id() {
                self.threshold.resize(id as usize + 1);
            }
            if let Some(id) = points.max_branch_id() {
                self.threshold.resize(id as usize + 1);
            }
        }

        Ok(JitOutcome::Instrumented {
            sequence_probes,
            branch_probes,
        })
    }

    fn replace_helper(&self, key: MethodKey, helper: CuckooHelper) -> Result<()> {
        let mut method = match helper {
            CuckooHelper::Critical => self.nest.critical_method()?,
            CuckooHelper::Safe => {
                let context = self.injector.correlation_context(key.module);
                self.nest.safe_method(context.as_ref())?
            }
        };

        self.install(key, &mut method)?;
        log::info!("{helper:?} cuckoo body installed for {}", key.token);
        Ok(())
    }

    /// Encode into a host-allocated buffer and hand it over
    fn install(&self, key: MethodKey, method: &mut Method) -> Result<()> {
        let size = self.encoder.method_size(method)?;
        let mut body = self.host.allocate_method_body(key.module, size)?;
        let written = self.encoder.encode_into(method, &mut body)?;
        body.truncate(written);

        self.host.set_method_body(key, body)
    }

    fn dump_points(&self, key: MethodKey, points: &InstrumentationPoints) {
        log::trace!("{} sequence points:", key.token);
        for point in &points.sequence_points {
            log::trace!("IL_{:04X} {}", point.offset, point.id);
        }
        log::trace!("{} branch points:", key.token);
        for point in &points.branch_points {
            log::trace!("IL_{:04X} ({}) {}", point.offset, point.path, point.id);
        }
    }
}
