//! End-to-end tests of a profiling session against an in-memory host.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use cilcover::{
    config::ProfilerConfig,
    coverage::{BranchPoint, InstrumentationPoints, SequencePoint},
    host::{
        AssemblyVersions, CuckooMetadata, FunctionId, Host, MethodKey, ModuleId, PointSource,
        TypeInjector,
    },
    il::{MethodDecoder, OffsetMapping},
    injection::{Injection, Registration},
    probe::{CorrelationContext, CuckooHelper, CuckooTokens, PointerWidth, ProbeArity},
    profiler::{Collaborators, CoverageProfiler, JitOutcome, RecorderAddresses, SkipReason},
    registry::{AssemblyRecord, AssemblyVersion, ModuleAssemblies},
    threshold::{VisitRecorder, VisitSink},
    Error, Result, Token,
};

const CORELIB: ModuleId = 0x100;
const APP: ModuleId = 0x200;

const CRITICAL: Token = Token::new(0x0600_0F00);
const SAFE: Token = Token::new(0x0600_0F01);

#[derive(Default)]
struct MemoryHost {
    bodies: Mutex<HashMap<MethodKey, Vec<u8>>>,
    reject_bodies: bool,
}

impl MemoryHost {
    fn with_body(self, key: MethodKey, body: &[u8]) -> Self {
        self.bodies.lock().unwrap().insert(key, body.to_vec());
        self
    }

    fn body(&self, key: MethodKey) -> Vec<u8> {
        self.bodies.lock().unwrap()[&key].clone()
    }
}

impl Host for MemoryHost {
    fn method_body(&self, key: MethodKey) -> Result<Vec<u8>> {
        self.bodies
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::HostApi(format!("no body for {}", key.token)))
    }

    fn allocate_method_body(&self, _module: ModuleId, size: usize) -> Result<Vec<u8>> {
        Ok(vec![0; size])
    }

    fn set_method_body(&self, key: MethodKey, body: Vec<u8>) -> Result<()> {
        if self.reject_bodies {
            return Err(Error::HostApi("SetILFunctionBody".to_string()));
        }
        self.bodies.lock().unwrap().insert(key, body);
        Ok(())
    }

    fn set_instrumented_offset_map(
        &self,
        _function: FunctionId,
        _map: &[OffsetMapping],
    ) -> Result<()> {
        Ok(())
    }

    fn module_assembly_name(&self, module: ModuleId) -> Result<String> {
        match module {
            CORELIB => Ok("mscorlib".to_string()),
            APP => Ok("App".to_string()),
            _ => Err(Error::HostApi("unknown module".to_string())),
        }
    }

    fn module_assemblies(&self, module: ModuleId) -> Result<ModuleAssemblies> {
        let record = |name: &str, major| AssemblyRecord {
            name: name.to_string(),
            version: AssemblyVersion::new(major, 0, 0, 0),
            public_key_or_token: vec![0xB7, 0x7A, 0x5C, 0x56, 0x19, 0x34, 0xE0, 0x89],
        };
        match module {
            CORELIB => Ok(ModuleAssemblies {
                assembly: record("mscorlib", 4),
                references: Vec::new(),
            }),
            _ => Ok(ModuleAssemblies {
                assembly: record("App", 1),
                references: vec![record("mscorlib", 2), record("mscorlib", 4)],
            }),
        }
    }
}

struct FixedPoints(HashMap<MethodKey, InstrumentationPoints>);

impl PointSource for FixedPoints {
    fn points(&self, key: MethodKey) -> Result<InstrumentationPoints> {
        Ok(self.0.get(&key).cloned().unwrap_or_default())
    }
}

struct Injector;

impl TypeInjector for Injector {
    fn register_type_in_module(&self, _module: ModuleId) -> Registration {
        Registration::NotApplicable
    }

    fn inject_type_implementation_in_module(&self, _module: ModuleId) -> Injection {
        Injection::Illegal
    }

    fn safe_probe_token(&self, module: ModuleId) -> Result<Token> {
        if module == APP {
            Ok(Token::new(0x0A00_0099))
        } else {
            Err(Error::HostApi("DefineMemberRef".to_string()))
        }
    }

    fn correlation_context(&self, _module: ModuleId) -> Option<CorrelationContext> {
        Some(CorrelationContext {
            current: Token::new(0x0A00_0050),
            high_field: Token::new(0x0400_0001),
            low_field: Token::new(0x0400_0002),
            locals_signature: Token::new(0x1100_0009),
        })
    }
}

struct Metadata;

impl CuckooMetadata for Metadata {
    fn define_cuckoos(&self, _module: ModuleId) -> Result<CuckooTokens> {
        Ok(CuckooTokens {
            critical: CRITICAL,
            safe: SAFE,
        })
    }

    fn probe_signature(&self, _module: ModuleId, _arity: ProbeArity) -> Result<Token> {
        Ok(Token::new(0x1100_0001))
    }
}

#[derive(Default)]
struct Visits(Mutex<Vec<u32>>);

impl VisitSink for Visits {
    fn visit(&self, id: u32) {
        self.0.lock().unwrap().push(id);
    }

    fn visit_with_context(&self, id: u32, _high: u64, _low: u64) {
        self.0.lock().unwrap().push(id);
    }
}

#[derive(Default)]
struct Buffered {
    pending: Mutex<Vec<u32>>,
    sent: Mutex<Vec<u32>>,
}

impl VisitSink for Buffered {
    fn visit(&self, id: u32) {
        self.sent.lock().unwrap().push(id);
    }

    fn visit_buffered(&self, id: u32) {
        self.pending.lock().unwrap().push(id);
    }

    fn visit_with_context(&self, id: u32, _high: u64, _low: u64) {
        self.sent.lock().unwrap().push(id);
    }

    fn flush(&self) {
        let mut pending = self.pending.lock().unwrap();
        self.sent.lock().unwrap().append(&mut pending);
    }
}

fn app_method(row: u32) -> MethodKey {
    MethodKey::new(APP, Token::new(0x0600_0000 | row))
}

fn session(config: ProfilerConfig, host: Arc<MemoryHost>) -> CoverageProfiler {
    let mut points = HashMap::new();
    points.insert(
        app_method(1),
        InstrumentationPoints::new(
            vec![
                SequencePoint { offset: 0, id: 1 },
                SequencePoint { offset: 4, id: 2 },
            ],
            vec![
                BranchPoint {
                    offset: 1,
                    path: 0,
                    id: 3,
                },
                BranchPoint {
                    offset: 1,
                    path: 1,
                    id: 4,
                },
            ],
        ),
    );
    points.insert(
        MethodKey::new(CORELIB, Token::new(0x0600_0001)),
        InstrumentationPoints::new(vec![SequencePoint { offset: 0, id: 5 }], Vec::new()),
    );

    CoverageProfiler::new(
        config,
        Collaborators {
            host,
            points: Arc::new(FixedPoints(points)),
            injector: Arc::new(Injector),
            metadata: Arc::new(Metadata),
        },
        RecorderAddresses {
            visit: 0x7000_0000,
            visit_with_context: 0x7000_1000,
            pointer_width: PointerWidth::Bits64,
        },
    )
}

/// `ldarg.0; brtrue.s L; nop; L: ret`
const CONDITIONAL: [u8; 6] = [0x16, 0x02, 0x2D, 0x01, 0x00, 0x2A];

#[test]
fn session_from_environment() {
    let config = ProfilerConfig::from_lookup(|key| match key {
        "OpenCover_Profiler_Threshold" => Some("2".to_string()),
        "OpenCover_Profiler_Instrumentation" => Some("cuckoo".to_string()),
        "OpenCover_Profiler_SafeMode" => Some("1".to_string()),
        _ => None,
    })
    .unwrap();

    let host = Arc::new(MemoryHost::default().with_body(app_method(1), &CONDITIONAL));
    let profiler = session(config, host.clone());

    profiler.module_load_finished(CORELIB);
    profiler.module_load_finished(APP);
    assert_eq!(profiler.nest().module(), Some(CORELIB));
    assert_eq!(
        profiler.registry().find_max_version("mscorlib"),
        Some(AssemblyVersion::new(4, 0, 0, 0))
    );

    let outcome = profiler.jit_compilation_started(1, app_method(1));
    assert_eq!(
        outcome,
        JitOutcome::Instrumented {
            sequence_probes: 2,
            branch_probes: 2
        }
    );
    let method = MethodDecoder::decode(&host.body(app_method(1))).unwrap();
    assert_eq!(method.len(), 14);

    // The runtime side shares the counters sized by instrumentation
    let recorder = profiler.recorder(Visits::default());
    assert!(recorder.is_safe_mode());
    for _ in 0..3 {
        recorder.visit(1);
        recorder.visit(4);
    }
    recorder.visit(0);
    assert_eq!(*recorder.sink().0.lock().unwrap(), vec![1, 4, 1, 4]);
}

#[test]
fn recorder_buffers_outside_safe_mode() {
    let host = Arc::new(MemoryHost::default().with_body(app_method(1), &CONDITIONAL));
    let profiler = session(ProfilerConfig::default(), host);
    assert!(!profiler.config().safe_mode);

    let recorder = profiler.recorder(Buffered::default());
    recorder.visit(3);
    recorder.visit(4);
    assert!(recorder.sink().sent.lock().unwrap().is_empty());

    recorder.flush();
    assert_eq!(*recorder.sink().sent.lock().unwrap(), vec![3, 4]);

    let unbuffered = VisitRecorder::new(profiler.threshold(), Buffered::default())
        .with_safe_mode(true);
    unbuffered.visit(3);
    assert_eq!(*unbuffered.sink().sent.lock().unwrap(), vec![3]);
}

#[test]
fn helpers_are_replaced_not_instrumented() {
    let host = Arc::new(MemoryHost::default());
    let profiler = session(ProfilerConfig::default(), host.clone());
    profiler.module_load_finished(CORELIB);

    let critical = MethodKey::new(CORELIB, CRITICAL);
    let safe = MethodKey::new(CORELIB, SAFE);
    assert_eq!(
        profiler.jit_compilation_started(10, critical),
        JitOutcome::HelperReplaced(CuckooHelper::Critical)
    );
    assert_eq!(
        profiler.jit_compilation_started(11, safe),
        JitOutcome::HelperReplaced(CuckooHelper::Safe)
    );

    let critical_body = MethodDecoder::decode(&host.body(critical)).unwrap();
    let ops: Vec<_> = critical_body.iter().map(|(_, i)| i.mnemonic()).collect();
    assert_eq!(ops, ["ldarg.0", "ldarg.1", "ldarg.2", "ldc.i8", "calli", "ret"]);

    let safe_body = MethodDecoder::decode(&host.body(safe)).unwrap();
    assert_eq!(safe_body.local_var_sig, Some(Token::new(0x1100_0009)));
    assert!(safe_body.init_locals);
    let ops: Vec<_> = safe_body.iter().map(|(_, i)| i.mnemonic()).collect();
    assert_eq!(
        ops,
        ["call", "stloc.0", "ldarg.0", "ldloc.0", "ldfld", "ldloc.0", "ldfld", "call", "ret"]
    );
}

#[test]
fn trampoline_failure_leaves_body_untouched() {
    let key = MethodKey::new(CORELIB, Token::new(0x0600_0001));
    let host = Arc::new(MemoryHost::default().with_body(key, &[0x06, 0x2A]));
    let profiler = session(ProfilerConfig::default(), host.clone());

    assert_eq!(profiler.jit_compilation_started(1, key), JitOutcome::Failed);
    assert_eq!(host.body(key), vec![0x06, 0x2A]);
}

#[test]
fn rejected_body_is_reported() {
    let host = Arc::new(MemoryHost {
        reject_bodies: true,
        ..MemoryHost::default()
    }
    .with_body(app_method(1), &CONDITIONAL));
    let profiler = session(ProfilerConfig::direct(), host.clone());

    assert_eq!(profiler.jit_compilation_started(1, app_method(1)), JitOutcome::Failed);
    assert_eq!(host.body(app_method(1)), CONDITIONAL);
}

#[test]
fn unlisted_methods_are_skipped() {
    let host = Arc::new(MemoryHost::default().with_body(app_method(2), &CONDITIONAL));
    let profiler = session(ProfilerConfig::direct(), host);
    assert_eq!(
        profiler.jit_compilation_started(2, app_method(2)),
        JitOutcome::Skipped(SkipReason::NoPoints)
    );
}
