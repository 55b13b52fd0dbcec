//! How inserted probes reach the visit recorder.
//!
//! Two exclusive modes exist for a whole session, picked once from [`ProbeMode`]:
//!
//! - **Direct**: each probe loads its id and the native recorder address and issues `calli`
//!   with a stand-alone signature defined in the instrumented module ([`DirectProbes`]).
//! - **Cuckoo**: each probe calls `SafeVisited`, a helper planted in the system library, through
//!   a member reference resolved once per module ([`TrampolineProbes`]). The helper pair itself
//!   is described by [`CuckooNest`].
//!
//! Coverage passes only ever see a [`ProbeDispatch`], the tagged description of the call to
//! emit, so they do not depend on which mode is active.

mod cuckoo;
mod dispatch;

pub use cuckoo::{
    CorrelationContext, CuckooHelper, CuckooNest, CuckooTokens, CUCKOO_CRITICAL_METHOD,
    CUCKOO_NEST_TYPE, CUCKOO_SAFE_METHOD, SYSTEM_ASSEMBLIES,
};
pub use dispatch::{
    DirectProbes, PointerWidth, ProbeArity, ProbeDispatch, ProbeMode, ProbeTargetProvider,
    TrampolineProbes,
};
