//! Process-wide plan cache.
//!
//! Keyed by the writer's canonical fingerprint and the reader's resolution
//! fingerprint.  Entries are never evicted; failed resolutions are not
//! stored.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use super::{resolve, ResolveError, ResolvedPlan};
use crate::schema::{Fingerprint, Schema};

type PlanKey = (Fingerprint, Fingerprint);

static PLANS: OnceLock<RwLock<HashMap<PlanKey, Arc<ResolvedPlan>>>> = OnceLock::new();

fn plans() -> &'static RwLock<HashMap<PlanKey, Arc<ResolvedPlan>>> {
    PLANS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Return the shared plan for `writer` read as `reader`, building it on
/// first use.
pub fn plan_for(writer: &Arc<Schema>, reader: &Arc<Schema>) -> Result<Arc<ResolvedPlan>, ResolveError> {
    let key = (writer.fingerprint(), reader.resolution_fingerprint());

    {
        let map = plans().read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(plan) = map.get(&key) {
            return Ok(Arc::clone(plan));
        }
    }

    let plan = Arc::new(resolve(Arc::clone(writer), Arc::clone(reader))?);
    let mut map = plans().write().unwrap_or_else(|poisoned| poisoned.into_inner());
    // Another thread may have built the same plan meanwhile; keep the first.
    let plan = Arc::clone(map.entry(key).or_insert(plan));
    debug!(writer = %key.0, reader = %key.1, cached = map.len(), "plan cache miss");
    Ok(plan)
}

/// Number of plans currently cached.
pub fn cached_plans() -> usize {
    plans().read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
}
