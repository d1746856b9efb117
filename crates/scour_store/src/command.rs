//! The `scour` command surface.
//!
//! Invoke with `{ "scour": "<collection>", "minKey": .., "maxKey": ..,
//! "maxCount": .., "maxSize": .., "maxCountPerSecond": .. }` to scrub one
//! collection, or `{ "scour": 1 }` to scrub every eligible collection in the
//! database. The command replies as soon as the background worker is
//! launched; results land in the health log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::Namespace;
use crate::error::{ScourError, ScourResult};
use crate::job::{self, CheckJobHandle};
use crate::key::RecordKey;
use crate::plan::{self, CheckBounds, CheckRun};
use crate::NodeState;

/// Minimum node feature version the command requires.
pub const MIN_FEATURE_VERSION: u32 = 36;

/// Read-privilege seam consulted before planning.
pub trait AuthSession: Send + Sync + 'static {
    fn check_find(&self, ns: &Namespace) -> bool;
}

/// Permit-everything session for embedded and test use.
pub struct AllowAll;

impl AuthSession for AllowAll {
    fn check_find(&self, _ns: &Namespace) -> bool {
        true
    }
}

/// Single-collection invocation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScourSingleInvocation {
    /// Collection name within the command's database.
    pub scour: String,
    pub min_key: Option<RecordKey>,
    pub max_key: Option<RecordKey>,
    pub max_count: Option<u64>,
    pub max_size: Option<u64>,
    /// Documented rate cap; accepted but not applied.
    pub max_count_per_second: Option<u64>,
}

/// Whole-database invocation, `{ "scour": 1 }`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScourAllInvocation {
    pub scour: u64,
}

/// Synchronous command reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl CommandResponse {
    fn success() -> Self {
        Self {
            ok: true,
            err: None,
        }
    }

    fn failure(err: &ScourError) -> Self {
        Self {
            ok: false,
            err: Some(err.to_string()),
        }
    }
}

/// Result of a command dispatch: the reply sent to the client, plus the
/// worker handle when a run was launched.
pub struct ScourLaunch {
    pub response: CommandResponse,
    pub job: Option<CheckJobHandle>,
}

/// Run the scour command against `db`.
///
/// Planning, authorization, and the feature gate fail synchronously; once
/// the worker is launched nothing further is reported to the caller.
pub fn run_scour_command(
    state: &Arc<NodeState>,
    db: &str,
    body: &serde_json::Value,
) -> ScourLaunch {
    match dispatch(state, db, body) {
        Ok(job) => ScourLaunch {
            response: CommandResponse::success(),
            job: Some(job),
        },
        Err(err) => {
            tracing::warn!(db, error = %err, "scour command rejected");
            ScourLaunch {
                response: CommandResponse::failure(&err),
                job: None,
            }
        }
    }
}

fn dispatch(
    state: &Arc<NodeState>,
    db: &str,
    body: &serde_json::Value,
) -> ScourResult<CheckJobHandle> {
    let found = state.feature_version();
    if found < MIN_FEATURE_VERSION {
        return Err(ScourError::FeatureGate {
            found,
            required: MIN_FEATURE_VERSION,
        });
    }

    let run = parse_and_plan(state, db, body)?;

    for info in &run {
        if !state.auth.check_find(&info.ns) {
            return Err(ScourError::Unauthorized(info.ns.to_string()));
        }
    }

    job::spawn(state.clone(), db.to_string(), run).map_err(ScourError::Storage)
}

fn parse_and_plan(state: &Arc<NodeState>, db: &str, body: &serde_json::Value) -> ScourResult<CheckRun> {
    match body.get("scour") {
        Some(serde_json::Value::String(_)) => {
            let inv: ScourSingleInvocation = serde_json::from_value(body.clone())
                .map_err(|err| ScourError::InvalidOptions(err.to_string()))?;
            let bounds = CheckBounds {
                min_key: inv.min_key,
                max_key: inv.max_key,
                max_count: inv.max_count,
                max_size: inv.max_size,
            };
            plan::plan_single(&state.catalog, db, &inv.scour, bounds)
        }
        Some(serde_json::Value::Number(_)) => {
            let _inv: ScourAllInvocation = serde_json::from_value(body.clone())
                .map_err(|err| ScourError::InvalidOptions(err.to_string()))?;
            plan::plan_all(&state.catalog, db)
        }
        _ => Err(ScourError::InvalidOptions(
            "scour must be a collection name or 1".to_string(),
        )),
    }
}
