// =============================================================================
// Matrix Store — combination_id -> REENTRY | END_TRADING, loaded from CSV
// =============================================================================
//
// The matrix is externally authored (a human edits `matrix_map.csv` through
// an out-of-scope tool); this store only ever consumes it. A reload is
// transactional: the new file is parsed and fully validated in isolation,
// and only swapped into the live map if every invariant in spec §4.2 holds.
// A rejected reload keeps serving the previous map and surfaces the error
// for the caller to log as a `MATRIX_RELOAD_REJECT` diagnostic.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classifier::CombinationId;
use crate::errors::EngineError;
use crate::registry::ParameterSetRegistry;
use crate::types::Generation;

/// The resolution the Matrix Store returns for a given combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MatrixResponse {
    Reentry {
        parameter_set_id: String,
        #[serde(default)]
        notes: Option<String>,
    },
    EndTrading {
        #[serde(default)]
        notes: Option<String>,
    },
}

impl MatrixResponse {
    pub fn is_end_trading(&self) -> bool {
        matches!(self, Self::EndTrading { .. })
    }
}

/// One row of `matrix_map.csv`, as authored externally. Header is bit-exact
/// across implementations (spec §6.2): `combination_id,response_type,
/// parameter_set_id,notes` — no additional columns.
#[derive(Debug, Clone, Deserialize)]
struct MatrixRow {
    combination_id: String,
    response_type: String,
    #[serde(default)]
    parameter_set_id: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

struct Inner {
    map: HashMap<CombinationId, MatrixResponse>,
}

/// In-memory combination -> response lookup, backed by a persisted CSV file.
pub struct MatrixStore {
    inner: RwLock<Inner>,
}

impl MatrixStore {
    /// Parse and fully validate `path` against `registry`, without mutating
    /// any existing store. Used both for the initial load and to validate a
    /// candidate reload before it is swapped in.
    fn parse_and_validate(
        path: &Path,
        registry: &ParameterSetRegistry,
    ) -> Result<HashMap<CombinationId, MatrixResponse>, EngineError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut map = HashMap::new();

        for result in reader.deserialize() {
            let row: MatrixRow = result?;
            let combination_id = CombinationId::parse(&row.combination_id)?;

            if map.contains_key(&combination_id) {
                return Err(EngineError::MatrixReloadReject(format!(
                    "duplicate combination_id: {}",
                    row.combination_id
                )));
            }

            let response = match row.response_type.as_str() {
                "REENTRY" => {
                    let parameter_set_id = row.parameter_set_id.ok_or_else(|| {
                        EngineError::MatrixReloadReject(format!(
                            "{}: REENTRY row missing parameter_set_id",
                            row.combination_id
                        ))
                    })?;
                    if !registry.contains(&parameter_set_id) {
                        return Err(EngineError::RegistryReference(parameter_set_id));
                    }
                    MatrixResponse::Reentry {
                        parameter_set_id,
                        notes: row.notes,
                    }
                }
                "END_TRADING" => MatrixResponse::EndTrading { notes: row.notes },
                other => {
                    return Err(EngineError::MatrixReloadReject(format!(
                        "{}: unknown response_type {other:?}",
                        row.combination_id
                    )))
                }
            };

            if combination_id.generation == Generation::R2 && !response.is_end_trading() {
                return Err(EngineError::MatrixReloadReject(format!(
                    "{}: R2 combinations must resolve to END_TRADING",
                    row.combination_id
                )));
            }

            map.insert(combination_id, response);
        }

        Ok(map)
    }

    /// Load the matrix from `path`, validating against `registry`. Every
    /// legal combination must be present, or this is `MATRIX_INCOMPLETE` —
    /// fatal at startup per spec §4.7.
    pub fn load(
        path: impl AsRef<Path>,
        registry: &ParameterSetRegistry,
        universe: &[CombinationId],
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let map = Self::parse_and_validate(path, registry)?;

        for combination_id in universe {
            if !map.contains_key(combination_id) {
                return Err(EngineError::MatrixIncomplete(combination_id.canonical()));
            }
        }

        info!(count = map.len(), path = %path.display(), "matrix store loaded");
        Ok(Self {
            inner: RwLock::new(Inner { map }),
        })
    }

    /// Attempt a transactional reload. On any validation failure the
    /// previous map is retained untouched and the error is returned.
    pub fn reload(
        &self,
        path: impl AsRef<Path>,
        registry: &ParameterSetRegistry,
        universe: &[CombinationId],
    ) -> Result<(), EngineError> {
        let path = path.as_ref();
        let map = Self::parse_and_validate(path, registry)?;

        for combination_id in universe {
            if !map.contains_key(combination_id) {
                let err = EngineError::MatrixIncomplete(combination_id.canonical());
                warn!(error = %err, "matrix reload rejected — retaining previous map");
                return Err(err);
            }
        }

        self.inner.write().map = map;
        info!(path = %path.display(), "matrix store reloaded");
        Ok(())
    }

    /// Resolve a classified combination to its matrix response. Every legal
    /// combination is present by construction (load-time invariant), so this
    /// never returns `None` for a combination drawn from the reachable
    /// universe.
    pub fn resolve(&self, combination_id: &CombinationId) -> Option<MatrixResponse> {
        self.inner.read().map.get(combination_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
