//! Hard parameter bounds
//!
//! Database-defined limits applied on top of the matcher's envelope during
//! refinement. A parameter with no row has no hard bound.

use fitscan_common::{Error, Result};
use sqlx::{Pool, Sqlite};

use crate::types::{HardBounds, ParamKey, ParamKind};

fn kind_from_str(kind: &str) -> Result<ParamKind> {
    match kind {
        "shape" => Ok(ParamKind::Shape),
        "limb_mass" => Ok(ParamKind::LimbMass),
        other => Err(Error::Internal(format!(
            "unknown parameter kind in parameter_bounds: {}",
            other
        ))),
    }
}

/// Load every hard bound
pub async fn load_hard_bounds(db: &Pool<Sqlite>) -> Result<HardBounds> {
    let rows: Vec<(String, String, f64, f64)> = sqlx::query_as(
        "SELECT param_kind, name, min_value, max_value FROM parameter_bounds ORDER BY param_kind, name",
    )
    .fetch_all(db)
    .await
    .map_err(Error::Database)?;

    let mut bounds = HardBounds::default();
    for (kind, name, min, max) in rows {
        bounds.insert(ParamKey::new(kind_from_str(&kind)?, name), min, max);
    }

    tracing::debug!(count = bounds.len(), "Loaded hard parameter bounds");
    Ok(bounds)
}

/// Insert or replace one hard bound
pub async fn save_hard_bound(db: &Pool<Sqlite>, key: &ParamKey, min: f64, max: f64) -> Result<()> {
    if !(min.is_finite() && max.is_finite() && min <= max) {
        return Err(Error::InvalidInput(format!(
            "invalid bounds for {}: [{}, {}]",
            key, min, max
        )));
    }

    sqlx::query(
        "INSERT INTO parameter_bounds (param_kind, name, min_value, max_value) VALUES (?, ?, ?, ?)
         ON CONFLICT(param_kind, name) DO UPDATE SET
             min_value = excluded.min_value,
             max_value = excluded.max_value",
    )
    .bind(key.kind.as_str())
    .bind(&key.name)
    .bind(min)
    .bind(max)
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
