use super::{DEFAULT_MAX_CAPACITY, DEFAULT_ZONE};
use crate::backend::InventoryBackend;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::{ActorContext, Location, LocationCreate};
use std::sync::Arc;

/// Result of matching raw input against known locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationResolution {
    pub canonical_name: String,
    pub existing_id: Option<i64>,
    pub is_new: bool,
}

impl LocationResolution {
    fn empty() -> Self {
        Self {
            canonical_name: String::new(),
            existing_id: None,
            is_new: false,
        }
    }

    fn existing(location: &Location) -> Self {
        Self {
            canonical_name: location.name.clone(),
            existing_id: Some(location.id),
            is_new: false,
        }
    }

    fn new_name(name: String) -> Self {
        Self {
            canonical_name: name,
            existing_id: None,
            is_new: true,
        }
    }
}

/// `"9"` -> `"Row 9"`; `None` for anything that is not purely numeric
pub fn canonical_row_name(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("Row {}", raw))
    } else {
        None
    }
}

fn find_named<'a>(warehouse: &str, name: &str, known: &'a [Location]) -> Option<&'a Location> {
    let wanted = name.to_lowercase();
    known
        .iter()
        .find(|l| l.warehouse == warehouse && l.name.to_lowercase() == wanted)
}

/// Resolve `raw` against `known` locations of `warehouse`
///
/// An exact case-insensitive match wins. Numeric input is rewritten to the
/// `Row N` pattern and matched again; when that row does not exist the
/// rewritten name is proposed as new, never the bare number.
pub fn resolve(warehouse: &str, raw: &str, known: &[Location]) -> LocationResolution {
    let input = raw.trim();
    if input.is_empty() {
        return LocationResolution::empty();
    }

    if let Some(location) = find_named(warehouse, input, known) {
        return LocationResolution::existing(location);
    }

    match canonical_row_name(input) {
        Some(row) => match find_named(warehouse, &row, known) {
            Some(location) => LocationResolution::existing(location),
            None => LocationResolution::new_name(row),
        },
        None => LocationResolution::new_name(input.to_string()),
    }
}

/// Suggestions for partially typed location input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationPrediction {
    pub matches: Vec<String>,
    pub exact_match: bool,
    /// Only set when numeric shorthand points at exactly one `Row` location
    pub best_guess: Option<String>,
}

fn is_row(name: &str) -> bool {
    name.to_lowercase().starts_with("row")
}

/// Predict which existing location a short input refers to
///
/// Numeric input is expanded to the usual shorthand patterns (`Row 9`,
/// `Row 09`, `R9`, `Aisle 9`, ...); text input is a substring search. `Row`
/// locations sort first, then shorter names.
pub fn predict(raw: &str, known: &[&str]) -> LocationPrediction {
    let input = raw.trim();
    if input.is_empty() {
        return LocationPrediction::default();
    }
    let lowered = input.to_lowercase();

    if let Some(exact) = known.iter().find(|name| name.to_lowercase() == lowered) {
        return LocationPrediction {
            matches: vec![exact.to_string()],
            exact_match: true,
            best_guess: Some(exact.to_string()),
        };
    }

    let numeric = canonical_row_name(input).is_some();
    let mut matches: Vec<String> = if numeric {
        let patterns = [
            format!("row {}", input),
            format!("row {:0>2}", input),
            format!("row {:0>3}", input),
            format!("r{}", input),
            format!("aisle {}", input),
            format!("bin {}", input),
        ];
        known
            .iter()
            .filter(|name| patterns.contains(&name.to_lowercase()))
            .map(|name| name.to_string())
            .collect()
    } else {
        known
            .iter()
            .filter(|name| name.to_lowercase().contains(&lowered))
            .map(|name| name.to_string())
            .collect()
    };
    matches.sort_by(|a, b| is_row(b).cmp(&is_row(a)).then(a.len().cmp(&b.len())));
    matches.dedup();

    let best_guess = if numeric {
        let mut rows = matches.iter().filter(|m| is_row(m));
        match (matches.len(), rows.next(), rows.next()) {
            (1, _, _) => matches.first().cloned(),
            (_, Some(only), None) => Some(only.clone()),
            _ => None,
        }
    } else {
        None
    };

    LocationPrediction {
        matches,
        exact_match: false,
        best_guess,
    }
}

/// Location row the caller should reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub id: i64,
    pub name: String,
    /// This call inserted the row
    pub created: bool,
}

/// Backend-aware resolver that creates missing locations
#[derive(Clone)]
pub struct LocationResolver {
    backend: Arc<dyn InventoryBackend>,
}

impl LocationResolver {
    pub fn new(backend: Arc<dyn InventoryBackend>) -> Self {
        Self { backend }
    }

    /// Resolve `raw` in `warehouse`, creating the location when needed
    ///
    /// Returns `None` for empty input. Unknown names require a privileged
    /// actor; concurrent creators of the same name converge on one row.
    pub async fn ensure(
        &self,
        warehouse: &str,
        raw: &str,
        actor: &ActorContext,
    ) -> AppResult<Option<ResolvedLocation>> {
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let known = self.backend.list_locations(warehouse).await?;
        let resolution = resolve(warehouse, raw, &known);

        if !resolution.is_new {
            return Ok(resolution.existing_id.map(|id| ResolvedLocation {
                id,
                name: resolution.canonical_name,
                created: false,
            }));
        }

        if !actor.is_privileged() {
            crate::security_log!(
                "location_create_denied",
                user_id = actor.id(),
                warehouse = warehouse,
                location = resolution.canonical_name.as_str()
            );
            return Err(AppError::with_message(
                ErrorCode::LocationCreateForbidden,
                format!(
                    "Unauthorized: Only administrators can create new locations (\"{}\")",
                    resolution.canonical_name
                ),
            ));
        }

        self.create(warehouse, resolution.canonical_name, actor)
            .await
            .map(Some)
    }

    /// Insert, and on a unique violation adopt the row a concurrent caller created
    async fn create(
        &self,
        warehouse: &str,
        name: String,
        actor: &ActorContext,
    ) -> AppResult<ResolvedLocation> {
        let request = LocationCreate {
            warehouse: warehouse.to_string(),
            name: name.clone(),
            max_capacity: Some(DEFAULT_MAX_CAPACITY),
            zone: DEFAULT_ZONE.to_string(),
            picking_order: None,
            is_active: true,
        };

        match self.backend.insert_location(request, actor).await {
            Ok(location) => {
                tracing::info!(
                    warehouse = %warehouse,
                    location = %location.name,
                    location_id = location.id,
                    "Location created"
                );
                Ok(ResolvedLocation {
                    id: location.id,
                    name: location.name,
                    created: true,
                })
            }
            Err(err) if err.is_unique_violation() => {
                tracing::debug!(warehouse = %warehouse, location = %name, "Location created concurrently, re-selecting");
                let existing = self
                    .backend
                    .find_location(warehouse, &name)
                    .await?
                    .ok_or_else(|| {
                        AppError::internal(format!(
                            "Location {} reported as duplicate but not found",
                            name
                        ))
                    })?;
                Ok(ResolvedLocation {
                    id: existing.id,
                    name: existing.name,
                    created: false,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use shared::error::ErrorKind;

    fn loc(id: i64, warehouse: &str, name: &str) -> Location {
        Location {
            id,
            warehouse: warehouse.into(),
            name: name.into(),
            max_capacity: Some(550),
            zone: "UNASSIGNED".into(),
            picking_order: None,
            is_active: true,
        }
    }

    #[test]
    fn test_resolve_exact_match_is_case_insensitive() {
        let known = vec![loc(1, "LUDLOW", "Row 9")];
        let r = resolve("LUDLOW", "row 9", &known);
        assert_eq!(r.canonical_name, "Row 9");
        assert_eq!(r.existing_id, Some(1));
        assert!(!r.is_new);
    }

    #[test]
    fn test_resolve_numeric_shorthand() {
        let known = vec![loc(1, "LUDLOW", "Row 9"), loc(2, "ATS", "Row 4")];
        assert_eq!(resolve("LUDLOW", "9", &known).existing_id, Some(1));

        // Row 4 only exists in the other warehouse
        let r = resolve("LUDLOW", " 4 ", &known);
        assert_eq!(r.canonical_name, "Row 4");
        assert!(r.is_new);
    }

    #[test]
    fn test_resolve_empty_input() {
        let r = resolve("LUDLOW", "   ", &[]);
        assert_eq!(r, LocationResolution::empty());
    }

    #[test]
    fn test_predict_prefers_row_locations() {
        let known = ["R9", "Row 09", "Bin 9", "Dock"];
        let p = predict("9", &known);
        assert_eq!(p.matches, vec!["Row 09", "R9", "Bin 9"]);
        assert_eq!(p.best_guess.as_deref(), Some("Row 09"));
        assert!(!p.exact_match);

        let p = predict("do", &known);
        assert_eq!(p.matches, vec!["Dock"]);
        assert_eq!(p.best_guess, None);
    }

    #[tokio::test]
    async fn test_staff_cannot_create_location() {
        let backend = Arc::new(MemoryBackend::new());
        let resolver = LocationResolver::new(backend.clone());
        let err = resolver
            .ensure("LUDLOW", "Row 77", &ActorContext::staff("Picker", "u1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::LocationCreateForbidden);
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(backend.locations_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_admin_creates_with_defaults() {
        let backend = Arc::new(MemoryBackend::new());
        let resolver = LocationResolver::new(backend.clone());
        let resolved = resolver
            .ensure("LUDLOW", "12", &ActorContext::admin("Admin", "a1"))
            .await
            .unwrap()
            .unwrap();
        assert!(resolved.created);
        assert_eq!(resolved.name, "Row 12");

        let rows = backend.locations_snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].max_capacity, Some(DEFAULT_MAX_CAPACITY));
        assert_eq!(rows[0].zone, DEFAULT_ZONE);
    }

    #[tokio::test]
    async fn test_existing_location_needs_no_privilege() {
        let backend = Arc::new(MemoryBackend::new());
        let row = backend.seed_location("LUDLOW", "Row 3", Some(3));
        let resolver = LocationResolver::new(backend);
        let resolved = resolver
            .ensure("LUDLOW", "3", &ActorContext::staff("Picker", "u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, row.id);
        assert!(!resolved.created);
    }
}
