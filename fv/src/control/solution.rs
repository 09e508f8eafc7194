use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::{Map, Value as Json};

use crate::dictionary::{as_dict, lookup};
use crate::linalg::SolverControls;
use crate::parallel::Comm;
use crate::{Float, FvError, FvResult};

/// Convergence criterion of one field in an outer loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResidualControl {
    pub tolerance: Float,
    pub rel_tol: Float,
}

impl ResidualControl {
    /// Reads `residualControl` entries keyed by field name or pattern: either a bare absolute
    /// tolerance or a dictionary with `tolerance` and `relTol`.
    pub fn read_all(
        dict: &Map<String, Json>,
        dictionary: &str,
    ) -> FvResult<Vec<(String, ResidualControl)>> {
        let Some(entries) = dict.get("residualControl") else {
            return Ok(Vec::new());
        };
        let name = format!("{dictionary}/residualControl");
        as_dict(entries, &name)?
            .iter()
            .map(|(field, entry)| {
                let control = match entry {
                    Json::Number(tolerance) => ResidualControl {
                        tolerance: tolerance.as_f64().unwrap_or_default(),
                        rel_tol: 0.,
                    },
                    Json::Object(entry) => ResidualControl {
                        tolerance: entry
                            .get("tolerance")
                            .and_then(Json::as_f64)
                            .ok_or_else(|| FvError::missing(&name, format!("{field}/tolerance")))?,
                        rel_tol: entry.get("relTol").and_then(Json::as_f64).unwrap_or(0.),
                    },
                    _ => {
                        return Err(FvError::invalid(
                            &name,
                            field,
                            "expected a tolerance or a dictionary",
                        ))
                    }
                };
                Ok((field.clone(), control))
            })
            .collect()
    }
}

/// The solution controls of a case: linear solver settings per field, relaxation factors and
/// the settings of the outer-loop algorithms.
///
/// ```json
/// {
///     "solvers": {"p": {"solver": "GAMG", "smoother": "GaussSeidel", "tolerance": 1e-6},
///                 "pFinal": {"solver": "GAMG", "smoother": "GaussSeidel", "relTol": 0},
///                 "(U|k)": {"solver": "smoothSolver", "smoother": "symGaussSeidel"}},
///     "PIMPLE": {"nOuterCorrectors": 2, "nCorrectors": 2},
///     "relaxationFactors": {"fields": {"p": 0.3}, "equations": {".*": 0.7}}
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolutionControls {
    solvers: Map<String, Json>,
    field_factors: Map<String, Json>,
    equation_factors: Map<String, Json>,
    document: Map<String, Json>,
}

impl SolutionControls {
    pub fn from_json(document: &Json) -> FvResult<Self> {
        let dict = as_dict(document, "fvSolution")?;
        let solvers = match dict.get("solvers") {
            Some(solvers) => as_dict(solvers, "solvers")?.clone(),
            None => Map::new(),
        };
        let (field_factors, equation_factors) = match dict.get("relaxationFactors") {
            Some(factors) => {
                let factors = as_dict(factors, "relaxationFactors")?;
                if factors.contains_key("fields") || factors.contains_key("equations") {
                    let section = |key: &str| -> FvResult<Map<String, Json>> {
                        match factors.get(key) {
                            Some(entries) => {
                                Ok(as_dict(entries, &format!("relaxationFactors/{key}"))?.clone())
                            }
                            None => Ok(Map::new()),
                        }
                    };
                    (section("fields")?, section("equations")?)
                } else {
                    // A flat list relaxes both the field and its equation.
                    (factors.clone(), factors.clone())
                }
            }
            None => (Map::new(), Map::new()),
        };
        for (key, value) in field_factors.iter().chain(&equation_factors) {
            if !value.is_number() {
                return Err(FvError::invalid(
                    "relaxationFactors",
                    key,
                    "expected a number",
                ));
            }
        }
        Ok(Self {
            solvers,
            field_factors,
            equation_factors,
            document: dict.clone(),
        })
    }

    pub fn read_file(path: impl AsRef<Path>) -> FvResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| FvError::io(path, error))?;
        Self::from_json(&serde_json::from_str(&text)?)
    }

    /// Linear solver settings for `field`. On the final outer iteration a `<field>Final`
    /// entry is preferred when present.
    pub fn solver_controls(&self, field: &str, final_iter: bool) -> FvResult<SolverControls> {
        let final_name = format!("{field}Final");
        let (key, entry) = final_iter
            .then(|| lookup(&self.solvers, &final_name).map(|entry| (final_name.as_str(), entry)))
            .flatten()
            .or_else(|| lookup(&self.solvers, field).map(|entry| (field, entry)))
            .ok_or_else(|| FvError::missing("solvers", field))?;
        let dictionary = format!("solvers/{key}");
        SolverControls::from_dict(as_dict(entry, &dictionary)?, &dictionary)
    }

    /// Relaxation factor of the explicit update of `field`, if any.
    pub fn field_relaxation_factor(&self, field: &str, final_iter: bool) -> Option<Float> {
        relaxation_factor(&self.field_factors, field, final_iter)
    }

    /// Relaxation factor of the equation for `field`, if any.
    pub fn equation_relaxation_factor(&self, field: &str, final_iter: bool) -> Option<Float> {
        relaxation_factor(&self.equation_factors, field, final_iter)
    }

    /// The settings of an outer-loop algorithm such as `PIMPLE` or `SIMPLE`.
    pub fn algorithm(&self, name: &str) -> FvResult<Option<&Map<String, Json>>> {
        self.document
            .get(name)
            .map(|dict| as_dict(dict, name))
            .transpose()
    }
}

/// Outside the final iteration a field takes its own factor or the `default` one. The final
/// iteration is relaxed only by an explicit `<field>Final` entry.
fn relaxation_factor(factors: &Map<String, Json>, field: &str, final_iter: bool) -> Option<Float> {
    let entry = if final_iter {
        lookup(factors, &format!("{field}Final"))
    } else {
        lookup(factors, field).or_else(|| factors.get("default"))
    };
    entry.and_then(Json::as_f64)
}

/// Solution controls that follow edits of their file while a case runs.
#[derive(Clone, Debug)]
pub struct ReloadableControls {
    path: PathBuf,
    modified: Option<SystemTime>,
    controls: SolutionControls,
}

impl ReloadableControls {
    pub fn open(path: impl Into<PathBuf>) -> FvResult<Self> {
        let path = path.into();
        let modified = modification_time(&path)?;
        let controls = SolutionControls::read_file(&path)?;
        Ok(Self {
            path,
            modified,
            controls,
        })
    }

    pub fn current(&self) -> &SolutionControls {
        &self.controls
    }

    /// Re-reads the file if it changed since the last read; returns whether it did.
    pub fn reload_if_modified(&mut self) -> FvResult<bool> {
        if modification_time(&self.path)? == self.modified {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    /// [`Self::reload_if_modified`] agreed between all ranks: every rank re-reads once any
    /// rank saw a change, and every rank fails once any rank failed. Collective.
    pub fn reload_collectively(&mut self, comm: &Comm) -> FvResult<bool> {
        let checked = self.reload_if_modified();
        let modified = comm.any(matches!(checked, Ok(true)));
        let outcome = match checked {
            Ok(false) if modified => self.reload(),
            other => other.map(|_| ()),
        };
        if comm.any(outcome.is_err()) {
            outcome?;
            return Err(FvError::Parallel(
                "solution controls failed to reload on another rank".to_string(),
            ));
        }
        Ok(modified)
    }

    fn reload(&mut self) -> FvResult<()> {
        log::info!("Re-reading solution controls from {}", self.path.display());
        let modified = modification_time(&self.path)?;
        self.controls = SolutionControls::read_file(&self.path)?;
        self.modified = modified;
        Ok(())
    }
}

fn modification_time(path: &Path) -> FvResult<Option<SystemTime>> {
    let metadata = std::fs::metadata(path).map_err(|error| FvError::io(path, error))?;
    Ok(metadata.modified().ok())
}
