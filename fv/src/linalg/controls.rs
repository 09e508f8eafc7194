use std::fmt::Display;
use std::str::FromStr;

use serde_json::{Map, Value as Json};
use strum::IntoEnumIterator;

use crate::dictionary::{as_dict, read_string};
use crate::{Float, FvError, FvResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
pub enum SolverKind {
    #[strum(serialize = "PCG")]
    Pcg,
    #[strum(to_string = "PBiCGStab", serialize = "PBiCG")]
    PBiCGStab,
    #[strum(serialize = "smoothSolver")]
    SmoothSolver,
    #[strum(serialize = "GAMG")]
    Gamg,
    #[strum(serialize = "diagonal")]
    Diagonal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
pub enum PreconditionerKind {
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "diagonal")]
    Diagonal,
    #[strum(to_string = "DIC", serialize = "FDIC")]
    Dic,
    #[strum(serialize = "DILU")]
    Dilu,
    #[strum(serialize = "GAMG")]
    Gamg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
pub enum SmootherKind {
    GaussSeidel,
    #[strum(serialize = "symGaussSeidel")]
    SymGaussSeidel,
    #[strum(serialize = "DIC")]
    Dic,
    #[strum(serialize = "DILU")]
    Dilu,
    DICGaussSeidel,
}

/// Parses a selection by name, listing the valid names when it is unknown.
pub fn parse_kind<E>(kind: &'static str, name: &str) -> FvResult<E>
where
    E: FromStr + IntoEnumIterator + Display,
{
    E::from_str(name).map_err(|_| FvError::UnknownType {
        kind,
        name: name.to_owned(),
        valid: E::iter().map(|value| value.to_string()).collect(),
    })
}

/// Settings of the multigrid hierarchy and cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct GamgControls {
    pub n_cells_in_coarsest_level: usize,
    pub merge_levels: usize,
    pub n_pre_sweeps: usize,
    pub n_post_sweeps: usize,
    pub n_finest_sweeps: usize,
    /// Coarsest levels up to this size are solved by LU decomposition.
    pub direct_solve_limit: usize,
    /// Cycles per application when multigrid preconditions another solver.
    pub n_vcycles: usize,
}

impl Default for GamgControls {
    fn default() -> Self {
        Self {
            n_cells_in_coarsest_level: 10,
            merge_levels: 1,
            n_pre_sweeps: 0,
            n_post_sweeps: 2,
            n_finest_sweeps: 2,
            direct_solve_limit: 500,
            n_vcycles: 2,
        }
    }
}

/// Settings of one linear solve, as read from a `solvers` entry of the solution controls.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverControls {
    pub solver: SolverKind,
    pub preconditioner: PreconditionerKind,
    pub smoother: SmootherKind,
    pub tolerance: Float,
    pub rel_tol: Float,
    pub max_iter: usize,
    pub min_iter: usize,
    pub n_sweeps: usize,
    pub gamg: GamgControls,
    pub fatal_on_non_convergence: bool,
}

impl Default for SolverControls {
    fn default() -> Self {
        Self {
            solver: SolverKind::Pcg,
            preconditioner: PreconditionerKind::Dic,
            smoother: SmootherKind::GaussSeidel,
            tolerance: 1e-6,
            rel_tol: 0.,
            max_iter: 1000,
            min_iter: 0,
            n_sweeps: 1,
            gamg: GamgControls::default(),
            fatal_on_non_convergence: false,
        }
    }
}

fn optional_number(
    dict: &Map<String, Json>,
    dictionary: &str,
    key: &str,
) -> FvResult<Option<Float>> {
    dict.get(key)
        .map(|value| {
            value
                .as_f64()
                .ok_or_else(|| FvError::invalid(dictionary, key, "expected a number"))
        })
        .transpose()
}

fn optional_count(
    dict: &Map<String, Json>,
    dictionary: &str,
    key: &str,
) -> FvResult<Option<usize>> {
    dict.get(key)
        .map(|value| {
            value
                .as_u64()
                .map(|count| count as usize)
                .ok_or_else(|| {
                    FvError::invalid(dictionary, key, "expected a non-negative integer")
                })
        })
        .transpose()
}

impl SolverControls {
    pub fn with_solver(self, solver: SolverKind) -> Self {
        Self { solver, ..self }
    }

    pub fn with_preconditioner(self, preconditioner: PreconditionerKind) -> Self {
        Self {
            preconditioner,
            ..self
        }
    }

    pub fn with_smoother(self, smoother: SmootherKind) -> Self {
        Self { smoother, ..self }
    }

    pub fn with_tolerance(self, tolerance: Float) -> Self {
        Self { tolerance, ..self }
    }

    pub fn with_rel_tol(self, rel_tol: Float) -> Self {
        Self { rel_tol, ..self }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_fatal_on_non_convergence(self, fatal_on_non_convergence: bool) -> Self {
        Self {
            fatal_on_non_convergence,
            ..self
        }
    }

    /// Reads a solver dictionary such as
    /// `{"solver": "GAMG", "smoother": "GaussSeidel", "tolerance": 1e-6, "relTol": 0.01}`.
    ///
    /// The preconditioner may be a name or a dictionary with a `preconditioner` entry and its
    /// own multigrid settings.
    pub fn from_dict(dict: &Map<String, Json>, dictionary: &str) -> FvResult<Self> {
        let defaults = Self::default();
        let solver = parse_kind("solver", read_string(dict, dictionary, "solver")?)?;
        let mut smoother = match dict.get("smoother") {
            Some(_) => parse_kind("smoother", read_string(dict, dictionary, "smoother")?)?,
            None if matches!(solver, SolverKind::SmoothSolver | SolverKind::Gamg) => {
                return Err(FvError::missing(dictionary, "smoother"))
            }
            None => defaults.smoother,
        };

        let mut gamg = GamgControls::default();
        read_gamg(dict, dictionary, &mut gamg)?;
        let preconditioner = match dict.get("preconditioner") {
            None if matches!(solver, SolverKind::Pcg | SolverKind::PBiCGStab) => {
                return Err(FvError::missing(dictionary, "preconditioner"))
            }
            None => PreconditionerKind::None,
            Some(Json::Object(_)) => {
                let name = format!("{dictionary}/preconditioner");
                let sub_dict = as_dict(&dict["preconditioner"], &name)?;
                read_gamg(sub_dict, &name, &mut gamg)?;
                if sub_dict.contains_key("smoother") {
                    smoother = parse_kind("smoother", read_string(sub_dict, &name, "smoother")?)?;
                }
                parse_kind(
                    "preconditioner",
                    read_string(sub_dict, &name, "preconditioner")?,
                )?
            }
            Some(_) => parse_kind(
                "preconditioner",
                read_string(dict, dictionary, "preconditioner")?,
            )?,
        };

        Ok(Self {
            solver,
            preconditioner,
            smoother,
            tolerance: optional_number(dict, dictionary, "tolerance")?
                .unwrap_or(defaults.tolerance),
            rel_tol: optional_number(dict, dictionary, "relTol")?.unwrap_or(defaults.rel_tol),
            max_iter: optional_count(dict, dictionary, "maxIter")?.unwrap_or(defaults.max_iter),
            min_iter: optional_count(dict, dictionary, "minIter")?.unwrap_or(defaults.min_iter),
            n_sweeps: optional_count(dict, dictionary, "nSweeps")?.unwrap_or(defaults.n_sweeps),
            gamg,
            fatal_on_non_convergence: dict
                .get("fatalOnNonConvergence")
                .and_then(Json::as_bool)
                .unwrap_or(false),
        })
    }
}

fn read_gamg(dict: &Map<String, Json>, dictionary: &str, gamg: &mut GamgControls) -> FvResult<()> {
    for (key, slot) in [
        ("nCellsInCoarsestLevel", &mut gamg.n_cells_in_coarsest_level),
        ("mergeLevels", &mut gamg.merge_levels),
        ("nPreSweeps", &mut gamg.n_pre_sweeps),
        ("nPostSweeps", &mut gamg.n_post_sweeps),
        ("nFinestSweeps", &mut gamg.n_finest_sweeps),
        ("directSolveCoarsestLimit", &mut gamg.direct_solve_limit),
        ("nVcycles", &mut gamg.n_vcycles),
    ] {
        if let Some(count) = optional_count(dict, dictionary, key)? {
            *slot = count;
        }
    }
    if gamg.merge_levels == 0 {
        return Err(FvError::invalid(dictionary, "mergeLevels", "must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_from_dict() {
        let dict: Json = serde_json::from_str(indoc! {r#"
            {
                "solver": "GAMG",
                "smoother": "DICGaussSeidel",
                "tolerance": 1e-7,
                "relTol": 0.01,
                "nCellsInCoarsestLevel": 4,
                "fatalOnNonConvergence": true
            }
        "#})
        .unwrap();
        let controls = SolverControls::from_dict(dict.as_object().unwrap(), "p").unwrap();
        assert_eq!(controls.solver, SolverKind::Gamg);
        assert_eq!(controls.smoother, SmootherKind::DICGaussSeidel);
        assert_eq!(controls.tolerance, 1e-7);
        assert_eq!(controls.rel_tol, 0.01);
        assert_eq!(controls.gamg.n_cells_in_coarsest_level, 4);
        assert!(controls.fatal_on_non_convergence);

        let dict = serde_json::json!({
            "solver": "PCG",
            "preconditioner": {"preconditioner": "GAMG", "smoother": "GaussSeidel", "nVcycles": 1}
        });
        let controls = SolverControls::from_dict(dict.as_object().unwrap(), "p").unwrap();
        assert_eq!(controls.preconditioner, PreconditionerKind::Gamg);
        assert_eq!(controls.gamg.n_vcycles, 1);
    }

    #[test]
    fn test_errors() {
        let dict = serde_json::json!({"solver": "PCG"});
        assert!(matches!(
            SolverControls::from_dict(dict.as_object().unwrap(), "p"),
            Err(FvError::MissingEntry { .. })
        ));
        let dict = serde_json::json!({"solver": "Jacobi"});
        match SolverControls::from_dict(dict.as_object().unwrap(), "p") {
            Err(FvError::UnknownType { kind, valid, .. }) => {
                assert_eq!(kind, "solver");
                assert!(valid.contains(&"smoothSolver".to_owned()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            parse_kind::<PreconditionerKind>("preconditioner", "FDIC").unwrap(),
            PreconditionerKind::Dic
        );
    }
}
