//! Preconditioned conjugate gradient for symmetric matrices and stabilised bi-conjugate
//! gradient for asymmetric ones.

use ndarray as nd;

use super::controls::SolverControls;
use super::performance::SolverPerformance;
use super::preconditioner::Preconditioner;
use super::LduMatrix;
use crate::{Float, FvResult, SMALL, VSMALL};

fn is_singular(value: Float) -> bool {
    value.abs() < VSMALL
}

/// Whether to keep iterating after the iterations done so far.
pub(super) fn keep_going(performance: &mut SolverPerformance, controls: &SolverControls) -> bool {
    let converged = performance.check_convergence(controls.tolerance, controls.rel_tol);
    let n_iterations = performance.n_iterations;
    n_iterations < controls.max_iter && (n_iterations < controls.min_iter || !converged)
}

pub fn pcg(
    matrix: &LduMatrix<'_>,
    psi: &mut nd::Array1<Float>,
    source: &nd::Array1<Float>,
    controls: &SolverControls,
    field: &str,
) -> FvResult<SolverPerformance> {
    let mut performance =
        SolverPerformance::new(format!("{}PCG", controls.preconditioner), field);
    let a_psi = matrix.amul(psi)?;
    let mut r = source - &a_psi;
    let norm_factor = matrix.norm_factor(psi, source, &a_psi);
    performance.initial_residual = matrix.g_sum_mag(&r) / norm_factor;
    performance.final_residual = performance.initial_residual;

    if !keep_going(&mut performance, controls) {
        return Ok(performance);
    }
    let preconditioner = Preconditioner::new(matrix, controls)?;
    let mut p = nd::Array1::zeros(psi.len());
    let mut w_r = 0.;
    loop {
        let w_r_old = w_r;
        let w = preconditioner.precondition(matrix, &r)?;
        w_r = matrix.g_sum_prod(&w, &r);
        if performance.n_iterations == 0 {
            p.assign(&w);
        } else {
            let beta = w_r / w_r_old;
            p = &w + &(p * beta);
        }
        let a_p = matrix.amul(&p)?;
        let p_a_p = matrix.g_sum_prod(&a_p, &p);
        if is_singular(p_a_p / norm_factor) {
            performance.singular = true;
            performance.check_convergence(controls.tolerance, controls.rel_tol);
            break;
        }
        let alpha = w_r / p_a_p;
        psi.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &a_p);
        performance.final_residual = matrix.g_sum_mag(&r) / norm_factor;
        performance.n_iterations += 1;
        if !keep_going(&mut performance, controls) {
            break;
        }
    }
    Ok(performance)
}

pub fn pbicgstab(
    matrix: &LduMatrix<'_>,
    psi: &mut nd::Array1<Float>,
    source: &nd::Array1<Float>,
    controls: &SolverControls,
    field: &str,
) -> FvResult<SolverPerformance> {
    let mut performance =
        SolverPerformance::new(format!("{}PBiCGStab", controls.preconditioner), field);
    let a_psi = matrix.amul(psi)?;
    let mut r = source - &a_psi;
    let norm_factor = matrix.norm_factor(psi, source, &a_psi);
    performance.initial_residual = matrix.g_sum_mag(&r) / norm_factor;
    performance.final_residual = performance.initial_residual;

    if !keep_going(&mut performance, controls) {
        return Ok(performance);
    }
    let preconditioner = Preconditioner::new(matrix, controls)?;
    let n = psi.len();
    let mut r0 = r.clone();
    let (mut p, mut a_y) = (nd::Array1::zeros(n), nd::Array1::zeros(n));
    let (mut r0_r, mut r0_mag, mut alpha, mut omega) = (0., 0., 0., 0.);
    let mut restart = true;
    loop {
        let r0_r_old = r0_r;
        let products = matrix.comm().sum_many(&[r0.dot(&r), r.dot(&r)]);
        let (r_r, r_mag) = (products[1], products[1].sqrt());
        r0_r = products[0];
        // Once the shadow residual is orthogonal to the residual, start over from the residual.
        if !restart && (r0_r.abs() <= SMALL * r0_mag * r_mag || is_singular(omega)) {
            log::debug!(
                "PBiCGStab for {field} restarting after {} iterations",
                performance.n_iterations
            );
            restart = true;
        }
        let fresh = restart;
        if restart {
            if is_singular(r_r) {
                performance.singular = true;
                performance.check_convergence(controls.tolerance, controls.rel_tol);
                break;
            }
            r0.assign(&r);
            r0_r = r_r;
            r0_mag = r_mag;
            p.assign(&r);
            restart = false;
        } else {
            let beta = (r0_r / r0_r_old) * (alpha / omega);
            p = &r + &((&p - &(&a_y * omega)) * beta);
        }

        let y = preconditioner.precondition(matrix, &p)?;
        a_y = matrix.amul(&y)?;
        let r0_a_y = matrix.g_sum_prod(&r0, &a_y);
        if is_singular(r0_a_y) {
            if fresh {
                performance.singular = true;
                performance.check_convergence(controls.tolerance, controls.rel_tol);
                break;
            }
            restart = true;
            continue;
        }
        alpha = r0_r / r0_a_y;

        let s = &r - &(&a_y * alpha);
        let s_residual = matrix.g_sum_mag(&s) / norm_factor;
        performance.n_iterations += 1;
        let mut trial = performance.clone();
        trial.final_residual = s_residual;
        if performance.n_iterations >= controls.min_iter
            && trial.check_convergence(controls.tolerance, controls.rel_tol)
        {
            psi.scaled_add(alpha, &y);
            performance = trial;
            break;
        }

        let z = preconditioner.precondition(matrix, &s)?;
        let t = matrix.amul(&z)?;
        let t_t = matrix.g_sum_prod(&t, &t);
        omega = if is_singular(t_t) {
            0.
        } else {
            matrix.g_sum_prod(&t, &s) / t_t
        };
        psi.scaled_add(alpha, &y);
        psi.scaled_add(omega, &z);
        r = &s - &(&t * omega);
        performance.final_residual = matrix.g_sum_mag(&r) / norm_factor;
        if !keep_going(&mut performance, controls) {
            break;
        }
    }
    Ok(performance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::controls::PreconditionerKind;
    use crate::mesh::LduAddressing;
    use crate::parallel::Comm;
    use crate::test_util::{grid_addressing, grid_matrix};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_pcg() {
        let addressing = grid_addressing(6);
        let matrix = grid_matrix(&addressing, None);
        let exact = nd::Array1::from_shape_fn(36, |cell| (cell as Float * 0.3).sin());
        let source = matrix.amul(&exact).unwrap();
        for preconditioner in [
            PreconditionerKind::None,
            PreconditionerKind::Diagonal,
            PreconditionerKind::Dic,
        ] {
            let controls = SolverControls::default()
                .with_preconditioner(preconditioner)
                .with_tolerance(1e-12);
            let mut psi = nd::Array1::zeros(36);
            let performance = pcg(&matrix, &mut psi, &source, &controls, "p").unwrap();
            assert!(performance.converged);
            for (a, b) in psi.iter().zip(&exact) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_pbicgstab() {
        let addressing = grid_addressing(5);
        let matrix = grid_matrix(&addressing, Some(-0.6));
        let exact = nd::Array1::from_shape_fn(25, |cell| 1. + cell as Float / 25.);
        let source = matrix.amul(&exact).unwrap();
        let controls = SolverControls::default()
            .with_preconditioner(PreconditionerKind::Dilu)
            .with_tolerance(1e-12);
        let mut psi = nd::Array1::zeros(25);
        let performance = pbicgstab(&matrix, &mut psi, &source, &controls, "U").unwrap();
        assert!(performance.converged);
        assert_eq!(performance.solver, "DILUPBiCGStab");
        for (a, b) in psi.iter().zip(&exact) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_pbicgstab_restarts_when_residuals_turn_orthogonal() {
        // Upwind transport along a chain carries the residual downstream, off the support of
        // the first shadow residual.
        let n = 8;
        let addressing = LduAddressing::new(n, (0..n - 1).collect(), (1..n).collect());
        let matrix = LduMatrix::new(
            &addressing,
            &Comm::serial(),
            nd::Array1::ones(n),
            nd::Array1::zeros(n - 1),
            Some(nd::Array1::from_elem(n - 1, -1.)),
        )
        .unwrap();
        let mut source = nd::Array1::zeros(n);
        source[0] = 1.;
        let controls = SolverControls::default()
            .with_preconditioner(PreconditionerKind::None)
            .with_tolerance(1e-12);
        let mut psi = nd::Array1::zeros(n);
        let performance = pbicgstab(&matrix, &mut psi, &source, &controls, "T").unwrap();
        assert!(performance.converged);
        assert!(!performance.singular);
        for value in &psi {
            assert_abs_diff_eq!(*value, 1., epsilon = 1e-10);
        }
    }

    #[test]
    fn test_max_iterations_keeps_best_iterate() {
        let addressing = grid_addressing(6);
        let matrix = grid_matrix(&addressing, None);
        let source = nd::Array1::from_shape_fn(36, |cell| (cell as Float * 0.3).sin());
        let controls = SolverControls::default()
            .with_preconditioner(PreconditionerKind::None)
            .with_tolerance(1e-14)
            .with_max_iter(2);
        let mut psi = nd::Array1::zeros(36);
        let performance = pcg(&matrix, &mut psi, &source, &controls, "p").unwrap();
        assert_eq!(performance.n_iterations, 2);
        assert!(!performance.converged);
        assert!(performance.final_residual < performance.initial_residual);
    }
}
