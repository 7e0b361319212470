//! Module for running linear regression association tests
use crate::dataset::{Dataset, FieldValue};
use crate::expr::{ColExpr, EntryExpr};
use crate::MethodError;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::QR;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct LinregOptions {
    /// Name of the row struct field receiving the results
    pub root: String,
    /// Number of rows regressed together per task
    pub block_size: usize,
}

impl Default for LinregOptions {
    fn default() -> Self {
        LinregOptions {
            root: "linreg".to_string(),
            block_size: 16,
        }
    }
}

/// Per-row regression statistics, one array element per response.
#[derive(Debug, Clone, PartialEq)]
pub struct LinregStats {
    pub n_complete_samples: usize,
    pub ac: f64,
    pub ytx: Vec<f64>,
    pub beta: Vec<f64>,
    pub se: Vec<f64>,
    pub tstat: Vec<f64>,
    pub pval: Vec<f64>,
}

impl LinregStats {
    fn into_field(self) -> FieldValue {
        let mut fields = BTreeMap::new();
        fields.insert(
            "nCompleteSamples".to_string(),
            FieldValue::Int(self.n_complete_samples as i64),
        );
        fields.insert("AC".to_string(), FieldValue::Float(self.ac));
        fields.insert("ytx".to_string(), FieldValue::FloatArray(self.ytx));
        fields.insert("beta".to_string(), FieldValue::FloatArray(self.beta));
        fields.insert("se".to_string(), FieldValue::FloatArray(self.se));
        fields.insert("tstat".to_string(), FieldValue::FloatArray(self.tstat));
        fields.insert("pval".to_string(), FieldValue::FloatArray(self.pval));
        FieldValue::Struct(fields)
    }
}

/// Response-side quantities shared by every row.
struct Responses {
    /// Complete samples x responses
    y: Array2<f64>,
    /// Orthonormal basis of the covariate space (complete samples x covariates)
    q: Array2<f64>,
    /// Q^T y
    qty: Array2<f64>,
    /// y.y - |Q^T y|^2 per response
    yyp: Array1<f64>,
    d: f64,
    t_dist: StudentsT,
}

/// For each row, tests the entry-indexed input `x` for association with each
/// column-indexed response in `ys`, controlling for `covariates` and an intercept.
///
/// Only samples with every response and covariate defined are used. Missing values
/// of `x` are mean-imputed per row over those samples. The t-statistic has
/// `n - k - 1` degrees of freedom, with `n` complete samples and `k` covariates
/// including the intercept.
///
/// Results are stored in the row struct field `options.root` with fields
/// `nCompleteSamples`, `AC`, `ytx`, `beta`, `se`, `tstat` and `pval`.
pub fn linreg(
    dataset: Dataset,
    ys: &[ColExpr],
    x: &EntryExpr,
    covariates: &[ColExpr],
    options: &LinregOptions,
) -> Result<Dataset, MethodError> {
    if ys.is_empty() {
        return Err(MethodError::precondition("linreg", "at least one response is required"));
    }
    x.check(&dataset, "linreg/x")?;

    // Evaluate every column expression up front so missing fields fail early
    let y_values = ys
        .iter()
        .map(|e| e.eval_all(&dataset))
        .collect::<Result<Vec<_>, _>>()?;
    let cov_values = covariates
        .iter()
        .map(|e| e.eval_all(&dataset))
        .collect::<Result<Vec<_>, _>>()?;

    let complete: Vec<usize> = (0..dataset.n_cols())
        .filter(|&j| {
            y_values.iter().all(|v| v[j].is_some()) && cov_values.iter().all(|v| v[j].is_some())
        })
        .collect();
    let n = complete.len();
    let k = covariates.len() + 1;

    log::info!(
        "Running linear regression for {} response(s) on {} complete samples with {} covariates (+ intercept)",
        ys.len(),
        n,
        covariates.len()
    );

    if n < k + 2 {
        return Err(MethodError::precondition(
            "linreg",
            format!(
                "{} complete samples and {} covariates (including intercept) leave {} degrees of freedom; at least 1 is required",
                n,
                k,
                n as i64 - k as i64 - 1
            ),
        ));
    }

    let responses = prepare_responses(&complete, &y_values, &cov_values)?;
    let block_size = options.block_size.max(1);

    let row_indices: Vec<usize> = (0..dataset.n_rows()).collect();
    let stats: Vec<LinregStats> = row_indices
        .par_chunks(block_size)
        .flat_map_iter(|chunk| {
            chunk.iter().map(|&i| {
                let x_row = impute_row(&dataset, x, i, &complete);
                regress_row(x_row.view(), &responses)
            })
        })
        .collect();

    log::info!("Linear regression complete for {} rows", stats.len());

    let values = stats.into_iter().map(LinregStats::into_field).collect();
    Ok(dataset.annotate_rows(&options.root, values)?)
}

fn prepare_responses(
    complete: &[usize],
    y_values: &[Vec<Option<f64>>],
    cov_values: &[Vec<Option<f64>>],
) -> Result<Responses, MethodError> {
    let n = complete.len();
    let k = cov_values.len() + 1;

    let y = Array2::from_shape_fn((n, y_values.len()), |(i, j)| {
        y_values[j][complete[i]].unwrap_or(f64::NAN)
    });

    let mut cov = Array2::zeros((n, k));
    // Add intercept as first column
    cov.column_mut(0).fill(1.0);
    for (c, values) in cov_values.iter().enumerate() {
        for (i, &j) in complete.iter().enumerate() {
            cov[[i, c + 1]] = values[j].unwrap_or(f64::NAN);
        }
    }

    let (q, _r) = cov.qr().map_err(|e| MethodError::LinAlg(e.to_string()))?;
    let q = q.slice(s![.., ..k.min(q.ncols())]).to_owned();

    let qty = q.t().dot(&y);
    let yyp = y.map_axis(Axis(0), |col| col.dot(&col)) - qty.map_axis(Axis(0), |col| col.dot(&col));

    let d = (n - k - 1) as f64;
    let t_dist = StudentsT::new(0.0, 1.0, d).map_err(|e| MethodError::LinAlg(e.to_string()))?;

    Ok(Responses {
        y,
        q,
        qty,
        yyp,
        d,
        t_dist,
    })
}

/// Input values of row `i` over the complete samples, missing values replaced
/// by the mean of the defined ones.
fn impute_row(dataset: &Dataset, x: &EntryExpr, i: usize, complete: &[usize]) -> Array1<f64> {
    let raw: Vec<Option<f64>> = complete
        .iter()
        .map(|&j| x.eval(i, dataset.entry(i, j)))
        .collect();

    let (sum, count) = raw
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    let mean = if count > 0 { sum / count as f64 } else { 0.0 };

    if count < raw.len() {
        log::trace!("Row {}: imputing {} missing values to {:.4}", i, raw.len() - count, mean);
    }

    raw.into_iter().map(|v| v.unwrap_or(mean)).collect()
}

fn regress_row(x: ArrayView1<f64>, r: &Responses) -> LinregStats {
    let ac = x.sum();
    let qtx = r.q.t().dot(&x);
    let xxp = x.dot(&x) - qtx.dot(&qtx);
    let ytx = r.y.t().dot(&x);
    let xyp = &ytx - &r.qty.t().dot(&qtx);

    let n_y = ytx.len();
    let mut beta = Vec::with_capacity(n_y);
    let mut se = Vec::with_capacity(n_y);
    let mut tstat = Vec::with_capacity(n_y);
    let mut pval = Vec::with_capacity(n_y);

    for j in 0..n_y {
        let b = xyp[j] / xxp;
        let s = ((r.yyp[j] / xxp - b * b) / r.d).sqrt();
        let t = b / s;
        beta.push(b);
        se.push(s);
        tstat.push(t);
        pval.push(2.0 * r.t_dist.cdf(-t.abs()));
    }

    LinregStats {
        n_complete_samples: x.len(),
        ac,
        ytx: ytx.to_vec(),
        beta,
        se,
        tstat,
        pval,
    }
}
