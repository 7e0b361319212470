//! Typed numeric expressions over a dataset.
//!
//! Each indexing context has its own type, so an operation that needs an
//! entry-indexed input simply takes an [`EntryExpr`]. [`Expr`] is the tagged union
//! used when the context is only known at runtime (e.g. expressions given on the
//! command line); converting it into a concrete type checks the indexing.
use crate::dataset::{Dataset, Row};
use crate::genotype::GenotypeRecord;
use crate::MethodError;
use std::fmt;
use std::sync::Arc;

/// The axes an expression is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indices {
    Row,
    Col,
    Entry,
}

impl fmt::Display for Indices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indices::Row => write!(f, "row"),
            Indices::Col => write!(f, "column"),
            Indices::Entry => write!(f, "entry"),
        }
    }
}

/// Per-row centering and scaling applied by [`EntryExpr::HweNormalized`].
#[derive(Debug, Clone)]
pub struct HweNormalization {
    pub mean_gt: Vec<f64>,
    pub scale: Vec<f64>,
}

type EntryFn = dyn Fn(&GenotypeRecord) -> Option<f64> + Send + Sync;

/// Numeric expression evaluated at every (row, column) pair.
#[derive(Clone)]
pub enum EntryExpr {
    /// Alternate allele count of GT; undefined when GT is missing.
    NumAltAlleles,
    /// 1 when GT is defined, 0 otherwise.
    IsCalled,
    Depth,
    Quality,
    /// Hardy-Weinberg normalized genotype, bound to the rows of the dataset it was
    /// computed on. Missing calls evaluate to 0.
    HweNormalized(Arc<HweNormalization>),
    Custom(Arc<EntryFn>),
}

impl EntryExpr {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&GenotypeRecord) -> Option<f64> + Send + Sync + 'static,
    {
        EntryExpr::Custom(Arc::new(f))
    }

    pub fn eval(&self, row: usize, record: &GenotypeRecord) -> Option<f64> {
        match self {
            EntryExpr::NumAltAlleles => record.n_alt().map(f64::from),
            EntryExpr::IsCalled => Some(if record.is_called() { 1.0 } else { 0.0 }),
            EntryExpr::Depth => record.dp.map(f64::from),
            EntryExpr::Quality => record.gq.map(f64::from),
            EntryExpr::HweNormalized(norm) => match record.n_alt() {
                Some(n) => Some((f64::from(n) - norm.mean_gt[row]) / norm.scale[row]),
                None => Some(0.0),
            },
            EntryExpr::Custom(f) => f(record),
        }
    }

    /// Checks that the expression can be evaluated against `dataset`.
    pub(crate) fn check(&self, dataset: &Dataset, context: &str) -> Result<(), MethodError> {
        if let EntryExpr::HweNormalized(norm) = self {
            if norm.mean_gt.len() != dataset.n_rows() {
                return Err(MethodError::precondition(
                    context,
                    format!(
                        "normalized entry expression is bound to {} rows but the dataset has {}",
                        norm.mean_gt.len(),
                        dataset.n_rows()
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EntryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryExpr::NumAltAlleles => write!(f, "GT.n_alt"),
            EntryExpr::IsCalled => write!(f, "GT.is_called"),
            EntryExpr::Depth => write!(f, "DP"),
            EntryExpr::Quality => write!(f, "GQ"),
            EntryExpr::HweNormalized(norm) => write!(f, "HweNormalized({} rows)", norm.mean_gt.len()),
            EntryExpr::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Numeric expression evaluated once per column (sample).
#[derive(Debug, Clone, PartialEq)]
pub enum ColExpr {
    Field(String),
    Constant(f64),
}

impl ColExpr {
    pub fn field(name: &str) -> Self {
        ColExpr::Field(name.to_string())
    }

    /// Evaluates the expression for every sample, failing if a referenced field
    /// does not exist.
    pub fn eval_all(&self, dataset: &Dataset) -> Result<Vec<Option<f64>>, MethodError> {
        match self {
            ColExpr::Field(name) => Ok(dataset.col_field(name)?.to_vec()),
            ColExpr::Constant(v) => Ok(vec![Some(*v); dataset.n_cols()]),
        }
    }
}

/// Numeric expression evaluated once per row (variant).
#[derive(Debug, Clone, PartialEq)]
pub enum RowExpr {
    /// Possibly dotted path into the row annotations, e.g. `linreg.AC`.
    Field(String),
    Constant(f64),
}

impl RowExpr {
    pub fn field(path: &str) -> Self {
        RowExpr::Field(path.to_string())
    }

    pub fn eval(&self, row: &Row) -> Option<f64> {
        match self {
            RowExpr::Field(path) => row.field(path).and_then(|v| v.as_f64()),
            RowExpr::Constant(v) => Some(*v),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Row(RowExpr),
    Col(ColExpr),
    Entry(EntryExpr),
}

impl Expr {
    /// Parses and classifies a textual expression.
    ///
    /// Recognized forms: `GT.n_alt`, `GT.num_alt_alleles`, `GT.is_called`,
    /// `is_defined(GT)`, `DP`, `GQ` (entry); `col.<name>`, `sa.<name>` (column);
    /// `row.<path>`, `va.<path>` (row).
    pub fn parse(text: &str) -> Result<Expr, MethodError> {
        let text = text.trim();
        let expr = match text {
            "GT.n_alt" | "GT.num_alt_alleles" | "GT.num_alt_alleles()" => {
                Expr::Entry(EntryExpr::NumAltAlleles)
            }
            "GT.is_called" | "is_defined(GT)" => Expr::Entry(EntryExpr::IsCalled),
            "DP" => Expr::Entry(EntryExpr::Depth),
            "GQ" => Expr::Entry(EntryExpr::Quality),
            _ => {
                let (scope, name) = text.split_once('.').ok_or_else(|| {
                    MethodError::precondition("expr", format!("unrecognized expression '{}'", text))
                })?;
                if name.is_empty() {
                    return Err(MethodError::precondition(
                        "expr",
                        format!("missing field name in '{}'", text),
                    ));
                }
                match scope {
                    "col" | "sa" => Expr::Col(ColExpr::field(name)),
                    "row" | "va" => Expr::Row(RowExpr::field(name)),
                    _ => {
                        return Err(MethodError::precondition(
                            "expr",
                            format!("unrecognized expression '{}'", text),
                        ))
                    }
                }
            }
        };
        Ok(expr)
    }

    pub fn indices(&self) -> Indices {
        match self {
            Expr::Row(_) => Indices::Row,
            Expr::Col(_) => Indices::Col,
            Expr::Entry(_) => Indices::Entry,
        }
    }

    fn mismatch(&self, context: &str, expected: Indices) -> MethodError {
        MethodError::Indexing {
            context: context.to_string(),
            expected,
            found: self.indices(),
        }
    }

    pub fn into_entry(self, context: &str) -> Result<EntryExpr, MethodError> {
        match self {
            Expr::Entry(e) => Ok(e),
            other => Err(other.mismatch(context, Indices::Entry)),
        }
    }

    pub fn into_col(self, context: &str) -> Result<ColExpr, MethodError> {
        match self {
            Expr::Col(e) => Ok(e),
            other => Err(other.mismatch(context, Indices::Col)),
        }
    }

    pub fn into_row(self, context: &str) -> Result<RowExpr, MethodError> {
        match self {
            Expr::Row(e) => Ok(e),
            other => Err(other.mismatch(context, Indices::Row)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FieldValue, Variant};
    use crate::genotype::Call;

    #[test]
    fn parse_classifies_by_indexing() {
        assert_eq!(Expr::parse("GT.n_alt").unwrap().indices(), Indices::Entry);
        assert_eq!(Expr::parse("is_defined(GT)").unwrap().indices(), Indices::Entry);
        assert_eq!(Expr::parse("sa.height").unwrap().indices(), Indices::Col);
        assert_eq!(Expr::parse("va.linreg.AC").unwrap().indices(), Indices::Row);
        assert!(Expr::parse("height").is_err());
        assert!(Expr::parse("col.").is_err());
    }

    #[test]
    fn mis_indexed_expression_is_rejected() {
        let err = Expr::parse("col.height")
            .unwrap()
            .into_entry("linreg/x")
            .unwrap_err();
        assert!(matches!(
            err,
            MethodError::Indexing { expected: Indices::Entry, found: Indices::Col, .. }
        ));
        assert!(err.to_string().starts_with("linreg/x"));

        let err = Expr::parse("GT.n_alt").unwrap().into_col("linreg/ys").unwrap_err();
        assert!(err.to_string().contains("expected column-indexed"));
    }

    #[test]
    fn entry_evaluation() {
        let rec = GenotypeRecord {
            gt: Some(Call::new(0, 1)),
            dp: Some(20),
            ..Default::default()
        };
        let missing = GenotypeRecord::default();
        assert_eq!(EntryExpr::NumAltAlleles.eval(0, &rec), Some(1.0));
        assert_eq!(EntryExpr::NumAltAlleles.eval(0, &missing), None);
        assert_eq!(EntryExpr::IsCalled.eval(0, &missing), Some(0.0));
        assert_eq!(EntryExpr::Depth.eval(0, &rec), Some(20.0));

        let norm = EntryExpr::HweNormalized(Arc::new(HweNormalization {
            mean_gt: vec![0.5],
            scale: vec![2.0],
        }));
        assert_eq!(norm.eval(0, &rec), Some(0.25));
        assert_eq!(norm.eval(0, &missing), Some(0.0));

        let doubled = EntryExpr::custom(|g| g.n_alt().map(|n| 2.0 * n as f64));
        assert_eq!(doubled.eval(0, &rec), Some(2.0));
    }

    #[test]
    fn row_expression_reads_nested_fields() {
        let mut row = Row::new(Variant::new("1", 1, vec!["A", "C"]));
        row.fields.insert("AC".into(), FieldValue::Int(4));
        assert_eq!(RowExpr::field("AC").eval(&row), Some(4.0));
        assert_eq!(RowExpr::field("nope").eval(&row), None);
        assert_eq!(RowExpr::Constant(1.5).eval(&row), Some(1.5));
    }
}
