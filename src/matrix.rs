//! Block-partitioned dense matrices.
//!
//! A [`BlockMatrix`] is split into square `block_size` blocks (edge blocks may be
//! smaller). Construction from an entry expression and block products are
//! parallelised over blocks on the global rayon pool.
use crate::dataset::Dataset;
use crate::expr::EntryExpr;
use crate::MethodError;
use ndarray::{s, Array2};
use rayon::prelude::*;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct BlockMatrix {
    n_rows: usize,
    n_cols: usize,
    block_size: usize,
    /// Row-major grid of `n_row_blocks x n_col_blocks` blocks.
    blocks: Vec<Array2<f64>>,
}

fn n_blocks(n: usize, block_size: usize) -> usize {
    (n + block_size - 1) / block_size
}

fn block_len(n: usize, block_size: usize, index: usize) -> usize {
    block_size.min(n - index * block_size)
}

impl BlockMatrix {
    pub fn from_array(a: &Array2<f64>, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let (n_rows, n_cols) = a.dim();
        let (nrb, ncb) = (n_blocks(n_rows, block_size), n_blocks(n_cols, block_size));
        let blocks = (0..nrb * ncb)
            .into_par_iter()
            .map(|idx| {
                let (bi, bj) = (idx / ncb, idx % ncb);
                let r0 = bi * block_size;
                let c0 = bj * block_size;
                a.slice(s![
                    r0..r0 + block_len(n_rows, block_size, bi),
                    c0..c0 + block_len(n_cols, block_size, bj)
                ])
                .to_owned()
            })
            .collect();
        BlockMatrix {
            n_rows,
            n_cols,
            block_size,
            blocks,
        }
    }

    /// Evaluates `expr` at every entry of `dataset`. Matrix rows are dataset rows
    /// (variants) and matrix columns are samples.
    pub fn from_entry_expr(
        dataset: &Dataset,
        expr: &EntryExpr,
        block_size: usize,
    ) -> Result<Self, MethodError> {
        expr.check(dataset, "BlockMatrix")?;
        let block_size = block_size.max(1);
        let (n_rows, n_cols) = (dataset.n_rows(), dataset.n_cols());
        let (nrb, ncb) = (n_blocks(n_rows, block_size), n_blocks(n_cols, block_size));
        log::debug!(
            "Building {} x {} block matrix ({} x {} blocks of size {})",
            n_rows, n_cols, nrb, ncb, block_size
        );

        let entries = dataset.entries();
        let blocks = (0..nrb * ncb)
            .into_par_iter()
            .map(|idx| {
                let (bi, bj) = (idx / ncb, idx % ncb);
                let (r0, c0) = (bi * block_size, bj * block_size);
                let (h, w) = (
                    block_len(n_rows, block_size, bi),
                    block_len(n_cols, block_size, bj),
                );
                let mut block = Array2::zeros((h, w));
                for i in 0..h {
                    for j in 0..w {
                        let (row, col) = (r0 + i, c0 + j);
                        block[[i, j]] = expr.eval(row, &entries[[row, col]]).ok_or_else(|| {
                            MethodError::precondition(
                                "BlockMatrix",
                                format!(
                                    "entry expression is undefined for variant {} and sample '{}'",
                                    dataset.rows()[row].variant,
                                    dataset.samples()[col]
                                ),
                            )
                        })?;
                    }
                }
                Ok::<_, MethodError>(block)
            })
            .collect::<Result<Vec<_>, MethodError>>()?;

        Ok(BlockMatrix {
            n_rows,
            n_cols,
            block_size,
            blocks,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn n_row_blocks(&self) -> usize {
        n_blocks(self.n_rows, self.block_size)
    }

    fn n_col_blocks(&self) -> usize {
        n_blocks(self.n_cols, self.block_size)
    }

    fn block(&self, bi: usize, bj: usize) -> &Array2<f64> {
        &self.blocks[bi * self.n_col_blocks() + bj]
    }

    pub fn t(&self) -> BlockMatrix {
        let (nrb, ncb) = (self.n_row_blocks(), self.n_col_blocks());
        let blocks = (0..ncb * nrb)
            .map(|idx| {
                let (bi, bj) = (idx / nrb, idx % nrb);
                self.block(bj, bi).t().to_owned()
            })
            .collect();
        BlockMatrix {
            n_rows: self.n_cols,
            n_cols: self.n_rows,
            block_size: self.block_size,
            blocks,
        }
    }

    /// Block-wise product `self · other`.
    pub fn dot(&self, other: &BlockMatrix) -> Result<BlockMatrix, MethodError> {
        if self.n_cols != other.n_rows {
            return Err(MethodError::LinAlg(format!(
                "cannot multiply {} x {} by {} x {}",
                self.n_rows, self.n_cols, other.n_rows, other.n_cols
            )));
        }
        if self.block_size != other.block_size {
            return Err(MethodError::LinAlg(format!(
                "block sizes differ: {} vs {}",
                self.block_size, other.block_size
            )));
        }
        let bs = self.block_size;
        let (nrb, ncb, nkb) = (self.n_row_blocks(), other.n_col_blocks(), self.n_col_blocks());

        let blocks = (0..nrb * ncb)
            .into_par_iter()
            .map(|idx| {
                let (bi, bj) = (idx / ncb, idx % ncb);
                let mut acc = Array2::zeros((
                    block_len(self.n_rows, bs, bi),
                    block_len(other.n_cols, bs, bj),
                ));
                for bk in 0..nkb {
                    acc += &self.block(bi, bk).dot(other.block(bk, bj));
                }
                acc
            })
            .collect();

        Ok(BlockMatrix {
            n_rows: self.n_rows,
            n_cols: other.n_cols,
            block_size: bs,
            blocks,
        })
    }

    /// Materialises the matrix as a single dense array.
    pub fn to_local(&self) -> Array2<f64> {
        let bs = self.block_size;
        let mut out = Array2::zeros((self.n_rows, self.n_cols));
        for bi in 0..self.n_row_blocks() {
            for bj in 0..self.n_col_blocks() {
                let block = self.block(bi, bj);
                let (r0, c0) = (bi * bs, bj * bs);
                out.slice_mut(s![r0..r0 + block.nrows(), c0..c0 + block.ncols()])
                    .assign(block);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variant;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn blocked_product_matches_dense_product() {
        let a = Array2::from_shape_fn((7, 5), |(i, j)| (i * 5 + j) as f64 * 0.1 - 1.0);
        let b = Array2::from_shape_fn((5, 4), |(i, j)| (i as f64 - j as f64).sin());
        let expected = a.dot(&b);

        for bs in [1, 2, 3, 16] {
            let product = BlockMatrix::from_array(&a, bs)
                .dot(&BlockMatrix::from_array(&b, bs))
                .unwrap()
                .to_local();
            assert_eq!(product.dim(), (7, 4));
            for (x, y) in product.iter().zip(expected.iter()) {
                assert_relative_eq!(*x, *y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn transpose_round_trips() {
        let a = Array2::from_shape_fn((5, 3), |(i, j)| (i * 3 + j) as f64);
        let bm = BlockMatrix::from_array(&a, 2);
        assert_eq!(bm.t().to_local(), a.t().to_owned());
        assert_eq!(bm.t().t().to_local(), a);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let a = BlockMatrix::from_array(&Array2::zeros((2, 3)), 2);
        assert!(a.dot(&a).is_err());
    }

    #[test]
    fn undefined_entries_are_rejected() {
        let counts = array![[0i8, -1], [1, 2]];
        let ds = Dataset::from_alt_counts(
            vec![
                Variant::new("1", 1, vec!["A", "C"]),
                Variant::new("1", 2, vec!["A", "C"]),
            ],
            vec!["a".into(), "b".into()],
            &counts,
        )
        .unwrap();

        let err = BlockMatrix::from_entry_expr(&ds, &EntryExpr::NumAltAlleles, 1).unwrap_err();
        assert!(err.to_string().contains("sample 'b'"), "{err}");

        let called = BlockMatrix::from_entry_expr(&ds, &EntryExpr::IsCalled, 1)
            .unwrap()
            .to_local();
        assert_eq!(called, array![[1.0, 0.0], [1.0, 1.0]]);
    }
}
