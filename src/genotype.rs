//! Genotype calls and per-sample genotype records (GT, AD, DP, GQ, PL).
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cap applied to both likelihood minima when deriving GQ from PL.
const GQ_CAP: i32 = 99;

/// An unphased diploid genotype call. Allele indices are kept sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Call {
    a0: u32,
    a1: u32,
}

impl Call {
    pub fn new(a: u32, b: u32) -> Self {
        if a <= b {
            Call { a0: a, a1: b }
        } else {
            Call { a0: b, a1: a }
        }
    }

    pub fn alleles(&self) -> (u32, u32) {
        (self.a0, self.a1)
    }

    /// Number of non-reference alleles in the call (0, 1 or 2).
    pub fn num_alt_alleles(&self) -> u32 {
        (self.a0 != 0) as u32 + (self.a1 != 0) as u32
    }

    pub fn is_het(&self) -> bool {
        self.a0 != self.a1
    }

    /// Position of this genotype in the VCF triangular ordering
    /// (0/0, 0/1, 1/1, 0/2, 1/2, 2/2, ...), i.e. the index into PL.
    pub fn index(&self) -> usize {
        let (j, k) = (self.a0 as usize, self.a1 as usize);
        k * (k + 1) / 2 + j
    }

    /// Inverse of [`Call::index`].
    pub fn from_index(index: usize) -> Self {
        let mut k = (((8.0 * index as f64 + 1.0).sqrt() - 1.0) / 2.0) as usize;
        // float rounding can land one off for very large indices
        while k * (k + 1) / 2 > index {
            k -= 1;
        }
        while (k + 1) * (k + 2) / 2 <= index {
            k += 1;
        }
        let j = index - k * (k + 1) / 2;
        Call::new(j as u32, k as u32)
    }

    /// Maps the call to the biallelic call counting copies of alternate allele `a_index`.
    pub fn downcode(&self, a_index: u32) -> Call {
        let code = |allele: u32| (allele == a_index) as u32;
        Call::new(code(self.a0), code(self.a1))
    }
}

/// Number of unordered diploid genotypes over `n_alleles` alleles.
pub fn n_genotypes(n_alleles: usize) -> usize {
    n_alleles * (n_alleles + 1) / 2
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.a0, self.a1)
    }
}

impl FromStr for Call {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(|c| c == '/' || c == '|');
        let a = parts.next().ok_or_else(|| format!("Empty call '{}'", s))?;
        let b = parts
            .next()
            .ok_or_else(|| format!("Call '{}' is not diploid", s))?;
        if parts.next().is_some() {
            return Err(format!("Call '{}' is not diploid", s));
        }
        let parse = |x: &str| {
            x.parse::<u32>()
                .map_err(|e| format!("Invalid allele '{}' in call '{}': {}", x, s, e))
        };
        Ok(Call::new(parse(a)?, parse(b)?))
    }
}

/// Derives GQ from phred-scaled likelihoods: the gap between the two smallest
/// values, each capped at 99.
pub fn gq_from_pl(pl: &[i32]) -> i32 {
    let mut m = GQ_CAP;
    let mut m2 = GQ_CAP;
    for &p in pl {
        if p < m {
            m2 = m;
            m = p;
        } else if p < m2 {
            m2 = p;
        }
    }
    m2 - m
}

/// One entry of the dataset. `None` means the field is undefined for this sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenotypeRecord {
    pub gt: Option<Call>,
    pub ad: Option<Vec<i32>>,
    pub dp: Option<i32>,
    pub gq: Option<i32>,
    pub pl: Option<Vec<i32>>,
}

impl GenotypeRecord {
    pub fn with_call(call: Call) -> Self {
        GenotypeRecord {
            gt: Some(call),
            ..Default::default()
        }
    }

    pub fn n_alt(&self) -> Option<u32> {
        self.gt.map(|c| c.num_alt_alleles())
    }

    pub fn is_called(&self) -> bool {
        self.gt.is_some()
    }

    /// Rewrites the record for the biallelic site formed by the reference and
    /// alternate allele `a_index`.
    ///
    /// AD becomes `[sum - AD[a], AD[a]]`, each biallelic PL is the minimum over the
    /// multiallelic genotypes that downcode to it, GQ is recomputed from the new PL
    /// and DP is carried over.
    pub fn downcode(&self, a_index: u32) -> GenotypeRecord {
        let gt = self.gt.map(|c| c.downcode(a_index));

        let ad = self.ad.as_ref().and_then(|ad| {
            let adi = *ad.get(a_index as usize)?;
            let sum: i64 = ad.iter().map(|&d| i64::from(d)).sum();
            let other = i32::try_from(sum - i64::from(adi)).ok()?;
            Some(vec![other, adi])
        });

        // a biallelic genotype no likelihood maps to leaves PL undefined
        let pl = self.pl.as_ref().and_then(|pl| {
            let mut out: [Option<i32>; 3] = [None; 3];
            for (j, &p) in pl.iter().enumerate() {
                let g = Call::from_index(j).downcode(a_index).index();
                out[g] = Some(out[g].map_or(p, |m| m.min(p)));
            }
            out.into_iter().collect::<Option<Vec<i32>>>()
        });

        let gq = pl.as_deref().map(gq_from_pl);

        GenotypeRecord {
            gt,
            ad,
            dp: self.dp,
            gq,
            pl,
        }
    }
}

fn fmt_list(values: &Option<Vec<i32>>) -> String {
    match values {
        Some(v) => v
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(","),
        None => ".".to_string(),
    }
}

fn fmt_scalar(value: Option<i32>) -> String {
    value.map_or_else(|| ".".to_string(), |v| v.to_string())
}

/// Formats the record as a VCF sample column with FORMAT `GT:AD:DP:GQ:PL`.
impl fmt::Display for GenotypeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gt = self.gt.map_or_else(|| "./.".to_string(), |c| c.to_string());
        write!(
            f,
            "{}:{}:{}:{}:{}",
            gt,
            fmt_list(&self.ad),
            fmt_scalar(self.dp),
            fmt_scalar(self.gq),
            fmt_list(&self.pl)
        )
    }
}

/// Parses a VCF sample column with FORMAT `GT:AD:DP:GQ:PL`; trailing fields may be omitted.
impl FromStr for GenotypeRecord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        let field = |i: usize| fields.get(i).copied().filter(|v| *v != ".");

        let gt = match field(0) {
            Some(v) if !v.contains('.') => Some(v.parse::<Call>()?),
            _ => None,
        };
        let parse_int = |v: &str| {
            v.parse::<i32>()
                .map_err(|e| format!("Invalid integer '{}' in '{}': {}", v, s, e))
        };
        let parse_list = |v: &str| v.split(',').map(parse_int).collect::<Result<Vec<_>, _>>();

        Ok(GenotypeRecord {
            gt,
            ad: field(1).map(parse_list).transpose()?,
            dp: field(2).map(parse_int).transpose()?,
            gq: field(3).map(parse_int).transpose()?,
            pl: field(4).map(parse_list).transpose()?,
        })
    }
}
