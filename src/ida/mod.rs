//! Rabin-style information dispersal over GF(p).
//!
//! A value is reshaped into column segments of length `m` and multiplied by
//! an `n x m` Vandermonde matrix `E[i][j] = i^j mod p`; row `i` of the
//! product is fragment `i`. Any `m` rows of a Vandermonde matrix are
//! linearly independent over GF(p), so any `m` fragments reconstruct the
//! value by inverting the square matrix their indices select.

mod block;
mod fragment;

pub(crate) use block::DataBlock;
pub use fragment::DataFragment;

use std::collections::BTreeMap;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Dispersal parameters: `n` fragments of which any `m` reconstruct, over
/// the field of the prime `p`.
pub struct IdaParams {
    pub(crate) n: usize,
    pub(crate) m: usize,
    pub(crate) p: i64,
}

impl IdaParams {
    /// Validates `n > m` and `p > n`. `p` must be prime for the field
    /// arithmetic to hold; that is not checked here.
    pub fn new(n: usize, m: usize, p: i64) -> Result<IdaParams> {
        if !(n > m && m > 0 && p > n as i64) {
            return Err(Error::InvalidIdaParams);
        }

        Ok(IdaParams { n, m, p })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn p(&self) -> i64 {
        self.p
    }
}

impl Default for IdaParams {
    fn default() -> Self {
        IdaParams {
            n: 14,
            m: 10,
            p: 257,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Ida {
    params: IdaParams,
    encoding_matrix: Vec<Vec<i64>>,
}

impl Ida {
    pub fn new(params: IdaParams) -> Ida {
        Ida {
            params,
            encoding_matrix: encoding_matrix(params),
        }
    }

    /// Disperse a value into `n` fragment rows.
    pub fn encode(&self, values: &[i64]) -> Vec<Vec<i64>> {
        let segments = self.split_to_segments(values);

        (0..self.params.n)
            .map(|i| {
                segments
                    .iter()
                    .map(|segment| inner_product(&self.encoding_matrix[i], segment, self.params.p))
                    .collect()
            })
            .collect()
    }

    /// Reconstruct a value from at least `m` fragment rows and their
    /// one-based indices, stripping the zero padding the encoder added.
    pub fn decode(&self, rows: &[Vec<i64>], indices: &[i64]) -> Result<Vec<i64>> {
        let m = self.params.m;
        if rows.len() < m {
            return Err(Error::TooFewFragments {
                got: rows.len(),
                need: m,
            });
        }

        let basis = &indices[..m];
        let inverse = vandermonde_inverse(basis, self.params.p)?;
        let output = matrix_product(&inverse, &rows[..m], self.params.p);

        if output.is_empty() || output[0].is_empty() {
            return Ok(Vec::new());
        }

        let columns = output[0].len();
        let mut segments: Vec<Vec<i64>> = (0..columns)
            .map(|col| (0..m).map(|row| output[row][col]).collect())
            .collect();

        while segments
            .last()
            .is_some_and(|segment| segment.iter().all(|&value| value == 0))
        {
            segments.pop();
        }
        if let Some(last) = segments.last_mut() {
            while last.last() == Some(&0) {
                last.pop();
            }
        }

        Ok(segments.concat())
    }

    /// Zero-pad to a multiple of `m` and reshape into columns of length `m`.
    fn split_to_segments(&self, values: &[i64]) -> Vec<Vec<i64>> {
        let m = self.params.m;

        values
            .chunks(m)
            .map(|chunk| {
                let mut segment = chunk.to_vec();
                segment.resize(m, 0);
                segment
            })
            .collect()
    }
}

// === Field arithmetic ===

/// Remainder that is non-negative for negative operands.
fn modulo(lhs: i64, rhs: i64) -> i64 {
    (lhs % rhs + rhs) % rhs
}

fn inner_product(lhs: &[i64], rhs: &[i64], prime: i64) -> i64 {
    lhs.iter()
        .zip(rhs)
        .fold(0, |sum, (l, r)| modulo(sum + l * r, prime))
}

fn matrix_product(lhs: &[Vec<i64>], rhs: &[Vec<i64>], prime: i64) -> Vec<Vec<i64>> {
    let inner = lhs[0].len();
    let columns = rhs[0].len();

    lhs.iter()
        .map(|row| {
            (0..columns)
                .map(|j| {
                    (0..inner).fold(0, |cell, k| modulo(cell + row[k] * rhs[k][j], prime))
                })
                .collect()
        })
        .collect()
}

fn transpose(matrix: &[Vec<i64>]) -> Vec<Vec<i64>> {
    let size = matrix.len();
    (0..size)
        .map(|i| (0..size).map(|j| matrix[j][i]).collect())
        .collect()
}

/// Multiplicative inverse in GF(p) by the extended Euclidean algorithm.
fn mod_inverse(n: i64, p: i64) -> Result<i64> {
    let (mut t, mut new_t) = (0i64, 1i64);
    let (mut r, mut new_r) = (p, n);

    while new_r != 0 {
        let quotient = r / new_r;
        (t, new_t) = (new_t, t - quotient * new_t);
        (r, new_r) = (new_r, r - quotient * new_r);
    }

    if r > 1 {
        // Not coprime with p; unreachable while p is prime and n nonzero.
        return Err(Error::InvalidIdaParams);
    }
    if t < 0 {
        t += p;
    }

    Ok(t)
}

fn encoding_matrix(params: IdaParams) -> Vec<Vec<i64>> {
    (1..=params.n as i64)
        .map(|a| {
            let mut row = Vec::with_capacity(params.m);
            let mut element = 1i64;
            for _ in 0..params.m {
                row.push(element);
                element = modulo(element * a, params.p);
            }
            row
        })
        .collect()
}

/// The elementary symmetric polynomials e_0..e_m of the basis, mod p.
fn elementary_symmetric(values: &[i64], m: usize, prime: i64) -> Vec<i64> {
    let count = values.len();
    let mut el = vec![vec![0i64; count + 1]; m + 1];

    for i in 1..=count {
        el[1][i] = modulo(el[1][i - 1] + values[i - 1], prime);
    }
    for i in 2..=m {
        for j in i..=count {
            el[i][j] = modulo(el[i - 1][j - 1] * values[j - 1] + el[i][j - 1], prime);
        }
    }

    (0..=m).map(|i| el[i][count]).collect()
}

/// Closed-form inverse of the Vandermonde matrix the basis rows select.
///
/// Column `i` holds the coefficients of the Lagrange basis polynomial of
/// `basis[i]`: the numerator polynomial comes from dividing the full
/// elementary-symmetric expansion by `(x - basis[i])` synthetically, the
/// denominator is `prod_{j != i}(basis[i] - basis[j])`, inverted mod p.
fn vandermonde_inverse(basis: &[i64], prime: i64) -> Result<Vec<Vec<i64>>> {
    let m = basis.len();
    let el = elementary_symmetric(basis, m, prime);

    let mut denominators = Vec::with_capacity(m);
    for i in 0..m {
        let mut product = 1i64;
        for j in 0..m {
            if j != i {
                product = modulo(product * (basis[i] - basis[j]), prime);
            }
        }
        denominators.push(product);
    }

    let mut numerators = Vec::with_capacity(m);
    for &element in basis {
        let mut row = vec![1i64];
        let mut sign = -1i64;
        for j in 1..m {
            let leading = row.last().expect("row starts non-empty");
            let cell = modulo(modulo(leading * element, prime) + sign * el[j], prime);
            row.push(cell);
            sign = -sign;
        }
        row.reverse();
        numerators.push(row);
    }

    let mut inverses: BTreeMap<i64, i64> = BTreeMap::new();
    let mut scaled = Vec::with_capacity(m);
    for i in 0..m {
        let denominator = denominators[i];
        let inverse = match inverses.get(&denominator) {
            Some(&cached) => cached,
            None => {
                let computed = mod_inverse(denominator, prime)?;
                inverses.insert(denominator, computed);
                computed
            }
        };

        scaled.push(
            numerators[i]
                .iter()
                .map(|&numerator| modulo(numerator * inverse, prime))
                .collect::<Vec<i64>>(),
        );
    }

    Ok(transpose(&scaled))
}

#[cfg(test)]
mod test {
    use super::*;

    fn reference() -> Ida {
        Ida::new(IdaParams::default())
    }

    #[test]
    fn params_are_validated() {
        assert!(IdaParams::new(14, 10, 257).is_ok());
        assert!(IdaParams::new(10, 10, 257).is_err());
        assert!(IdaParams::new(3, 4, 257).is_err());
        assert!(IdaParams::new(14, 10, 11).is_err());
        assert!(IdaParams::new(3, 0, 257).is_err());
    }

    #[test]
    fn mod_inverse_inverts() {
        for value in 1..257 {
            let inverse = mod_inverse(value, 257).unwrap();
            assert_eq!(modulo(value * inverse, 257), 1, "value {value}");
        }
    }

    #[test]
    fn encoding_matrix_is_vandermonde() {
        let matrix = encoding_matrix(IdaParams::new(4, 3, 257).unwrap());

        for (i, row) in matrix.iter().enumerate() {
            for (j, &cell) in row.iter().enumerate() {
                assert_eq!(cell, (i as i64 + 1).pow(j as u32) % 257);
            }
        }
    }

    #[test]
    fn decode_reverses_encode() {
        let ida = reference();
        let original: Vec<i64> = b"information dispersal, dispersed".iter().map(|&b| b as i64).collect();

        let fragments = ida.encode(&original);
        let indices: Vec<i64> = (1..=14).collect();

        assert_eq!(ida.decode(&fragments, &indices).unwrap(), original);
    }

    #[test]
    fn any_m_rows_reconstruct() {
        let ida = reference();
        let original: Vec<i64> = (1..=25).collect();
        let fragments = ida.encode(&original);

        // A handful of different m-subsets, including non-contiguous ones.
        let subsets: [&[usize]; 3] = [
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            &[4, 5, 6, 7, 8, 9, 10, 11, 12, 13],
            &[0, 2, 4, 6, 8, 10, 12, 13, 1, 3],
        ];

        for subset in subsets {
            let rows: Vec<Vec<i64>> = subset.iter().map(|&i| fragments[i].clone()).collect();
            let indices: Vec<i64> = subset.iter().map(|&i| i as i64 + 1).collect();
            assert_eq!(ida.decode(&rows, &indices).unwrap(), original, "{subset:?}");
        }
    }

    #[test]
    fn length_not_a_multiple_of_m_round_trips() {
        let ida = Ida::new(IdaParams::new(3, 2, 257).unwrap());
        let original: Vec<i64> = vec![104, 101, 108, 108, 111];

        let fragments = ida.encode(&original);
        assert_eq!(fragments[0].len(), 3, "five values pad to three segments");

        let decoded = ida
            .decode(&fragments[..2], &[1, 2])
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn too_few_rows_is_an_error() {
        let ida = reference();
        let fragments = ida.encode(&[1, 2, 3]);

        let result = ida.decode(&fragments[..9], &(1..=9).collect::<Vec<i64>>());
        assert!(matches!(
            result,
            Err(Error::TooFewFragments { got: 9, need: 10 })
        ));
    }

    #[test]
    fn empty_value_round_trips() {
        let ida = reference();
        let fragments = ida.encode(&[]);

        assert_eq!(fragments.len(), 14);
        assert!(fragments.iter().all(|f| f.is_empty()));
        let indices: Vec<i64> = (1..=14).collect();
        assert_eq!(ida.decode(&fragments, &indices).unwrap(), Vec::<i64>::new());
    }
}
