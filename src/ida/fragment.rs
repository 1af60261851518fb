//! One dispersed row of an encoded value.

use std::fmt::{self, Debug, Formatter};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ida::IdaParams;
use crate::{Error, Result};

const BASE_64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Clone, Eq)]
/// Row `index` (one-based) of a dispersed value: a sequence of residues
/// mod `p`, tagged with the parameters that produced it.
pub struct DataFragment {
    pub(crate) index: usize,
    pub(crate) values: Vec<i64>,
    pub(crate) params: IdaParams,
}

impl DataFragment {
    pub(crate) fn new(index: usize, values: Vec<i64>, params: IdaParams) -> DataFragment {
        DataFragment {
            index,
            values,
            params,
        }
    }

    /// The one-based row index of this fragment.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn params(&self) -> IdaParams {
        self.params
    }

    /// Build the fragment list for an encoded matrix, indices 1..=n.
    pub(crate) fn from_matrix(matrix: Vec<Vec<i64>>, params: IdaParams) -> Vec<DataFragment> {
        matrix
            .into_iter()
            .enumerate()
            .map(|(i, values)| DataFragment::new(i + 1, values, params))
            .collect()
    }
}

impl PartialEq for DataFragment {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.values == other.values
    }
}

impl Debug for DataFragment {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("DataFragment")
            .field("index", &self.index)
            .field("len", &self.values.len())
            .finish()
    }
}

// === Base-64 coding ===

/// Digits needed to render one residue: the least `d` with `64^d >= p`.
fn digits_per_value(p: i64) -> usize {
    let mut digits = 1;
    let mut max = 64i64;
    while max < p {
        digits += 1;
        max *= 64;
    }
    digits
}

/// Fixed-width base-64: every value becomes exactly `digits` characters.
pub(crate) fn to_base64(values: &[i64], digits: usize) -> Result<String> {
    let ceiling = 64i64.pow(digits as u32);
    let mut rendered = String::with_capacity(values.len() * digits);

    for &value in values {
        if !(0..ceiling).contains(&value) {
            return Err(Error::Base64Overflow(value));
        }

        let mut remainder = value;
        for position in (0..digits).rev() {
            let place = 64i64.pow(position as u32);
            rendered.push(BASE_64_ALPHABET[(remainder / place) as usize] as char);
            remainder %= place;
        }
    }

    Ok(rendered)
}

pub(crate) fn from_base64(rendered: &str, digits: usize) -> Result<Vec<i64>> {
    let bytes = rendered.as_bytes();
    let mut values = Vec::with_capacity(bytes.len() / digits);

    for chunk in bytes.chunks_exact(digits) {
        let mut value = 0i64;
        for &byte in chunk {
            value = value * 64 + char_value(byte)?;
        }
        values.push(value);
    }

    Ok(values)
}

fn char_value(byte: u8) -> Result<i64> {
    match byte {
        b'A'..=b'Z' => Ok((byte - b'A') as i64),
        b'a'..=b'z' => Ok((byte - b'a') as i64 + 26),
        b'0'..=b'9' => Ok((byte - b'0') as i64 + 52),
        b'+' => Ok(62),
        b'/' => Ok(63),
        other => Err(Error::Base64Char(other as char)),
    }
}

// === Wire form ===

#[derive(Serialize, Deserialize)]
struct WireFragment {
    #[serde(rename = "M")]
    m: usize,
    #[serde(rename = "N")]
    n: usize,
    #[serde(rename = "P")]
    p: i64,
    #[serde(rename = "INDEX")]
    index: usize,
    #[serde(rename = "FRAGMENT")]
    fragment: String,
}

impl Serialize for DataFragment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let digits = digits_per_value(self.params.p);
        let fragment = to_base64(&self.values, digits).map_err(serde::ser::Error::custom)?;

        WireFragment {
            m: self.params.m,
            n: self.params.n,
            p: self.params.p,
            index: self.index,
            fragment,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataFragment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireFragment::deserialize(deserializer)?;
        let params = IdaParams::new(wire.n, wire.m, wire.p).map_err(de::Error::custom)?;
        let values =
            from_base64(&wire.fragment, digits_per_value(wire.p)).map_err(de::Error::custom)?;

        Ok(DataFragment::new(wire.index, values, params))
    }
}
