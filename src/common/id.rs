//! Ring identifier for peers and keys.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The width of an [Id] in hex digits; its canonical form is this many
/// lower-hex characters, zero padded.
pub const ID_DIGITS: usize = 32;

/// The width of an [Id] in bits. The ring holds `2^ID_BITS` keys, so `u128`
/// wrapping arithmetic is exactly arithmetic mod the ring size.
pub const ID_BITS: u32 = 128;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
/// A point on the circular identifier space shared by peers and keys.
pub struct Id(u128);

impl Id {
    /// The zero id, also used as the hash sentinel of an empty Merkle subtree.
    pub const ZERO: Id = Id(0);
    /// The largest id on the ring.
    pub const MAX: Id = Id(u128::MAX);

    pub fn new(value: u128) -> Id {
        Id(value)
    }

    /// Derive an id from plaintext: the first sixteen bytes of its SHA-1
    /// digest, big endian. Peers hash `"ip:port"`, clients hash key names.
    pub fn hash(plaintext: &str) -> Id {
        let digest = sha1_smol::Sha1::from(plaintext.as_bytes()).digest().bytes();
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&digest[..16]);
        Id(u128::from_be_bytes(buf))
    }

    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        Id(rng.gen())
    }

    pub fn value(self) -> u128 {
        self.0
    }

    /// Clockwise step forward on the ring.
    pub fn add(self, rhs: u128) -> Id {
        Id(self.0.wrapping_add(rhs))
    }

    /// Clockwise step backward on the ring.
    pub fn sub(self, rhs: u128) -> Id {
        Id(self.0.wrapping_sub(rhs))
    }

    /// Is this id on the clockwise arc from `lower` to `upper`?
    ///
    /// When `lower == upper` the arc degenerates to the single point `upper`.
    /// When `lower > upper` the arc wraps through zero, which is the common
    /// case in ring routing: membership is then the complement of the
    /// non-wrapping arc `[upper, lower]`.
    pub fn in_between(self, lower: Id, upper: Id, inclusive: bool) -> bool {
        if lower == upper {
            return self == upper;
        }

        if lower < upper {
            if inclusive {
                lower <= self && self <= upper
            } else {
                lower < self && self < upper
            }
        } else if inclusive {
            !(upper < self && self < lower)
        } else {
            !(upper <= self && self <= lower)
        }
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:032x})", self.0)
    }
}

impl FromStr for Id {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Id(u128::from_str_radix(s, 16)?))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(Id::hash("127.0.0.1:7300"), Id::hash("127.0.0.1:7300"));
        assert_ne!(Id::hash("127.0.0.1:7300"), Id::hash("127.0.0.1:7301"));
    }

    #[test]
    fn modular_arithmetic_wraps() {
        assert_eq!(Id::MAX.add(1), Id::ZERO);
        assert_eq!(Id::ZERO.sub(1), Id::MAX);
        assert_eq!(Id::new(10).sub(3), Id::new(7));
    }

    #[test]
    fn in_between_plain_interval() {
        let (lo, hi) = (Id::new(10), Id::new(20));

        assert!(Id::new(15).in_between(lo, hi, true));
        assert!(Id::new(10).in_between(lo, hi, true));
        assert!(Id::new(20).in_between(lo, hi, true));
        assert!(!Id::new(10).in_between(lo, hi, false));
        assert!(!Id::new(20).in_between(lo, hi, false));
        assert!(!Id::new(21).in_between(lo, hi, true));
    }

    #[test]
    fn in_between_wraps_through_zero() {
        // Spec boundary case: 0 is between N-1 and 1.
        assert!(Id::ZERO.in_between(Id::MAX, Id::new(1), true));
        assert!(Id::new(5).in_between(Id::MAX.sub(5), Id::new(10), true));
        assert!(!Id::new(50).in_between(Id::MAX.sub(5), Id::new(10), true));
        // Exclusive endpoints on the wrap segment.
        assert!(!Id::MAX.in_between(Id::MAX, Id::new(10), false));
    }

    #[test]
    fn in_between_degenerate_interval() {
        let point = Id::new(42);
        assert!(point.in_between(point, point, true));
        assert!(point.in_between(point, point, false));
        assert!(!Id::new(41).in_between(point, point, true));
    }

    #[test]
    fn hex_round_trip() {
        let id = Id::hash("some key");
        let rendered = id.to_string();

        assert_eq!(rendered.len(), ID_DIGITS);
        assert_eq!(rendered.parse::<Id>().unwrap(), id);
    }

    #[test]
    fn serde_uses_fixed_width_hex() {
        let id = Id::new(0xff);
        let json = serde_json::to_string(&id).unwrap();

        assert_eq!(json, format!("\"{:032x}\"", 0xff));
        assert_eq!(serde_json::from_str::<Id>(&json).unwrap(), id);
    }
}
