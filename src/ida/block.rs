//! A value together with its full fragment set.

use crate::ida::{DataFragment, Ida, IdaParams};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
/// The unit DHash stores: the original byte payload and the `n` fragments
/// it disperses into. Rebuilt from any `m` of those fragments.
pub(crate) struct DataBlock {
    original: Vec<i64>,
    fragments: Vec<DataFragment>,
    params: IdaParams,
}

impl DataBlock {
    pub fn encode(bytes: &[u8], params: IdaParams) -> DataBlock {
        let original: Vec<i64> = bytes.iter().map(|&byte| byte as i64).collect();
        let matrix = Ida::new(params).encode(&original);

        DataBlock {
            original,
            fragments: DataFragment::from_matrix(matrix, params),
            params,
        }
    }

    /// Reconstruct from a partial fragment set, then re-encode so the block
    /// carries all `n` fragments again regardless of how few arrived.
    pub fn from_fragments(fragments: &[DataFragment], params: IdaParams) -> Result<DataBlock> {
        let ida = Ida::new(params);

        let rows: Vec<Vec<i64>> = fragments.iter().map(|f| f.values.clone()).collect();
        let indices: Vec<i64> = fragments.iter().map(|f| f.index as i64).collect();
        let original = ida.decode(&rows, &indices)?;
        let matrix = ida.encode(&original);

        Ok(DataBlock {
            original,
            fragments: DataFragment::from_matrix(matrix, params),
            params,
        })
    }

    pub fn fragments(&self) -> &[DataFragment] {
        &self.fragments
    }

    /// The payload as bytes. Trailing zero bytes are padding and dropped.
    pub fn decode_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self.original.iter().map(|&value| value as u8).collect();
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fragments_are_indexed_from_one() {
        let block = DataBlock::encode(b"payload", IdaParams::default());

        assert_eq!(block.fragments().len(), 14);
        for (i, fragment) in block.fragments().iter().enumerate() {
            assert_eq!(fragment.index(), i + 1);
        }
    }

    #[test]
    fn any_m_fragments_rebuild_the_block() {
        let params = IdaParams::default();
        let block = DataBlock::encode(b"the quick brown fox", params);

        let subset: Vec<DataFragment> = block.fragments()[2..12].to_vec();
        let rebuilt = DataBlock::from_fragments(&subset, params).unwrap();

        assert_eq!(rebuilt.decode_bytes(), b"the quick brown fox");
        assert_eq!(rebuilt.fragments().len(), 14);
        assert_eq!(rebuilt, block);
    }

    #[test]
    fn too_few_fragments_error() {
        let params = IdaParams::new(3, 2, 257).unwrap();
        let block = DataBlock::encode(b"xy", params);

        let subset = &block.fragments()[..1];
        assert!(DataBlock::from_fragments(subset, params).is_err());
    }

    #[test]
    fn odd_length_payload_round_trips() {
        let params = IdaParams::new(3, 2, 257).unwrap();
        let block = DataBlock::encode(b"hello", params);

        let rebuilt =
            DataBlock::from_fragments(&block.fragments()[1..3], params).unwrap();
        assert_eq!(rebuilt.decode_bytes(), b"hello");
    }
}
