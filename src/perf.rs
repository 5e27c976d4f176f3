//! Parallel block decoding.
//!
//! Blocks in a container are framed independently, so once their raw bytes
//! have been read they can be decompressed and decoded on separate threads
//! sharing one [`ResolvedPlan`].
//!
//! [`decode_blocks_parallel`] uses Rayon when the `parallel` feature is
//! enabled and runs the same work sequentially otherwise.  Results come back
//! in input order either way.

use std::io::{Read, Seek};

use crate::binary::DecodeLimits;
use crate::codec::Codec;
use crate::io_stream::{decode_raw_block, ContainerError, RawBlock, Reader};
use crate::resolve::ResolvedPlan;
use crate::types::Value;

/// Decode every block in `blocks`.
///
/// One result per block, in the same order.  A damaged block yields its own
/// error and does not affect its neighbours.
pub fn decode_blocks_parallel(
    blocks: &[RawBlock],
    codec:  &dyn Codec,
    plan:   &ResolvedPlan,
    limits: DecodeLimits,
) -> Vec<Result<Vec<Value>, ContainerError>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        blocks
            .par_iter()
            .map(|raw| decode_raw_block(raw, codec, plan, limits))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        blocks
            .iter()
            .map(|raw| decode_raw_block(raw, codec, plan, limits))
            .collect()
    }
}

/// Read the remaining blocks of `reader` and decode them with
/// [`decode_blocks_parallel`].
///
/// Records are returned in file order.  The first failing block, whether in
/// framing or decoding, is returned as the error; no record of that block or
/// any later block is returned.
pub fn read_all_parallel<R: Read + Seek>(reader: &mut Reader<R>) -> Result<Vec<Value>, ContainerError> {
    let mut blocks = Vec::new();
    let mut framing_error = None;
    loop {
        match reader.read_raw_block() {
            Ok(Some(raw)) => blocks.push(raw),
            Ok(None) => break,
            Err(e) => {
                framing_error = Some(e);
                break;
            }
        }
    }

    let plan = reader.plan();
    let mut out = Vec::new();
    for decoded in decode_blocks_parallel(&blocks, reader.codec().as_ref(), plan, reader.decode_limits()) {
        out.extend(decoded?);
    }
    match framing_error {
        Some(e) => Err(e),
        None => Ok(out),
    }
}
