// Columnar values are never stored self-describing: a value's bytes are
// meaningless without its schema type. What this crate gives the writer
// tree is the lower layer that makes that possible to build on:
//
//   - bit stream: LSB-first bit read/write, no buffer-resizing policy
//   - varint: unsigned LEB128, zig-zag signed, and fixed-width slots
//   - bitmask: a hierarchical sparse-set codec plus lazy mapping
//     operators, for Optional/OneOf discrimination and Ref partitioning
//   - tape: the append-only side buffer for strings and bitmask blobs
//
// None of this module knows about schemas, writer trees, or passes;
// those live in bufferql-writer and bufferql-schema, built on top.

#![allow(dead_code)]

pub mod bitmask;
pub mod bitstream;
pub mod tape;
pub mod varint;

pub use bitmask::{
    backward_map_indexes, backward_map_one_of, backward_map_single_index,
    backward_map_single_one_of, bit_to_index, chain_backward_indexes, chain_forward_indexes,
    decode_bitmask, diff_indexes, encode_bitmask, encode_one_of, forward_map_indexes,
    forward_map_one_of, forward_map_single_index, forward_map_single_one_of, index_to_bit,
    index_to_one_of, merge_one_of_indexes, one_of_to_index, BitmaskDecode,
};
pub use bitstream::{BitReader, BitWriter};
pub use tape::{DataTape, TapeKey};
pub use varint::{
    read_varint_fixed_signed, read_varint_fixed_unsigned, read_varint_signed,
    read_varint_unsigned, size_varint, size_varint_signed, write_varint_fixed_signed,
    write_varint_fixed_unsigned, write_varint_signed, write_varint_unsigned, zigzag_decode,
    zigzag_encode,
};
