//! CTAP2 flavoured CBOR helpers on top of `ciborium`.

pub mod args;
pub mod ordered_ser;

pub use args::{encode_request, pack_args, ResponseMap};
pub use ordered_ser::{make_ordered, to_canonical_vec};
