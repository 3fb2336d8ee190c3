//! Value marshalling
//!
//! Templates are planned against target types, then emitted as ABI-exact
//! bytes with any pointed-to data placed in target memory.

pub mod encoded;
pub mod encoder;
pub mod marshaller;
pub mod template;

pub use encoded::EncodedValue;
pub use marshaller::ValueMarshaller;
pub use template::{Scalar, ValueTemplate};
