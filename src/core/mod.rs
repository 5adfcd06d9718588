// Core modules: value model, column store, index engines, container codec, errors.
pub mod body;
pub mod codec;
pub mod container;
pub mod error;
pub mod flags;
pub mod geo;
pub mod index;
pub mod order;
pub mod predicate;
pub mod value;
pub mod varint;
