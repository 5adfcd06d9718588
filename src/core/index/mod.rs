// Secondary index engines built over a sealed column store.
pub mod cursor;
pub mod geo;
pub mod ngram;
pub mod rows;
pub mod scalar;
pub mod sorted;
