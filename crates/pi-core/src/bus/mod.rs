pub mod map;

pub use map::{decode, unmapped_word, Mapped};
