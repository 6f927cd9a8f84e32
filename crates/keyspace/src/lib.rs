mod engine;
mod split;
mod words;

pub use engine::{run, Chunk, Progress, ProgressStatus};
pub use split::{split, SplitError};
pub use words::Words;
