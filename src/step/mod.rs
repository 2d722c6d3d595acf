mod file;
mod runner;

pub use file::{KubeconfigFile, CLEANED_UP_MESSAGE};
pub use runner::{CancelToken, StepRunner, CANCELLED_EXIT_CODE};
