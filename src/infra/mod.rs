pub mod abort_signal;
pub mod process;
