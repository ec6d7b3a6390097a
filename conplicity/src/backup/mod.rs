pub mod cycle;
pub mod env;
pub mod supervisor;

pub use cycle::{BackupCycle, CycleReport, DuplicityCommands, VolumeReport};
pub use env::compose_environment;
pub use supervisor::{BackupCommand, RunResult, Supervisor, UNKNOWN_EXIT_CODE};
