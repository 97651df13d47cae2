//! Operational services: backups and bulk data load

pub mod backup;
pub mod dataload;

pub use backup::{BackupCoordinator, BackupImage, BackupRecord, BackupStatus};
pub use dataload::{DataLoadPipeline, DataLoadTarget};
