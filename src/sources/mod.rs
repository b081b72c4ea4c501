//! File-based implementations of the snapshot and structure collaborators.
pub mod csv_snapshot;
pub mod structure_file;

pub use csv_snapshot::CsvSnapshotReader;
pub use structure_file::StructureFile;
