//! Archive assembly for deployable bundles

pub mod builder;
pub mod bundles;
pub mod ignore;
pub mod spec;

pub use builder::{ArchiveBuilder, ArchiveSettings};
pub use bundles::BundleKind;
pub use ignore::IgnoreMatcher;
pub use spec::{BundleSpec, Exclusions, SourceDir};
