//! Evidence bundle: staging, manifest, deterministic archive, and
//! after-the-fact verification.

pub mod manifest;
pub mod packager;
pub mod verifier;

pub use manifest::Manifest;
pub use packager::{BundlePackager, PackageError, PackageErrorKind, PackagedBundle};
pub use verifier::{verify, VerifyReport};
