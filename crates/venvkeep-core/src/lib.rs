mod checksum;
mod diff;
mod error;
mod package_set;
mod share;

pub use checksum::{sha256_hex, verify_sha256};
pub use diff::{compare_dotted_versions, diff, ChangeSet, VersionChange};
pub use error::Error;
pub use package_set::{normalize_package_name, PackageSet};
pub use share::{
    parse_share_document, payload_digest, python_version_family_matches, render_share_document,
    ShareDocument, SHARE_BANNER, SHARE_EXTENSION,
};
