pub mod domain;
pub mod repository;

pub use domain::{
    normalize_group_code, normalize_groups, ContentType, DropRecord, DropSnapshot, DropWrite,
};
pub use repository::{DropRepository, DynDropRepository, RepositoryError, SqliteDropRepository};

#[cfg(test)]
pub(crate) use domain::sample_drop;
