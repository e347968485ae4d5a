//! Relation metadata: the column layout of a relation and where its files
//! live.
//!
//! A [`Catalog`] hands out a [`CatalogSession`] that is opened, queried and
//! closed within a single [`crate::table::Table::open`] call; nothing keeps a
//! connection around between tables.

use ahash::AHashMap;
use anyhow::{bail, Result};
use common::HeapError;
use smol_str::SmolStr;
use std::path::{Path, PathBuf};
use storage::toast::toast_columns;
use storage::ColumnSpec;
use tracing::debug;

pub trait Catalog {
    type Session<'a>: CatalogSession
    where
        Self: 'a;

    fn open(&self) -> Result<Self::Session<'_>>;
}

pub trait CatalogSession {
    /// User columns of `relation` in attribute order.
    fn columns(&mut self, relation: &str) -> Result<Vec<ColumnSpec>>;
    /// Absolute paths of the relation's first segment and of its toast
    /// relation, if it has one.
    fn relation_paths(&mut self, relation: &str) -> Result<RelationPaths>;
    fn close(self) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToastRelation {
    pub name: SmolStr,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationPaths {
    pub heap: PathBuf,
    pub toast: Option<ToastRelation>,
}

impl RelationPaths {
    /// Join paths as reported by `pg_relation_filepath` (relative to the
    /// data directory) onto `data_dir`. Absolute paths are kept.
    pub fn resolve(data_dir: &Path, heap: &Path, toast: Option<(&str, &Path)>) -> Self {
        Self {
            heap: data_dir.join(heap),
            toast: toast.map(|(name, path)| ToastRelation {
                name: name.into(),
                path: data_dir.join(path),
            }),
        }
    }
}

#[derive(Clone, Debug)]
struct StaticRelation {
    columns: Vec<ColumnSpec>,
    filepath: PathBuf,
    toast: Option<SmolStr>,
}

/// Catalog backed by metadata known up front, e.g. from a dump of
/// `pg_attribute` or from the command line.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    data_directory: PathBuf,
    relations: AHashMap<SmolStr, StaticRelation>,
}

impl StaticCatalog {
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            relations: AHashMap::new(),
        }
    }

    pub fn with_relation(
        mut self,
        name: impl Into<SmolStr>,
        columns: Vec<ColumnSpec>,
        filepath: impl Into<PathBuf>,
    ) -> Self {
        self.relations.insert(
            name.into(),
            StaticRelation {
                columns,
                filepath: filepath.into(),
                toast: None,
            },
        );
        self
    }

    /// Register `toast` as the toast relation of `relation`, with the
    /// standard chunk layout.
    pub fn with_toast(
        mut self,
        relation: &str,
        toast: impl Into<SmolStr>,
        filepath: impl Into<PathBuf>,
    ) -> Self {
        let toast = toast.into();
        if let Some(rel) = self.relations.get_mut(relation) {
            rel.toast = Some(toast.clone());
        }
        self.relations.insert(
            toast,
            StaticRelation {
                columns: toast_columns(),
                filepath: filepath.into(),
                toast: None,
            },
        );
        self
    }

    fn relation(&self, name: &str) -> Result<&StaticRelation> {
        match self.relations.get(name) {
            Some(rel) => Ok(rel),
            None => bail!(HeapError::NotFound("relation".into(), name.into())),
        }
    }
}

impl Catalog for StaticCatalog {
    type Session<'a> = StaticSession<'a>;

    fn open(&self) -> Result<StaticSession<'_>> {
        debug!(relations = self.relations.len(), "opened static catalog session");
        Ok(StaticSession { catalog: self })
    }
}

pub struct StaticSession<'a> {
    catalog: &'a StaticCatalog,
}

impl CatalogSession for StaticSession<'_> {
    fn columns(&mut self, relation: &str) -> Result<Vec<ColumnSpec>> {
        Ok(self.catalog.relation(relation)?.columns.clone())
    }

    fn relation_paths(&mut self, relation: &str) -> Result<RelationPaths> {
        let rel = self.catalog.relation(relation)?;
        let toast = match &rel.toast {
            Some(name) => Some((name.as_str(), self.catalog.relation(name)?.filepath.as_path())),
            None => None,
        };
        Ok(RelationPaths::resolve(
            &self.catalog.data_directory,
            &rel.filepath,
            toast,
        ))
    }

    fn close(self) -> Result<()> {
        debug!("closed static catalog session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new("/srv/pgdata")
            .with_relation(
                "docs",
                vec![
                    ColumnSpec::new("id", "int4", b'i', 4),
                    ColumnSpec::new("body", "text", b'i', -1),
                ],
                "base/16384/16401",
            )
            .with_toast("docs", "pg_toast_16401", "base/16384/16404")
            .with_relation(
                "tags",
                vec![ColumnSpec::new("tag", "text", b'i', -1)],
                "/mnt/ts/tags",
            )
    }

    #[test]
    fn test_resolve_joins_data_directory() -> Result<()> {
        let catalog = catalog();
        let mut session = catalog.open()?;
        let paths = session.relation_paths("docs")?;
        assert_eq!(paths.heap, PathBuf::from("/srv/pgdata/base/16384/16401"));
        let toast = paths.toast.expect("toast relation");
        assert_eq!(toast.name, "pg_toast_16401");
        assert_eq!(toast.path, PathBuf::from("/srv/pgdata/base/16384/16404"));
        assert_eq!(session.columns(&toast.name)?, toast_columns());
        session.close()
    }

    #[test]
    fn test_absolute_path_and_no_toast() -> Result<()> {
        let catalog = catalog();
        let mut session = catalog.open()?;
        let paths = session.relation_paths("tags")?;
        assert_eq!(paths.heap, PathBuf::from("/mnt/ts/tags"));
        assert!(paths.toast.is_none());
        assert_eq!(session.columns("tags")?.len(), 1);
        session.close()
    }

    #[test]
    fn test_unknown_relation() -> Result<()> {
        let catalog = catalog();
        let mut session = catalog.open()?;
        let err = session.columns("missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HeapError>(),
            Some(HeapError::NotFound(kind, name)) if kind == "relation" && name == "missing"
        ));
        session.close()
    }
}
