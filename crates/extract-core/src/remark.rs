//! Predefined validation and rejection messages offered to operators.

use crate::error::{ExtractError, Result};
use crate::paths;
use crate::state::{IdKind, State};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemarkKind {
    Validation,
    Rejection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remark {
    pub id: u64,
    pub kind: RemarkKind,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemarkCatalog {
    #[serde(default)]
    pub remarks: Vec<Remark>,
}

impl RemarkCatalog {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::remarks_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let catalog: RemarkCatalog = serde_yaml::from_str(&data)?;
        Ok(catalog)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::remarks_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn add(
        &mut self,
        root: &Path,
        kind: RemarkKind,
        title: &str,
        content: &str,
    ) -> Result<u64> {
        let id = State::next_id(root, IdKind::Remark)?;
        self.remarks.push(Remark {
            id,
            kind,
            title: title.to_string(),
            content: content.to_string(),
        });
        Ok(id)
    }

    pub fn remove(&mut self, id: u64) -> Result<Remark> {
        let idx = self
            .remarks
            .iter()
            .position(|r| r.id == id)
            .ok_or(ExtractError::RemarkNotFound(id))?;
        Ok(self.remarks.remove(idx))
    }

    /// Templates of `kind` whose ids appear in `ids`, in the order given.
    /// Unknown ids and templates of the other kind are skipped.
    pub fn select(&self, kind: RemarkKind, ids: &[u64]) -> Vec<&Remark> {
        ids.iter()
            .filter_map(|id| self.remarks.iter().find(|r| r.id == *id && r.kind == kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn select_filters_by_kind_and_keeps_order() {
        let dir = TempDir::new().unwrap();
        State::new("test").save(dir.path()).unwrap();
        let mut cat = RemarkCatalog::load(dir.path()).unwrap();
        let ok = cat
            .add(dir.path(), RemarkKind::Validation, "OK", "Données conformes")
            .unwrap();
        let ko = cat
            .add(dir.path(), RemarkKind::Rejection, "Hors zone", "Périmètre hors canton")
            .unwrap();
        let ok2 = cat
            .add(dir.path(), RemarkKind::Validation, "Partiel", "Livraison partielle")
            .unwrap();
        cat.save(dir.path()).unwrap();

        let cat = RemarkCatalog::load(dir.path()).unwrap();
        let titles: Vec<&str> = cat
            .select(RemarkKind::Validation, &[ok2, ko, ok, 999])
            .iter()
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Partiel", "OK"]);
    }

    #[test]
    fn remove_unknown_fails() {
        let mut cat = RemarkCatalog::default();
        assert!(matches!(cat.remove(4), Err(ExtractError::RemarkNotFound(4))));
    }
}
