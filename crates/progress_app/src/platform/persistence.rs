use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use progress_core::CompletedDesign;
use progress_logging::{progress_info, progress_warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

const STATE_FILENAME: &str = ".completed_designs.ron";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state directory {path:?} unusable: {source}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot serialize completed designs: {0}")]
    Serialize(#[from] ron::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedDesign {
    design_id: String,
    name: String,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    image_urls: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    completed: Vec<PersistedDesign>,
}

pub(crate) fn state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILENAME)
}

/// Reads designs finalized by an earlier run. Missing or unreadable state
/// counts as none.
pub(crate) fn load_completed_designs(state_dir: &Path) -> Vec<CompletedDesign> {
    let path = state_path(state_dir);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            progress_warn!("Failed to read completed designs from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    let state: PersistedState = match ron::from_str(&content) {
        Ok(state) => state,
        Err(err) => {
            progress_warn!("Failed to parse completed designs from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    let designs: Vec<CompletedDesign> = state
        .completed
        .into_iter()
        .map(|design| CompletedDesign {
            design_id: design.design_id,
            name: design.name,
            price: design.price,
            image_urls: design.image_urls,
        })
        .collect();
    progress_info!("Loaded {} completed designs from {:?}", designs.len(), path);
    designs
}

/// Replaces the state file with `designs`, atomically.
pub(crate) fn save_completed_designs<'a>(
    state_dir: &Path,
    designs: impl IntoIterator<Item = &'a CompletedDesign>,
) -> Result<PathBuf, PersistError> {
    let state = PersistedState {
        completed: designs
            .into_iter()
            .map(|design| PersistedDesign {
                design_id: design.design_id.clone(),
                name: design.name.clone(),
                price: design.price,
                image_urls: design.image_urls.clone(),
            })
            .collect(),
    };
    let content = ron::ser::to_string_pretty(&state, ron::ser::PrettyConfig::new())?;

    fs::create_dir_all(state_dir).map_err(|source| PersistError::StateDir {
        path: state_dir.to_path_buf(),
        source,
    })?;
    let target = state_path(state_dir);
    let mut tmp = NamedTempFile::new_in(state_dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(&target).map_err(|err| PersistError::Io(err.error))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use pretty_assertions::assert_eq;
    use progress_core::CompletedDesign;
    use tempfile::tempdir;

    use super::{load_completed_designs, save_completed_designs, state_path};

    fn design(id: &str, price: Option<f64>) -> CompletedDesign {
        let mut image_urls = BTreeMap::new();
        image_urls.insert(
            "image_0".to_string(),
            format!("https://cdn.example.com/{id}.png"),
        );
        CompletedDesign {
            design_id: id.to_string(),
            name: format!("Design {id}"),
            price,
            image_urls,
        }
    }

    #[test]
    fn missing_state_loads_empty() {
        let dir = tempdir().unwrap();
        assert!(load_completed_designs(dir.path()).is_empty());
    }

    #[test]
    fn saved_designs_survive_reload() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested/state");
        let designs = vec![
            design("tee_palette_id_1_flavor_1", Some(24.5)),
            design("mug_cid_7", None),
        ];

        let path = save_completed_designs(&nested, &designs).unwrap();

        assert_eq!(path, state_path(&nested));
        assert_eq!(load_completed_designs(&nested), designs);
    }

    #[test]
    fn save_overwrites_previous_state() {
        let dir = tempdir().unwrap();
        save_completed_designs(dir.path(), &[design("a_cid_1", None)]).unwrap();
        save_completed_designs(dir.path(), &[design("b_cid_2", None)]).unwrap();

        let loaded = load_completed_designs(dir.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].design_id, "b_cid_2");
    }

    #[test]
    fn corrupt_state_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        fs::write(state_path(dir.path()), "this is not ron (").unwrap();
        assert!(load_completed_designs(dir.path()).is_empty());
    }
}
