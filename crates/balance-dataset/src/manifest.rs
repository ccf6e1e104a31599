//! `dataset.yaml` manifest describing an output corpus.

use balance_core::{ClassId, Result, Split};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "dataset.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub path: PathBuf,
    pub train: String,
    pub val: String,
    pub names: BTreeMap<ClassId, String>,
    pub nc: usize,
}

impl DatasetManifest {
    /// Builds the manifest for `root`, naming configured classes and any extra observed ones
    pub fn new(root: &Path, class_names: &[String], observed: impl IntoIterator<Item = ClassId>) -> Self {
        let mut names: BTreeMap<ClassId, String> = class_names
            .iter()
            .enumerate()
            .map(|(id, name)| (id as ClassId, name.clone()))
            .collect();
        for class_id in observed {
            names.entry(class_id).or_insert_with(|| format!("class_{class_id}"));
        }

        Self {
            path: root.to_path_buf(),
            train: format!("{}/images", Split::Train.dir_name()),
            val: format!("{}/images", Split::Validation.dir_name()),
            nc: names.len(),
            names,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Writes `dataset.yaml` under the corpus root and returns its path
    pub fn write(&self) -> Result<PathBuf> {
        let path = self.path.join(MANIFEST_FILE);
        fs::write(&path, self.to_yaml()?)?;
        Ok(path)
    }
}
