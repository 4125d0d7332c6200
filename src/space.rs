use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::features::FeatureMap;

/// Ordered feature vocabulary shared by a training matrix and every
/// prediction made with the resulting model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSpace {
    names: Vec<String>,
}

/// Dense rows, one column per [`FeatureSpace`] entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub rows: Vec<Vec<f64>>,
    pub width: usize,
}

/// A feature map aligned to a fixed space.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub values: Vec<f64>,
    /// Names in the map that the space does not know.
    pub dropped: usize,
    /// Names of the space absent from the map.
    pub zero_filled: usize,
}

impl FeatureSpace {
    /// Union of all names, sorted lexicographically.
    pub fn build<'a>(maps: impl IntoIterator<Item = &'a FeatureMap>) -> Self {
        let names = maps
            .into_iter()
            .flat_map(|map| map.names().map(str::to_string))
            .collect::<BTreeSet<_>>();
        Self {
            names: names.into_iter().collect(),
        }
    }

    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether names are distinct; persisted spaces are checked on load.
    pub fn is_well_formed(&self) -> bool {
        let distinct = self.names.iter().collect::<BTreeSet<_>>();
        distinct.len() == self.names.len()
    }

    pub fn encode<'a>(&self, maps: impl IntoIterator<Item = &'a FeatureMap>) -> FeatureMatrix {
        let index = self.index();
        let rows = maps
            .into_iter()
            .map(|map| self.row(map, &index).values)
            .collect();
        FeatureMatrix {
            rows,
            width: self.len(),
        }
    }

    /// Align one map by name. Never grows the space.
    pub fn project(&self, map: &FeatureMap) -> Projection {
        self.row(map, &self.index())
    }

    fn index(&self) -> HashMap<&str, usize> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect()
    }

    fn row(&self, map: &FeatureMap, index: &HashMap<&str, usize>) -> Projection {
        let mut values = vec![0.0; self.len()];
        let mut dropped = 0;
        let mut seen = 0;
        for (name, value) in map.iter() {
            match index.get(name) {
                Some(&col) => {
                    values[col] = f64::from(value);
                    seen += 1;
                }
                None => dropped += 1,
            }
        }
        Projection {
            values,
            dropped,
            zero_filled: self.len() - seen,
        }
    }
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
