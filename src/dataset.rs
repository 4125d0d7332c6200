use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{Accession, Label, LabelMap, RESISTANT, SUSCEPTIBLE};
use crate::error::AmrError;
use crate::features::FeatureMap;
use crate::space::{FeatureMatrix, FeatureSpace};
use crate::workspace::Workspace;

#[derive(Debug, Deserialize, Serialize)]
struct LabelRow {
    sample_id: String,
    label: i64,
}

/// Phenotype labels keyed by accession.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: BTreeMap<Accession, Label>,
}

impl LabelTable {
    pub fn read(path: &Path) -> Result<Self, AmrError> {
        let file = File::open(path).map_err(|_| AmrError::InputNotFound(path.to_path_buf()))?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AmrError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut table = LabelTable::default();
        for (line, record) in reader.deserialize::<LabelRow>().enumerate() {
            let row = record.map_err(|err| AmrError::LabelParse(format!("row {}: {err}", line + 1)))?;
            let accession: Accession = row.sample_id.parse()?;
            let label = match row.label {
                0 => RESISTANT,
                1 => SUSCEPTIBLE,
                value => {
                    return Err(AmrError::InvalidLabel {
                        sample: row.sample_id,
                        value,
                    });
                }
            };
            table.insert(accession, label)?;
        }
        Ok(table)
    }

    /// Resistant isolates are labelled 0, susceptible ones 1.
    pub fn from_lists(resistant: &[Accession], susceptible: &[Accession]) -> Result<Self, AmrError> {
        let mut table = LabelTable::default();
        for acc in resistant {
            table.insert(acc.clone(), RESISTANT)?;
        }
        for acc in susceptible {
            table.insert(acc.clone(), SUSCEPTIBLE)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, accession: Accession, label: Label) -> Result<(), AmrError> {
        match self.labels.get(&accession) {
            Some(existing) if *existing != label => Err(AmrError::LabelConflict(accession.to_string())),
            Some(_) => Ok(()),
            None => {
                self.labels.insert(accession, label);
                Ok(())
            }
        }
    }

    pub fn get(&self, accession: &Accession) -> Option<Label> {
        self.labels.get(accession).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<(), AmrError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for (accession, label) in &self.labels {
            writer
                .serialize(LabelRow {
                    sample_id: accession.to_string(),
                    label: i64::from(*label),
                })
                .map_err(|err| AmrError::Filesystem(err.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| AmrError::Filesystem(err.to_string()))?;
        Workspace::write_bytes_atomic(path, &bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEntry {
    pub accession: Accession,
    pub features: FeatureMap,
    pub label: Label,
}

/// Labeled isolates in accession order.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    pub entries: Vec<LabeledEntry>,
    pub label_map: LabelMap,
}

/// A dataset turned into numbers; row `i` belongs to `accessions[i]`.
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    pub space: FeatureSpace,
    pub matrix: FeatureMatrix,
    pub labels: Vec<Label>,
    pub accessions: Vec<Accession>,
    pub label_map: LabelMap,
}

impl LabeledDataset {
    /// Join isolates with their labels. Unlabeled isolates and labels without
    /// features are left out.
    pub fn assemble(corpus: &BTreeMap<Accession, FeatureMap>, labels: &LabelTable) -> Self {
        let entries = corpus
            .iter()
            .filter_map(|(accession, features)| {
                labels.get(accession).map(|label| LabeledEntry {
                    accession: accession.clone(),
                    features: features.clone(),
                    label,
                })
            })
            .collect::<Vec<_>>();

        let unlabeled = corpus.len() - entries.len();
        let without_features = labels
            .labels
            .keys()
            .filter(|acc| !corpus.contains_key(*acc))
            .count();
        tracing::debug!(
            labeled = entries.len(),
            unlabeled,
            without_features,
            "dataset assembled"
        );

        Self {
            entries,
            label_map: LabelMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Result<EncodedDataset, AmrError> {
        if self.entries.is_empty() {
            return Err(AmrError::EmptyDataset(
                "no isolate has both features and a label".to_string(),
            ));
        }
        let space = FeatureSpace::build(self.entries.iter().map(|entry| &entry.features));
        let matrix = space.encode(self.entries.iter().map(|entry| &entry.features));
        Ok(EncodedDataset {
            space,
            matrix,
            labels: self.entries.iter().map(|entry| entry.label).collect(),
            accessions: self.entries.iter().map(|entry| entry.accession.clone()).collect(),
            label_map: self.label_map.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn read_label_table() {
        let table = LabelTable::from_reader("sample_id,label\nERR1, 0\nERR2,1\nERR1,0\n".as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&"ERR2".parse().unwrap()), Some(SUSCEPTIBLE));
    }

    #[test]
    fn reject_out_of_range_label() {
        let err = LabelTable::from_reader("sample_id,label\nERR1,2\n".as_bytes()).unwrap_err();
        assert_matches!(err, AmrError::InvalidLabel { value: 2, .. });
    }

    #[test]
    fn reject_conflicting_label() {
        let err = LabelTable::from_reader("sample_id,label\nERR1,0\nERR1,1\n".as_bytes()).unwrap_err();
        assert_matches!(err, AmrError::LabelConflict(_));
    }

    #[test]
    fn assemble_skips_unlabeled_and_featureless() {
        let mut corpus = BTreeMap::new();
        corpus.insert("B".parse().unwrap(), [("geneY", 1u8)].into_iter().collect());
        corpus.insert("A".parse().unwrap(), [("geneX", 1u8)].into_iter().collect());
        corpus.insert("U".parse().unwrap(), [("geneZ", 1u8)].into_iter().collect());
        let labels = LabelTable::from_reader("sample_id,label\nA,0\nB,1\nC,1\n".as_bytes()).unwrap();

        let dataset = LabeledDataset::assemble(&corpus, &labels);
        let ids: Vec<_> = dataset.entries.iter().map(|e| e.accession.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        let encoded = dataset.encode().unwrap();
        assert_eq!(encoded.space.names(), ["geneX", "geneY"]);
        assert_eq!(encoded.labels, vec![0, 1]);
    }

    #[test]
    fn empty_join_is_an_error() {
        let labels = LabelTable::default();
        let dataset = LabeledDataset::assemble(&BTreeMap::new(), &labels);
        assert_matches!(dataset.encode(), Err(AmrError::EmptyDataset(_)));
    }
}
