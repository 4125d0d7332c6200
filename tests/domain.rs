use assert_matches::assert_matches;

use kira_amr::domain::{Accession, FeatureSource, LabelMap, parse_accession_list};
use kira_amr::error::AmrError;

#[test]
fn parse_accession_valid() {
    let acc: Accession = " SRR1234567 ".parse().unwrap();
    assert_eq!(acc.as_str(), "SRR1234567");
}

#[test]
fn parse_accession_invalid() {
    let err = "SRR 12".parse::<Accession>().unwrap_err();
    assert_matches!(err, AmrError::InvalidAccession(_));
    assert_matches!("".parse::<Accession>(), Err(AmrError::InvalidAccession(_)));
}

#[test]
fn accession_list_formats_agree() {
    let json = parse_accession_list(r#"["ERR1", "ERR2", "ERR1"]"#);
    let object = parse_accession_list(r#"{"a": "ERR1", "b": "ERR2"}"#);
    let decorated = parse_accession_list("[\n'ERR1',\n\"ERR2\",\nERR1\n]\n");
    let plain = parse_accession_list("ERR1\n\nERR2\n");

    let expected: Vec<Accession> = vec!["ERR1".parse().unwrap(), "ERR2".parse().unwrap()];
    assert_eq!(json, expected);
    assert_eq!(object, expected);
    assert_eq!(decorated, expected);
    assert_eq!(plain, expected);
}

#[test]
fn object_values_keep_file_order() {
    let list = parse_accession_list(r#"{"z": "SRR3", "a": "SRR1", "m": "SRR2"}"#);
    let ids: Vec<_> = list.iter().map(Accession::as_str).collect();
    assert_eq!(ids, ["SRR3", "SRR1", "SRR2"]);
}

#[test]
fn invalid_entries_are_skipped() {
    let list = parse_accession_list("ERR1\nnot valid\nERR2\n");
    assert_eq!(list.len(), 2);
}

#[test]
fn label_map_names() {
    let map = LabelMap::default();
    assert_eq!(map.name(0), "Resistant");
    assert_eq!(map.positive_name(), "Susceptible");
    assert_eq!(map.name(7), "label 7");
}

#[test]
fn feature_source_display() {
    assert_eq!(FeatureSource::Report.to_string(), "report");
    assert_eq!(FeatureSource::Summary.to_string(), "summary");
}
