use std::fs;
use std::path::{Path, PathBuf};

use rally_cut_rally::RallyReport;
use serde::{Deserialize, Serialize};

use crate::error::RallyCutError;

/// One rally as consumed by trimming/export tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RallyLogEntry {
    pub original_index: usize,
    pub start: u64,
    pub stop: u64,
    pub is_selected: bool,
    pub arc_count: usize,
    pub duration: u64,
    pub travel_distance: f64,
    pub detected_percentage: f64,
}

pub fn entries(report: &RallyReport) -> Vec<RallyLogEntry> {
    report
        .rallies
        .iter()
        .map(|record| RallyLogEntry {
            original_index: record.original_index,
            start: record.start,
            stop: record.stop,
            is_selected: record.is_selected,
            arc_count: record.rally.arc_count(),
            duration: record.rally.duration(),
            travel_distance: record.rally.travel_distance(),
            detected_percentage: record.rally.detected_percentage(),
        })
        .collect()
}

pub fn write_rally_log(path: &Path, entries: &[RallyLogEntry]) -> Result<(), RallyCutError> {
    let bytes =
        serde_json::to_vec_pretty(entries).map_err(|err| RallyCutError::json(path, err))?;
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| RallyCutError::io(parent, err))?;
    }
    fs::write(path, bytes).map_err(|err| RallyCutError::io(path, err))
}

pub fn read_rally_log(path: &Path) -> Result<Vec<RallyLogEntry>, RallyCutError> {
    let bytes = fs::read(path).map_err(|err| RallyCutError::io(path, err))?;
    serde_json::from_slice(&bytes).map_err(|err| RallyCutError::json(path, err))
}

pub fn default_rally_log_path(input: &Path) -> PathBuf {
    input.with_extension("rallies.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_a_write_read_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rallies.json");
        let written = vec![
            RallyLogEntry {
                original_index: 0,
                start: 120,
                stop: 410,
                is_selected: true,
                arc_count: 5,
                duration: 290,
                travel_distance: 81234.5,
                detected_percentage: 87.5,
            },
            RallyLogEntry {
                original_index: 1,
                start: 900,
                stop: 960,
                is_selected: false,
                arc_count: 2,
                duration: 60,
                travel_distance: 6100.0,
                detected_percentage: 40.0,
            },
        ];
        write_rally_log(&path, &written).unwrap();
        assert_eq!(read_rally_log(&path).unwrap(), written);
    }

    #[test]
    fn empty_report_writes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.json");
        write_rally_log(&path, &entries(&RallyReport::default())).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "[]");
    }
}
