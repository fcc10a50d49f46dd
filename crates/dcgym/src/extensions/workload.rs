//! Workload trace readers and the oversize-cloudlet splitter.

use std::fs::File;
use std::io::{BufRead, BufReader};

use serde::Serialize;
use thiserror::Error;

use crate::core::config::{SimulationConfig, WorkloadMode};

// SWF field layout (whitespace-delimited, 18 fields minimum).
const SWF_JOB_NUM_INDEX: usize = 0;
const SWF_SUBMIT_TIME_INDEX: usize = 1;
const SWF_RUN_TIME_INDEX: usize = 3;
const SWF_NUM_PROC_INDEX: usize = 4;
const SWF_REQ_NUM_PROC_INDEX: usize = 7;
const SWF_STATUS_INDEX: usize = 10;
const SWF_FIELD_COUNT: usize = 18;

/// Id offset applied to pieces produced by the splitter, so that piece ids
/// never collide with trace ids.
const SPLIT_ID_OFFSET: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("cannot read trace file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed trace line {line} in `{path}`: {reason}")]
    Malformed {
        path: String,
        line: usize,
        reason: String,
    },
}

/// A cloudlet as described by the workload trace, before any simulation
/// state exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudletDescriptor {
    pub id: u64,
    /// Absolute arrival time in simulated seconds.
    pub arrival_time: f64,
    /// Length in million instructions.
    pub mi: u64,
    pub cores: u32,
}

/// Reads the configured trace and applies the splitter when enabled.
pub fn load_workload(config: &SimulationConfig) -> Result<Vec<CloudletDescriptor>, WorkloadError> {
    let limit = config.max_cloudlets_to_create_from_workload_file;
    let descriptors = match config.workload_mode {
        WorkloadMode::Swf => read_swf(&config.cloudlet_trace_file, config.workload_reader_mips, limit)?,
        WorkloadMode::Csv => read_csv(&config.cloudlet_trace_file, limit)?,
    };
    if config.split_large_cloudlets {
        Ok(split_oversize(descriptors, config.max_cloudlet_pes))
    } else {
        Ok(descriptors)
    }
}

fn io_err(path: &str, source: std::io::Error) -> WorkloadError {
    WorkloadError::Io {
        path: path.to_string(),
        source,
    }
}

fn parse_field<T: std::str::FromStr>(
    raw: &str,
    path: &str,
    line: usize,
    what: &str,
) -> Result<T, WorkloadError> {
    raw.trim().parse().map_err(|_| WorkloadError::Malformed {
        path: path.to_string(),
        line,
        reason: format!("cannot parse {} from `{}`", what, raw),
    })
}

/// Reads a Standard Workload Format job log.
///
/// Comment lines (`;` or `#`) and jobs with status 0 (failed) are skipped.
/// The core demand is the larger of the requested and actually allocated
/// processor counts, at least 1; the length is the job runtime multiplied
/// by the reference MIPS, at least 1 MI.
pub fn read_swf(path: &str, reference_mips: u64, limit: usize) -> Result<Vec<CloudletDescriptor>, WorkloadError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let reader = BufReader::new(file);
    let mut descriptors = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        if descriptors.len() >= limit {
            break;
        }
        let line = line.map_err(|e| io_err(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < SWF_FIELD_COUNT {
            continue;
        }
        let status: i64 = parse_field(fields[SWF_STATUS_INDEX], path, line_no + 1, "job status")?;
        if status == 0 {
            continue;
        }

        let parsed_id: i64 = parse_field(fields[SWF_JOB_NUM_INDEX], path, line_no + 1, "job id")?;
        let id = if parsed_id <= -1 {
            descriptors.len() as u64 + 1
        } else {
            parsed_id as u64
        };

        // A runtime of 0 is legal in SWF (rounded down); treat it as 1s.
        let run_time: i64 = parse_field(fields[SWF_RUN_TIME_INDEX], path, line_no + 1, "run time")?;
        let run_time = run_time.max(1) as u64;

        let req_procs: i64 = parse_field(fields[SWF_REQ_NUM_PROC_INDEX], path, line_no + 1, "requested processors")?;
        let used_procs: i64 = parse_field(fields[SWF_NUM_PROC_INDEX], path, line_no + 1, "allocated processors")?;
        let cores = req_procs.max(used_procs).max(1) as u32;

        let submit_time: i64 = parse_field(fields[SWF_SUBMIT_TIME_INDEX], path, line_no + 1, "submit time")?;
        let arrival_time = submit_time.max(0) as f64;

        let mi = (run_time * reference_mips).max(1);

        descriptors.push(CloudletDescriptor {
            id,
            arrival_time,
            mi,
            cores,
        });
    }
    Ok(descriptors)
}

/// Reads a `job_id,arrival_time,mi,allocated_cores` CSV trace.
///
/// A header row is skipped when its first field is not numeric. Each field
/// is lower-bounded at its natural minimum (0 for the arrival time, 1 for
/// length and cores).
pub fn read_csv(path: &str, limit: usize) -> Result<Vec<CloudletDescriptor>, WorkloadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| match e.into_kind() {
            csv::ErrorKind::Io(source) => io_err(path, source),
            other => WorkloadError::Malformed {
                path: path.to_string(),
                line: 0,
                reason: format!("{:?}", other),
            },
        })?;

    let mut descriptors = Vec::new();
    for (line_no, record) in reader.records().enumerate() {
        if descriptors.len() >= limit {
            break;
        }
        let record = record.map_err(|e| WorkloadError::Malformed {
            path: path.to_string(),
            line: line_no + 1,
            reason: e.to_string(),
        })?;
        if record.len() < 4 {
            continue;
        }
        if record[0].parse::<u64>().is_err() {
            // Header row.
            continue;
        }
        let id: u64 = parse_field(&record[0], path, line_no + 1, "job id")?;
        let arrival: f64 = parse_field(&record[1], path, line_no + 1, "arrival time")?;
        let mi: i64 = parse_field(&record[2], path, line_no + 1, "length")?;
        let cores: i64 = parse_field(&record[3], path, line_no + 1, "core count")?;

        descriptors.push(CloudletDescriptor {
            id,
            arrival_time: arrival.max(0.0),
            mi: mi.max(1) as u64,
            cores: cores.max(1) as u32,
        });
    }
    Ok(descriptors)
}

/// Partitions descriptors demanding more than `max_pes` cores into pieces
/// of at most `max_pes` cores each, with lengths proportional to their core
/// share. Piece ids start past the largest trace id plus a fixed offset;
/// pieces keep the original arrival time.
pub fn split_oversize(descriptors: Vec<CloudletDescriptor>, max_pes: u32) -> Vec<CloudletDescriptor> {
    let mut next_id = descriptors.iter().map(|d| d.id).max().unwrap_or(0) + SPLIT_ID_OFFSET;
    let mut result = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        if descriptor.cores <= max_pes {
            result.push(descriptor);
            continue;
        }
        let mi_per_core = descriptor.mi as f64 / descriptor.cores as f64;
        let mut remaining = descriptor.cores;
        while remaining > 0 {
            let cores = remaining.min(max_pes);
            let mi = ((mi_per_core * cores as f64).round() as u64).max(1);
            result.push(CloudletDescriptor {
                id: next_id,
                arrival_time: descriptor.arrival_time,
                mi,
                cores,
            });
            next_id += 1;
            remaining -= cores;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitter_partitions_cores_and_length_proportionally() {
        let descriptors = vec![CloudletDescriptor {
            id: 7,
            arrival_time: 3.0,
            mi: 12000,
            cores: 12,
        }];
        let pieces = split_oversize(descriptors, 8);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].cores, 8);
        assert_eq!(pieces[1].cores, 4);
        assert_eq!(pieces[0].mi + pieces[1].mi, 12000);
        assert!((pieces[0].mi as f64 - 8000.0).abs() <= 1.0);
        assert!((pieces[1].mi as f64 - 4000.0).abs() <= 1.0);
        assert_eq!(pieces[0].id, 7 + 1_000_000);
        assert_eq!(pieces[1].id, 7 + 1_000_001);
        assert!(pieces.iter().all(|p| p.arrival_time == 3.0));
    }

    #[test]
    fn splitter_keeps_small_descriptors_untouched() {
        let descriptors = vec![CloudletDescriptor {
            id: 1,
            arrival_time: 0.0,
            mi: 500,
            cores: 4,
        }];
        let out = split_oversize(descriptors.clone(), 8);
        assert_eq!(out, descriptors);
    }
}
