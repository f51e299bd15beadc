// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Report writer. JSON is the supported format; anything else falls back
//! with a warning since report options travel opaquely from the caller.

use crate::config::ReportOptions;
use crate::errors::ValidatorResult;
use crate::types::DetectionRun;
use std::path::PathBuf;
use tracing::{info, warn};

/// Serialize a run to disk, returning the report path
pub fn write_report(run: &DetectionRun, options: &ReportOptions) -> ValidatorResult<PathBuf> {
    if options.format != "json" {
        warn!(format = options.format.as_str(), "Unsupported report format, writing JSON");
    }

    let dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)?;

    let filename = options.filename.clone().unwrap_or_else(|| {
        format!(
            "pistin-report-{}.json",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        )
    });

    let path = dir.join(filename);
    std::fs::write(&path, serde_json::to_string_pretty(run)?)?;
    info!(path = %path.display(), findings = run.results.len(), "Report written");
    Ok(path)
}
